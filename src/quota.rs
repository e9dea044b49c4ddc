//! Daily quota decisions.
//!
//! The reset is lazy: nothing runs at midnight. The stored window date is
//! compared against the caller-supplied "today" at decision time, and the
//! reset is persisted only as part of the same atomic commit that records
//! the increment, so a request straddling midnight can neither lose a reset
//! nor double-count.

use chrono::NaiveDate;

/// Action count that applies to `today`: the stored count while the window
/// matches, otherwise 0 (the logical reset).
pub fn effective_count(stored_count: u32, window: NaiveDate, today: NaiveDate) -> u32 {
    if window == today {
        stored_count
    } else {
        0
    }
}

/// Whether one more reward-granting action fits under the daily limit.
pub fn may_act(effective_count: u32, daily_limit: u32) -> bool {
    effective_count < daily_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn stale_window_yields_zero() {
        assert_eq!(effective_count(30, day(1), day(2)), 0);
        assert_eq!(effective_count(5, day(3), day(1)), 0);
    }

    #[test]
    fn current_window_keeps_stored_count() {
        assert_eq!(effective_count(12, day(4), day(4)), 12);
    }

    #[test]
    fn limit_is_exclusive() {
        assert!(may_act(0, 1));
        assert!(may_act(29, 30));
        assert!(!may_act(30, 30));
        assert!(!may_act(31, 30));
        assert!(!may_act(0, 0));
    }
}
