use chrono::NaiveDate;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::currency::CurrencyAmount;

/// Platform-assigned numeric user identity.
pub type AccountId = i64;
/// Point amounts; the ledger never holds a negative balance.
pub type Amount = u64;

const REFERRAL_CODE_BYTES: usize = 4;

/// Per-user ledger state. One row per user, keyed by `id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    /// Authoritative spendable point total.
    pub balance: Amount,
    /// Actions performed within the current quota window.
    pub actions_today: u32,
    /// Calendar date `actions_today` applies to.
    pub window: NaiveDate,
    /// Referring account, set once at creation. Never `== id`.
    pub referrer: Option<AccountId>,
    /// Opaque code identifying this account as a referral target.
    pub referral_code: String,
    /// Audit tally of accounts this one referred.
    pub referred_count: u32,
    pub created_on: NaiveDate,
    /// Store-internal commit counter; bumped on every committed mutation.
    pub version: u64,
}

impl Account {
    pub fn new(
        id: AccountId,
        referrer: Option<AccountId>,
        initial_balance: Amount,
        referral_code: String,
        today: NaiveDate,
    ) -> Self {
        Self {
            id,
            balance: initial_balance,
            actions_today: 0,
            window: today,
            referrer,
            referral_code,
            referred_count: 0,
            created_on: today,
            version: 0,
        }
    }
}

/// Read-only view handed to the surrounding shell.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub balance: Amount,
    pub actions_today: u32,
    pub window: NaiveDate,
    pub referrer: Option<AccountId>,
    pub referral_code: String,
    pub referred_count: u32,
}

impl From<&Account> for AccountSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            balance: account.balance,
            actions_today: account.actions_today,
            window: account.window,
            referrer: account.referrer,
            referral_code: account.referral_code.clone(),
            referred_count: account.referred_count,
        }
    }
}

/// How a new registration identifies its referrer: either the referrer's
/// numeric id (deep-link payload) or the opaque referral code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferrerRef {
    Id(AccountId),
    Code(String),
}

/// One redemption, append-only. Immutable once written; settlement happens
/// outside the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawalRequest {
    /// Store-assigned sequence number.
    pub id: u64,
    pub account: AccountId,
    pub points_debited: Amount,
    /// Derived payout amount; informational, points stay authoritative.
    pub currency: CurrencyAmount,
    pub method: String,
    pub destination: String,
    pub created_on: NaiveDate,
}

/// Fields of a withdrawal before the store assigns its sequence number.
#[derive(Clone, Debug)]
pub struct WithdrawalDraft {
    pub points_debited: Amount,
    pub currency: CurrencyAmount,
    pub method: String,
    pub destination: String,
    pub created_on: NaiveDate,
}

/// Fresh opaque referral code: uppercase hex, 8 characters.
pub fn generate_referral_code() -> String {
    let mut bytes = [0u8; REFERRAL_CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn new_account_starts_with_zeroed_quota() {
        let account = Account::new(42, Some(7), 250, "AB12CD34".into(), day(2024, 5, 1));
        assert_eq!(account.balance, 250);
        assert_eq!(account.actions_today, 0);
        assert_eq!(account.window, day(2024, 5, 1));
        assert_eq!(account.referrer, Some(7));
        assert_eq!(account.version, 0);
    }

    #[test]
    fn referral_codes_are_uppercase_hex_of_fixed_length() {
        let code = generate_referral_code();
        assert_eq!(code.len(), REFERRAL_CODE_BYTES * 2);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn snapshot_mirrors_account_fields() {
        let account = Account::new(9, None, 0, "00FF00FF".into(), day(2024, 5, 1));
        let snapshot = AccountSnapshot::from(&account);
        assert_eq!(snapshot.id, 9);
        assert_eq!(snapshot.referral_code, "00FF00FF");
        assert_eq!(snapshot.referrer, None);
    }
}
