//! Reward ledger and quota engine for a "complete an action, earn points"
//! service.
//!
//! The crate is the correctness core behind a thin request-handling shell
//! (HTTP routes, bot commands): it owns balances, daily action quotas,
//! referral linkage, and withdrawal records, and guarantees that concurrent
//! requests for the same user can never corrupt them. The building blocks:
//!
//! * [`engine`] — the operations the shell calls: [`RewardLedger`] with
//!   registration, snapshots, reward grants, and withdrawal requests.
//! * [`store`] — per-account serialized storage with versioned commits and
//!   the append-only withdrawal ledger, persisted as JSON snapshots.
//! * [`quota`] — the lazy calendar-day quota decision, kept pure so the
//!   reset always rides inside the same atomic commit as the increment.
//! * [`currency`] — scaled-integer point-to-currency derivation; points
//!   stay authoritative, formatting happens only at the boundary.
//!
//! Cross-account side effects (referral commission, referred-count) are
//! deliberately committed outside the triggering account's update:
//! best-effort, logged on failure, never rolled back into the primary
//! result. This bounds every lock to one account and keeps mutually
//! referring accounts deadlock-free under load.

pub mod account;
pub mod config;
pub mod currency;
pub mod engine;
pub mod quota;
pub mod store;

mod error;

pub use account::{Account, AccountId, AccountSnapshot, Amount, ReferrerRef, WithdrawalRequest};
pub use config::LedgerConfig;
pub use currency::CurrencyAmount;
pub use engine::{Registration, RewardLedger, RewardOutcome, WithdrawalReceipt};
pub use error::LedgerError;
pub use store::{AccountStore, StoreSnapshot};
