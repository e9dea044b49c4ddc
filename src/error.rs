use thiserror::Error;

use crate::account::{AccountId, Amount};

/// Canonical error type exposed by the ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The account was never registered.
    #[error("unknown account {account}")]
    AccountNotFound { account: AccountId },

    /// The daily action quota is exhausted for the current window.
    #[error("daily action limit of {limit} reached for account {account}")]
    QuotaExceeded { account: AccountId, limit: u32 },

    /// Withdrawal request under the configured minimum.
    #[error("withdrawal of {requested} points is below the minimum of {minimum}")]
    BelowMinimum { requested: Amount, minimum: Amount },

    /// The account holds fewer points than the requested debit.
    #[error(
        "insufficient balance in account {account}: requested {requested}, available {available}"
    )]
    InsufficientBalance {
        account: AccountId,
        requested: Amount,
        available: Amount,
    },

    /// Transient storage failure (I/O, corrupt snapshot, poisoned lock).
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// Concurrent-update contention; the whole operation is safe to retry.
    #[error("concurrent update conflict on account {account}")]
    StorageConflict { account: AccountId },
}

impl LedgerError {
    /// Whether the caller may retry the whole operation from the top.
    /// All other kinds are terminal for the request that produced them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageUnavailable { .. } | LedgerError::StorageConflict { .. }
        )
    }
}
