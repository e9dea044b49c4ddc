//! The operations the surrounding shell calls: registration, snapshots,
//! reward grants, withdrawal requests.
//!
//! Primary mutations commit on exactly one account. Cross-account follow-ups
//! (the referrer's commission, the referred-count bump) run after the
//! primary commit and are best-effort: their failure is logged and reported
//! as an uncredited commission, never rolled back into the caller's result.

use chrono::NaiveDate;

use crate::account::{
    generate_referral_code, Account, AccountId, AccountSnapshot, Amount, ReferrerRef,
    WithdrawalDraft, WithdrawalRequest,
};
use crate::config::LedgerConfig;
use crate::currency::CurrencyAmount;
use crate::error::LedgerError;
use crate::quota;
use crate::store::AccountStore;

/// Conflicted commits are retried from the top this many times before the
/// conflict is surfaced to the caller.
const MAX_COMMIT_RETRIES: u32 = 16;

/// Outcome of a successful reward grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardOutcome {
    pub balance: Amount,
    pub actions_today: u32,
    /// Points actually credited to the referrer; 0 when there is no
    /// referrer, the floored commission is 0, or the follow-up failed.
    pub commission_credited: Amount,
}

/// Outcome of a registration attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub account: AccountSnapshot,
    pub was_created: bool,
}

/// Outcome of a successful withdrawal request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    pub request: WithdrawalRequest,
    pub balance: Amount,
}

/// The reward ledger and quota engine. Safe to share across request-handling
/// threads; holds no cross-request state outside the store.
pub struct RewardLedger {
    store: AccountStore,
    config: LedgerConfig,
}

impl RewardLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            store: AccountStore::new(),
            config,
        }
    }

    /// Wrap an existing store, e.g. one loaded from a snapshot file.
    pub fn with_store(store: AccountStore, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Create the account on first contact. Idempotent on `id`: a repeat
    /// call returns the existing account untouched, with no second bonus.
    /// An unresolvable or self-referencing referrer is treated as absent.
    pub fn register_account(
        &self,
        id: AccountId,
        referrer: Option<ReferrerRef>,
        today: NaiveDate,
    ) -> Result<Registration, LedgerError> {
        let referrer = self.resolve_referrer(id, referrer)?;
        let initial_balance = if referrer.is_some() {
            self.config.signup_bonus
        } else {
            0
        };

        let mut attempts = 0;
        let (account, was_created) = loop {
            let candidate = Account::new(
                id,
                referrer,
                initial_balance,
                generate_referral_code(),
                today,
            );
            match self.store.create_if_absent(candidate) {
                Ok(result) => break result,
                // referral-code collision: regenerate and try again
                Err(err @ LedgerError::StorageConflict { .. }) => {
                    attempts += 1;
                    if attempts >= MAX_COMMIT_RETRIES {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        };

        if was_created {
            if let Some(referrer_id) = account.referrer {
                if let Err(err) = self.store.bump_referred_count(referrer_id) {
                    log::warn!(
                        "referred-count bump for {referrer_id} after registering {id} failed: {err}"
                    );
                }
            }
        }

        Ok(Registration {
            account: AccountSnapshot::from(&account),
            was_created,
        })
    }

    /// Current state of one account.
    pub fn account_snapshot(&self, id: AccountId) -> Result<AccountSnapshot, LedgerError> {
        let account = self
            .store
            .get(id)?
            .ok_or(LedgerError::AccountNotFound { account: id })?;
        Ok(AccountSnapshot::from(&account))
    }

    /// Credit one completed action, enforcing the daily quota. The balance
    /// bump, counter increment, and window stamp commit atomically on the
    /// acting account; the referrer's commission is a separate best-effort
    /// credit afterwards.
    pub fn grant_reward(
        &self,
        id: AccountId,
        today: NaiveDate,
    ) -> Result<RewardOutcome, LedgerError> {
        let mut attempts = 0;
        loop {
            let account = self
                .store
                .get(id)?
                .ok_or(LedgerError::AccountNotFound { account: id })?;

            let effective = quota::effective_count(account.actions_today, account.window, today);
            if !quota::may_act(effective, self.config.daily_action_limit) {
                return Err(LedgerError::QuotaExceeded {
                    account: id,
                    limit: self.config.daily_action_limit,
                });
            }

            let mut updated = account.clone();
            updated.balance += self.config.reward_points;
            updated.actions_today = effective + 1;
            updated.window = today;

            match self.store.commit(account.version, updated) {
                Ok(committed) => {
                    let commission_credited = match account.referrer {
                        Some(referrer_id) => self.credit_commission(id, referrer_id),
                        None => 0,
                    };
                    return Ok(RewardOutcome {
                        balance: committed.balance,
                        actions_today: committed.actions_today,
                        commission_credited,
                    });
                }
                Err(err @ LedgerError::StorageConflict { .. }) => {
                    attempts += 1;
                    if attempts >= MAX_COMMIT_RETRIES {
                        return Err(err);
                    }
                    log::debug!("reward commit conflict on {id}, retry {attempts}");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Debit a redemption and record it. The debit and the appended request
    /// commit as one unit; a rejected commit leaves both untouched.
    pub fn request_withdrawal(
        &self,
        id: AccountId,
        points: Amount,
        method: &str,
        destination: &str,
        today: NaiveDate,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        if points < self.config.min_withdraw_points {
            return Err(LedgerError::BelowMinimum {
                requested: points,
                minimum: self.config.min_withdraw_points,
            });
        }

        let mut attempts = 0;
        loop {
            let account = self
                .store
                .get(id)?
                .ok_or(LedgerError::AccountNotFound { account: id })?;
            if account.balance < points {
                return Err(LedgerError::InsufficientBalance {
                    account: id,
                    requested: points,
                    available: account.balance,
                });
            }

            let mut updated = account.clone();
            updated.balance -= points;
            let draft = WithdrawalDraft {
                points_debited: points,
                currency: CurrencyAmount::from_points(points, self.config.points_per_currency_unit),
                method: method.to_string(),
                destination: destination.to_string(),
                created_on: today,
            };

            match self
                .store
                .commit_with_withdrawal(account.version, updated, draft)
            {
                Ok((committed, request)) => {
                    return Ok(WithdrawalReceipt {
                        request,
                        balance: committed.balance,
                    });
                }
                Err(err @ LedgerError::StorageConflict { .. }) => {
                    attempts += 1;
                    if attempts >= MAX_COMMIT_RETRIES {
                        return Err(err);
                    }
                    log::debug!("withdrawal commit conflict on {id}, retry {attempts}");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn resolve_referrer(
        &self,
        id: AccountId,
        referrer: Option<ReferrerRef>,
    ) -> Result<Option<AccountId>, LedgerError> {
        let candidate = match referrer {
            Some(ReferrerRef::Id(referrer_id)) => {
                self.store.get(referrer_id)?.map(|account| account.id)
            }
            Some(ReferrerRef::Code(code)) => self.store.find_by_code(&code)?,
            None => None,
        };
        Ok(candidate.filter(|referrer_id| *referrer_id != id))
    }

    fn credit_commission(&self, id: AccountId, referrer_id: AccountId) -> Amount {
        let commission = self.config.commission_for(self.config.reward_points);
        if commission == 0 {
            return 0;
        }
        match self.store.credit(referrer_id, commission) {
            Ok(_) => commission,
            Err(err) => {
                log::warn!(
                    "commission of {commission} points for referrer {referrer_id} \
                     (reward to {id}) failed: {err}"
                );
                0
            }
        }
    }
}
