//! Keyed storage of account state plus the append-only withdrawal ledger.
//!
//! Mutations are serialized per account: the map's outer `RwLock` is only
//! written on insertion, every balance/quota change happens under that one
//! account's `Mutex`, and commits are version-checked so a stale
//! read-modify-write surfaces as [`LedgerError::StorageConflict`] instead of
//! clobbering a concurrent update. Operations on different accounts never
//! contend on the same lock.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountId, Amount, WithdrawalDraft, WithdrawalRequest};
use crate::error::LedgerError;

#[derive(Debug, Default)]
struct WithdrawalLedger {
    next_id: u64,
    entries: Vec<WithdrawalRequest>,
}

/// Durable keyed store of per-user ledger state.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: RwLock<BTreeMap<AccountId, Mutex<Account>>>,
    code_index: RwLock<BTreeMap<String, AccountId>>,
    withdrawals: Mutex<WithdrawalLedger>,
}

/// Point-in-time serializable copy of the whole store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub accounts: BTreeMap<AccountId, Account>,
    pub withdrawals: Vec<WithdrawalRequest>,
    pub next_withdrawal_id: u64,
}

fn poisoned(what: &str) -> LedgerError {
    LedgerError::StorageUnavailable {
        reason: format!("{what} lock poisoned"),
    }
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a previously saved snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let code_index = snapshot
            .accounts
            .values()
            .map(|account| (account.referral_code.clone(), account.id))
            .collect();
        let accounts = snapshot
            .accounts
            .into_iter()
            .map(|(id, account)| (id, Mutex::new(account)))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
            code_index: RwLock::new(code_index),
            withdrawals: Mutex::new(WithdrawalLedger {
                next_id: snapshot.next_withdrawal_id,
                entries: snapshot.withdrawals,
            }),
        }
    }

    /// Current state of one account, if it was ever created.
    pub fn get(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| poisoned("account map"))?;
        match accounts.get(&id) {
            Some(slot) => {
                let guard = slot.lock().map_err(|_| poisoned("account"))?;
                Ok(Some(guard.clone()))
            }
            None => Ok(None),
        }
    }

    /// Resolve a referral code to the owning account.
    pub fn find_by_code(&self, code: &str) -> Result<Option<AccountId>, LedgerError> {
        let codes = self.code_index.read().map_err(|_| poisoned("code index"))?;
        Ok(codes.get(code).copied())
    }

    /// Insert a new account unless the id already exists. Returns the stored
    /// account and whether this call created it. A referral-code collision
    /// with another account surfaces as `StorageConflict` so the caller can
    /// regenerate the code and retry.
    pub fn create_if_absent(&self, account: Account) -> Result<(Account, bool), LedgerError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned("account map"))?;
        if let Some(slot) = accounts.get(&account.id) {
            let guard = slot.lock().map_err(|_| poisoned("account"))?;
            return Ok((guard.clone(), false));
        }
        let mut codes = self.code_index.write().map_err(|_| poisoned("code index"))?;
        if codes.contains_key(&account.referral_code) {
            return Err(LedgerError::StorageConflict {
                account: account.id,
            });
        }
        codes.insert(account.referral_code.clone(), account.id);
        accounts.insert(account.id, Mutex::new(account.clone()));
        Ok((account, true))
    }

    /// Atomic read-modify-write commit: replaces the stored account only if
    /// its version still matches the one the caller read.
    pub fn commit(
        &self,
        expected_version: u64,
        mut updated: Account,
    ) -> Result<Account, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| poisoned("account map"))?;
        let slot = accounts
            .get(&updated.id)
            .ok_or(LedgerError::AccountNotFound {
                account: updated.id,
            })?;
        let mut guard = slot.lock().map_err(|_| poisoned("account"))?;
        if guard.version != expected_version {
            return Err(LedgerError::StorageConflict {
                account: updated.id,
            });
        }
        updated.version = expected_version + 1;
        *guard = updated.clone();
        Ok(updated)
    }

    /// Commit a balance debit together with the withdrawal record as one
    /// atomic unit: either both are visible afterwards or neither is.
    pub fn commit_with_withdrawal(
        &self,
        expected_version: u64,
        mut updated: Account,
        draft: WithdrawalDraft,
    ) -> Result<(Account, WithdrawalRequest), LedgerError> {
        let accounts = self.accounts.read().map_err(|_| poisoned("account map"))?;
        let slot = accounts
            .get(&updated.id)
            .ok_or(LedgerError::AccountNotFound {
                account: updated.id,
            })?;
        let mut guard = slot.lock().map_err(|_| poisoned("account"))?;
        if guard.version != expected_version {
            return Err(LedgerError::StorageConflict {
                account: updated.id,
            });
        }
        // Taken while the account is still untouched so a poisoned ledger
        // lock leaves the balance exactly as it was.
        let mut ledger = self
            .withdrawals
            .lock()
            .map_err(|_| poisoned("withdrawal ledger"))?;
        let request = WithdrawalRequest {
            id: ledger.next_id,
            account: updated.id,
            points_debited: draft.points_debited,
            currency: draft.currency,
            method: draft.method,
            destination: draft.destination,
            created_on: draft.created_on,
        };
        ledger.next_id += 1;
        ledger.entries.push(request.clone());
        updated.version = expected_version + 1;
        *guard = updated.clone();
        Ok((updated, request))
    }

    /// Unconditional balance credit, used for the best-effort cross-account
    /// follow-ups (referral commission). Serialized by the account's lock.
    pub fn credit(&self, id: AccountId, amount: Amount) -> Result<Amount, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| poisoned("account map"))?;
        let slot = accounts
            .get(&id)
            .ok_or(LedgerError::AccountNotFound { account: id })?;
        let mut guard = slot.lock().map_err(|_| poisoned("account"))?;
        guard.balance += amount;
        guard.version += 1;
        Ok(guard.balance)
    }

    /// Audit-counter bump for a referrer that attracted a new registration.
    pub fn bump_referred_count(&self, id: AccountId) -> Result<u32, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| poisoned("account map"))?;
        let slot = accounts
            .get(&id)
            .ok_or(LedgerError::AccountNotFound { account: id })?;
        let mut guard = slot.lock().map_err(|_| poisoned("account"))?;
        guard.referred_count += 1;
        guard.version += 1;
        Ok(guard.referred_count)
    }

    /// All withdrawal records for one account, oldest first.
    pub fn withdrawals_for(&self, id: AccountId) -> Result<Vec<WithdrawalRequest>, LedgerError> {
        let ledger = self
            .withdrawals
            .lock()
            .map_err(|_| poisoned("withdrawal ledger"))?;
        Ok(ledger
            .entries
            .iter()
            .filter(|request| request.account == id)
            .cloned()
            .collect())
    }

    /// Consistent point-in-time copy of every account and withdrawal.
    /// Every account mutex is held (key order) before the withdrawal
    /// ledger is locked, the same account-then-ledger order as
    /// [`AccountStore::commit_with_withdrawal`], so no debit can land
    /// between copying a balance and copying the records it explains.
    pub fn snapshot(&self) -> Result<StoreSnapshot, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| poisoned("account map"))?;
        let mut guards = Vec::with_capacity(accounts.len());
        for (id, slot) in accounts.iter() {
            guards.push((*id, slot.lock().map_err(|_| poisoned("account"))?));
        }
        let ledger = self
            .withdrawals
            .lock()
            .map_err(|_| poisoned("withdrawal ledger"))?;
        let copied = guards
            .iter()
            .map(|(id, guard)| (*id, Account::clone(guard)))
            .collect();
        Ok(StoreSnapshot {
            accounts: copied,
            withdrawals: ledger.entries.clone(),
            next_withdrawal_id: ledger.next_id,
        })
    }

    /// Persist the store as a JSON document.
    pub fn save_to(&self, path: &Path) -> Result<(), LedgerError> {
        let snapshot = self.snapshot()?;
        let json =
            serde_json::to_vec_pretty(&snapshot).map_err(|err| LedgerError::StorageUnavailable {
                reason: format!("snapshot encode: {err}"),
            })?;
        fs::write(path, json).map_err(|err| LedgerError::StorageUnavailable {
            reason: format!("snapshot write: {err}"),
        })
    }

    /// Load a store previously persisted with [`AccountStore::save_to`].
    pub fn load_from(path: &Path) -> Result<Self, LedgerError> {
        let bytes = fs::read(path).map_err(|err| LedgerError::StorageUnavailable {
            reason: format!("snapshot read: {err}"),
        })?;
        let snapshot =
            serde_json::from_slice(&bytes).map_err(|err| LedgerError::StorageUnavailable {
                reason: format!("snapshot decode: {err}"),
            })?;
        Ok(Self::from_snapshot(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencyAmount;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn fresh(id: AccountId, code: &str) -> Account {
        Account::new(id, None, 0, code.into(), day(1))
    }

    #[test]
    fn create_if_absent_is_idempotent_on_id() {
        let store = AccountStore::new();
        let (first, created) = store.create_if_absent(fresh(1, "AAAA1111")).unwrap();
        assert!(created);
        let mut second_attempt = fresh(1, "BBBB2222");
        second_attempt.balance = 999;
        let (second, created) = store.create_if_absent(second_attempt).unwrap();
        assert!(!created);
        assert_eq!(second, first);
        // the losing code was never indexed
        assert_eq!(store.find_by_code("BBBB2222").unwrap(), None);
        assert_eq!(store.find_by_code("AAAA1111").unwrap(), Some(1));
    }

    #[test]
    fn duplicate_referral_code_is_a_conflict() {
        let store = AccountStore::new();
        store.create_if_absent(fresh(1, "SAMECODE")).unwrap();
        let err = store.create_if_absent(fresh(2, "SAMECODE")).unwrap_err();
        assert!(matches!(err, LedgerError::StorageConflict { account: 2 }));
        assert_eq!(store.get(2).unwrap(), None);
    }

    #[test]
    fn commit_rejects_stale_versions() {
        let store = AccountStore::new();
        let (account, _) = store.create_if_absent(fresh(1, "AAAA1111")).unwrap();

        let mut update_a = account.clone();
        update_a.balance = 100;
        let committed = store.commit(account.version, update_a).unwrap();
        assert_eq!(committed.version, account.version + 1);

        // second writer still holding the stale version loses
        let mut update_b = account.clone();
        update_b.balance = 777;
        let err = store.commit(account.version, update_b).unwrap_err();
        assert!(matches!(err, LedgerError::StorageConflict { account: 1 }));
        assert_eq!(store.get(1).unwrap().unwrap().balance, 100);
    }

    #[test]
    fn mutating_an_unknown_account_fails() {
        let store = AccountStore::new();
        let orphan = fresh(5, "AAAA1111");
        assert!(matches!(
            store.commit(0, orphan).unwrap_err(),
            LedgerError::AccountNotFound { account: 5 }
        ));
        assert!(matches!(
            store.credit(5, 10).unwrap_err(),
            LedgerError::AccountNotFound { account: 5 }
        ));
    }

    #[test]
    fn withdrawal_commit_writes_debit_and_record_together() {
        let store = AccountStore::new();
        let mut seed = fresh(1, "AAAA1111");
        seed.balance = 5_000;
        let (account, _) = store.create_if_absent(seed).unwrap();

        let mut updated = account.clone();
        updated.balance = 0;
        let draft = WithdrawalDraft {
            points_debited: 5_000,
            currency: CurrencyAmount::from_points(5_000, 250),
            method: "bkash".into(),
            destination: "01700000000".into(),
            created_on: day(2),
        };
        let (after, request) = store
            .commit_with_withdrawal(account.version, updated, draft)
            .unwrap();
        assert_eq!(after.balance, 0);
        assert_eq!(request.id, 0);
        assert_eq!(request.points_debited, 5_000);

        let recorded = store.withdrawals_for(1).unwrap();
        assert_eq!(recorded, vec![request]);
    }

    #[test]
    fn conflicted_withdrawal_leaves_no_record() {
        let store = AccountStore::new();
        let mut seed = fresh(1, "AAAA1111");
        seed.balance = 5_000;
        let (account, _) = store.create_if_absent(seed).unwrap();
        // another writer moves the account first
        store.credit(1, 1).unwrap();

        let mut updated = account.clone();
        updated.balance = 0;
        let draft = WithdrawalDraft {
            points_debited: 5_000,
            currency: CurrencyAmount::from_points(5_000, 250),
            method: "bkash".into(),
            destination: "01700000000".into(),
            created_on: day(2),
        };
        let err = store
            .commit_with_withdrawal(account.version, updated, draft)
            .unwrap_err();
        assert!(matches!(err, LedgerError::StorageConflict { account: 1 }));
        assert!(store.withdrawals_for(1).unwrap().is_empty());
        assert_eq!(store.get(1).unwrap().unwrap().balance, 5_001);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let store = AccountStore::new();
        let mut seed = fresh(1, "AAAA1111");
        seed.balance = 300;
        store.create_if_absent(seed).unwrap();
        store
            .create_if_absent(Account::new(2, Some(1), 250, "CCCC3333".into(), day(1)))
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = AccountStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.get(1).unwrap().unwrap().balance, 300);
        assert_eq!(restored.get(2).unwrap().unwrap().referrer, Some(1));
        assert_eq!(restored.find_by_code("CCCC3333").unwrap(), Some(2));
    }

    #[test]
    fn save_and_load_persist_withdrawal_sequence() {
        let store = AccountStore::new();
        let mut seed = fresh(1, "AAAA1111");
        seed.balance = 10_000;
        let (account, _) = store.create_if_absent(seed).unwrap();
        let mut updated = account.clone();
        updated.balance = 5_000;
        store
            .commit_with_withdrawal(
                account.version,
                updated,
                WithdrawalDraft {
                    points_debited: 5_000,
                    currency: CurrencyAmount::from_points(5_000, 250),
                    method: "nagad".into(),
                    destination: "01800000000".into(),
                    created_on: day(3),
                },
            )
            .unwrap();

        let path = std::env::temp_dir().join(format!(
            "reward-ledger-store-{}.json",
            std::process::id()
        ));
        store.save_to(&path).unwrap();
        let restored = AccountStore::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.get(1).unwrap().unwrap().balance, 5_000);
        let snapshot = restored.snapshot().unwrap();
        assert_eq!(snapshot.withdrawals.len(), 1);
        assert_eq!(snapshot.next_withdrawal_id, 1);
    }

    #[test]
    fn snapshot_never_splits_a_debit_from_its_record() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(AccountStore::new());
        let mut seed = fresh(1, "AAAA1111");
        seed.balance = 20_000;
        store.create_if_absent(seed).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let account = store.get(1).unwrap().unwrap();
                    let mut updated = account.clone();
                    updated.balance -= 100;
                    store
                        .commit_with_withdrawal(
                            account.version,
                            updated,
                            WithdrawalDraft {
                                points_debited: 100,
                                currency: CurrencyAmount::from_points(100, 250),
                                method: "bkash".into(),
                                destination: "01700000000".into(),
                                created_on: day(1),
                            },
                        )
                        .unwrap();
                }
            })
        };

        // every observed snapshot must balance against its own records
        let mut seen = 0;
        while seen < 200 {
            let snapshot = store.snapshot().unwrap();
            let balance = snapshot.accounts[&1].balance;
            let debited: Amount = snapshot
                .withdrawals
                .iter()
                .map(|request| request.points_debited)
                .sum();
            assert_eq!(
                balance + debited,
                20_000,
                "balance {balance} does not match {} recorded withdrawals",
                snapshot.withdrawals.len()
            );
            seen = snapshot.withdrawals.len();
        }
        writer.join().unwrap();
    }

    #[test]
    fn load_from_missing_file_is_unavailable() {
        let err = AccountStore::load_from(Path::new("/nonexistent/ledger.json")).unwrap_err();
        assert!(err.is_transient());
    }
}
