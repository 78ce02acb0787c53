use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Creates and tracks transactions, releasing their locks on completion
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicI32,

    /// Lock manager used to release locks at commit/abort
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction, releasing every lock it still holds.
    ///
    /// A transaction that was wounded in the meantime cannot commit; its
    /// locks are released and the call fails.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        self.active_transactions.lock().remove(&txn.id());
        self.release_all_locks(txn);

        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                Err(TransactionError::InvalidState(txn.id()))
            }
            _ => {
                txn.set_state(TransactionState::Committed);
                Ok(())
            }
        }
    }

    /// Abort a transaction, releasing every lock it still holds
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        self.active_transactions.lock().remove(&txn.id());
        self.release_all_locks(txn);

        match txn.state() {
            TransactionState::Committed => Err(TransactionError::InvalidState(txn.id())),
            _ => {
                txn.set_state(TransactionState::Aborted);
                Ok(())
            }
        }
    }

    /// Get an active transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_locks() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()))
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let tm = manager();
        let t0 = tm.begin(IsolationLevel::ReadCommitted);
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        assert_eq!(t0.id(), 0);
        assert_eq!(t1.id(), 1);
        assert_eq!(tm.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_releases_locks() {
        let lock_manager = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lock_manager.clone());

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        assert!(lock_manager.lock_shared(&txn, 1));
        assert!(lock_manager.lock_exclusive(&txn, 2));

        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.held_locks().is_empty());
        assert!(tm.get_transaction(txn.id()).is_none());
    }

    #[test]
    fn test_commit_after_wound_fails() {
        let lock_manager = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lock_manager.clone());

        let older = tm.begin(IsolationLevel::ReadCommitted);
        let younger = tm.begin(IsolationLevel::ReadCommitted);

        assert!(lock_manager.lock_exclusive(&younger, 7));
        assert!(lock_manager.lock_exclusive(&older, 7));

        assert!(tm.commit(&younger).is_err());
        assert_eq!(younger.state(), TransactionState::Aborted);
        tm.commit(&older).unwrap();
    }

    #[test]
    fn test_double_commit_fails() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        tm.commit(&txn).unwrap();
        assert!(tm.commit(&txn).is_err());
        assert!(tm.abort(&txn).is_err());
    }
}
