use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn: &Arc<Transaction>, mode: LockMode) -> Self {
        Self {
            txn: txn.clone(),
            txn_id: txn.id(),
            mode,
            granted: true,
        }
    }
}

/// Per-record request queue. The condition variable is paired with the one
/// lock-table mutex; it lives behind an `Arc` so a waiter can keep it across
/// table rehashes.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Record-level two-phase lock manager with WOUND-WAIT deadlock prevention.
///
/// An older transaction (smaller id) wounds younger conflicting holders; a
/// younger requester waits for older shared-compatible holders and aborts
/// itself against an older exclusive conflict. Queue entries persist for the
/// lifetime of the process. A single mutex protects the whole table.
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`.
    ///
    /// Wounds younger exclusive holders, waits for older exclusive holders,
    /// and coexists with shared holders of any age.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();

        loop {
            // Re-validated on every wakeup: a waiter may have been wounded
            // while parked.
            if txn.state() == TransactionState::Aborted {
                return false;
            }
            if txn.isolation_level() == IsolationLevel::ReadUncommitted {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if txn.isolation_level() == IsolationLevel::RepeatableRead
                && txn.state() != TransactionState::Growing
            {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
                return true;
            }

            let me = txn.id();
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);

            Self::wound(&mut queue.requests, me, rid, |r| r.mode == LockMode::Exclusive);

            let older_writer = queue
                .requests
                .iter()
                .any(|r| r.txn_id < me && r.mode == LockMode::Exclusive);
            if older_writer {
                let cv = queue.cv.clone();
                cv.wait(&mut table);
                continue;
            }

            queue.requests.push_back(LockRequest::new(txn, LockMode::Shared));
            txn.add_shared_lock(rid);
            txn.set_state(TransactionState::Growing);
            return true;
        }
    }

    /// Acquire an exclusive lock on `rid`.
    ///
    /// Wounds every younger holder; aborts the requester itself if any older
    /// transaction holds the record in any mode.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        // Exclusive locks are growing-phase only, at every isolation level.
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }

        let me = txn.id();
        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);

        // Walk in queue order: younger holders are wounded until an older
        // holder forces the requester to abort itself.
        let mut i = 0;
        while i < queue.requests.len() {
            let other = queue.requests[i].txn_id;
            if other > me {
                let request = queue.requests.remove(i).expect("index checked above");
                Self::wound_one(&request, rid);
            } else if other < me {
                txn.set_state(TransactionState::Aborted);
                return false;
            } else {
                i += 1;
            }
        }

        queue
            .requests
            .push_back(LockRequest::new(txn, LockMode::Exclusive));
        txn.add_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        true
    }

    /// Upgrade an already-held shared lock to exclusive.
    ///
    /// Wounds younger holders of any mode and waits for older holders of any
    /// mode; once only the caller's own shared request remains, it is flipped
    /// in place.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();

        loop {
            if txn.state() == TransactionState::Aborted {
                return false;
            }
            if txn.isolation_level() == IsolationLevel::RepeatableRead
                && txn.state() != TransactionState::Growing
            {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if !txn.is_shared_locked(rid) {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if txn.is_exclusive_locked(rid) {
                return true;
            }

            let me = txn.id();
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);

            Self::wound(&mut queue.requests, me, rid, |_| true);

            let older_holder = queue.requests.iter().any(|r| r.txn_id < me);
            if older_holder {
                let cv = queue.cv.clone();
                cv.wait(&mut table);
                continue;
            }

            // Only the caller's own shared request can remain at this point.
            debug_assert_eq!(queue.requests.len(), 1);
            let request = queue
                .requests
                .front_mut()
                .expect("upgrading transaction must be queued");
            debug_assert_eq!(request.txn_id, me);
            request.mode = LockMode::Exclusive;
            request.granted = true;

            txn.remove_shared_lock(rid);
            txn.add_exclusive_lock(rid);
            txn.set_state(TransactionState::Growing);
            return true;
        }
    }

    /// Release the lock held by `txn` on `rid`, waking every waiter on the
    /// record so it can re-evaluate.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();

        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        // Strict 2PL boundary: the first release under REPEATABLE_READ ends
        // the growing phase.
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let queue = match table.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };

        let me = txn.id();
        let mut released = false;
        queue.requests.retain(|r| {
            if r.txn_id == me {
                match r.mode {
                    LockMode::Shared => txn.remove_shared_lock(rid),
                    LockMode::Exclusive => txn.remove_exclusive_lock(rid),
                }
                released = true;
                false
            } else {
                true
            }
        });

        if released {
            queue.cv.notify_all();
        }
        released
    }

    /// Abort every younger request matching `filter` and drop it from the
    /// queue. The victim finds out on its next lock-manager call.
    fn wound<F>(requests: &mut VecDeque<LockRequest>, me: TxnId, rid: Rid, filter: F)
    where
        F: Fn(&LockRequest) -> bool,
    {
        requests.retain(|r| {
            if r.txn_id > me && filter(r) {
                Self::wound_one(r, rid);
                false
            } else {
                true
            }
        });
    }

    fn wound_one(request: &LockRequest, rid: Rid) {
        debug_assert!(request.granted);
        match request.mode {
            LockMode::Shared => request.txn.remove_shared_lock(rid),
            LockMode::Exclusive => request.txn.remove_exclusive_lock(rid),
        }
        request.txn.set_state(TransactionState::Aborted);
        warn!("wounded transaction {} on record {}", request.txn_id, rid);
    }
}
