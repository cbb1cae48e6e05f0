//! Process-wide single-flight primitives for the webhook boundary.
//!
//! [`TaskLock`] guarantees at most one active pipeline run per task id.
//! Acquisition is non-blocking; a second acquisition during an active run
//! yields [`PipelineError::Busy`], which the webhook entry point surfaces as
//! an ignore response. The guard releases the slot on drop, so the lock is
//! released on every pipeline exit path. A periodic [`TaskLock::purge_expired`]
//! sweep recovers slots orphaned by crashes.
//!
//! [`WebhookLedger`] deduplicates webhook deliveries by history-item id in a
//! bounded FIFO ring: when full, the *oldest* identifier is evicted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::PipelineError;

#[derive(Debug, Default)]
struct LockState {
    held: FxHashMap<String, Instant>,
    order: VecDeque<String>,
}

/// Per-task single-flight lock.
#[derive(Clone, Debug)]
pub struct TaskLock {
    state: Arc<Mutex<LockState>>,
    capacity: usize,
}

impl TaskLock {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Try to claim the task. Returns a guard that releases on drop, or
    /// `Busy` when a run is already active.
    pub fn acquire(&self, task_id: &str) -> Result<LockGuard, PipelineError> {
        let mut state = self.state.lock().expect("task lock poisoned");
        if state.held.contains_key(task_id) {
            return Err(PipelineError::Busy {
                task_id: task_id.to_string(),
            });
        }
        // Bounded map: beyond capacity, drop the longest-held entry. A run
        // that old has crashed without releasing its slot.
        while state.held.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if state.held.remove(&oldest).is_some() {
                tracing::warn!(task_id = %oldest, "evicted stale task lock at capacity");
            }
        }
        state.held.insert(task_id.to_string(), Instant::now());
        state.order.push_back(task_id.to_string());
        Ok(LockGuard {
            task_id: task_id.to_string(),
            state: Arc::clone(&self.state),
        })
    }

    /// Drop entries older than `ttl`. Returns how many were removed.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let mut state = self.state.lock().expect("task lock poisoned");
        let expired: Vec<String> = state
            .held
            .iter()
            .filter(|(_, acquired)| acquired.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            state.held.remove(id);
            tracing::warn!(task_id = %id, "purged expired task lock");
        }
        let LockState { held, order } = &mut *state;
        order.retain(|id| held.contains_key(id));
        expired.len()
    }

    pub fn is_held(&self, task_id: &str) -> bool {
        self.state
            .lock()
            .expect("task lock poisoned")
            .held
            .contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().expect("task lock poisoned").held.len()
    }
}

/// RAII guard for a claimed task slot.
#[derive(Debug)]
pub struct LockGuard {
    task_id: String,
    state: Arc<Mutex<LockState>>,
}

impl LockGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.held.remove(&self.task_id);
            let task_id = self.task_id.clone();
            state.order.retain(|id| id != &task_id);
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    seen: FxHashSet<String>,
    order: VecDeque<String>,
}

/// Bounded FIFO ring of recently observed webhook identifiers.
#[derive(Clone, Debug)]
pub struct WebhookLedger {
    state: Arc<Mutex<LedgerState>>,
    capacity: usize,
}

impl WebhookLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Record an identifier. Returns `true` when it is fresh, `false` for a
    /// duplicate delivery.
    pub fn observe(&self, id: &str) -> bool {
        let mut state = self.state.lock().expect("webhook ledger poisoned");
        if state.seen.contains(id) {
            return false;
        }
        while state.seen.len() >= self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            } else {
                break;
            }
        }
        state.seen.insert(id.to_string());
        state.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("webhook ledger poisoned").seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_is_busy_until_release() {
        let lock = TaskLock::new(16);
        let guard = lock.acquire("task-1").unwrap();
        assert!(matches!(
            lock.acquire("task-1"),
            Err(PipelineError::Busy { .. })
        ));
        assert!(lock.acquire("task-2").is_ok());
        drop(guard);
        assert!(lock.acquire("task-1").is_ok());
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let lock = TaskLock::new(16);
        let _guard = lock.acquire("task-1").unwrap();
        assert_eq!(lock.purge_expired(Duration::from_secs(3600)), 0);
        assert!(lock.is_held("task-1"));
        assert_eq!(lock.purge_expired(Duration::ZERO), 1);
        assert!(!lock.is_held("task-1"));
    }

    #[test]
    fn capacity_evicts_oldest_slot() {
        let lock = TaskLock::new(2);
        let _a = lock.acquire("a").unwrap();
        let _b = lock.acquire("b").unwrap();
        let _c = lock.acquire("c").unwrap();
        assert!(!lock.is_held("a"));
        assert!(lock.is_held("b") && lock.is_held("c"));
    }

    #[test]
    fn ledger_deduplicates_and_evicts_fifo() {
        let ledger = WebhookLedger::new(2);
        assert!(ledger.observe("w1"));
        assert!(!ledger.observe("w1"));
        assert!(ledger.observe("w2"));
        assert!(ledger.observe("w3")); // evicts w1, the oldest
        assert!(ledger.observe("w1"));
        assert!(!ledger.observe("w3"));
    }
}
