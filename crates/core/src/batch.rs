//! Debounced, prioritised batching of store writes
//!
//! Callers open a transaction, record the value each store should end up
//! with, and let the manager coalesce writes. Every `add_update` pushes the
//! flush back by the debounce window. When the window elapses the queue is
//! sorted by priority then age, up to `max_batch_size` transactions are
//! merged into one value per store, and each store is written exactly once.
//!
//! A failing store marks every transaction in its batch `Failed`. Stores
//! written before the failure keep their new values.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use exhibit_cache::{env_value, ConfigError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::store::{SetError, Settable};

/// Process-unique, monotonically increasing transaction id
pub type TransactionId = u64;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction priority; lower values flush first
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BatchPriority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
}

/// Transaction lifecycle; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Check whether the transaction has finished, successfully or not
    pub fn is_finished(self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

/// Options for [`BatchManager::start_transaction`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    pub priority: BatchPriority,
}

impl TransactionOptions {
    pub fn with_priority(priority: BatchPriority) -> Self {
        Self { priority }
    }
}

/// A group of store updates applied together
#[derive(Debug, Clone)]
pub struct BatchTransaction<V> {
    pub id: TransactionId,

    /// Final value per store id
    pub changes: BTreeMap<String, V>,

    /// When the transaction was started
    pub timestamp: Instant,

    pub priority: BatchPriority,
    pub status: TransactionStatus,
}

/// Batch manager errors
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Unknown id, or the transaction is no longer pending
    #[error("invalid transaction {0}")]
    InvalidTransaction(TransactionId),

    #[error("unknown store: {0}")]
    UnknownStore(String),

    /// A store rejected its write; every listed transaction is marked failed
    #[error("store {store_id} rejected batch of {} transaction(s)", transactions.len())]
    Apply {
        store_id: String,
        transactions: Vec<TransactionId>,
        #[source]
        source: SetError,
    },
}

/// Result type for batch operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Configuration for the batch manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Quiet period after the last update before a flush
    pub debounce: Duration,

    /// Maximum transactions merged into one flush
    pub max_batch_size: usize,

    /// Finished transactions kept for status queries
    pub retain_finished: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(16),
            max_batch_size: 50,
            retain_finished: 256,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the batch size (at least one)
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    pub fn with_retain_finished(mut self, retain_finished: usize) -> Self {
        self.retain_finished = retain_finished;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// - `EXHIBIT_BATCH_DEBOUNCE_MS` (default: 16)
    /// - `EXHIBIT_BATCH_MAX_SIZE` (default: 50)
    /// - `EXHIBIT_BATCH_RETAIN_FINISHED` (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = env_value::<u64>("EXHIBIT_BATCH_DEBOUNCE_MS")? {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(size) = env_value::<usize>("EXHIBIT_BATCH_MAX_SIZE")? {
            config = config.with_max_batch_size(size);
        }
        if let Some(retain) = env_value::<usize>("EXHIBIT_BATCH_RETAIN_FINISHED")? {
            config.retain_finished = retain;
        }
        Ok(config)
    }
}

struct BatchState<V> {
    stores: HashMap<String, Arc<dyn Settable<V>>>,
    transactions: HashMap<TransactionId, BatchTransaction<V>>,
    /// Pending transactions with at least one update, in arrival order
    queue: Vec<TransactionId>,
    /// Finished transactions, oldest first
    finished: VecDeque<TransactionId>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every reschedule; a woken timer flushes only if it is current
    timer_generation: u64,
}

impl<V> Default for BatchState<V> {
    fn default() -> Self {
        Self {
            stores: HashMap::new(),
            transactions: HashMap::new(),
            queue: Vec::new(),
            finished: VecDeque::new(),
            timer: None,
            timer_generation: 0,
        }
    }
}

impl<V> BatchState<V> {
    fn pending(&self, id: TransactionId) -> BatchResult<&BatchTransaction<V>> {
        self.transactions
            .get(&id)
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .ok_or(BatchError::InvalidTransaction(id))
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct BatchInner<V> {
    config: BatchConfig,
    state: Mutex<BatchState<V>>,
}

impl<V> Drop for BatchInner<V> {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timer();
    }
}

/// Coalesces writes to registered stores
///
/// Clones share the same queue and registry. Debounced flushes run on the
/// ambient tokio runtime; without one, updates stay queued until
/// [`flush_now`](Self::flush_now) or a commit.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use exhibit_core::{BatchManager, TransactionOptions, Writable};
/// use serde_json::json;
///
/// let zoom = Writable::new(json!(1.0));
/// let batches: BatchManager = BatchManager::default();
/// batches.register_store("zoom", Arc::new(zoom.clone()));
///
/// let tx = batches.start_transaction(TransactionOptions::default());
/// batches.add_update(tx, "zoom", json!(1.5)).unwrap();
/// batches.add_update(tx, "zoom", json!(2.0)).unwrap();
/// batches.commit_transaction(tx).unwrap();
///
/// assert_eq!(zoom.get(), json!(2.0));
/// ```
pub struct BatchManager<V = serde_json::Value> {
    inner: Arc<BatchInner<V>>,
}

impl<V> Clone for BatchManager<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + 'static> Default for BatchManager<V> {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

impl<V: Clone + Send + 'static> BatchManager<V> {
    /// Create a manager with the given configuration
    pub fn new(config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                config,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Register `store` under `id`, replacing any previous registration
    pub fn register_store(&self, id: impl Into<String>, store: Arc<dyn Settable<V>>) {
        self.lock_state().stores.insert(id.into(), store);
    }

    /// Remove a store; returns whether it was registered
    pub fn unregister_store(&self, id: &str) -> bool {
        self.lock_state().stores.remove(id).is_some()
    }

    /// Open a new pending transaction
    pub fn start_transaction(&self, options: TransactionOptions) -> TransactionId {
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        self.lock_state().transactions.insert(
            id,
            BatchTransaction {
                id,
                changes: BTreeMap::new(),
                timestamp: Instant::now(),
                priority: options.priority,
                status: TransactionStatus::Pending,
            },
        );
        id
    }

    /// Record the value `store_id` should take when `tx` is applied
    ///
    /// Overwrites an earlier value for the same store in this transaction
    /// and restarts the debounce window.
    pub fn add_update(&self, tx: TransactionId, store_id: &str, value: V) -> BatchResult<()> {
        let mut state = self.lock_state();
        state.pending(tx)?;
        if !state.stores.contains_key(store_id) {
            return Err(BatchError::UnknownStore(store_id.to_string()));
        }

        if let Some(transaction) = state.transactions.get_mut(&tx) {
            transaction.changes.insert(store_id.to_string(), value);
        }
        if !state.queue.contains(&tx) {
            state.queue.push(tx);
        }
        self.schedule_flush(&mut state);
        Ok(())
    }

    /// Apply `tx` on its own right away, skipping the debounce
    pub fn commit_transaction(&self, tx: TransactionId) -> BatchResult<()> {
        {
            let mut state = self.lock_state();
            state.pending(tx)?;
            state.queue.retain(|queued| *queued != tx);
        }
        self.apply(vec![tx])
    }

    /// Flush one batch now instead of waiting for the timer
    ///
    /// Returns the number of transactions applied. Anything left in the
    /// queue starts a new debounce cycle.
    pub fn flush_now(&self) -> BatchResult<usize> {
        let batch = {
            let mut state = self.lock_state();
            state.cancel_timer();
            if state.queue.is_empty() {
                return Ok(0);
            }

            let mut queue = std::mem::take(&mut state.queue);
            queue.sort_by_key(|id| {
                state
                    .transactions
                    .get(id)
                    .map(|tx| (tx.priority, tx.timestamp, tx.id))
            });
            let take = queue.len().min(self.inner.config.max_batch_size.max(1));
            state.queue = queue.split_off(take);
            queue
        };

        let applied = batch.len();
        let result = self.apply(batch);

        let mut state = self.lock_state();
        if !state.queue.is_empty() {
            self.schedule_flush(&mut state);
        }
        result.map(|()| applied)
    }

    /// Status of a transaction, `None` if unknown or no longer retained
    pub fn transaction_status(&self, tx: TransactionId) -> Option<TransactionStatus> {
        self.lock_state().transactions.get(&tx).map(|t| t.status)
    }

    /// Copy of a transaction for diagnostics
    pub fn transaction(&self, tx: TransactionId) -> Option<BatchTransaction<V>> {
        self.lock_state().transactions.get(&tx).cloned()
    }

    /// Number of transactions still accepting updates
    pub fn pending_count(&self) -> usize {
        self.lock_state()
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .count()
    }

    /// Number of transactions waiting for a flush
    pub fn queued_count(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Cancel the timer and drop all transactions and stores
    pub fn destroy(&self) {
        let mut state = self.lock_state();
        state.cancel_timer();
        state.queue.clear();
        state.transactions.clear();
        state.finished.clear();
        state.stores.clear();
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Merge and write the given transactions as one batch
    fn apply(&self, batch: Vec<TransactionId>) -> BatchResult<()> {
        let writes = {
            let mut state = self.lock_state();
            let mut merged: BTreeMap<String, V> = BTreeMap::new();
            for id in &batch {
                if let Some(tx) = state.transactions.get_mut(id) {
                    tx.status = TransactionStatus::Processing;
                    for (store_id, value) in &tx.changes {
                        merged.insert(store_id.clone(), value.clone());
                    }
                }
            }
            merged
                .into_iter()
                .map(|(store_id, value)| {
                    let store = state.stores.get(&store_id).cloned();
                    (store_id, store, value)
                })
                .collect::<Vec<_>>()
        };

        let mut failure = None;
        for (store_id, store, value) in writes {
            let Some(store) = store else {
                warn!(%store_id, "store unregistered before flush, skipping");
                continue;
            };
            if let Err(source) = store.set(value) {
                failure = Some((store_id, source));
                break;
            }
        }

        let status = if failure.is_some() {
            TransactionStatus::Failed
        } else {
            TransactionStatus::Completed
        };
        self.finish(&batch, status);
        debug!(transactions = batch.len(), ?status, "batch applied");

        match failure {
            Some((store_id, source)) => Err(BatchError::Apply {
                store_id,
                transactions: batch,
                source,
            }),
            None => Ok(()),
        }
    }

    fn finish(&self, batch: &[TransactionId], status: TransactionStatus) {
        let mut state = self.lock_state();
        for id in batch {
            if let Some(tx) = state.transactions.get_mut(id) {
                tx.status = status;
                state.finished.push_back(*id);
            }
        }
        while state.finished.len() > self.inner.config.retain_finished {
            if let Some(old) = state.finished.pop_front() {
                state.transactions.remove(&old);
            }
        }
    }

    /// Restart the debounce timer
    fn schedule_flush(&self, state: &mut BatchState<V>) {
        state.cancel_timer();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime, updates wait for an explicit flush");
            return;
        };

        state.timer_generation = state.timer_generation.wrapping_add(1);
        let generation = state.timer_generation;
        let weak = Arc::downgrade(&self.inner);
        let debounce = self.inner.config.debounce;
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = BatchManager { inner };
            if !manager.claim_timer(generation) {
                return;
            }
            if let Err(err) = manager.flush_now() {
                error!(error = %err, "debounced batch flush failed");
            }
        }));
    }

    /// Take the timer slot for a woken timer of `generation`
    ///
    /// Returns false when the timer was cancelled or replaced while it was
    /// waking up; the newer timer (if any) stays in place.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut state = self.lock_state();
        if state.timer_generation != generation || state.timer.is_none() {
            return false;
        }
        // Forget the handle so the flush does not abort the running timer
        state.timer = None;
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, BatchState<V>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Writable;
    use serde_json::{json, Value};
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;

    /// Store that rejects every write
    struct RejectingStore;

    impl Settable<Value> for RejectingStore {
        fn set(&self, _value: Value) -> Result<(), SetError> {
            Err("disk full".into())
        }
    }

    /// Writable plus a count of `set` calls
    fn counted_store(manager: &BatchManager, id: &str) -> (Writable<Value>, Arc<AtomicUsize>) {
        let store = Writable::new(Value::Null);
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&writes);
        store
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .forget();
        manager.register_store(id, Arc::new(store.clone()));
        (store, writes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_rapid_updates() {
        let manager = BatchManager::new(BatchConfig::default());
        let (store, writes) = counted_store(&manager, "doc");

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "doc", json!(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.add_update(tx, "doc", json!(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // 20ms after the first update, but only 10ms after the last
        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Pending));
        assert_eq!(store.get(), Value::Null);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Completed));
        assert_eq!(store.get(), json!(2));
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_store_written_once_per_batch() {
        let manager = BatchManager::new(BatchConfig::default());
        let (store, writes) = counted_store(&manager, "doc");

        let first = manager.start_transaction(TransactionOptions::default());
        let second = manager.start_transaction(TransactionOptions::default());
        manager.add_update(first, "doc", json!("first")).unwrap();
        manager.add_update(second, "doc", json!("second")).unwrap();

        assert_eq!(manager.flush_now().unwrap(), 2);
        assert_eq!(store.get(), json!("second"));
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_flushes_first() {
        let manager = BatchManager::new(BatchConfig::new().with_max_batch_size(1));
        let (store, _) = counted_store(&manager, "zoom");

        let low = manager.start_transaction(TransactionOptions::with_priority(BatchPriority::Low));
        let high =
            manager.start_transaction(TransactionOptions::with_priority(BatchPriority::High));
        manager.add_update(low, "zoom", json!(0.5)).unwrap();
        manager.add_update(high, "zoom", json!(3.0)).unwrap();

        assert_eq!(manager.flush_now().unwrap(), 1);
        assert_eq!(store.get(), json!(3.0));
        assert_eq!(manager.transaction_status(low), Some(TransactionStatus::Pending));

        // The remainder goes through another debounce cycle
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.transaction_status(low), Some(TransactionStatus::Completed));
        assert_eq!(store.get(), json!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_queue_flushes_in_later_cycles() {
        let manager = BatchManager::new(BatchConfig::new().with_max_batch_size(2));
        let (_store, writes) = counted_store(&manager, "doc");

        let ids: Vec<_> = (0..3)
            .map(|n| {
                let tx = manager.start_transaction(TransactionOptions::default());
                manager.add_update(tx, "doc", json!(n)).unwrap();
                tx
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.queued_count(), 1);
        assert_eq!(manager.transaction_status(ids[2]), Some(TransactionStatus::Pending));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.queued_count(), 0);
        assert!(ids
            .iter()
            .all(|id| manager.transaction_status(*id) == Some(TransactionStatus::Completed)));
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_marks_whole_batch_without_rollback() {
        let manager = BatchManager::new(BatchConfig::default());
        let (good, _) = counted_store(&manager, "a_layers");
        manager.register_store("z_disk", Arc::new(RejectingStore));

        let first = manager.start_transaction(TransactionOptions::default());
        let second = manager.start_transaction(TransactionOptions::default());
        manager.add_update(first, "a_layers", json!(["ink"])).unwrap();
        manager.add_update(second, "z_disk", json!("save")).unwrap();

        let err = manager.flush_now().unwrap_err();
        match &err {
            BatchError::Apply {
                store_id,
                transactions,
                source,
            } => {
                assert_eq!(store_id, "z_disk");
                assert_eq!(transactions, &vec![first, second]);
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.transaction_status(first), Some(TransactionStatus::Failed));
        assert_eq!(manager.transaction_status(second), Some(TransactionStatus::Failed));
        assert_eq!(good.get(), json!(["ink"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_failure_is_visible_as_status() {
        let manager: BatchManager = BatchManager::new(BatchConfig::default());
        manager.register_store("disk", Arc::new(RejectingStore));

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "disk", json!(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_timer_does_not_flush() {
        let manager = BatchManager::new(BatchConfig::default());
        let (store, _) = counted_store(&manager, "doc");

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "doc", json!(1)).unwrap();
        let stale = manager.lock_state().timer_generation;
        manager.add_update(tx, "doc", json!(2)).unwrap();

        // The first timer woke after the reschedule
        assert!(!manager.claim_timer(stale));
        assert!(manager.lock_state().timer.is_some());
        assert_eq!(manager.queued_count(), 1);
        assert_eq!(store.get(), Value::Null);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get(), json!(2));
        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Completed));
    }

    #[test]
    fn test_deserialized_zero_batch_size_still_flushes() {
        let config: BatchConfig = serde_json::from_value(json!({"max_batch_size": 0})).unwrap();
        let manager: BatchManager = BatchManager::new(config);
        let (store, _) = counted_store(&manager, "doc");

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "doc", json!("applied")).unwrap();

        assert_eq!(manager.flush_now().unwrap(), 1);
        assert_eq!(manager.queued_count(), 0);
        assert_eq!(store.get(), json!("applied"));
        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Completed));
    }

    #[test]
    fn test_invalid_transaction_and_unknown_store() {
        let manager: BatchManager = BatchManager::default();
        let (_store, _) = counted_store(&manager, "doc");

        assert!(matches!(
            manager.add_update(9_999_999, "doc", json!(1)),
            Err(BatchError::InvalidTransaction(9_999_999))
        ));

        let tx = manager.start_transaction(TransactionOptions::default());
        assert!(matches!(
            manager.add_update(tx, "missing", json!(1)),
            Err(BatchError::UnknownStore(id)) if id == "missing"
        ));

        manager.commit_transaction(tx).unwrap();
        assert!(matches!(
            manager.add_update(tx, "doc", json!(1)),
            Err(BatchError::InvalidTransaction(_))
        ));
        assert!(matches!(
            manager.commit_transaction(tx),
            Err(BatchError::InvalidTransaction(_))
        ));

        assert!(manager.unregister_store("doc"));
        let tx = manager.start_transaction(TransactionOptions::default());
        assert!(matches!(
            manager.add_update(tx, "doc", json!(1)),
            Err(BatchError::UnknownStore(_))
        ));
    }

    #[test]
    fn test_commit_bypasses_debounce() {
        let manager: BatchManager = BatchManager::default();
        let (store, _) = counted_store(&manager, "doc");

        let queued = manager.start_transaction(TransactionOptions::default());
        manager.add_update(queued, "doc", json!("queued")).unwrap();
        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "doc", json!("committed")).unwrap();

        manager.commit_transaction(tx).unwrap();
        assert_eq!(store.get(), json!("committed"));
        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Completed));
        assert_eq!(manager.transaction_status(queued), Some(TransactionStatus::Pending));
        assert_eq!(manager.queued_count(), 1);
    }

    #[test]
    fn test_without_runtime_updates_wait_for_flush() {
        let manager: BatchManager = BatchManager::default();
        let (store, _) = counted_store(&manager, "doc");

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "doc", json!(7)).unwrap();
        assert_eq!(store.get(), Value::Null);

        assert_eq!(manager.flush_now().unwrap(), 1);
        assert_eq!(store.get(), json!(7));
        assert_eq!(manager.flush_now().unwrap(), 0);
    }

    #[test]
    fn test_store_unregistered_before_flush_is_skipped() {
        let manager: BatchManager = BatchManager::default();
        let (gone, _) = counted_store(&manager, "gone");

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "gone", json!(1)).unwrap();
        manager.unregister_store("gone");

        assert_eq!(manager.flush_now().unwrap(), 1);
        assert_eq!(gone.get(), Value::Null);
        assert_eq!(manager.transaction_status(tx), Some(TransactionStatus::Completed));
    }

    #[test]
    fn test_transaction_ids_are_monotonic() {
        let manager: BatchManager = BatchManager::default();
        let other: BatchManager = BatchManager::default();
        let a = manager.start_transaction(TransactionOptions::default());
        let b = other.start_transaction(TransactionOptions::default());
        let c = manager.start_transaction(TransactionOptions::default());
        assert!(a < b && b < c);
        assert_eq!(manager.pending_count(), 2);
    }

    #[test]
    fn test_finished_transactions_are_pruned() {
        let manager: BatchManager =
            BatchManager::new(BatchConfig::new().with_retain_finished(2));
        let (_store, _) = counted_store(&manager, "doc");

        let ids: Vec<_> = (0..3)
            .map(|n| {
                let tx = manager.start_transaction(TransactionOptions::default());
                manager.add_update(tx, "doc", json!(n)).unwrap();
                manager.commit_transaction(tx).unwrap();
                tx
            })
            .collect();

        assert_eq!(manager.transaction_status(ids[0]), None);
        assert_eq!(manager.transaction_status(ids[2]), Some(TransactionStatus::Completed));
        assert_eq!(
            manager.transaction(ids[2]).map(|tx| tx.changes["doc"].clone()),
            Some(json!(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_pending_flush() {
        let manager = BatchManager::new(BatchConfig::default());
        let (store, _) = counted_store(&manager, "doc");

        let tx = manager.start_transaction(TransactionOptions::default());
        manager.add_update(tx, "doc", json!(1)).unwrap();
        manager.destroy();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get(), Value::Null);
        assert_eq!(manager.transaction_status(tx), None);
        assert!(matches!(
            manager.add_update(tx, "doc", json!(2)),
            Err(BatchError::InvalidTransaction(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("EXHIBIT_BATCH_DEBOUNCE_MS", "40");
        std::env::set_var("EXHIBIT_BATCH_MAX_SIZE", "0");

        let config = BatchConfig::from_env().unwrap();
        assert_eq!(config.debounce, Duration::from_millis(40));
        assert_eq!(config.max_batch_size, 1);
        assert_eq!(config.retain_finished, 256);

        std::env::remove_var("EXHIBIT_BATCH_DEBOUNCE_MS");
        std::env::remove_var("EXHIBIT_BATCH_MAX_SIZE");
    }
}
