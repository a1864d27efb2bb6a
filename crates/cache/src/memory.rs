//! Object pools and resource cache with memory-pressure maintenance
//!
//! The memory manager recycles short-lived objects (points, annotation
//! shells, layer buffers) through per-type pools and keeps arbitrary
//! resources in a keyed cache. Two background tasks keep both bounded:
//!
//! - a cache sweep drops resources that were not read for twice the sweep
//!   interval
//! - a heap check sheds memory when heap utilization crosses the threshold,
//!   sweeping the cache at once and shrinking every pool
//!
//! Pools are keyed by the Rust type of their objects, so an object can only
//! ever be handed back out as the type it was released as.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::MemoryManagerConfig;
use crate::heap::{HeapProbe, HeapStats, NoHeapProbe};

/// Free list of recycled objects of one type
#[derive(Debug)]
pub struct ObjectPool<T> {
    free: Vec<T>,
    max_size: usize,
}

impl<T> ObjectPool<T> {
    /// Create an empty pool retaining at most `max_size` objects
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Vec::new(),
            max_size,
        }
    }

    /// Take a free object, or build one with `factory` if none is free
    pub fn acquire<F: FnOnce() -> T>(&mut self, factory: F) -> T {
        self.free.pop().unwrap_or_else(factory)
    }

    /// Return an object to the pool
    ///
    /// Returns `false` (and drops the object) if the pool is full.
    pub fn release(&mut self, object: T) -> bool {
        if self.free.len() < self.max_size {
            self.free.push(object);
            true
        } else {
            false
        }
    }

    /// Number of free objects
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Check if no objects are free
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Truncate the free list to `len` objects
    pub fn shrink_to(&mut self, len: usize) {
        self.free.truncate(len);
    }

    /// Drop every free object
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

/// Type-erased view of an [`ObjectPool`] for maintenance passes
trait ErasedPool: Send {
    fn len(&self) -> usize;
    fn shrink(&mut self, growth_factor: f64);
    fn clear(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> ErasedPool for ObjectPool<T> {
    fn len(&self) -> usize {
        self.free.len()
    }

    fn shrink(&mut self, growth_factor: f64) {
        let target = (self.free.len() as f64 / growth_factor).floor() as usize;
        self.shrink_to(target);
    }

    fn clear(&mut self) {
        self.free.clear();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct ResourceEntry {
    data: Arc<dyn Any + Send + Sync>,
    last_accessed: Instant,
}

/// Keyed cache of shared resources with access-time tracking
#[derive(Default)]
pub struct ResourceCache {
    entries: HashMap<String, ResourceEntry>,
}

impl ResourceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `key`, replacing any previous entry
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, data: T) {
        self.insert_shared(key, Arc::new(data));
    }

    /// Store an already shared value under `key`
    pub fn insert_shared<T: Any + Send + Sync>(&mut self, key: impl Into<String>, data: Arc<T>) {
        self.entries.insert(
            key.into(),
            ResourceEntry {
                data,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Read the value under `key` as `T`, refreshing its access time
    ///
    /// A value stored as a different type reads as a miss and is not touched.
    pub fn get<T: Any + Send + Sync>(&mut self, key: &str) -> Option<Arc<T>> {
        let entry = self.entries.get_mut(key)?;
        let data = Arc::clone(&entry.data).downcast::<T>().ok()?;
        entry.last_accessed = Instant::now();
        Some(data)
    }

    /// Remove entries whose key matches `pattern`, returning how many were removed
    pub fn remove_matching(&mut self, pattern: &Regex) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.is_match(key));
        before - self.entries.len()
    }

    /// Remove entries not accessed within `max_idle`, returning how many were removed
    pub fn purge_idle(&mut self, max_idle: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.last_accessed.elapsed() <= max_idle);
        before - self.entries.len()
    }

    /// Check whether `key` is cached
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached resource
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Memory figures for a performance monitor
///
/// Heap fields are zero when the host offers no heap introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MemoryStats {
    pub used_heap_size: u64,
    pub total_heap_size: u64,
    pub heap_size_limit: u64,
    /// Free objects held across all pools
    pub pooled_objects: usize,
    /// Entries in the resource cache
    pub cached_resources: usize,
}

struct MemoryState {
    pools: HashMap<TypeId, Box<dyn ErasedPool>>,
    cache: ResourceCache,
}

/// Object pools plus a resource cache, with optional background maintenance
///
/// # Example
///
/// ```
/// use exhibit_cache::{MemoryManager, MemoryManagerConfig, NoHeapProbe};
///
/// #[derive(Default)]
/// struct Point { x: f32, y: f32 }
///
/// let manager = MemoryManager::new(MemoryManagerConfig::new().with_max_size(10), NoHeapProbe);
///
/// let point: Point = manager.acquire(Point::default);
/// manager.release(point);
/// assert_eq!(manager.pool_len::<Point>(), 1);
/// ```
pub struct MemoryManager {
    config: MemoryManagerConfig,
    probe: Box<dyn HeapProbe>,
    state: Mutex<MemoryState>,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryManager {
    /// Create a manager without background maintenance
    ///
    /// Sweeps and pressure checks can still be run by calling
    /// [`sweep_cache`](Self::sweep_cache) and
    /// [`check_memory_pressure`](Self::check_memory_pressure).
    pub fn new(config: MemoryManagerConfig, probe: impl HeapProbe + 'static) -> Self {
        Self {
            config,
            probe: Box::new(probe),
            state: Mutex::new(MemoryState {
                pools: HashMap::new(),
                cache: ResourceCache::new(),
            }),
            maintenance: Mutex::new(Vec::new()),
        }
    }

    /// Create a manager with default configuration and no heap probe
    pub fn with_default_config() -> Self {
        Self::new(MemoryManagerConfig::default(), NoHeapProbe)
    }

    /// Create a manager and start its sweep and pressure-check tasks
    ///
    /// Must be called from within a tokio runtime. The tasks hold only a weak
    /// reference and stop on their own once the manager is dropped;
    /// [`destroy`](Self::destroy) stops them immediately.
    pub fn start(config: MemoryManagerConfig, probe: impl HeapProbe + 'static) -> Arc<Self> {
        let manager = Arc::new(Self::new(config, probe));

        let sweep = spawn_periodic(
            Arc::downgrade(&manager),
            manager.config.cache_cleanup_interval,
            |manager| {
                manager.sweep_cache();
            },
        );
        let pressure = spawn_periodic(
            Arc::downgrade(&manager),
            manager.config.memory_check_interval,
            |manager| {
                manager.check_memory_pressure();
            },
        );

        manager.lock_maintenance().extend([sweep, pressure]);
        manager
    }

    /// Take a pooled `T`, or build one with `factory` if the pool is empty
    ///
    /// The caller owns the object until it is released.
    pub fn acquire<T, F>(&self, factory: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        let pooled = {
            let mut state = self.lock_state();
            state
                .pools
                .get_mut(&TypeId::of::<T>())
                .and_then(|pool| pool.as_any_mut().downcast_mut::<ObjectPool<T>>())
                .and_then(|pool| pool.free.pop())
        };
        pooled.unwrap_or_else(factory)
    }

    /// Return an object to its pool
    ///
    /// Returns `false` if the pool was full and the object was dropped.
    /// The caller must not keep using the object after releasing it.
    pub fn release<T: Send + 'static>(&self, object: T) -> bool {
        let max_size = self.config.max_size;
        let mut state = self.lock_state();
        let pool = state
            .pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ObjectPool::<T>::new(max_size)));
        match pool.as_any_mut().downcast_mut::<ObjectPool<T>>() {
            Some(pool) => pool.release(object),
            None => false,
        }
    }

    /// Number of free objects pooled for `T`
    pub fn pool_len<T: Send + 'static>(&self) -> usize {
        self.lock_state()
            .pools
            .get(&TypeId::of::<T>())
            .map_or(0, |pool| pool.len())
    }

    /// Cache `data` under `key`
    pub fn cache_resource<T: Any + Send + Sync>(&self, key: impl Into<String>, data: T) {
        self.lock_state().cache.insert(key, data);
    }

    /// Read the resource under `key` as `T`, refreshing its access time
    pub fn get_cached_resource<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.lock_state().cache.get(key)
    }

    /// Remove cached resources whose key matches `pattern`, or all of them
    ///
    /// Returns the number of removed entries.
    pub fn clear_cache(&self, pattern: Option<&Regex>) -> usize {
        let mut state = self.lock_state();
        match pattern {
            Some(pattern) => state.cache.remove_matching(pattern),
            None => {
                let removed = state.cache.len();
                state.cache.clear();
                removed
            }
        }
    }

    /// Purge resources not accessed within twice the cleanup interval
    ///
    /// Returns the number of purged entries.
    pub fn sweep_cache(&self) -> usize {
        let removed = self
            .lock_state()
            .cache
            .purge_idle(self.config.resource_idle_limit());
        if removed > 0 {
            debug!(removed, "swept idle cached resources");
        }
        removed
    }

    /// Shed memory if heap utilization is above the threshold
    ///
    /// Under pressure the cache is swept and every pool shrinks to
    /// `floor(len / growth_factor)`. Returns whether pressure was detected.
    pub fn check_memory_pressure(&self) -> bool {
        let heap = self.heap_stats();
        if heap.total_heap_size == 0 || heap.utilization() <= self.config.memory_threshold {
            return false;
        }

        warn!(
            used = heap.used_heap_size,
            total = heap.total_heap_size,
            "heap usage above threshold, shrinking pools"
        );
        self.sweep_cache();

        let growth_factor = self.config.growth_factor.max(1.0);
        let mut state = self.lock_state();
        for pool in state.pools.values_mut() {
            pool.shrink(growth_factor);
        }
        true
    }

    /// Heap figures from the probe, zeros if unavailable
    pub fn heap_stats(&self) -> HeapStats {
        self.probe.heap_stats().unwrap_or_default()
    }

    /// Current heap, pool and cache figures
    pub fn memory_stats(&self) -> MemoryStats {
        let heap = self.heap_stats();
        let state = self.lock_state();
        MemoryStats {
            used_heap_size: heap.used_heap_size,
            total_heap_size: heap.total_heap_size,
            heap_size_limit: heap.heap_size_limit,
            pooled_objects: state.pools.values().map(|pool| pool.len()).sum(),
            cached_resources: state.cache.len(),
        }
    }

    /// Whether background maintenance tasks are running
    pub fn is_maintained(&self) -> bool {
        self.lock_maintenance()
            .iter()
            .any(|handle| !handle.is_finished())
    }

    /// Stop maintenance and drop every pooled object and cached resource
    pub fn destroy(&self) {
        for handle in self.lock_maintenance().drain(..) {
            handle.abort();
        }
        let mut state = self.lock_state();
        for pool in state.pools.values_mut() {
            pool.clear();
        }
        state.pools.clear();
        state.cache.clear();
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryManagerConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_maintenance(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        for handle in self.lock_maintenance().drain(..) {
            handle.abort();
        }
    }
}

/// Run `tick` every `period` until the manager goes away
fn spawn_periodic<F>(manager: Weak<MemoryManager>, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(&MemoryManager) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match manager.upgrade() {
                Some(manager) => tick(&manager),
                None => break,
            }
        }
    })
}
