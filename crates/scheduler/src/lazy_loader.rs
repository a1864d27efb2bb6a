//! Priority-queued, concurrency-limited lazy loader
//!
//! Requests are queued per URL and dispatched by a scheduler task that runs
//! every tick. Each tick scans the queue in three passes (high, medium, low)
//! and starts loads until the concurrency cap is reached. Bodies are
//! streamed, with progress published to a per-URL [`LoadingState`] that UI
//! code can watch. Finished bodies are cached by URL; a cache hit skips the
//! queue entirely.
//!
//! Priority is honoured at dispatch time only. Once loads are running they
//! complete in whatever order the network delivers them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use exhibit_cache::{env_value, ConfigError, LoadError, LoadResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::fetch::Fetcher;
use crate::priority::{LoadOptions, LoadPriority};
use crate::viewport::ViewportConfig;

/// Loaded body, shared between the cache and every caller
pub type LoadedData = Arc<Vec<u8>>;

/// Configuration for the lazy loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyLoaderConfig {
    /// Maximum number of loads running at once
    pub max_concurrent_loads: usize,

    /// Period of the scheduler task
    pub tick_interval: Duration,
}

impl Default for LazyLoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 3,
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl LazyLoaderConfig {
    /// Create a new loader configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency cap (at least one)
    pub fn with_max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = max.max(1);
        self
    }

    /// Set the scheduler period
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// - `EXHIBIT_MAX_CONCURRENT_LOADS` (default: 3)
    /// - `EXHIBIT_LOADER_TICK_MS` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(max) = env_value::<usize>("EXHIBIT_MAX_CONCURRENT_LOADS")? {
            config = config.with_max_concurrent_loads(max);
        }
        if let Some(ms) = env_value::<u64>("EXHIBIT_LOADER_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Lifecycle of a URL's load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

/// Observable state of one URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadingState {
    pub status: LoadStatus,
    /// Fraction of the body received, 0.0 when the length is unknown
    pub progress: f64,
    pub error: Option<String>,
}

impl LoadingState {
    fn loading(progress: f64) -> Self {
        Self {
            status: LoadStatus::Loading,
            progress,
            error: None,
        }
    }

    fn loaded() -> Self {
        Self {
            status: LoadStatus::Loaded,
            progress: 1.0,
            error: None,
        }
    }

    fn failed(error: &LoadError) -> Self {
        Self {
            status: LoadStatus::Error,
            progress: 0.0,
            error: Some(error.to_string()),
        }
    }
}

/// Loader statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Total `load` calls
    pub requested: u64,

    /// Calls answered from the cache
    pub cache_hits: u64,

    /// Loads that finished successfully
    pub completed: u64,

    /// Loads that failed
    pub failed: u64,

    /// Requests waiting for a slot
    pub queued: usize,

    /// Loads currently running
    pub active: usize,
}

type Resolver = oneshot::Sender<LoadResult<LoadedData>>;

/// A queued request waiting for a free slot
struct LoadTransaction {
    url: String,
    options: LoadOptions,
    resolver: Resolver,
}

/// A dispatched request; the resolver can still be replaced
struct ActiveLoad {
    options: LoadOptions,
    resolver: Resolver,
}

struct CachedResource {
    data: LoadedData,
    timestamp: Instant,
    size: usize,
}

#[derive(Default)]
struct LoaderState {
    /// Queued requests in arrival order, at most one per URL
    queue: Vec<LoadTransaction>,
    active: HashMap<String, ActiveLoad>,
    cache: HashMap<String, CachedResource>,
    states: HashMap<String, watch::Sender<LoadingState>>,
    viewport: Option<ViewportConfig>,
    stats: LoaderStats,
    destroyed: bool,
}

impl LoaderState {
    fn state_sender(&mut self, url: &str) -> &watch::Sender<LoadingState> {
        self.states
            .entry(url.to_string())
            .or_insert_with(|| watch::channel(LoadingState::default()).0)
    }

    fn publish(&self, url: &str, state: LoadingState) {
        if let Some(sender) = self.states.get(url) {
            sender.send_replace(state);
        }
    }
}

/// Lazy loader with priority scheduling and a URL-keyed cache
///
/// # Example
///
/// ```no_run
/// use exhibit_scheduler::{HttpFetcher, LazyLoader, LazyLoaderConfig, LoadOptions, LoadPriority};
///
/// # async fn run() -> Result<(), exhibit_cache::LoadError> {
/// let loader = LazyLoader::new(HttpFetcher::new(), LazyLoaderConfig::default());
///
/// let mut progress = loader.loading_state("https://example.test/EXH0001.png");
/// let bytes = loader
///     .load("https://example.test/EXH0001.png", LoadOptions::with_priority(LoadPriority::High))
///     .await?;
/// println!("{} bytes, status {:?}", bytes.len(), progress.borrow_and_update().status);
///
/// loader.destroy();
/// # Ok(())
/// # }
/// ```
pub struct LazyLoader {
    fetcher: Arc<dyn Fetcher>,
    config: LazyLoaderConfig,
    state: Mutex<LoaderState>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl LazyLoader {
    /// Create a loader and start its scheduler task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(fetcher: impl Fetcher + 'static, config: LazyLoaderConfig) -> Arc<Self> {
        let loader = Arc::new(Self {
            fetcher: Arc::new(fetcher),
            config,
            state: Mutex::new(LoaderState::default()),
            scheduler: Mutex::new(None),
        });
        let handle = spawn_scheduler(Arc::downgrade(&loader), loader.config.tick_interval);
        *loader.lock_scheduler() = Some(handle);
        loader
    }

    /// Load `url`, answering from the cache when possible
    ///
    /// A repeated request for a URL that is already queued or running shares
    /// that fetch: priority is raised if the new request is more urgent, and
    /// the new caller takes over the result. The earlier caller receives
    /// [`LoadError::Superseded`].
    pub async fn load(&self, url: &str, options: LoadOptions) -> LoadResult<LoadedData> {
        let receiver = {
            let mut state = self.lock_state();
            if state.destroyed {
                return Err(LoadError::Cancelled {
                    url: url.to_string(),
                });
            }
            state.stats.requested += 1;
            state.state_sender(url);

            if let Some(entry) = state.cache.get_mut(url) {
                entry.timestamp = Instant::now();
                let data = Arc::clone(&entry.data);
                state.stats.cache_hits += 1;
                return Ok(data);
            }

            let (resolver, receiver) = oneshot::channel();
            let superseded = if let Some(queued) =
                state.queue.iter_mut().find(|queued| queued.url == url)
            {
                queued.options.merge(options);
                Some(std::mem::replace(&mut queued.resolver, resolver))
            } else if let Some(active) = state.active.get_mut(url) {
                active.options.merge(options);
                Some(std::mem::replace(&mut active.resolver, resolver))
            } else {
                state.queue.push(LoadTransaction {
                    url: url.to_string(),
                    options,
                    resolver,
                });
                None
            };

            if let Some(previous) = superseded {
                let _ = previous.send(Err(LoadError::Superseded {
                    url: url.to_string(),
                }));
            }
            receiver
        };

        receiver.await.unwrap_or_else(|_| {
            Err(LoadError::Cancelled {
                url: url.to_string(),
            })
        })
    }

    /// Watch the loading state of `url`, creating an idle state if needed
    pub fn loading_state(&self, url: &str) -> watch::Receiver<LoadingState> {
        self.lock_state().state_sender(url).subscribe()
    }

    /// Record the visible region for prefetch decisions
    pub fn update_viewport(&self, viewport: ViewportConfig) {
        self.lock_state().viewport = Some(viewport);
    }

    /// The last recorded viewport
    pub fn viewport(&self) -> Option<ViewportConfig> {
        self.lock_state().viewport.clone()
    }

    /// Priority for the image at `image_index` relative to the viewport
    ///
    /// Without a recorded viewport every image is `Medium`.
    pub fn priority_for_image(&self, image_index: usize) -> LoadPriority {
        self.lock_state()
            .viewport
            .as_ref()
            .map_or(LoadPriority::Medium, |viewport| viewport.priority_for(image_index))
    }

    /// Drop cached bodies, or only those not touched within `older_than`
    ///
    /// Returns the number of dropped entries.
    pub fn clear_cache(&self, older_than: Option<Duration>) -> usize {
        let mut state = self.lock_state();
        let before = state.cache.len();
        match older_than {
            Some(max_age) => state
                .cache
                .retain(|_, entry| entry.timestamp.elapsed() <= max_age),
            None => state.cache.clear(),
        }
        before - state.cache.len()
    }

    /// Check whether `url` has a cached body
    pub fn is_cached(&self, url: &str) -> bool {
        self.lock_state().cache.contains_key(url)
    }

    /// Number of cached bodies
    pub fn cache_len(&self) -> usize {
        self.lock_state().cache.len()
    }

    /// Total bytes held by the cache
    pub fn cache_size_bytes(&self) -> usize {
        self.lock_state().cache.values().map(|entry| entry.size).sum()
    }

    /// Get loader statistics
    pub fn stats(&self) -> LoaderStats {
        let state = self.lock_state();
        LoaderStats {
            queued: state.queue.len(),
            active: state.active.len(),
            ..state.stats
        }
    }

    /// Stop scheduling and drop all state
    ///
    /// Waiting callers receive [`LoadError::Cancelled`]. Fetches already
    /// handed to the network run to completion but their results are
    /// discarded.
    pub fn destroy(&self) {
        if let Some(handle) = self.lock_scheduler().take() {
            handle.abort();
        }

        let (queued, active) = {
            let mut state = self.lock_state();
            state.destroyed = true;
            state.cache.clear();
            state.states.clear();
            state.viewport = None;
            let queued = std::mem::take(&mut state.queue);
            let active: Vec<(String, ActiveLoad)> = state.active.drain().collect();
            (queued, active)
        };

        let pending = queued
            .into_iter()
            .map(|queued| (queued.url, queued.resolver))
            .chain(active.into_iter().map(|(url, load)| (url, load.resolver)));
        for (url, resolver) in pending {
            let _ = resolver.send(Err(LoadError::Cancelled { url }));
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &LazyLoaderConfig {
        &self.config
    }

    /// Move queued requests into free slots, most urgent first
    fn process_queue(self: &Arc<Self>) {
        let dispatched = {
            let mut state = self.lock_state();
            let mut dispatched = Vec::new();
            let slots = self.config.max_concurrent_loads.max(1);
            for priority in LoadPriority::DISPATCH_ORDER {
                let mut index = 0;
                while index < state.queue.len() && state.active.len() < slots {
                    if state.queue[index].options.priority != priority {
                        index += 1;
                        continue;
                    }
                    let queued = state.queue.remove(index);
                    state.publish(&queued.url, LoadingState::loading(0.0));
                    dispatched.push(queued.url.clone());
                    state.active.insert(
                        queued.url,
                        ActiveLoad {
                            options: queued.options,
                            resolver: queued.resolver,
                        },
                    );
                }
            }
            dispatched
        };

        for url in dispatched {
            debug!(%url, "dispatching load");
            let loader = Arc::clone(self);
            tokio::spawn(async move { loader.run_load(url).await });
        }
    }

    async fn run_load(&self, url: String) {
        let result = self.fetch_body(&url).await;

        let resolver = {
            let mut state = self.lock_state();
            let active = state.active.remove(&url);
            if state.destroyed {
                return;
            }
            match &result {
                Ok(data) => {
                    state.cache.insert(
                        url.clone(),
                        CachedResource {
                            data: Arc::clone(data),
                            timestamp: Instant::now(),
                            size: data.len(),
                        },
                    );
                    state.stats.completed += 1;
                    state.publish(&url, LoadingState::loaded());
                }
                Err(err) => {
                    warn!(%url, error = %err, "load failed");
                    state.stats.failed += 1;
                    state.publish(&url, LoadingState::failed(err));
                }
            }
            active.map(|active| active.resolver)
        };

        if let Some(resolver) = resolver {
            let _ = resolver.send(result);
        }
    }

    async fn fetch_body(&self, url: &str) -> LoadResult<LoadedData> {
        let response = self.fetcher.fetch(url).await?;
        let total = response.content_length.filter(|length| *length > 0);
        let mut data = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
            let progress = total.map_or(0.0, |total| (data.len() as f64 / total as f64).min(1.0));
            self.lock_state().publish(url, LoadingState::loading(progress));
        }

        Ok(Arc::new(data))
    }

    fn lock_state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LazyLoader {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_scheduler().take() {
            handle.abort();
        }
    }
}

fn spawn_scheduler(loader: Weak<LazyLoader>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match loader.upgrade() {
                Some(loader) => loader.process_queue(),
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use serial_test::serial;
    use std::collections::HashSet;

    /// In-memory fetcher recording call order
    #[derive(Default)]
    struct FakeFetcher {
        calls: Mutex<Vec<String>>,
        failing: HashSet<String>,
        /// URLs whose body never finishes, to hold a slot open
        stalled: HashSet<String>,
        known_length: bool,
    }

    impl FakeFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                known_length: true,
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for Arc<FakeFetcher> {
        async fn fetch(&self, url: &str) -> LoadResult<FetchResponse> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.failing.contains(url) {
                return Err(LoadError::Status {
                    url: url.to_string(),
                    status: 500,
                });
            }
            if self.stalled.contains(url) {
                let body: BoxStream<'static, LoadResult<Vec<u8>>> =
                    futures::stream::pending().boxed();
                return Ok(FetchResponse {
                    content_length: None,
                    body,
                });
            }
            let chunks = vec![url.as_bytes().to_vec(), b"|body".to_vec()];
            let length = chunks.iter().map(Vec::len).sum::<usize>() as u64;
            Ok(FetchResponse::from_chunks(
                self.known_length.then_some(length),
                chunks,
            ))
        }
    }

    fn loader_with(fetcher: &Arc<FakeFetcher>, max: usize) -> Arc<LazyLoader> {
        LazyLoader::new(
            Arc::clone(fetcher),
            LazyLoaderConfig::new().with_max_concurrent_loads(max),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_streams_and_caches() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 3);

        let data = loader.load("a", LoadOptions::default()).await.unwrap();
        assert_eq!(data.as_slice(), b"a|body");
        assert!(loader.is_cached("a"));
        assert_eq!(loader.cache_size_bytes(), 6);

        let state = loader.loading_state("a").borrow().clone();
        assert_eq!(state.status, LoadStatus::Loaded);
        assert_eq!(state.progress, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_concurrency_config_still_dispatches() {
        let fetcher = FakeFetcher::new();
        let config = LazyLoaderConfig {
            max_concurrent_loads: 0,
            ..LazyLoaderConfig::default()
        };
        let loader = LazyLoader::new(Arc::clone(&fetcher), config);

        let data = loader.load("a", LoadOptions::default()).await.unwrap();
        assert_eq!(data.as_slice(), b"a|body");
        assert_eq!(fetcher.calls(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_fetch() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 3);

        let first = loader.load("a", LoadOptions::default()).await.unwrap();
        let second = loader.load("a", LoadOptions::default()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls(), vec!["a".to_string()]);
        let stats = loader.stats();
        assert_eq!(stats.requested, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_follows_priority_not_submission_order() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 1);

        let (low, medium, high) = tokio::join!(
            loader.load("low", LoadOptions::with_priority(LoadPriority::Low)),
            loader.load("medium", LoadOptions::with_priority(LoadPriority::Medium)),
            loader.load("high", LoadOptions::with_priority(LoadPriority::High)),
        );

        assert!(low.is_ok() && medium.is_ok() && high.is_ok());
        assert_eq!(fetcher.calls(), vec!["high", "medium", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_respected() {
        let fetcher = Arc::new(FakeFetcher {
            stalled: ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect(),
            known_length: true,
            ..FakeFetcher::default()
        });
        let loader = loader_with(&fetcher, 3);

        for url in ["s1", "s2", "s3", "s4"] {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move { loader.load(url, LoadOptions::default()).await });
        }
        tokio::time::sleep(Duration::from_millis(350)).await;

        let stats = loader.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.queued, 1);
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_request_upgrades_priority_and_takes_result() {
        let fetcher = Arc::new(FakeFetcher {
            stalled: ["blocker"].iter().map(|s| s.to_string()).collect(),
            known_length: true,
            ..FakeFetcher::default()
        });
        let loader = loader_with(&fetcher, 1);

        // Occupy the only slot so the next requests stay queued
        let blocker = Arc::clone(&loader);
        tokio::spawn(async move { blocker.load("blocker", LoadOptions::default()).await });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(loader.stats().active, 1);

        let first = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move {
                loader
                    .load("page", LoadOptions::with_priority(LoadPriority::Low))
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move {
                loader
                    .load("page", LoadOptions::with_priority(LoadPriority::High))
                    .await
            })
        };
        tokio::task::yield_now().await;

        {
            let state = loader.lock_state();
            assert_eq!(state.queue.len(), 1);
            assert_eq!(state.queue[0].options.priority, LoadPriority::High);
        }

        // A later low-priority request never downgrades
        let third = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move {
                loader
                    .load("page", LoadOptions::with_priority(LoadPriority::Low))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(
            loader.lock_state().queue[0].options.priority,
            LoadPriority::High
        );

        assert_eq!(
            first.await.unwrap(),
            Err(LoadError::Superseded {
                url: "page".to_string()
            })
        );
        assert!(matches!(
            second.await.unwrap(),
            Err(LoadError::Superseded { .. })
        ));

        loader.destroy();
        assert!(matches!(
            third.await.unwrap(),
            Err(LoadError::Cancelled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_mirrored_into_state() {
        let fetcher = Arc::new(FakeFetcher {
            failing: ["broken"].iter().map(|s| s.to_string()).collect(),
            known_length: true,
            ..FakeFetcher::default()
        });
        let loader = loader_with(&fetcher, 3);

        let result = loader.load("broken", LoadOptions::default()).await;
        assert!(matches!(result, Err(LoadError::Status { status: 500, .. })));

        let state = loader.loading_state("broken").borrow().clone();
        assert_eq!(state.status, LoadStatus::Error);
        assert!(state.error.unwrap().contains("500"));
        assert!(!loader.is_cached("broken"));
        assert_eq!(loader.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_without_content_length_stays_zero() {
        let fetcher = Arc::new(FakeFetcher::default());
        let loader = loader_with(&fetcher, 3);
        let mut state = loader.loading_state("x");
        assert_eq!(state.borrow_and_update().status, LoadStatus::Idle);

        let pending = {
            let loader = Arc::clone(&loader);
            tokio::spawn(async move { loader.load("x", LoadOptions::default()).await })
        };

        let mut seen = Vec::new();
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            let done = current.status == LoadStatus::Loaded;
            seen.push(current);
            if done {
                break;
            }
        }
        pending.await.unwrap().unwrap();

        assert!(seen
            .iter()
            .filter(|s| s.status == LoadStatus::Loading)
            .all(|s| s.progress == 0.0));
        assert_eq!(seen.last().map(|s| s.progress), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_by_age() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 3);

        loader.load("old", LoadOptions::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        loader.load("new", LoadOptions::default()).await.unwrap();

        assert_eq!(loader.clear_cache(Some(Duration::from_secs(30))), 1);
        assert!(!loader.is_cached("old"));
        assert!(loader.is_cached("new"));

        assert_eq!(loader.clear_cache(None), 1);
        assert_eq!(loader.cache_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_refreshes_timestamp() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 3);

        loader.load("a", LoadOptions::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        loader.load("a", LoadOptions::default()).await.unwrap();

        assert_eq!(loader.clear_cache(Some(Duration::from_secs(30))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_drives_image_priority() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 3);
        assert_eq!(loader.priority_for_image(3), LoadPriority::Medium);

        loader.update_viewport(ViewportConfig::new(3, 0.0, 0.0, 800.0, 600.0, 1.0));
        assert_eq!(loader.viewport().map(|v| v.image_index), Some(3));
        assert_eq!(loader.priority_for_image(3), LoadPriority::High);
        assert_eq!(loader.priority_for_image(9), LoadPriority::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_rejects_new_loads_and_clears_state() {
        let fetcher = FakeFetcher::new();
        let loader = loader_with(&fetcher, 3);
        loader.load("a", LoadOptions::default()).await.unwrap();

        loader.destroy();
        assert_eq!(loader.cache_len(), 0);
        assert!(matches!(
            loader.load("a", LoadOptions::default()).await,
            Err(LoadError::Cancelled { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("EXHIBIT_MAX_CONCURRENT_LOADS", "0");
        std::env::set_var("EXHIBIT_LOADER_TICK_MS", "25");

        let config = LazyLoaderConfig::from_env().unwrap();
        assert_eq!(config.max_concurrent_loads, 1);
        assert_eq!(config.tick_interval, Duration::from_millis(25));

        std::env::set_var("EXHIBIT_MAX_CONCURRENT_LOADS", "many");
        assert!(matches!(
            LazyLoaderConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        std::env::remove_var("EXHIBIT_MAX_CONCURRENT_LOADS");
        std::env::remove_var("EXHIBIT_LOADER_TICK_MS");
        assert_eq!(LazyLoaderConfig::from_env().unwrap(), LazyLoaderConfig::default());
    }
}
