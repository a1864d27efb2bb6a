//! Bounded image cache with lazy staleness checks
//!
//! Decoded images are cached per path. A cached image younger than the
//! configured timeout is returned without touching the source; an older one
//! is reloaded on its next request. When an insert pushes the cache past its
//! capacity, the entry with the oldest timestamp is evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use image::RgbaImage;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ImageLoaderConfig;
use crate::error::{LoadError, LoadResult};

/// Shared handle to a decoded RGBA image
pub type ImageHandle = Arc<RgbaImage>;

/// Source of decoded images, keyed by path
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Load and decode the image at `path`
    async fn load(&self, path: &str) -> LoadResult<ImageHandle>;
}

/// Image source reading files from disk and decoding them with `image`
///
/// Relative paths are resolved against an optional root directory.
#[derive(Debug, Clone, Default)]
pub struct FileImageSource {
    root: Option<PathBuf>,
}

impl FileImageSource {
    /// Create a source resolving paths as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source resolving relative paths against `root`
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    async fn load(&self, path: &str) -> LoadResult<ImageHandle> {
        let bytes = tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| LoadError::Io {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let decode_error = |message: String| LoadError::Decode {
            path: path.to_string(),
            message,
        };

        // Decoding is CPU-bound
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|image| image.to_rgba8())
        })
        .await
        .map_err(|e| decode_error(e.to_string()))?
        .map_err(|e| decode_error(e.to_string()))?;

        Ok(Arc::new(decoded))
    }
}

/// A cached image and the time it was loaded
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub image: ImageHandle,
    pub timestamp: Instant,
}

/// Statistics about image cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImageCacheStats {
    /// Number of images currently cached
    pub entries: usize,

    /// Requests answered from the cache
    pub hits: u64,

    /// Requests that went to the source (absent or stale)
    pub misses: u64,

    /// Entries dropped to respect the capacity
    pub evictions: u64,

    /// Source loads that failed
    pub failures: u64,
}

impl ImageCacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: ImageCacheStats,
}

impl CacheState {
    /// Remove the entry with the oldest timestamp
    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.timestamp)
            .map(|(path, _)| path.clone())?;
        self.entries.remove(&oldest);
        self.stats.evictions += 1;
        Some(oldest)
    }
}

/// Image loader with a bounded, time-limited cache
///
/// # Example
///
/// ```no_run
/// use exhibit_cache::{FileImageSource, ImageLoader, ImageLoaderConfig};
///
/// # async fn run() -> Result<(), exhibit_cache::LoadError> {
/// let loader = ImageLoader::new(
///     FileImageSource::with_root("/srv/exhibits"),
///     ImageLoaderConfig::new().with_cache_size(10),
/// );
///
/// let image = loader.load_image("EXH0001.png").await?;
/// println!("{}x{}", image.width(), image.height());
/// # Ok(())
/// # }
/// ```
pub struct ImageLoader<S> {
    source: S,
    config: ImageLoaderConfig,
    state: Mutex<CacheState>,
}

impl<S: ImageSource> ImageLoader<S> {
    /// Create a loader over `source`
    pub fn new(source: S, config: ImageLoaderConfig) -> Self {
        Self {
            source,
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: ImageCacheStats::default(),
            }),
        }
    }

    /// Load an image, answering from the cache while the entry is fresh
    ///
    /// A failed load leaves the cache unchanged.
    pub async fn load_image(&self, path: &str) -> LoadResult<ImageHandle> {
        if let Some(image) = self.fresh_entry(path) {
            return Ok(image);
        }

        let image = match self.source.load(path).await {
            Ok(image) => image,
            Err(err) => {
                self.lock_state().stats.failures += 1;
                return Err(err);
            }
        };

        let mut state = self.lock_state();
        state.entries.insert(
            path.to_string(),
            CacheEntry {
                image: Arc::clone(&image),
                timestamp: Instant::now(),
            },
        );
        // Deserialized or literal configs may carry 0; one slot is the floor
        let capacity = self.config.cache_size.max(1);
        while state.entries.len() > capacity {
            match state.evict_oldest() {
                Some(evicted) => debug!(path = %evicted, "evicted cached image"),
                None => break,
            }
        }
        state.stats.entries = state.entries.len();

        Ok(image)
    }

    /// Drop every cached image
    pub fn clear_cache(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.stats.entries = 0;
    }

    /// Check whether `path` is cached, fresh or not
    pub fn contains(&self, path: &str) -> bool {
        self.lock_state().entries.contains_key(path)
    }

    /// Number of cached images
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current cache statistics
    pub fn stats(&self) -> ImageCacheStats {
        self.lock_state().stats
    }

    /// Get the configuration
    pub fn config(&self) -> &ImageLoaderConfig {
        &self.config
    }

    fn fresh_entry(&self, path: &str) -> Option<ImageHandle> {
        let mut state = self.lock_state();
        let fresh = state
            .entries
            .get(path)
            .filter(|entry| entry.timestamp.elapsed() < self.config.cache_timeout)
            .map(|entry| Arc::clone(&entry.image));
        match fresh {
            Some(_) => state.stats.hits += 1,
            None => state.stats.misses += 1,
        }
        fresh
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Source that fabricates 1x1 images and counts loads per path
    #[derive(Default)]
    struct CountingSource {
        loads: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
    }

    impl CountingSource {
        fn loads_of(&self, path: &str) -> usize {
            self.loads.lock().unwrap().get(path).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ImageSource for CountingSource {
        async fn load(&self, path: &str) -> LoadResult<ImageHandle> {
            self.total.fetch_add(1, Ordering::SeqCst);
            *self.loads.lock().unwrap().entry(path.to_string()).or_default() += 1;
            if path.starts_with("missing") {
                return Err(LoadError::Io {
                    path: path.to_string(),
                    message: "not found".to_string(),
                });
            }
            Ok(Arc::new(RgbaImage::new(1, 1)))
        }
    }

    fn loader(cache_size: usize) -> ImageLoader<CountingSource> {
        ImageLoader::new(
            CountingSource::default(),
            ImageLoaderConfig::new()
                .with_cache_size(cache_size)
                .with_cache_timeout(Duration::from_secs(60)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_never_exceeds_capacity() {
        let loader = loader(3);

        for i in 0..10 {
            loader.load_image(&format!("page-{i}.png")).await.unwrap();
            tokio::time::advance(Duration::from_millis(10)).await;
            assert!(loader.len() <= 3);
        }
        assert_eq!(loader.stats().evictions, 7);
    }

    #[tokio::test]
    async fn test_zero_cache_size_still_keeps_latest_image() {
        let config = ImageLoaderConfig {
            cache_size: 0,
            ..ImageLoaderConfig::default()
        };
        let loader = ImageLoader::new(CountingSource::default(), config);

        loader.load_image("a.png").await.unwrap();
        loader.load_image("a.png").await.unwrap();

        assert!(loader.contains("a.png"));
        assert_eq!(loader.source.loads_of("a.png"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_entry_is_evicted() {
        let loader = loader(2);

        loader.load_image("a.png").await.unwrap();
        tokio::time::advance(Duration::from_millis(5)).await;
        loader.load_image("b.png").await.unwrap();
        tokio::time::advance(Duration::from_millis(5)).await;
        loader.load_image("c.png").await.unwrap();

        assert!(!loader.contains("a.png"));
        assert!(loader.contains("b.png"));
        assert!(loader.contains("c.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_loaded_once() {
        let loader = loader(10);

        let first = loader.load_image("EXH0001.png").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = loader.load_image("EXH0001.png").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.source.loads_of("EXH0001.png"), 1);
        assert_eq!(loader.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_is_reloaded() {
        let loader = loader(10);

        loader.load_image("EXH0001.png").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        loader.load_image("EXH0001.png").await.unwrap();

        assert_eq!(loader.source.loads_of("EXH0001.png"), 2);
        assert_eq!(loader.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_does_not_pollute_cache() {
        let loader = loader(10);

        let result = loader.load_image("missing.png").await;
        assert!(matches!(result, Err(LoadError::Io { .. })));
        assert!(loader.is_empty());
        assert_eq!(loader.stats().failures, 1);

        // No retry: a second call goes back to the source exactly once more
        let _ = loader.load_image("missing.png").await;
        assert_eq!(loader.source.loads_of("missing.png"), 2);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let loader = loader(10);
        loader.load_image("a.png").await.unwrap();
        loader.load_image("b.png").await.unwrap();

        loader.clear_cache();
        assert!(loader.is_empty());

        loader.load_image("a.png").await.unwrap();
        assert_eq!(loader.source.total.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_file_source_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::from_pixel(4, 3, image::Rgba([255, 0, 0, 255]));
        image.save(dir.path().join("EXH0001.png")).unwrap();

        let loader = ImageLoader::new(
            FileImageSource::with_root(dir.path()),
            ImageLoaderConfig::default(),
        );
        let decoded = loader.load_image("EXH0001.png").await.unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.get_pixel(0, 0), &image::Rgba([255, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_file_source_reports_io_and_decode_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("garbage.png"), b"not an image").unwrap();
        let source = FileImageSource::with_root(dir.path());

        assert!(matches!(
            source.load("absent.png").await,
            Err(LoadError::Io { .. })
        ));
        assert!(matches!(
            source.load("garbage.png").await,
            Err(LoadError::Decode { .. })
        ));
    }
}
