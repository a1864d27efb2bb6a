//! Exhibit Viewer Scheduler Library
//!
//! Priority-queued lazy loading of remote resources.
//!
//! Requests are tagged high, medium or low priority and dispatched by a
//! periodic scheduler task, most urgent first, without exceeding a fixed
//! number of concurrent loads. Progress for every URL is observable through
//! a watch channel and finished bodies are cached by URL.
//!
//! # Example
//!
//! ```no_run
//! use exhibit_scheduler::{HttpFetcher, LazyLoader, LazyLoaderConfig, LoadOptions, LoadPriority};
//!
//! # async fn run() -> Result<(), exhibit_cache::LoadError> {
//! let loader = LazyLoader::new(HttpFetcher::new(), LazyLoaderConfig::default());
//!
//! // The exhibit on screen jumps ahead of anything queued for prefetch
//! let visible = loader.load("https://example.test/EXH0002.png", LoadOptions::with_priority(LoadPriority::High));
//! let next = loader.load("https://example.test/EXH0003.png", LoadOptions::prefetch());
//! let (visible, next) = futures::join!(visible, next);
//! println!("{} / {} bytes", visible?.len(), next?.len());
//! # Ok(())
//! # }
//! ```

mod fetch;
mod lazy_loader;
mod priority;
mod viewport;

// Re-export public API
pub use fetch::{FetchResponse, Fetcher, HttpFetcher, DEFAULT_CHUNK_SIZE};
pub use lazy_loader::{
    LazyLoader, LazyLoaderConfig, LoadStatus, LoadedData, LoaderStats, LoadingState,
};
pub use priority::{LoadOptions, LoadPriority, LoadQuality};
pub use viewport::ViewportConfig;
