//! Exhibit Viewer Cache Library
//!
//! Bounded image cache, typed object pools and a resource cache that sheds
//! memory under heap pressure.

pub mod config;
pub mod error;
pub mod heap;
pub mod image_loader;
pub mod memory;

pub use config::{
    env_value, parse_key_values, parse_value, ConfigError, ImageLoaderConfig, MemoryManagerConfig,
};
pub use error::{LoadError, LoadResult};
pub use heap::{HeapProbe, HeapStats, NoHeapProbe, ProcessHeapProbe};
pub use image_loader::{
    CacheEntry, FileImageSource, ImageCacheStats, ImageHandle, ImageLoader, ImageSource,
};
pub use memory::{MemoryManager, MemoryStats, ObjectPool, ResourceCache};
