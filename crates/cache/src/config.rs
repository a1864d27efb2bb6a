//! Cache configuration for the image cache and the memory manager.
//!
//! Configuration can be created programmatically, loaded from environment
//! variables, or read from a simple `key = value` settings file.

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`ImageLoader`](crate::ImageLoader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLoaderConfig {
    /// Maximum number of decoded images kept in the cache
    pub cache_size: usize,
    /// Age after which a cached image is considered stale and reloaded
    pub cache_timeout: Duration,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            cache_size: 10,
            cache_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl ImageLoaderConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache capacity (at least one entry).
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size.max(1);
        self
    }

    /// Sets the staleness window.
    pub fn with_cache_timeout(mut self, cache_timeout: Duration) -> Self {
        self.cache_timeout = cache_timeout;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// - `EXHIBIT_IMAGE_CACHE_SIZE`: number of cached images (default: 10)
    /// - `EXHIBIT_IMAGE_CACHE_TIMEOUT_SECS`: staleness window in seconds (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(size) = env_value::<usize>("EXHIBIT_IMAGE_CACHE_SIZE")? {
            config = config.with_cache_size(size);
        }
        if let Some(secs) = env_value::<u64>("EXHIBIT_IMAGE_CACHE_TIMEOUT_SECS")? {
            config.cache_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Configuration for [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryManagerConfig {
    /// Maximum number of free objects retained per pooled type
    pub max_size: usize,
    /// Divisor applied to every pool length under memory pressure
    pub growth_factor: f64,
    /// Period of the resource cache sweep
    pub cache_cleanup_interval: Duration,
    /// Period of the heap usage check
    pub memory_check_interval: Duration,
    /// Heap used/total ratio above which the manager sheds memory
    pub memory_threshold: f64,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            growth_factor: 1.5,
            cache_cleanup_interval: Duration::from_secs(60),
            memory_check_interval: Duration::from_secs(30),
            memory_threshold: 0.9,
        }
    }
}

impl MemoryManagerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-type pool capacity.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the shrink divisor. Values below 1.0 are clamped to 1.0.
    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor.max(1.0);
        self
    }

    /// Sets the cache sweep period.
    pub fn with_cache_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cache_cleanup_interval = interval;
        self
    }

    /// Sets the heap check period.
    pub fn with_memory_check_interval(mut self, interval: Duration) -> Self {
        self.memory_check_interval = interval;
        self
    }

    /// Sets the pressure threshold (0.0 to 1.0).
    pub fn with_memory_threshold(mut self, threshold: f64) -> Self {
        self.memory_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Resource cache entries idle for longer than this are purged on sweep.
    pub fn resource_idle_limit(&self) -> Duration {
        self.cache_cleanup_interval * 2
    }

    /// Loads configuration from environment variables.
    ///
    /// - `EXHIBIT_POOL_MAX_SIZE`
    /// - `EXHIBIT_POOL_GROWTH_FACTOR`
    /// - `EXHIBIT_CACHE_CLEANUP_SECS`
    /// - `EXHIBIT_MEMORY_CHECK_SECS`
    /// - `EXHIBIT_MEMORY_THRESHOLD`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in [
            "EXHIBIT_POOL_MAX_SIZE",
            "EXHIBIT_POOL_GROWTH_FACTOR",
            "EXHIBIT_CACHE_CLEANUP_SECS",
            "EXHIBIT_MEMORY_CHECK_SECS",
            "EXHIBIT_MEMORY_THRESHOLD",
        ] {
            if let Ok(value) = std::env::var(key) {
                config.apply(key, &value)?;
            }
        }
        Ok(config)
    }

    /// Loads configuration from a `key = value` settings file.
    ///
    /// Expected file format:
    /// ```text
    /// # Memory manager settings
    /// pool_max_size = 200
    /// memory_threshold = 0.85
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        let mut config = Self::default();
        for (key, value) in parse_key_values(&contents) {
            config.apply(&key.to_ascii_uppercase(), value)?;
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let key = key.trim_start_matches("EXHIBIT_");
        match key {
            "POOL_MAX_SIZE" => self.max_size = parse_value(key, value)?,
            "POOL_GROWTH_FACTOR" => {
                *self = self.clone().with_growth_factor(parse_value(key, value)?)
            }
            "CACHE_CLEANUP_SECS" => {
                self.cache_cleanup_interval = Duration::from_secs(parse_value(key, value)?)
            }
            "MEMORY_CHECK_SECS" => {
                self.memory_check_interval = Duration::from_secs(parse_value(key, value)?)
            }
            "MEMORY_THRESHOLD" => {
                *self = self.clone().with_memory_threshold(parse_value(key, value)?)
            }
            _ => {} // Ignore unknown keys
        }
        Ok(())
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    /// I/O error reading a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reads and parses an environment variable, `Ok(None)` when it is unset.
pub fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => parse_value(key, &value).map(Some),
        Err(_) => Ok(None),
    }
}

/// Parses a single configuration value, naming the key on failure.
pub fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Splits `key = value` lines, skipping blanks and `#` comments.
pub fn parse_key_values(contents: &str) -> impl Iterator<Item = (&str, &str)> {
    contents.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        Some((key.trim(), value.trim().trim_matches('"')))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_image_loader_config() {
        let config = ImageLoaderConfig::default();
        assert_eq!(config.cache_size, 10);
        assert_eq!(config.cache_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_cache_size_is_at_least_one() {
        let config = ImageLoaderConfig::new().with_cache_size(0);
        assert_eq!(config.cache_size, 1);
    }

    #[test]
    fn test_memory_config_builders_clamp() {
        let config = MemoryManagerConfig::new()
            .with_growth_factor(0.5)
            .with_memory_threshold(1.7);
        assert_eq!(config.growth_factor, 1.0);
        assert_eq!(config.memory_threshold, 1.0);
    }

    #[test]
    fn test_resource_idle_limit_is_twice_cleanup_interval() {
        let config =
            MemoryManagerConfig::new().with_cache_cleanup_interval(Duration::from_secs(10));
        assert_eq!(config.resource_idle_limit(), Duration::from_secs(20));
    }

    #[test]
    #[serial]
    fn test_image_config_from_env() {
        env::set_var("EXHIBIT_IMAGE_CACHE_SIZE", "25");
        env::set_var("EXHIBIT_IMAGE_CACHE_TIMEOUT_SECS", "60");

        let config = ImageLoaderConfig::from_env().unwrap();
        assert_eq!(config.cache_size, 25);
        assert_eq!(config.cache_timeout, Duration::from_secs(60));

        env::remove_var("EXHIBIT_IMAGE_CACHE_SIZE");
        env::remove_var("EXHIBIT_IMAGE_CACHE_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_memory_config_from_env_rejects_garbage() {
        env::set_var("EXHIBIT_POOL_MAX_SIZE", "lots");

        let result = MemoryManagerConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::remove_var("EXHIBIT_POOL_MAX_SIZE");
    }

    #[test]
    fn test_memory_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.conf");
        fs::write(
            &path,
            "# Memory manager settings\npool_max_size = 42\nmemory_threshold = 0.75\n\nunknown = 1\n",
        )
        .unwrap();

        let config = MemoryManagerConfig::from_file(&path).unwrap();
        assert_eq!(config.max_size, 42);
        assert_eq!(config.memory_threshold, 0.75);
        assert_eq!(config.growth_factor, 1.5);
    }

    #[test]
    fn test_missing_config_file_is_io_error() {
        let result = MemoryManagerConfig::from_file("/nonexistent/exhibit/memory.conf");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
