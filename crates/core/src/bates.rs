//! Sequential Bates numbering for exhibits

use serde::{Deserialize, Serialize};

/// Format of generated Bates numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatesConfig {
    pub prefix: String,
    pub start_number: u64,

    /// Minimum digit count; longer numbers are never truncated
    pub pad_length: usize,

    pub suffix: String,
}

impl Default for BatesConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            start_number: 1,
            pad_length: 6,
            suffix: String::new(),
        }
    }
}

impl BatesConfig {
    /// Create a config with the given prefix, start and padding
    pub fn new(prefix: impl Into<String>, start_number: u64, pad_length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            start_number,
            pad_length,
            suffix: String::new(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

/// Generates consecutive Bates numbers
///
/// # Example
///
/// ```
/// use exhibit_core::{BatesConfig, BatesManager};
///
/// let mut bates = BatesManager::new(BatesConfig::new("EXH", 1, 4));
/// assert_eq!(bates.generate_bates_number(), "EXH0001");
/// assert_eq!(bates.generate_bates_number(), "EXH0002");
/// ```
#[derive(Debug, Clone)]
pub struct BatesManager {
    config: BatesConfig,
    next: u64,
}

impl BatesManager {
    pub fn new(config: BatesConfig) -> Self {
        let next = config.start_number;
        Self { config, next }
    }

    /// Return the next number and advance
    pub fn generate_bates_number(&mut self) -> String {
        let number = self.format(self.next);
        self.next = self.next.saturating_add(1);
        number
    }

    /// Return the next number without advancing
    pub fn peek_next(&self) -> String {
        self.format(self.next)
    }

    /// Format an arbitrary sequence number
    pub fn format(&self, number: u64) -> String {
        format!(
            "{}{:0width$}{}",
            self.config.prefix,
            number,
            self.config.suffix,
            width = self.config.pad_length
        )
    }

    /// Restart from the configured start number
    pub fn reset(&mut self) {
        self.next = self.config.start_number;
    }

    /// Continue from `number`
    pub fn set_next(&mut self, number: u64) {
        self.next = number;
    }

    pub fn next_number(&self) -> u64 {
        self.next
    }

    pub fn config(&self) -> &BatesConfig {
        &self.config
    }
}
