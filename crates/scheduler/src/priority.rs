//! Load priorities and per-request options
//!
//! Lower numeric values are more urgent; the scheduler dispatches `High`
//! requests first, then `Medium`, then `Low`, FIFO within each level.

use serde::{Deserialize, Serialize};

/// Load priority levels
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LoadPriority {
    /// Visible content, dispatched first
    High = 0,

    /// Content just outside the viewport
    #[default]
    Medium = 1,

    /// Prefetch and background work
    Low = 2,
}

impl LoadPriority {
    /// All levels in dispatch order
    pub const DISPATCH_ORDER: [LoadPriority; 3] =
        [LoadPriority::High, LoadPriority::Medium, LoadPriority::Low];

    /// Keep the more urgent of two priorities
    pub fn most_urgent(self, other: LoadPriority) -> LoadPriority {
        self.min(other)
    }
}

impl std::str::FromStr for LoadPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(LoadPriority::High),
            "medium" => Ok(LoadPriority::Medium),
            "low" => Ok(LoadPriority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Requested rendition quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadQuality {
    Low,
    Medium,
    #[default]
    High,
}

/// Options attached to a load request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub priority: LoadPriority,
    pub quality: LoadQuality,
    /// Whether the request is speculative
    pub prefetch: bool,
}

impl LoadOptions {
    /// Options with the given priority and defaults otherwise
    pub fn with_priority(priority: LoadPriority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Low-priority speculative request
    pub fn prefetch() -> Self {
        Self {
            priority: LoadPriority::Low,
            prefetch: true,
            ..Self::default()
        }
    }

    /// Set the quality
    pub fn quality(mut self, quality: LoadQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Fold a repeated request for the same URL into these options
    ///
    /// Priority only ever becomes more urgent. A non-speculative request
    /// clears the prefetch flag, and the newer quality wins.
    pub fn merge(&mut self, newer: LoadOptions) {
        self.priority = self.priority.most_urgent(newer.priority);
        self.prefetch = self.prefetch && newer.prefetch;
        self.quality = newer.quality;
    }
}
