//! Viewport state for prefetch decisions
//!
//! The loader records the visible region of the canvas. Requests can derive
//! their priority from how far an image sits from the one being viewed:
//! 1. The current image - `High`
//! 2. Images within the prefetch margin - `Medium`
//! 3. Everything else - `Low`

use serde::{Deserialize, Serialize};

use crate::priority::LoadPriority;

/// Visible region of the annotation canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Index of the image being viewed
    pub image_index: usize,

    /// Viewport X coordinate (in image pixels)
    pub x: f32,

    /// Viewport Y coordinate (in image pixels)
    pub y: f32,

    /// Viewport width (in image pixels)
    pub width: f32,

    /// Viewport height (in image pixels)
    pub height: f32,

    /// Zoom factor (1.0 = 100%)
    pub scale: f32,

    /// Number of neighbouring images worth prefetching on each side
    pub prefetch_margin: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            image_index: 0,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            scale: 1.0,
            prefetch_margin: 2,
        }
    }
}

impl ViewportConfig {
    /// Create a viewport over `image_index`
    pub fn new(image_index: usize, x: f32, y: f32, width: f32, height: f32, scale: f32) -> Self {
        Self {
            image_index,
            x,
            y,
            width,
            height,
            scale,
            ..Self::default()
        }
    }

    /// Set the prefetch margin
    pub fn with_prefetch_margin(mut self, prefetch_margin: usize) -> Self {
        self.prefetch_margin = prefetch_margin;
        self
    }

    /// Priority for loading the image at `image_index`
    pub fn priority_for(&self, image_index: usize) -> LoadPriority {
        let distance = image_index.abs_diff(self.image_index);
        if distance == 0 {
            LoadPriority::High
        } else if distance <= self.prefetch_margin {
            LoadPriority::Medium
        } else {
            LoadPriority::Low
        }
    }

    /// Neighbouring image indices worth prefetching, nearest first
    pub fn prefetch_candidates(&self, image_count: usize) -> Vec<usize> {
        let mut candidates = Vec::new();
        for offset in 1..=self.prefetch_margin {
            if let Some(next) = self.image_index.checked_add(offset) {
                if next < image_count {
                    candidates.push(next);
                }
            }
            if let Some(previous) = self.image_index.checked_sub(offset) {
                candidates.push(previous);
            }
        }
        candidates
    }
}
