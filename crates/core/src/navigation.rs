//! Cursor over the ordered exhibit image list

use tracing::debug;

/// Linear cursor over image paths
///
/// Moving past either end returns `None` and leaves the cursor where it
/// was; there is no wraparound.
#[derive(Debug, Clone, Default)]
pub struct NavigationManager {
    images: Vec<String>,
    current: usize,
}

impl NavigationManager {
    /// Create a manager over `images`, positioned at the first one
    pub fn new(images: Vec<String>) -> Self {
        Self { images, current: 0 }
    }

    /// Replace the image list and move back to the first image
    pub fn set_images(&mut self, images: Vec<String>) {
        self.images = images;
        self.current = 0;
    }

    /// Advance and return the new current path
    pub fn next_image(&mut self) -> Option<&str> {
        if !self.has_next() {
            return None;
        }
        self.current += 1;
        self.current_image()
    }

    /// Step back and return the new current path
    pub fn previous_image(&mut self) -> Option<&str> {
        if !self.has_previous() {
            return None;
        }
        self.current -= 1;
        self.current_image()
    }

    /// Move to the first path containing `bates_token`
    pub fn jump_to_image(&mut self, bates_token: &str) -> Option<&str> {
        let index = self
            .images
            .iter()
            .position(|path| path.contains(bates_token));
        let Some(index) = index else {
            debug!(token = bates_token, "no image matches Bates token");
            return None;
        };
        self.current = index;
        self.current_image()
    }

    /// Path under the cursor, `None` when the list is empty
    pub fn current_image(&self) -> Option<&str> {
        self.images.get(self.current).map(String::as_str)
    }

    /// Cursor position, `None` when the list is empty
    pub fn current_index(&self) -> Option<usize> {
        (!self.images.is_empty()).then_some(self.current)
    }

    pub fn has_next(&self) -> bool {
        self.current + 1 < self.images.len()
    }

    pub fn has_previous(&self) -> bool {
        self.current > 0
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
