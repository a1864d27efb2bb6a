//! Load errors shared by the image cache and the network loader

/// Errors produced while loading image or resource data
///
/// Failures are never retried automatically; callers decide whether to
/// offer a retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Reading the source failed
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    /// The bytes could not be decoded into an image
    #[error("failed to decode image {path}: {message}")]
    Decode { path: String, message: String },

    /// The network request failed before or during the body transfer
    #[error("request for {url} failed: {message}")]
    Network { url: String, message: String },

    /// The server answered with a non-success status
    #[error("request for {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// A later request for the same URL took over the result
    #[error("load of {url} was superseded by a newer request")]
    Superseded { url: String },

    /// The loader was shut down before the load finished
    #[error("load of {url} was cancelled")]
    Cancelled { url: String },
}

/// Result type for load operations
pub type LoadResult<T> = Result<T, LoadError>;
