//! Error types for the conversion pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing, serializing, or rasterizing an SVG
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to construct the exporter (HTTP client setup)
    #[error("Exporter initialization failed: {0}")]
    Initialization(String),

    /// The argument is not a renderable element
    #[error("a renderable SVG or graphical element is required; got {0}")]
    InvalidInput(String),

    /// A non-SVG node exposes no content bounding box and cannot be wrapped
    #[error("cannot wrap non-SVG element <{0}> without a content bounding box")]
    Structural(String),

    /// An image, font batch, or rasterized-image resource failed to load
    #[error("failed to load {url}: {reason}")]
    Load {
        /// The offending URL, or a diagnostic payload for data URIs
        url: String,
        reason: String,
    },

    /// Canvas read-back was blocked (tainted by the rasterization callback)
    #[error("canvas read-back blocked: {0}")]
    Security(String),

    /// Canvas/pixmap encoding failed for a reason other than security
    #[error("image encoding failed: {0}")]
    Encoding(String),

    /// The save target could not persist a downloaded file
    #[error("failed to save {filename}: {reason}")]
    Save { filename: String, reason: String },
}

impl Error {
    pub(crate) fn load(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Load {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
