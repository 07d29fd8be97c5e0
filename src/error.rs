use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for detection operations.
pub type DetectResult<T> = Result<T, DetectError>;

/// The error type surfaced at the detector boundary.
///
/// Failures inside the per-region scan loop never become a `DetectError`;
/// they degrade to a skipped region or a zero score instead.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Raster has zero size ({width}x{height})")]
    EmptyRaster { width: u32, height: u32 },

    #[error("Raster buffer of {actual} bytes does not hold {width}x{height} RGBA pixels ({expected} bytes)")]
    InvalidRaster {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to decode screenshot: {source}")]
    Decode {
        #[from]
        source: image::ImageError,
    },

    #[error("Screenshot decode timed out after {duration:?}")]
    DecodeTimeout { duration: std::time::Duration },

    #[error("Task failed to complete: {source}")]
    JoinError {
        #[from]
        source: tokio::task::JoinError,
    },

    #[error("Detector state lock was poisoned by a panicked run")]
    StatePoisoned,

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to load template {path:?}: {description}")]
    TemplateLoad { path: PathBuf, description: String },

    #[error("No item templates could be loaded from {path:?}")]
    NoTemplates { path: PathBuf },
}

impl DetectError {
    /// Whether the error came from the input bytes rather than the detector itself.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DetectError::EmptyRaster { .. }
                | DetectError::InvalidRaster { .. }
                | DetectError::Decode { .. }
                | DetectError::DecodeTimeout { .. }
        )
    }
}
