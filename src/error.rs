use thiserror::Error;

/// Errors surfaced by the silhouette engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SilhouetteError {
    /// Model construction or warm-up failed. The engine is back to uninitialized.
    #[error("segmentation model failed to initialize: {0}")]
    Initialization(String),

    /// Mask read or image write failed for a single image
    #[error("silhouette transform failed: {0}")]
    Transform(String),

    /// Source image could not be fetched or decoded
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("invalid color specification: {0:?}")]
    InvalidColor(String),

    #[error("image has no pixels ({width}x{height})")]
    InvalidImage { width: u32, height: u32 },
}

impl SilhouetteError {
    /// Render an anyhow chain as a single-line initialization failure
    pub(crate) fn initialization(err: &anyhow::Error) -> Self {
        Self::Initialization(format!("{err:#}"))
    }

    pub(crate) fn transform(err: &anyhow::Error) -> Self {
        Self::Transform(format!("{err:#}"))
    }

    pub(crate) fn decode(err: &anyhow::Error) -> Self {
        Self::Decode(format!("{err:#}"))
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Initialization restarts from scratch on the next call and transforms
    /// leave the engine untouched, so both are worth retrying. Bad input is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Initialization(_) | Self::Transform(_) | Self::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, SilhouetteError>;
