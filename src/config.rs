use std::path::PathBuf;
use std::time::Duration;

/// Mask confidence above which a pixel counts as person (strictly greater)
pub const PERSON_THRESHOLD: u8 = 128;

/// Which selfie segmentation variant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelSelection {
    /// 256x256 input, more accurate
    #[default]
    General,
    /// 256x144 input, faster
    Landscape,
}

impl ModelSelection {
    /// Model input dimensions as (width, height)
    pub fn input_size(self) -> (u32, u32) {
        match self {
            Self::General => (256, 256),
            Self::Landscape => (256, 144),
        }
    }
}

/// Engine configuration. Fixed for the lifetime of a model handle.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the ONNX segmentation model
    pub model_path: PathBuf,
    pub model_selection: ModelSelection,
    /// Mirror input horizontally before inference (front-camera photos)
    pub selfie_mode: bool,
    /// ONNX Runtime intra-op threads (0 = runtime default)
    pub intra_threads: usize,
    /// Timeout for fetching remote image sources
    pub http_timeout: Duration,
    /// Bearer token attached to remote image fetches
    pub bearer_token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/selfie_segmentation.onnx"),
            model_selection: ModelSelection::General,
            selfie_mode: false,
            intra_threads: 4,
            http_timeout: Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    pub fn with_model_selection(mut self, selection: ModelSelection) -> Self {
        self.model_selection = selection;
        self
    }

    pub fn with_selfie_mode(mut self, selfie_mode: bool) -> Self {
        self.selfie_mode = selfie_mode;
        self
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_general_non_mirrored() {
        let config = EngineConfig::default();
        assert_eq!(config.model_selection, ModelSelection::General);
        assert!(!config.selfie_mode);
        assert_eq!(config.model_selection.input_size(), (256, 256));
    }

    #[test]
    fn blank_token_is_dropped() {
        let config = EngineConfig::new("m.onnx").with_bearer_token(Some("  ".into()));
        assert!(config.bearer_token.is_none());
    }
}
