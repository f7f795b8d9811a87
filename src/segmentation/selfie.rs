use super::preprocess::Preprocessor;
use super::types::{Mask, ModelLoader, SegmentationModel};
use crate::config::EngineConfig;
use anyhow::{ensure, Context, Result};
use image::RgbImage;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// Selfie segmentation model (MediaPipe layout) running on ONNX Runtime
///
/// Input is an NHWC float image in [0, 1]; output is a single confidence
/// channel at the same resolution. Stateless between images.
pub struct SelfieSegmenter {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl SelfieSegmenter {
    /// Create a new segmenter from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `config` - Model selection, mirroring and thread count
    pub fn new<P: AsRef<Path>>(model_path: P, config: &EngineConfig) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading selfie segmentation model from {}", path.display());

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;
        if config.intra_threads > 0 {
            builder = builder.with_intra_threads(config.intra_threads)?;
        }
        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let (width, height) = config.model_selection.input_size();
        tracing::info!(
            "Segmentation model loaded ({:?}, {}x{}, selfie_mode={})",
            config.model_selection,
            width,
            height,
            config.selfie_mode
        );

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height, config.selfie_mode),
            width,
            height,
        })
    }
}

impl SegmentationModel for SelfieSegmenter {
    fn segment(&mut self, image: &RgbImage) -> Result<Mask> {
        let _span = tracing::debug_span!("selfie_segment").entered();

        let input = self.preprocessor.preprocess(image)?;
        let input_tensor = Tensor::from_array(input)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .context("Failed to run inference")?;
        drop(_infer_span);

        // Confidence map, shape [1, H, W, 1] (some exports drop the channel axis)
        let confidences: ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .context("Failed to extract segmentation mask")?;
        let expected = self.width as usize * self.height as usize;
        ensure!(
            confidences.len() == expected,
            "model produced {} confidences, expected {} ({}x{})",
            confidences.len(),
            expected,
            self.width,
            self.height
        );
        let flat: Vec<f32> = confidences.iter().copied().collect();

        let (frame_width, frame_height) = image.dimensions();
        self.preprocessor
            .postprocess_mask(&flat, frame_width, frame_height)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Loads [`SelfieSegmenter`] from the configured model path
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxModelLoader;

impl ModelLoader for OnnxModelLoader {
    fn load(&self, config: &EngineConfig) -> Result<Box<dyn SegmentationModel + Send>> {
        let model = SelfieSegmenter::new(&config.model_path, config)?;
        Ok(Box::new(model))
    }

    fn is_available(&self, config: &EngineConfig) -> bool {
        config.model_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_unavailable_and_fails_to_load() {
        let config = EngineConfig::new("/nonexistent/selfie.onnx");
        assert!(!OnnxModelLoader.is_available(&config));
        assert!(OnnxModelLoader.load(&config).is_err());
    }
}
