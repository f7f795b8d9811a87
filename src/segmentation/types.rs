use crate::config::EngineConfig;
use anyhow::{anyhow, ensure, Result};
use image::{GrayImage, RgbImage};

/// Person confidence per pixel: 0 = background, 255 = person.
/// Dimensions match the source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    /// Wrap a row-major confidence buffer, checking it covers `width * height` pixels
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        ensure!(
            data.len() == expected,
            "mask buffer holds {} values, expected {} for {}x{}",
            data.len(),
            expected,
            width,
            height
        );
        Ok(Self { width, height, data })
    }

    /// Build a mask from float confidences in [0, 1]
    pub fn from_unit_confidences(width: u32, height: u32, values: &[f32]) -> Result<Self> {
        let data = values
            .iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        Self::new(width, height, data)
    }

    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_gray_image(self) -> Result<GrayImage> {
        let (width, height) = (self.width, self.height);
        GrayImage::from_raw(width, height, self.data)
            .ok_or_else(|| anyhow!("mask buffer does not fit {}x{}", width, height))
    }
}

impl From<GrayImage> for Mask {
    fn from(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

/// Trait for segmentation models
/// Allows swapping the ONNX backend for other runtimes or scripted fakes
pub trait SegmentationModel {
    /// Segment the person in an image
    ///
    /// # Returns
    /// * Mask with the same dimensions as `image`
    fn segment(&mut self, image: &RgbImage) -> Result<Mask>;

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Constructs segmentation models for the engine
pub trait ModelLoader: Send + Sync {
    /// Build and configure a model. May load external assets.
    fn load(&self, config: &EngineConfig) -> Result<Box<dyn SegmentationModel + Send>>;

    /// Whether `load` has what it needs. Must not load anything.
    fn is_available(&self, config: &EngineConfig) -> bool;
}
