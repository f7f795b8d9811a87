use super::types::Mask;
use anyhow::{ensure, Result};
use image::{imageops, GrayImage, RgbImage};
use ndarray::Array4;

/// Converts source images to model input tensors and model output back to masks
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    mirror: bool,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, mirror: bool) -> Self {
        Self {
            target_width,
            target_height,
            mirror,
        }
    }

    /// Preprocess an RGB image into a normalized NHWC tensor
    ///
    /// Steps:
    /// 1. Mirror horizontally when in selfie mode
    /// 2. Resize to target dimensions
    /// 3. Convert to float and normalize to [0, 1]
    ///
    /// Returns: Array4<f32> with shape [1, height, width, 3]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = image.dimensions();
        ensure!(width > 0 && height > 0, "cannot preprocess an empty image");

        let oriented;
        let source = if self.mirror {
            oriented = imageops::flip_horizontal(image);
            &oriented
        } else {
            image
        };

        let resized = if source.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                source,
                self.target_width,
                self.target_height,
                imageops::FilterType::Lanczos3,
            )
        } else {
            source.clone()
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, height as usize, width as usize, 3));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }

    /// Postprocess model confidences back to the source image dimensions
    ///
    /// # Arguments
    /// * `confidences` - Flattened confidences in [0, 1] at model resolution
    /// * `target_width` - Source image width
    /// * `target_height` - Source image height
    pub fn postprocess_mask(
        &self,
        confidences: &[f32],
        target_width: u32,
        target_height: u32,
    ) -> Result<Mask> {
        let _span = tracing::debug_span!("postprocess").entered();

        let model_mask =
            Mask::from_unit_confidences(self.target_width, self.target_height, confidences)?;

        let mut gray: GrayImage = model_mask.into_gray_image()?;
        if (self.target_width, self.target_height) != (target_width, target_height) {
            gray = imageops::resize(
                &gray,
                target_width,
                target_height,
                imageops::FilterType::Lanczos3,
            );
        }
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut gray);
        }

        Ok(Mask::from(gray))
    }
}
