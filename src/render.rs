//! Mask thresholding and silhouette encoding

use crate::color::Color;
use crate::config::PERSON_THRESHOLD;
use crate::error::{Result, SilhouetteError};
use crate::segmentation::Mask;
use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Colors painted into a silhouette
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilhouetteOptions {
    /// Painted where mask confidence is at or below the threshold
    pub background_color: Color,
    /// Painted where mask confidence is above the threshold
    pub silhouette_color: Color,
}

impl Default for SilhouetteOptions {
    fn default() -> Self {
        Self {
            background_color: Color::BLACK,
            silhouette_color: Color::WHITE,
        }
    }
}

impl SilhouetteOptions {
    /// Parse options from color specifications, e.g. `("navy", "#ffcc00")`
    pub fn from_specs(background: &str, silhouette: &str) -> Result<Self> {
        Ok(Self {
            background_color: Color::parse(background)?,
            silhouette_color: Color::parse(silhouette)?,
        })
    }
}

/// Paint every mask pixel with one of the two flat colors, fully opaque
pub fn render_silhouette(mask: &Mask, options: &SilhouetteOptions) -> Result<RgbaImage> {
    let _span = tracing::debug_span!("composite").entered();

    let (width, height) = mask.dimensions();
    let person = options.silhouette_color.opaque();
    let background = options.background_color.opaque();

    let mut raw = Vec::with_capacity(mask.data().len() * 4);
    for &confidence in mask.data() {
        if confidence > PERSON_THRESHOLD {
            raw.extend_from_slice(&person);
        } else {
            raw.extend_from_slice(&background);
        }
    }

    RgbaImage::from_raw(width, height, raw).ok_or_else(|| {
        SilhouetteError::Transform(format!(
            "mask holds {} values, expected {} for {}x{}",
            mask.data().len(),
            width as usize * height as usize,
            width,
            height
        ))
    })
}

/// A two-color silhouette together with its PNG encoding
#[derive(Debug, Clone)]
pub struct Silhouette {
    image: RgbaImage,
    png: Vec<u8>,
    person_pixels: usize,
}

impl Silhouette {
    /// Threshold `mask` and encode the result as PNG
    pub fn from_mask(mask: &Mask, options: &SilhouetteOptions) -> Result<Self> {
        let image = render_silhouette(mask, options)?;
        let person_pixels = mask
            .data()
            .iter()
            .filter(|&&c| c > PERSON_THRESHOLD)
            .count();

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("Failed to encode silhouette as PNG")
            .map_err(|e| SilhouetteError::transform(&e))?;

        let (width, height) = image.dimensions();
        tracing::debug!(
            "Silhouette {}x{}: {} person pixels, {} background pixels",
            width,
            height,
            person_pixels,
            mask.data().len() - person_pixels
        );

        Ok(Self {
            image,
            png,
            person_pixels,
        })
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn person_pixels(&self) -> usize {
        self.person_pixels
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    /// `data:image/png;base64,...`, ready for an `<img src>`
    pub fn to_data_uri(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.png)
            .with_context(|| format!("Failed to write silhouette to {}", path.display()))
    }

    /// Pixel at (x, y); panics when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }
}
