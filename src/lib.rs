//! Person silhouettes from photos.
//!
//! A segmentation model estimates per-pixel person confidence; every pixel
//! above the midpoint is painted with the silhouette color and everything
//! else with the background color. The result is encoded as PNG.
//!
//! ```no_run
//! use silhouette::{BatchItem, EngineConfig, SilhouetteEngine};
//!
//! # async fn run() -> silhouette::Result<()> {
//! let engine = SilhouetteEngine::new(EngineConfig::new("models/selfie_segmentation.onnx"));
//! let items = vec![BatchItem::new("ada", "photos/ada.jpg")];
//! let mut progress = |p: f32| println!("{:.0}%", p * 100.0);
//! for outcome in engine.batch_transform(&items, Some(&mut progress)).await? {
//!     if let Some(s) = outcome.silhouette {
//!         println!("{}: {}", outcome.id, s.to_data_uri());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod render;
pub mod segmentation;
pub mod source;

pub use color::Color;
pub use config::{EngineConfig, ModelSelection, PERSON_THRESHOLD};
pub use engine::{
    codecs_supported, BatchItem, BatchOutcome, BatchSummary, EngineStatus, SilhouetteEngine,
};
pub use error::{Result, SilhouetteError};
pub use render::{render_silhouette, Silhouette, SilhouetteOptions};
pub use segmentation::{Mask, ModelLoader, SegmentationModel};
pub use source::{sanitize_locator, FetchOptions, ImageSource};
