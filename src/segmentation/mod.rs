mod preprocess;
mod selfie;
pub mod types;
mod worker;

pub use preprocess::Preprocessor;
pub use selfie::{OnnxModelLoader, SelfieSegmenter};
pub use types::{Mask, ModelLoader, SegmentationModel};
pub use worker::ModelWorker;
