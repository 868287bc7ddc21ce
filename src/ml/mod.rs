pub mod ml_model;
pub mod inference;

pub use ml_model::{DigitClassifier, ModelConfig, IMAGE_SIZE};
pub use inference::{load_classifier, CpuBackend, InferenceEngine};
#[cfg(feature = "wgpu")]
pub use inference::GpuBackend;
