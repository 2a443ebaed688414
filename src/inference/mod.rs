//! Inference with a trained run
//!
//! - Classifier: loads `model_architecture.json`, `scaler.json` and weights
//! - Per-file classification averaged over segments

mod classifier;

pub use classifier::{Classification, Classifier, Prediction};
