//! Classifier models
//!
//! - Standard scaler fit on train features
//! - Dense perceptron classifier (candle)
//! - Serializable architecture description used to rebuild a trained run

mod perceptron;
mod scaler;

pub use perceptron::{ModelArchitecture, Perceptron};
pub use scaler::StandardScaler;

/// Weights file of a trained run
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Architecture file of a trained run
pub const ARCHITECTURE_FILE: &str = "model_architecture.json";
/// Scaler file of a trained run
pub const SCALER_FILE: &str = "scaler.json";
