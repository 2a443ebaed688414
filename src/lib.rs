//! # soundclass
//!
//! An audio genre/sound classification pipeline built on Candle.
//!
//! ## Stages
//!
//! - Annotation: decode, resample and tag a raw audio collection
//! - Segmentation: fixed-length, optionally overlapping and augmented clips
//!   with a persisted train/valid/test split plan
//! - Representation: MFCC matrices bundled per split as safetensors
//! - Training: standardized features into a dense classifier with early
//!   stopping, evaluated on the test split
//! - Inference: classify new files with a saved run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use soundclass::{run_pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::load("config.yaml")?;
//! let report = run_pipeline(&config, &candle_core::Device::Cpu)?;
//! ```

#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod audio;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod plots;
pub mod representation;
pub mod training;
pub mod utils;

// Re-exports for convenience
pub use config::{Overrides, PipelineConfig};
pub use dataset::Split;
pub use inference::Classifier;
pub use pipeline::{run_pipeline, PipelineReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
