//! MFCC representations of segmented splits
//!
//! - [`RepresentationBundle`]: every feature matrix and label of one split
//! - [`Representer`]: turns a segment directory into a bundle

mod bundle;
mod representer;

pub use bundle::{load_representation, RepresentationBundle, REPRESENTATION_FILE};
pub use representer::{represent_dataset, Representer};
