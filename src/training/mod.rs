//! Classifier training
//!
//! - Label encoding and feature scaling fit on the train split only
//! - Adam over seeded shuffled mini-batches with early stopping on validation loss
//! - Test evaluation: loss, accuracy, F1 micro/macro, confusion matrix
//! - Run directory with weights, scaler, plots and `overview.json`

mod metrics;
mod report;
mod run;
mod trainer;

pub use metrics::{accuracy, confusion_matrix, f1_scores, Evaluation};
pub use report::{
    load_overview, run_dir_name, Overview, RunArtifacts, Scores, HISTORY_FILE, OVERVIEW_FILE,
};
pub use run::{train_model, TrainingOutcome};
pub use trainer::{evaluate, EpochRecord, History, LabelEncoder, SplitData, Trainer};
