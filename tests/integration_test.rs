//! Integration tests for soundclass
//!
//! Runs the full pipeline on a synthetic dataset of tones.

use candle_core::Device;
use std::path::{Path, PathBuf};

use soundclass::audio::AudioOutput;
use soundclass::config::{ModelConfig, RepresentationConfig, TrainingConfig};
use soundclass::dataset::{read_table, LabelRow, MetadataRow, SplitPlan, LABELS_FILE, METADATA_FILE, SPLITS_FILE};
use soundclass::models::{ModelArchitecture, StandardScaler, ARCHITECTURE_FILE, SCALER_FILE, WEIGHTS_FILE};
use soundclass::representation::load_representation;
use soundclass::training::{load_overview, HISTORY_FILE, OVERVIEW_FILE};
use soundclass::{run_pipeline, Classifier, PipelineConfig, Split};

const SR: u32 = 8000;

fn chord(freqs: &[f32], seconds: f32, sample_rate: u32) -> Vec<f32> {
    (0..(seconds * sample_rate as f32) as usize)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            freqs
                .iter()
                .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                .sum::<f32>()
                * 0.2
        })
        .collect()
}

/// Three 12 s recordings, one of them at a different sample rate
fn raw_dataset(root: &Path) -> Vec<PathBuf> {
    let dir = root.join("raw").join("synthetic");
    std::fs::create_dir_all(dir.join("nested")).unwrap();

    let files = vec![
        (dir.join("a_low.wav"), chord(&[110.0, 220.0], 12.0, SR), SR),
        (dir.join("b_mid.wav"), chord(&[440.0, 660.0], 12.0, SR), SR),
        (dir.join("nested").join("c_high.wav"), chord(&[1500.0, 2500.0], 12.0, 16000), 16000),
    ];
    for (path, samples, sr) in &files {
        AudioOutput::save(samples, *sr, path).unwrap();
    }
    files.into_iter().map(|(p, _, _)| p).collect()
}

fn config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.raw_root = root.join("raw");
    config.paths.annotated_root = root.join("dataset");
    config.paths.models_root = root.join("models");
    config.paths.dataset = "synthetic".to_string();

    config.annotation.sample_rate = SR;
    config.annotation.require_tags = false;

    config.segmentation.segment_length = 1;
    config.segmentation.augment_size = 1;

    config.representation = RepresentationConfig {
        n_mfcc: 13,
        n_fft: 512,
        hop_length: 256,
        n_mels: 40,
        ..Default::default()
    };
    config.model = ModelConfig {
        dense1: 16,
        dropout1: 0.1,
        dense2: 8,
        dropout2: 0.0,
        dense3: 0,
    };
    config.training = TrainingConfig {
        epochs: 5,
        batch_size: 8,
        patience: 5,
        learning_rate: 1e-3,
        seed: 7,
        restore_best: false,
    };
    config
}

#[test]
fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let raw_files = raw_dataset(dir.path());
    let config = config(dir.path());

    let report = run_pipeline(&config, &Device::Cpu).unwrap();

    // Annotation: one row per input file, labels in path order
    let summary = report.annotation.clone().unwrap();
    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.annotated, 3);
    let metadata: Vec<MetadataRow> = read_table(config.annotated_dir().join(METADATA_FILE)).unwrap();
    assert_eq!(metadata.len(), raw_files.len());
    assert_eq!(
        metadata.iter().map(|r| r.label).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(metadata.iter().all(|r| r.sample_rate == SR && r.genre == "unknown"));
    assert!(metadata.iter().all(|r| (11_900..=12_000).contains(&r.length)));

    // Segmentation: 12 segments per recording, 8/2/2, train doubled by augmentation
    let mut written = std::collections::HashMap::new();
    for (split, count) in &report.segments {
        let count = count.unwrap();
        let rows: Vec<LabelRow> = read_table(config.segment_dir(*split).join(LABELS_FILE)).unwrap();
        assert_eq!(rows.len(), count);
        written.insert(*split, count);
    }
    assert_eq!(written[&Split::Train], 3 * 8 * 2);
    assert_eq!(written[&Split::Valid], 3 * 2);
    assert_eq!(written[&Split::Test], 3 * 2);
    let plan = SplitPlan::load(config.segmentation_dir().join(SPLITS_FILE)).unwrap();
    assert_eq!(plan.len(), 36);

    // Representation: (n_mfcc, 1 + len / hop) per segment
    let frames = 1 + SR as usize / 256;
    for split in Split::ALL {
        let bundle = load_representation(config.representation_dir(split)).unwrap();
        assert_eq!(bundle.shape, [written[&split], 13, frames]);
    }

    // Training artifacts
    let outcome = report.training.unwrap();
    assert!(outcome.run_dir.starts_with(config.model_family_dir()));
    for file in [
        WEIGHTS_FILE,
        ARCHITECTURE_FILE,
        SCALER_FILE,
        HISTORY_FILE,
        OVERVIEW_FILE,
        "history.svg",
        "confusion_matrix.svg",
        "train_distribution.svg",
        "valid_distribution.svg",
        "test_distribution.svg",
    ] {
        assert!(outcome.run_dir.join(file).exists(), "missing {}", file);
    }

    let overview = load_overview(&outcome.run_dir).unwrap();
    assert_eq!(overview.classes, 3);
    assert_eq!(overview.train_shape, [48, 13, frames]);
    assert_eq!(overview.training_params.epochs_run, outcome.history.epochs.len());
    assert_eq!(outcome.evaluation.confusion.len(), 3);
    assert_eq!(
        outcome.evaluation.confusion.iter().flatten().sum::<usize>(),
        written[&Split::Test]
    );

    // The saved scaler is fit on the train split alone
    let train = load_representation(config.representation_dir(Split::Train)).unwrap();
    let expected = StandardScaler::fit(&train.features, frames).unwrap();
    assert_eq!(StandardScaler::load(outcome.run_dir.join(SCALER_FILE)).unwrap(), expected);

    let architecture = ModelArchitecture::load(outcome.run_dir.join(ARCHITECTURE_FILE)).unwrap();
    assert_eq!(architecture.classes, vec![0, 1, 2]);
    assert_eq!(architecture.input_shape, [13, frames]);

    // The saved run classifies new audio
    let classifier = Classifier::load(&outcome.run_dir, &Device::Cpu).unwrap();
    let result = classifier.classify_file(&raw_files[0]).unwrap();
    assert_eq!(result.segments, 12);
    assert_eq!(result.ranking.len(), 3);
}

#[test]
fn test_rerun_reuses_existing_outputs() {
    let dir = tempfile::tempdir().unwrap();
    raw_dataset(dir.path());
    let mut config = config(dir.path());
    config.stages.train = false;

    let first = run_pipeline(&config, &Device::Cpu).unwrap();
    assert!(first.annotation.is_some());
    let plan = std::fs::read_to_string(config.segmentation_dir().join(SPLITS_FILE)).unwrap();

    let second = run_pipeline(&config, &Device::Cpu).unwrap();
    assert!(second.annotation.is_none());
    assert!(second.segments.iter().all(|(_, count)| count.is_none()));
    assert!(second.representations.iter().all(|(_, shape)| shape.is_none()));
    assert!(second.training.is_none());

    // Removing one split regenerates it from the same plan
    std::fs::remove_dir_all(config.segment_dir(Split::Valid)).unwrap();
    let third = run_pipeline(&config, &Device::Cpu).unwrap();
    let valid = third
        .segments
        .iter()
        .find(|(split, _)| *split == Split::Valid)
        .and_then(|(_, count)| *count);
    assert_eq!(valid, Some(6));
    assert_eq!(
        std::fs::read_to_string(config.segmentation_dir().join(SPLITS_FILE)).unwrap(),
        plan
    );
}

#[test]
fn test_augmentation_changes_segmentation_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    assert!(config.segmentation_dir().ends_with("SEG_1_OVERLAP_0_AUG_1"));

    config.segmentation.overlap = 0.5;
    config.segmentation.augment_size = 0;
    assert!(config.segmentation_dir().ends_with("SEG_1_OVERLAP_50_AUG_0"));
    assert!(config
        .representation_dir(Split::Test)
        .ends_with("SEG_1_OVERLAP_50_AUG_0/MFCC_13/test"));
}

#[test]
fn test_missing_raw_dataset_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    assert!(run_pipeline(&config, &Device::Cpu).is_err());
}

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
    let config = PipelineConfig::load(path).unwrap();
    let defaults = PipelineConfig::default();

    assert_eq!(config.representation, defaults.representation);
    assert_eq!(config.model, defaults.model);
    assert_eq!(config.training, defaults.training);
    assert_eq!(config.segmentation.train.base, defaults.segmentation.train.base);
    assert_eq!(config.segmentation.train.extra, defaults.segmentation.train.extra);
    assert_eq!(config.segmentation.test.base, defaults.segmentation.test.base);
    assert!(config.validate().is_ok());
}
