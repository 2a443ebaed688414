//! soundclass CLI - annotate, segment, represent, train and classify audio

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use soundclass::dataset::{read_table, MetadataRow};
use soundclass::{pipeline, Classifier, Overrides, PipelineConfig, Split, VERSION};

/// soundclass - audio genre/sound classification pipeline
#[derive(Parser, Debug)]
#[command(name = "soundclass")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use CPU even when a GPU is available
    #[arg(long, global = true)]
    cpu: bool,

    /// Pipeline configuration file (YAML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of MFCC coefficients
    #[arg(short = 'c', long = "coeff", global = true)]
    coeff: Option<usize>,

    /// Augmented copies per train segment
    #[arg(short = 'a', long = "augmentation", global = true)]
    augmentation: Option<usize>,

    /// Segment length in seconds
    #[arg(short = 's', long = "segment", global = true)]
    segment: Option<u32>,

    /// Overlap between consecutive segments, as a fraction in [0, 1)
    #[arg(short = 'o', long = "overlap", global = true)]
    overlap: Option<f32>,

    /// Dataset subdirectory name
    #[arg(short = 'b', long = "base", global = true)]
    base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every enabled stage
    Run,

    /// Annotate the raw dataset
    Annotate,

    /// Segment the annotated dataset
    Segment {
        /// Only this split (train, valid or test)
        #[arg(long)]
        split: Option<Split>,
    },

    /// Compute MFCC representations of segmented splits
    Represent {
        /// Only this split (train, valid or test)
        #[arg(long)]
        split: Option<Split>,
    },

    /// Train and evaluate a classifier
    Train,

    /// Classify audio files with a trained run
    Classify {
        /// Run directory written by `train`
        #[arg(short, long)]
        run: PathBuf,

        /// Audio files to classify
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// metadata.csv used to name the classes
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Number of classes to print per file
        #[arg(long, default_value = "3")]
        top: usize,
    },

    /// Print the effective configuration
    Info,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    config.apply(&Overrides {
        n_mfcc: cli.coeff,
        augment_size: cli.augmentation,
        segment_length: cli.segment,
        overlap: cli.overlap,
        dataset: cli.base.clone(),
    });
    config.validate()?;
    Ok(config)
}

fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else {
        Ok(Device::cuda_if_available(0)?)
    }
}

/// Label value -> "title (genre)" from an annotation table
fn class_names(metadata: &Path) -> Result<HashMap<i64, String>> {
    let rows: Vec<MetadataRow> = read_table(metadata)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let name = if row.title.is_empty() {
                format!("{} ({})", row.filename, row.genre)
            } else {
                format!("{} ({})", row.title, row.genre)
            };
            (row.label, name)
        })
        .collect())
}

fn splits(split: Option<Split>) -> Vec<Split> {
    split.map_or_else(|| Split::ALL.to_vec(), |s| vec![s])
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    info!("soundclass v{}", VERSION);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Run => {
            let device = select_device(cli.cpu)?;
            let report = pipeline::run_pipeline(&config, &device)?;
            if let Some(outcome) = report.training {
                println!(
                    "{}: test accuracy {:.4}, f1 macro {:.4}",
                    outcome.run_dir.display(),
                    outcome.evaluation.accuracy,
                    outcome.evaluation.f1_macro
                );
            }
            Ok(())
        }

        Commands::Annotate => {
            match pipeline::annotate(&config)? {
                Some(summary) => info!("{:?}", summary),
                None => info!("Annotation already present"),
            }
            Ok(())
        }

        Commands::Segment { split } => {
            for split in splits(*split) {
                if let Some(count) = pipeline::segment(&config, split)? {
                    info!("{}: {} segments", split, count);
                }
            }
            Ok(())
        }

        Commands::Represent { split } => {
            for split in splits(*split) {
                if let Some(shape) = pipeline::represent(&config, split)? {
                    info!("{}: {:?}", split, shape);
                }
            }
            Ok(())
        }

        Commands::Train => {
            let device = select_device(cli.cpu)?;
            let outcome = soundclass::training::train_model(&config, &device)?;
            println!(
                "{}: test accuracy {:.4}, f1 micro {:.4}, f1 macro {:.4}",
                outcome.run_dir.display(),
                outcome.evaluation.accuracy,
                outcome.evaluation.f1_micro,
                outcome.evaluation.f1_macro
            );
            Ok(())
        }

        Commands::Classify {
            run,
            files,
            metadata,
            top,
        } => {
            let device = select_device(cli.cpu)?;
            let classifier = Classifier::load(run, &device)?;
            let names = match metadata {
                Some(path) => class_names(path)?,
                None => HashMap::new(),
            };

            for file in files {
                let result = classifier.classify_file(file)?;
                println!("{} ({} segments)", file.display(), result.segments);
                for prediction in result.ranking.iter().take(*top) {
                    let name = names
                        .get(&prediction.label)
                        .cloned()
                        .unwrap_or_else(|| format!("label {}", prediction.label));
                    println!("  {:>6.2}%  {}", prediction.probability * 100.0, name);
                }
            }
            Ok(())
        }

        Commands::Info => {
            let yaml = serde_yaml::to_string(&config).context("Failed to render config")?;
            println!("{}", yaml);
            println!("annotated:    {}", config.annotated_dir().display());
            println!("segmentation: {}", config.segmentation_dir().display());
            println!("models:       {}", config.model_family_dir().display());
            Ok(())
        }
    }
}
