//! Mini-batch training loop with early stopping

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::models::{Perceptron, StandardScaler};
use crate::representation::RepresentationBundle;

/// Maps label values to contiguous class indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<i64>,
}

impl LabelEncoder {
    /// Classes are the sorted unique `labels`
    pub fn fit(labels: &[i64]) -> Self {
        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        Self { classes }
    }

    /// Label value of every class, in class order
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no class was seen
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class index of every label; unknown labels are an error
    pub fn encode(&self, labels: &[i64]) -> Result<Vec<u32>> {
        labels
            .iter()
            .map(|label| match self.classes.binary_search(label) {
                Ok(index) => Ok(index as u32),
                Err(_) => anyhow::bail!("Label {} does not occur in the training split", label),
            })
            .collect()
    }

    /// Label value of a class index
    pub fn decode(&self, class: u32) -> Option<i64> {
        self.classes.get(class as usize).copied()
    }
}

/// Scaled features and encoded targets of one split
pub struct SplitData {
    /// `[N, n_mfcc, frames]`
    pub features: Tensor,
    /// `[N]` class indices
    pub targets: Tensor,
    /// Same class indices on the host
    pub classes: Vec<u32>,
}

impl SplitData {
    /// Scale and encode a bundle
    pub fn new(
        bundle: &RepresentationBundle,
        encoder: &LabelEncoder,
        scaler: &StandardScaler,
        device: &Device,
    ) -> Result<Self> {
        let mut features = bundle.features.clone();
        scaler.transform(&mut features)?;
        let classes = encoder.encode(&bundle.labels)?;

        Ok(Self {
            features: Tensor::from_vec(features, bundle.shape.to_vec(), device)?,
            targets: Tensor::from_vec(classes.clone(), classes.len(), device)?,
            classes,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the split has no row
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Scores that may diverge: non-finite values are written as `null` and
/// read back as NaN
mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(f32::NAN))
    }
}

/// Scores of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Mean train loss
    #[serde(with = "non_finite")]
    pub loss: f32,
    /// Train accuracy
    #[serde(with = "non_finite")]
    pub accuracy: f32,
    /// Validation loss
    #[serde(with = "non_finite")]
    pub val_loss: f32,
    /// Validation accuracy
    #[serde(with = "non_finite")]
    pub val_accuracy: f32,
    /// Wall-clock seconds spent on the epoch
    pub duration: f64,
}

/// Per-epoch scores of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// One record per finished epoch
    pub epochs: Vec<EpochRecord>,
    /// Epoch with the lowest validation loss
    pub best_epoch: usize,
    /// Whether patience ran out
    pub stopped_early: bool,
    /// Whether the best epoch's weights were restored
    pub restored_best: bool,
}

impl History {
    /// Scores of the last epoch
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Total training seconds
    pub fn train_time(&self) -> f64 {
        self.epochs.iter().map(|e| e.duration).sum()
    }

    /// One column of the history
    pub fn series(&self, f: impl Fn(&EpochRecord) -> f32) -> Vec<f32> {
        self.epochs.iter().map(f).collect()
    }
}

/// Adam trainer over shuffled mini-batches
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    /// Create a trainer
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Train `model` (whose weights live in `varmap`) until the epoch limit or early stop
    pub fn fit(
        &self,
        model: &Perceptron,
        varmap: &VarMap,
        train: &SplitData,
        valid: &SplitData,
    ) -> Result<History> {
        if train.is_empty() {
            anyhow::bail!("Training split is empty");
        }

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(varmap.all_vars(), params)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let device = train.features.device().clone();

        let mut history = History::default();
        let mut best_loss = f32::INFINITY;
        let mut best_weights: Option<HashMap<String, Tensor>> = None;
        let mut wait = 0usize;

        for epoch in 0..self.config.epochs {
            let start = Instant::now();
            let mut order: Vec<u32> = (0..train.len() as u32).collect();
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0f32;
            let mut hits = 0.0f32;
            for batch in order.chunks(self.config.batch_size) {
                let index = Tensor::from_slice(batch, batch.len(), &device)?;
                let x = train.features.index_select(&index, 0)?;
                let y = train.targets.index_select(&index, 0)?;

                let logits = model.forward_t(&x, true)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &y)?;
                optimizer.backward_step(&loss)?;

                loss_sum += loss.to_scalar::<f32>()? * batch.len() as f32;
                hits += count_hits(&logits, &y)?;
            }

            let (val_loss, val_predictions) = evaluate(model, valid, self.config.batch_size)?;
            let record = EpochRecord {
                epoch,
                loss: loss_sum / train.len() as f32,
                accuracy: hits / train.len() as f32,
                val_loss,
                val_accuracy: super::metrics::accuracy(&valid.classes, &val_predictions),
                duration: start.elapsed().as_secs_f64(),
            };
            info!(
                "Epoch {}/{} - {:.2}s - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                epoch + 1,
                self.config.epochs,
                record.duration,
                record.loss,
                record.accuracy,
                record.val_loss,
                record.val_accuracy
            );
            history.epochs.push(record);

            if val_loss < best_loss {
                best_loss = val_loss;
                history.best_epoch = epoch;
                wait = 0;
                if self.config.restore_best {
                    best_weights = Some(snapshot(varmap)?);
                }
            } else {
                wait += 1;
                if wait >= self.config.patience {
                    info!(
                        "Early stopping at epoch {}: val_loss has not improved since epoch {}",
                        epoch + 1,
                        history.best_epoch + 1
                    );
                    history.stopped_early = true;
                    break;
                }
            }
        }

        if let Some(weights) = best_weights {
            debug!("Restoring weights of epoch {}", history.best_epoch + 1);
            restore(varmap, &weights)?;
            history.restored_best = true;
        }

        Ok(history)
    }
}

/// Mean loss and predicted class of every row of `data`
pub fn evaluate(model: &Perceptron, data: &SplitData, batch_size: usize) -> Result<(f32, Vec<u32>)> {
    if data.is_empty() {
        return Ok((f32::NAN, Vec::new()));
    }

    let mut loss_sum = 0.0f32;
    let mut predictions = Vec::with_capacity(data.len());
    let mut start = 0;
    while start < data.len() {
        let len = batch_size.min(data.len() - start);
        let x = data.features.narrow(0, start, len)?;
        let y = data.targets.narrow(0, start, len)?;

        let logits = model.forward_t(&x, false)?;
        let loss = candle_nn::loss::cross_entropy(&logits, &y)?;
        loss_sum += loss.to_scalar::<f32>()? * len as f32;
        predictions.extend(logits.argmax(D::Minus1)?.to_vec1::<u32>()?);

        start += len;
    }

    Ok((loss_sum / data.len() as f32, predictions))
}

fn count_hits(logits: &Tensor, targets: &Tensor) -> Result<f32> {
    let predicted = logits.argmax(D::Minus1)?;
    Ok(predicted
        .eq(targets)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?)
}

fn snapshot(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("Weight map lock poisoned"))?;
    data.iter()
        .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?)))
        .collect()
}

fn restore(varmap: &VarMap, weights: &HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("Weight map lock poisoned"))?;
    for (name, var) in data.iter() {
        if let Some(tensor) = weights.get(name) {
            var.set(tensor)?;
        }
    }
    Ok(())
}
