//! Bounded train and evaluate passes.

use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, Sgd, SgdConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use gt_data::{BatchLoader, BATCH_SIZE};
use gt_optimizer::Configuration;
use gt_types::{GtResult, TrialError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::ConvNet;

/// A training pass stops once more than this many examples were seen.
pub const TRAIN_EXAMPLE_CAP: usize = 512;
/// An evaluation pass stops once more than this many examples were seen.
pub const EVAL_EXAMPLE_CAP: usize = 256;

fn default_batch_size() -> usize {
    BATCH_SIZE
}

fn default_train_cap() -> usize {
    TRAIN_EXAMPLE_CAP
}

fn default_eval_cap() -> usize {
    EVAL_EXAMPLE_CAP
}

/// Batch size and per-pass example caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_train_cap")]
    pub train_cap: usize,
    #[serde(default = "default_eval_cap")]
    pub eval_cap: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            train_cap: TRAIN_EXAMPLE_CAP,
            eval_cap: EVAL_EXAMPLE_CAP,
        }
    }
}

/// The two tuned hyperparameters, checked before any training happens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparameters {
    pub lr: f64,
    pub momentum: f64,
}

impl Hyperparameters {
    pub fn new(lr: f64, momentum: f64) -> GtResult<Self> {
        if !lr.is_finite() || lr <= 0.0 {
            return Err(TrialError::InvalidHyperparameter {
                name: "lr".to_string(),
                value: lr.to_string(),
                message: "must be a finite value greater than zero".to_string(),
            }
            .into());
        }
        if !momentum.is_finite() || !(0.0..1.0).contains(&momentum) {
            return Err(TrialError::InvalidHyperparameter {
                name: "momentum".to_string(),
                value: momentum.to_string(),
                message: "must be in [0, 1)".to_string(),
            }
            .into());
        }
        Ok(Self { lr, momentum })
    }

    /// `lr` is required; `momentum` defaults to 0 (plain SGD).
    pub fn from_configuration(configuration: &Configuration) -> GtResult<Self> {
        let lr = configuration
            .get_f64("lr")
            .ok_or_else(|| TrialError::MissingHyperparameter {
                name: "lr".to_string(),
            })?;
        let momentum = configuration.get_f64("momentum").unwrap_or(0.0);
        Self::new(lr, momentum)
    }
}

pub type SgdOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, ConvNet<B>, B>;

/// SGD with classical momentum (no dampening, no Nesterov).
pub fn sgd<B: AutodiffBackend>(momentum: f64) -> SgdOptimizer<B> {
    let momentum = (momentum > 0.0).then(|| {
        MomentumConfig::new()
            .with_momentum(momentum)
            .with_dampening(0.0)
            .with_nesterov(false)
    });
    SgdConfig::new().with_momentum(momentum).init()
}

/// Mean negative log-likelihood of `targets` under `log_probs`.
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch] = targets.dims();
    log_probs
        .gather(1, targets.reshape([batch, 1]))
        .neg()
        .mean()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainStats {
    pub examples: usize,
    pub batches: usize,
    pub mean_loss: f64,
}

/// One bounded training pass: one optimizer step per batch until more than
/// `cap` examples have been processed.
pub fn train<B, O>(
    mut model: ConvNet<B>,
    optimizer: &mut O,
    loader: &mut BatchLoader,
    lr: f64,
    cap: usize,
    device: &B::Device,
) -> (ConvNet<B>, TrainStats)
where
    B: AutodiffBackend,
    O: Optimizer<ConvNet<B>, B>,
{
    let mut stats = TrainStats::default();
    let mut loss_sum = 0.0;
    let mut batches = loader.batches::<B>(device);

    while stats.examples <= cap {
        let Some(batch) = batches.next() else {
            break;
        };
        let n = batch.len();

        let output = model.forward(batch.images);
        let loss = nll_loss(output, batch.targets);
        loss_sum += loss.clone().into_scalar().elem::<f64>();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(lr, model, grads);

        stats.examples += n;
        stats.batches += 1;
    }

    if stats.batches > 0 {
        stats.mean_loss = loss_sum / stats.batches as f64;
    }
    debug!(
        "Trained on {} examples in {} batches, mean loss {:.4}",
        stats.examples, stats.batches, stats.mean_loss
    );
    (model, stats)
}

/// Fraction of correct top-1 predictions over at most `cap` (+ one batch)
/// evaluation examples. Takes the model by shared reference; pass
/// `model.valid()` to run without autodiff tracking.
pub fn evaluate<B: Backend>(
    model: &ConvNet<B>,
    loader: &mut BatchLoader,
    cap: usize,
    device: &B::Device,
) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;
    let mut batches = loader.batches::<B>(device);

    while total <= cap {
        let Some(batch) = batches.next() else {
            break;
        };
        let n = batch.len();

        let predictions = model.forward(batch.images).argmax(1).reshape([n]);
        let hits = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        correct += hits as usize;
        total += n;
    }

    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

/// Mean NLL over the same bounded evaluation pass as [`evaluate`].
pub fn evaluate_loss<B: Backend>(
    model: &ConvNet<B>,
    loader: &mut BatchLoader,
    cap: usize,
    device: &B::Device,
) -> f64 {
    let mut loss_sum = 0.0;
    let mut total = 0usize;
    let mut batches = loader.batches::<B>(device);

    while total <= cap {
        let Some(batch) = batches.next() else {
            break;
        };
        let n = batch.len();
        let loss = nll_loss(model.forward(batch.images), batch.targets);
        loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
        total += n;
    }

    if total == 0 {
        0.0
    } else {
        loss_sum / total as f64
    }
}
