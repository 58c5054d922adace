//! # gt-engine
//!
//! Training engine for Gridtune: the convolutional classifier, bounded
//! train/evaluate passes, per-trial trainables, the sweep trial runner and
//! thread-owned trainer actors.

pub mod actor;
pub mod model;
pub mod runner;
pub mod settings;
pub mod trainable;
pub mod training;

pub use actor::{spawn_trainer, Actor, Reply};
pub use model::ConvNet;
pub use runner::ConvNetRunner;
pub use settings::{DataSourceKind, RunSettings};
pub use trainable::Trainable;
pub use training::{
    evaluate, evaluate_loss, nll_loss, sgd, train, Hyperparameters, LoopSettings, SgdOptimizer,
    TrainStats, EVAL_EXAMPLE_CAP, TRAIN_EXAMPLE_CAP,
};

/// CPU backend with reverse-mode autodiff, used by the binary.
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;
