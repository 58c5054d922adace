use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use gt_data::{BatchLoader, DataSource};
use gt_optimizer::Configuration;
use gt_types::GtResult;
use tracing::{debug, info};

use crate::model::ConvNet;
use crate::training::{evaluate, sgd, train, Hyperparameters, LoopSettings, SgdOptimizer};

/// Owned training state for one configuration: set up once, stepped
/// repeatedly. Nothing in here is shared with other trials.
pub struct Trainable<B: AutodiffBackend> {
    model: ConvNet<B>,
    optimizer: SgdOptimizer<B>,
    hyperparameters: Hyperparameters,
    train_loader: BatchLoader,
    test_loader: BatchLoader,
    settings: LoopSettings,
    device: B::Device,
    iteration: usize,
    history: Vec<f64>,
}

impl<B: AutodiffBackend> Trainable<B> {
    /// Validate hyperparameters, load the data and build a fresh model and
    /// optimizer.
    pub fn setup(
        configuration: &Configuration,
        source: &dyn DataSource,
        settings: &LoopSettings,
        seed: u64,
        device: &B::Device,
    ) -> GtResult<Self> {
        let hyperparameters = Hyperparameters::from_configuration(configuration)?;
        let split = source.load()?;
        debug!("Setting up trainable for {} on {:?}", configuration, split);

        let model = ConvNet::seeded(device, seed);
        let optimizer = sgd::<B>(hyperparameters.momentum);

        Ok(Self {
            model,
            optimizer,
            hyperparameters,
            train_loader: BatchLoader::shuffled(
                Arc::clone(&split.train),
                settings.batch_size,
                seed,
            ),
            test_loader: BatchLoader::sequential(Arc::clone(&split.test), settings.batch_size),
            settings: settings.clone(),
            device: device.clone(),
            iteration: 0,
            history: Vec::new(),
        })
    }

    /// One bounded training pass followed by one evaluation pass. Returns
    /// the evaluation accuracy.
    pub fn step(&mut self) -> f64 {
        let (model, stats) = train(
            self.model.clone(),
            &mut self.optimizer,
            &mut self.train_loader,
            self.hyperparameters.lr,
            self.settings.train_cap,
            &self.device,
        );
        self.model = model;

        let metric = evaluate(
            &self.model.valid(),
            &mut self.test_loader,
            self.settings.eval_cap,
            &self.device,
        );

        self.iteration += 1;
        self.history.push(metric);
        info!(
            "Iteration {}: mean_accuracy={:.4} (train loss {:.4})",
            self.iteration, metric, stats.mean_loss
        );
        metric
    }

    /// `rounds` steps; the metric of each.
    pub fn run(&mut self, rounds: usize) -> Vec<f64> {
        (0..rounds).map(|_| self.step()).collect()
    }

    /// Evaluate the current model without training it.
    pub fn evaluate(&mut self) -> f64 {
        evaluate(
            &self.model.valid(),
            &mut self.test_loader,
            self.settings.eval_cap,
            &self.device,
        )
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyperparameters
    }

    pub fn model(&self) -> &ConvNet<B> {
        &self.model
    }
}
