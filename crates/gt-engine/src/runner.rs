use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;
use gt_data::DataSource;
use gt_optimizer::{TrialRunner, TrialTask};
use gt_types::GtResult;
use tracing::info;

use crate::trainable::Trainable;
use crate::training::LoopSettings;

/// Runs sweep trials on [`ConvNet`](crate::model::ConvNet): a fresh model and
/// optimizer per trial, `task.rounds` train/evaluate rounds.
pub struct ConvNetRunner<B: AutodiffBackend> {
    source: Arc<dyn DataSource>,
    settings: LoopSettings,
    device: B::Device,
}

impl<B: AutodiffBackend> ConvNetRunner<B> {
    pub fn new(source: Arc<dyn DataSource>, settings: LoopSettings, device: B::Device) -> Self {
        Self {
            source,
            settings,
            device,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }
}

impl<B: AutodiffBackend> TrialRunner for ConvNetRunner<B> {
    fn run(&self, task: &TrialTask) -> GtResult<Vec<f64>> {
        info!(
            "Trial #{} on {}: {}",
            task.trial_number,
            self.source.name(),
            task.configuration
        );
        let mut trainable = Trainable::<B>::setup(
            &task.configuration,
            self.source.as_ref(),
            &self.settings,
            task.seed,
            &self.device,
        )?;
        Ok(trainable.run(task.rounds))
    }
}
