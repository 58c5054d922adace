//! The sweep driver: enumerate the grid, run one trial per configuration,
//! collect results.

use chrono::{DateTime, Utc};
use gt_types::{validation_error, GtResult, TrialError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{TrialTask, WorkerAllocation};
use crate::report::ResultsTable;
use crate::search::GridSearch;
use crate::trial::{ExperimentConfig, ExperimentStatus, Trial, TrialResult};

/// Executes one trial: builds a fresh model for `task.configuration`, runs
/// `task.rounds` train/evaluate rounds and returns the metric of each round.
pub trait TrialRunner: Send + Sync {
    fn run(&self, task: &TrialTask) -> GtResult<Vec<f64>>;
}

impl<F> TrialRunner for F
where
    F: Fn(&TrialTask) -> GtResult<Vec<f64>> + Send + Sync,
{
    fn run(&self, task: &TrialTask) -> GtResult<Vec<f64>> {
        self(task)
    }
}

/// Everything a finished sweep produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub status: ExperimentStatus,
    /// All trials in enumeration order.
    pub trials: Vec<Trial>,
}

impl SweepReport {
    pub fn results(&self) -> Vec<&TrialResult> {
        self.trials.iter().filter_map(|t| t.result.as_ref()).collect()
    }

    pub fn table(&self) -> ResultsTable {
        ResultsTable::from_report(self)
    }

    pub fn to_json(&self) -> GtResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Exhaustive grid sweep over an experiment's search space.
#[derive(Debug, Clone)]
pub struct Sweep {
    config: ExperimentConfig,
}

impl Sweep {
    pub fn new(config: ExperimentConfig) -> GtResult<Self> {
        config.search_space.validate()?;
        if config.rounds == 0 {
            return Err(validation_error!("rounds must be at least 1"));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// One task per grid point, numbered in enumeration order.
    pub fn tasks(&self) -> Vec<TrialTask> {
        GridSearch::new(&self.config.search_space, self.config.grid_steps)
            .enumerate()
            .map(|(trial_number, configuration)| TrialTask {
                task_id: Uuid::new_v4(),
                experiment_id: self.config.id,
                trial_number,
                configuration,
                rounds: self.config.rounds,
                seed: self.config.seed.wrapping_add(trial_number as u64),
            })
            .collect()
    }

    /// Run every trial. Serial unless `concurrency > 1`.
    ///
    /// With `fail_fast` the first failed trial aborts the sweep and its error
    /// is returned; otherwise failures are recorded on the trial and the
    /// sweep carries on.
    pub fn run<R>(&self, runner: &R) -> GtResult<SweepReport>
    where
        R: TrialRunner + ?Sized,
    {
        let tasks = self.tasks();
        let mut status = ExperimentStatus::new(self.config.clone());
        status.mark_running();

        info!(
            "Starting sweep '{}' with {} trials ({} rounds each, concurrency {})",
            self.config.name,
            tasks.len(),
            self.config.rounds,
            self.config.concurrency
        );

        let trials = if self.config.concurrency <= 1 {
            self.run_serial(tasks, runner, &mut status)
        } else {
            self.run_parallel(tasks, runner, &mut status)
        };

        let trials = match trials {
            Ok(trials) => trials,
            Err(e) => {
                status.mark_failed(e.to_string());
                return Err(e);
            }
        };

        status.mark_completed();
        info!(
            "Sweep '{}' finished: {} completed, {} failed",
            self.config.name, status.trials_completed, status.trials_failed
        );
        if let Some(best) = &status.best_trial {
            info!(
                "Best trial #{} ({}): {} = {:.4}",
                best.trial_number, best.configuration, self.config.objective_metric, best.objective
            );
        }

        Ok(SweepReport { status, trials })
    }

    fn run_serial<R>(
        &self,
        tasks: Vec<TrialTask>,
        runner: &R,
        status: &mut ExperimentStatus,
    ) -> GtResult<Vec<Trial>>
    where
        R: TrialRunner + ?Sized,
    {
        let mut trials = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut trial = self.new_trial(&task);
            trial.mark_running(None);
            info!("Trial #{}: {}", task.trial_number, task.configuration);

            let metrics = runner.run(&task);
            let started_at = trial.started_at.unwrap_or_else(Utc::now);
            self.finish_trial(&mut trial, metrics, started_at, Utc::now())?;
            status.record(&trial);
            trials.push(trial);
        }
        Ok(trials)
    }

    fn run_parallel<R>(
        &self,
        tasks: Vec<TrialTask>,
        runner: &R,
        status: &mut ExperimentStatus,
    ) -> GtResult<Vec<Trial>>
    where
        R: TrialRunner + ?Sized,
    {
        let pending: Vec<Trial> = tasks.iter().map(|task| self.new_trial(task)).collect();
        let allocation = WorkerAllocation::new(self.config.concurrency, tasks);
        info!("Dispatching trials to {} workers", allocation.num_workers);

        let outcomes = allocation.execute(self.config.fail_fast, |task| runner.run(task));

        let mut trials = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let mut trial = pending[outcome.trial_number].clone();
            trial.mark_running(Some(outcome.worker_id));
            self.finish_trial(
                &mut trial,
                outcome.metrics,
                outcome.started_at,
                outcome.finished_at,
            )?;
            status.record(&trial);
            trials.push(trial);
        }
        Ok(trials)
    }

    fn new_trial(&self, task: &TrialTask) -> Trial {
        let mut trial = Trial::new(task.experiment_id, task.trial_number, task.configuration.clone());
        trial.id = task.task_id;
        trial
    }

    /// Validate the runner's metrics and close out the trial. Returns an
    /// error only when the failure should abort the sweep.
    fn finish_trial(
        &self,
        trial: &mut Trial,
        metrics: GtResult<Vec<f64>>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> GtResult<()> {
        let checked = metrics.and_then(|history| {
            let objective = *history.last().ok_or(TrialError::NoMetrics)?;
            if let Some(bad) = history
                .iter()
                .find(|m| !m.is_finite() || **m < 0.0 || **m > 1.0)
            {
                return Err(TrialError::MetricOutOfRange { metric: *bad }.into());
            }
            Ok((objective, history))
        });

        trial.started_at = Some(started_at);
        match checked {
            Ok((objective, history)) => {
                let duration = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
                info!(
                    "Trial #{} completed: {} = {:.4} ({:.1}s)",
                    trial.trial_number, self.config.objective_metric, objective, duration
                );
                trial.mark_completed(TrialResult {
                    trial_id: trial.id,
                    trial_number: trial.trial_number,
                    objective,
                    history,
                    configuration: trial.configuration.clone(),
                    duration_seconds: Some(duration),
                });
                trial.finished_at = Some(finished_at);
                Ok(())
            }
            Err(e) => {
                warn!("Trial #{} ({}) failed: {}", trial.trial_number, trial.configuration, e);
                trial.mark_failed(e.to_string());
                trial.finished_at = Some(finished_at);
                if self.config.fail_fast {
                    Err(TrialError::ExecutionFailed {
                        trial_number: trial.trial_number,
                        message: e.to_string(),
                    }
                    .into())
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Configuration, SearchSpace};
    use crate::trial::{ExperimentState, TrialStatus};
    use gt_types::GtError;
    use std::sync::Mutex;

    fn lr_momentum_space() -> SearchSpace {
        SearchSpace::new()
            .add_values("lr", vec![0.001, 0.01, 0.1])
            .add_values("momentum", vec![0.001, 0.01, 0.1, 0.9])
    }

    /// Deterministic stand-in for training: metric grows with lr and momentum.
    fn fake_runner(task: &TrialTask) -> GtResult<Vec<f64>> {
        let lr = task.configuration.get_f64("lr").unwrap();
        let momentum = task.configuration.get_f64("momentum").unwrap();
        let final_metric = (lr * 5.0 + momentum * 0.5).min(1.0);
        Ok((1..=task.rounds)
            .map(|r| final_metric * r as f64 / task.rounds as f64)
            .collect())
    }

    #[test]
    fn sweep_runs_twelve_trials() {
        let config = ExperimentConfig::new("lr_momentum", lr_momentum_space());
        let sweep = Sweep::new(config).unwrap();
        let report = sweep.run(&fake_runner).unwrap();

        assert_eq!(report.trials.len(), 12);
        assert_eq!(report.results().len(), 12);
        for result in report.results() {
            assert!((0.0..=1.0).contains(&result.objective));
            assert_eq!(result.history.len(), 10);
            assert_eq!(result.objective, *result.history.last().unwrap());
        }
        assert_eq!(report.status.state, ExperimentState::Completed);
        assert_eq!(report.status.trials_completed, 12);

        let best = report.status.best_trial.as_ref().unwrap();
        assert_eq!(best.configuration.get_f64("lr"), Some(0.1));
        assert_eq!(best.configuration.get_f64("momentum"), Some(0.9));
    }

    #[test]
    fn sweep_is_serial_and_in_order_by_default() {
        let seen = Mutex::new(Vec::new());
        let runner = |task: &TrialTask| -> GtResult<Vec<f64>> {
            seen.lock().unwrap().push(task.trial_number);
            Ok(vec![0.5])
        };
        let config = ExperimentConfig::new("order", lr_momentum_space()).with_rounds(1);
        Sweep::new(config).unwrap().run(&runner).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_sweep_matches_serial() {
        let serial = Sweep::new(ExperimentConfig::new("serial", lr_momentum_space()))
            .unwrap()
            .run(&fake_runner)
            .unwrap();
        let parallel = Sweep::new(
            ExperimentConfig::new("parallel", lr_momentum_space()).with_concurrency(4),
        )
        .unwrap()
        .run(&fake_runner)
        .unwrap();

        assert_eq!(parallel.trials.len(), 12);
        for (a, b) in serial.trials.iter().zip(&parallel.trials) {
            assert_eq!(a.trial_number, b.trial_number);
            assert_eq!(a.configuration, b.configuration);
            assert_eq!(
                a.result.as_ref().unwrap().objective,
                b.result.as_ref().unwrap().objective
            );
            assert!(b.worker_id.as_deref().unwrap().starts_with("worker-"));
        }
    }

    #[test]
    fn fail_fast_aborts_sweep() {
        let runner = |task: &TrialTask| -> GtResult<Vec<f64>> {
            if task.trial_number == 2 {
                Err(TrialError::NoMetrics.into())
            } else {
                Ok(vec![0.5])
            }
        };
        let config = ExperimentConfig::new("abort", lr_momentum_space());
        let err = Sweep::new(config).unwrap().run(&runner).unwrap_err();
        match err {
            GtError::Trial(TrialError::ExecutionFailed { trial_number, .. }) => {
                assert_eq!(trial_number, 2)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn isolated_failures_are_recorded() {
        let runner = |task: &TrialTask| -> GtResult<Vec<f64>> {
            if task.configuration.get_f64("momentum") == Some(0.9) {
                Ok(vec![1.5]) // out of range
            } else {
                Ok(vec![0.25])
            }
        };
        let config = ExperimentConfig::new("isolate", lr_momentum_space()).with_fail_fast(false);
        let report = Sweep::new(config).unwrap().run(&runner).unwrap();

        assert_eq!(report.trials.len(), 12);
        assert_eq!(report.status.trials_failed, 3);
        assert_eq!(report.status.trials_completed, 9);
        let failed: Vec<&Trial> = report
            .trials
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
            .collect();
        assert!(failed
            .iter()
            .all(|t| t.error.as_deref().unwrap().contains("out of range")));
    }

    #[test]
    fn empty_metrics_fail_the_trial() {
        let runner = |_: &TrialTask| -> GtResult<Vec<f64>> { Ok(Vec::new()) };
        let space = SearchSpace::new().add_values("lr", vec![0.1]);
        let config = ExperimentConfig::new("empty", space).with_fail_fast(false);
        let report = Sweep::new(config).unwrap().run(&runner).unwrap();
        assert_eq!(report.trials[0].status, TrialStatus::Failed);
    }

    #[test]
    fn invalid_space_is_rejected_up_front() {
        let space = SearchSpace::new().add_values("lr", vec![]);
        assert!(Sweep::new(ExperimentConfig::new("bad", space)).is_err());

        let zero_rounds = ExperimentConfig::new("bad", lr_momentum_space()).with_rounds(0);
        assert!(Sweep::new(zero_rounds).is_err());
    }

    #[test]
    fn tasks_carry_rounds_and_seeds() {
        let config = ExperimentConfig::new("seeds", lr_momentum_space())
            .with_rounds(3)
            .with_seed(100);
        let tasks = Sweep::new(config).unwrap().tasks();
        assert_eq!(tasks.len(), 12);
        assert!(tasks.iter().all(|t| t.rounds == 3));
        assert_eq!(tasks[0].seed, 100);
        assert_eq!(tasks[11].seed, 111);
        assert_eq!(
            tasks[5].configuration,
            Configuration::new().with("lr", 0.01).with("momentum", 0.01)
        );
    }

    #[test]
    fn report_serializes() {
        let space = SearchSpace::new().add_values("lr", vec![0.1, 0.2]);
        let config = ExperimentConfig::new("json", space).with_rounds(2);
        let runner = |_: &TrialTask| -> GtResult<Vec<f64>> { Ok(vec![0.1, 0.2]) };
        let report = Sweep::new(config).unwrap().run(&runner).unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"trials\""));
        let back: SweepReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trials.len(), 2);
    }
}
