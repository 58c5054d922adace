//! Trial task descriptors and the local worker pool that executes them.

use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use gt_types::GtResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::search::Configuration;
use crate::trial::ExperimentId;

/// Describes a single trial to be executed by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialTask {
    /// Unique task id (matches the trial id).
    pub task_id: Uuid,

    /// Experiment this task belongs to.
    pub experiment_id: ExperimentId,

    /// Trial sequence number (0-indexed, enumeration order).
    pub trial_number: usize,

    /// Hyperparameters for this trial.
    pub configuration: Configuration,

    /// Train/evaluate rounds to run.
    pub rounds: usize,

    /// Seed for model initialization and shuffling.
    pub seed: u64,
}

/// What a worker reports back for one task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub trial_number: usize,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: GtResult<Vec<f64>>,
}

/// Allocation plan: a set of tasks and the number of local workers that
/// will share them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAllocation {
    /// Total number of worker threads to start.
    pub num_workers: usize,

    /// Task descriptors ready to dispatch.
    pub tasks: Vec<TrialTask>,
}

impl WorkerAllocation {
    /// Create an allocation for a batch of tasks.
    pub fn new(concurrency: usize, tasks: Vec<TrialTask>) -> Self {
        let num_workers = concurrency.max(1).min(tasks.len());
        Self { num_workers, tasks }
    }

    pub fn worker_name(index: usize) -> String {
        format!("worker-{index}")
    }

    /// Run every task on `num_workers` threads. Each worker pulls the next
    /// task from a shared queue, so the pool stays busy until the queue is
    /// drained. With `fail_fast`, tasks not yet started are skipped once any
    /// task fails. Outcomes are returned sorted by trial number.
    pub fn execute<F>(self, fail_fast: bool, work: F) -> Vec<TaskOutcome>
    where
        F: Fn(&TrialTask) -> GtResult<Vec<f64>> + Send + Sync,
    {
        let (task_tx, task_rx) = unbounded::<TrialTask>();
        let (outcome_tx, outcome_rx) = unbounded::<TaskOutcome>();

        for task in self.tasks {
            // Receiver is alive until the scope below ends.
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let aborted = AtomicBool::new(false);
        let work = &work;
        let aborted = &aborted;

        std::thread::scope(|scope| {
            for index in 0..self.num_workers {
                let task_rx = task_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let worker_id = Self::worker_name(index);

                scope.spawn(move || {
                    for task in task_rx.iter() {
                        if aborted.load(Ordering::SeqCst) {
                            debug!("{worker_id} skipping trial {}", task.trial_number);
                            continue;
                        }

                        debug!("{worker_id} running trial {}", task.trial_number);
                        let started_at = Utc::now();
                        let metrics = work(&task);
                        let finished_at = Utc::now();

                        if let Err(e) = &metrics {
                            warn!("{worker_id}: trial {} failed: {}", task.trial_number, e);
                            if fail_fast {
                                aborted.store(true, Ordering::SeqCst);
                            }
                        }

                        let _ = outcome_tx.send(TaskOutcome {
                            trial_number: task.trial_number,
                            worker_id: worker_id.clone(),
                            started_at,
                            finished_at,
                            metrics,
                        });
                    }
                });
            }
        });
        drop(outcome_tx);

        let mut outcomes: Vec<TaskOutcome> = outcome_rx.iter().collect();
        outcomes.sort_by_key(|o| o.trial_number);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_types::TrialError;
    use std::collections::HashSet;

    fn tasks(n: usize) -> Vec<TrialTask> {
        let experiment_id = Uuid::new_v4();
        (0..n)
            .map(|i| TrialTask {
                task_id: Uuid::new_v4(),
                experiment_id,
                trial_number: i,
                configuration: Configuration::new().with("lr", 0.01 * (i + 1) as f64),
                rounds: 2,
                seed: i as u64,
            })
            .collect()
    }

    #[test]
    fn worker_allocation_caps_at_task_count() {
        let alloc = WorkerAllocation::new(10, tasks(3));
        assert_eq!(alloc.num_workers, 3); // capped at task count
        assert_eq!(alloc.tasks.len(), 3);

        let alloc = WorkerAllocation::new(0, tasks(3));
        assert_eq!(alloc.num_workers, 1);
    }

    #[test]
    fn execute_runs_every_task_once_in_order() {
        let alloc = WorkerAllocation::new(4, tasks(9));
        let outcomes = alloc.execute(true, |task| Ok(vec![task.trial_number as f64 / 10.0]));

        assert_eq!(outcomes.len(), 9);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.trial_number, i);
            assert_eq!(outcome.metrics.as_ref().unwrap(), &vec![i as f64 / 10.0]);
            assert!(outcome.finished_at >= outcome.started_at);
        }

        let workers: HashSet<&str> = outcomes.iter().map(|o| o.worker_id.as_str()).collect();
        assert!(!workers.is_empty() && workers.len() <= 4);
    }

    #[test]
    fn execute_without_fail_fast_keeps_going() {
        let alloc = WorkerAllocation::new(2, tasks(6));
        let outcomes = alloc.execute(false, |task| {
            if task.trial_number == 1 {
                Err(TrialError::NoMetrics.into())
            } else {
                Ok(vec![0.5])
            }
        });
        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes.iter().filter(|o| o.metrics.is_err()).count(), 1);
    }

    #[test]
    fn execute_fail_fast_skips_pending_tasks() {
        let alloc = WorkerAllocation::new(1, tasks(5));
        let outcomes = alloc.execute(true, |task| {
            if task.trial_number == 0 {
                Err(TrialError::NoMetrics.into())
            } else {
                Ok(vec![0.5])
            }
        });
        // Single worker: the failure on trial 0 stops everything after it.
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].metrics.is_err());
    }

    #[test]
    fn task_descriptor_serialization() {
        let task = tasks(1).remove(0);
        let json = serde_json::to_string(&task).unwrap();
        let back: TrialTask = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }
}
