//! Trial tracking and experiment run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::{Configuration, SearchSpace};

/// Unique experiment identifier.
pub type ExperimentId = Uuid;

/// Number of train/evaluate rounds per trial.
pub const DEFAULT_ROUNDS: usize = 10;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// True if `candidate` is strictly better than `incumbent`.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }
}

fn default_rounds() -> usize {
    DEFAULT_ROUNDS
}

fn default_concurrency() -> usize {
    1
}

fn default_grid_steps() -> usize {
    5
}

fn default_fail_fast() -> bool {
    true
}

/// Top-level configuration for a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: ExperimentId,
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// The hyperparameter search space.
    pub search_space: SearchSpace,

    /// Train/evaluate rounds per trial.
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// How many trials to run at once. 1 runs the sweep serially.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Metric name reported in the results table.
    #[serde(default = "ExperimentConfig::default_metric")]
    pub objective_metric: String,

    /// Direction of optimization.
    #[serde(default)]
    pub direction: ObjectiveDirection,

    /// Number of steps per continuous dimension for the grid.
    #[serde(default = "default_grid_steps")]
    pub grid_steps: usize,

    /// Base seed; each trial derives its own from this and its number.
    #[serde(default)]
    pub seed: u64,

    /// Abort the sweep on the first failed trial.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ExperimentConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            search_space,
            rounds: DEFAULT_ROUNDS,
            concurrency: 1,
            objective_metric: Self::default_metric(),
            direction: ObjectiveDirection::Maximize,
            grid_steps: 5,
            seed: 0,
            fail_fast: true,
            created_at: Utc::now(),
        }
    }

    fn default_metric() -> String {
        "mean_accuracy".to_string()
    }

    pub fn with_rounds(mut self, n: usize) -> Self {
        self.rounds = n;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.objective_metric = metric.to_string();
        self.direction = direction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Lifecycle state for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub id: ExperimentId,
    pub config: ExperimentConfig,
    pub state: ExperimentState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExperimentStatus {
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: ExperimentState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = ExperimentState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = ExperimentState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = ExperimentState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Fold a finished trial into the counters and the best-so-far.
    pub fn record(&mut self, trial: &Trial) {
        match (&trial.status, &trial.result) {
            (TrialStatus::Completed, Some(result)) => {
                self.trials_completed += 1;
                self.update_best(result);
            }
            (TrialStatus::Failed, _) => self.trials_failed += 1,
            _ => {}
        }
    }

    /// Update the best trial if `result` improves on the current best.
    pub fn update_best(&mut self, result: &TrialResult) {
        let dominated = match &self.best_trial {
            None => true,
            Some(current_best) => self
                .config
                .direction
                .improves(result.objective, current_best.objective),
        };
        if dominated {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one configuration trained and evaluated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub experiment_id: ExperimentId,
    pub trial_number: usize,
    pub configuration: Configuration,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        experiment_id: ExperimentId,
        trial_number: usize,
        configuration: Configuration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_id,
            trial_number,
            configuration,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Seconds between start and finish, when both are known.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let finished = self.finished_at.unwrap_or_else(Utc::now);
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    /// Final-round metric.
    pub objective: f64,
    /// Metric from every round, in order.
    pub history: Vec<f64>,
    pub configuration: Configuration,
    pub duration_seconds: Option<f64>,
}
