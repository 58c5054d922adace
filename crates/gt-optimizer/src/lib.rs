//! # gt-optimizer
//!
//! Hyperparameter search and sweep orchestration for Gridtune.
//!
//! Provides search space definitions, exhaustive grid enumeration, trial and
//! experiment tracking, the sweep driver (serial, or spread over a local
//! worker pool) and the results table.

mod dispatch;
mod report;
mod search;
mod sweep;
mod trial;

pub use dispatch::{TaskOutcome, TrialTask, WorkerAllocation};
pub use report::{FailedRow, ResultRow, ResultsTable};
pub use search::{Configuration, GridSearch, ParameterDef, ParameterKind, ParameterValue, SearchSpace};
pub use sweep::{Sweep, SweepReport, TrialRunner};
pub use trial::{
    ExperimentConfig, ExperimentId, ExperimentState, ExperimentStatus, ObjectiveDirection, Trial,
    TrialResult, TrialStatus, DEFAULT_ROUNDS,
};
