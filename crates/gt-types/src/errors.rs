use thiserror::Error;

/// Main error type for Gridtune
#[derive(Error, Debug)]
pub enum GtError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Dataset and lock errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset split is empty: {split}")]
    EmptySplit { split: String },
}

/// Search space errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Parameter {name} has no candidate values")]
    EmptyCandidates { name: String },

    #[error("Parameter {name} is declared more than once")]
    DuplicateParameter { name: String },

    #[error("Parameter {name} has an invalid range: {message}")]
    InvalidRange { name: String, message: String },

    #[error("Search space has no parameters")]
    EmptySpace,
}

/// Trial execution errors
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Missing hyperparameter: {name}")]
    MissingHyperparameter { name: String },

    #[error("Invalid hyperparameter {name}={value}: {message}")]
    InvalidHyperparameter {
        name: String,
        value: String,
        message: String,
    },

    #[error("Metric out of range: {metric} (expected a value in [0, 1])")]
    MetricOutOfRange { metric: f64 },

    #[error("Trial {trial_number} failed: {message}")]
    ExecutionFailed { trial_number: usize, message: String },

    #[error("Trial runner returned no metrics")]
    NoMetrics,
}

/// Actor runtime errors
#[derive(Error, Debug)]
pub enum ActorError {
    #[error("Actor {name} failed to start: {message}")]
    StartFailed { name: String, message: String },

    #[error("Actor {name} has stopped")]
    Stopped { name: String },

    #[error("Failed to spawn actor thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for Gridtune operations
pub type GtResult<T> = Result<T, GtError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::GtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::GtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::GtError::Config(format!($($arg)*))
    };
}
