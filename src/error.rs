//! Error Taxonomy
//!
//! Every fallible operation in the crate returns [`WorkflowError`]. The
//! variants follow the lifecycle of a workflow:
//!
//! - configuration problems surface from `check()` before any side effect
//! - missing observation data is fatal for the whole process
//! - anything raised inside a task is wrapped exactly once by the run loop
//!   as [`WorkflowError::StepExecution`]
//! - a malformed ledger line stops loading without touching the file

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("'{role}' is a required module for workflow '{workflow}'")]
    MissingRole { role: String, workflow: String },

    #[error("`stop_after` must name a task in {tasks:?}, got '{name}'")]
    StopAfterUnknown { name: String, tasks: Vec<String> },

    #[error("task '{0}' appears more than once in the task list")]
    DuplicateTask(String),

    #[error("unit '{unit}' found no observation data matching '{pattern}'")]
    MissingData { unit: String, pattern: String },

    #[error("task '{task}' failed: {source}")]
    StepExecution {
        task: String,
        #[source]
        source: Box<WorkflowError>,
    },

    #[error("{0}")]
    Step(String),

    #[error("unit '{unit}' failed during '{task}': {source}")]
    UnitFailed {
        unit: String,
        task: String,
        #[source]
        source: Box<WorkflowError>,
    },

    #[error("{path}:{line}: malformed ledger entry '{content}'")]
    LedgerParse {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse parameter file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to serialize configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Shorthand for a step-level failure message.
    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }

    /// Shorthand for a configuration failure message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Attaches a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Walks through step and unit wrappers to the error that caused them.
    pub fn root_cause(&self) -> &WorkflowError {
        match self {
            Self::StepExecution { source, .. } | Self::UnitFailed { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// True when the error must terminate the whole process rather than
    /// only the current task.
    pub fn is_fatal(&self) -> bool {
        matches!(self.root_cause(), Self::MissingData { .. })
    }

    /// True for errors raised by validation, before anything ran.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Configuration(_)
                | Self::MissingRole { .. }
                | Self::StopAfterUnknown { .. }
                | Self::DuplicateTask(_)
        )
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> u8 {
        if self.is_fatal() {
            3
        } else if self.is_configuration() {
            2
        } else if matches!(self.root_cause(), Self::LedgerParse { .. }) {
            4
        } else {
            1
        }
    }
}
