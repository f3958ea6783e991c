//! Error taxonomy for the driver registry, discovery and task manager.
//!
//! `DaqError` is returned by every core operation. Driver adapters themselves
//! report failures as `anyhow::Error`; those are folded into
//! [`DaqError::DriverLoad`] or [`DaqError::Hardware`] at the registry and
//! worker boundaries so that the façade only ever sees this one type.
//!
//! [`DaqError::kind`] collapses the variants into the coarse classes a
//! transport layer maps onto status codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{TaskId, TaskState};
use crate::validation::ValidationErrors;

/// Convenience alias for results using the core error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Driver '{0}' is not known to the registry")]
    DriverNotFound(String),

    #[error("Failed to load driver '{driver}': {reason}")]
    DriverLoad { driver: String, reason: String },

    #[error("Driver '{driver}' is busy: {active_tasks} task(s) still reference its devices")]
    DriverBusy { driver: String, active_tasks: usize },

    #[error("Driver '{0}' is not loaded")]
    DriverNotLoaded(String),

    #[error("Device '{device}' not found on driver '{driver}'")]
    DeviceNotFound { driver: String, device: String },

    #[error("Device '{device}' on driver '{driver}' is in use by running task {task}")]
    DeviceBusy {
        driver: String,
        device: String,
        task: TaskId,
    },

    #[error("Device '{device}' does not support {task_type} tasks")]
    UnsupportedTaskType { device: String, task_type: String },

    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Cannot {operation} task {task} in state {state}")]
    InvalidState {
        task: TaskId,
        state: TaskState,
        operation: &'static str,
    },

    #[error("Invalid task parameters: {0}")]
    Validation(ValidationErrors),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Task {task} did not acknowledge shutdown within {waited_ms} ms")]
    ShutdownTimeout { task: TaskId, waited_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classes exposed to the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    InvalidState,
    Hardware,
    Timeout,
    Config,
}

impl DaqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DriverNotFound(_)
            | Self::DeviceNotFound { .. }
            | Self::UnsupportedTaskType { .. }
            | Self::TaskNotFound(_) => ErrorKind::NotFound,
            Self::DriverBusy { .. } | Self::DeviceBusy { .. } | Self::DriverNotLoaded(_) => {
                ErrorKind::Conflict
            }
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::DriverLoad { .. } | Self::Hardware(_) => ErrorKind::Hardware,
            Self::ShutdownTimeout { .. } => ErrorKind::Timeout,
            Self::Config(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Config,
        }
    }

    /// Wrap an adapter failure, keeping the whole context chain.
    pub(crate) fn hardware(err: anyhow::Error) -> Self {
        Self::Hardware(format!("{err:#}"))
    }
}

impl From<ValidationErrors> for DaqError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}
