//! Acquisition tasks: lifecycle, per-task sample buffers and the background
//! workers that fill them.

pub mod buffer;
pub mod manager;
pub mod state;
mod worker;

pub use buffer::{BackpressurePolicy, BufferStatus, SampleBuffer};
pub use manager::{TaskManager, TaskStatus};
pub use state::TaskState;

/// Task identifier; never reused, even after deletion
pub type TaskId = uuid::Uuid;
