use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Configured,
    Running,
    Stopped,
    /// Hardware error or unacknowledged shutdown; awaiting cleanup
    Failed,
    Deleted,
}

impl TaskState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            // Normal lifecycle
            (Created, Configured) |
            (Configured, Running) |
            (Running, Stopped) |

            // Hardware error, then forced cleanup
            (Running, Failed) |
            (Failed, Stopped) |

            // Retirement from any non-running state
            (Created, Deleted) |
            (Configured, Deleted) |
            (Stopped, Deleted) |
            (Failed, Deleted)
        )
    }

    /// Whether the task still pins its driver against unloading
    pub fn holds_driver(&self) -> bool {
        !matches!(self, Self::Stopped | Self::Deleted)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Configured => "Configured",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
            Self::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
