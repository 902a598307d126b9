//! Supervisor state machine.
//!
//! # States
//! ```text
//! Uninitialized → Initialized → Starting → Running → Stopping → Stopped
//!                                   │                    │
//!                                   └──────→ Error ←─────┘
//! ```
//!
//! # State Transitions
//! - `initialize`: Uninitialized → Initialized
//! - `start`: Initialized | Stopped → Starting → Running | Error
//! - `stop`: Running | Error → Stopping → Stopped
//!
//! `Stopped` is terminal only until the next `start`.

use serde::Serialize;

/// Lifecycle state of a supervised subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl LifecycleState {
    /// Whether `start` may be called from this state.
    pub fn can_start(self) -> bool {
        matches!(self, LifecycleState::Initialized | LifecycleState::Stopped)
    }

    /// Whether `stop` may be called from this state.
    pub fn can_stop(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Error)
    }

    /// Whether hooks may still be registered.
    pub fn accepts_hooks(self) -> bool {
        matches!(
            self,
            LifecycleState::Uninitialized | LifecycleState::Initialized
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
