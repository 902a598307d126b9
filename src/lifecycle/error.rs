//! Lifecycle error definitions.

use thiserror::Error;

use crate::lifecycle::state::LifecycleState;

/// Error produced by a start or stop hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while driving a subsystem's lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested operation is not valid in the current state.
    #[error("{subsystem}: cannot {operation} while {state}")]
    InvalidStateTransition {
        subsystem: String,
        operation: &'static str,
        state: LifecycleState,
    },

    /// A start or stop hook returned an error.
    #[error("{subsystem}: {phase} hook #{index} failed: {source}")]
    Hook {
        subsystem: String,
        phase: &'static str,
        index: usize,
        #[source]
        source: HookError,
    },

    /// The operation's cancellation token fired while a hook was running.
    #[error("{subsystem}: {phase} hook #{index} cancelled")]
    Cancelled {
        subsystem: String,
        phase: &'static str,
        index: usize,
    },

    /// Several failures collected during a stop pass.
    #[error(transparent)]
    Multi(#[from] MultiError),
}

/// Aggregate of every error observed during a stop pass.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<LifecycleError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: LifecycleError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[LifecycleError] {
        &self.errors
    }

    /// `Ok(())` when nothing was collected, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

impl FromIterator<LifecycleError> for MultiError {
    fn from_iter<I: IntoIterator<Item = LifecycleError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}
