//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (coordinator.rs):
//!     initialize_all → start_all: subsystem[0].start → subsystem[1].start → ...
//!     on failure at i: stop i-1 → ... → stop 0, return original error
//!
//! Per subsystem (supervisor.rs):
//!     start hooks in order → Running | Error
//!     stop hooks in reverse → Stopped (+ aggregated hook errors)
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → transports return
//!     → stop_all under a deadline token
//! ```
//!
//! # Design Decisions
//! - Ordered startup: leaves first, transports last (traffic only when ready)
//! - Hook sequencing is local to a supervisor; rollback across subsystems
//!   belongs to the coordinator
//! - Shutdown has a deadline: stop hooks still running when it fires are
//!   reported as failures

pub mod coordinator;
pub mod error;
pub mod shutdown;
pub mod signals;
pub mod state;
pub mod subsystem;
pub mod supervisor;

pub use coordinator::Coordinator;
pub use error::{HookError, LifecycleError, MultiError};
pub use shutdown::Shutdown;
pub use state::LifecycleState;
pub use subsystem::{Instrumented, ManagedSubsystem, SubsystemStatus};
pub use supervisor::Supervisor;
