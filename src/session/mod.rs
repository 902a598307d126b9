//! Session store subsystem.
//!
//! # Data Flow
//! ```text
//! RPC methods (session/*, workflow/status)
//!     → store.rs (get_or_create / update / list / delete)
//!     → model.rs (Session, computed status, summaries)
//!     → jobs.rs (job, tool execution and error bookkeeping via update)
//!
//! sweeper.rs (interval task while the "sessions" subsystem runs)
//!     → store.cleanup() removes expired sessions
//!
//! config watcher
//!     → store.set_limits() swaps TTL and capacity
//! ```

pub mod error;
pub mod jobs;
pub mod model;
pub mod store;
pub mod sweeper;

pub use error::SessionError;
pub use jobs::{ErrorRecord, JobInfo, JobStatus, ToolExecution, TrackingError};
pub use model::{Session, SessionFilter, SessionLimits, SessionStats, SessionStatus, SessionSummary, REPO_URL_KEY};
pub use store::SessionStore;
pub use sweeper::sweeper_supervisor;
