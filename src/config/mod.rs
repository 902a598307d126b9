//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated)
//!     → overrides.rs (CLI flags win over the file)
//!     → consumed at startup by main
//!
//! When reload is enabled:
//!     watcher.rs detects change
//!     → loader.rs loads and validates the new file
//!     → the same CLI overrides are applied again
//!     → callback swaps the session pool limits
//! ```
//!
//! # Design Decisions
//! - Only session limits are hot-swappable; transport and lifecycle
//!   settings need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use overrides::Overrides;
pub use schema::{
    HttpConfig, LifecycleConfig, ObservabilityConfig, RateLimitConfig, ReloadConfig, RuntimeConfig,
    SessionConfig, StdioConfig, TransportConfig,
};
