//! HTTP/JSON-RPC bridge transport.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request ID, trace, timeout, body limit)
//!     → rate_limit.rs (optional per-IP token bucket)
//!     → auth.rs (optional bearer API key; /health stays open)
//!     → handlers.rs
//!         POST /rpc    → request target (JSON-RPC router)
//!         GET /health  → coordinator health
//!         GET /status  → per-subsystem lifecycle status
//! ```

pub mod auth;
pub mod handlers;
pub mod rate_limit;
pub mod server;

pub use server::HttpTransport;
