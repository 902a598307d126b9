//! Runtime supervision core for an MCP-style tool server.
//!
//! Subsystem lifecycles, the session pool and pluggable request transports.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod runtime;
pub mod session;
pub mod transport;

pub use config::schema::RuntimeConfig;
pub use http::HttpTransport;
pub use lifecycle::{Coordinator, Shutdown, Supervisor};
pub use runtime::{Runtime, RuntimeError};
pub use session::SessionStore;
pub use transport::TransportRegistry;
