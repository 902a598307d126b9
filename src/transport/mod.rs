//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! main
//!     → registry.rs register("stdio" | "http", binding)
//!     → registry.start(ctx, selected, target)
//!         → binding.serve(ctx, target) until ctx is cancelled
//!             → target.handle(request) per request
//! ```
//!
//! # Design Decisions
//! - The registry is an explicitly constructed value, not a process global
//! - `serve` blocks for the transport's lifetime; cancellation is a normal end
//! - The request target is opaque to transports

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod error;
pub mod registry;
pub mod stdio;

pub use error::TransportError;
pub use registry::TransportRegistry;
pub use stdio::StdioTransport;

pub const TRANSPORT_STDIO: &str = "stdio";
pub const TRANSPORT_HTTP: &str = "http";
pub const KNOWN_TRANSPORTS: &[&str] = &[TRANSPORT_STDIO, TRANSPORT_HTTP];

/// Something that answers one serialized request.
///
/// Returns `None` when the request needs no reply (notifications).
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &str) -> Option<String>;
}

/// The opaque target every transport forwards requests to.
pub type HandlerTarget = Arc<dyn RequestHandler>;

/// A listener that serves requests until cancelled.
#[async_trait]
pub trait TransportBinding: Send + Sync {
    /// Serve until `ctx` is cancelled or the transport's input ends.
    async fn serve(&self, ctx: CancellationToken, target: HandlerTarget) -> Result<(), TransportError>;
}
