//! JSON-RPC 2.0 request routing.
//!
//! The router is the request target handed to whichever transport is
//! serving. It owns its method table; nothing is registered globally.

pub mod methods;
pub mod router;
pub mod types;

pub use methods::register_builtin;
pub use router::Router;
pub use types::{Request, Response, RpcError};
