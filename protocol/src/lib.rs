//! Shared wire types for the Sovereign RMM control plane.
//!
//! Both `rmm-server` and `rmm-agent` depend on this crate so the WebSocket
//! envelope and HTTP DTOs can never drift between the two sides of a
//! session.

pub mod caps;
pub mod domain;
pub mod error;
pub mod http;
pub mod message;

pub use domain::*;
pub use error::ProtocolError;
pub use http::*;
pub use message::WsMessage;
