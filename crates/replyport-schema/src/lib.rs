//! Named JSON Schema validation.
//!
//! Schemas are keyed by name: either a call/event name, whose arguments
//! (as a JSON array) are checked before the handler runs, or a well-known
//! name such as [`PEER_IDENTITY`] for connect-time identity payloads.

pub mod config;
pub mod error;
pub mod registry;
pub mod validator;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::{SchemaRegistry, PEER_IDENTITY, PEER_IDENTITY_SCHEMA};
