//! Remote command gateway for the agent chat client.
//!
//! Provides:
//! - Command parsing and the catalog of known verbs
//! - Stored credential handling
//! - HTTP gateway (feature `http`)

pub mod auth;
pub mod command;
#[cfg(feature = "http")]
pub mod http;

pub use auth::Credentials;
pub use command::{CATALOG, CommandSpec, ValidationError, parse_command, spec_for, suggestions};
#[cfg(feature = "http")]
pub use http::HttpGateway;
