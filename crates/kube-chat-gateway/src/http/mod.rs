//! HTTP gateway to the command-execution agent.

pub mod client;
pub mod protocol;

pub use client::HttpGateway;
pub use protocol::{CommandRequest, CommandResponse, classify};
