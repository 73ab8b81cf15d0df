//! Core abstractions for the multi-session agent chat client.
//!
//! This crate provides the fundamental building blocks:
//! - Data model (`Session`, `Message`, `SessionsState`)
//! - `DurableStore` and `CommandGateway` traits
//! - `ChatContext` - Explicit client settings
//! - `ViewStore` - Snapshot + broadcast of the observable view
//! - Provider configurations

pub mod clock;
pub mod command;
pub mod config;
pub mod context;
pub mod traits;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, Verb};
pub use config::{ActiveSettings, ApiConfig, ApiConfigForm, ConfigError, ConfigStore};
pub use context::ChatContext;
pub use traits::{
    ChangeFeed, CommandGateway, DurableStore, ErrorDetail, GatewayError, Message, MessageKind,
    Reply, Role, Session, SessionId, SessionsState, StoreChange, StoreError,
};
pub use view::{ChatView, Notice, ViewEvent, ViewStore};
