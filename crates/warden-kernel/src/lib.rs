//! Warden kernel
//!
//! Shared vocabulary for the warden process host:
//! - [`handler`]: the pluggable unit model ([`HandlerUnit`]) and its validation rules
//! - [`hub`]: the host runtime's named-listener hub and transport notifications
//! - [`context`]: the runtime context handed to every handler invocation
//! - [`config`]: layered configuration loading

// handler module
pub mod handler;
pub use handler::*;

// host runtime
pub mod context;
pub mod hub;
pub use context::HostContext;
pub use hub::{EventHub, HandlerFailure, Listener, ListenerId, TransportEvent};

// config module
pub mod config;
pub use config::WardenConfig;
