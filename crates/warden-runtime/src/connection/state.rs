use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the data-store connection.
///
/// ```text
/// Disconnected --connect--> Connecting --ok--> Connected
///                           Connecting --err--> Error --retry--> Connecting
/// Connected --disconnect--> Disconnected
/// Connected --transport error--> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a supervisor may move from `self` to `next`.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Error, Connecting)
                | (Connected, Disconnected)
                | (Connected, Connected)
                | (Connected, Error)
                | (Disconnected, Connected)
                | (Error, Connected)
                | (_, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}
