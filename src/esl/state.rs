use std::fmt;

/// Lifecycle of the single Event Socket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Authenticated, commands can be sent
    Connected,
    /// Authenticated and the event subscription is acknowledged
    Subscribed,
    /// The connection dropped and a retry loop owns recovery
    Reconnecting,
}

impl ConnectionState {
    /// Allowed edges of the state machine
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Reconnecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Reconnecting)
                | (Connected, Subscribed)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Subscribed, Disconnected)
                | (Subscribed, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }

    /// Whether commands may be written to the socket
    pub fn accepts_commands(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Subscribed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
