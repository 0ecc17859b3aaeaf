//! Connection lifecycle states

use std::fmt;

/// Where a [`Connection`](super::Connection) is in its lifetime
///
/// ```text
/// Configured -> Handshaking -> Established -> ShuttingDown -> Closed
///                    |              |               |
///                    +--------------+---------------+--> Errored
/// ```
///
/// `Established` may also return to `Handshaking` on renegotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Configuration is still mutable, nothing has been sent
    Configured,
    /// The engine is exchanging handshake messages
    Handshaking,
    /// Application data may flow both ways
    Established,
    /// close_notify sent, waiting for the peer's
    ShuttingDown,
    /// Both close_notify alerts exchanged
    Closed,
    /// A fatal failure ended the connection
    Errored,
}

impl HandshakeState {
    /// No further progress is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Closed | HandshakeState::Errored)
    }

    /// The handshake has completed at least once
    pub fn is_established(self) -> bool {
        matches!(
            self,
            HandshakeState::Established | HandshakeState::ShuttingDown | HandshakeState::Closed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeState::Configured => "configured",
            HandshakeState::Handshaking => "handshaking",
            HandshakeState::Established => "established",
            HandshakeState::ShuttingDown => "shutting down",
            HandshakeState::Closed => "closed",
            HandshakeState::Errored => "errored",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
