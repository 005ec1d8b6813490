//! Session state published to observers

use std::fmt;

use crate::conversation::Turn;

/// What the coach is doing while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for the user to speak
    Idle,
    /// Fragments are arriving
    Listening,
    /// A reply is pending from the model
    Thinking,
    /// The reply is being played
    Speaking,
}

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Waiting on microphone permission
    Connecting,
    Connected(TurnState),
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Turn state, if connected
    #[must_use]
    pub const fn turn(self) -> Option<TurnState> {
        match self {
            Self::Connected(turn) => Some(turn),
            Self::Disconnected | Self::Connecting => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected(TurnState::Idle) => write!(f, "idle"),
            Self::Connected(TurnState::Listening) => write!(f, "listening"),
            Self::Connected(TurnState::Thinking) => write!(f, "thinking"),
            Self::Connected(TurnState::Speaking) => write!(f, "speaking"),
        }
    }
}

/// Snapshot of a session for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub room_id: String,
    pub topic: String,
    pub mode: String,
    pub persona: String,
    pub state: ConnectionState,
    pub conversation: Vec<Turn>,
    /// Live interim transcript
    pub preview: String,
    /// Banner shown until the next successful reply
    pub notice: Option<String>,
    pub last_error: Option<String>,
    pub completed: bool,
}

impl SessionView {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.conversation.iter().any(|t| t.pending)
    }

    /// Last turn of the transcript
    #[must_use]
    pub fn last_turn(&self) -> Option<&Turn> {
        self.conversation.last()
    }
}
