//! Conversation turns and the single-pending-reply rule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Non-conversational marker, never sent to the model
    System,
}

impl Role {
    /// Wire name used in chat-completion requests
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Set while this turn is a placeholder awaiting the model
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            pending: false,
            timestamp: Utc::now(),
        }
    }

    /// Whether the turn should be part of model history
    #[must_use]
    pub fn is_conversational(&self) -> bool {
        self.role != Role::System && !self.pending
    }
}

/// Placeholder text shown while the model is thinking
pub const PLACEHOLDER_CONTENT: &str = "...";

/// Ordered turns of one coaching session
///
/// Append-only, except that the trailing pending placeholder is replaced
/// in place once its reply resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    #[must_use]
    pub const fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Turns with any unresolved placeholder left out
    #[must_use]
    pub fn settled_turns(&self) -> Vec<Turn> {
        self.turns.iter().filter(|t| !t.pending).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.turns.iter().any(|t| t.pending)
    }

    /// Drop placeholders whose reply can no longer arrive
    ///
    /// Returns how many were removed.
    pub fn discard_pending(&mut self) -> usize {
        let before = self.turns.len();
        self.turns.retain(|t| !t.pending);
        before - self.turns.len()
    }

    /// Append a non-pending turn
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append the user utterance and a pending assistant placeholder
    ///
    /// # Errors
    ///
    /// Returns `Error::TurnInFlight` if a placeholder is already pending
    pub fn begin_exchange(&mut self, utterance: &str) -> Result<()> {
        if self.has_pending() {
            return Err(Error::TurnInFlight);
        }

        self.turns.push(Turn::user(utterance));
        self.turns.push(Turn {
            pending: true,
            ..Turn::assistant(PLACEHOLDER_CONTENT)
        });
        Ok(())
    }

    /// Replace the pending placeholder with the resolved content
    ///
    /// Returns false if no placeholder was pending.
    pub fn resolve_pending(&mut self, content: impl Into<String>) -> bool {
        let Some(turn) = self.turns.iter_mut().rev().find(|t| t.pending) else {
            return false;
        };

        turn.content = content.into();
        turn.pending = false;
        turn.timestamp = Utc::now();
        true
    }
}

/// The most recent `limit` conversational turns of `turns`, oldest first
pub fn recent_history(turns: &[Turn], limit: usize) -> impl Iterator<Item = &Turn> {
    let conversational: Vec<&Turn> = turns.iter().filter(|t| t.is_conversational()).collect();
    let skip = conversational.len().saturating_sub(limit);
    conversational.into_iter().skip(skip)
}
