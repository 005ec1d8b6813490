//! Error types for the coaching pipeline

use thiserror::Error;

use crate::voice::RecognitionErrorKind;

/// Result type alias for coaching pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing text for a model failure that is not a rate limit
pub const MODEL_UNAVAILABLE_MESSAGE: &str = "AI is currently unavailable. Please try again later.";

/// User-facing text once every model in the fallback list was rate limited
pub const RATE_LIMITED_MESSAGE: &str = "You have exceeded the free usage limit. \
     Please wait a moment or add credits to your model provider account.";

/// Errors that can occur in the coaching pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (including unknown coaching modes)
    #[error("configuration error: {0}")]
    Config(String),

    /// Persona not found in the catalog
    #[error("persona not found: {0}")]
    PersonaNotFound(String),

    /// Microphone access denied or no input device
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// Speech recognition failed
    #[error("recognition error: {}", .0.message())]
    Recognition(RecognitionErrorKind),

    /// Model call failed for a reason other than rate limiting
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Every model in the fallback chain was rate limited
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// A reply is already pending for this session
    #[error("a reply is already in flight for this session")]
    TurnInFlight,

    /// The session was ended and cannot be reconnected
    #[error("session already completed: {0}")]
    SessionCompleted(String),

    /// Speech synthesis service rejected the request
    #[error("synthesis error {status}: {body}")]
    Synthesis { status: u16, body: String },

    /// Text-to-speech error not tied to an HTTP status
    #[error("TTS error: {0}")]
    Tts(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Session actor is gone
    #[error("session closed")]
    SessionClosed,

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error belongs to the model-unavailable family
    #[must_use]
    pub const fn is_model_unavailable(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_) | Self::RateLimited(_))
    }

    /// Fixed message shown to the user for this error
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Permission(_) => "Microphone access denied".to_string(),
            Self::Recognition(kind) => kind.message().to_string(),
            Self::RateLimited(_) => RATE_LIMITED_MESSAGE.to_string(),
            Self::ModelUnavailable(_) => MODEL_UNAVAILABLE_MESSAGE.to_string(),
            Self::SessionCompleted(_) => "This session has already ended".to_string(),
            Self::Synthesis { .. } | Self::Tts(_) => {
                "Failed to generate speech. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}
