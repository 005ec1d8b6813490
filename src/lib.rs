//! Voice Coach - voice-driven AI coaching sessions
//!
//! This library runs the conversation pipeline of a coaching room:
//! - Speech recognition and silence-based utterance segmentation
//! - Topic-confined model replies with fallback and a shared dispatch lane
//! - Sentence-by-sentence speech synthesis and playback
//! - Room persistence in `SQLite`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   RecognitionSource (microphone │ forwarded client)  │
//! └────────────────────────┬─────────────────────────────┘
//!                          │ fragments
//! ┌────────────────────────▼─────────────────────────────┐
//! │  Session actor: segmenter ─► ModelGateway ─► speech  │
//! │                 transcript ─► SessionStore           │
//! └────────────────────────┬─────────────────────────────┘
//!                          │ DispatchLane (process-wide)
//! ┌────────────────────────▼─────────────────────────────┐
//! │   Chat backend  │  TTS service  │  STT service       │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod gateway;
pub mod session;
pub mod voice;

pub use catalog::{Catalog, CoachingMode, Persona};
pub use config::Config;
pub use conversation::{Conversation, Role, Turn};
pub use db::{DbConn, DbPool, Room, SessionStore, SqliteStore};
pub use error::{Error, Result};
pub use gateway::{ChatBackend, ModelGateway, OpenRouterBackend};
pub use session::{ConnectionState, SessionDeps, SessionHandle, SessionView, TurnState};
