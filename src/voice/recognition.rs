//! Continuous speech recognition
//!
//! A [`RecognitionSource`] turns some capture backend into a stream of
//! [`RecognitionEvent`]s. The [`RecognitionAdapter`] owns one source per
//! session and makes `start`/`stop` safe to call in any order.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Sender half handed to a source when it starts
pub type EventSender = mpsc::UnboundedSender<RecognitionEvent>;

/// Receiver half read by the session
pub type EventReceiver = mpsc::UnboundedReceiver<RecognitionEvent>;

/// A piece of transcript from the recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    /// Final fragments are committed; interim ones only update the preview
    pub is_final: bool,
    /// Index of the recognition result this fragment belongs to
    pub result_index: usize,
}

impl Fragment {
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            result_index: 0,
        }
    }

    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            result_index: 0,
        }
    }

    #[must_use]
    pub const fn with_index(mut self, result_index: usize) -> Self {
        self.result_index = result_index;
        self
    }
}

/// Events emitted by a recognition source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Zero or more fragments from one native result
    Fragments(Vec<Fragment>),
    /// Recognition failed; the session is over
    Error(RecognitionErrorKind),
    /// The recognizer stopped on its own
    End,
}

/// Fixed vocabulary of recognition failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    Aborted,
    AudioCapture,
    NotAllowed,
    NoSpeech,
    Network,
    ServiceNotAllowed,
    LanguageNotSupported,
    BadGrammar,
    AudioBusy,
    Unknown,
}

impl RecognitionErrorKind {
    /// Map a platform error code onto the taxonomy
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "aborted" => Self::Aborted,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" => Self::NotAllowed,
            "no-speech" => Self::NoSpeech,
            "network" => Self::Network,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "language-not-supported" => Self::LanguageNotSupported,
            "bad-grammar" => Self::BadGrammar,
            "audio-busy" => Self::AudioBusy,
            _ => Self::Unknown,
        }
    }

    /// User-facing message
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Aborted => "Recognition stopped",
            Self::AudioCapture => "Microphone not available",
            Self::NotAllowed => "Microphone access denied",
            Self::NoSpeech => "No speech detected",
            Self::Network => "Network communication failed",
            Self::ServiceNotAllowed => "Service not allowed",
            Self::LanguageNotSupported => "Language not supported",
            Self::BadGrammar => "Invalid grammar",
            Self::AudioBusy => "Audio capture device is busy",
            Self::Unknown => "Recognition error occurred",
        }
    }
}

/// A capture backend producing recognition events
#[async_trait]
pub trait RecognitionSource: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Ask for access to the microphone
    ///
    /// Default implementation grants access (sources without a device).
    async fn request_permission(&mut self) -> Result<()> {
        Ok(())
    }

    /// Begin continuous recognition, delivering events on `events`
    async fn start(&mut self, events: EventSender) -> Result<()>;

    /// Stop recognition and release the device
    async fn stop(&mut self);
}

/// Owns the session's recognition source
///
/// Only one capture is active at a time. `stop` is idempotent and may be
/// called before `start`.
pub struct RecognitionAdapter {
    source: Box<dyn RecognitionSource>,
    active: bool,
}

impl RecognitionAdapter {
    #[must_use]
    pub fn new(source: Box<dyn RecognitionSource>) -> Self {
        Self {
            source,
            active: false,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Request microphone access from the source
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if access is denied
    pub async fn request_permission(&mut self) -> Result<()> {
        self.source.request_permission().await
    }

    /// Start capture; a no-op if already active
    ///
    /// # Errors
    ///
    /// Returns error if the source fails to start
    pub async fn start(&mut self, events: EventSender) -> Result<()> {
        if self.active {
            return Ok(());
        }

        self.source.start(events).await?;
        self.active = true;
        tracing::debug!(source = self.source.name(), "recognition started");
        Ok(())
    }

    /// Stop capture; safe to call repeatedly
    pub async fn stop(&mut self) {
        if !self.active {
            return;
        }

        self.active = false;
        self.source.stop().await;
        tracing::debug!(source = self.source.name(), "recognition stopped");
    }
}

/// Recognition events pushed by an external client
///
/// Used when recognition runs elsewhere (a browser recognizer forwarding its
/// results) or when input is typed. Events pushed while the source is not
/// started are dropped.
pub struct ForwardedSource {
    slot: Arc<Mutex<Option<EventSender>>>,
    deny_permission: bool,
}

/// Client side of a [`ForwardedSource`]
#[derive(Clone)]
pub struct ForwardHandle {
    slot: Arc<Mutex<Option<EventSender>>>,
}

impl ForwardedSource {
    #[must_use]
    pub fn new() -> (Self, ForwardHandle) {
        let slot = Arc::new(Mutex::new(None));
        let handle = ForwardHandle {
            slot: Arc::clone(&slot),
        };

        (
            Self {
                slot,
                deny_permission: false,
            },
            handle,
        )
    }

    /// Make `request_permission` fail, as a client reporting denied access
    #[must_use]
    pub const fn denying_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }
}

#[async_trait]
impl RecognitionSource for ForwardedSource {
    fn name(&self) -> &'static str {
        "forwarded"
    }

    async fn request_permission(&mut self) -> Result<()> {
        if self.deny_permission {
            return Err(crate::Error::Permission(
                "client reported microphone access denied".to_string(),
            ));
        }
        Ok(())
    }

    async fn start(&mut self, events: EventSender) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(events);
        Ok(())
    }

    async fn stop(&mut self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl ForwardHandle {
    /// Whether the session is currently listening
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Forward a final transcript fragment
    ///
    /// Returns false if the source is not listening.
    pub fn final_text(&self, text: &str) -> bool {
        self.send(RecognitionEvent::Fragments(vec![Fragment::final_text(text)]))
    }

    /// Forward an interim transcript fragment
    pub fn interim(&self, text: &str) -> bool {
        self.send(RecognitionEvent::Fragments(vec![Fragment::interim(text)]))
    }

    /// Forward a platform error code
    pub fn error(&self, code: &str) -> bool {
        self.send(RecognitionEvent::Error(RecognitionErrorKind::from_code(code)))
    }

    /// Forward end of recognition
    pub fn end(&self) -> bool {
        self.send(RecognitionEvent::End)
    }

    /// Forward a raw event
    pub fn send(&self, event: RecognitionEvent) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_messages() {
        assert_eq!(
            RecognitionErrorKind::from_code("no-speech").message(),
            "No speech detected"
        );
        assert_eq!(
            RecognitionErrorKind::from_code("audio-busy"),
            RecognitionErrorKind::AudioBusy
        );
        assert_eq!(
            RecognitionErrorKind::from_code("something-new").message(),
            "Recognition error occurred"
        );
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let (source, _handle) = ForwardedSource::new();
        let mut adapter = RecognitionAdapter::new(Box::new(source));

        adapter.stop().await;
        adapter.stop().await;
        assert!(!adapter.is_active());
    }

    #[tokio::test]
    async fn forwarded_events_reach_receiver_only_while_active() {
        let (source, handle) = ForwardedSource::new();
        let mut adapter = RecognitionAdapter::new(Box::new(source));
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(!handle.final_text("dropped"));

        adapter.start(tx.clone()).await.unwrap();
        // Second start is a no-op
        adapter.start(tx).await.unwrap();
        assert!(adapter.is_active());
        assert!(handle.final_text("hello"));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            RecognitionEvent::Fragments(vec![Fragment::final_text("hello")])
        );

        adapter.stop().await;
        assert!(!handle.is_listening());
        assert!(!handle.interim("late"));
    }

    #[tokio::test]
    async fn denied_permission_is_reported() {
        let (source, _handle) = ForwardedSource::new();
        let mut adapter = RecognitionAdapter::new(Box::new(source.denying_permission()));

        assert!(matches!(
            adapter.request_permission().await,
            Err(crate::Error::Permission(_))
        ));
    }
}
