//! Coaching session
//!
//! Each session runs as one actor task owning the connection state, the
//! segmenter and the transcript. Everything else talks to it through a
//! [`SessionHandle`] and watches it through [`SessionView`] snapshots.

mod actor;
mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::db::SessionStore;
use crate::gateway::ModelGateway;
use crate::voice::{AudioSink, RecognitionSource, SpeechSynthesizer};
use crate::{Error, Result};

pub use actor::CoachSession;
pub use state::{ConnectionState, SessionView, TurnState};

/// Shared services a session runs against
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn SessionStore>,
    pub gateway: Arc<ModelGateway>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<dyn AudioSink>,
    pub catalog: Arc<Catalog>,
    pub pipeline: PipelineConfig,
}

pub(crate) enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<()>),
    EndSession(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// Client side of a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Start a session for `room_id` listening through `source`
    ///
    /// # Errors
    ///
    /// Returns error if the room or its persona cannot be found, or the
    /// welcome turn cannot be saved
    pub async fn spawn(
        deps: SessionDeps,
        room_id: &str,
        source: Box<dyn RecognitionSource>,
    ) -> Result<Self> {
        CoachSession::spawn(deps, room_id, source).await
    }

    /// Request the microphone and start listening
    ///
    /// # Errors
    ///
    /// - `Error::Permission` if access was denied
    /// - `Error::SessionCompleted` if the session was ended
    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await?
    }

    /// Stop listening; pending replies still land in the transcript
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the actor is gone
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Disconnect and mark the room completed
    ///
    /// # Errors
    ///
    /// Returns error if the final save fails
    pub async fn end_session(&self) -> Result<()> {
        self.request(Command::EndSession).await?
    }

    /// Disconnect and stop the actor
    ///
    /// A reply still in flight is awaited and saved before the actor exits.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the actor is already gone
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    /// Current snapshot
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the actor stops first
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SessionView>
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut rx = self.view.clone();
        let view = rx.wait_for(predicate).await.map_err(|_| Error::SessionClosed)?;
        Ok(view.clone())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}
