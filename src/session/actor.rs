//! Session actor loop

use std::sync::Arc;

use futures::future::OptionFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::state::{ConnectionState, SessionView, TurnState};
use super::{Command, SessionDeps, SessionHandle};
use crate::conversation::{Conversation, Turn};
use crate::db::Room;
use crate::error::RATE_LIMITED_MESSAGE;
use crate::voice::{
    EventReceiver, EventSender, RecognitionAdapter, RecognitionEvent, RecognitionSource,
    SpeakOutcome, SpeechDispatcher, UtteranceSegmenter,
};
use crate::{Error, Result};

/// Bounded so a stalled actor pushes back on callers
const COMMAND_BUFFER: usize = 16;

/// The state machine behind a [`SessionHandle`]
pub struct CoachSession {
    deps: SessionDeps,
    room: Room,
    voice_id: Option<String>,
    conversation: Conversation,
    state: ConnectionState,
    notice: Option<String>,
    last_error: Option<String>,

    segmenter: UtteranceSegmenter,
    adapter: RecognitionAdapter,
    events_tx: EventSender,
    events_rx: EventReceiver,

    speech: Arc<SpeechDispatcher>,
    replies_tx: mpsc::UnboundedSender<Result<String>>,
    replies_rx: mpsc::UnboundedReceiver<Result<String>>,
    spoken_tx: mpsc::UnboundedSender<SpeakOutcome>,
    spoken_rx: mpsc::UnboundedReceiver<SpeakOutcome>,

    commands: mpsc::Receiver<Command>,
    view_tx: watch::Sender<SessionView>,
}

impl CoachSession {
    /// Load the room, inject the welcome turn if needed and start the actor
    ///
    /// # Errors
    ///
    /// Returns error if the room or persona is unknown or the save fails
    pub async fn spawn(
        deps: SessionDeps,
        room_id: &str,
        source: Box<dyn RecognitionSource>,
    ) -> Result<SessionHandle> {
        let room = deps.store.get(room_id).await?;
        let persona = deps.catalog.persona(&room.persona)?;
        let voice_id = persona.voice_id.clone();

        let mut conversation = Conversation::from_turns(deps.store.load(room_id).await?);
        let stale = conversation.discard_pending();
        if stale > 0 {
            tracing::warn!(room = room_id, stale, "dropped placeholders left by an earlier run");
        }
        if conversation.is_empty() {
            conversation.push(Turn::assistant(persona.introduction(&room.topic)));
            deps.store.save(room_id, conversation.turns(), false).await?;
            tracing::info!(room = room_id, persona = %persona.name, "welcome turn added");
        }

        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (spoken_tx, spoken_rx) = mpsc::unbounded_channel();

        let speech = Arc::new(SpeechDispatcher::new(
            Arc::clone(&deps.synthesizer),
            Arc::clone(&deps.sink),
        ));

        let mut session = Self {
            segmenter: UtteranceSegmenter::new(deps.pipeline.silence_timeout),
            adapter: RecognitionAdapter::new(source),
            deps,
            voice_id,
            conversation,
            state: ConnectionState::Disconnected,
            notice: None,
            last_error: None,
            events_tx,
            events_rx,
            speech,
            replies_tx,
            replies_rx,
            spoken_tx,
            spoken_rx,
            commands,
            view_tx: watch::channel(SessionView {
                room_id: room.id.clone(),
                topic: room.topic.clone(),
                mode: room.mode.clone(),
                persona: room.persona.clone(),
                state: ConnectionState::Disconnected,
                conversation: Vec::new(),
                preview: String::new(),
                notice: None,
                last_error: None,
                completed: room.completed,
            })
            .0,
            room,
        };
        session.publish();

        let handle = SessionHandle {
            commands: commands_tx,
            view: session.view_tx.subscribe(),
        };

        tracing::info!(room = room_id, turns = session.conversation.len(), "session started");
        tokio::spawn(session.run());

        Ok(handle)
    }

    async fn run(mut self) {
        loop {
            let silence: OptionFuture<_> = self
                .segmenter
                .deadline()
                .map(tokio::time::sleep_until)
                .into();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.disconnect().await;
                        self.await_pending_reply().await;
                        break;
                    };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => self.on_recognition(event).await,
                Some(()) = silence => self.on_silence(),
                Some(reply) = self.replies_rx.recv() => self.on_reply(reply).await,
                Some(outcome) = self.spoken_rx.recv() => self.on_spoken(outcome),
            }

            self.publish();
        }

        self.publish();
        tracing::info!(room = %self.room.id, "session stopped");
    }

    /// Returns true when the actor should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::EndSession(reply) => {
                let result = self.end_session().await;
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                self.disconnect().await;
                self.await_pending_reply().await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    async fn connect(&mut self) -> Result<()> {
        if self.room.completed {
            return Err(Error::SessionCompleted(self.room.id.clone()));
        }
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        self.publish();

        if let Err(e) = self.adapter.request_permission().await {
            tracing::warn!(room = %self.room.id, error = %e, "microphone permission denied");
            return Err(self.fail_connection(e));
        }

        // Fresh channel so nothing from a previous connection leaks in
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;

        if let Err(e) = self.adapter.start(self.events_tx.clone()).await {
            tracing::error!(room = %self.room.id, error = %e, "failed to start recognition");
            return Err(self.fail_connection(e));
        }

        self.last_error = None;
        self.state = ConnectionState::Connected(if self.conversation.has_pending() {
            TurnState::Thinking
        } else {
            TurnState::Idle
        });
        tracing::info!(room = %self.room.id, "connected");
        Ok(())
    }

    fn fail_connection(&mut self, error: Error) -> Error {
        self.state = ConnectionState::Disconnected;
        self.last_error = Some(error.user_message());
        error
    }

    async fn disconnect(&mut self) {
        self.adapter.stop().await;
        self.segmenter.clear();

        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            tracing::info!(room = %self.room.id, "disconnected");
        }
    }

    async fn end_session(&mut self) -> Result<()> {
        self.disconnect().await;
        self.room.completed = true;

        // An in-flight reply is saved by its own checkpoint when it lands
        let settled = self.conversation.settled_turns();
        self.deps.store.save(&self.room.id, &settled, true).await?;

        tracing::info!(room = %self.room.id, turns = settled.len(), "session ended");
        Ok(())
    }

    /// Record the in-flight reply, if any, before the actor exits
    async fn await_pending_reply(&mut self) {
        if !self.conversation.has_pending() {
            return;
        }

        tracing::debug!(room = %self.room.id, "waiting for in-flight reply");
        if let Some(reply) = self.replies_rx.recv().await {
            self.on_reply(reply).await;
        }
    }

    async fn on_recognition(&mut self, event: RecognitionEvent) {
        let Some(turn) = self.state.turn() else {
            tracing::trace!("recognition event while disconnected, ignoring");
            return;
        };

        match event {
            RecognitionEvent::Fragments(fragments) => {
                let now = Instant::now();
                for fragment in &fragments {
                    self.segmenter.push(fragment, now);
                }
                if turn == TurnState::Idle && !fragments.is_empty() {
                    self.state = ConnectionState::Connected(TurnState::Listening);
                }
            }
            RecognitionEvent::Error(kind) => {
                tracing::warn!(room = %self.room.id, error = kind.message(), "recognition failed");
                self.disconnect().await;
                self.last_error = Some(Error::Recognition(kind).user_message());
            }
            RecognitionEvent::End => {
                tracing::debug!(room = %self.room.id, "recognition ended, restarting");
                self.adapter.stop().await;
                if let Err(e) = self.adapter.start(self.events_tx.clone()).await {
                    tracing::error!(room = %self.room.id, error = %e, "failed to restart recognition");
                    self.disconnect().await;
                    self.last_error = Some(e.user_message());
                }
            }
        }
    }

    fn on_silence(&mut self) {
        if self.conversation.has_pending() {
            // Keep the text until the pending reply lands
            self.segmenter.hold();
            return;
        }

        let Some(utterance) = self.segmenter.poll(Instant::now()) else {
            if self.state == ConnectionState::Connected(TurnState::Listening) {
                self.state = ConnectionState::Connected(TurnState::Idle);
            }
            return;
        };

        let history = self.conversation.turns().to_vec();
        if let Err(e) = self.conversation.begin_exchange(&utterance) {
            tracing::warn!(error = %e, "utterance dropped");
            return;
        }

        self.state = ConnectionState::Connected(TurnState::Thinking);
        self.last_error = None;
        tracing::info!(room = %self.room.id, utterance = %utterance, "utterance committed");

        let gateway = Arc::clone(&self.deps.gateway);
        let replies = self.replies_tx.clone();
        let topic = self.room.topic.clone();
        let mode = self.room.mode.clone();

        tokio::spawn(async move {
            let reply = gateway.respond(&topic, &mode, &utterance, &history).await;
            let _ = replies.send(reply);
        });
    }

    async fn on_reply(&mut self, reply: Result<String>) {
        let (content, speakable) = match reply {
            Ok(text) => {
                self.notice = None;
                (text, true)
            }
            Err(e) => {
                tracing::warn!(room = %self.room.id, error = %e, "reply failed");
                if matches!(e, Error::RateLimited(_)) {
                    self.notice = Some(RATE_LIMITED_MESSAGE.to_string());
                }
                (e.user_message(), false)
            }
        };

        if !self.conversation.resolve_pending(content.clone()) {
            tracing::warn!(room = %self.room.id, "reply arrived with no pending turn");
            return;
        }
        self.checkpoint().await;

        // After a disconnect the reply is recorded but nothing else happens
        if !self.state.is_connected() {
            return;
        }

        let now = Instant::now();
        self.segmenter.rearm(now);

        match self.voice_id.clone().filter(|_| speakable) {
            Some(voice_id) => {
                self.state = ConnectionState::Connected(TurnState::Speaking);

                let speech = Arc::clone(&self.speech);
                let spoken = self.spoken_tx.clone();
                tokio::spawn(async move {
                    let outcome = speech.speak(&content, Some(&voice_id)).await;
                    let _ = spoken.send(outcome);
                });
            }
            None => self.settle(),
        }
    }

    fn on_spoken(&mut self, outcome: SpeakOutcome) {
        tracing::debug!(room = %self.room.id, ?outcome, "speech finished");
        if self.state == ConnectionState::Connected(TurnState::Speaking) {
            self.settle();
        }
    }

    /// Back to Listening or Idle depending on buffered text
    fn settle(&mut self) {
        let turn = if self.segmenter.buffered().trim().is_empty() {
            TurnState::Idle
        } else {
            TurnState::Listening
        };
        self.state = ConnectionState::Connected(turn);
    }

    async fn checkpoint(&mut self) {
        if let Err(e) = self
            .deps
            .store
            .save(&self.room.id, self.conversation.turns(), false)
            .await
        {
            tracing::error!(room = %self.room.id, error = %e, "failed to save conversation");
            self.last_error = Some(e.user_message());
        }
    }

    fn publish(&self) {
        let view = SessionView {
            room_id: self.room.id.clone(),
            topic: self.room.topic.clone(),
            mode: self.room.mode.clone(),
            persona: self.room.persona.clone(),
            state: self.state,
            conversation: self.conversation.turns().to_vec(),
            preview: self.segmenter.preview().to_string(),
            notice: self.notice.clone(),
            last_error: self.last_error.clone(),
            completed: self.room.completed,
        };

        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
