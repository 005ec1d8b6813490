//! Coaching session integration tests
//!
//! Drives the session actor through a forwarded recognition source with
//! paused time, so silence timeouts elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use voice_coach::error::{MODEL_UNAVAILABLE_MESSAGE, RATE_LIMITED_MESSAGE};
use voice_coach::gateway::BackendError;
use voice_coach::voice::ForwardedSource;
use voice_coach::{
    Catalog, ConnectionState, Error, Persona, Role, SessionHandle, SessionStore, TurnState,
};

mod common;

use common::{ScriptedBackend, create_room, harness};

const LUCY_VOICE: &str = "kdmDKE6EkgrWrrykO9Qt";

fn idle_with_turns(turns: usize) -> impl FnMut(&voice_coach::SessionView) -> bool {
    move |v: &voice_coach::SessionView| {
        v.conversation.len() == turns
            && !v.has_pending()
            && v.state == ConnectionState::Connected(TurnState::Idle)
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_room_gets_one_welcome_turn() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Binary Trees", "Question Bank", "Lucy").await;

    let (source, _forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();

    let view = handle.view();
    assert_eq!(view.conversation.len(), 1);
    let welcome = &view.conversation[0];
    assert_eq!(welcome.role, Role::Assistant);
    assert!(welcome.content.contains("Lucy"));
    assert!(welcome.content.contains("Binary Trees"));
    assert_eq!(view.state, ConnectionState::Disconnected);

    // Persisted, and not repeated on the next load
    assert_eq!(h.store.load(&room.id).await.unwrap().len(), 1);
    handle.shutdown().await.unwrap();

    let (source, _forward) = ForwardedSource::new();
    let again = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    assert_eq!(again.view().conversation.len(), 1);
}

#[tokio::test]
async fn test_unknown_room_fails_to_spawn() {
    let h = harness(ScriptedBackend::new(vec![]));
    let (source, _forward) = ForwardedSource::new();

    let result = SessionHandle::spawn(h.deps, "no-such-room", Box::new(source)).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_is_answered_spoken_and_saved() {
    let reply = "Binary trees have at most two children per node. Want to try one?";
    let h = harness(ScriptedBackend::new(vec![Ok(reply.to_string())]));
    let room = create_room(&h.store, "Binary Trees", "Question Bank", "Lucy").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    assert_ok!(handle.connect().await);
    assert_eq!(handle.view().state, ConnectionState::Connected(TurnState::Idle));

    assert!(forward.interim("what is"));
    handle
        .wait_for(|v| v.state == ConnectionState::Connected(TurnState::Listening))
        .await
        .unwrap();
    assert!(forward.final_text("What is a binary tree?"));

    let view = handle.wait_for(idle_with_turns(3)).await.unwrap();

    assert_eq!(view.conversation[1].role, Role::User);
    assert_eq!(view.conversation[1].content, "What is a binary tree?");
    assert_eq!(view.conversation[2].content, reply);
    assert!(view.preview.is_empty());

    assert_eq!(
        h.synth.texts(),
        ["Binary trees have at most two children per node.", "Want to try one?"]
    );
    assert!(h.synth.voices().iter().all(|v| v == LUCY_VOICE));

    let stored = h.store.load(&room.id).await.unwrap();
    assert_eq!(stored, view.conversation);

    // History sent with the first question is just the welcome turn
    let request = &h.backend.requests()[0];
    assert_eq!(request.model, "primary");
    assert_eq!(request.messages.len(), 3);
    assert_eq!(request.messages[1].role, "assistant");
    assert_eq!(request.messages[2].content, "What is a binary tree?");
}

#[tokio::test(start_paused = true)]
async fn test_no_second_model_call_while_reply_pending() {
    let backend = ScriptedBackend::held(vec![
        Ok("Binary Trees: each node has two children.".to_string()),
        Ok("Balanced Binary Trees keep height low.".to_string()),
    ]);
    let h = harness(backend);
    let room = create_room(&h.store, "Binary Trees", "Question Bank", "Lucy").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("first question");
    handle.wait_for(|v| v.has_pending()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.backend.call_count(), 1);

    // Spoken while thinking: stays buffered
    forward.final_text("second question");
    tokio::time::sleep(Duration::from_secs(10)).await;

    let view = handle.view();
    assert_eq!(h.backend.call_count(), 1);
    assert_eq!(view.conversation.len(), 3);
    assert_eq!(view.state, ConnectionState::Connected(TurnState::Thinking));

    // Once the first reply lands the held text goes out
    h.backend.release();
    handle
        .wait_for(|v| v.conversation.len() == 5)
        .await
        .unwrap();
    h.backend.release();

    let view = handle.wait_for(idle_with_turns(5)).await.unwrap();
    assert_eq!(h.backend.call_count(), 2);
    assert_eq!(view.conversation[3].content, "second question");
    assert_eq!(view.conversation[4].content, "Balanced Binary Trees keep height low.");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_sets_notice_until_next_success() {
    let h = harness(ScriptedBackend::new(vec![
        Err(BackendError::RateLimited("429".to_string())),
        Err(BackendError::RateLimited("429".to_string())),
        Ok("Recursion on Binary Trees is natural.".to_string()),
    ]));
    let room = create_room(&h.store, "Binary Trees", "Question Bank", "Lucy").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("hello?");
    let view = handle.wait_for(idle_with_turns(3)).await.unwrap();

    // Both models were tried
    assert_eq!(h.backend.call_count(), 2);
    assert_eq!(view.conversation[2].content, RATE_LIMITED_MESSAGE);
    assert_eq!(view.notice.as_deref(), Some(RATE_LIMITED_MESSAGE));
    // Error text is not spoken
    assert!(h.synth.texts().is_empty());

    forward.final_text("how about recursion?");
    let view = handle.wait_for(idle_with_turns(5)).await.unwrap();
    assert_eq!(view.notice, None);
    assert_eq!(h.synth.texts(), ["Recursion on Binary Trees is natural."]);
}

#[tokio::test(start_paused = true)]
async fn test_model_failure_does_not_try_fallback() {
    let h = harness(ScriptedBackend::new(vec![Err(BackendError::Status {
        status: 500,
        body: "upstream".to_string(),
    })]));
    let room = create_room(&h.store, "Binary Trees", "Question Bank", "Lucy").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("anyone there?");
    let view = handle.wait_for(idle_with_turns(3)).await.unwrap();

    assert_eq!(h.backend.call_count(), 1);
    assert_eq!(view.conversation[2].content, MODEL_UNAVAILABLE_MESSAGE);
    assert_eq!(view.notice, None);
}

#[tokio::test(start_paused = true)]
async fn test_denied_permission_returns_to_disconnected() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Graphs", "Mock Interviews", "Rohan").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source.denying_permission()))
        .await
        .unwrap();

    let err = assert_err!(handle.connect().await);
    assert!(matches!(err, Error::Permission(_)));

    let view = handle.view();
    assert_eq!(view.state, ConnectionState::Disconnected);
    assert_eq!(view.last_error.as_deref(), Some("Microphone access denied"));
    assert!(!forward.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_recognition_error_disconnects_with_message() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Graphs", "Mock Interviews", "Rohan").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("half a sentence");
    assert!(forward.error("no-speech"));

    let view = handle
        .wait_for(|v| v.state == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(view.last_error.as_deref(), Some("No speech detected"));
    assert!(!forward.is_listening());

    // Buffered text was dropped with the connection
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recognition_end_restarts_capture() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Graphs", "Mock Interviews", "Rohan").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    assert!(forward.end());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(forward.is_listening());
    assert!(handle.view().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reply_after_disconnect_is_saved_but_not_spoken() {
    let h = harness(ScriptedBackend::held(vec![Ok(
        "Dynamic Programming reuses subproblem answers.".to_string(),
    )]));
    let room = create_room(&h.store, "Dynamic Programming", "Topic Wise Lectures", "Tina").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("explain memoization");
    handle.wait_for(|v| v.has_pending()).await.unwrap();

    handle.disconnect().await.unwrap();
    assert!(!forward.is_listening());
    assert!(!forward.final_text("ignored"));

    h.backend.release();
    let view = handle.wait_for(|v| !v.has_pending()).await.unwrap();

    assert_eq!(view.state, ConnectionState::Disconnected);
    assert!(h.synth.texts().is_empty());

    let stored = h.store.load(&room.id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].content, "Dynamic Programming reuses subproblem answers.");
}

#[tokio::test(start_paused = true)]
async fn test_end_session_completes_room() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Spanish", "Language Proficiency", "Larry").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    handle.end_session().await.unwrap();

    assert!(!forward.is_listening());
    assert!(handle.view().completed);
    assert!(h.store.get(&room.id).await.unwrap().completed);

    assert!(matches!(
        handle.connect().await,
        Err(Error::SessionCompleted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_a_no_op() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Graphs", "Question Bank", "Rohan").await;

    let (source, _forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();

    handle.connect().await.unwrap();
    handle.connect().await.unwrap();
    assert_eq!(handle.view().state, ConnectionState::Connected(TurnState::Idle));

    handle.shutdown().await.unwrap();
    assert!(matches!(handle.connect().await, Err(Error::SessionClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_persona_without_voice_settles_to_idle() {
    let mut h = harness(ScriptedBackend::new(vec![Ok(
        "Graphs are nodes joined by edges.".to_string(),
    )]));

    let builtin = Catalog::builtin();
    let mut personas = builtin.personas().to_vec();
    personas.push(Persona {
        name: "Quiet".to_string(),
        voice_id: None,
        ..personas[0].clone()
    });
    h.deps.catalog = Arc::new(Catalog::new(personas, builtin.modes().to_vec()));
    let room = create_room(&h.store, "Graphs", "Question Bank", "Quiet").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("what is a graph?");
    let view = handle.wait_for(idle_with_turns(3)).await.unwrap();

    assert_eq!(view.conversation[2].content, "Graphs are nodes joined by edges.");
    assert!(h.synth.texts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_while_reply_pending_resumes_thinking() {
    let h = harness(ScriptedBackend::held(vec![Ok(
        "Graphs can be stored as adjacency lists.".to_string(),
    )]));
    let room = create_room(&h.store, "Graphs", "Question Bank", "Rohan").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("how do I store a graph?");
    handle.wait_for(|v| v.has_pending()).await.unwrap();

    handle.disconnect().await.unwrap();
    assert_eq!(handle.view().state, ConnectionState::Disconnected);

    handle.connect().await.unwrap();
    assert_eq!(
        handle.view().state,
        ConnectionState::Connected(TurnState::Thinking)
    );

    h.backend.release();
    let view = handle.wait_for(idle_with_turns(3)).await.unwrap();
    assert_eq!(view.conversation[2].content, "Graphs can be stored as adjacency lists.");
    assert_eq!(h.synth.texts(), ["Graphs can be stored as adjacency lists."]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_records_reply_in_flight_after_end() {
    let reply = "Graphs with no cycles are called forests.";
    let h = harness(ScriptedBackend::held(vec![Ok(reply.to_string())]));
    let room = create_room(&h.store, "Graphs", "Question Bank", "Rohan").await;

    let (source, forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    handle.connect().await.unwrap();

    forward.final_text("what is a forest?");
    handle.wait_for(|v| v.has_pending()).await.unwrap();

    // Ending mid-reply stores only settled turns
    handle.end_session().await.unwrap();
    let stored = h.store.get(&room.id).await.unwrap();
    assert!(stored.completed);
    assert_eq!(stored.conversation.len(), 2);
    assert!(stored.conversation.iter().all(|t| !t.pending));

    // Shutdown holds until the reply lands and is saved
    let shutdown = tokio::spawn({
        let handle = handle.clone();
        async move { handle.shutdown().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!shutdown.is_finished());

    h.backend.release();
    shutdown.await.unwrap().unwrap();

    let stored = h.store.get(&room.id).await.unwrap();
    assert!(stored.completed);
    assert_eq!(stored.conversation.len(), 3);
    assert_eq!(stored.conversation[2].content, reply);
    assert!(h.synth.texts().is_empty());

    // Nothing is left pending on the next load
    let (source, _forward) = ForwardedSource::new();
    let again = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();
    let view = again.view();
    assert!(!view.has_pending());
    assert_eq!(view.conversation.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stale_placeholder_is_dropped_on_load() {
    let h = harness(ScriptedBackend::new(vec![]));
    let room = create_room(&h.store, "Graphs", "Question Bank", "Rohan").await;

    let mut conversation = voice_coach::Conversation::new();
    conversation.push(voice_coach::Turn::assistant("welcome"));
    conversation.begin_exchange("left hanging").unwrap();
    h.store
        .save(&room.id, conversation.turns(), false)
        .await
        .unwrap();

    let (source, _forward) = ForwardedSource::new();
    let handle = SessionHandle::spawn(h.deps.clone(), &room.id, Box::new(source))
        .await
        .unwrap();

    let view = handle.view();
    assert!(!view.has_pending());
    assert_eq!(view.conversation.len(), 2);
    assert_eq!(view.conversation[1].content, "left hanging");
}
