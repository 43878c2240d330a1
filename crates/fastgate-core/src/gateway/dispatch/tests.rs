use super::*;
use fastgate_types::protocol::SessionPhase;
use parking_lot::Mutex;
use serde_json::json;

fn frame(event: &str, payload: Value) -> RawFrame {
    RawFrame::new(event, payload)
}

#[derive(Default)]
struct Recording {
    chunks: Mutex<Vec<String>>,
    statuses: Mutex<Vec<StatusUpdate>>,
    errors: Mutex<Vec<String>>,
    ended: Mutex<bool>,
}

impl StreamCallbacks for Recording {
    fn on_chunk(&self, text: &str) {
        self.chunks.lock().push(text.to_string());
    }
    fn on_status(&self, update: &StatusUpdate) {
        self.statuses.lock().push(update.clone());
    }
    fn on_end(&self, _trailing: Option<&Value>) {
        *self.ended.lock() = true;
    }
    fn on_error(&self, error: &GatewayError) {
        self.errors.lock().push(error.error_code().to_string());
    }
}

#[test]
fn test_happy_path_phase_sequence() {
    let mut dispatcher = StreamDispatcher::new("s1");
    assert_eq!(dispatcher.session().phase, SessionPhase::Opened);

    dispatcher.feed(&frame("status", json!({ "status": "running" })));
    assert_eq!(dispatcher.session().phase, SessionPhase::Streaming);

    dispatcher.feed(&frame("chunk", json!("a")));
    dispatcher.feed(&frame("chunk", json!("b")));
    assert_eq!(dispatcher.session().phase, SessionPhase::Streaming);

    dispatcher.feed(&frame("end", Value::Null));
    assert_eq!(dispatcher.session().phase, SessionPhase::Completed);
    assert_eq!(dispatcher.session().accumulated_text, "ab");
}

#[test]
fn test_error_frame_is_absorbing() {
    let mut dispatcher = StreamDispatcher::new("s1");

    dispatcher.feed(&frame("status", json!({ "status": "running" })));
    let event = dispatcher
        .feed(&frame("error", json!({ "code": "X", "message": "boom" })))
        .unwrap();
    assert!(event.is_terminal());
    assert_eq!(dispatcher.session().phase, SessionPhase::Failed);

    // Residual frames after the terminal phase are discarded.
    assert!(dispatcher.feed(&frame("chunk", json!("late"))).is_none());
    assert!(dispatcher.feed(&frame("end", Value::Null)).is_none());
    assert_eq!(dispatcher.session().accumulated_text, "");
    assert_eq!(dispatcher.session().phase, SessionPhase::Failed);
}

#[test]
fn test_interactive_round_trip() {
    let mut dispatcher = StreamDispatcher::new("s1");

    dispatcher.feed(&frame("chunk", json!("question: ")));
    dispatcher.feed(&frame("interactive", json!({ "type": "select", "options": ["a", "b"] })));
    assert_eq!(dispatcher.session().phase, SessionPhase::AwaitingInteractive);

    // Resumed input: the next frame returns the session to streaming.
    dispatcher.feed(&frame("chunk", json!("answered")));
    assert_eq!(dispatcher.session().phase, SessionPhase::Streaming);
}

#[test]
fn test_chat_id_assignment_no_transition() {
    let mut dispatcher = StreamDispatcher::new("s1");

    dispatcher.feed(&frame("chatId", json!("chat-77")));
    assert_eq!(dispatcher.session().phase, SessionPhase::Opened);
    assert_eq!(dispatcher.session().chat_id.as_deref(), Some("chat-77"));

    // First assignment wins.
    dispatcher.feed(&frame("chatId", json!("chat-88")));
    assert_eq!(dispatcher.session().chat_id.as_deref(), Some("chat-77"));
}

#[test]
fn test_malformed_frames_are_skipped_not_fatal() {
    let mut dispatcher = StreamDispatcher::new("s1");

    assert!(dispatcher.feed(&frame("chunk", json!(42))).is_none());
    assert!(dispatcher.feed(&frame("status", json!("running"))).is_none());
    assert!(dispatcher.feed(&frame("wat", json!({}))).is_none());
    assert_eq!(dispatcher.session().phase, SessionPhase::Opened);

    // The session is still live and processes good frames.
    assert!(dispatcher.feed(&frame("chunk", json!("ok"))).is_some());
    assert_eq!(dispatcher.session().phase, SessionPhase::Streaming);
}

#[test]
fn test_status_vocabulary_normalized() {
    let running = resolve_frame(&frame(
        "status",
        json!({ "status": "flowNodeStatus", "name": "kb-search" }),
    ))
    .unwrap();
    match running {
        StreamEvent::Status(update) => {
            assert_eq!(update.status, StreamStatus::Running);
            assert_eq!(update.module_name.as_deref(), Some("kb-search"));
        },
        other => panic!("unexpected event: {other:?}"),
    }

    let unknown = resolve_frame(&frame("status", json!({ "status": "warmingUp" }))).unwrap();
    match unknown {
        StreamEvent::Status(update) => {
            assert_eq!(update.status, StreamStatus::Unknown("warmingUp".to_string()));
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_status_payload_field_variants() {
    // Canonical key names.
    let canonical = resolve_frame(&frame(
        "status",
        json!({ "phase": "running", "progressPercent": 50, "errorDetail": "kb timeout" }),
    ))
    .unwrap();
    match canonical {
        StreamEvent::Status(update) => {
            assert_eq!(update.status, StreamStatus::Running);
            assert_eq!(update.progress_percent, Some(50));
            assert_eq!(update.error_detail.as_deref(), Some("kb timeout"));
        },
        other => panic!("unexpected event: {other:?}"),
    }

    // Provider shorthand aliases map to the same fields.
    let aliased = resolve_frame(&frame(
        "status",
        json!({ "status": "failed", "progress": 80, "message": "node crashed" }),
    ))
    .unwrap();
    match aliased {
        StreamEvent::Status(update) => {
            assert_eq!(update.status, StreamStatus::Errored);
            assert_eq!(update.progress_percent, Some(80));
            assert_eq!(update.error_detail.as_deref(), Some("node crashed"));
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_replay_yields_identical_final_state() {
    let frames = vec![
        frame("chatId", json!("c-1")),
        frame("status", json!({ "status": "running" })),
        frame("chunk", json!("he")),
        frame("bogus", json!({})),
        frame("chunk", json!("llo")),
        frame("usage", json!({ "prompt_tokens": 3 })),
        frame("end", json!({ "finish": "stop" })),
        frame("chunk", json!("residual")),
    ];

    let mut a = StreamDispatcher::new("same-id");
    let mut b = StreamDispatcher::new("same-id");
    for f in &frames {
        a.feed(f);
    }
    for f in &frames {
        b.feed(f);
    }

    assert_eq!(SessionOutcome::from(a.session()), SessionOutcome::from(b.session()));
    assert_eq!(a.session().phase, SessionPhase::Completed);
    assert_eq!(a.session().accumulated_text, "hello");
    assert_eq!(a.session().end_payload, Some(json!({ "finish": "stop" })));
}

fn stream_of(items: Vec<Result<RawFrame, GatewayError>>) -> FrameStream {
    Box::pin(futures::stream::iter(items))
}

#[tokio::test]
async fn test_run_happy_path_invokes_callbacks_in_order() {
    let callbacks = Arc::new(Recording::default());
    let dispatcher = StreamDispatcher::new("s1");

    let (session, result) = dispatcher
        .run(
            stream_of(vec![
                Ok(frame("status", json!({ "status": "running" }))),
                Ok(frame("chunk", json!("a"))),
                Ok(frame("chunk", json!("b"))),
                Ok(frame("end", Value::Null)),
            ]),
            callbacks.clone(),
            8,
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(session.phase, SessionPhase::Completed);
    assert_eq!(*callbacks.chunks.lock(), vec!["a", "b"]);
    assert_eq!(callbacks.statuses.lock().len(), 1);
    assert!(*callbacks.ended.lock());
    assert!(callbacks.errors.lock().is_empty());
}

#[tokio::test]
async fn test_run_error_frame_surfaced_once() {
    let callbacks = Arc::new(Recording::default());
    let dispatcher = StreamDispatcher::new("s1");

    let (session, result) = dispatcher
        .run(
            stream_of(vec![
                Ok(frame("chunk", json!("partial"))),
                Ok(frame("error", json!({ "code": "E7", "message": "workflow failed" }))),
                Ok(frame("chunk", json!("late"))),
            ]),
            callbacks.clone(),
            8,
        )
        .await;

    assert_eq!(session.phase, SessionPhase::Failed);
    assert_eq!(result.unwrap_err().error_code(), "upstream_protocol");
    // Exactly one error callback, no incomplete-stream duplicate.
    assert_eq!(*callbacks.errors.lock(), vec!["upstream_protocol"]);
}

#[tokio::test]
async fn test_run_disconnect_is_incomplete_stream() {
    let callbacks = Arc::new(Recording::default());
    let dispatcher = StreamDispatcher::new("s1");

    let (session, result) = dispatcher
        .run(
            stream_of(vec![Ok(frame("chunk", json!("half")))]),
            callbacks.clone(),
            8,
        )
        .await;

    assert_eq!(session.phase, SessionPhase::Failed);
    assert_eq!(result.unwrap_err().error_code(), "incomplete_stream");
    assert_eq!(*callbacks.errors.lock(), vec!["incomplete_stream"]);
}

#[tokio::test]
async fn test_run_transport_error_distinct_from_protocol_error() {
    let callbacks = Arc::new(Recording::default());
    let dispatcher = StreamDispatcher::new("s1");

    let (session, result) = dispatcher
        .run(
            stream_of(vec![
                Ok(frame("chunk", json!("x"))),
                Err(GatewayError::UpstreamTransport { message: "connection reset".into() }),
            ]),
            callbacks.clone(),
            8,
        )
        .await;

    assert_eq!(session.phase, SessionPhase::Failed);
    assert_eq!(result.unwrap_err().error_code(), "upstream_transport");
    assert_eq!(*callbacks.errors.lock(), vec!["upstream_transport"]);
}
