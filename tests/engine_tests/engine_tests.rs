//! Tests for Engine
//!
//! These tests verify:
//! - Query / control / heartbeat request handling
//! - Sequence number correlation
//! - Identity and timestamp validation
//! - Host mutation API and unsolicited pushes
//! - Connection ownership policies

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use tuya_stub::engine::{Outbound, SessionState, STALE_WINDOW_SECS};
use tuya_stub::protocol::{
    encode_frame, CommandType, ControlPayload, FrameCodec, Message, Payload, QueryPayload,
    StatusPayload,
};
use tuya_stub::{Config, ConnectionPolicy, DpValue, Dps, Engine, StubError};

const NOW: i64 = 1_700_000_000;

// =============================================================================
// Helper Functions
// =============================================================================

fn dps(entries: &[(&str, DpValue)]) -> Dps {
    entries
        .iter()
        .map(|(k, v)| ((*k).into(), v.clone()))
        .collect()
}

fn config(policy: ConnectionPolicy) -> Config {
    Config::builder()
        .device_id("dev123")
        .shared_key("0123456789abcdef")
        .dp("1", false)
        .dp("2", true)
        .connection_policy(policy)
        .build()
        .unwrap()
}

fn setup_engine() -> Engine {
    Engine::new(&config(ConnectionPolicy::ReplacePrevious)).unwrap()
}

fn query(dev_id: &str, sequence: u32) -> Message {
    Message::new(
        CommandType::Query,
        sequence,
        Payload::Query(QueryPayload::request(dev_id)),
    )
}

fn control(dev_id: &str, sequence: u32, t: i64, batch: Dps) -> Message {
    Message::new(
        CommandType::Control,
        sequence,
        Payload::Control(ControlPayload::new(dev_id, t, batch)),
    )
}

fn number(state: &Dps, key: &str) -> Option<i64> {
    match state.get(&key.into()) {
        Some(DpValue::Number(n)) => n.as_i64(),
        _ => None,
    }
}

/// Outbound that records frames instead of writing to a socket
struct Capture {
    peer: String,
    frames: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl Capture {
    fn new(peer: &str) -> Arc<Self> {
        Arc::new(Self {
            peer: peer.to_string(),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn messages(&self, codec: &FrameCodec) -> Vec<Message> {
        let mut decoder = codec.decoder();
        self.frames
            .lock()
            .iter()
            .flat_map(|frame| decoder.decode(frame))
            .map(|r| r.unwrap())
            .collect()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Outbound for Capture {
    fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

// =============================================================================
// Query Tests
// =============================================================================

#[test]
fn test_query_reports_full_state_with_same_sequence() {
    let engine = setup_engine();

    let responses = engine.handle_at(&query("dev123", 5), NOW).unwrap();

    assert_eq!(
        responses,
        vec![Message::new(
            CommandType::Query,
            5,
            Payload::Query(QueryPayload {
                gw_id: Some("dev123".to_string()),
                dev_id: "dev123".to_string(),
                uid: None,
                t: None,
                dps: Some(dps(&[("1", false.into()), ("2", true.into())])),
            }),
        )]
    );
}

#[test]
fn test_query_over_the_wire() {
    let engine = setup_engine();
    let codec = engine.codec().clone();

    let request = codec.encode(&query("dev123", 5)).unwrap();
    let decoded = codec.decoder().decode(&request).pop().unwrap().unwrap();
    let response = engine.handle(&decoded).unwrap();
    let bytes = codec.encode(&response[0]).unwrap();

    // Client side
    let reply = codec.decoder().decode(&bytes).pop().unwrap().unwrap();
    assert_eq!(reply.command, CommandType::Query);
    assert_eq!(reply.sequence, 5);
    match reply.payload {
        Payload::Query(report) => {
            assert_eq!(report.dev_id, "dev123");
            assert_eq!(report.gw_id.as_deref(), Some("dev123"));
            assert_eq!(report.dps, Some(dps(&[("1", false.into()), ("2", true.into())])));
        }
        other => panic!("Expected query report, got {:?}", other),
    }
}

#[test]
fn test_query_identity_mismatch() {
    let engine = setup_engine();

    let err = engine.handle_at(&query("other", 5), NOW).unwrap_err();
    assert!(matches!(err, StubError::IdentityMismatch { .. }));
    assert!(err.is_message_error());

    // Still servable
    assert_eq!(engine.handle_at(&query("dev123", 6), NOW).unwrap().len(), 1);
}

#[test]
fn test_query_without_body_is_malformed() {
    let engine = setup_engine();
    let request = Message::new(CommandType::Query, 1, Payload::Empty);

    assert!(matches!(
        engine.handle_at(&request, NOW),
        Err(StubError::MalformedFrame(_))
    ));
}

// =============================================================================
// Control Tests
// =============================================================================

#[test]
fn test_control_acks_then_pushes_status() {
    let engine = setup_engine();

    let responses = engine
        .handle_at(&control("dev123", 7, NOW, dps(&[("1", true.into())])), NOW)
        .unwrap();

    assert_eq!(
        responses,
        vec![
            Message::new(CommandType::Control, 7, Payload::Empty),
            Message::unsolicited(
                CommandType::Status,
                Payload::Status(StatusPayload {
                    dev_id: "dev123".to_string(),
                    dps: dps(&[("1", true.into()), ("2", true.into())]),
                    t: Some(NOW),
                }),
            ),
        ]
    );
    assert!(responses[1].is_unsolicited());
    assert_eq!(engine.get_state(), dps(&[("1", true.into()), ("2", true.into())]));
}

#[test]
fn test_control_with_current_clock() {
    let engine = setup_engine();
    let now = chrono::Utc::now().timestamp();

    let responses = engine
        .handle(&control("dev123", 7, now, dps(&[("1", true.into())])))
        .unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(engine.get_property("1"), Some(DpValue::Bool(true)));
}

#[test]
fn test_control_stale_timestamp_leaves_state_unchanged() {
    let engine = setup_engine();
    let before = engine.get_state();

    let err = engine
        .handle_at(&control("dev123", 7, NOW - 30, dps(&[("1", true.into())])), NOW)
        .unwrap_err();

    assert!(matches!(err, StubError::StaleRequest { .. }));
    assert_eq!(engine.get_state(), before);
}

#[test]
fn test_control_future_timestamp_is_stale() {
    let engine = setup_engine();
    let err = engine
        .handle_at(&control("dev123", 7, NOW + 30, dps(&[("1", true.into())])), NOW)
        .unwrap_err();
    assert!(matches!(err, StubError::StaleRequest { .. }));
}

#[test]
fn test_control_extreme_timestamps_are_stale() {
    let engine = setup_engine();

    for t in [i64::MIN, i64::MAX] {
        let err = engine
            .handle_at(&control("dev123", 7, t, dps(&[("1", true.into())])), NOW)
            .unwrap_err();
        assert!(matches!(err, StubError::StaleRequest { timestamp, .. } if timestamp == t));
    }

    assert_eq!(engine.get_property("1"), Some(DpValue::Bool(false)));
}

#[test]
fn test_control_extreme_string_timestamp_over_the_wire() {
    let engine = setup_engine();
    let codec = engine.codec();

    let body = br#"{"devId":"dev123","t":"-9223372036854775808","dps":{"1":true}}"#;
    let frame = encode_frame(7, CommandType::CONTROL, &codec.cipher().seal(body));
    let request = codec.decoder().decode(&frame).pop().unwrap().unwrap();

    assert!(matches!(
        engine.handle(&request),
        Err(StubError::StaleRequest { .. })
    ));
}

#[test]
fn test_control_window_boundary_is_accepted() {
    let engine = setup_engine();
    let request = control("dev123", 7, NOW - STALE_WINDOW_SECS, dps(&[("1", true.into())]));
    assert!(engine.handle_at(&request, NOW).is_ok());
}

#[test]
fn test_control_identity_mismatch_applies_nothing() {
    let engine = setup_engine();
    let before = engine.get_state();

    let err = engine
        .handle_at(&control("other", 7, NOW, dps(&[("1", true.into())])), NOW)
        .unwrap_err();

    assert!(matches!(err, StubError::IdentityMismatch { .. }));
    assert_eq!(engine.get_state(), before);
}

#[test]
fn test_control_adds_new_data_points() {
    let engine = setup_engine();
    engine
        .handle_at(
            &control("dev123", 1, NOW, dps(&[("101", "scene_1".into()), ("3", 500i64.into())])),
            NOW,
        )
        .unwrap();

    assert_eq!(engine.get_property("101"), Some(DpValue::from("scene_1")));
    assert_eq!(engine.get_property(3u32), Some(DpValue::from(500i64)));
}

// =============================================================================
// Heartbeat / Unknown Tests
// =============================================================================

#[test]
fn test_heartbeat_pong_echoes_sequence() {
    let engine = setup_engine();
    let responses = engine
        .handle_at(&Message::new(CommandType::Heartbeat, 3, Payload::Empty), NOW)
        .unwrap();

    assert_eq!(
        responses,
        vec![Message::new(CommandType::Heartbeat, 3, Payload::Empty)]
    );
}

#[test]
fn test_unknown_command_gets_no_response() {
    let engine = setup_engine();
    let request = Message::new(CommandType::Unknown(0x12), 4, Payload::Raw(b"x".to_vec()));
    assert!(engine.handle_at(&request, NOW).unwrap().is_empty());
}

#[test]
fn test_status_from_client_is_ignored() {
    let engine = setup_engine();
    let request = Message::new(
        CommandType::Status,
        4,
        Payload::Status(StatusPayload {
            dev_id: "dev123".to_string(),
            dps: dps(&[("1", true.into())]),
            t: None,
        }),
    );

    assert!(engine.handle_at(&request, NOW).unwrap().is_empty());
    assert_eq!(engine.get_property("1"), Some(DpValue::Bool(false)));
}

// =============================================================================
// Host Mutation Tests
// =============================================================================

#[test]
fn test_set_property_without_connection() {
    let engine = setup_engine();
    engine.set_property("1", true);
    assert_eq!(engine.get_property("1"), Some(DpValue::Bool(true)));
}

#[test]
fn test_set_property_pushes_full_state() {
    let engine = setup_engine();
    let capture = Capture::new("client");
    engine.attach(capture.clone()).unwrap();

    engine.set_property("1", true);
    engine.set_property("2", false);

    let pushes = capture.messages(engine.codec());
    assert_eq!(pushes.len(), 2);
    for push in &pushes {
        assert_eq!(push.command, CommandType::Control);
        assert!(push.is_unsolicited());
    }

    match &pushes[1].payload {
        Payload::Control(p) => {
            assert_eq!(p.dev_id, "dev123");
            assert_eq!(p.dps, dps(&[("1", true.into()), ("2", false.into())]));
        }
        other => panic!("Expected control push, got {:?}", other),
    }
}

#[test]
fn test_set_state_replaces_and_pushes() {
    let engine = setup_engine();
    let capture = Capture::new("client");
    engine.attach(capture.clone()).unwrap();

    engine.set_state(dps(&[("20", "white".into())]));

    assert_eq!(engine.get_state(), dps(&[("20", "white".into())]));
    assert_eq!(engine.get_property("1"), None);
    assert_eq!(capture.messages(engine.codec()).len(), 1);
}

#[test]
fn test_no_push_after_detach() {
    let engine = setup_engine();
    let capture = Capture::new("client");
    let id = engine.attach(capture.clone()).unwrap();

    engine.detach(id);
    engine.set_property("1", true);

    assert!(capture.frames.lock().is_empty());
}

#[test]
fn test_concurrent_host_and_wire_updates() {
    let engine = Arc::new(setup_engine());

    let host = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for n in 0..500i64 {
                engine.set_property("host", n);
            }
        })
    };

    let wire = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for n in 0..500i64 {
                let batch = dps(&[("a", n.into()), ("b", n.into())]);
                engine.handle_at(&control("dev123", 1, NOW, batch), NOW).unwrap();
                let state = engine.get_state();
                assert_eq!(state.get(&"a".into()), state.get(&"b".into()));
            }
        })
    };

    host.join().unwrap();
    wire.join().unwrap();

    assert_eq!(engine.get_property("host"), Some(DpValue::from(499i64)));
    assert_eq!(engine.get_property("a"), Some(DpValue::from(499i64)));
}

#[test]
fn test_responses_and_host_pushes_stay_ordered() {
    let engine = Arc::new(setup_engine());
    let capture = Capture::new("client");
    engine.attach(capture.clone()).unwrap();

    let host = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for n in 0..200i64 {
                engine.set_property("host", n);
            }
        })
    };

    let wire = {
        let engine = Arc::clone(&engine);
        let capture = Arc::clone(&capture);
        thread::spawn(move || {
            for n in 0..200i64 {
                let request = control(
                    "dev123",
                    n as u32 + 1,
                    chrono::Utc::now().timestamp(),
                    dps(&[("wire", n.into())]),
                );
                engine
                    .respond(&request, |responses| {
                        for response in &responses {
                            let bytes = engine.codec().encode(response).unwrap();
                            capture.send(&bytes).unwrap();
                        }
                    })
                    .unwrap();
            }
        })
    };

    host.join().unwrap();
    wire.join().unwrap();

    // Every state the client sees is at least as new as the one before it
    let mut last: Option<Dps> = None;
    for message in capture.messages(engine.codec()) {
        let state = match message.payload {
            Payload::Control(p) => p.dps,
            Payload::Status(p) => p.dps,
            _ => continue,
        };
        if let Some(previous) = &last {
            for key in ["host", "wire"] {
                let (before, after) = (number(previous, key), number(&state, key));
                assert!(after >= before, "{} went from {:?} to {:?}", key, before, after);
            }
        }
        last = Some(state);
    }

    assert_eq!(last, Some(engine.get_state()));
}

// =============================================================================
// Connection Ownership Tests
// =============================================================================

#[test]
fn test_session_state_transitions() {
    let engine = setup_engine();
    assert_eq!(engine.session_state(), SessionState::Idle);

    let id = engine.attach(Capture::new("10.0.0.5:1234")).unwrap();
    assert_eq!(
        engine.session_state(),
        SessionState::Connected {
            peer: "10.0.0.5:1234".to_string()
        }
    );

    engine.detach(id);
    assert_eq!(engine.session_state(), SessionState::Idle);
}

#[test]
fn test_replace_previous_closes_old_connection() {
    let engine = setup_engine();
    let first = Capture::new("first");
    let second = Capture::new("second");

    let first_id = engine.attach(first.clone()).unwrap();
    engine.attach(second.clone()).unwrap();

    assert!(first.is_closed());
    assert!(!second.is_closed());

    // The replaced connection's detach must not evict the new owner
    engine.detach(first_id);
    assert!(engine.is_connected());

    engine.set_property("1", true);
    assert!(first.frames.lock().is_empty());
    assert_eq!(second.messages(engine.codec()).len(), 1);
}

#[test]
fn test_reject_if_busy() {
    let engine = Engine::new(&config(ConnectionPolicy::RejectIfBusy)).unwrap();
    let first = Capture::new("first");

    let first_id = engine.attach(first.clone()).unwrap();
    let err = engine.attach(Capture::new("second")).unwrap_err();

    assert!(matches!(err, StubError::Busy(_)));
    assert!(!first.is_closed());

    engine.detach(first_id);
    assert!(engine.attach(Capture::new("third")).is_ok());
}

#[test]
fn test_close_and_reopen() {
    let engine = setup_engine();
    let capture = Capture::new("client");
    engine.attach(capture.clone()).unwrap();

    engine.close();
    assert!(capture.is_closed());
    assert_eq!(engine.session_state(), SessionState::Closed);
    assert!(matches!(
        engine.attach(Capture::new("late")),
        Err(StubError::Closed)
    ));

    engine.reopen();
    assert_eq!(engine.session_state(), SessionState::Idle);
    assert!(engine.attach(Capture::new("again")).is_ok());
}
