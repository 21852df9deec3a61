//! End-to-end session behavior against a channel-backed mock transport:
//! handshake, subscription lifecycle, inbound dispatch and close handling.

use async_trait::async_trait;
use realtime_geo_core::error::{CoreError, CoreResult};
use realtime_geo_core::geo::cell;
use realtime_geo_core::geo::movement::drive_session;
use realtime_geo_core::session::transport::{Transport, TransportChannels, TransportEvent};
use realtime_geo_core::{
    ConnectionState, CoreConfig, MovementWatcher, PositionError, PositionFix,
    RealtimeEventSession, SessionEvent,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

/// The bus side of a mock connection.
struct BusSide {
    outbound: UnboundedReceiver<String>,
    inbound: UnboundedSender<TransportEvent>,
}

/// Single-use transport double; a second `open` fails like a dead endpoint.
struct MockTransport {
    channels: Mutex<Option<TransportChannels>>,
}

fn mock_transport() -> (Arc<MockTransport>, BusSide) {
    let (outbound_tx, outbound_rx) = unbounded_channel();
    let (inbound_tx, inbound_rx) = unbounded_channel();
    let transport = Arc::new(MockTransport {
        channels: Mutex::new(Some(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })),
    });
    let bus = BusSide {
        outbound: outbound_rx,
        inbound: inbound_tx,
    };
    (transport, bus)
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> CoreResult<TransportChannels> {
        self.channels
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CoreError::Transport("endpoint unreachable".to_string()))
    }
}

async fn expect_frame(bus: &mut BusSide) -> String {
    timeout(Duration::from_secs(1), bus.outbound.recv())
        .await
        .expect("expected an outbound frame")
        .expect("transport still open")
}

async fn expect_no_frame(bus: &mut BusSide) {
    let quiet = timeout(Duration::from_millis(100), bus.outbound.recv()).await;
    assert!(quiet.is_err(), "unexpected outbound frame: {:?}", quiet);
}

async fn expect_event(events: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("expected a session event")
        .expect("session still alive")
}

fn frame_header(raw: &str, name: &str) -> Option<String> {
    raw.lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            line.split_once(':')
                .filter(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        })
}

/// Drive a fresh session through the handshake into `Ready`.
async fn ready_session(
    transport: Arc<MockTransport>,
    bus: &mut BusSide,
) -> (RealtimeEventSession, UnboundedReceiver<SessionEvent>) {
    let session = RealtimeEventSession::spawn(CoreConfig::default(), transport);
    let mut events = session.events().unwrap();

    let connecting = session.clone();
    let connect = tokio::spawn(async move { connecting.connect("local-user").await });

    let handshake = expect_frame(bus).await;
    assert!(handshake.starts_with("CONNECT\n"));
    assert_eq!(
        frame_header(&handshake, "userId").as_deref(),
        Some("local-user")
    );
    assert_eq!(
        frame_header(&handshake, "accept-version").as_deref(),
        Some("1.2")
    );

    bus.inbound
        .send(TransportEvent::Frame("CONNECTED\nversion:1.2\n\n\0".to_string()))
        .unwrap();
    connect.await.unwrap().unwrap();

    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Connected)
    );
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Ready)
    );

    (session, events)
}

fn message_frame(body: &str) -> TransportEvent {
    TransportEvent::Frame(format!(
        "MESSAGE\ndestination:/topic/geo/x\nsubscription:sub-1\n\n{}\0",
        body
    ))
}

#[tokio::test]
async fn subscription_is_idempotent_and_follows_cell_changes() {
    let (transport, mut bus) = mock_transport();
    let (session, _events) = ready_session(transport, &mut bus).await;

    let cell_a = cell::encode(35.8714, 128.6014);
    let cell_b = cell::encode(37.5665, 126.9780);

    session.set_target_cell(cell_a.clone()).unwrap();
    let subscribe = expect_frame(&mut bus).await;
    assert!(subscribe.starts_with("SUBSCRIBE\n"));
    assert_eq!(
        frame_header(&subscribe, "destination").unwrap(),
        format!("/topic/geo/{}", cell_a)
    );
    let first_id = frame_header(&subscribe, "id").unwrap();

    // Same cell again: zero outbound frames.
    session.set_target_cell(cell_a.clone()).unwrap();
    expect_no_frame(&mut bus).await;

    // Different cell: exactly one unsubscribe for the old id, then one
    // subscribe for the new cell.
    session.set_target_cell(cell_b.clone()).unwrap();
    let unsubscribe = expect_frame(&mut bus).await;
    assert!(unsubscribe.starts_with("UNSUBSCRIBE\n"));
    assert_eq!(frame_header(&unsubscribe, "id").unwrap(), first_id);

    let resubscribe = expect_frame(&mut bus).await;
    assert!(resubscribe.starts_with("SUBSCRIBE\n"));
    assert_eq!(
        frame_header(&resubscribe, "destination").unwrap(),
        format!("/topic/geo/{}", cell_b)
    );
    assert_ne!(frame_header(&resubscribe, "id").unwrap(), first_id);
    expect_no_frame(&mut bus).await;
}

#[tokio::test]
async fn target_cell_set_before_ready_is_flushed_on_handshake() {
    let (transport, mut bus) = mock_transport();
    let session = RealtimeEventSession::spawn(CoreConfig::default(), transport);

    let cell = cell::encode(35.8714, 128.6014);
    session.set_target_cell(cell.clone()).unwrap();

    let connecting = session.clone();
    let connect = tokio::spawn(async move { connecting.connect("local-user").await });

    let handshake = expect_frame(&mut bus).await;
    assert!(handshake.starts_with("CONNECT\n"));

    bus.inbound
        .send(TransportEvent::Frame("CONNECTED\n\n\0".to_string()))
        .unwrap();
    connect.await.unwrap().unwrap();

    let subscribe = expect_frame(&mut bus).await;
    assert_eq!(
        frame_header(&subscribe, "destination").unwrap(),
        format!("/topic/geo/{}", cell)
    );
}

#[tokio::test]
async fn self_origin_events_are_suppressed() {
    let (transport, mut bus) = mock_transport();
    let (_session, mut events) = ready_session(transport, &mut bus).await;

    bus.inbound
        .send(message_frame(
            r#"{"postId":"mine","lat":1.0,"lon":2.0,"timestamp":3,"userId":"local-user"}"#,
        ))
        .unwrap();
    bus.inbound
        .send(message_frame(
            r#"{"postId":"theirs","lat":1.0,"lon":2.0,"timestamp":4,"userId":"other-user"}"#,
        ))
        .unwrap();

    // Only the foreign event arrives, exactly once.
    match expect_event(&mut events).await {
        SessionEvent::Event(event) => {
            assert_eq!(event.post_id, "theirs");
            assert_eq!(event.origin_user_id.as_deref(), Some("other-user"));
        }
        other => panic!("expected inbound event, got {:?}", other),
    }
    let quiet = timeout(Duration::from_millis(100), events.recv()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn events_without_origin_are_forwarded() {
    let (transport, mut bus) = mock_transport();
    let (_session, mut events) = ready_session(transport, &mut bus).await;

    bus.inbound
        .send(message_frame(
            r#"{"postId":"anon","lat":1.0,"lon":2.0,"timestamp":5}"#,
        ))
        .unwrap();

    match expect_event(&mut events).await {
        SessionEvent::Event(event) => assert_eq!(event.post_id, "anon"),
        other => panic!("expected inbound event, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_killing_the_session() {
    let (transport, mut bus) = mock_transport();
    let (_session, mut events) = ready_session(transport, &mut bus).await;

    bus.inbound
        .send(TransportEvent::Frame("garbage with no structure".to_string()))
        .unwrap();
    bus.inbound.send(message_frame("not json")).unwrap();
    bus.inbound
        .send(message_frame(
            r#"{"postId":"ok","lat":1.0,"lon":2.0,"timestamp":6,"userId":"peer"}"#,
        ))
        .unwrap();

    match expect_event(&mut events).await {
        SessionEvent::Event(event) => assert_eq!(event.post_id, "ok"),
        other => panic!("expected inbound event, got {:?}", other),
    }
}

#[tokio::test]
async fn error_and_receipt_frames_have_no_state_effect() {
    let (transport, mut bus) = mock_transport();
    let (_session, mut events) = ready_session(transport, &mut bus).await;

    bus.inbound
        .send(TransportEvent::Frame(
            "ERROR\nmessage:subscription refused\n\ndetails\0".to_string(),
        ))
        .unwrap();
    bus.inbound
        .send(TransportEvent::Frame(
            "RECEIPT\nreceipt-id:77\n\n\0".to_string(),
        ))
        .unwrap();
    bus.inbound
        .send(message_frame(
            r#"{"postId":"after","lat":1.0,"lon":2.0,"timestamp":7,"userId":"peer"}"#,
        ))
        .unwrap();

    // No StateChanged in between; delivery continues.
    match expect_event(&mut events).await {
        SessionEvent::Event(event) => assert_eq!(event.post_id, "after"),
        other => panic!("expected inbound event, got {:?}", other),
    }
}

#[tokio::test]
async fn transport_close_forces_disconnected_and_no_reconnect() {
    let (transport, mut bus) = mock_transport();
    let (session, mut events) = ready_session(transport, &mut bus).await;

    let cell = cell::encode(35.8714, 128.6014);
    session.set_target_cell(cell.clone()).unwrap();
    let _subscribe = expect_frame(&mut bus).await;

    bus.inbound
        .send(TransportEvent::Closed(Some("server going away".to_string())))
        .unwrap();

    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Disconnected)
    );
    // No reconnect attempt: the mock would reject a second open, and no
    // frame is produced.
    expect_no_frame(&mut bus).await;

    // A fresh connect against the dead endpoint surfaces the failure to the
    // caller.
    let err = session.connect("local-user").await;
    assert!(matches!(err, Err(CoreError::Transport(_))));
}

#[tokio::test]
async fn connect_is_a_noop_when_already_active() {
    let (transport, mut bus) = mock_transport();
    let (session, _events) = ready_session(transport, &mut bus).await;

    // Already Ready: resolves immediately, no second handshake.
    session.connect("local-user").await.unwrap();
    expect_no_frame(&mut bus).await;
}

#[tokio::test]
async fn drive_session_skips_source_failures_and_keeps_pumping() {
    let (transport, mut bus) = mock_transport();
    let (session, _events) = ready_session(transport, &mut bus).await;

    let (fixes, fixes_rx) = unbounded_channel();
    let pump = tokio::spawn(drive_session(fixes_rx, session.clone()));

    fixes
        .send(Ok(PositionFix {
            latitude: 35.8714,
            longitude: 128.6014,
        }))
        .unwrap();
    let subscribe = expect_frame(&mut bus).await;
    assert!(subscribe.starts_with("SUBSCRIBE\n"));
    let first_id = frame_header(&subscribe, "id").unwrap();

    // A source failure synthesizes no cell: zero outbound frames.
    fixes.send(Err(PositionError::Unavailable)).unwrap();
    expect_no_frame(&mut bus).await;

    // The pump survives the failure; the next boundary crossing still
    // resubscribes.
    fixes
        .send(Ok(PositionFix {
            latitude: 37.5665,
            longitude: 126.9780,
        }))
        .unwrap();
    let unsubscribe = expect_frame(&mut bus).await;
    assert!(unsubscribe.starts_with("UNSUBSCRIBE\n"));
    assert_eq!(frame_header(&unsubscribe, "id").unwrap(), first_id);
    let resubscribe = expect_frame(&mut bus).await;
    assert!(resubscribe.starts_with("SUBSCRIBE\n"));

    // Closing the fix source ends the pump cleanly.
    drop(fixes);
    timeout(Duration::from_secs(1), pump)
        .await
        .expect("pump ends when the fix source closes")
        .unwrap();
}

#[tokio::test]
async fn movement_across_cells_drives_exactly_one_resubscription() {
    let (transport, mut bus) = mock_transport();
    let (session, mut events) = ready_session(transport, &mut bus).await;

    let mut watcher = MovementWatcher::new();
    let in_cell_x = [
        PositionFix {
            latitude: 35.87140,
            longitude: 128.60140,
        },
        PositionFix {
            latitude: 35.87141,
            longitude: 128.60141,
        },
    ];
    let in_cell_y = PositionFix {
        latitude: 37.5665,
        longitude: 126.9780,
    };

    for fix in &in_cell_x {
        if let Some(cell) = watcher.observe(fix) {
            session.set_target_cell(cell).unwrap();
        }
    }
    let subscribe_x = expect_frame(&mut bus).await;
    let id_x = frame_header(&subscribe_x, "id").unwrap();
    expect_no_frame(&mut bus).await;

    if let Some(cell) = watcher.observe(&in_cell_y) {
        session.set_target_cell(cell).unwrap();
    }
    let unsubscribe = expect_frame(&mut bus).await;
    assert!(unsubscribe.starts_with("UNSUBSCRIBE\n"));
    assert_eq!(frame_header(&unsubscribe, "id").unwrap(), id_x);
    let subscribe_y = expect_frame(&mut bus).await;
    assert!(subscribe_y.starts_with("SUBSCRIBE\n"));

    // Inbound dispatch still honors self-origin suppression afterwards.
    bus.inbound
        .send(message_frame(
            r#"{"postId":"mine","lat":1.0,"lon":2.0,"timestamp":8,"userId":"local-user"}"#,
        ))
        .unwrap();
    bus.inbound
        .send(message_frame(
            r#"{"postId":"peer-post","lat":1.0,"lon":2.0,"timestamp":9,"userId":"peer"}"#,
        ))
        .unwrap();
    match expect_event(&mut events).await {
        SessionEvent::Event(event) => assert_eq!(event.post_id, "peer-post"),
        other => panic!("expected inbound event, got {:?}", other),
    }
}
