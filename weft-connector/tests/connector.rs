//! End-to-end connector tests over an in-memory transport.
//!
//! The mock transport stands in for the WebSocket link: `connect` flips it
//! open and fires the on-open callback, `deliver` injects inbound frames
//! the way the read loop would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use weft_connector::transport::SharedCallbacks;
use weft_connector::{
    ConnectionError, ConnectionResult, ConnectionState, Connector, ConnectorConfig,
    ContentType, Message, MessageAssembler, ParsedChunks, Payload, Schema, Transport,
    ValueKind, ASSOCIATE_REQ_TYPE, ASSOCIATE_RESP_TYPE, SERVER_URI,
};

// ════════════════════════════════════════════════════════════════════
// Mock transport
// ════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MockTransport {
    state: Mutex<Option<ConnectionState>>,
    callbacks: SharedCallbacks,
    sent: Mutex<Vec<Vec<u8>>>,
    pings: AtomicUsize,
    connect_calls: AtomicUsize,
    fail_connect_fatally: AtomicBool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = Some(state);
    }

    /// Inject an inbound frame the way the read loop would.
    fn deliver(&self, bytes: Vec<u8>) {
        if let Some(on_message) = self.callbacks.on_message() {
            on_message(bytes);
        }
    }

    fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _max_attempts: usize) -> ConnectionResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect_fatally.load(Ordering::SeqCst) {
            return Err(ConnectionError::fatal("broker unreachable"));
        }
        self.set_state(ConnectionState::Open);
        if let Some(on_open) = self.callbacks.on_open() {
            on_open();
        }
        Ok(())
    }

    fn send(&self, bytes: Vec<u8>) -> ConnectionResult<()> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectionError::processing("transport is not open"));
        }
        self.sent.lock().unwrap().push(bytes);
        Ok(())
    }

    fn ping(&self) -> ConnectionResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().unwrap_or(ConnectionState::Closed)
    }

    fn set_on_message_callback(&self, callback: weft_connector::MessageCallback) {
        self.callbacks.set_on_message(callback);
    }

    fn set_on_open_callback(&self, callback: weft_connector::OpenCallback) {
        self.callbacks.set_on_open(callback);
    }

    fn reset_callbacks(&self) {
        self.callbacks.reset();
    }

    async fn close(&self) {
        self.set_state(ConnectionState::Closed);
    }
}

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn test_config() -> ConnectorConfig {
    ConnectorConfig::new(
        "wss://broker.test:8142/weft",
        "agent",
        "/tmp/ca.pem",
        "/tmp/agent01.pem",
        "/tmp/agent01.key",
    )
    .with_heartbeat_interval(Duration::from_millis(50))
}

fn connector_with_mock() -> (Connector, Arc<MockTransport>) {
    let connector = Connector::with_config(test_config());
    let mock = MockTransport::new();
    connector
        .use_transport(mock.clone() as Arc<dyn Transport>)
        .unwrap();
    (connector, mock)
}

/// Build a broker-originated message as raw wire bytes.
fn broker_message(message_type: &str, data: Option<Value>, debug: &[Value]) -> Vec<u8> {
    let assembler = MessageAssembler::new(SERVER_URI);
    let message = match data {
        Some(data) => assembler
            .build(
                &["cth://agent01/agent".to_string()],
                message_type,
                60,
                false,
                Payload::Json(data),
                debug,
            )
            .unwrap(),
        None => {
            let (_, envelope) = assembler
                .envelope(
                    &["cth://agent01/agent".to_string()],
                    message_type,
                    60,
                    false,
                )
                .unwrap();
            Message::new(envelope).unwrap()
        }
    };
    message.serialize().unwrap()
}

fn envelope_of(bytes: &[u8]) -> Value {
    let message = Message::from_bytes(bytes).unwrap();
    serde_json::from_slice(&message.envelope().content).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

// ════════════════════════════════════════════════════════════════════
// Send path
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn send_before_connect_is_rejected() {
    let connector = Connector::with_config(test_config());
    let err = connector
        .send_json(
            &["cth://agent1".to_string()],
            "example/type",
            30,
            json!({"n": 1}),
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, ConnectionError::NotInitialized(_)));
}

#[tokio::test]
async fn send_ships_serialized_bytes() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();

    connector
        .send_json(
            &["cth://agent1".to_string()],
            "example/type",
            30,
            json!({"n": 1}),
            &[],
        )
        .unwrap();

    // Frame 0 is the associate request fired on open.
    let frames = mock.sent_frames();
    assert_eq!(frames.len(), 2);
    let envelope = envelope_of(&frames[1]);
    assert_eq!(envelope["message_type"], "example/type");
    assert_eq!(envelope["targets"], json!(["cth://agent1"]));
}

// ════════════════════════════════════════════════════════════════════
// Associate session
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn associate_request_is_the_first_frame_on_open() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();

    let frames = mock.sent_frames();
    assert_eq!(frames.len(), 1);

    let message = Message::from_bytes(&frames[0]).unwrap();
    assert!(message.data().is_none(), "associate request has no data chunk");

    let envelope = envelope_of(&frames[0]);
    assert_eq!(envelope["message_type"], ASSOCIATE_REQ_TYPE);
    assert_eq!(envelope["targets"], json!([SERVER_URI]));
    assert!(!connector.is_associated());
}

#[tokio::test]
async fn successful_response_sets_associated() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();
    assert!(!connector.is_associated());

    let request_id = envelope_of(&mock.sent_frames()[0])["id"]
        .as_str()
        .unwrap()
        .to_string();
    mock.deliver(broker_message(
        ASSOCIATE_RESP_TYPE,
        Some(json!({"id": request_id, "success": true})),
        &[],
    ));

    assert!(connector.is_associated());
}

#[tokio::test]
async fn failed_response_leaves_associated_clear() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();

    let request_id = envelope_of(&mock.sent_frames()[0])["id"]
        .as_str()
        .unwrap()
        .to_string();
    mock.deliver(broker_message(
        ASSOCIATE_RESP_TYPE,
        Some(json!({"id": request_id, "success": false, "reason": "bad cert"})),
        &[],
    ));

    assert!(!connector.is_associated());
    assert!(connector.is_connected());
}

#[tokio::test]
async fn association_is_lost_with_the_transport() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();
    mock.deliver(broker_message(
        ASSOCIATE_RESP_TYPE,
        Some(json!({"id": "r-1", "success": true})),
        &[],
    ));
    assert!(connector.is_associated());

    mock.set_state(ConnectionState::Closed);
    assert!(!connector.is_associated());
}

// ════════════════════════════════════════════════════════════════════
// Dispatch
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn dispatch_invokes_the_handler_exactly_once() {
    let (connector, mock) = connector_with_mock();
    let received: Arc<Mutex<Vec<ParsedChunks>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = received.clone();

    connector.register_message_callback(
        Schema::new("example/type", ContentType::Json).required("n", ValueKind::Number),
        move |parsed| captured.lock().unwrap().push(parsed.clone()),
    );
    connector.connect(1).await.unwrap();

    mock.deliver(broker_message(
        "example/type",
        Some(json!({"n": 7})),
        &[json!({"hop": "broker-1"})],
    ));

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let parsed = &received[0];
    assert_eq!(parsed.envelope["message_type"], "example/type");
    assert_eq!(parsed.data, Some(json!({"n": 7})));
    assert_eq!(parsed.debug, vec![json!({"hop": "broker-1"})]);
}

#[tokio::test]
async fn unknown_message_type_is_dropped() {
    let (connector, mock) = connector_with_mock();
    let invoked = Arc::new(AtomicUsize::new(0));
    let captured = invoked.clone();

    connector.register_message_callback(
        Schema::new("example/type", ContentType::Json),
        move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        },
    );
    connector.connect(1).await.unwrap();

    mock.deliver(broker_message("unregistered", Some(json!({})), &[]));

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(connector.is_connected());
}

#[tokio::test]
async fn invalid_data_is_dropped() {
    let (connector, mock) = connector_with_mock();
    let invoked = Arc::new(AtomicUsize::new(0));
    let captured = invoked.clone();

    connector.register_message_callback(
        Schema::new("example/type", ContentType::Json).required("n", ValueKind::Number),
        move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        },
    );
    connector.connect(1).await.unwrap();

    mock.deliver(broker_message(
        "example/type",
        Some(json!({"n": "not a number"})),
        &[],
    ));

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(connector.is_connected());
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();

    mock.deliver(vec![0xFF, 0x00, 0x01]);
    mock.deliver(Vec::new());

    assert!(connector.is_connected());
}

#[tokio::test]
async fn handler_panics_are_contained() {
    let (connector, mock) = connector_with_mock();
    let invoked = Arc::new(AtomicUsize::new(0));
    let captured = invoked.clone();

    connector.register_message_callback(
        Schema::new("example/fragile", ContentType::Json),
        |_| panic!("handler exploded"),
    );
    connector.register_message_callback(
        Schema::new("example/solid", ContentType::Json),
        move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        },
    );
    connector.connect(1).await.unwrap();

    mock.deliver(broker_message("example/fragile", Some(json!({})), &[]));
    // The session survives and later messages still dispatch.
    assert!(connector.is_connected());
    mock.deliver(broker_message("example/solid", Some(json!({})), &[]));
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

// ════════════════════════════════════════════════════════════════════
// Monitor
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn monitor_requires_an_initialized_connection() {
    let connector = Connector::with_config(test_config());
    let err = connector.monitor_connection(1).unwrap_err();
    assert!(matches!(err, ConnectionError::NotInitialized(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_starts_only_once() {
    let (connector, _mock) = connector_with_mock();
    connector.connect(1).await.unwrap();

    connector.monitor_connection(1).unwrap();
    connector.monitor_connection(1).unwrap();
    assert!(connector.is_monitoring());

    connector.shutdown().await.unwrap();
    assert!(!connector.is_monitoring());
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_pings_while_connected() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();
    connector.monitor_connection(1).unwrap();

    settle().await;
    assert!(mock.pings.load(Ordering::SeqCst) >= 1);

    connector.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_reconnects_and_reassociates_after_loss() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();
    mock.deliver(broker_message(
        ASSOCIATE_RESP_TYPE,
        Some(json!({"id": "r-1", "success": true})),
        &[],
    ));
    assert!(connector.is_associated());

    connector.monitor_connection(1).unwrap();

    // Simulate transport loss; the monitor reconnects within one interval.
    mock.set_state(ConnectionState::Closed);
    assert!(!connector.is_associated());

    settle().await;
    assert!(mock.connect_calls.load(Ordering::SeqCst) >= 2);
    assert!(connector.is_connected());

    // The reopened link re-ran the handshake; answer it again.
    mock.deliver(broker_message(
        ASSOCIATE_RESP_TYPE,
        Some(json!({"id": "r-2", "success": true})),
        &[],
    ));
    assert!(connector.is_associated());

    connector.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_stops_on_fatal_connect_failure() {
    let (connector, mock) = connector_with_mock();
    connector.connect(1).await.unwrap();
    connector.monitor_connection(1).unwrap();

    mock.set_state(ConnectionState::Closed);
    mock.fail_connect_fatally.store(true, Ordering::SeqCst);

    settle().await;
    assert!(!connector.is_monitoring());

    let err = connector.shutdown().await.unwrap_err();
    assert!(matches!(err, ConnectionError::Fatal(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_a_long_interval_monitor_promptly() {
    let config = test_config().with_heartbeat_interval(Duration::from_secs(600));
    let connector = Connector::with_config(config);
    let mock = MockTransport::new();
    connector
        .use_transport(mock.clone() as Arc<dyn Transport>)
        .unwrap();
    connector.connect(1).await.unwrap();
    connector.monitor_connection(1).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), connector.shutdown()).await;
    assert!(result.is_ok(), "shutdown must not wait out the interval");
    assert!(!connector.is_monitoring());
}

// ════════════════════════════════════════════════════════════════════
// Transport wiring
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn use_transport_after_init_is_rejected() {
    let (connector, _mock) = connector_with_mock();
    let second = MockTransport::new();
    let err = connector
        .use_transport(second as Arc<dyn Transport>)
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Config(_)));
}

#[tokio::test]
async fn reset_callbacks_silences_late_frames() {
    let (connector, mock) = connector_with_mock();
    let invoked = Arc::new(AtomicUsize::new(0));
    let captured = invoked.clone();

    connector.register_message_callback(
        Schema::new("example/type", ContentType::Json),
        move |_| {
            captured.fetch_add(1, Ordering::SeqCst);
        },
    );
    connector.connect(1).await.unwrap();
    connector.shutdown().await.unwrap();

    mock.deliver(broker_message("example/type", Some(json!({})), &[]));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}
