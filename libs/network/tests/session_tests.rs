//! # Session Handshake Tests
//!
//! Drives sessions through connect, reject-and-retry and peer disconnect by
//! feeding frames straight into [`Session::enqueue`], the way the receive
//! task does. No sockets are opened, so the clock can be paused.

use bytes::Bytes;
use codec::{
    CodecResult, Message, MessageBody, MessageHeader, ProtocolKind, SessionConnectResponse,
    SessionDescriptor, SessionDisconnect, WireReader, WireWriter,
};
use dispatcher::Dispatcher;
use network::{
    Connection, ConnectionObserver, ConnectionOptions, NetworkError, Session, SessionConsumer,
    SessionOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const HOST: SessionDescriptor = SessionDescriptor::pack(1, 0, 3, 1);
const TERMINAL: SessionDescriptor = SessionDescriptor::pack(2, 0, 5, 42);

#[derive(Debug, Clone, PartialEq)]
struct Ticket {
    serial: u32,
}

impl MessageBody for Ticket {
    const FUNCTION_CODE: u16 = 0x0603;
    const PROTOCOL: ProtocolKind = ProtocolKind::Application;

    fn decode_body(_header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            serial: reader.read_u32("serial")?,
        })
    }

    fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()> {
        writer.write_u32(self.serial);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Ready,
    Connected,
    ConnectFailed(i32),
    Disconnected,
}

#[derive(Default)]
struct RecordingConsumer {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingConsumer {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl SessionConsumer for RecordingConsumer {
    fn message_ready(&self, _session: &Session) {
        self.seen.lock().push(Seen::Ready);
    }

    fn session_connected(&self, _session: &Session) {
        self.seen.lock().push(Seen::Connected);
    }

    fn session_connect_failed(&self, _session: &Session, retry_ms: i32) {
        self.seen.lock().push(Seen::ConnectFailed(retry_ms));
    }

    fn session_disconnected(&self, _session: &Session) {
        self.seen.lock().push(Seen::Disconnected);
    }
}

struct Quiet;

impl ConnectionObserver for Quiet {}

struct Fixture {
    dispatcher: Dispatcher,
    loop_task: tokio::task::JoinHandle<()>,
    connection: Arc<Connection>,
    session: Arc<Session>,
    consumer: Arc<RecordingConsumer>,
}

impl Fixture {
    fn new(options: SessionOptions) -> Self {
        let dispatcher = Dispatcher::new();
        let connection_options = ConnectionOptions {
            heartbeat_interval: Some(Duration::from_secs(5)),
            ..ConnectionOptions::default()
        };
        let connection =
            Connection::create(&dispatcher, "host-link", connection_options, Arc::new(Quiet)).unwrap();
        let consumer = Arc::new(RecordingConsumer::default());
        let session = Session::create(&dispatcher, HOST, TERMINAL, options, consumer.clone()).unwrap();
        connection.register_session(&session).unwrap();
        let loop_task = dispatcher.spawn();
        Self {
            dispatcher,
            loop_task,
            connection,
            session,
            consumer,
        }
    }

    /// Issue the connect request; the connection is down, so only the
    /// session side of the handshake moves
    fn request_connect(&self) {
        match self.session.connect_session() {
            Err(NetworkError::NotConnected { .. }) => {}
            other => panic!("expected NotConnected, got {other:?}"),
        }
        assert!(self.session.awaiting_response());
    }

    async fn finish(self) {
        self.dispatcher.stop();
        self.loop_task.await.unwrap();
    }
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn to_terminal(sales_location: u32) -> SessionDescriptor {
    let mut to = TERMINAL;
    to.set_sales_location(sales_location);
    to
}

fn connect_response(body: SessionConnectResponse, sales_location: u32) -> Bytes {
    Message::response(body)
        .addressed(to_terminal(sales_location), HOST)
        .encode()
        .unwrap()
        .into()
}

fn ticket(serial: u32, sales_location: u32) -> Bytes {
    Message::new(Ticket { serial })
        .addressed(to_terminal(sales_location), HOST)
        .encode()
        .unwrap()
        .into()
}

#[tokio::test(start_paused = true)]
async fn test_accepted_connect_establishes_session() {
    let fixture = Fixture::new(SessionOptions::default());
    assert!(!fixture.session.is_established());
    assert!(!fixture.session.check_state().unwrap());

    fixture.request_connect();
    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::accepted(), 77));

    assert!(fixture.session.is_established());
    assert!(!fixture.session.awaiting_response());
    assert!(fixture.connection.heartbeats_enabled());
    assert_eq!(fixture.session.sales_location(), 77);
    assert_eq!(fixture.session.from().unique_address(), 42);

    settle().await;
    assert_eq!(fixture.consumer.seen(), vec![Seen::Connected]);
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_application_frames_queue_once_established() {
    let fixture = Fixture::new(SessionOptions::default());

    // dropped: no session yet
    fixture.session.enqueue(ticket(1, 77));
    assert_eq!(fixture.session.pending_messages(), 0);

    fixture.request_connect();
    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::accepted(), 77));
    let frame = ticket(2, 77);
    assert!(fixture.session.is_interested(&frame));
    assert!(!fixture.session.is_interested(&ticket(3, 78)));
    fixture.session.enqueue(frame);

    settle().await;
    assert_eq!(fixture.consumer.seen(), vec![Seen::Connected, Seen::Ready]);
    let queued = fixture.session.next_message().unwrap();
    let message = Message::<Ticket>::decode(&queued).unwrap();
    assert_eq!(message.body().unwrap().serial, 2);
    assert!(fixture.session.next_message().is_none());
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_connect_retries_after_requested_delay() {
    let fixture = Fixture::new(SessionOptions::default());

    fixture.request_connect();
    fixture.session.enqueue(connect_response(
        SessionConnectResponse::rejected(7, 30_000, "terminal locked"),
        0,
    ));
    assert!(!fixture.session.is_established());
    assert!(fixture.session.reconnect_pending());

    settle().await;
    assert_eq!(fixture.consumer.seen(), vec![Seen::ConnectFailed(30_000)]);

    tokio::time::sleep(Duration::from_millis(29_999)).await;
    settle().await;
    assert_eq!(fixture.session.connect_attempts(), 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    settle().await;
    // the retry ran; the send itself fails because the connection is down
    assert_eq!(fixture.session.connect_attempts(), 2);
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_retry_without_auto_reconnect() {
    let fixture = Fixture::new(SessionOptions {
        auto_reconnect: false,
        ..SessionOptions::default()
    });

    fixture.request_connect();
    fixture.session.enqueue(connect_response(
        SessionConnectResponse::rejected(7, 1_000, "busy"),
        0,
    ));
    assert!(!fixture.session.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(fixture.session.connect_attempts(), 1);
    assert_eq!(fixture.consumer.seen(), vec![Seen::ConnectFailed(1_000)]);
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_peer_disconnect_clears_queue_and_schedules_retry() {
    let fixture = Fixture::new(SessionOptions {
        disconnect_retry: Duration::from_millis(500),
        ..SessionOptions::default()
    });
    fixture.request_connect();
    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::accepted(), 77));
    fixture.session.enqueue(ticket(9, 77));

    let disconnect: Bytes = Message::new(SessionDisconnect::with_reason("closing"))
        .addressed(to_terminal(77), HOST)
        .encode()
        .unwrap()
        .into();
    fixture.session.enqueue(disconnect);
    assert!(!fixture.session.is_established());
    assert!(fixture.session.reconnect_pending());

    settle().await;
    assert_eq!(fixture.session.pending_messages(), 0);
    assert_eq!(
        fixture.consumer.seen(),
        vec![Seen::Connected, Seen::Ready, Seen::Disconnected]
    );

    // the peer's disconnect does not cancel its own retry
    assert!(fixture.session.reconnect_pending());
    tokio::time::sleep(Duration::from_millis(501)).await;
    settle().await;
    assert_eq!(fixture.session.connect_attempts(), 2);
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_while_established_is_ignored() {
    let fixture = Fixture::new(SessionOptions::default());
    fixture.request_connect();
    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::accepted(), 77));
    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::rejected(1, 100, "late"), 0));

    assert!(fixture.session.is_established());
    assert_eq!(fixture.session.sales_location(), 77);
    settle().await;
    assert_eq!(fixture.consumer.seen(), vec![Seen::Connected]);
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_application_send_requires_established_session() {
    let fixture = Fixture::new(SessionOptions::default());
    let mut message = Message::new(Ticket { serial: 5 });

    match fixture.session.send(&mut message) {
        Err(NetworkError::NotEstablished { .. }) => {}
        other => panic!("expected NotEstablished, got {other:?}"),
    }

    // session-layer traffic is allowed through to the connection, which is down
    let mut disconnect = Message::new(SessionDisconnect::with_reason("bye"));
    match fixture.session.send(&mut disconnect) {
        Err(NetworkError::NotConnected { .. }) => {}
        other => panic!("expected NotConnected, got {other:?}"),
    }
    assert_eq!(disconnect.header.to, HOST);
    assert_eq!(disconnect.header.from, TERMINAL);
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_permanent_session_survives_connection_loss() {
    let fixture = Fixture::new(SessionOptions {
        permanently_connected: true,
        ..SessionOptions::default()
    });
    assert!(fixture.session.is_established());

    fixture.session.connection_lost();
    assert!(fixture.session.is_established());
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_session_rejected() {
    let fixture = Fixture::new(SessionOptions::default());
    let twin = Session::create(
        &fixture.dispatcher,
        HOST,
        TERMINAL,
        SessionOptions::default(),
        Arc::new(RecordingConsumer::default()),
    )
    .unwrap();

    match fixture.connection.register_session(&twin) {
        Err(NetworkError::SessionExists { .. }) => {}
        other => panic!("expected SessionExists, got {other:?}"),
    }
    assert_eq!(fixture.connection.session_count(), 1);
    assert!(twin.connection().is_none());

    assert!(fixture.connection.deregister_session(&fixture.session.key()));
    assert!(fixture.session.connection().is_none());
    match fixture.session.connect_session() {
        Err(NetworkError::SessionUnattached { .. }) => {}
        other => panic!("expected SessionUnattached, got {other:?}"),
    }
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_response_only_affects_addressed_session() {
    let fixture = Fixture::new(SessionOptions::default());
    let neighbour_consumer = Arc::new(RecordingConsumer::default());
    let neighbour = Session::create(
        &fixture.dispatcher,
        HOST,
        SessionDescriptor::pack(2, 0, 5, 43),
        SessionOptions::default(),
        neighbour_consumer.clone(),
    )
    .unwrap();
    fixture.connection.register_session(&neighbour).unwrap();
    fixture.request_connect();
    assert!(neighbour.connect_session().is_err());

    // the receive task offers control frames to every session
    let response = connect_response(SessionConnectResponse::accepted(), 77);
    for session in fixture.connection.sessions() {
        assert!(session.is_interested(&response));
        session.enqueue(response.clone());
    }

    assert!(fixture.session.is_established());
    assert!(!neighbour.is_established());
    assert!(neighbour.awaiting_response());
    assert_eq!(neighbour.sales_location(), 0);
    settle().await;
    assert!(neighbour_consumer.seen().is_empty());
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_connect_response_is_dropped() {
    let fixture = Fixture::new(SessionOptions::default());
    assert!(!fixture.session.awaiting_response());

    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::accepted(), 77));
    assert!(!fixture.session.is_established());
    assert_eq!(fixture.session.sales_location(), 0);

    settle().await;
    assert!(fixture.consumer.seen().is_empty());
    fixture.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_cancels_retry_and_outstanding_connect() {
    let fixture = Fixture::new(SessionOptions::default());
    fixture.request_connect();
    fixture.session.enqueue(connect_response(
        SessionConnectResponse::rejected(7, 1_000, "busy"),
        0,
    ));
    assert!(fixture.session.reconnect_pending());
    settle().await;

    fixture.request_connect();
    fixture.session.connection_lost();
    assert!(!fixture.session.reconnect_pending());
    assert!(!fixture.session.awaiting_response());

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(fixture.session.connect_attempts(), 2);

    // a late answer to the abandoned request changes nothing
    fixture
        .session
        .enqueue(connect_response(SessionConnectResponse::accepted(), 77));
    assert!(!fixture.session.is_established());
    settle().await;
    assert_eq!(
        fixture.consumer.seen(),
        vec![Seen::ConnectFailed(1_000), Seen::Disconnected]
    );
    fixture.finish().await;
}
