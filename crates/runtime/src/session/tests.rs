use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use ttylink::ConfigError;

use super::*;
use crate::token::StaticToken;
use crate::transport::{ChannelRemote, ChannelTransport, RemoteFrame};

const TIMEOUT: Duration = Duration::from_secs(5);

fn endpoints() -> Endpoints {
	Endpoints {
		ws_url: "ws://localhost:7681/ws".into(),
		token_url: "http://localhost:7681/token".into(),
	}
}

fn small_window() -> FlowControl {
	FlowControl {
		limit: 100,
		high_water: 10,
		low_water: 4,
	}
}

async fn next(session: &mut Session) -> BridgeEvent {
	tokio::time::timeout(TIMEOUT, session.next_event())
		.await
		.expect("timed out waiting for bridge event")
		.expect("bridge stream ended")
}

async fn next_frame(remote: &mut ChannelRemote) -> ClientMessage {
	let frame = tokio::time::timeout(TIMEOUT, remote.recv())
		.await
		.expect("timed out waiting for frame")
		.expect("transport dropped");
	match frame {
		RemoteFrame::Message(bytes) => ClientMessage::decode(&bytes).unwrap(),
		RemoteFrame::Close => panic!("expected a frame, got close"),
	}
}

async fn expect_close_frame(remote: &mut ChannelRemote) {
	let frame = tokio::time::timeout(TIMEOUT, remote.recv()).await.expect("timed out waiting for close");
	assert_eq!(frame, Some(RemoteFrame::Close));
}

/// Spawns a session over a channel transport and waits until it is open.
async fn open_session(capacity: usize, flow: FlowControl) -> (Session, ChannelRemote) {
	let (parts, mut remote) = ChannelTransport::pair(capacity);
	let mut session = Session::spawn(parts, Handshake::new("tok", Geometry::cells(80, 24)), flow).unwrap();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Connecting));
	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Open));
	assert_eq!(
		next_frame(&mut remote).await,
		ClientMessage::Handshake(Handshake::new("tok", Geometry::cells(80, 24)))
	);
	(session, remote)
}

#[tokio::test]
async fn test_output_is_forwarded_and_acknowledged_after_consumption() {
	let (mut session, mut remote) = open_session(8, FlowControl::default()).await;
	let handle = session.handle();

	remote.send(&ServerMessage::Output(b"hello".to_vec()));
	remote.send(&ServerMessage::Output(b" world".to_vec()));
	assert_eq!(next(&mut session).await, BridgeEvent::Output(b"hello".to_vec()));
	assert_eq!(next(&mut session).await, BridgeEvent::Output(b" world".to_vec()));

	handle.consumed(5);
	handle.consumed(6);
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Ack(11));
	assert!(remote.try_recv().is_none());
}

#[tokio::test]
async fn test_high_water_pauses_until_drained_to_low_water() {
	let (mut session, mut remote) = open_session(8, small_window()).await;
	let handle = session.handle();

	remote.send(&ServerMessage::Output(vec![b'x'; 11]));
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Pause);
	assert_eq!(next(&mut session).await, BridgeEvent::Output(vec![b'x'; 11]));

	// Still above low water: nothing is acknowledged.
	handle.consumed(5);
	handle.send_input("q").unwrap();
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Input(b"q".to_vec()));

	handle.consumed(3);
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Resume);
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Ack(8));

	handle.consumed(3);
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Ack(3));
}

#[tokio::test]
async fn test_close_with_writes_in_flight_drains_before_closing() {
	let (mut session, mut remote) = open_session(1, FlowControl::default()).await;
	let handle = session.handle();

	handle.send_input("a").unwrap();
	handle.send_input("b").unwrap();
	handle.send_input("c").unwrap();
	handle.close();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Draining));
	assert_eq!(handle.state(), SessionState::Draining);

	// Writes and inbound frames are ignored while draining.
	handle.send_input("d").unwrap();
	remote.send(&ServerMessage::Output(b"late".to_vec()));
	handle.close();

	for expected in ["a", "b", "c"] {
		assert_eq!(next_frame(&mut remote).await, ClientMessage::Input(expected.as_bytes().to_vec()));
	}
	expect_close_frame(&mut remote).await;

	assert_eq!(next(&mut session).await, BridgeEvent::Closed(CloseReason::Normal));
	assert_eq!(session.next_event().await, None);
	assert_eq!(handle.state(), SessionState::Closed);
	assert!(matches!(handle.send_input("e"), Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn test_close_without_pending_writes_is_immediate() {
	let (mut session, mut remote) = open_session(4, FlowControl::default()).await;
	let handle = session.handle();
	// Let the handshake flush report arrive first.
	tokio::time::sleep(Duration::from_millis(20)).await;

	handle.close();
	assert_eq!(next(&mut session).await, BridgeEvent::Closed(CloseReason::Normal));
	expect_close_frame(&mut remote).await;
	handle.closed().await;
}

#[tokio::test]
async fn test_side_channel_frames_are_forwarded() {
	let (mut session, remote) = open_session(4, FlowControl::default()).await;

	remote.send(&ServerMessage::SetWindowTitle("vim (host)".into()));
	let mut prefs = ttylink_protocol::Preferences::new();
	prefs.insert("fontSize".into(), json!(16));
	prefs.insert("closeOnDisconnect".into(), json!(true));
	remote.send(&ServerMessage::SetPreferences(prefs));
	remote.send(&ServerMessage::SetReconnect(10));

	assert_eq!(next(&mut session).await, BridgeEvent::Title("vim (host)".into()));
	let mut options = BTreeMap::new();
	for _ in 0..2 {
		match next(&mut session).await {
			BridgeEvent::SetOption { key, value } => {
				options.insert(key, value);
			}
			other => panic!("expected an option, got {other:?}"),
		}
	}
	assert_eq!(options["fontSize"], json!(16));
	assert_eq!(options["closeOnDisconnect"], json!(true));
	assert_eq!(next(&mut session).await, BridgeEvent::Reconnect(10));
}

#[tokio::test]
async fn test_local_writes_are_framed() {
	let (session, mut remote) = open_session(8, FlowControl::default()).await;
	let handle = session.handle();

	handle.send_input("ls\r").unwrap();
	handle.resize(Geometry::cells(120, 40)).unwrap();
	handle.set_option("enableSixel", json!(true)).unwrap();

	assert_eq!(next_frame(&mut remote).await, ClientMessage::Input(b"ls\r".to_vec()));
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Resize(Geometry::cells(120, 40)));
	assert_eq!(
		next_frame(&mut remote).await,
		ClientMessage::SetOption {
			key: "enableSixel".into(),
			value: json!(true),
		}
	);
}

#[tokio::test]
async fn test_malformed_frame_closes_with_protocol_error() {
	let (mut session, mut remote) = open_session(4, FlowControl::default()).await;

	remote.send_raw(b"9??".to_vec());
	match next(&mut session).await {
		BridgeEvent::Closed(CloseReason::Protocol(message)) => assert!(message.contains("'9'"), "{message}"),
		other => panic!("expected protocol close, got {other:?}"),
	}
	expect_close_frame(&mut remote).await;
}

#[tokio::test]
async fn test_remote_close_is_reported() {
	let (mut session, remote) = open_session(4, FlowControl::default()).await;

	remote.close(1000, "pty exited");
	assert_eq!(
		next(&mut session).await,
		BridgeEvent::Closed(CloseReason::Remote {
			code: Some(1000),
			reason: "pty exited".into(),
		})
	);
}

#[tokio::test]
async fn test_transport_error_closes_session() {
	let (session, remote) = open_session(4, FlowControl::default()).await;
	let (_handle, _events, task) = session.into_parts();

	remote.fail("connection reset");
	let reason = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
	assert_eq!(reason, CloseReason::Connection("connection reset".into()));
	assert!(reason.is_error());
}

#[derive(Default)]
struct TestConnector {
	parts: Mutex<Option<TransportParts>>,
	calls: AtomicUsize,
	urls: Mutex<Vec<String>>,
}

impl TestConnector {
	fn with(parts: TransportParts) -> Self {
		Self {
			parts: Mutex::new(Some(parts)),
			..Self::default()
		}
	}
}

#[async_trait]
impl Connector for TestConnector {
	async fn connect(&self, url: &str) -> Result<TransportParts> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.urls.lock().unwrap().push(url.to_string());
		self.parts
			.lock()
			.unwrap()
			.take()
			.ok_or_else(|| Error::Connection("connection refused".into()))
	}
}

struct FailingTokens;

#[async_trait]
impl TokenProvider for FailingTokens {
	async fn fetch(&self) -> Result<String> {
		Err(Error::TokenFetch {
			url: "http://localhost:7681/token".into(),
			reason: "HTTP 401 Unauthorized".into(),
		})
	}
}

#[derive(Default)]
struct PendingTokens {
	calls: AtomicUsize,
}

#[async_trait]
impl TokenProvider for PendingTokens {
	async fn fetch(&self) -> Result<String> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		std::future::pending().await
	}
}

fn config(flow_control: FlowControl) -> SessionConfig {
	SessionConfig {
		endpoints: endpoints(),
		flow_control,
		geometry: Geometry::cells(100, 30),
	}
}

#[tokio::test]
async fn test_start_sends_token_and_geometry_in_handshake() {
	let (parts, mut remote) = ChannelTransport::pair(4);
	let connector = Arc::new(TestConnector::with(parts));
	let mut session = Session::start(
		config(FlowControl::default()),
		Arc::new(StaticToken::new("secret")),
		connector.clone(),
	)
	.unwrap();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Connecting));
	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Open));
	assert_eq!(
		next_frame(&mut remote).await,
		ClientMessage::Handshake(Handshake {
			auth_token: "secret".into(),
			columns: 100,
			rows: 30,
		})
	);
	assert_eq!(*connector.urls.lock().unwrap(), vec![endpoints().ws_url]);
}

#[tokio::test]
async fn test_token_failure_closes_without_connecting() {
	let connector = Arc::new(TestConnector::default());
	let mut session = Session::start(config(FlowControl::default()), Arc::new(FailingTokens), connector.clone()).unwrap();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Connecting));
	match next(&mut session).await {
		BridgeEvent::Closed(CloseReason::TokenFetch(message)) => assert!(message.contains("401"), "{message}"),
		other => panic!("expected token failure, got {other:?}"),
	}
	assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connection_failure_closes_session() {
	let connector = Arc::new(TestConnector::default());
	let mut session = Session::start(config(FlowControl::default()), Arc::new(StaticToken::default()), connector).unwrap();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Connecting));
	assert!(matches!(next(&mut session).await, BridgeEvent::Closed(CloseReason::Connection(_))));
}

#[tokio::test]
async fn test_invalid_flow_control_is_rejected_before_network_activity() {
	let tokens = Arc::new(PendingTokens::default());
	let connector = Arc::new(TestConnector::default());
	let flow = FlowControl {
		limit: 0,
		high_water: 0,
		low_water: 0,
	};

	let Err(err) = Session::start(config(flow), tokens.clone(), connector.clone()) else {
		panic!("invalid thresholds were accepted");
	};
	assert!(matches!(err, Error::Configuration(ConfigError::ZeroLimit)));

	tokio::task::yield_now().await;
	assert_eq!(tokens.calls.load(Ordering::SeqCst), 0);
	assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_while_connecting_aborts_attempt() {
	let tokens = Arc::new(PendingTokens::default());
	let connector = Arc::new(TestConnector::default());
	let mut session = Session::start(config(FlowControl::default()), tokens, connector.clone()).unwrap();
	let handle = session.handle();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Connecting));
	handle.send_input("too early").unwrap();
	handle.close();

	assert_eq!(next(&mut session).await, BridgeEvent::Closed(CloseReason::Normal));
	assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
}

/// Token provider that answers once released.
#[derive(Default)]
struct GatedTokens {
	release: tokio::sync::Notify,
}

#[async_trait]
impl TokenProvider for GatedTokens {
	async fn fetch(&self) -> Result<String> {
		self.release.notified().await;
		Ok("t".into())
	}
}

#[tokio::test]
async fn test_resize_while_connecting_is_announced_in_handshake() {
	let (parts, mut remote) = ChannelTransport::pair(4);
	let tokens = Arc::new(GatedTokens::default());
	let mut session = Session::start(
		config(FlowControl::default()),
		tokens.clone(),
		Arc::new(TestConnector::with(parts)),
	)
	.unwrap();
	let handle = session.handle();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Connecting));
	handle.resize(Geometry::cells(132, 43)).unwrap();
	// Let the actor take the resize before the token arrives.
	tokio::time::sleep(Duration::from_millis(20)).await;
	tokens.release.notify_one();

	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Open));
	assert_eq!(
		next_frame(&mut remote).await,
		ClientMessage::Handshake(Handshake {
			auth_token: "t".into(),
			columns: 132,
			rows: 43,
		})
	);
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(remote.try_recv().is_none());
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
	fn contents(&self) -> String {
		String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
	}
}

impl std::io::Write for CapturedLogs {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.0.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
	type Writer = Self;

	fn make_writer(&'a self) -> Self::Writer {
		self.clone()
	}
}

#[tokio::test]
async fn test_remote_close_while_draining_warns_about_unsent_writes() {
	let logs = CapturedLogs::default();
	let subscriber = tracing_subscriber::fmt()
		.with_writer(logs.clone())
		.with_ansi(false)
		.with_max_level(tracing::Level::WARN)
		.finish();
	let _guard = tracing::subscriber::set_default(subscriber);

	let (mut session, mut remote) = open_session(1, FlowControl::default()).await;
	let handle = session.handle();

	handle.send_input("a").unwrap();
	handle.send_input("b").unwrap();
	handle.send_input("c").unwrap();
	handle.close();
	assert_eq!(next(&mut session).await, BridgeEvent::State(SessionState::Draining));

	// "a" fits the one-frame buffer; "b" and "c" never leave.
	remote.close(1011, "pty exited");
	assert_eq!(
		next(&mut session).await,
		BridgeEvent::Closed(CloseReason::Remote {
			code: Some(1011),
			reason: "pty exited".into(),
		})
	);
	assert_eq!(next_frame(&mut remote).await, ClientMessage::Input(b"a".to_vec()));

	let logs = logs.contents();
	assert!(logs.contains("dropping unsent writes"), "{logs}");
	assert!(logs.contains("in_flight=2"), "{logs}");
}
