//! Session actor.
//!
//! One task owns the lifecycle and the flow controller. It consumes a single
//! ordered queue of [`SessionEvent`]s fed by the transport reader, the writer
//! task and every [`SessionHandle`], and is the only producer of outbound
//! frames. Each wakeup drains the queue completely (a drain cycle) and then
//! asks the flow controller for at most one acknowledgement.
//!
//! ```text
//!  SessionHandle --.
//!  reader task ----+--> inbox --> actor --> outbound --> writer task
//!  writer task ----'                |
//!                                   '--> BridgeEvent stream
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use ttylink::{CloseReason, Endpoints, FlowController, FlowSignal, Lifecycle, SessionState};
use ttylink_protocol::{ClientMessage, FlowControl, Geometry, Handshake, ServerMessage};

use crate::error::{Error, Result};
use crate::token::TokenProvider;
use crate::transport::{TransportEvent, TransportParts, TransportReceiver, TransportSender, WebSocketTransport};

/// How long the writer gets to flush its close frame before it is aborted.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Opens transports for [`Session::start`].
#[async_trait]
pub trait Connector: Send + Sync {
	async fn connect(&self, url: &str) -> Result<TransportParts>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
	async fn connect(&self, url: &str) -> Result<TransportParts> {
		WebSocketTransport::connect(url).await
	}
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub endpoints: Endpoints,
	pub flow_control: FlowControl,
	/// Viewport size at startup. A resize requested while connecting
	/// replaces it before the handshake goes out.
	pub geometry: Geometry,
}

/// Everything the emulator side needs to know, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
	/// Lifecycle moved to `Connecting`, `Open` or `Draining`.
	State(SessionState),
	/// Terminal event: the session is closed.
	Closed(CloseReason),
	Output(Vec<u8>),
	Title(String),
	SetOption { key: String, value: Value },
	/// Advisory reconnect delay in seconds.
	Reconnect(u32),
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
	Transport(TransportEvent),
	Command(Command),
	/// Output bytes the renderer finished with.
	Consumed(usize),
	/// The writer finished one frame.
	Flushed(std::result::Result<(), String>),
}

#[derive(Debug)]
pub(crate) enum Command {
	Input(Vec<u8>),
	Resize(Geometry),
	SetOption { key: String, value: Value },
	Close,
}

#[derive(Debug)]
enum Outbound {
	Frame(Vec<u8>),
	Close,
}

/// Cloneable handle for driving a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
	inbox: mpsc::UnboundedSender<SessionEvent>,
	state: watch::Receiver<SessionState>,
}

impl SessionHandle {
	/// Queues keystrokes. Input is not subject to flow control.
	pub fn send_input(&self, data: impl Into<Vec<u8>>) -> Result<()> {
		self.command(Command::Input(data.into()))
	}

	pub fn resize(&self, geometry: Geometry) -> Result<()> {
		self.command(Command::Resize(geometry))
	}

	pub fn set_option(&self, key: impl Into<String>, value: Value) -> Result<()> {
		self.command(Command::SetOption { key: key.into(), value })
	}

	/// Reports `len` output bytes as rendered.
	pub fn consumed(&self, len: usize) {
		let _ = self.inbox.send(SessionEvent::Consumed(len));
	}

	/// Requests a graceful close. Safe to call repeatedly.
	pub fn close(&self) {
		let _ = self.command(Command::Close);
	}

	pub fn state(&self) -> SessionState {
		*self.state.borrow()
	}

	/// Resolves once the session is closed.
	pub async fn closed(&self) {
		let mut state = self.state.clone();
		let _ = state.wait_for(|state| *state == SessionState::Closed).await;
	}

	fn command(&self, command: Command) -> Result<()> {
		self.inbox
			.send(SessionEvent::Command(command))
			.map_err(|_| Error::ChannelClosed)
	}
}

/// A running session: its handle, its event stream and the actor task.
pub struct Session {
	handle: SessionHandle,
	events: mpsc::UnboundedReceiver<BridgeEvent>,
	task: JoinHandle<CloseReason>,
}

impl Session {
	/// Connects and runs a session in the background.
	///
	/// Flow-control thresholds are validated here, before any network
	/// activity. Token and connection failures are not returned: they close
	/// the session and arrive as [`BridgeEvent::Closed`].
	pub fn start(config: SessionConfig, tokens: Arc<dyn TokenProvider>, connector: Arc<dyn Connector>) -> Result<Self> {
		let flow = FlowController::new(config.flow_control)?;
		let (mut actor, handle, events) = Actor::new(flow, config.geometry);

		let task = tokio::spawn(async move {
			actor.emit(BridgeEvent::State(SessionState::Connecting));
			if let Some((parts, token)) = actor.connect(&config, tokens.as_ref(), connector.as_ref()).await {
				let handshake = Handshake::new(token, actor.geometry);
				actor.attach(parts, handshake);
				actor.run().await;
			}
			actor.finish().await
		});

		Ok(Self { handle, events, task })
	}

	/// Runs a session over an already connected transport.
	pub fn spawn(parts: TransportParts, handshake: Handshake, flow_control: FlowControl) -> Result<Self> {
		let flow = FlowController::new(flow_control)?;
		let geometry = Geometry::cells(handshake.columns, handshake.rows);
		let (mut actor, handle, events) = Actor::new(flow, geometry);

		let task = tokio::spawn(async move {
			actor.emit(BridgeEvent::State(SessionState::Connecting));
			actor.attach(parts, handshake);
			actor.run().await;
			actor.finish().await
		});

		Ok(Self { handle, events, task })
	}

	pub fn handle(&self) -> SessionHandle {
		self.handle.clone()
	}

	pub async fn next_event(&mut self) -> Option<BridgeEvent> {
		self.events.recv().await
	}

	pub fn into_parts(self) -> (SessionHandle, mpsc::UnboundedReceiver<BridgeEvent>, JoinHandle<CloseReason>) {
		(self.handle, self.events, self.task)
	}
}

struct Actor {
	lifecycle: Lifecycle,
	flow: FlowController,
	inbox: mpsc::UnboundedReceiver<SessionEvent>,
	inbox_tx: mpsc::UnboundedSender<SessionEvent>,
	bridge: mpsc::UnboundedSender<BridgeEvent>,
	state: watch::Sender<SessionState>,
	outbound: Option<mpsc::UnboundedSender<Outbound>>,
	writer: Option<JoinHandle<()>>,
	reader: Option<JoinHandle<()>>,
	in_flight: usize,
	/// Latest viewport size requested by the emulator side.
	geometry: Geometry,
}

impl Actor {
	fn new(flow: FlowController, geometry: Geometry) -> (Self, SessionHandle, mpsc::UnboundedReceiver<BridgeEvent>) {
		let (inbox_tx, inbox) = mpsc::unbounded_channel();
		let (bridge, events) = mpsc::unbounded_channel();
		let (state, state_rx) = watch::channel(SessionState::Connecting);

		let handle = SessionHandle {
			inbox: inbox_tx.clone(),
			state: state_rx,
		};
		let actor = Self {
			lifecycle: Lifecycle::new(),
			flow,
			inbox,
			inbox_tx,
			bridge,
			state,
			outbound: None,
			writer: None,
			reader: None,
			in_flight: 0,
			geometry,
		};
		(actor, handle, events)
	}

	/// Fetches the token and opens the transport, still serving the inbox so
	/// a close request can abort the attempt.
	async fn connect(
		&mut self,
		config: &SessionConfig,
		tokens: &dyn TokenProvider,
		connector: &dyn Connector,
	) -> Option<(TransportParts, String)> {
		let establish = establish(config, tokens, connector);
		tokio::pin!(establish);

		loop {
			tokio::select! {
				result = &mut establish => match result {
					Ok(connected) => return Some(connected),
					Err(err) => {
						self.fail(err.close_reason());
						return None;
					}
				},
				event = self.inbox.recv() => {
					let Some(event) = event else { return None };
					self.handle(event);
					if self.lifecycle.is_closed() {
						return None;
					}
				}
			}
		}
	}

	fn attach(&mut self, parts: TransportParts, handshake: Handshake) {
		let TransportParts {
			sender,
			receiver,
			events,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		self.writer = Some(tokio::spawn(write_loop(sender, outbound_rx, self.inbox_tx.clone())));
		self.reader = Some(tokio::spawn(read_loop(receiver, events, self.inbox_tx.clone())));
		self.outbound = Some(outbound_tx);

		self.queue(ClientMessage::Handshake(handshake));
		match self.lifecycle.opened() {
			Ok(_) => {
				info!(target = "ttylink", "session open");
				self.transition();
			}
			Err(err) => debug!(error = %err, "handshake sent to a session that is not connecting"),
		}
	}

	async fn run(&mut self) {
		while !self.lifecycle.is_closed() {
			let Some(event) = self.inbox.recv().await else {
				self.fail(CloseReason::Connection("session inbox closed".into()));
				break;
			};
			self.handle(event);
			while !self.lifecycle.is_closed() {
				match self.inbox.try_recv() {
					Ok(event) => self.handle(event),
					Err(_) => break,
				}
			}
			self.end_cycle();
		}
	}

	/// Releases the connection and reports the close. Runs on every exit path.
	async fn finish(mut self) -> CloseReason {
		let reason = self.lifecycle.close_reason().cloned().unwrap_or(CloseReason::Normal);

		if let Some(outbound) = self.outbound.take() {
			let _ = outbound.send(Outbound::Close);
		}
		if let Some(mut writer) = self.writer.take() {
			if tokio::time::timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
				debug!("writer did not finish in time, aborting");
				writer.abort();
			}
		}
		if let Some(reader) = self.reader.take() {
			reader.abort();
		}
		// Flush reports that arrived while the writer wound down.
		while let Ok(event) = self.inbox.try_recv() {
			if let SessionEvent::Flushed(Ok(())) = event {
				self.in_flight = self.in_flight.saturating_sub(1);
			}
		}
		if self.in_flight > 0 {
			warn!(target = "ttylink", in_flight = self.in_flight, "dropping unsent writes");
		}

		if reason.is_error() {
			warn!(target = "ttylink", %reason, "session closed");
		} else {
			info!(target = "ttylink", %reason, "session closed");
		}
		self.state.send_replace(SessionState::Closed);
		self.emit(BridgeEvent::Closed(reason.clone()));
		reason
	}

	fn handle(&mut self, event: SessionEvent) {
		match event {
			SessionEvent::Transport(event) => self.on_transport(event),
			SessionEvent::Command(command) => self.on_command(command),
			SessionEvent::Consumed(len) => self.flow.on_consumed(len),
			SessionEvent::Flushed(result) => self.on_flushed(result),
		}
	}

	fn on_transport(&mut self, event: TransportEvent) {
		match event {
			TransportEvent::Message(data) => {
				if !self.lifecycle.accepts_inbound() {
					trace!(len = data.len(), state = %self.lifecycle.state(), "discarding inbound frame");
					return;
				}
				match ServerMessage::decode(&data) {
					Ok(message) => self.on_message(message),
					Err(err) => {
						warn!(error = %err, "malformed frame from remote");
						self.fail(CloseReason::Protocol(err.to_string()));
					}
				}
			}
			TransportEvent::Closed { code, reason } => {
				debug!(?code, %reason, "remote closed connection");
				self.fail(CloseReason::Remote { code, reason });
			}
			TransportEvent::Error(err) => {
				warn!(error = %err, "transport error");
				self.fail(CloseReason::Connection(err));
			}
		}
	}

	fn on_message(&mut self, message: ServerMessage) {
		trace!(kind = message.kind(), "inbound frame");
		match message {
			ServerMessage::Output(data) => {
				if let Some(signal) = self.flow.on_data(data.len()) {
					self.send_signal(signal);
				}
				self.emit(BridgeEvent::Output(data));
			}
			ServerMessage::SetWindowTitle(title) => self.emit(BridgeEvent::Title(title)),
			ServerMessage::SetPreferences(prefs) => {
				for (key, value) in prefs {
					self.emit(BridgeEvent::SetOption { key, value });
				}
			}
			ServerMessage::SetReconnect(seconds) => self.emit(BridgeEvent::Reconnect(seconds)),
		}
	}

	fn on_command(&mut self, command: Command) {
		let message = match command {
			Command::Close => return self.on_close_requested(),
			Command::Input(data) => ClientMessage::Input(data),
			Command::Resize(geometry) if self.lifecycle.state() == SessionState::Connecting => {
				debug!(%geometry, "resized while connecting, announcing it in the handshake");
				self.geometry = geometry;
				return;
			}
			Command::Resize(geometry) => {
				if self.lifecycle.accepts_writes() {
					self.geometry = geometry;
				}
				ClientMessage::Resize(geometry)
			}
			Command::SetOption { key, value } => ClientMessage::SetOption { key, value },
		};
		if !self.lifecycle.accepts_writes() {
			warn!(state = %self.lifecycle.state(), kind = message.kind(), "dropping write, session is not open");
			return;
		}
		self.queue(message);
	}

	fn on_close_requested(&mut self) {
		match self.lifecycle.request_close(self.in_flight) {
			Ok(SessionState::Draining) => {
				debug!(in_flight = self.in_flight, "draining before close");
				self.transition();
			}
			Ok(_) => debug!("session closed locally"),
			Err(err) => debug!(error = %err, "ignoring close request"),
		}
	}

	fn on_flushed(&mut self, result: std::result::Result<(), String>) {
		self.in_flight = self.in_flight.saturating_sub(1);
		if let Err(err) = result {
			warn!(error = %err, "write failed");
			self.fail(CloseReason::Connection(err));
			return;
		}
		if self.lifecycle.state() == SessionState::Draining && self.in_flight == 0 && self.lifecycle.drained().is_ok() {
			debug!("outstanding writes flushed");
		}
	}

	fn end_cycle(&mut self) {
		if !self.lifecycle.accepts_writes() {
			return;
		}
		if let Some(signal) = self.flow.end_cycle() {
			self.send_signal(signal);
		}
	}

	fn send_signal(&mut self, signal: FlowSignal) {
		match signal {
			FlowSignal::Pause => self.queue(ClientMessage::Pause),
			FlowSignal::Resume { ack } => {
				self.queue(ClientMessage::Resume);
				if ack > 0 {
					self.queue(ClientMessage::Ack(ack));
				}
			}
			FlowSignal::Ack(ack) => self.queue(ClientMessage::Ack(ack)),
		}
	}

	fn queue(&mut self, message: ClientMessage) {
		let Some(outbound) = &self.outbound else {
			return;
		};
		trace!(kind = message.kind(), "outbound frame");
		if outbound.send(Outbound::Frame(message.encode())).is_ok() {
			self.in_flight += 1;
		}
	}

	fn fail(&mut self, reason: CloseReason) {
		if let Err(err) = self.lifecycle.fail(reason) {
			trace!(error = %err, "session already closed");
		}
	}

	/// Publishes a non-terminal state change once.
	fn transition(&mut self) {
		let state = self.lifecycle.state();
		if state == SessionState::Closed || *self.state.borrow() == state {
			return;
		}
		self.state.send_replace(state);
		self.emit(BridgeEvent::State(state));
	}

	fn emit(&self, event: BridgeEvent) {
		if self.bridge.send(event).is_err() {
			trace!("bridge event dropped, nobody is listening");
		}
	}
}

async fn establish(
	config: &SessionConfig,
	tokens: &dyn TokenProvider,
	connector: &dyn Connector,
) -> Result<(TransportParts, String)> {
	let token = tokens.fetch().await?;
	debug!(url = %config.endpoints.ws_url, "connecting");
	let parts = connector.connect(&config.endpoints.ws_url).await?;
	Ok((parts, token))
}

async fn write_loop(
	mut sender: Box<dyn TransportSender>,
	mut outbound: mpsc::UnboundedReceiver<Outbound>,
	inbox: mpsc::UnboundedSender<SessionEvent>,
) {
	while let Some(item) = outbound.recv().await {
		match item {
			Outbound::Frame(frame) => {
				let result = sender.send(frame).await.map_err(|err| err.to_string());
				let failed = result.is_err();
				if inbox.send(SessionEvent::Flushed(result)).is_err() || failed {
					return;
				}
			}
			Outbound::Close => {
				if let Err(err) = sender.close().await {
					debug!(error = %err, "close frame not sent");
				}
				return;
			}
		}
	}
}

async fn read_loop(
	receiver: Box<dyn TransportReceiver>,
	mut events: mpsc::UnboundedReceiver<TransportEvent>,
	inbox: mpsc::UnboundedSender<SessionEvent>,
) {
	// The receiver is dropped when it finishes, which ends `events`.
	let pump = async move {
		let mut receiver = receiver;
		receiver.run().await;
	};
	let forward = async move {
		while let Some(event) = events.recv().await {
			if inbox.send(SessionEvent::Transport(event)).is_err() {
				return;
			}
		}
	};
	tokio::join!(pump, forward);
}

#[cfg(test)]
mod tests;
