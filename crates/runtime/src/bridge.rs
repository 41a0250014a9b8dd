//! Glue between a session and a terminal emulator.
//!
//! The emulator never talks to the transport. It reports keystrokes and
//! viewport changes as [`EmulatorEvent`]s, and the bridge applies session
//! events to it in order. Output is acknowledged to the session only after
//! [`Emulator::write`] returns, so a slow renderer throttles the remote.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};
use ttylink::{CloseReason, DEFAULT_RESIZE_WINDOW_MS, ErrorKind, ResizeCoalescer, SessionState};
use ttylink_protocol::{ClientOptions, Geometry, Preferences, TerminalOptions};

use crate::session::{BridgeEvent, SessionHandle};

/// Overlay shown when the session ends and the emulator is kept.
pub const CLOSED_OVERLAY: &str = "Connection Closed";

#[async_trait]
pub trait Emulator: Send {
	/// Renders output. Returning late is how the emulator applies backpressure.
	async fn write(&mut self, data: &[u8]) -> io::Result<()>;

	/// Current viewport size.
	fn dimensions(&self) -> Geometry;

	fn configure(&mut self, _client: &ClientOptions, _terminal: &TerminalOptions) {}

	fn set_title(&mut self, _title: &str) {}

	/// Live option change pushed by the remote.
	fn apply_option(&mut self, _key: &str, _value: &Value) {}

	/// The coalesced viewport size changed.
	fn resize(&mut self, _geometry: Geometry) {}

	fn show_overlay(&mut self, _message: &str) {}

	/// Arms or disarms the "leave this page?" confirmation.
	fn set_leave_alert(&mut self, _armed: bool) {}

	fn dispose(&mut self) {}
}

/// Input from the emulator side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorEvent {
	Input(Vec<u8>),
	Resize(Geometry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
	pub reason: CloseReason,
}

impl SessionOutcome {
	pub fn is_error(&self) -> bool {
		self.reason.is_error()
	}

	pub fn error_kind(&self) -> Option<ErrorKind> {
		match self.reason {
			CloseReason::Normal | CloseReason::Remote { .. } => None,
			CloseReason::TokenFetch(_) => Some(ErrorKind::TokenFetch),
			CloseReason::Connection(_) => Some(ErrorKind::Connection),
			CloseReason::Protocol(_) => Some(ErrorKind::Protocol),
		}
	}
}

pub struct TerminalBridge<E> {
	emulator: E,
	client: ClientOptions,
	terminal: TerminalOptions,
	resize_window: Duration,
	coalescer: ResizeCoalescer,
	leave_alert: bool,
	writable: bool,
}

impl<E: Emulator> TerminalBridge<E> {
	/// Configures `emulator` and takes its current size as the size the
	/// remote already knows from the handshake.
	pub fn new(mut emulator: E, client: ClientOptions, terminal: TerminalOptions) -> Self {
		emulator.configure(&client, &terminal);
		let coalescer = ResizeCoalescer::with_initial(emulator.dimensions());
		Self {
			emulator,
			client,
			terminal,
			resize_window: Duration::from_millis(DEFAULT_RESIZE_WINDOW_MS),
			coalescer,
			leave_alert: false,
			writable: true,
		}
	}

	pub fn with_resize_window(mut self, window: Duration) -> Self {
		self.resize_window = window;
		self
	}

	/// Runs until the session closes.
	///
	/// Dropping the sender of `input` counts as the emulator going away and
	/// closes the session.
	pub async fn run(
		&mut self,
		handle: SessionHandle,
		mut events: mpsc::UnboundedReceiver<BridgeEvent>,
		mut input: mpsc::Receiver<EmulatorEvent>,
	) -> SessionOutcome {
		let timer = sleep_until(Instant::now());
		tokio::pin!(timer);
		let mut timer_armed = false;
		let mut input_open = true;

		loop {
			tokio::select! {
				biased;

				event = events.recv() => {
					let Some(event) = event else {
						return self.closed(CloseReason::Connection("session ended without closing".into()));
					};
					if let BridgeEvent::Closed(reason) = event {
						return self.closed(reason);
					}
					self.on_session_event(event, &handle).await;
				}
				() = &mut timer, if timer_armed => {
					timer_armed = false;
					self.flush_resize(&handle);
				}
				event = input.recv(), if input_open => match event {
					Some(EmulatorEvent::Input(data)) => {
						if let Err(err) = handle.send_input(data) {
							debug!(error = %err, "input dropped");
						}
					}
					Some(EmulatorEvent::Resize(geometry)) => {
						if self.coalescer.push(geometry) {
							timer.as_mut().reset(Instant::now() + self.resize_window);
							timer_armed = true;
						}
					}
					None => {
						debug!("emulator detached, closing session");
						input_open = false;
						handle.close();
					}
				},
			}
		}
	}

	async fn on_session_event(&mut self, event: BridgeEvent, handle: &SessionHandle) {
		match event {
			BridgeEvent::State(SessionState::Open) => {
				if !self.client.disable_leave_alert {
					self.leave_alert = true;
					self.emulator.set_leave_alert(true);
				}
			}
			BridgeEvent::State(state) => debug!(%state, "session state"),
			BridgeEvent::Output(data) => {
				if !self.writable {
					return;
				}
				match self.emulator.write(&data).await {
					Ok(()) => handle.consumed(data.len()),
					Err(err) => {
						warn!(error = %err, "emulator write failed, closing session");
						self.writable = false;
						handle.close();
					}
				}
			}
			BridgeEvent::Title(title) => self.emulator.set_title(&title),
			BridgeEvent::SetOption { key, value } => self.on_option(key, value),
			BridgeEvent::Reconnect(seconds) => {
				debug!(seconds, "remote suggested a reconnect delay; reconnecting is up to the host");
			}
			BridgeEvent::Closed(_) => {}
		}
	}

	fn on_option(&mut self, key: String, value: Value) {
		let mut prefs = Preferences::new();
		prefs.insert(key, value);
		// Client options stay as resolved at startup; only the emulator sees the rest.
		if !self.terminal.merge_preferences(&prefs).is_empty() {
			debug!(?prefs, "not a terminal option, forwarding to the emulator only");
		}
		for (key, value) in &prefs {
			self.emulator.apply_option(key, value);
		}
	}

	fn flush_resize(&mut self, handle: &SessionHandle) {
		let Some(geometry) = self.coalescer.flush() else {
			return;
		};
		self.emulator.resize(geometry);
		if let Err(err) = handle.resize(geometry) {
			debug!(error = %err, "resize dropped");
		}
		if !self.client.disable_resize_overlay {
			self.emulator.show_overlay(&geometry.to_string());
		}
	}

	fn closed(&mut self, reason: CloseReason) -> SessionOutcome {
		if self.leave_alert {
			self.leave_alert = false;
			self.emulator.set_leave_alert(false);
		}
		if self.client.close_on_disconnect {
			self.emulator.dispose();
		} else {
			self.emulator.show_overlay(CLOSED_OVERLAY);
		}
		SessionOutcome { reason }
	}
}
