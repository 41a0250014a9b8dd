//! `TerminalClient`: one terminal session bound to one xterm.js instance.
//!
//! All state lives in a single `Inner` behind `Rc<RefCell<_>>`. Every JS
//! callback holds a `Weak` to it, upgrades, and drops its borrow before
//! calling back into JS (overlay handler, `Terminal.write`, `dispose`), so a
//! handler that re-enters the client never trips over an active borrow.
//!
//! A drain cycle here is one `Terminal.write` completion callback: the
//! renderer's consumption is recorded and at most one acknowledgement goes out.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Function, Object, Uint8Array};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ttylink::{
	CloseReason, DEFAULT_RESIZE_WINDOW_MS, FlowController, FlowSignal, Lifecycle, PageLocation, ResizeCoalescer,
	SessionState, resolve_endpoints,
};
use ttylink_protocol::{
	ClientMessage, ClientOptions, FlowControl, Geometry, Handshake, Preferences, SUBPROTOCOL, ServerMessage,
	TerminalOptions,
};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{BeforeUnloadEvent, BinaryType, CloseEvent, Event, MessageEvent, WebSocket};

use crate::fetch::{describe, fetch_token};
use crate::xterm::{Disposable, XTerm};

const CLOSED_OVERLAY: &str = "Connection Closed";
const LEAVE_ALERT: &str = "Close terminal? this will also terminate the command.";
/// Poll interval for `bufferedAmount` while draining.
const DRAIN_POLL_MS: i32 = 20;

/// Options accepted by the `TerminalClient` constructor.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ClientConfig {
	client: ClientOptions,
	terminal: TerminalOptions,
	flow_control: FlowControl,
	resize_window_ms: Option<u32>,
}

struct SocketHandlers {
	open: Closure<dyn FnMut()>,
	message: Closure<dyn FnMut(MessageEvent)>,
	close: Closure<dyn FnMut(CloseEvent)>,
	error: Closure<dyn FnMut(Event)>,
}

struct Inner {
	xterm: XTerm,
	client: ClientOptions,
	terminal: TerminalOptions,
	flow: FlowController,
	lifecycle: Lifecycle,
	coalescer: ResizeCoalescer,
	resize_window_ms: i32,
	resize_timer: Option<i32>,
	socket: Option<WebSocket>,
	handlers: Option<SocketHandlers>,
	listeners: Vec<Disposable>,
	on_data: Option<Closure<dyn FnMut(String)>>,
	on_resize: Option<Closure<dyn FnMut(JsValue)>>,
	on_unload: Option<Closure<dyn FnMut(BeforeUnloadEvent)>>,
	overlay: Option<Function>,
	leave_alert: bool,
}

#[wasm_bindgen]
pub struct TerminalClient {
	inner: Rc<RefCell<Inner>>,
}

#[wasm_bindgen]
impl TerminalClient {
	/// Validates `options` and applies the terminal options to `xterm`.
	///
	/// `options` is `{ client, terminal, flowControl, resizeWindowMs }`, each
	/// optional. Invalid flow-control thresholds are rejected here, before
	/// any network activity.
	#[wasm_bindgen(constructor)]
	pub fn new(xterm: XTerm, options: JsValue) -> Result<TerminalClient, JsError> {
		let config: ClientConfig = if options.is_undefined() || options.is_null() {
			ClientConfig::default()
		} else {
			serde_wasm_bindgen::from_value(options).map_err(|err| JsError::new(&format!("invalid options: {err}")))?
		};
		let flow = FlowController::new(config.flow_control).map_err(|err| JsError::new(&err.to_string()))?;
		let resize_window_ms = config.resize_window_ms.map_or(DEFAULT_RESIZE_WINDOW_MS, u64::from);

		let inner = Inner {
			xterm,
			client: config.client,
			terminal: config.terminal,
			flow,
			lifecycle: Lifecycle::new(),
			coalescer: ResizeCoalescer::new(),
			resize_window_ms: i32::try_from(resize_window_ms).unwrap_or(i32::MAX),
			resize_timer: None,
			socket: None,
			handlers: None,
			listeners: Vec::new(),
			on_data: None,
			on_resize: None,
			on_unload: None,
			overlay: None,
			leave_alert: false,
		};
		inner.configure();
		Ok(Self {
			inner: Rc::new(RefCell::new(inner)),
		})
	}

	/// Receives overlay messages such as `"120x40"` or `"Connection Closed"`.
	#[wasm_bindgen(js_name = setOverlayHandler)]
	pub fn set_overlay_handler(&self, handler: Function) {
		self.inner.borrow_mut().overlay = Some(handler);
	}

	/// `"connecting"`, `"open"`, `"draining"` or `"closed"`.
	pub fn state(&self) -> String {
		self.inner.borrow().lifecycle.state().as_str().to_string()
	}

	/// Fetches the token and opens the WebSocket for the current page.
	///
	/// Resolves once the socket is created; the session opens when the
	/// handshake goes out. Rejects on endpoint or token errors.
	pub fn connect(&self) -> js_sys::Promise {
		let inner = self.inner.clone();
		wasm_bindgen_futures::future_to_promise(async move {
			connect(inner)
				.await
				.map(|()| JsValue::UNDEFINED)
				.map_err(|err| JsError::new(&err).into())
		})
	}

	/// The resolved client options, for the host that loads the renderer
	/// and file transfer addons they select.
	#[wasm_bindgen(getter, js_name = clientOptions)]
	pub fn client_options(&self) -> Result<JsValue, JsError> {
		let serializer = serde_wasm_bindgen::Serializer::json_compatible();
		self.inner
			.borrow()
			.client
			.serialize(&serializer)
			.map_err(|err| JsError::new(&err.to_string()))
	}

	/// Closes the session, letting buffered writes drain first.
	pub fn close(&self) {
		request_close(&self.inner);
	}
}

impl Inner {
	fn configure(&self) {
		let serializer = serde_wasm_bindgen::Serializer::json_compatible();
		let options = self.xterm.options();
		match self.terminal.serialize(&serializer) {
			Ok(terminal) => {
				if let (Ok(target), Ok(source)) = (options.clone().dyn_into::<Object>(), terminal.dyn_into::<Object>()) {
					Object::assign(&target, &source);
				}
			}
			Err(err) => warn!(error = %err, "terminal options not applied"),
		}
		for (key, value) in &self.client.emulator_options() {
			set_option(&options, key, value);
		}
		let version = JsValue::from_str(&self.client.unicode_version);
		match js_sys::Reflect::set(&self.xterm.unicode(), &JsValue::from_str("activeVersion"), &version) {
			Ok(true) => {}
			Ok(false) => debug!(version = %self.client.unicode_version, "unicode version not applied"),
			// xterm.js throws for a version no addon has registered.
			Err(err) => debug!(version = %self.client.unicode_version, error = %describe(err), "unicode version not applied"),
		}
		debug!(
			renderer = ?self.client.renderer_type,
			zmodem = self.client.enable_zmodem,
			trzsz = self.client.enable_trzsz,
			sixel = self.client.enable_sixel,
			"addon selection left to the host"
		);
	}

	fn geometry(&self) -> Geometry {
		let geometry = Geometry::cells(self.xterm.cols(), self.xterm.rows());
		let Some(element) = self.xterm.element() else {
			return geometry;
		};
		with_viewport(geometry, element.client_width(), element.client_height())
	}

	fn send(&self, message: &ClientMessage) {
		let Some(socket) = &self.socket else {
			return;
		};
		if let Err(err) = socket.send_with_u8_array(&message.encode()) {
			warn!(kind = message.kind(), error = %describe(err), "send failed");
		}
	}

	fn signal(&self, signal: FlowSignal) {
		match signal {
			FlowSignal::Pause => self.send(&ClientMessage::Pause),
			FlowSignal::Resume { ack } => {
				self.send(&ClientMessage::Resume);
				if ack > 0 {
					self.send(&ClientMessage::Ack(ack));
				}
			}
			FlowSignal::Ack(ack) => self.send(&ClientMessage::Ack(ack)),
		}
	}

	/// Pushes the terminal keys of `prefs` to xterm.js. Client options stay
	/// as resolved at construction.
	fn apply_preferences(&mut self, prefs: &Preferences) {
		let rejected = self.terminal.merge_preferences(prefs);
		let options = self.xterm.options();
		for (key, value) in prefs {
			if rejected.contains(key) {
				debug!(key, "ignoring preference that is not a terminal option");
				continue;
			}
			set_option(&options, key, value);
		}
	}

	fn detach_socket(&mut self) -> Option<WebSocket> {
		let socket = self.socket.take()?;
		socket.set_onopen(None);
		socket.set_onmessage(None);
		socket.set_onclose(None);
		socket.set_onerror(None);
		Some(socket)
	}

	fn remove_unload_listener(&self) {
		if let (Some(window), Some(listener)) = (web_sys::window(), &self.on_unload) {
			if let Err(err) = window.remove_event_listener_with_callback("beforeunload", listener.as_ref().unchecked_ref()) {
				debug!(error = %describe(err), "failed to remove the leave alert");
			}
		}
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		if let Some(socket) = self.detach_socket() {
			if let Err(err) = socket.close_with_code(1000) {
				debug!(error = %describe(err), "close failed");
			}
		}
		self.remove_unload_listener();
		for listener in self.listeners.drain(..) {
			listener.dispose();
		}
	}
}

/// Pixel size of the terminal element. A detached element reports zero,
/// which stays "unknown".
fn with_viewport(geometry: Geometry, width: i32, height: i32) -> Geometry {
	let pixels = |extent: i32| u32::try_from(extent).unwrap_or(0);
	geometry.with_pixels(pixels(width), pixels(height))
}

/// Sets one xterm.js option, logging the failure when xterm.js rejects it.
fn set_option(options: &JsValue, key: &str, value: &serde_json::Value) {
	if let Err(err) = try_set_option(options, key, value) {
		debug!(key, error = %err, "emulator option not applied");
	}
}

fn try_set_option(options: &JsValue, key: &str, value: &serde_json::Value) -> Result<(), String> {
	let serializer = serde_wasm_bindgen::Serializer::json_compatible();
	let value = value.serialize(&serializer).map_err(|err| err.to_string())?;
	match js_sys::Reflect::set(options, &JsValue::from_str(key), &value) {
		Ok(true) => Ok(()),
		Ok(false) => Err("option is read-only".into()),
		// xterm.js throws for keys it does not know.
		Err(err) => Err(describe(err)),
	}
}

fn page_location() -> Result<PageLocation, String> {
	let location = web_sys::window().ok_or_else(|| "no window".to_string())?.location();
	let protocol = location.protocol().map_err(describe)?;
	let host = location.host().map_err(describe)?;
	let path = location.pathname().map_err(describe)?;
	let search = location.search().map_err(describe)?;
	Ok(PageLocation::new(&protocol, &host, &path, Some(&search)))
}

async fn connect(inner: Rc<RefCell<Inner>>) -> Result<(), String> {
	{
		let this = inner.borrow();
		if this.socket.is_some() || this.lifecycle.state() != SessionState::Connecting {
			return Err(format!("cannot connect a session in state {}", this.lifecycle.state()));
		}
	}

	let endpoints = resolve_endpoints(&page_location()?);
	info!(url = %endpoints.ws_url, "connecting");

	let token = match fetch_token(&endpoints.token_url).await {
		Ok(token) => token,
		Err(err) => {
			warn!(url = %endpoints.token_url, error = %err, "token fetch failed");
			fail(&inner, CloseReason::TokenFetch(err.clone()));
			return Err(format!("token fetch failed: {err}"));
		}
	};
	if inner.borrow().lifecycle.is_closed() {
		// Closed while the token was in flight.
		return Ok(());
	}

	if let Err(err) = open_socket(&inner, &endpoints.ws_url, token) {
		fail(&inner, CloseReason::Connection(err.clone()));
		return Err(err);
	}
	install_listeners(&inner);
	Ok(())
}

fn open_socket(inner: &Rc<RefCell<Inner>>, url: &str, token: String) -> Result<(), String> {
	let socket = WebSocket::new_with_str(url, SUBPROTOCOL).map_err(describe)?;
	socket.set_binary_type(BinaryType::Arraybuffer);

	let weak = Rc::downgrade(inner);
	let handlers = SocketHandlers {
		open: {
			let weak = weak.clone();
			Closure::new(move || {
				if let Some(inner) = weak.upgrade() {
					on_open(&inner, &token);
				}
			})
		},
		message: {
			let weak = weak.clone();
			Closure::new(move |event: MessageEvent| {
				if let Some(inner) = weak.upgrade() {
					on_message(&inner, event);
				}
			})
		},
		close: {
			let weak = weak.clone();
			Closure::new(move |event: CloseEvent| {
				if let Some(inner) = weak.upgrade() {
					let reason = CloseReason::Remote {
						code: Some(event.code()),
						reason: event.reason(),
					};
					fail(&inner, reason);
				}
			})
		},
		error: Closure::new(move |_: Event| {
			if let Some(inner) = weak.upgrade() {
				fail(&inner, CloseReason::Connection("websocket error".into()));
			}
		}),
	};

	socket.set_onopen(Some(handlers.open.as_ref().unchecked_ref()));
	socket.set_onmessage(Some(handlers.message.as_ref().unchecked_ref()));
	socket.set_onclose(Some(handlers.close.as_ref().unchecked_ref()));
	socket.set_onerror(Some(handlers.error.as_ref().unchecked_ref()));

	let mut this = inner.borrow_mut();
	this.socket = Some(socket);
	this.handlers = Some(handlers);
	Ok(())
}

fn install_listeners(inner: &Rc<RefCell<Inner>>) {
	let weak = Rc::downgrade(inner);
	let on_data = {
		let weak = weak.clone();
		Closure::<dyn FnMut(String)>::new(move |data: String| {
			if let Some(inner) = weak.upgrade() {
				on_input(&inner, data);
			}
		})
	};
	let on_resize = {
		let weak = weak.clone();
		Closure::<dyn FnMut(JsValue)>::new(move |_size: JsValue| {
			if let Some(inner) = weak.upgrade() {
				on_viewport_resize(&inner);
			}
		})
	};
	let on_unload = Closure::<dyn FnMut(BeforeUnloadEvent)>::new(move |event: BeforeUnloadEvent| {
		let Some(inner) = weak.upgrade() else {
			return;
		};
		let armed = inner.borrow().leave_alert;
		if armed {
			event.prevent_default();
			event.set_return_value(LEAVE_ALERT);
		}
	});

	let mut this = inner.borrow_mut();
	let data_listener = this.xterm.on_data(on_data.as_ref().unchecked_ref());
	let resize_listener = this.xterm.on_resize(on_resize.as_ref().unchecked_ref());
	this.listeners.push(data_listener);
	this.listeners.push(resize_listener);
	if let Some(window) = web_sys::window() {
		if let Err(err) = window.add_event_listener_with_callback("beforeunload", on_unload.as_ref().unchecked_ref()) {
			debug!(error = %describe(err), "failed to install the leave alert");
		}
	}
	this.on_data = Some(on_data);
	this.on_resize = Some(on_resize);
	this.on_unload = Some(on_unload);
}

fn on_open(inner: &Rc<RefCell<Inner>>, token: &str) {
	let mut this = inner.borrow_mut();
	if let Err(err) = this.lifecycle.opened() {
		debug!(error = %err, "socket opened late");
		return;
	}
	let geometry = this.geometry();
	this.coalescer = ResizeCoalescer::with_initial(geometry);
	this.send(&ClientMessage::Handshake(Handshake::new(token, geometry)));
	this.leave_alert = !this.client.disable_leave_alert;
	info!(%geometry, "session open");

	let xterm = this.xterm.clone();
	drop(this);
	xterm.focus();
}

fn on_message(inner: &Rc<RefCell<Inner>>, event: MessageEvent) {
	let data = event.data();
	let bytes = if let Some(buffer) = data.dyn_ref::<js_sys::ArrayBuffer>() {
		Uint8Array::new(buffer).to_vec()
	} else if let Some(text) = data.as_string() {
		text.into_bytes()
	} else {
		warn!("ignoring message of unexpected type");
		return;
	};

	let mut this = inner.borrow_mut();
	if !this.lifecycle.accepts_inbound() {
		return;
	}
	match ServerMessage::decode(&bytes) {
		Ok(ServerMessage::Output(output)) => {
			if let Some(signal) = this.flow.on_data(output.len()) {
				this.signal(signal);
			}
			let len = output.len();
			let weak = Rc::downgrade(inner);
			let done = Closure::once_into_js(move || {
				if let Some(inner) = weak.upgrade() {
					on_write_done(&inner, len);
				}
			});
			let xterm = this.xterm.clone();
			drop(this);
			xterm.write(&Uint8Array::from(output.as_slice()), &done);
		}
		Ok(ServerMessage::SetWindowTitle(title)) => {
			if let Some(document) = web_sys::window().and_then(|window| window.document()) {
				document.set_title(&title);
			}
		}
		Ok(ServerMessage::SetPreferences(prefs)) => this.apply_preferences(&prefs),
		Ok(ServerMessage::SetReconnect(seconds)) => {
			debug!(seconds, "remote suggested a reconnect delay");
		}
		Err(err) => {
			warn!(error = %err, "malformed frame from remote");
			drop(this);
			fail(inner, CloseReason::Protocol(err.to_string()));
		}
	}
}

/// One drain cycle: xterm.js finished rendering `len` bytes.
fn on_write_done(inner: &Rc<RefCell<Inner>>, len: usize) {
	let mut this = inner.borrow_mut();
	this.flow.on_consumed(len);
	if !this.lifecycle.accepts_writes() {
		return;
	}
	if let Some(signal) = this.flow.end_cycle() {
		this.signal(signal);
	}
}

fn on_input(inner: &Rc<RefCell<Inner>>, data: String) {
	let this = inner.borrow();
	if !this.lifecycle.accepts_writes() {
		warn!(state = %this.lifecycle.state(), "dropping input, session is not open");
		return;
	}
	this.send(&ClientMessage::Input(data.into_bytes()));
}

fn on_viewport_resize(inner: &Rc<RefCell<Inner>>) {
	let mut this = inner.borrow_mut();
	let geometry = this.geometry();
	if !this.coalescer.push(geometry) {
		return;
	}
	let weak = Rc::downgrade(inner);
	let delay = this.resize_window_ms;
	this.resize_timer = set_timeout(
		move || {
			if let Some(inner) = weak.upgrade() {
				flush_resize(&inner);
			}
		},
		delay,
	);
}

fn flush_resize(inner: &Rc<RefCell<Inner>>) {
	let mut this = inner.borrow_mut();
	this.resize_timer = None;
	let Some(geometry) = this.coalescer.flush() else {
		return;
	};
	if this.lifecycle.accepts_writes() {
		this.send(&ClientMessage::Resize(geometry));
	}
	if this.client.disable_resize_overlay {
		return;
	}
	let overlay = this.overlay.clone();
	drop(this);
	show_overlay(overlay.as_ref(), &geometry.to_string());
}

fn request_close(inner: &Rc<RefCell<Inner>>) {
	let mut this = inner.borrow_mut();
	let outstanding = this.socket.as_ref().map_or(0, |socket| socket.buffered_amount() as usize);
	match this.lifecycle.request_close(outstanding) {
		Ok(SessionState::Draining) => {
			debug!(outstanding, "draining before close");
			drop(this);
			poll_drain(inner);
		}
		Ok(SessionState::Closed) => {
			drop(this);
			finish(inner);
		}
		Ok(_) => {}
		Err(err) => debug!(error = %err, "ignoring close request"),
	}
}

fn poll_drain(inner: &Rc<RefCell<Inner>>) {
	let mut this = inner.borrow_mut();
	if this.lifecycle.state() != SessionState::Draining {
		return;
	}
	let buffered = this.socket.as_ref().map_or(0, WebSocket::buffered_amount);
	if buffered == 0 {
		if this.lifecycle.drained().is_ok() {
			drop(this);
			finish(inner);
		}
		return;
	}
	let weak = Rc::downgrade(inner);
	drop(this);
	set_timeout(
		move || {
			if let Some(inner) = weak.upgrade() {
				poll_drain(&inner);
			}
		},
		DRAIN_POLL_MS,
	);
}

fn fail(inner: &Rc<RefCell<Inner>>, reason: CloseReason) {
	let closed = inner.borrow_mut().lifecycle.fail(reason).is_ok();
	if closed {
		finish(inner);
	}
}

/// Releases the socket and reports the close. Runs once, on the transition to closed.
fn finish(inner: &Rc<RefCell<Inner>>) {
	let mut this = inner.borrow_mut();
	let reason = this.lifecycle.close_reason().cloned().unwrap_or(CloseReason::Normal);
	if reason.is_error() {
		warn!(%reason, "session closed");
	} else {
		info!(%reason, "session closed");
	}

	this.leave_alert = false;
	this.remove_unload_listener();
	if let (Some(timer), Some(window)) = (this.resize_timer.take(), web_sys::window()) {
		window.clear_timeout_with_handle(timer);
	}
	if let Some(socket) = this.detach_socket() {
		if let Err(err) = socket.close_with_code(1000) {
			debug!(error = %describe(err), "close failed");
		}
	}

	let xterm = this.xterm.clone();
	let overlay = this.overlay.clone();
	let dispose = this.client.close_on_disconnect;
	let listeners: Vec<Disposable> = if dispose { this.listeners.drain(..).collect() } else { Vec::new() };
	drop(this);

	if dispose {
		for listener in listeners {
			listener.dispose();
		}
		xterm.dispose();
	} else {
		show_overlay(overlay.as_ref(), CLOSED_OVERLAY);
	}
}

fn show_overlay(handler: Option<&Function>, message: &str) {
	match handler {
		Some(handler) => {
			if let Err(err) = handler.call1(&JsValue::NULL, &JsValue::from_str(message)) {
				warn!(error = %describe(err), "overlay handler failed");
			}
		}
		None => info!(message, "overlay"),
	}
}

fn set_timeout(callback: impl FnOnce() + 'static, delay_ms: i32) -> Option<i32> {
	let window = web_sys::window()?;
	let callback = Closure::once_into_js(callback);
	window
		.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), delay_ms)
		.ok()
}
