//! Message transports for a terminal session.
//!
//! A transport is split into [`TransportParts`]: a sender the session's
//! writer task owns, a receiver run on its own task, and the channel the
//! receiver feeds. The receiver always finishes with exactly one terminal
//! event, [`TransportEvent::Closed`] or [`TransportEvent::Error`], so the
//! session learns about every way a connection can end.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, trace};
use ttylink_protocol::{ServerMessage, SUBPROTOCOL};

use crate::error::{Error, Result};

/// Inbound side of a connection, as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// One complete message.
	Message(Vec<u8>),
	/// The remote closed the connection.
	Closed { code: Option<u16>, reason: String },
	/// The connection broke.
	Error(String),
}

#[async_trait]
pub trait TransportSender: Send {
	/// Sends one complete message.
	async fn send(&mut self, message: Vec<u8>) -> Result<()>;

	/// Sends a normal close frame and releases the write half.
	async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait TransportReceiver: Send {
	/// Forwards inbound messages until the connection ends.
	async fn run(&mut self);
}

pub struct TransportParts {
	pub sender: Box<dyn TransportSender>,
	pub receiver: Box<dyn TransportReceiver>,
	pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for TransportParts {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransportParts").finish_non_exhaustive()
	}
}

/// WebSocket transport speaking the `tty` subprotocol.
pub struct WebSocketTransport;

impl WebSocketTransport {
	pub async fn connect(url: &str) -> Result<TransportParts> {
		let mut request = url
			.into_client_request()
			.map_err(|err| Error::Connection(format!("{url}: {err}")))?;
		request
			.headers_mut()
			.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

		let (stream, response) = connect_async(request)
			.await
			.map_err(|err| Error::Connection(format!("{url}: {err}")))?;
		debug!(target = "ttylink", url, status = %response.status(), "websocket connected");

		Ok(Self::from_stream(stream))
	}

	/// Splits an established WebSocket stream.
	pub fn from_stream<S>(stream: WebSocketStream<S>) -> TransportParts
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (sink, stream) = stream.split();
		let (tx, events) = mpsc::unbounded_channel();
		TransportParts {
			sender: Box::new(WebSocketSender { sink }),
			receiver: Box::new(WebSocketReceiver { stream, tx }),
			events,
		}
	}
}

struct WebSocketSender<S> {
	sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> TransportSender for WebSocketSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	async fn send(&mut self, message: Vec<u8>) -> Result<()> {
		self.sink
			.send(Message::Binary(message.into()))
			.await
			.map_err(|err| Error::Transport(err.to_string()))
	}

	async fn close(&mut self) -> Result<()> {
		self.sink.close().await.map_err(|err| Error::Transport(err.to_string()))
	}
}

struct WebSocketReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	tx: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl<S> TransportReceiver for WebSocketReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	async fn run(&mut self) {
		let terminal = loop {
			let message = match self.stream.next().await {
				Some(Ok(message)) => message,
				Some(Err(err)) => break TransportEvent::Error(err.to_string()),
				None => {
					break TransportEvent::Closed {
						code: None,
						reason: String::new(),
					};
				}
			};
			let data = match message {
				Message::Binary(data) => Vec::from(data),
				Message::Text(text) => text.as_bytes().to_vec(),
				Message::Close(frame) => {
					break TransportEvent::Closed {
						code: frame.as_ref().map(|f| u16::from(f.code)),
						reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
					};
				}
				other => {
					trace!(target = "ttylink", ?other, "ignoring control frame");
					continue;
				}
			};
			if self.tx.send(TransportEvent::Message(data)).is_err() {
				// Session is gone; nobody is left to tell.
				return;
			}
		};
		let _ = self.tx.send(terminal);
	}
}

/// Frame observed by the remote end of a [`ChannelTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFrame {
	Message(Vec<u8>),
	Close,
}

/// In-memory transport with a bounded outbound channel.
///
/// The bound makes writes observable: nothing is flushed until the remote
/// end reads it, which lets tests hold a session in the draining state.
pub struct ChannelTransport;

impl ChannelTransport {
	pub fn pair(capacity: usize) -> (TransportParts, ChannelRemote) {
		let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (tx, events) = mpsc::unbounded_channel();

		let parts = TransportParts {
			sender: Box::new(ChannelSender { tx: outbound_tx }),
			receiver: Box::new(ChannelReceiver { rx: inbound_rx, tx }),
			events,
		};
		let remote = ChannelRemote {
			rx: outbound_rx,
			tx: inbound_tx,
		};
		(parts, remote)
	}
}

struct ChannelSender {
	tx: mpsc::Sender<RemoteFrame>,
}

#[async_trait]
impl TransportSender for ChannelSender {
	async fn send(&mut self, message: Vec<u8>) -> Result<()> {
		self.tx.send(RemoteFrame::Message(message)).await.map_err(|_| Error::ChannelClosed)
	}

	async fn close(&mut self) -> Result<()> {
		self.tx.send(RemoteFrame::Close).await.map_err(|_| Error::ChannelClosed)
	}
}

struct ChannelReceiver {
	rx: mpsc::UnboundedReceiver<TransportEvent>,
	tx: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for ChannelReceiver {
	async fn run(&mut self) {
		while let Some(event) = self.rx.recv().await {
			let terminal = !matches!(event, TransportEvent::Message(_));
			if self.tx.send(event).is_err() || terminal {
				return;
			}
		}
		let _ = self.tx.send(TransportEvent::Closed {
			code: None,
			reason: String::new(),
		});
	}
}

/// The far end of a [`ChannelTransport`], playing the remote shell.
pub struct ChannelRemote {
	rx: mpsc::Receiver<RemoteFrame>,
	tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelRemote {
	/// Next frame written by the session, or `None` once the sender is dropped.
	pub async fn recv(&mut self) -> Option<RemoteFrame> {
		self.rx.recv().await
	}

	/// Written frame if one is already queued.
	pub fn try_recv(&mut self) -> Option<RemoteFrame> {
		self.rx.try_recv().ok()
	}

	pub fn send(&self, message: &ServerMessage) -> bool {
		self.send_raw(message.encode())
	}

	pub fn send_raw(&self, message: Vec<u8>) -> bool {
		self.tx.send(TransportEvent::Message(message)).is_ok()
	}

	/// Closes the connection from the remote side.
	pub fn close(&self, code: u16, reason: &str) -> bool {
		self.tx
			.send(TransportEvent::Closed {
				code: Some(code),
				reason: reason.to_string(),
			})
			.is_ok()
	}

	/// Breaks the connection.
	pub fn fail(&self, message: &str) -> bool {
		self.tx.send(TransportEvent::Error(message.to_string())).is_ok()
	}
}
