//! Frame codec for the terminal WebSocket protocol.
//!
//! Every WebSocket message carries exactly one frame:
//!
//! ```text
//! +---------+---------------------------+
//! | tag (1) | payload (rest of message) |
//! +---------+---------------------------+
//! ```
//!
//! The tag is a single ASCII byte. Raw terminal bytes travel unencoded, control
//! payloads are JSON or ASCII decimal. The one exception is the [`Handshake`],
//! which is a bare JSON object whose opening `{` doubles as its tag.
//!
//! The tag set is compatible with ttyd, so a stock ttyd server can act as the
//! remote side. ttyd ignores the `Ack` and `SetOption` frames it does not know.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::geometry::Geometry;

/// Option key/value pairs pushed by the remote side.
pub type Preferences = Map<String, Value>;

/// Tag bytes for each frame kind.
pub mod tag {
	/// Client: keystroke/paste bytes. Server: terminal output.
	pub const DATA: u8 = b'0';
	/// Client: resize request. Server: window title.
	pub const RESIZE: u8 = b'1';
	/// Server: window title.
	pub const SET_WINDOW_TITLE: u8 = b'1';
	/// Client: output paused.
	pub const PAUSE: u8 = b'2';
	/// Server: client preferences.
	pub const SET_PREFERENCES: u8 = b'2';
	/// Client: output resumed.
	pub const RESUME: u8 = b'3';
	/// Server: advisory reconnect delay.
	pub const SET_RECONNECT: u8 = b'3';
	/// Client: acknowledgement of consumed output bytes.
	pub const ACK: u8 = b'4';
	/// Client: runtime option change.
	pub const SET_OPTION: u8 = b'5';
	/// Client: JSON handshake.
	pub const HANDSHAKE: u8 = b'{';
}

/// First frame sent on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
	/// Bearer token obtained from the token endpoint.
	#[serde(rename = "AuthToken")]
	pub auth_token: String,
	/// Initial terminal columns.
	pub columns: u16,
	/// Initial terminal rows.
	pub rows: u16,
}

impl Handshake {
	pub fn new(auth_token: impl Into<String>, geometry: Geometry) -> Self {
		Self {
			auth_token: auth_token.into(),
			columns: geometry.columns,
			rows: geometry.rows,
		}
	}
}

/// Frame sent from the terminal client to the remote shell.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
	/// Keystroke or paste bytes.
	Input(Vec<u8>),
	/// Viewport geometry changed.
	Resize(Geometry),
	/// The client stopped acknowledging output.
	Pause,
	/// The client resumed acknowledging output.
	Resume,
	/// Output bytes consumed since the previous acknowledgement.
	Ack(u64),
	/// Side-channel option change.
	SetOption { key: String, value: Value },
	/// Connection handshake.
	Handshake(Handshake),
}

/// Frame sent from the remote shell to the terminal client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
	/// Terminal output bytes.
	Output(Vec<u8>),
	/// Window title for the session.
	SetWindowTitle(String),
	/// Option overrides for the client.
	SetPreferences(Preferences),
	/// Seconds the remote suggests waiting before reconnecting.
	SetReconnect(u32),
}

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
	/// The message had no tag byte.
	#[error("empty frame")]
	Empty,
	/// The tag byte is not part of the protocol.
	#[error("unknown frame tag {}", display_tag(.tag))]
	UnknownTag { tag: u8 },
	/// A JSON payload could not be parsed.
	#[error("invalid JSON in {frame} frame: {message}")]
	InvalidJson { frame: &'static str, message: String },
	/// A decimal payload could not be parsed.
	#[error("invalid number in {frame} frame: {text:?}")]
	InvalidNumber { frame: &'static str, text: String },
	/// A resize frame carried zero rows or columns.
	#[error("invalid terminal geometry {columns}x{rows}")]
	InvalidGeometry { columns: u16, rows: u16 },
	/// A text payload was not valid UTF-8.
	#[error("{frame} frame is not valid UTF-8")]
	InvalidUtf8 { frame: &'static str },
}

fn display_tag(tag: &u8) -> String {
	if tag.is_ascii_graphic() {
		format!("'{}'", *tag as char)
	} else {
		format!("0x{tag:02X}")
	}
}

impl ClientMessage {
	/// Short name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Input(_) => "input",
			Self::Resize(_) => "resize",
			Self::Pause => "pause",
			Self::Resume => "resume",
			Self::Ack(_) => "ack",
			Self::SetOption { .. } => "set_option",
			Self::Handshake(_) => "handshake",
		}
	}

	/// Encodes this message into a single WebSocket payload.
	pub fn encode(&self) -> Vec<u8> {
		match self {
			Self::Input(bytes) => tagged(tag::DATA, bytes),
			Self::Resize(geometry) => {
				let body = json!({
					"columns": geometry.columns,
					"rows": geometry.rows,
					"width": geometry.pixel_width,
					"height": geometry.pixel_height,
				});
				tagged(tag::RESIZE, body.to_string().as_bytes())
			}
			Self::Pause => vec![tag::PAUSE],
			Self::Resume => vec![tag::RESUME],
			Self::Ack(count) => tagged(tag::ACK, count.to_string().as_bytes()),
			Self::SetOption { key, value } => {
				let body = json!({ "key": key, "value": value });
				tagged(tag::SET_OPTION, body.to_string().as_bytes())
			}
			Self::Handshake(handshake) => json!({
				"AuthToken": handshake.auth_token,
				"columns": handshake.columns,
				"rows": handshake.rows,
			})
			.to_string()
			.into_bytes(),
		}
	}

	/// Decodes a client frame, as the remote side would.
	pub fn decode(message: &[u8]) -> Result<Self, FrameError> {
		let (&first, payload) = message.split_first().ok_or(FrameError::Empty)?;
		match first {
			tag::DATA => Ok(Self::Input(payload.to_vec())),
			tag::RESIZE => {
				let geometry: Geometry = parse_json("resize", payload)?;
				if !geometry.is_valid() {
					return Err(FrameError::InvalidGeometry {
						columns: geometry.columns,
						rows: geometry.rows,
					});
				}
				Ok(Self::Resize(geometry))
			}
			tag::PAUSE => Ok(Self::Pause),
			tag::RESUME => Ok(Self::Resume),
			tag::ACK => parse_decimal("ack", payload).map(Self::Ack),
			tag::SET_OPTION => {
				#[derive(Deserialize)]
				struct Body {
					key: String,
					#[serde(default)]
					value: Value,
				}
				let body: Body = parse_json("set_option", payload)?;
				Ok(Self::SetOption {
					key: body.key,
					value: body.value,
				})
			}
			tag::HANDSHAKE => parse_json("handshake", message).map(Self::Handshake),
			other => Err(FrameError::UnknownTag { tag: other }),
		}
	}
}

impl ServerMessage {
	/// Short name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Output(_) => "output",
			Self::SetWindowTitle(_) => "set_window_title",
			Self::SetPreferences(_) => "set_preferences",
			Self::SetReconnect(_) => "set_reconnect",
		}
	}

	/// Decodes a frame received from the remote side.
	pub fn decode(message: &[u8]) -> Result<Self, FrameError> {
		let (&first, payload) = message.split_first().ok_or(FrameError::Empty)?;
		match first {
			tag::DATA => Ok(Self::Output(payload.to_vec())),
			tag::SET_WINDOW_TITLE => std::str::from_utf8(payload)
				.map(|title| Self::SetWindowTitle(title.to_string()))
				.map_err(|_| FrameError::InvalidUtf8 { frame: "set_window_title" }),
			tag::SET_PREFERENCES => {
				if payload.iter().all(u8::is_ascii_whitespace) {
					return Ok(Self::SetPreferences(Preferences::new()));
				}
				parse_json("set_preferences", payload).map(Self::SetPreferences)
			}
			tag::SET_RECONNECT => parse_decimal("set_reconnect", payload).map(Self::SetReconnect),
			other => Err(FrameError::UnknownTag { tag: other }),
		}
	}

	/// Encodes this message, as the remote side would.
	pub fn encode(&self) -> Vec<u8> {
		match self {
			Self::Output(bytes) => tagged(tag::DATA, bytes),
			Self::SetWindowTitle(title) => tagged(tag::SET_WINDOW_TITLE, title.as_bytes()),
			Self::SetPreferences(prefs) => {
				tagged(tag::SET_PREFERENCES, Value::Object(prefs.clone()).to_string().as_bytes())
			}
			Self::SetReconnect(seconds) => tagged(tag::SET_RECONNECT, seconds.to_string().as_bytes()),
		}
	}
}

fn tagged(tag: u8, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + 1);
	out.push(tag);
	out.extend_from_slice(payload);
	out
}

fn parse_json<T: serde::de::DeserializeOwned>(frame: &'static str, payload: &[u8]) -> Result<T, FrameError> {
	serde_json::from_slice(payload).map_err(|err| FrameError::InvalidJson {
		frame,
		message: err.to_string(),
	})
}

fn parse_decimal<T: std::str::FromStr>(frame: &'static str, payload: &[u8]) -> Result<T, FrameError> {
	let invalid = || FrameError::InvalidNumber {
		frame,
		text: String::from_utf8_lossy(payload).into_owned(),
	};
	std::str::from_utf8(payload)
		.map_err(|_| invalid())?
		.trim()
		.parse()
		.map_err(|_| invalid())
}
