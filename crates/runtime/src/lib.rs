//! Tokio runtime for ttylink sessions.
//!
//! This crate drives a terminal session over a real connection:
//!
//! - [`transport`] - WebSocket and in-memory transports split into sender and receiver halves
//! - [`token`] - Auth token acquisition
//! - [`session`] - The session actor, owner of flow control and the lifecycle
//! - [`bridge`] - Glue between a session and a terminal emulator
//!
//! A typical host resolves endpoints with [`ttylink::resolve_endpoints`],
//! starts a [`Session`], and hands its handle and event stream to a
//! [`TerminalBridge`] wrapping its emulator.

pub mod bridge;
pub mod error;
pub mod session;
pub mod token;
pub mod transport;

pub use bridge::{Emulator, EmulatorEvent, SessionOutcome, TerminalBridge};
pub use error::{Error, Result};
pub use session::{BridgeEvent, Connector, Session, SessionConfig, SessionHandle, WebSocketConnector};
pub use token::{HttpTokenProvider, StaticToken, TokenProvider};
pub use transport::{
	ChannelRemote, ChannelTransport, RemoteFrame, TransportEvent, TransportParts, TransportReceiver, TransportSender,
	WebSocketTransport,
};
