//! Wire-level types for the ttylink terminal protocol.
//!
//! This crate contains only data types and the frame codec, with no I/O, so
//! it builds for both native and `wasm32` targets.
//!
//! # Main Types
//!
//! - [`ClientMessage`] - Frames sent from the terminal client to the remote shell
//! - [`ServerMessage`] - Frames sent from the remote shell to the client
//! - [`Handshake`] - First frame on a new connection, carries the auth token
//! - [`Geometry`] - Terminal viewport size in cells and pixels
//! - [`ClientOptions`] / [`TerminalOptions`] - Startup configuration handed to the emulator
//! - [`FlowControl`] - Thresholds for the output acknowledgement window
//! - [`parse_token_response`] - Token endpoint body parsing

pub mod frame;
pub mod geometry;
pub mod options;
pub mod token;

pub use frame::{ClientMessage, FrameError, Handshake, Preferences, ServerMessage, tag};
pub use geometry::Geometry;
pub use options::{ClientOptions, FlowControl, RendererType, TerminalOptions, Theme};
pub use token::parse_token_response;

/// WebSocket subprotocol requested during the upgrade.
pub const SUBPROTOCOL: &str = "tty";
