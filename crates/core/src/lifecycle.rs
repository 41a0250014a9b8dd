//! Session lifecycle state machine.
//!
//! ```text
//!              opened()                request_close(n > 0)
//! Connecting ----------> Open ---------------------------> Draining
//!     |                   |                                   |
//!     | fail()            | fail() / request_close(0)         | drained() / fail()
//!     v                   v                                   v
//!   Closed <------------ Closed <-------------------------- Closed
//! ```
//!
//! `Closed` is terminal. There is no reconnect at this layer.

use thiserror::Error;

/// Lifecycle state of a terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	Connecting,
	Open,
	Draining,
	Closed,
}

impl SessionState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Connecting => "connecting",
			Self::Open => "open",
			Self::Draining => "draining",
			Self::Closed => "closed",
		}
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Why a session reached [`SessionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
	/// Local close request completed.
	Normal,
	/// The remote side closed the connection.
	Remote { code: Option<u16>, reason: String },
	/// Token acquisition failed before connecting.
	TokenFetch(String),
	/// Handshake failure or transport error.
	Connection(String),
	/// Malformed or unexpected frame from the remote side.
	Protocol(String),
}

impl CloseReason {
	/// Whether the session ended because something went wrong.
	pub fn is_error(&self) -> bool {
		!matches!(self, Self::Normal | Self::Remote { .. })
	}
}

impl std::fmt::Display for CloseReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Normal => write!(f, "closed"),
			Self::Remote { code: Some(code), reason } if !reason.is_empty() => {
				write!(f, "remote closed ({code}): {reason}")
			}
			Self::Remote { code: Some(code), .. } => write!(f, "remote closed ({code})"),
			Self::Remote { code: None, .. } => write!(f, "remote closed"),
			Self::TokenFetch(msg) => write!(f, "token fetch failed: {msg}"),
			Self::Connection(msg) => write!(f, "connection error: {msg}"),
			Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
		}
	}
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a session in state {from}")]
pub struct InvalidTransition {
	pub from: SessionState,
	pub action: &'static str,
}

/// Owns the session state and the reason it closed.
#[derive(Debug, Clone)]
pub struct Lifecycle {
	state: SessionState,
	close_reason: Option<CloseReason>,
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}

impl Lifecycle {
	pub fn new() -> Self {
		Self {
			state: SessionState::Connecting,
			close_reason: None,
		}
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn close_reason(&self) -> Option<&CloseReason> {
		self.close_reason.as_ref()
	}

	pub fn is_closed(&self) -> bool {
		self.state == SessionState::Closed
	}

	/// Local writes are accepted only while open.
	pub fn accepts_writes(&self) -> bool {
		self.state == SessionState::Open
	}

	/// Inbound frames are applied only while open; a close request stops
	/// processing immediately.
	pub fn accepts_inbound(&self) -> bool {
		self.state == SessionState::Open
	}

	/// Handshake completed.
	pub fn opened(&mut self) -> Result<SessionState, InvalidTransition> {
		self.expect(SessionState::Connecting, "open")?;
		self.state = SessionState::Open;
		Ok(self.state)
	}

	/// Local close request with `outstanding` writes not yet flushed.
	pub fn request_close(&mut self, outstanding: usize) -> Result<SessionState, InvalidTransition> {
		match self.state {
			SessionState::Open if outstanding > 0 => {
				self.state = SessionState::Draining;
				Ok(self.state)
			}
			SessionState::Connecting | SessionState::Open => Ok(self.close(CloseReason::Normal)),
			// Repeated close requests while draining are no-ops.
			SessionState::Draining => Ok(self.state),
			SessionState::Closed => Err(InvalidTransition {
				from: self.state,
				action: "close",
			}),
		}
	}

	/// Every outstanding write has been flushed.
	pub fn drained(&mut self) -> Result<SessionState, InvalidTransition> {
		self.expect(SessionState::Draining, "finish draining")?;
		Ok(self.close(CloseReason::Normal))
	}

	/// Terminates the session from any non-closed state.
	pub fn fail(&mut self, reason: CloseReason) -> Result<SessionState, InvalidTransition> {
		if self.is_closed() {
			return Err(InvalidTransition {
				from: self.state,
				action: "fail",
			});
		}
		Ok(self.close(reason))
	}

	fn close(&mut self, reason: CloseReason) -> SessionState {
		self.state = SessionState::Closed;
		self.close_reason = Some(reason);
		self.state
	}

	fn expect(&self, state: SessionState, action: &'static str) -> Result<(), InvalidTransition> {
		if self.state == state {
			Ok(())
		} else {
			Err(InvalidTransition {
				from: self.state,
				action,
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn handshake_opens_session() {
		let mut lifecycle = Lifecycle::new();
		assert_eq!(lifecycle.state(), SessionState::Connecting);
		assert!(!lifecycle.accepts_writes());
		assert_eq!(lifecycle.opened(), Ok(SessionState::Open));
		assert!(lifecycle.accepts_writes());
		assert!(lifecycle.accepts_inbound());
	}

	#[test]
	fn close_with_outstanding_writes_drains_first() {
		let mut lifecycle = Lifecycle::new();
		lifecycle.opened().unwrap();

		assert_eq!(lifecycle.request_close(3), Ok(SessionState::Draining));
		assert!(!lifecycle.accepts_writes());
		assert!(!lifecycle.accepts_inbound());
		assert_eq!(lifecycle.request_close(3), Ok(SessionState::Draining));

		assert_eq!(lifecycle.drained(), Ok(SessionState::Closed));
		assert_eq!(lifecycle.close_reason(), Some(&CloseReason::Normal));
	}

	#[test]
	fn close_without_outstanding_writes_is_immediate() {
		let mut lifecycle = Lifecycle::new();
		lifecycle.opened().unwrap();
		assert_eq!(lifecycle.request_close(0), Ok(SessionState::Closed));
	}

	#[test]
	fn token_failure_closes_before_open() {
		let mut lifecycle = Lifecycle::new();
		let reason = CloseReason::TokenFetch("503 Service Unavailable".into());
		assert_eq!(lifecycle.fail(reason.clone()), Ok(SessionState::Closed));
		assert_eq!(lifecycle.close_reason(), Some(&reason));
		assert!(reason.is_error());
	}

	#[test]
	fn failure_while_draining_closes_with_that_reason() {
		let mut lifecycle = Lifecycle::new();
		lifecycle.opened().unwrap();
		lifecycle.request_close(1).unwrap();
		lifecycle.fail(CloseReason::Connection("reset".into())).unwrap();
		assert_eq!(lifecycle.close_reason(), Some(&CloseReason::Connection("reset".into())));
	}

	#[test]
	fn closed_is_terminal() {
		let mut lifecycle = Lifecycle::new();
		lifecycle.opened().unwrap();
		lifecycle
			.fail(CloseReason::Remote {
				code: Some(1000),
				reason: String::new(),
			})
			.unwrap();

		assert!(lifecycle.opened().is_err());
		assert!(lifecycle.request_close(0).is_err());
		assert!(lifecycle.drained().is_err());
		let err = lifecycle.fail(CloseReason::Normal).unwrap_err();
		assert_eq!(err.to_string(), "cannot fail a session in state closed");
	}

	#[test]
	fn drained_requires_draining_state() {
		let mut lifecycle = Lifecycle::new();
		lifecycle.opened().unwrap();
		assert!(lifecycle.drained().is_err());
		assert_eq!(lifecycle.state(), SessionState::Open);
	}

	#[test]
	fn close_reason_display() {
		let remote = CloseReason::Remote {
			code: Some(1011),
			reason: "pty exited".into(),
		};
		assert_eq!(remote.to_string(), "remote closed (1011): pty exited");
		assert!(!remote.is_error());
		assert_eq!(CloseReason::Protocol("unknown frame tag '9'".into()).to_string(), "protocol error: unknown frame tag '9'");
	}
}
