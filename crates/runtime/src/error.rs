use thiserror::Error;
use ttylink::{CloseReason, ConfigError, EndpointError, ErrorKind};
use ttylink_protocol::FrameError;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Invalid configuration: {0}")]
	Configuration(#[from] ConfigError),

	#[error("Invalid endpoint: {0}")]
	Endpoint(#[from] EndpointError),

	#[error("Failed to fetch session token from {url}: {reason}")]
	TokenFetch { url: String, reason: String },

	#[error("Connection failed: {0}")]
	Connection(String),

	#[error("Protocol error: {0}")]
	Protocol(#[from] FrameError),

	#[error("Transport error: {0}")]
	Transport(String),

	#[error("Session channel closed")]
	ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Configuration(_) | Self::Endpoint(_) => ErrorKind::Configuration,
			Self::TokenFetch { .. } => ErrorKind::TokenFetch,
			Self::Protocol(_) => ErrorKind::Protocol,
			Self::Connection(_) | Self::Transport(_) | Self::ChannelClosed => ErrorKind::Connection,
		}
	}

	/// Close reason reported to the bridge when this error ends a session.
	pub fn close_reason(&self) -> CloseReason {
		match self.kind() {
			ErrorKind::TokenFetch => CloseReason::TokenFetch(self.to_string()),
			ErrorKind::Protocol => CloseReason::Protocol(self.to_string()),
			ErrorKind::Connection | ErrorKind::Configuration => CloseReason::Connection(self.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_errors_map_to_token_close_reason() {
		let err = Error::TokenFetch {
			url: "http://localhost:7681/token".into(),
			reason: "HTTP 503 Service Unavailable".into(),
		};
		assert_eq!(err.kind(), ErrorKind::TokenFetch);
		assert!(matches!(err.close_reason(), CloseReason::TokenFetch(msg) if msg.contains("503")));
	}

	#[test]
	fn frame_errors_are_protocol_errors() {
		let err = Error::from(FrameError::Empty);
		assert_eq!(err.kind(), ErrorKind::Protocol);
		assert!(matches!(err.close_reason(), CloseReason::Protocol(_)));
	}

	#[test]
	fn config_errors_are_configuration_errors() {
		assert_eq!(Error::from(ConfigError::ZeroLimit).kind(), ErrorKind::Configuration);
		assert_eq!(Error::ChannelClosed.kind(), ErrorKind::Connection);
	}
}
