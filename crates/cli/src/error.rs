use std::path::PathBuf;

use thiserror::Error;
use ttylink::{CloseReason, ConfigError, EndpointError, ErrorKind};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {path}: {source}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Endpoint(#[from] EndpointError),

	#[error("terminal setup failed: {0}")]
	Terminal(#[source] std::io::Error),

	#[error("{0}")]
	Session(CloseReason),

	#[error(transparent)]
	Runtime(#[from] ttylink_runtime::Error),
}

impl CliError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::ConfigRead { .. } | Self::ConfigParse { .. } | Self::Config(_) | Self::Endpoint(_) => {
				ErrorKind::Configuration
			}
			Self::Terminal(_) => ErrorKind::Connection,
			Self::Session(CloseReason::TokenFetch(_)) => ErrorKind::TokenFetch,
			Self::Session(CloseReason::Protocol(_)) => ErrorKind::Protocol,
			Self::Session(_) => ErrorKind::Connection,
			Self::Runtime(err) => err.kind(),
		}
	}

	/// Process exit status: `2` when the session never started because the
	/// configuration was rejected, `1` otherwise.
	pub fn exit_code(&self) -> i32 {
		match self.kind() {
			ErrorKind::Configuration => 2,
			ErrorKind::TokenFetch | ErrorKind::Connection | ErrorKind::Protocol => 1,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn configuration_errors_exit_with_usage_status() {
		let err = CliError::from(ConfigError::ZeroLimit);
		assert_eq!(err.kind().as_str(), "configuration");
		assert_eq!(err.exit_code(), 2);
	}

	#[test]
	fn session_failures_exit_with_status_one() {
		let err = CliError::Session(CloseReason::TokenFetch("HTTP 401".into()));
		assert_eq!(err.kind().as_str(), "token_fetch");
		assert_eq!(err.exit_code(), 1);

		let err = CliError::Session(CloseReason::Protocol("unknown frame tag '9'".into()));
		assert_eq!(err.kind(), ErrorKind::Protocol);
		assert_eq!(err.exit_code(), 1);
	}
}
