//! Error taxonomy shared by every host.

use thiserror::Error;

/// Classification of fatal session errors.
///
/// Every error type in the workspace maps onto one of these so hosts can pick
/// the user-facing presentation without matching on crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// The token request failed or returned a non-success status.
	TokenFetch,
	/// The handshake failed or the transport broke mid-session.
	Connection,
	/// Invalid startup configuration, detected before any network activity.
	Configuration,
	/// The remote sent a malformed or unexpected frame.
	Protocol,
}

impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::TokenFetch => "token_fetch",
			Self::Connection => "connection",
			Self::Configuration => "configuration",
			Self::Protocol => "protocol",
		}
	}
}

/// Invalid flow-control thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("flow control limit must be positive")]
	ZeroLimit,

	#[error("flow control high water ({high_water}) must be greater than low water ({low_water})")]
	WaterMarksInverted { high_water: u64, low_water: u64 },

	#[error("flow control high water ({high_water}) must not exceed limit ({limit})")]
	HighWaterAboveLimit { high_water: u64, limit: u64 },
}

/// Failure to derive connection endpoints from a page location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
	#[error("invalid page URL '{url}': {reason}")]
	InvalidUrl { url: String, reason: String },

	#[error("page URL '{0}' has no host")]
	MissingHost(String),
}

impl ConfigError {
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::Configuration
	}
}

impl EndpointError {
	pub fn kind(&self) -> ErrorKind {
		ErrorKind::Configuration
	}
}
