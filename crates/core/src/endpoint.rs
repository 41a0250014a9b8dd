//! Endpoint derivation from the page location.
//!
//! The terminal page is served from the same origin and path as the session
//! endpoints:
//!
//! ```text
//! https://host:8080/sub/path/?arg=1
//!   ws    -> wss://host:8080/sub/path/ws?arg=1
//!   token -> https://host:8080/sub/path/token
//! ```
//!
//! A `fwdPort` query parameter moves the WebSocket (and only the WebSocket)
//! to another port, for proxies that serve the page on one port and forward
//! session traffic on another.

use url::Url;

use crate::error::EndpointError;

/// Query parameter that overrides the WebSocket port.
pub const FORWARD_PORT_PARAM: &str = "fwdPort";

/// The parts of the page location that endpoint derivation depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
	/// URL scheme without the trailing colon (`https`, `http`).
	pub scheme: String,
	/// Host with optional `:port`, as in `window.location.host`.
	pub host: String,
	/// Path, as in `window.location.pathname`.
	pub path: String,
	/// Query string without the leading `?`.
	pub query: Option<String>,
}

/// Endpoints for a terminal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
	pub ws_url: String,
	pub token_url: String,
}

impl PageLocation {
	/// Builds a location from `window.location`-style parts.
	///
	/// Accepts `"https:"` or `"https"` for the scheme and `"?a=b"` or `"a=b"`
	/// for the query. An empty query is treated as absent.
	pub fn new(scheme: &str, host: &str, path: &str, query: Option<&str>) -> Self {
		let query = query.map(|q| q.strip_prefix('?').unwrap_or(q)).filter(|q| !q.is_empty());
		Self {
			scheme: scheme.trim_end_matches(':').to_ascii_lowercase(),
			host: host.to_string(),
			path: path.to_string(),
			query: query.map(str::to_string),
		}
	}

	/// Parses a full page URL.
	pub fn parse(url: &str) -> Result<Self, EndpointError> {
		let parsed = Url::parse(url).map_err(|err| EndpointError::InvalidUrl {
			url: url.to_string(),
			reason: err.to_string(),
		})?;
		let host = parsed.host_str().ok_or_else(|| EndpointError::MissingHost(url.to_string()))?;
		let host = match parsed.port() {
			Some(port) => format!("{host}:{port}"),
			None => host.to_string(),
		};
		Ok(Self::new(parsed.scheme(), &host, parsed.path(), parsed.query()))
	}

	/// Value of the `fwdPort` query parameter, if present and non-empty.
	pub fn forward_port(&self) -> Option<String> {
		let query = self.query.as_deref()?;
		url::form_urlencoded::parse(query.as_bytes())
			.find(|(key, _)| key == FORWARD_PORT_PARAM)
			.map(|(_, value)| value.into_owned())
			.filter(|value| !value.is_empty())
	}

	fn is_secure(&self) -> bool {
		self.scheme == "https"
	}
}

/// Derives the WebSocket and token URLs for `location`.
pub fn resolve_endpoints(location: &PageLocation) -> Endpoints {
	let path = location.path.trim_end_matches('/');

	let ws_host = match location.forward_port() {
		Some(port) => replace_port(&location.host, &port),
		None => location.host.clone(),
	};

	let ws_scheme = if location.is_secure() { "wss" } else { "ws" };
	let query = location.query.as_deref().map(|q| format!("?{q}")).unwrap_or_default();

	Endpoints {
		ws_url: format!("{ws_scheme}://{ws_host}{path}/ws{query}"),
		token_url: format!("{}://{}{path}/token", location.scheme, location.host),
	}
}

/// Swaps the port segment of `host` for `port`. A host without a port is
/// left as it is.
fn replace_port(host: &str, port: &str) -> String {
	// IPv6 literal: the port separator is the colon after the bracket.
	let hostname_end = if host.starts_with('[') {
		host.find("]:").map(|end| end + 1)
	} else {
		host.find(':')
	};
	match hostname_end {
		Some(end) => format!("{}:{port}", &host[..end]),
		None => host.to_string(),
	}
}
