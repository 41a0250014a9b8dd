//! Auth token acquisition.
//!
//! The token is fetched once per session, right before connecting. There is
//! no retry: a failed fetch ends the session before any connection attempt.

use async_trait::async_trait;
use tracing::debug;
use ttylink_protocol::parse_token_response;

use crate::error::{Error, Result};

#[async_trait]
pub trait TokenProvider: Send + Sync {
	async fn fetch(&self) -> Result<String>;
}

/// Fetches the token with a single `GET` to the token endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
	client: reqwest::Client,
	url: String,
}

impl HttpTokenProvider {
	pub fn new(url: impl Into<String>) -> Self {
		Self::with_client(reqwest::Client::new(), url)
	}

	pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
		Self { client, url: url.into() }
	}

	fn error(&self, reason: impl ToString) -> Error {
		Error::TokenFetch {
			url: self.url.clone(),
			reason: reason.to_string(),
		}
	}
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
	async fn fetch(&self) -> Result<String> {
		debug!(target = "ttylink", url = %self.url, "fetching session token");
		let response = self.client.get(&self.url).send().await.map_err(|err| self.error(err))?;

		let status = response.status();
		if !status.is_success() {
			return Err(self.error(format!("HTTP {status}")));
		}

		let body = response.text().await.map_err(|err| self.error(err))?;
		Ok(parse_token_response(&body))
	}
}

/// A token the host already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticToken(pub String);

impl StaticToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}
}

#[async_trait]
impl TokenProvider for StaticToken {
	async fn fetch(&self) -> Result<String> {
		Ok(self.0.clone())
	}
}

#[cfg(test)]
mod tests {
	use axum::Router;
	use axum::http::StatusCode;
	use axum::routing::get;
	use tokio::net::TcpListener;

	use super::*;

	async fn serve(app: Router) -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{addr}/token")
	}

	#[tokio::test]
	async fn plain_text_body_is_a_bare_token() {
		let url = serve(Router::new().route("/token", get(|| async { "raw-token\n" }))).await;
		assert_eq!(HttpTokenProvider::new(url).fetch().await.unwrap(), "raw-token");
	}

	#[tokio::test]
	async fn fetches_token_from_endpoint() {
		let url = serve(Router::new().route("/token", get(|| async { r#"{"token":"secret"}"# }))).await;
		let provider = HttpTokenProvider::new(url);
		assert_eq!(provider.fetch().await.unwrap(), "secret");
	}

	#[tokio::test]
	async fn non_success_status_is_token_fetch_error() {
		let url = serve(Router::new().route(
			"/token",
			get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
		))
		.await;
		let err = HttpTokenProvider::new(url.clone()).fetch().await.unwrap_err();
		match err {
			Error::TokenFetch { url: failed, reason } => {
				assert_eq!(failed, url);
				assert!(reason.contains("503"), "{reason}");
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn unreachable_endpoint_is_token_fetch_error() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let err = HttpTokenProvider::new(format!("http://{addr}/token")).fetch().await.unwrap_err();
		assert!(matches!(err, Error::TokenFetch { .. }));
	}

	#[tokio::test]
	async fn static_token_is_returned_as_is() {
		assert_eq!(StaticToken::new("t0k").fetch().await.unwrap(), "t0k");
	}
}
