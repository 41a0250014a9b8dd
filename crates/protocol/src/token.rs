//! Token endpoint response.

use serde::Deserialize;

#[derive(Deserialize)]
struct TokenResponse {
	#[serde(default)]
	token: String,
}

/// Extracts the session token from a token endpoint body.
///
/// Servers answer `{"token": "..."}` (an empty token when no credential is
/// configured). Anything that is not such an object is taken as a bare
/// token, trimmed.
pub fn parse_token_response(body: &str) -> String {
	match serde_json::from_str::<TokenResponse>(body) {
		Ok(response) => response.token,
		Err(_) => body.trim().to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn json_body_yields_token_field() {
		assert_eq!(parse_token_response(r#"{"token": "dXNlcjpwYXNz"}"#), "dXNlcjpwYXNz");
		assert_eq!(parse_token_response(r#"{"token": ""}"#), "");
		assert_eq!(parse_token_response("{}"), "");
	}

	#[test]
	fn plain_body_is_used_trimmed() {
		assert_eq!(parse_token_response("  abc123\n"), "abc123");
	}

	#[test]
	fn non_object_json_is_a_bare_token() {
		assert_eq!(parse_token_response("\"quoted\""), "\"quoted\"");
	}
}
