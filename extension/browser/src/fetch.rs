use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::Response;

/// Fetches the session token with a single `GET`.
pub(crate) async fn fetch_token(url: &str) -> Result<String, String> {
	let window = web_sys::window().ok_or_else(|| "no window".to_string())?;
	let response = JsFuture::from(window.fetch_with_str(url)).await.map_err(describe)?;
	let response: Response = response.dyn_into().map_err(describe)?;
	if !response.ok() {
		return Err(format!("HTTP {} {}", response.status(), response.status_text()));
	}
	let body = JsFuture::from(response.text().map_err(describe)?).await.map_err(describe)?;
	let body = body.as_string().unwrap_or_default();
	Ok(ttylink_protocol::parse_token_response(&body))
}

/// Readable message for a thrown JS value.
pub(crate) fn describe(value: JsValue) -> String {
	if let Some(err) = value.dyn_ref::<js_sys::Error>() {
		return String::from(err.message());
	}
	value.as_string().unwrap_or_else(|| format!("{value:?}"))
}
