//! Startup configuration shared between the session and the emulator.
//!
//! Field names serialize in camelCase so the JSON preferences pushed by the
//! remote side (see [`ServerMessage::SetPreferences`](crate::ServerMessage))
//! apply to these structs key for key.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::frame::Preferences;

/// Rendering backend requested from the emulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererType {
	Dom,
	Canvas,
	#[default]
	Webgl,
}

/// Client feature toggles, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
	/// Renderer backend selector.
	pub renderer_type: RendererType,
	/// Do not warn before leaving a page with a live session.
	pub disable_leave_alert: bool,
	/// Do not show the `COLSxROWS` overlay after a resize.
	pub disable_resize_overlay: bool,
	/// Enable the Zmodem file transfer addon.
	pub enable_zmodem: bool,
	/// Enable the trzsz file transfer addon.
	pub enable_trzsz: bool,
	/// Enable Sixel image support.
	pub enable_sixel: bool,
	/// Dispose of the terminal instead of showing a disconnected overlay.
	pub close_on_disconnect: bool,
	/// Remote side is a Windows pty (CRLF line endings, conpty quirks).
	pub is_windows: bool,
	/// Unicode version used for character width tables.
	pub unicode_version: String,
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			renderer_type: RendererType::Webgl,
			disable_leave_alert: false,
			disable_resize_overlay: false,
			enable_zmodem: false,
			enable_trzsz: false,
			enable_sixel: false,
			close_on_disconnect: false,
			is_windows: false,
			unicode_version: "11".to_string(),
		}
	}
}

impl ClientOptions {
	/// Emulator option keys these toggles translate to, in xterm.js naming.
	///
	/// `isWindows` turns on the conpty reflow heuristics. The Unicode version
	/// is not an option key and is applied through the emulator's Unicode
	/// service instead. The renderer and transfer toggles select addons and
	/// are left to the host that loads them.
	pub fn emulator_options(&self) -> Preferences {
		let mut options = Preferences::new();
		if self.is_windows {
			options.insert("windowsPty".into(), json!({ "backend": "conpty" }));
		}
		options
	}
}

/// Color theme handed to the emulator. Colors are CSS color strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
	pub foreground: String,
	pub background: String,
	pub cursor: String,
	pub selection_background: String,
	pub black: String,
	pub red: String,
	pub green: String,
	pub yellow: String,
	pub blue: String,
	pub magenta: String,
	pub cyan: String,
	pub white: String,
	pub bright_black: String,
	pub bright_red: String,
	pub bright_green: String,
	pub bright_yellow: String,
	pub bright_blue: String,
	pub bright_magenta: String,
	pub bright_cyan: String,
	pub bright_white: String,
}

impl Default for Theme {
	/// Google Dark.
	fn default() -> Self {
		Self {
			foreground: "#b0afaf".into(),
			background: "#1f1f1f".into(),
			cursor: "#98b1ff".into(),
			selection_background: "#3252b8".into(),
			black: "#333333".into(),
			red: "#f76769".into(),
			green: "#17b877".into(),
			yellow: "#ffa23e".into(),
			blue: "#7895ff".into(),
			magenta: "#a87ffb".into(),
			cyan: "#25a6e9".into(),
			white: "#b0afaf".into(),
			bright_black: "#555555".into(),
			bright_red: "#fc8f8e".into(),
			bright_green: "#66ce98".into(),
			bright_yellow: "#ffc26e".into(),
			bright_blue: "#98b1ff".into(),
			bright_magenta: "#c8aaff".into(),
			bright_cyan: "#71c2ee".into(),
			bright_white: "#fdfcfc".into(),
		}
	}
}

/// Font and theme settings for the emulator surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalOptions {
	pub font_size: u16,
	pub line_height: f32,
	pub font_family: String,
	pub theme: Theme,
	pub allow_proposed_api: bool,
}

impl Default for TerminalOptions {
	fn default() -> Self {
		Self {
			font_size: 14,
			line_height: 1.0,
			font_family: "Google Sans Code,Liberation Mono,Menlo,Courier,monospace".into(),
			theme: Theme::default(),
			allow_proposed_api: true,
		}
	}
}

impl TerminalOptions {
	/// Applies the font and theme keys of `prefs`, returning the rest.
	pub fn merge_preferences(&mut self, prefs: &Preferences) -> Vec<String> {
		let mut rejected = Vec::new();
		for (key, value) in prefs {
			let applied = match key.as_str() {
				"fontSize" => assign(&mut self.font_size, value),
				"lineHeight" => assign(&mut self.line_height, value),
				"fontFamily" => assign(&mut self.font_family, value),
				"theme" => assign(&mut self.theme, value),
				"allowProposedApi" => assign(&mut self.allow_proposed_api, value),
				_ => false,
			};
			if !applied {
				rejected.push(key.clone());
			}
		}
		rejected
	}
}

/// Thresholds for the output acknowledgement window, in bytes.
///
/// `low_water < high_water <= limit` must hold; the flow controller rejects
/// anything else at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowControl {
	/// Largest credit a single output frame can take.
	pub limit: u64,
	/// Pending bytes above which acknowledgements stop.
	pub high_water: u64,
	/// Pending bytes at or below which acknowledgements resume.
	pub low_water: u64,
}

impl Default for FlowControl {
	fn default() -> Self {
		Self {
			limit: 100_000,
			high_water: 65_536,
			low_water: 16_384,
		}
	}
}

fn assign<T: DeserializeOwned>(slot: &mut T, value: &Value) -> bool {
	match T::deserialize(value) {
		Ok(parsed) => {
			*slot = parsed;
			true
		}
		Err(_) => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn prefs(value: Value) -> Preferences {
		value.as_object().cloned().unwrap()
	}

	#[test]
	fn client_options_defaults_match_stock_client() {
		let options = ClientOptions::default();
		assert_eq!(options.renderer_type, RendererType::Webgl);
		assert!(!options.disable_leave_alert);
		assert!(!options.close_on_disconnect);
		assert_eq!(options.unicode_version, "11");
	}

	#[test]
	fn client_options_parse_from_camel_case_with_defaults() {
		let options: ClientOptions = serde_json::from_str(r#"{"rendererType":"canvas","enableSixel":true}"#).unwrap();
		assert_eq!(options.renderer_type, RendererType::Canvas);
		assert!(options.enable_sixel);
		assert!(!options.enable_zmodem);
	}

	#[test]
	fn windows_pty_is_requested_only_for_windows_hosts() {
		assert!(ClientOptions::default().emulator_options().is_empty());

		let options = ClientOptions {
			is_windows: true,
			..ClientOptions::default()
		};
		assert_eq!(Value::Object(options.emulator_options()), json!({"windowsPty": {"backend": "conpty"}}));
	}

	#[test]
	fn terminal_options_merge_font_keys() {
		let mut options = TerminalOptions::default();
		let rejected = options.merge_preferences(&prefs(json!({"fontSize": 18, "isWindows": true})));
		assert_eq!(options.font_size, 18);
		assert_eq!(rejected, vec!["isWindows".to_string()]);
	}

	#[test]
	fn partial_theme_fills_missing_colors_from_default() {
		let theme: Theme = serde_json::from_str(r##"{"background":"#000000"}"##).unwrap();
		assert_eq!(theme.background, "#000000");
		assert_eq!(theme.foreground, Theme::default().foreground);
	}

	#[test]
	fn flow_control_parses_camel_case() {
		let flow: FlowControl = serde_json::from_str(r#"{"limit":100000,"highWater":10,"lowWater":4}"#).unwrap();
		assert_eq!(flow.high_water, 10);
		assert_eq!(flow.low_water, 4);
	}
}
