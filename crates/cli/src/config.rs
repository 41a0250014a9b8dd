//! Startup configuration.
//!
//! ```json
//! {
//!   "client": { "rendererType": "canvas", "closeOnDisconnect": true },
//!   "terminal": { "fontSize": 16 },
//!   "flowControl": { "limit": 100000, "highWater": 65536, "lowWater": 16384 }
//! }
//! ```
//!
//! Every section is optional. The file is read once and validated before
//! any network activity.

use std::path::Path;

use serde::Deserialize;
use ttylink::FlowController;
use ttylink_protocol::{ClientOptions, FlowControl, TerminalOptions};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	#[serde(default = "local_client_options")]
	pub client: ClientOptions,
	#[serde(default)]
	pub terminal: TerminalOptions,
	#[serde(default)]
	pub flow_control: FlowControl,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			client: local_client_options(),
			terminal: TerminalOptions::default(),
			flow_control: FlowControl::default(),
		}
	}
}

/// The local terminal reports its own size, so the resize overlay is off
/// unless a config file turns it on.
fn local_client_options() -> ClientOptions {
	ClientOptions {
		disable_resize_overlay: true,
		..ClientOptions::default()
	}
}

impl Config {
	/// Loads `path`, or the defaults when no file is given.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.validate()?;
		Ok(config)
	}

	fn from_file(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn validate(&self) -> Result<()> {
		FlowController::new(self.flow_control)?;
		Ok(())
	}
}
