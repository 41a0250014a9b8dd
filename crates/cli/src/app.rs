//! Wires configuration, session and local terminal together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use ttylink::{PageLocation, resolve_endpoints};
use ttylink_runtime::{Emulator, HttpTokenProvider, Session, SessionConfig, TerminalBridge, WebSocketConnector};

use crate::cli::Cli;
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::terminal::{self, LocalTerminal, RawMode};

/// Emulator events buffered between stdin and the bridge.
const INPUT_BUFFER: usize = 64;

pub async fn run(cli: Cli) -> Result<()> {
	let config = Config::load(cli.config.as_deref())?;
	let endpoints = resolve_endpoints(&PageLocation::parse(&cli.url)?);
	info!(target = "ttylink", ws = %endpoints.ws_url, token = %endpoints.token_url, "resolved endpoints");

	let local = LocalTerminal::new();
	let tokens = Arc::new(HttpTokenProvider::new(endpoints.token_url.clone()));
	let session = Session::start(
		SessionConfig {
			endpoints,
			flow_control: config.flow_control,
			geometry: local.dimensions(),
		},
		tokens,
		Arc::new(WebSocketConnector),
	)?;
	let (handle, events, _task) = session.into_parts();

	let raw_mode = if cli.no_raw {
		None
	} else {
		RawMode::enable().map_err(CliError::Terminal)?
	};

	let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
	let input = terminal::spawn_input(input_tx);

	let mut bridge = TerminalBridge::new(local, config.client, config.terminal)
		.with_resize_window(Duration::from_millis(cli.resize_window));
	let outcome = bridge.run(handle, events, input_rx).await;

	input.abort();
	drop(raw_mode);

	if outcome.is_error() {
		return Err(CliError::Session(outcome.reason));
	}
	info!(target = "ttylink", reason = %outcome.reason, "disconnected");
	Ok(())
}
