//! The local terminal as an emulator.
//!
//! Remote output goes straight to stdout; the local terminal does the
//! rendering. Stdin bytes are forwarded untranslated, so raw mode is what
//! lets control keys reach the remote shell.

use std::io::{self, IsTerminal};

use async_trait::async_trait;
use crossterm::execute;
use crossterm::terminal::{self, SetTitle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ttylink_protocol::{ClientOptions, Geometry, TerminalOptions};
use ttylink_runtime::{Emulator, EmulatorEvent};

/// Size used when stdout is not a terminal.
const FALLBACK_GEOMETRY: Geometry = Geometry::cells(80, 24);

const STDIN_CHUNK: usize = 4096;

/// Current size of the controlling terminal.
pub fn current_geometry() -> Geometry {
	if let Ok(size) = terminal::window_size() {
		if size.columns > 0 && size.rows > 0 {
			return Geometry::cells(size.columns, size.rows).with_pixels(u32::from(size.width), u32::from(size.height));
		}
	}
	match terminal::size() {
		Ok((columns, rows)) if columns > 0 && rows > 0 => Geometry::cells(columns, rows),
		_ => FALLBACK_GEOMETRY,
	}
}

/// Client options set away from their defaults that a local tty cannot honor.
///
/// The renderer backend and Unicode width table are the local terminal's
/// own. Zmodem, trzsz and Sixel pass through as raw bytes and work only if
/// the local terminal speaks them. Line endings from a Windows pty arrive
/// already translated, so `isWindows` changes nothing.
pub fn ignored_options(client: &ClientOptions) -> Vec<&'static str> {
	let defaults = ClientOptions::default();
	[
		("rendererType", client.renderer_type != defaults.renderer_type),
		("enableZmodem", client.enable_zmodem),
		("enableTrzsz", client.enable_trzsz),
		("enableSixel", client.enable_sixel),
		("isWindows", client.is_windows),
		("unicodeVersion", client.unicode_version != defaults.unicode_version),
	]
	.into_iter()
	.filter_map(|(key, set)| set.then_some(key))
	.collect()
}

pub struct LocalTerminal {
	stdout: tokio::io::Stdout,
	geometry: Geometry,
}

impl LocalTerminal {
	pub fn new() -> Self {
		Self {
			stdout: tokio::io::stdout(),
			geometry: current_geometry(),
		}
	}
}

impl Default for LocalTerminal {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Emulator for LocalTerminal {
	async fn write(&mut self, data: &[u8]) -> io::Result<()> {
		self.stdout.write_all(data).await?;
		self.stdout.flush().await
	}

	fn dimensions(&self) -> Geometry {
		self.geometry
	}

	/// Fonts, theme and renderer belong to the local terminal. See
	/// [`ignored_options`] for the client options that have no effect here.
	fn configure(&mut self, client: &ClientOptions, _terminal: &TerminalOptions) {
		let ignored = ignored_options(client);
		if !ignored.is_empty() {
			debug!(?ignored, "client options have no effect on a local terminal");
		}
	}

	fn set_title(&mut self, title: &str) {
		if let Err(err) = execute!(io::stdout(), SetTitle(title)) {
			debug!(error = %err, "failed to set window title");
		}
	}

	fn resize(&mut self, geometry: Geometry) {
		self.geometry = geometry;
	}

	fn show_overlay(&mut self, message: &str) {
		eprint!("\r\n[{message}]\r\n");
	}
}

/// Raw mode for the lifetime of the guard.
pub struct RawMode(());

impl RawMode {
	/// Enables raw mode, or returns `None` when stdin is not a terminal.
	pub fn enable() -> io::Result<Option<Self>> {
		if !io::stdin().is_terminal() {
			debug!("stdin is not a terminal, staying in cooked mode");
			return Ok(None);
		}
		terminal::enable_raw_mode()?;
		debug!("enabled raw mode");
		Ok(Some(Self(())))
	}
}

impl Drop for RawMode {
	fn drop(&mut self) {
		if let Err(err) = terminal::disable_raw_mode() {
			warn!(error = %err, "failed to restore terminal mode");
		}
	}
}

/// Feeds stdin and viewport changes into `events`.
///
/// When stdin reaches EOF every sender is dropped, which closes the session.
pub fn spawn_input(events: mpsc::Sender<EmulatorEvent>) -> JoinHandle<()> {
	let resize = tokio::spawn(watch_resize(events.clone()));
	tokio::spawn(async move {
		read_stdin(events).await;
		resize.abort();
	})
}

async fn read_stdin(events: mpsc::Sender<EmulatorEvent>) {
	let mut stdin = tokio::io::stdin();
	let mut buf = vec![0u8; STDIN_CHUNK];
	loop {
		match stdin.read(&mut buf).await {
			Ok(0) => {
				debug!("stdin closed");
				return;
			}
			Ok(n) => {
				if events.send(EmulatorEvent::Input(buf[..n].to_vec())).await.is_err() {
					return;
				}
			}
			Err(err) => {
				warn!(error = %err, "stdin read failed");
				return;
			}
		}
	}
}

#[cfg(unix)]
async fn watch_resize(events: mpsc::Sender<EmulatorEvent>) {
	use tokio::signal::unix::{SignalKind, signal};

	let mut winch = match signal(SignalKind::window_change()) {
		Ok(winch) => winch,
		Err(err) => {
			warn!(error = %err, "cannot watch for terminal resizes");
			return;
		}
	};
	while winch.recv().await.is_some() {
		if events.send(EmulatorEvent::Resize(current_geometry())).await.is_err() {
			return;
		}
	}
}

/// No resize signal here, so poll.
#[cfg(not(unix))]
async fn watch_resize(events: mpsc::Sender<EmulatorEvent>) {
	let mut interval = tokio::time::interval(std::time::Duration::from_millis(250));
	let mut last = current_geometry();
	loop {
		interval.tick().await;
		let geometry = current_geometry();
		if geometry != last {
			last = geometry;
			if events.send(EmulatorEvent::Resize(geometry)).await.is_err() {
				return;
			}
		}
	}
}
