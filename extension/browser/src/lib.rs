//! ttylink in the browser.
//!
//! Drives an xterm.js `Terminal` over a page-relative WebSocket. The session
//! logic is the same as the native client's: the flow controller, lifecycle
//! and resize coalescer come from `ttylink`, the frame codec from
//! `ttylink-protocol`. Only the event loop differs: callbacks from the
//! WebSocket, xterm.js and timers stand in for the actor's queue.

mod client;
mod fetch;
mod xterm;

use tracing::level_filters::LevelFilter;
use tracing_subscriber_wasm::MakeConsoleWriter;
use wasm_bindgen::prelude::wasm_bindgen;

pub use client::TerminalClient;
pub use xterm::{Disposable, XTerm};

#[wasm_bindgen(start)]
fn start() {
	console_error_panic_hook::set_once();

	tracing_subscriber::fmt()
		.with_max_level(LevelFilter::INFO)
		.with_writer(MakeConsoleWriter::default().map_trace_level_to(tracing::Level::DEBUG))
		// No clock in wasm32-unknown-unknown.
		.without_time()
		.with_ansi(false)
		.init();

	tracing::debug!("ttylink wasm module initialized");
}
