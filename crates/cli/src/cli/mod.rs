#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::Parser;
use ttylink::DEFAULT_RESIZE_WINDOW_MS;

use crate::styles::cli_styles;

/// Attach this terminal to a remote shell served over the tty protocol.
#[derive(Parser, Debug)]
#[command(name = "ttylink")]
#[command(about = "Flow-controlled client for ttyd-style web terminals")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON file with `client`, `terminal` and `flowControl` sections
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Leave the local terminal in cooked mode (for piped input)
	#[arg(long)]
	pub no_raw: bool,

	/// Resize coalescing window in milliseconds
	#[arg(long, value_name = "MS", default_value_t = DEFAULT_RESIZE_WINDOW_MS)]
	pub resize_window: u64,

	/// Terminal page URL, for example http://localhost:7681/?arg=top
	#[arg(value_name = "URL")]
	pub url: String,
}
