use clap::Parser;
use colored::Colorize;
use ttylink_cli::{app, cli::Cli, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let code = match app::run(cli).await {
		Ok(()) => 0,
		Err(err) => {
			let kind = format!("[{}]", err.kind().as_str());
			eprintln!("{} {err} {}", "error:".red().bold(), kind.dimmed());
			err.exit_code()
		}
	};
	// Exit directly: a pending stdin read would otherwise hold up runtime shutdown.
	std::process::exit(code);
}
