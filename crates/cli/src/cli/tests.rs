use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_url_only() {
	let cli = Cli::try_parse_from(["ttylink", "http://localhost:7681/"]).unwrap();
	assert_eq!(cli.url, "http://localhost:7681/");
	assert_eq!(cli.verbose, 0);
	assert_eq!(cli.config, None);
	assert!(!cli.no_raw);
	assert_eq!(cli.resize_window, DEFAULT_RESIZE_WINDOW_MS);
}

#[test]
fn parse_all_flags() {
	let cli = Cli::try_parse_from([
		"ttylink",
		"-vv",
		"--config",
		"/etc/ttylink.json",
		"--no-raw",
		"--resize-window",
		"100",
		"https://host:8443/term/?fwdPort=9000",
	])
	.unwrap();
	assert_eq!(cli.verbose, 2);
	assert_eq!(cli.config, Some(PathBuf::from("/etc/ttylink.json")));
	assert!(cli.no_raw);
	assert_eq!(cli.resize_window, 100);
	assert_eq!(cli.url, "https://host:8443/term/?fwdPort=9000");
}

#[test]
fn url_is_required() {
	assert!(Cli::try_parse_from(["ttylink", "-v"]).is_err());
}
