//! `ttylink` command-line client: attaches the local terminal to a remote
//! terminal session.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod styles;
pub mod terminal;
