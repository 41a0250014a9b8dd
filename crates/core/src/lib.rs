//! Session logic for a flow-controlled web terminal client.
//!
//! Everything in this crate is sans-IO: the state machines take events and
//! return decisions, and the host (the tokio runtime in `ttylink-runtime`, or
//! the browser event loop in `ttylink-browser`) performs the actual I/O and
//! timing.
//!
//! # Components
//!
//! - [`endpoint`] - Derives the WebSocket and token URLs from the page location
//! - [`flow`] - Acknowledgement window with high/low water hysteresis
//! - [`lifecycle`] - `Connecting -> Open -> (Draining ->) Closed` state machine
//! - [`resize`] - Coalesces bursts of viewport resizes into one geometry

pub mod endpoint;
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod resize;

pub use endpoint::{Endpoints, PageLocation, resolve_endpoints};
pub use error::{ConfigError, EndpointError, ErrorKind};
pub use flow::{FlowController, FlowSignal};
pub use lifecycle::{CloseReason, InvalidTransition, Lifecycle, SessionState};
pub use resize::{DEFAULT_RESIZE_WINDOW_MS, ResizeCoalescer};
pub use ttylink_protocol as protocol;
