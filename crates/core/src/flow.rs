//! Output acknowledgement window.
//!
//! The remote side streams output as fast as the shell produces it. The
//! client accounts every output frame as pending credit until the renderer
//! reports it consumed, and acknowledges consumed bytes in batches, once per
//! drain cycle. While pending credit is above the high water mark the client
//! withholds acknowledgements (and tells the remote with a `Pause` frame);
//! acknowledgements resume, together with a `Resume` frame, only once the
//! renderer has drained pending credit to the low water mark.
//!
//! ```text
//!  pending
//!    ^            throttled
//!    |        .-------------.
//!  HW|-------/---------------\---------
//!    |      /                 \
//!  LW|-----/-------------------\-------  <- resume + ack
//!    |    /                     \
//!    +--------------------------------> time
//! ```
//!
//! A renderer that never drains keeps acknowledgements withheld forever; that
//! is the backpressure signal, there is no timeout.

use ttylink_protocol::FlowControl;

use crate::error::ConfigError;

/// Frames the session must send in response to a flow-control transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
	/// Pending credit crossed the high water mark: send `Pause`.
	Pause,
	/// Throttle released: send `Resume`, then `Ack(ack)`.
	Resume { ack: u64 },
	/// Regular batched acknowledgement.
	Ack(u64),
}

/// Tracks pending output credit against the configured thresholds.
#[derive(Debug, Clone)]
pub struct FlowController {
	config: FlowControl,
	pending: u64,
	unacked: u64,
	throttled: bool,
}

impl FlowController {
	/// Validates `config` and creates a controller with an empty window.
	pub fn new(config: FlowControl) -> Result<Self, ConfigError> {
		validate(&config)?;
		Ok(Self {
			config,
			pending: 0,
			unacked: 0,
			throttled: false,
		})
	}

	/// Credit received but not yet consumed by the renderer.
	pub fn pending(&self) -> u64 {
		self.pending
	}

	pub fn is_throttled(&self) -> bool {
		self.throttled
	}

	/// Accounts an inbound output frame of `len` bytes.
	pub fn on_data(&mut self, len: usize) -> Option<FlowSignal> {
		self.pending = self.pending.saturating_add(self.credit(len));
		if !self.throttled && self.pending > self.config.high_water {
			self.throttled = true;
			tracing::debug!(pending = self.pending, high_water = self.config.high_water, "output throttled");
			return Some(FlowSignal::Pause);
		}
		None
	}

	/// Accounts `len` bytes of output the renderer finished consuming.
	pub fn on_consumed(&mut self, len: usize) {
		let credit = self.credit(len).min(self.pending);
		self.pending -= credit;
		self.unacked = self.unacked.saturating_add(credit);
	}

	/// Ends a drain cycle, returning at most one acknowledgement.
	pub fn end_cycle(&mut self) -> Option<FlowSignal> {
		if self.throttled {
			if self.pending > self.config.low_water {
				return None;
			}
			self.throttled = false;
			let ack = std::mem::take(&mut self.unacked);
			tracing::debug!(pending = self.pending, ack, "output resumed");
			return Some(FlowSignal::Resume { ack });
		}
		if self.unacked == 0 {
			return None;
		}
		Some(FlowSignal::Ack(std::mem::take(&mut self.unacked)))
	}

	fn credit(&self, len: usize) -> u64 {
		(len as u64).min(self.config.limit)
	}
}

fn validate(config: &FlowControl) -> Result<(), ConfigError> {
	if config.limit == 0 {
		return Err(ConfigError::ZeroLimit);
	}
	if config.high_water <= config.low_water {
		return Err(ConfigError::WaterMarksInverted {
			high_water: config.high_water,
			low_water: config.low_water,
		});
	}
	if config.high_water > config.limit {
		return Err(ConfigError::HighWaterAboveLimit {
			high_water: config.high_water,
			limit: config.limit,
		});
	}
	Ok(())
}
