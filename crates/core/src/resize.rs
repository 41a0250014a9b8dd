//! Resize coalescing.
//!
//! Dragging a window edge fires a resize per frame. The coalescer keeps only
//! the latest geometry until the host's coalescing window expires, and drops
//! a flush that would repeat the geometry already sent.

use ttylink_protocol::Geometry;

/// Default coalescing window used by the hosts.
pub const DEFAULT_RESIZE_WINDOW_MS: u64 = 50;

/// Last-value buffer for viewport resizes.
#[derive(Debug, Clone, Default)]
pub struct ResizeCoalescer {
	pending: Option<Geometry>,
	last_sent: Option<Geometry>,
}

impl ResizeCoalescer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts with `initial` as the geometry the remote already knows, for
	/// example the size sent in the handshake.
	pub fn with_initial(initial: Geometry) -> Self {
		Self {
			pending: None,
			last_sent: Some(initial),
		}
	}

	/// Records `geometry` as the latest size.
	///
	/// Returns `true` when this starts a new coalescing window, meaning the
	/// host must arm its timer and call [`flush`](Self::flush) when it fires.
	pub fn push(&mut self, geometry: Geometry) -> bool {
		self.pending.replace(geometry).is_none()
	}

	/// Whether a coalescing window is open.
	pub fn is_pending(&self) -> bool {
		self.pending.is_some()
	}

	/// Ends the coalescing window.
	///
	/// Returns the geometry to send, or `None` if nothing changed since the
	/// last flush or the geometry is not a valid pty size.
	pub fn flush(&mut self) -> Option<Geometry> {
		let geometry = self.pending.take()?;
		if !geometry.is_valid() || self.last_sent == Some(geometry) {
			return None;
		}
		self.last_sent = Some(geometry);
		Some(geometry)
	}

	pub fn last_sent(&self) -> Option<Geometry> {
		self.last_sent
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn burst_within_one_window_sends_latest_only() {
		let mut coalescer = ResizeCoalescer::new();
		assert!(coalescer.push(Geometry::cells(80, 24)));
		assert!(!coalescer.push(Geometry::cells(100, 30)));
		assert!(!coalescer.push(Geometry::cells(120, 40)));

		assert_eq!(coalescer.flush(), Some(Geometry::cells(120, 40)));
		assert_eq!(coalescer.flush(), None);
	}

	#[test]
	fn repeated_geometry_is_not_resent() {
		let mut coalescer = ResizeCoalescer::new();
		coalescer.push(Geometry::cells(120, 40));
		assert!(coalescer.flush().is_some());

		assert!(coalescer.push(Geometry::cells(120, 40)));
		assert_eq!(coalescer.flush(), None);
	}

	#[test]
	fn window_that_returns_to_initial_size_sends_nothing() {
		let mut coalescer = ResizeCoalescer::with_initial(Geometry::cells(80, 24));
		coalescer.push(Geometry::cells(100, 30));
		coalescer.push(Geometry::cells(80, 24));
		assert_eq!(coalescer.flush(), None);
		assert_eq!(coalescer.last_sent(), Some(Geometry::cells(80, 24)));
	}

	#[test]
	fn pixel_only_change_is_sent() {
		let mut coalescer = ResizeCoalescer::with_initial(Geometry::cells(80, 24));
		coalescer.push(Geometry::cells(80, 24).with_pixels(640, 480));
		assert_eq!(coalescer.flush(), Some(Geometry::cells(80, 24).with_pixels(640, 480)));
	}

	#[test]
	fn zero_sized_geometry_is_dropped() {
		let mut coalescer = ResizeCoalescer::new();
		coalescer.push(Geometry::cells(0, 0));
		assert_eq!(coalescer.flush(), None);
		assert!(!coalescer.is_pending());
	}
}
