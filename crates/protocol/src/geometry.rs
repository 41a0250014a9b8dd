//! Terminal viewport geometry.

use serde::{Deserialize, Serialize};

/// Size of the rendered terminal viewport.
///
/// Serialized with the field names the remote side expects in a resize
/// frame: `columns`, `rows`, `width` and `height` (pixels).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
	/// Number of character rows.
	pub rows: u16,
	/// Number of character columns.
	pub columns: u16,
	/// Viewport width in pixels, `0` when unknown.
	#[serde(rename = "width", default)]
	pub pixel_width: u32,
	/// Viewport height in pixels, `0` when unknown.
	#[serde(rename = "height", default)]
	pub pixel_height: u32,
}

impl Geometry {
	/// Geometry measured in cells only.
	pub const fn cells(columns: u16, rows: u16) -> Self {
		Self {
			rows,
			columns,
			pixel_width: 0,
			pixel_height: 0,
		}
	}

	/// Returns a copy with the pixel dimensions set.
	pub const fn with_pixels(self, pixel_width: u32, pixel_height: u32) -> Self {
		Self {
			pixel_width,
			pixel_height,
			..self
		}
	}

	/// A pseudo-terminal cannot be sized to zero rows or columns.
	pub const fn is_valid(&self) -> bool {
		self.rows > 0 && self.columns > 0
	}
}

impl std::fmt::Display for Geometry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}x{}", self.columns, self.rows)
	}
}
