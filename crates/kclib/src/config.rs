//! Heap arena configuration.

use crate::error::ConfigError;

/// Bounds of the fixed heap arena.
///
/// On target these come from the linker script (end of `.bss` up to the heap
/// sentinel); hosted code usually carves them out of a buffer with
/// [`ArenaConfig::from_slice`]. Validated at construction, immutable after.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
	start: usize,
	sentinel: usize,
}

impl ArenaConfig {
	/// Arena `[start, sentinel)`.
	///
	/// `start` must be non-zero and `sentinel` strictly above it. No
	/// allocation may ever reach the sentinel address itself.
	pub const fn new(start: usize, sentinel: usize) -> Result<Self, ConfigError> {
		if start == 0 {
			return Err(ConfigError::NullArenaStart);
		}
		if sentinel <= start {
			return Err(ConfigError::EmptyArena { start, sentinel });
		}
		Ok(Self { start, sentinel })
	}

	/// Arena spanning a caller-owned buffer.
	///
	/// The port never dereferences arena addresses; the runtime does. The
	/// caller keeps the buffer alive for as long as the runtime uses it.
	pub fn from_slice(buf: &mut [u8]) -> Result<Self, ConfigError> {
		let start = buf.as_mut_ptr().expose_provenance();
		Self::new(start, start.saturating_add(buf.len()))
	}

	/// First byte of the arena.
	#[inline]
	pub const fn start(&self) -> usize {
		self.start
	}

	/// The address the heap cursor must stay strictly below.
	#[inline]
	pub const fn sentinel(&self) -> usize {
		self.sentinel
	}

	/// Distance from start to sentinel in bytes.
	#[inline]
	pub const fn len(&self) -> usize {
		self.sentinel - self.start
	}

	/// Always `false`: empty arenas are rejected by [`ArenaConfig::new`].
	#[inline]
	pub const fn is_empty(&self) -> bool {
		false
	}

	/// Whether `[base, base + len)` lies inside the arena.
	pub const fn contains_range(&self, base: usize, len: usize) -> bool {
		match base.checked_add(len) {
			Some(end) => base >= self.start && end <= self.sentinel,
			None => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_null_start() {
		assert_eq!(ArenaConfig::new(0, 64), Err(ConfigError::NullArenaStart));
	}

	#[test]
	fn rejects_empty_or_inverted_bounds() {
		assert_eq!(
			ArenaConfig::new(0x1000, 0x1000),
			Err(ConfigError::EmptyArena {
				start: 0x1000,
				sentinel: 0x1000
			})
		);
		assert!(ArenaConfig::new(0x2000, 0x1000).is_err());
	}

	#[test]
	fn slice_bounds_match_buffer() {
		let mut buf = vec![0u8; 256];
		let config = ArenaConfig::from_slice(&mut buf).unwrap();
		assert_eq!(config.start(), buf.as_ptr() as usize);
		assert_eq!(config.len(), 256);
	}

	#[test]
	fn empty_slice_is_rejected() {
		let mut buf: [u8; 0] = [];
		assert!(matches!(
			ArenaConfig::from_slice(&mut buf),
			Err(ConfigError::EmptyArena { .. })
		));
	}

	#[test]
	fn contains_range_checks_both_ends() {
		let config = ArenaConfig::new(0x1000, 0x2000).unwrap();
		assert!(config.contains_range(0x1000, 0x1000));
		assert!(!config.contains_range(0x1000, 0x1001));
		assert!(!config.contains_range(0xFFF, 1));
		assert!(!config.contains_range(usize::MAX, 2));
	}
}
