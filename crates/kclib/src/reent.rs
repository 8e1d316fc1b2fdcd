//! Reentrant context block.
//!
//! The runtime keeps one `_reent`-style block per execution context so each
//! task sees its own `errno`. The port never owns these blocks; it only
//! writes the error field when heap growth fails.

/// `errno` value for "out of memory".
pub const ENOMEM: i32 = 12;

/// Per-context runtime state, as far as this layer is concerned.
///
/// `#[repr(C)]` with `errno` first, matching the leading field of the C
/// runtime's block, so a pointer to the real block can be used directly.
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reent {
	/// Last error reported to this context.
	pub errno: i32,
}

impl Reent {
	/// A block with no error recorded.
	pub const fn new() -> Self {
		Self { errno: 0 }
	}

	/// Record an error for this context.
	#[inline]
	pub fn set_errno(&mut self, errno: i32) {
		self.errno = errno;
	}
}
