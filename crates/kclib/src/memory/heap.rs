//! Heap bump allocator behind the runtime's `sbrk` hook.
//!
//! The runtime's malloc carves blocks out of memory it obtains by growing
//! the program break. Here the "break" is a cursor moving up through a fixed
//! arena:
//!
//! ```text
//!   start                      cursor                        sentinel
//!     │ regions handed to malloc │      still available         │
//!     └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! - The cursor is seeded to `start` on first use and only moves forward.
//! - A request is committed only if the new cursor stays strictly below the
//!   sentinel; otherwise nothing changes and OutOfMemory is reported.
//! - Nothing is ever reclaimed.
//!
//! **No internal synchronization.** The cursor is read and written with
//! plain (relaxed) loads and stores. Callers hold the malloc lock around
//! every call, exactly as the runtime does around `sbrk`.

use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ArenaConfig;
use crate::error::HeapError;

/// Cursor value meaning "not seeded yet". Arena starts are never null.
const UNSEEDED: usize = 0;

/// Bump allocator over a fixed `[start, sentinel)` arena.
#[derive(Debug)]
pub struct HeapArena {
	config: ArenaConfig,
	/// Current break address, or `UNSEEDED`.
	cursor: AtomicUsize,
}

impl HeapArena {
	/// An unseeded arena. `const` so it can back a static port.
	pub const fn new(config: ArenaConfig) -> Self {
		Self {
			config,
			cursor: AtomicUsize::new(UNSEEDED),
		}
	}

	/// Grow the heap by `increment` bytes.
	///
	/// Returns the previous cursor, the base of the newly reserved region.
	/// An increment of zero is a query: it returns the current cursor and
	/// reserves nothing.
	///
	/// Fails without moving the cursor when `cursor + increment` would reach
	/// the sentinel, or when `increment` is negative.
	pub fn grow(&self, increment: isize) -> Result<*mut u8, HeapError> {
		let base = self.seed();

		let requested = usize::try_from(increment)
			.map_err(|_| HeapError::NegativeIncrement {
				requested: increment,
			})?;

		let remaining = self.config.sentinel() - base;
		if requested >= remaining {
			log::trace!(
				"heap: refusing {} bytes at {:#x}, {} left",
				requested,
				base,
				remaining
			);
			return Err(HeapError::OutOfMemory {
				requested,
				remaining,
			});
		}

		if requested > 0 {
			self.cursor.store(base + requested, Ordering::Relaxed);
			log::trace!("heap: +{} bytes at {:#x}", requested, base);
		}
		Ok(ptr::with_exposed_provenance_mut(base))
	}

	/// Current break address (the arena start before the first call).
	pub fn cursor(&self) -> usize {
		match self.cursor.load(Ordering::Relaxed) {
			UNSEEDED => self.config.start(),
			cursor => cursor,
		}
	}

	/// Bytes handed out so far.
	pub fn used(&self) -> usize {
		self.cursor() - self.config.start()
	}

	/// Bytes between the cursor and the sentinel.
	///
	/// The largest request that can still succeed is one less than this.
	pub fn remaining(&self) -> usize {
		self.config.sentinel() - self.cursor()
	}

	/// The arena bounds.
	pub fn config(&self) -> &ArenaConfig {
		&self.config
	}

	/// Forget every allocation and return to the unseeded state.
	///
	/// Exclusive access makes this safe to call; the runtime never does.
	pub fn reset(&mut self) {
		*self.cursor.get_mut() = UNSEEDED;
	}

	fn seed(&self) -> usize {
		match self.cursor.load(Ordering::Relaxed) {
			UNSEEDED => {
				let start = self.config.start();
				self.cursor.store(start, Ordering::Relaxed);
				start
			}
			cursor => cursor,
		}
	}
}
