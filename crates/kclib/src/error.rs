//! Error types for the port layer.
//!
//! Lock-creation failure is deliberately absent: it has no error channel in
//! the runtime and shows up as a `None` handle instead.

use core::error::Error;
use core::fmt;

use crate::reent::ENOMEM;

/// Heap growth was refused. The cursor is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
	/// The request would reach or cross the arena sentinel.
	OutOfMemory {
		/// Bytes requested.
		requested: usize,
		/// Bytes between the cursor and the sentinel.
		remaining: usize,
	},
	/// A negative increment asked the heap to shrink. The arena never
	/// gives memory back.
	NegativeIncrement {
		/// The increment as passed by the runtime.
		requested: isize,
	},
}

impl HeapError {
	/// The `errno` value reported through the reentrant context.
	pub const fn errno(&self) -> i32 {
		ENOMEM
	}
}

impl fmt::Display for HeapError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::OutOfMemory {
				requested,
				remaining,
			} => write!(
				f,
				"heap arena exhausted: requested {requested} bytes, {remaining} bytes before the sentinel"
			),
			Self::NegativeIncrement { requested } => {
				write!(f, "heap cannot shrink: increment {requested}")
			}
		}
	}
}

impl Error for HeapError {}

/// The initialization controller ran out of order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitError {
	/// Initialization already completed once.
	AlreadyInitialized,
	/// Initialization was re-entered while creating the singleton mutex.
	InitInProgress,
}

impl fmt::Display for InitError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::AlreadyInitialized => {
				write!(f, "C library already initialized (double initialization)")
			}
			Self::InitInProgress => {
				write!(f, "C library initialization re-entered while in progress")
			}
		}
	}
}

impl Error for InitError {}

/// Arena bounds rejected at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
	/// The arena starts at address zero.
	NullArenaStart,
	/// The sentinel does not lie strictly above the start.
	EmptyArena {
		/// First byte of the arena.
		start: usize,
		/// Sentinel address.
		sentinel: usize,
	},
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NullArenaStart => write!(f, "heap arena starts at the null address"),
			Self::EmptyArena { start, sentinel } => write!(
				f,
				"heap arena is empty: start {start:#x}, sentinel {sentinel:#x}"
			),
		}
	}
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_heap_error_maps_to_enomem() {
		let oom = HeapError::OutOfMemory {
			requested: 10,
			remaining: 4,
		};
		let shrink = HeapError::NegativeIncrement { requested: -8 };
		assert_eq!(oom.errno(), ENOMEM);
		assert_eq!(shrink.errno(), ENOMEM);
	}

	#[test]
	fn display_names_the_numbers() {
		let oom = HeapError::OutOfMemory {
			requested: 10,
			remaining: 4,
		};
		let text = oom.to_string();
		assert!(text.contains("10"));
		assert!(text.contains('4'));
		assert!(
			InitError::AlreadyInitialized
				.to_string()
				.contains("double initialization")
		);
	}
}
