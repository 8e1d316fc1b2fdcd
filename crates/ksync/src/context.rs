//! Execution-context identity.
//!
//! A recursive lock has to know *who* is asking. The kernel answers that
//! with its current task handle; hosted builds answer it with a per-thread
//! counter.

use core::num::NonZeroUsize;

/// Identity of one execution context (task, thread).
///
/// Never zero: the lock word uses zero to mean "unowned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(NonZeroUsize);

impl ContextId {
	/// Wrap a raw identity. Returns `None` for zero.
	pub const fn new(raw: usize) -> Option<Self> {
		match NonZeroUsize::new(raw) {
			Some(id) => Some(Self(id)),
			None => None,
		}
	}

	/// Identity for the `index`-th context (index 0 maps to id 1).
	pub const fn from_index(index: usize) -> Self {
		Self(NonZeroUsize::MIN.saturating_add(index))
	}

	/// The raw, non-zero identity word.
	#[inline]
	pub const fn get(self) -> usize {
		self.0.get()
	}
}

/// Tells a lock which execution context is calling it.
pub trait ContextSource: Sync {
	/// Identity of the calling context.
	fn current(&self) -> ContextId;

	/// Called on every iteration while waiting for a contended lock.
	///
	/// The default is a CPU spin hint. Sources backed by a scheduler should
	/// yield so the owner can run and release.
	#[inline]
	fn relax(&self) {
		core::hint::spin_loop();
	}
}

impl<C: ContextSource + ?Sized> ContextSource for &C {
	fn current(&self) -> ContextId {
		(**self).current()
	}

	fn relax(&self) {
		(**self).relax()
	}
}

#[cfg(feature = "std")]
pub use self::thread::ThreadContexts;

#[cfg(feature = "std")]
mod thread {
	use core::sync::atomic::{AtomicUsize, Ordering};

	use super::{ContextId, ContextSource};

	static NEXT_INDEX: AtomicUsize = AtomicUsize::new(0);

	std::thread_local! {
		static THREAD_CONTEXT: ContextId =
			ContextId::from_index(NEXT_INDEX.fetch_add(1, Ordering::Relaxed));
	}

	/// One execution context per OS thread.
	///
	/// Waiting yields the thread instead of burning the core, which keeps
	/// heavily oversubscribed test runs moving.
	#[derive(Debug, Default, Clone, Copy)]
	pub struct ThreadContexts;

	impl ContextSource for ThreadContexts {
		fn current(&self) -> ContextId {
			THREAD_CONTEXT.with(|id| *id)
		}

		fn relax(&self) {
			std::thread::yield_now();
		}
	}
}
