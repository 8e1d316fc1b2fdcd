// =============================================================================
// ksync - Recursive Ticket Lock
// =============================================================================
//
// A ticket lock that remembers who holds it.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`, as in a plain ticket lock.
//     Waiters are served strictly in arrival order (FIFO), so nobody starves.
//   - `owner` holds the ContextId of the current holder (0 = free).
//   - `depth` counts how many times the owner has taken the lock.
//
//   take(ctx):
//     owner == ctx  → depth += 1, return immediately (recursive take)
//     otherwise     → draw a ticket, wait until it is served, become owner
//
//   give(ctx):
//     owner != ctx  → refuse (returns false, nothing changes)
//     depth > 1     → depth -= 1
//     depth == 1    → clear owner, serve the next ticket
//
// OWNERSHIP CHECK WITHOUT A LOCK:
//   Only the owner ever writes its own id into `owner`, and it clears the
//   word before serving the next ticket. So a context that reads its own id
//   back from `owner` really is the holder; any other value (0 or someone
//   else's id) means it is not. `depth` is only touched by the holder.
//
// NO TIMEOUT:
//   take() waits forever. There is no cancellation path. While waiting it
//   calls ContextSource::relax() so a scheduler-backed source can yield.
//
// NOT AN IRQ LOCK:
//   Unlike the kernel's spinlocks this lock does not mask interrupts. It
//   guards task-level state (C library heap metadata, environment tables)
//   and must never be taken from an interrupt handler.
// =============================================================================

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::context::{ContextId, ContextSource};

/// Owner word value meaning "nobody holds the lock".
const UNOWNED: usize = 0;

/// A FIFO ticket lock the owning context may take recursively.
///
/// Every successful [`take`](Self::take) or [`try_take`](Self::try_take)
/// must be matched by exactly one [`give`](Self::give) from the same
/// context before another context can acquire the lock.
pub struct RecursiveSpinLock {
	/// The next ticket to be dispensed.
	next_ticket: AtomicU32,

	/// The ticket currently allowed to hold the lock.
	now_serving: AtomicU32,

	/// ContextId of the holder, or `UNOWNED`.
	owner: AtomicUsize,

	/// Recursion depth of the holder. Zero while free.
	depth: AtomicU32,
}

impl RecursiveSpinLock {
	/// Creates a free lock. `const` so locks can live in statics.
	pub const fn new() -> Self {
		Self {
			next_ticket: AtomicU32::new(0),
			now_serving: AtomicU32::new(0),
			owner: AtomicUsize::new(UNOWNED),
			depth: AtomicU32::new(0),
		}
	}

	/// Takes the lock for the calling context, waiting as long as it takes.
	pub fn take<C: ContextSource + ?Sized>(&self, contexts: &C) {
		let me = contexts.current();
		if self.reenter(me) {
			return;
		}

		// Relaxed is enough for drawing the ticket; the Acquire load in the
		// wait loop synchronizes with the previous holder's Release.
		let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
		while self.now_serving.load(Ordering::Acquire) != my_ticket {
			contexts.relax();
		}

		self.become_owner(me);
	}

	/// Takes the lock only if it is free or already held by the caller.
	///
	/// Returns `true` on success. Never waits.
	pub fn try_take<C: ContextSource + ?Sized>(&self, contexts: &C) -> bool {
		let me = contexts.current();
		if self.reenter(me) {
			return true;
		}

		let current = self.now_serving.load(Ordering::Relaxed);
		// Only take the next ticket if it is the one being served right now,
		// i.e. nobody holds or waits for the lock.
		let taken = self
			.next_ticket
			.compare_exchange(
				current,
				current.wrapping_add(1),
				Ordering::Acquire,
				Ordering::Relaxed,
			)
			.is_ok();

		if taken {
			self.become_owner(me);
		}
		taken
	}

	/// Gives the lock back once.
	///
	/// Returns `false` without touching the lock if the caller does not hold
	/// it. The final matching give frees the lock for the next waiter.
	pub fn give<C: ContextSource + ?Sized>(&self, contexts: &C) -> bool {
		let me = contexts.current();
		if self.owner.load(Ordering::Relaxed) != me.get() {
			return false;
		}

		let depth = self.depth.load(Ordering::Relaxed);
		if depth > 1 {
			self.depth.store(depth - 1, Ordering::Relaxed);
			return true;
		}

		self.depth.store(0, Ordering::Relaxed);
		self.owner.store(UNOWNED, Ordering::Relaxed);
		// Release: everything written under the lock is visible to the next
		// holder before it sees its ticket served.
		self.now_serving.fetch_add(1, Ordering::Release);
		true
	}

	/// Current holder, if any. Racy by nature; diagnostics only.
	pub fn owner(&self) -> Option<ContextId> {
		ContextId::new(self.owner.load(Ordering::Relaxed))
	}

	/// Whether some context holds the lock. Racy; diagnostics only.
	pub fn is_locked(&self) -> bool {
		self.owner.load(Ordering::Relaxed) != UNOWNED
	}

	/// Recursion depth of the current holder (0 when free).
	pub fn depth(&self) -> u32 {
		self.depth.load(Ordering::Relaxed)
	}

	#[inline]
	fn reenter(&self, me: ContextId) -> bool {
		if self.owner.load(Ordering::Relaxed) == me.get() {
			self.depth.fetch_add(1, Ordering::Relaxed);
			true
		} else {
			false
		}
	}

	#[inline]
	fn become_owner(&self, me: ContextId) {
		self.owner.store(me.get(), Ordering::Relaxed);
		self.depth.store(1, Ordering::Relaxed);
	}
}

impl Default for RecursiveSpinLock {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for RecursiveSpinLock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RecursiveSpinLock")
			.field("owner", &self.owner())
			.field("depth", &self.depth())
			.finish()
	}
}
