// =============================================================================
// kclib - Lock Providers
// =============================================================================
//
// The C runtime brackets every access to its shared internal state (heap
// metadata, environment tables, stdio) with lock hooks. A LockProvider
// answers those hooks with kernel recursive mutexes.
//
// Two strategies, picked when the port is composed:
//
//   PerObjectRecursiveMutex - one kernel mutex per lock slot the runtime
//                             asks for. Creation is lazy and may happen in
//                             the middle of the runtime's own init pass.
//
//   GlobalRecursiveMutex    - one kernel mutex for every critical section.
//                             Created once by the initialization controller;
//                             every hook is a no-op until then.
//
// BOOTSTRAP PHASES:
//
//   NotStarted ──create()/initialize()──▶ CreatingLocks ──▶ Ready
//
//   CreatingLocks spans the kernel's create-mutex call. That call may
//   allocate, which goes through the malloc lock hooks, which may try to
//   create the malloc lock. Only the context doing the creation is told to
//   skip (`in_creation`, `Creation::Suppressed`); any other context that
//   wants a lock meanwhile waits for the window to close and then creates.
//
// Every hook tolerates a missing handle: lock-creation failure has no error
// channel in the runtime, so a `None` slot degrades to "no locking".
// =============================================================================

pub mod global;
pub mod per_object;

use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::InitError;

/// A strategy for answering the runtime's lock hooks.
pub trait LockProvider {
	/// What the runtime keeps in a lock slot.
	type Handle: Send + Sync;

	/// Create a lock, saying why when there is none.
	fn try_create(&self) -> Creation<Self::Handle>;

	/// Create a lock for a new runtime lock slot.
	///
	/// `None` means no lock could be made; every operation on a `None` slot
	/// is a no-op.
	fn create(&self) -> Option<Self::Handle> {
		self.try_create().into_handle()
	}

	/// Whether the calling context is itself inside a lock creation, i.e.
	/// reached this provider again from the kernel's create call.
	fn in_creation(&self) -> bool;

	/// Tear down the lock in `slot`, leaving it empty.
	fn destroy(&self, slot: &mut Option<Self::Handle>);

	/// Enter the critical section guarded by `handle`. May block forever;
	/// the holder may enter again.
	fn acquire(&self, handle: Option<&Self::Handle>);

	/// Leave the critical section once.
	fn release(&self, handle: Option<&Self::Handle>);

	/// One-time startup work for this strategy.
	fn initialize(&self) -> Result<(), InitError>;

	/// Where the provider is in the bootstrap sequence.
	fn phase(&self) -> Phase;

	/// Back to [`Phase::NotStarted`], releasing provider-owned kernel
	/// objects. Handles held in runtime slots stay the caller's business.
	fn reset(&mut self);
}

/// Outcome of [`LockProvider::try_create`].
#[derive(Debug, PartialEq, Eq)]
pub enum Creation<H> {
	/// A fresh lock.
	Created(H),
	/// The kernel could not make one. Permanent for the slot that asked.
	Failed,
	/// The caller is nested inside its own lock creation. Nothing was
	/// attempted; asking again later can succeed.
	Suppressed,
}

impl<H> Creation<H> {
	pub fn into_handle(self) -> Option<H> {
		match self {
			Self::Created(handle) => Some(handle),
			Self::Failed | Self::Suppressed => None,
		}
	}
}

/// Bootstrap phase of a lock provider.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// No lock has been created yet.
	NotStarted = 0,
	/// A kernel mutex is being created right now. Nested lock creation is
	/// suppressed until this ends.
	CreatingLocks = 1,
	/// Locks exist and the hooks really lock.
	Ready = 2,
}

impl Phase {
	const fn from_raw(raw: u8) -> Self {
		match raw {
			0 => Self::NotStarted,
			1 => Self::CreatingLocks,
			_ => Self::Ready,
		}
	}
}

/// A [`Phase`] shared between execution contexts.
///
/// Written by whichever context is creating locks, read by everyone else
/// before deciding whether to really lock. Release/Acquire so that a reader
/// who sees `Ready` also sees the mutex published before it.
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
	pub(crate) const fn new() -> Self {
		Self(AtomicU8::new(Phase::NotStarted as u8))
	}

	#[inline]
	pub(crate) fn load(&self) -> Phase {
		Phase::from_raw(self.0.load(Ordering::Acquire))
	}

	#[inline]
	pub(crate) fn store(&self, phase: Phase) {
		self.0.store(phase as u8, Ordering::Release);
	}

	/// Move from `from` to `to`, or report the phase actually found.
	pub(crate) fn transition(&self, from: Phase, to: Phase) -> Result<(), Phase> {
		self.0
			.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
			.map(|_| ())
			.map_err(Phase::from_raw)
	}

	pub(crate) fn reset(&mut self) {
		*self.0.get_mut() = Phase::NotStarted as u8;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_not_started() {
		assert_eq!(PhaseCell::new().load(), Phase::NotStarted);
	}

	#[test]
	fn transition_reports_actual_phase() {
		let cell = PhaseCell::new();
		assert_eq!(
			cell.transition(Phase::NotStarted, Phase::CreatingLocks),
			Ok(())
		);
		assert_eq!(
			cell.transition(Phase::NotStarted, Phase::CreatingLocks),
			Err(Phase::CreatingLocks)
		);
		cell.store(Phase::Ready);
		assert_eq!(cell.load(), Phase::Ready);
	}

	#[test]
	fn reset_goes_back_to_not_started() {
		let mut cell = PhaseCell::new();
		cell.store(Phase::Ready);
		cell.reset();
		assert_eq!(cell.load(), Phase::NotStarted);
	}
}
