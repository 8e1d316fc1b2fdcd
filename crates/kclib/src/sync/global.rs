//! Strategy B: one kernel recursive mutex guards every runtime critical
//! section.
//!
//! The mutex is made by [`LockProvider::initialize`], called once from the
//! startup entry. Until that finishes every hook is a no-op, which is what
//! lets the runtime run its early single-threaded allocations (including the
//! ones the kernel makes while creating this very mutex) unguarded.

use core::fmt;

use super::{Creation, LockProvider, Phase, PhaseCell};
use crate::error::InitError;
use ksync::RecursiveMutexApi;

/// What the runtime keeps in a lock slot under the global strategy.
///
/// Carries no state. Its presence only says "this slot participates in the
/// global lock"; an empty slot still skips locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalLock;

/// A single process-wide recursive mutex behind every lock slot.
pub struct GlobalRecursiveMutex<M: RecursiveMutexApi> {
	kernel: M,
	/// Written once by `initialize`. `Some(None)` means creation failed.
	mutex: spin::Once<Option<M::Handle>>,
	phase: PhaseCell,
}

impl<M: RecursiveMutexApi> GlobalRecursiveMutex<M> {
	pub const fn new(kernel: M) -> Self {
		Self {
			kernel,
			mutex: spin::Once::new(),
			phase: PhaseCell::new(),
		}
	}

	pub fn kernel(&self) -> &M {
		&self.kernel
	}

	/// The shared mutex, once it exists.
	pub fn mutex(&self) -> Option<&M::Handle> {
		self.mutex.get().and_then(Option::as_ref)
	}

	fn shared(&self, handle: Option<&GlobalLock>) -> Option<&M::Handle> {
		// Ready is stored after the Once completes, so Ready implies a value.
		if handle.is_none() || self.phase.load() != Phase::Ready {
			return None;
		}
		self.mutex()
	}
}

impl<M: RecursiveMutexApi> LockProvider for GlobalRecursiveMutex<M> {
	type Handle = GlobalLock;

	fn try_create(&self) -> Creation<GlobalLock> {
		Creation::Created(GlobalLock)
	}

	/// Slot creation never calls the kernel, so it never nests.
	fn in_creation(&self) -> bool {
		false
	}

	fn destroy(&self, slot: &mut Option<GlobalLock>) {
		// The shared mutex outlives every slot.
		slot.take();
	}

	fn acquire(&self, handle: Option<&GlobalLock>) {
		if let Some(mutex) = self.shared(handle) {
			self.kernel.take_recursive(mutex);
		}
	}

	fn release(&self, handle: Option<&GlobalLock>) {
		if let Some(mutex) = self.shared(handle) {
			if !self.kernel.give_recursive(mutex) {
				log::warn!("kclib: global lock released by a context that does not hold it");
			}
		}
	}

	fn initialize(&self) -> Result<(), InitError> {
		match self.phase.transition(Phase::NotStarted, Phase::CreatingLocks) {
			Ok(()) => {}
			Err(Phase::Ready) => return Err(InitError::AlreadyInitialized),
			Err(_) => return Err(InitError::InitInProgress),
		}

		let created = self.kernel.create_recursive();
		if created.is_none() {
			log::warn!("kclib: global mutex creation failed; runtime runs unlocked");
		}
		self.mutex.call_once(|| created);
		self.phase.store(Phase::Ready);

		log::debug!("kclib: global runtime lock ready");
		Ok(())
	}

	fn phase(&self) -> Phase {
		self.phase.load()
	}

	fn reset(&mut self) {
		let slot = core::mem::replace(&mut self.mutex, spin::Once::new());
		if let Some(mutex) = slot.try_into_inner().flatten() {
			self.kernel.delete(mutex);
		}
		self.phase.reset();
	}
}

impl<M: RecursiveMutexApi + fmt::Debug> fmt::Debug for GlobalRecursiveMutex<M> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GlobalRecursiveMutex")
			.field("kernel", &self.kernel)
			.field("phase", &self.phase.load())
			.field("has_mutex", &self.mutex().is_some())
			.finish()
	}
}

impl<M: RecursiveMutexApi> Drop for GlobalRecursiveMutex<M> {
	fn drop(&mut self) {
		if let Some(mutex) = self.mutex.get_mut().and_then(Option::take) {
			self.kernel.delete(mutex);
		}
	}
}

#[cfg(all(test, feature = "std"))]
mod tests {
	use super::*;
	use ksync::{ContextSource, SpinKernel, ThreadContexts};

	fn provider() -> GlobalRecursiveMutex<SpinKernel<ThreadContexts>> {
		GlobalRecursiveMutex::new(SpinKernel::new(ThreadContexts))
	}

	#[test]
	fn hooks_are_no_ops_before_initialize() {
		let locks = provider();
		let slot = locks.create();
		assert_eq!(slot, Some(GlobalLock));
		locks.acquire(slot.as_ref());
		locks.release(slot.as_ref());
		locks.release(slot.as_ref());
		assert_eq!(locks.kernel().live(), 0);
		assert!(locks.mutex().is_none());
	}

	#[test]
	fn initialize_creates_one_mutex() {
		let locks = provider();
		assert_eq!(locks.initialize(), Ok(()));
		assert_eq!(locks.phase(), Phase::Ready);
		assert_eq!(locks.kernel().live(), 1);
		assert!(locks.mutex().is_some());
	}

	#[test]
	fn second_initialize_is_refused() {
		let locks = provider();
		locks.initialize().unwrap();
		assert_eq!(locks.initialize(), Err(InitError::AlreadyInitialized));
		assert_eq!(locks.kernel().live(), 1);
	}

	#[test]
	fn every_slot_shares_the_mutex() {
		let locks = provider();
		locks.initialize().unwrap();
		let a = locks.create();
		let b = locks.create();

		locks.acquire(a.as_ref());
		locks.acquire(b.as_ref());
		let mutex = locks.mutex().unwrap();
		assert_eq!(mutex.depth(), 2);
		assert_eq!(mutex.owner(), Some(ThreadContexts.current()));

		locks.release(b.as_ref());
		locks.release(a.as_ref());
		assert_eq!(mutex.owner(), None);
	}

	#[test]
	fn empty_slot_never_locks() {
		let locks = provider();
		locks.initialize().unwrap();
		locks.acquire(None);
		assert_eq!(locks.mutex().unwrap().depth(), 0);
	}

	#[test]
	fn destroy_leaves_shared_mutex_alone() {
		let locks = provider();
		locks.initialize().unwrap();
		let mut slot = locks.create();
		locks.destroy(&mut slot);
		assert!(slot.is_none());
		assert_eq!(locks.kernel().live(), 1);
	}

	#[test]
	fn creation_failure_leaves_runtime_unlocked() {
		let locks = GlobalRecursiveMutex::new(SpinKernel::with_capacity(ThreadContexts, 0));
		assert_eq!(locks.initialize(), Ok(()));
		assert_eq!(locks.phase(), Phase::Ready);
		assert!(locks.mutex().is_none());
		let slot = locks.create();
		locks.acquire(slot.as_ref());
		locks.release(slot.as_ref());
		assert_eq!(locks.initialize(), Err(InitError::AlreadyInitialized));
	}

	#[test]
	fn reset_deletes_mutex_and_allows_reinit() {
		let mut locks = provider();
		locks.initialize().unwrap();
		locks.reset();
		assert_eq!(locks.phase(), Phase::NotStarted);
		assert_eq!(locks.kernel().live(), 0);
		assert_eq!(locks.initialize(), Ok(()));
		assert_eq!(locks.kernel().live(), 1);
	}
}
