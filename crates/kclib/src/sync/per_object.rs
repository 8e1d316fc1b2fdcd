//! Strategy A: an independent kernel mutex for every runtime lock slot.
//!
//! Used with runtimes that keep several internal locks and create them
//! during their own global-init pass (xclib's `_Mtxinit`). Creation can
//! happen before the scheduler starts and can allocate, so it runs inside
//! [`Phase::CreatingLocks`](super::Phase::CreatingLocks).

use ksync::{ContextSource, RecursiveMutexApi, RecursiveSpinLock};

use super::{Creation, LockProvider, Phase, PhaseCell};
use crate::error::InitError;

/// One kernel recursive mutex per lock slot.
#[derive(Debug)]
pub struct PerObjectRecursiveMutex<M> {
	kernel: M,
	/// Held for the length of one kernel create call. Its owner is the
	/// context whose nested allocations must not create again.
	creating: RecursiveSpinLock,
	phase: PhaseCell,
}

impl<M: RecursiveMutexApi> PerObjectRecursiveMutex<M> {
	pub const fn new(kernel: M) -> Self {
		Self {
			kernel,
			creating: RecursiveSpinLock::new(),
			phase: PhaseCell::new(),
		}
	}

	/// The kernel primitive behind the locks.
	pub fn kernel(&self) -> &M {
		&self.kernel
	}
}

impl<M: RecursiveMutexApi> LockProvider for PerObjectRecursiveMutex<M> {
	type Handle = M::Handle;

	fn try_create(&self) -> Creation<M::Handle> {
		if self.in_creation() {
			// The kernel's create call allocated and the allocation path
			// came back here.
			log::trace!("kclib: nested lock creation suppressed");
			return Creation::Suppressed;
		}

		let contexts = self.kernel.contexts();
		// Other contexts queue here until the current creation is done.
		self.creating.take(contexts);
		self.phase.store(Phase::CreatingLocks);
		let handle = self.kernel.create_recursive();
		self.phase.store(Phase::Ready);
		self.creating.give(contexts);

		match handle {
			Some(handle) => {
				log::trace!("kclib: per-object lock created");
				Creation::Created(handle)
			}
			None => {
				log::warn!(
					"kclib: recursive mutex creation failed; this lock slot will not exclude"
				);
				Creation::Failed
			}
		}
	}

	fn in_creation(&self) -> bool {
		self.creating.owner() == Some(self.kernel.contexts().current())
	}

	fn destroy(&self, slot: &mut Option<M::Handle>) {
		if let Some(handle) = slot.take() {
			self.kernel.delete(handle);
		}
	}

	fn acquire(&self, handle: Option<&M::Handle>) {
		if let Some(handle) = handle {
			self.kernel.take_recursive(handle);
		}
	}

	fn release(&self, handle: Option<&M::Handle>) {
		if let Some(handle) = handle {
			if !self.kernel.give_recursive(handle) {
				log::warn!("kclib: lock released by a context that does not hold it");
			}
		}
	}

	fn initialize(&self) -> Result<(), InitError> {
		log::debug!("kclib: per-object locks are created on demand, nothing to initialize");
		Ok(())
	}

	fn phase(&self) -> Phase {
		self.phase.load()
	}

	fn reset(&mut self) {
		self.phase.reset();
	}
}
