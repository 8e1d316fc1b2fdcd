//! The recursive-mutex capability set the C library port consumes, and a
//! portable kernel that provides it.
//!
//! The port needs exactly four things from the kernel:
//!   - create a recursive mutex (may fail under resource exhaustion),
//!   - delete one,
//!   - take it recursively, waiting forever,
//!   - give it back.

use alloc::boxed::Box;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::context::ContextSource;
use crate::recursive::RecursiveSpinLock;

/// Kernel recursive-mutex primitive.
pub trait RecursiveMutexApi {
	/// Opaque reference to one kernel mutex.
	type Handle: Send + Sync;

	/// Where the kernel's notion of "current context" comes from.
	type Contexts: ContextSource + ?Sized;

	/// The context source mutex ownership is judged by.
	fn contexts(&self) -> &Self::Contexts;

	/// Create a new, free recursive mutex.
	///
	/// Returns `None` when the kernel is out of resources. Creation may
	/// allocate, so implementations can re-enter the C library heap path.
	fn create_recursive(&self) -> Option<Self::Handle>;

	/// Destroy a mutex. The handle is consumed.
	fn delete(&self, handle: Self::Handle);

	/// Take the mutex for the calling context. Waits forever; the owner may
	/// take it again without blocking.
	fn take_recursive(&self, handle: &Self::Handle);

	/// Give the mutex back once. Returns `false` if the caller was not the
	/// owner (the mutex is left untouched).
	fn give_recursive(&self, handle: &Self::Handle) -> bool;
}

impl<K: RecursiveMutexApi + ?Sized> RecursiveMutexApi for &K {
	type Handle = K::Handle;
	type Contexts = K::Contexts;

	fn contexts(&self) -> &Self::Contexts {
		(**self).contexts()
	}

	fn create_recursive(&self) -> Option<Self::Handle> {
		(**self).create_recursive()
	}

	fn delete(&self, handle: Self::Handle) {
		(**self).delete(handle)
	}

	fn take_recursive(&self, handle: &Self::Handle) {
		(**self).take_recursive(handle)
	}

	fn give_recursive(&self, handle: &Self::Handle) -> bool {
		(**self).give_recursive(handle)
	}
}

/// Handle to a mutex created by [`SpinKernel`].
///
/// Pointer-sized and not `Clone`: exactly one handle exists per mutex, and
/// passing it to [`RecursiveMutexApi::delete`] frees the mutex. Dropping a
/// handle without deleting it leaks the mutex, like any kernel handle.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq)]
pub struct MutexHandle(NonNull<RecursiveSpinLock>);

// SAFETY: the pointee is a `RecursiveSpinLock`, which is all atomics and is
// designed to be shared between contexts. It stays allocated until the one
// and only handle is consumed by `delete`.
unsafe impl Send for MutexHandle {}
unsafe impl Sync for MutexHandle {}

impl MutexHandle {
	fn lock(&self) -> &RecursiveSpinLock {
		// SAFETY: the allocation outlives every handle borrow, see above.
		unsafe { self.0.as_ref() }
	}

	/// Current holder of the mutex (diagnostics).
	pub fn owner(&self) -> Option<crate::ContextId> {
		self.lock().owner()
	}

	/// Recursion depth of the holder (diagnostics).
	pub fn depth(&self) -> u32 {
		self.lock().depth()
	}
}

/// A portable kernel backed by heap-allocated [`RecursiveSpinLock`]s.
///
/// An optional capacity bound makes creation fail once that many mutexes
/// are alive, which is how resource exhaustion is exercised in tests.
#[derive(Debug)]
pub struct SpinKernel<C> {
	contexts: C,
	capacity: Option<usize>,
	live: AtomicUsize,
}

impl<C: ContextSource> SpinKernel<C> {
	/// Unbounded kernel.
	pub const fn new(contexts: C) -> Self {
		Self {
			contexts,
			capacity: None,
			live: AtomicUsize::new(0),
		}
	}

	/// Kernel that refuses to hold more than `capacity` mutexes at once.
	pub const fn with_capacity(contexts: C, capacity: usize) -> Self {
		Self {
			contexts,
			capacity: Some(capacity),
			live: AtomicUsize::new(0),
		}
	}

	/// Number of mutexes created and not yet deleted.
	pub fn live(&self) -> usize {
		self.live.load(Ordering::Relaxed)
	}

	/// Non-blocking take, for callers that must not wait.
	pub fn try_take_recursive(&self, handle: &MutexHandle) -> bool {
		handle.lock().try_take(&self.contexts)
	}

	fn reserve(&self) -> bool {
		match self.capacity {
			None => {
				self.live.fetch_add(1, Ordering::Relaxed);
				true
			}
			Some(capacity) => self
				.live
				.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
					(live < capacity).then_some(live + 1)
				})
				.is_ok(),
		}
	}
}

impl<C: ContextSource> RecursiveMutexApi for SpinKernel<C> {
	type Handle = MutexHandle;
	type Contexts = C;

	fn contexts(&self) -> &C {
		&self.contexts
	}

	fn create_recursive(&self) -> Option<MutexHandle> {
		if !self.reserve() {
			log::warn!(
				"ksync: mutex pool exhausted ({} live), creation refused",
				self.live()
			);
			return None;
		}
		let lock = Box::new(RecursiveSpinLock::new());
		Some(MutexHandle(NonNull::from(Box::leak(lock))))
	}

	fn delete(&self, handle: MutexHandle) {
		// SAFETY: the pointer came from `Box::leak` in `create_recursive`, and
		// the handle is consumed here so it cannot be used again.
		let lock = unsafe { Box::from_raw(handle.0.as_ptr()) };
		if lock.is_locked() {
			log::warn!("ksync: deleting a mutex still held by {:?}", lock.owner());
		}
		drop(lock);
		self.live.fetch_sub(1, Ordering::Relaxed);
	}

	fn take_recursive(&self, handle: &MutexHandle) {
		handle.lock().take(&self.contexts);
	}

	fn give_recursive(&self, handle: &MutexHandle) -> bool {
		handle.lock().give(&self.contexts)
	}
}
