//! The C library port: the one service object behind every runtime hook.
//!
//! A [`ClibPort`] owns the lock provider, the heap arena and the two lock
//! slots the runtime never creates itself (malloc and environment). The
//! C-ABI hooks in `ffi` are thin shims over its methods; hosted code and
//! tests drive it directly.

use core::fmt;
use core::mem;
use core::ptr;

use crate::config::ArenaConfig;
use crate::error::{HeapError, InitError};
use crate::memory::heap::HeapArena;
use crate::reent::Reent;
use crate::sync::{Creation, LockProvider, Phase};

/// A lock slot created on first use.
type LazySlot<H> = spin::Once<Option<H>>;

/// Locking and heap-growth service for one C runtime instance.
pub struct ClibPort<P: LockProvider> {
	provider: P,
	heap: HeapArena,
	malloc_slot: LazySlot<P::Handle>,
	env_slot: LazySlot<P::Handle>,
}

impl<P: LockProvider> ClibPort<P> {
	/// Compose a port. Nothing is created until the first hook runs.
	pub const fn new(provider: P, arena: ArenaConfig) -> Self {
		Self {
			provider,
			heap: HeapArena::new(arena),
			malloc_slot: spin::Once::new(),
			env_slot: spin::Once::new(),
		}
	}

	// ── Generic lock hooks ──────────────────────────────────────────────

	/// Create a lock for a runtime-owned slot.
	pub fn lock_create(&self) -> Option<P::Handle> {
		self.provider.create()
	}

	pub fn lock_destroy(&self, slot: &mut Option<P::Handle>) {
		self.provider.destroy(slot);
	}

	pub fn lock_acquire(&self, handle: Option<&P::Handle>) {
		self.provider.acquire(handle);
	}

	pub fn lock_release(&self, handle: Option<&P::Handle>) {
		self.provider.release(handle);
	}

	// ── Allocator and environment locks ─────────────────────────────────

	/// Enter the allocator's critical section, creating its lock first if
	/// needed. Recursive for the holder.
	pub fn malloc_lock(&self, _reent: Option<&Reent>) {
		self.provider.acquire(self.lazy_slot(&self.malloc_slot));
	}

	pub fn malloc_unlock(&self, _reent: Option<&Reent>) {
		self.provider.release(created(&self.malloc_slot));
	}

	/// Enter the environment table's critical section.
	pub fn env_lock(&self, _reent: Option<&Reent>) {
		self.provider.acquire(self.lazy_slot(&self.env_slot));
	}

	pub fn env_unlock(&self, _reent: Option<&Reent>) {
		self.provider.release(created(&self.env_slot));
	}

	/// Handle for `slot`, creating it unless the caller is nested inside
	/// its own lock creation.
	///
	/// A context that arrives while another one is filling the slot waits
	/// for it. Only a real outcome is cached: a lock, or a kernel failure.
	fn lazy_slot<'a>(&'a self, slot: &'a LazySlot<P::Handle>) -> Option<&'a P::Handle> {
		if let Some(handle) = slot.get() {
			return handle.as_ref();
		}
		if self.provider.in_creation() {
			// Reached from the allocation inside the kernel's create call,
			// possibly while this very slot is being filled.
			return None;
		}
		slot.try_call_once(|| match self.provider.try_create() {
			Creation::Created(handle) => Ok(Some(handle)),
			Creation::Failed => Ok(None),
			Creation::Suppressed => Err(()),
		})
		.ok()
		.and_then(Option::as_ref)
	}

	// ── Heap ────────────────────────────────────────────────────────────

	/// Grow the heap by `increment` bytes and return the old break.
	///
	/// On failure the cursor is unchanged and `ENOMEM` is stored in `reent`.
	/// The caller must hold the malloc lock.
	pub fn heap_grow(
		&self,
		reent: Option<&mut Reent>,
		increment: isize,
	) -> Result<*mut u8, HeapError> {
		self.heap.grow(increment).map_err(|err| {
			log::debug!("kclib: sbrk({increment}) refused: {err}");
			if let Some(reent) = reent {
				reent.set_errno(err.errno());
			}
			err
		})
	}

	/// The runtime's `sbrk` contract: the increment arrives as `int32_t`
	/// whatever the word size, and failure is the address `(void *)-1`.
	pub fn sbrk_r(&self, reent: Option<&mut Reent>, increment: i32) -> *mut u8 {
		// Sign extension; lossless on 32- and 64-bit words.
		match self.heap_grow(reent, increment as isize) {
			Ok(base) => base,
			Err(_) => sbrk_failed(),
		}
	}

	// ── Initialization ──────────────────────────────────────────────────

	/// Run the provider's one-time startup work.
	pub fn try_init(&self) -> Result<(), InitError> {
		self.provider.initialize()
	}

	/// Startup entry. Initialization running out of order is a fatal
	/// configuration error.
	///
	/// # Panics
	///
	/// If the provider refuses to initialize (a second call under the
	/// global-lock strategy, for instance).
	pub fn init(&self) {
		if let Err(err) = self.try_init() {
			log::error!("kclib: startup initialization failed: {err}");
			panic!("kclib: startup initialization failed: {err}");
		}
	}

	/// Per-context cleanup hook. The kernel owns reentrant blocks, so there
	/// is nothing to free.
	pub fn reclaim_reent(&self, _reent: Option<&mut Reent>) {
		log::trace!("kclib: reclaim_reent ignored");
	}

	// ── Accessors ───────────────────────────────────────────────────────

	pub fn phase(&self) -> Phase {
		self.provider.phase()
	}

	pub fn heap(&self) -> &HeapArena {
		&self.heap
	}

	pub fn provider(&self) -> &P {
		&self.provider
	}

	/// Return to the freshly composed state: slot locks destroyed, provider
	/// reset, heap unseeded.
	pub fn reset(&mut self) {
		self.destroy_slots();
		self.provider.reset();
		self.heap.reset();
	}

	fn destroy_slots(&mut self) {
		for slot in [&mut self.malloc_slot, &mut self.env_slot] {
			let mut handle = mem::replace(slot, spin::Once::new())
				.try_into_inner()
				.flatten();
			self.provider.destroy(&mut handle);
		}
	}
}

/// What the runtime's `sbrk` returns on failure.
pub fn sbrk_failed() -> *mut u8 {
	ptr::without_provenance_mut(usize::MAX)
}

/// The slot's handle if creation already finished. Never creates.
fn created<H>(slot: &LazySlot<H>) -> Option<&H> {
	slot.get().and_then(Option::as_ref)
}

impl<P: LockProvider> Drop for ClibPort<P> {
	fn drop(&mut self) {
		self.destroy_slots();
	}
}

impl<P: LockProvider + fmt::Debug> fmt::Debug for ClibPort<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClibPort")
			.field("provider", &self.provider)
			.field("heap", &self.heap)
			.field("malloc_lock", &created(&self.malloc_slot).is_some())
			.field("env_lock", &created(&self.env_slot).is_some())
			.finish()
	}
}
