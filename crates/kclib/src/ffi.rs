// =============================================================================
// kclib - C ABI Hook Surface
// =============================================================================
//
// The symbols the C runtime links against. Each one is a thin shim that
// turns raw pointers into Options and forwards to the static ClibPort.
//
//   newlib (default)            xclib (feature "xclib")
//   ─────────────────           ───────────────────────
//   __malloc_lock/unlock        _Mtxinit / _Mtxdst
//   __env_lock/unlock           _Mtxlock / _Mtxunlock
//                               _xclib_use_mt
//   ── both ──────────────────────────────────────────
//   _sbrk_r   vPortClibInit   _reclaim_reent
//
// The kernel side is the scheduler's recursive mutex API. The heap arena is
// [_end, _heap_sentry), both provided by the linker script.
// =============================================================================

#![allow(non_snake_case, non_upper_case_globals)]

use core::ffi::{c_int, c_void};
use core::ptr::NonNull;
#[cfg(feature = "xclib")]
use core::sync::atomic::{AtomicI32, Ordering};

use ksync::{ContextId, ContextSource, RecursiveMutexApi};

use crate::config::ArenaConfig;
use crate::port::ClibPort;
use crate::reent::Reent;

#[cfg(feature = "xclib")]
use crate::sync::per_object::PerObjectRecursiveMutex;
#[cfg(not(feature = "xclib"))]
use crate::sync::global::GlobalRecursiveMutex;

/// `queueQUEUE_TYPE_RECURSIVE_MUTEX`.
const RECURSIVE_MUTEX: u8 = 4;
/// `portMAX_DELAY`: wait forever.
const WAIT_FOREVER: u32 = u32::MAX;
/// `pdTRUE`.
const PD_TRUE: c_int = 1;
/// `taskSCHEDULER_RUNNING`.
const SCHEDULER_RUNNING: c_int = 2;

unsafe extern "C" {
	static _end: u8;
	static _heap_sentry: u8;

	fn xQueueCreateMutex(kind: u8) -> *mut c_void;
	fn vQueueDelete(queue: *mut c_void);
	fn xQueueTakeMutexRecursive(mutex: *mut c_void, ticks: u32) -> c_int;
	fn xQueueGiveMutexRecursive(mutex: *mut c_void) -> c_int;

	fn xTaskGetCurrentTaskHandle() -> *mut c_void;
	fn xTaskGetSchedulerState() -> c_int;
	fn vTaskDelay(ticks: u32);
}

// ── Kernel binding ──────────────────────────────────────────────────────────

/// A scheduler mutex handle. `Option<NativeMutex>` has the layout of the
/// runtime's lock slot: one pointer, null when empty.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq)]
pub struct NativeMutex(NonNull<c_void>);

// SAFETY: scheduler mutex handles are meant to be used from any task.
unsafe impl Send for NativeMutex {}
unsafe impl Sync for NativeMutex {}

/// Scheduler tasks as execution contexts.
///
/// Before the scheduler starts there is no task handle; the single startup
/// context gets the first index, which no task handle can equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskContexts;

impl ContextSource for TaskContexts {
	fn current(&self) -> ContextId {
		// SAFETY: plain kernel query.
		let task = unsafe { xTaskGetCurrentTaskHandle() };
		ContextId::new(task.expose_provenance()).unwrap_or(ContextId::from_index(0))
	}

	fn relax(&self) {
		// SAFETY: plain kernel calls. Delaying lets a lower-priority creator
		// run; before the scheduler starts nobody else can hold the gate.
		unsafe {
			if xTaskGetSchedulerState() == SCHEDULER_RUNNING {
				vTaskDelay(1);
			} else {
				core::hint::spin_loop();
			}
		}
	}
}

/// The scheduler's recursive mutex API.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKernel;

impl RecursiveMutexApi for NativeKernel {
	type Handle = NativeMutex;
	type Contexts = TaskContexts;

	fn contexts(&self) -> &TaskContexts {
		&TaskContexts
	}

	fn create_recursive(&self) -> Option<NativeMutex> {
		// SAFETY: plain kernel call, may allocate through the malloc hooks.
		NonNull::new(unsafe { xQueueCreateMutex(RECURSIVE_MUTEX) }).map(NativeMutex)
	}

	fn delete(&self, handle: NativeMutex) {
		// SAFETY: the handle came from xQueueCreateMutex and is consumed here.
		unsafe { vQueueDelete(handle.0.as_ptr()) }
	}

	fn take_recursive(&self, handle: &NativeMutex) {
		// SAFETY: live handle. With an infinite timeout the call only
		// returns once the mutex is held.
		unsafe { xQueueTakeMutexRecursive(handle.0.as_ptr(), WAIT_FOREVER) };
	}

	fn give_recursive(&self, handle: &NativeMutex) -> bool {
		// SAFETY: live handle.
		unsafe { xQueueGiveMutexRecursive(handle.0.as_ptr()) == PD_TRUE }
	}
}

// ── The port instance ───────────────────────────────────────────────────────

#[cfg(feature = "xclib")]
type Provider = PerObjectRecursiveMutex<NativeKernel>;
#[cfg(not(feature = "xclib"))]
type Provider = GlobalRecursiveMutex<NativeKernel>;

static PORT: spin::Once<ClibPort<Provider>> = spin::Once::new();

fn port() -> &'static ClibPort<Provider> {
	PORT.call_once(|| {
		// SAFETY: only the symbol addresses are taken, never their contents.
		let (start, sentinel) = unsafe {
			(
				(&raw const _end).expose_provenance(),
				(&raw const _heap_sentry).expose_provenance(),
			)
		};
		match ArenaConfig::new(start, sentinel) {
			Ok(arena) => {
				log::debug!("kclib: heap arena {:#x}..{:#x}", start, sentinel);
				ClibPort::new(Provider::new(NativeKernel), arena)
			}
			Err(err) => {
				log::error!("kclib: bad heap arena from linker script: {err}");
				panic!("kclib: bad heap arena from linker script: {err}");
			}
		}
	})
}

// ── newlib hooks ────────────────────────────────────────────────────────────

/// # Safety
///
/// `reent` is null or points to the caller's reentrant block.
#[cfg(not(feature = "xclib"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __malloc_lock(reent: *mut Reent) {
	port().malloc_lock(unsafe { reent.as_ref() });
}

/// # Safety
///
/// As [`__malloc_lock`].
#[cfg(not(feature = "xclib"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __malloc_unlock(reent: *mut Reent) {
	port().malloc_unlock(unsafe { reent.as_ref() });
}

/// # Safety
///
/// As [`__malloc_lock`].
#[cfg(not(feature = "xclib"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __env_lock(reent: *mut Reent) {
	port().env_lock(unsafe { reent.as_ref() });
}

/// # Safety
///
/// As [`__malloc_lock`].
#[cfg(not(feature = "xclib"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __env_unlock(reent: *mut Reent) {
	port().env_unlock(unsafe { reent.as_ref() });
}

// ── xclib hooks ─────────────────────────────────────────────────────────────

/// Nonzero enables xclib's internal locking. Cleared while a lock is being
/// created so xclib's own lock-init path stays quiet during the nested
/// allocation.
#[cfg(feature = "xclib")]
#[unsafe(no_mangle)]
pub static _xclib_use_mt: AtomicI32 = AtomicI32::new(1);

/// Lock slot as xclib lays it out.
#[cfg(feature = "xclib")]
type Slot = Option<NativeMutex>;

/// # Safety
///
/// `mtx` is null or points to writable storage for one slot. The old
/// contents are overwritten without being read.
#[cfg(feature = "xclib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _Mtxinit(mtx: *mut Slot) {
	if mtx.is_null() {
		return;
	}
	_xclib_use_mt.store(0, Ordering::Relaxed);
	let handle = port().lock_create();
	_xclib_use_mt.store(1, Ordering::Relaxed);
	// SAFETY: non-null, writable per the contract above.
	unsafe { core::ptr::write(mtx, handle) };
}

/// # Safety
///
/// `mtx` is null or points to a slot filled by [`_Mtxinit`].
#[cfg(feature = "xclib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _Mtxdst(mtx: *mut Slot) {
	if let Some(slot) = unsafe { mtx.as_mut() } {
		port().lock_destroy(slot);
	}
}

/// # Safety
///
/// As [`_Mtxdst`].
#[cfg(feature = "xclib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _Mtxlock(mtx: *mut Slot) {
	port().lock_acquire(unsafe { mtx.as_ref() }.and_then(Option::as_ref));
}

/// # Safety
///
/// As [`_Mtxdst`].
#[cfg(feature = "xclib")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _Mtxunlock(mtx: *mut Slot) {
	port().lock_release(unsafe { mtx.as_ref() }.and_then(Option::as_ref));
}

// ── Shared hooks ────────────────────────────────────────────────────────────

/// Heap growth. Returns the old break, or `(void *)-1` with `ENOMEM` in
/// `reent` when the arena is exhausted.
///
/// # Safety
///
/// `reent` is null or points to the caller's reentrant block. The caller
/// holds the malloc lock.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _sbrk_r(reent: *mut Reent, increment: i32) -> *mut c_void {
	port().sbrk_r(unsafe { reent.as_mut() }, increment).cast()
}

/// Startup entry, called once before the scheduler starts.
#[unsafe(no_mangle)]
pub extern "C" fn vPortClibInit() {
	port().init();
}

/// # Safety
///
/// `reent` is null or points to a reentrant block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _reclaim_reent(reent: *mut Reent) {
	port().reclaim_reent(unsafe { reent.as_mut() });
}

