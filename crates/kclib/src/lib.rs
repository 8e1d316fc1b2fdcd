//! C library port layer - locking and heap-growth hooks for a C runtime
//! running on a preemptive kernel.
//!
//! The C runtime assumes it is single-threaded. It exposes extension points
//! (lock hooks, `sbrk`, a startup entry, a per-context cleanup hook) and this
//! crate fills them in:
//!
//! ```text
//! ClibPort<P: LockProvider>          (one owned service object, init/reset)
//! ├── P = PerObjectRecursiveMutex    one kernel mutex per runtime lock slot
//! │   or  GlobalRecursiveMutex       one kernel mutex for everything
//! ├── HeapArena                      bump cursor over [start, sentinel)
//! └── malloc / env lock slots        created lazily through the provider
//! ```
//!
//! **Bootstrap:** creating a kernel mutex may allocate, allocating takes the
//! malloc lock, and the malloc lock may not exist yet. Lock creation moves
//! the provider into [`Phase::CreatingLocks`]; while in that phase the port
//! refuses to create another lock from inside the nested allocation path.
//!
//! **Allocator safety:** [`HeapArena`] has no internal synchronization. The
//! runtime wraps every heap-growth call in `malloc_lock`/`malloc_unlock`.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod error;
pub mod memory;
pub mod port;
pub mod reent;
pub mod sync;

#[cfg(all(feature = "c-hooks", target_os = "none"))]
pub mod ffi;

pub use config::ArenaConfig;
pub use error::{ConfigError, HeapError, InitError};
pub use memory::heap::HeapArena;
pub use port::{ClibPort, sbrk_failed};
pub use reent::{ENOMEM, Reent};
pub use sync::global::{GlobalLock, GlobalRecursiveMutex};
pub use sync::per_object::PerObjectRecursiveMutex;
pub use sync::{Creation, LockProvider, Phase};
