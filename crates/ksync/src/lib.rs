//! Kernel-side recursive mutex primitive.
//!
//! This crate models the part of the kernel the C library port depends on:
//! a recursive mutual-exclusion primitive that an execution context may take
//! repeatedly without deadlocking itself, released once per take.
//!
//! ```text
//! RecursiveMutexApi (capability set the port consumes)
//! └── SpinKernel<C: ContextSource>
//!     └── MutexHandle → RecursiveSpinLock (ticket lock + owner + depth)
//! ```
//!
//! The port only ever talks to [`RecursiveMutexApi`]; bare-metal builds can
//! bind that trait to a native kernel instead of [`SpinKernel`].
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod context;
pub mod kernel;
pub mod recursive;

pub use context::{ContextId, ContextSource};
#[cfg(feature = "std")]
pub use context::ThreadContexts;
pub use kernel::{MutexHandle, RecursiveMutexApi, SpinKernel};
pub use recursive::RecursiveSpinLock;
