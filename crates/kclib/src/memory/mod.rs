//! Backing memory for the C runtime's allocator.

pub mod heap;
