//! # Kernel Synchronization Primitives
//!
//! The two primitives the memory manager needs and nothing more:
//!
//! - [`SpinLock`]: a busy-waiting mutex. Kernel code is non-preemptive
//!   within a CPU, so critical sections are short and spinning is the right
//!   tool; there is no scheduler to sleep on at this layer anyway.
//! - [`BootCell`]: a container that is written exactly once during boot and
//!   read-only forever after. Backs the process-wide singletons (frame
//!   database, hyperspace window) that C kernels keep in bare static arrays.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod boot_cell;
mod spin_lock;

pub use boot_cell::BootCell;
pub use spin_lock::{SpinLock, SpinLockGuard};
