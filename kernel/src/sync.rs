// SPDX-License-Identifier: GPL-2.0

//! Synchronization primitives
//!
//! The kernel runs on a single CPU and kernel-mode sections never
//! interleave with other kernel-mode work, so the spin locks here only
//! keep the shared structures `Sync` and guard against accidental
//! reentrancy. Reference counts throughout the VFS are plain relaxed
//! atomics for the same reason; an SMP port would have to revisit both.

pub use alloc::sync::{Arc, Weak};

pub use spin::{Mutex, Once};
