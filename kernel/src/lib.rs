// SPDX-License-Identifier: GPL-2.0

//! The kernel core: virtual filesystem and program loader.
//!
//! This crate carries the pieces every other subsystem leans on — path
//! resolution over a pluggable filesystem backplane, the mount table,
//! per-task open files, and the executable/module loader. The memory
//! manager, scheduler and concrete drivers plug in at trait seams.
//!
//! The crate is freestanding (`no_std` + `alloc`) in production builds
//! and hosted under `cargo test`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod error;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod memory;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod test_suite;

/// Kernel version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Oxide Kernel";

/// Bring up the core: the VFS root, the built-in filesystem driver and
/// the boot task's VFS state. Safe to call more than once.
pub fn kernel_init() -> error::Result<()> {
	fs::initialize_filesystem()?;
	task::init_task_vfs(&task::current())?;
	Ok(())
}
