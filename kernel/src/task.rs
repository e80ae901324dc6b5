// SPDX-License-Identifier: GPL-2.0

//! The current task and its VFS state
//!
//! Scheduling, fork and exit live in the task subsystem proper; the
//! core only needs the pieces the VFS and the loader touch — identity,
//! the working directory, the open-file vector, the register frame and
//! the user address space. The current-task pointer is process-wide
//! mutable state under the cooperative-kernel rule.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::arch::Registers;
use crate::error::Result;
use crate::fs::dentry::d_get;
use crate::fs::file::File;
use crate::fs::path::Path;
use crate::memory::{AddressSpace, FlatAddressSpace, UserAddr, PAGE_SIZE};
use crate::sync::{Arc, Mutex, Once};

/// Size of the per-task open-file vector
pub const TASK_MAX_OPEN_FILES: usize = 32;

/// Cap on the combined size of the execve argument block
pub const TASK_MAX_ARG_SIZE: usize = 16 * 1024;

/// Top of the initial user stack
pub const TASK_STACK_START: UserAddr = 0x0800_0000;

/// Pages mapped for the initial user stack
pub const TASK_STACK_INIT_PAGES: usize = 16;

/// Bottom of the initial user stack
pub const TASK_STACK_INIT_BASE: UserAddr =
	TASK_STACK_START - (TASK_STACK_INIT_PAGES * PAGE_SIZE) as UserAddr;

/// The task just replaced its image with execve.
pub const TF_EXECVE: u32 = 1 << 0;
/// The task has exited.
pub const TF_EXITED: u32 = 1 << 1;

/// One slot of the open-file vector: a shared description plus
/// per-descriptor flags.
#[derive(Default)]
pub struct OpenFile {
	pub file: Option<Arc<File>>,
	pub flags: u32,
}

/// Per-task VFS state
pub struct TaskVfs {
	cwd: Mutex<Option<Path>>,
	openvect: Mutex<Vec<OpenFile>>,
}

impl TaskVfs {
	fn new() -> Self {
		let mut openvect = Vec::new();
		openvect.resize_with(TASK_MAX_OPEN_FILES, OpenFile::default);
		Self {
			cwd: Mutex::new(None),
			openvect: Mutex::new(openvect),
		}
	}

	/// A counted copy of the working directory.
	pub fn cwd(&self) -> Option<Path> {
		self.cwd.lock().clone()
	}

	pub fn set_cwd(&self, path: Path) {
		*self.cwd.lock() = Some(path);
	}

	/// Lowest free descriptor slot.
	pub fn find_free_fd(&self) -> Option<i32> {
		self.openvect
			.lock()
			.iter()
			.position(|slot| slot.file.is_none())
			.map(|fd| fd as i32)
	}

	pub fn get_file(&self, fd: i32) -> Option<Arc<File>> {
		if fd < 0 {
			return None;
		}
		self.openvect
			.lock()
			.get(fd as usize)
			.and_then(|slot| slot.file.clone())
	}

	pub fn install_fd(&self, fd: i32, file: Arc<File>) {
		if fd < 0 {
			return;
		}
		if let Some(slot) = self.openvect.lock().get_mut(fd as usize) {
			slot.file = Some(file);
			slot.flags = 0;
		}
	}

	pub fn clear_fd(&self, fd: i32) {
		if fd < 0 {
			return;
		}
		if let Some(slot) = self.openvect.lock().get_mut(fd as usize) {
			slot.file = None;
			slot.flags = 0;
		}
	}

	/// Number of occupied descriptor slots.
	pub fn open_count(&self) -> usize {
		self.openvect
			.lock()
			.iter()
			.filter(|slot| slot.file.is_some())
			.count()
	}
}

/// The mutable task state the core operates on
pub struct Task {
	pub t_pid: u32,
	t_uid: AtomicU32,
	t_gid: AtomicU32,
	t_umask: AtomicU32,
	t_flags: AtomicU32,
	t_ticks_left: AtomicU32,
	t_exit_code: AtomicI32,
	t_dataend: AtomicU32,
	/// Saved register frame, rebuilt by execve
	pub t_regs: Mutex<Registers>,
	pub t_vfs: TaskVfs,
	/// User address space, owned by the memory manager
	pub t_mm: Arc<dyn AddressSpace>,
}

impl Task {
	fn new(pid: u32) -> Task {
		Task {
			t_pid: pid,
			t_uid: AtomicU32::new(0),
			t_gid: AtomicU32::new(0),
			t_umask: AtomicU32::new(0o022),
			t_flags: AtomicU32::new(0),
			t_ticks_left: AtomicU32::new(0),
			t_exit_code: AtomicI32::new(0),
			t_dataend: AtomicU32::new(0),
			t_regs: Mutex::new(Registers::default()),
			t_vfs: TaskVfs::new(),
			t_mm: Arc::new(FlatAddressSpace::new()),
		}
	}

	pub fn uid(&self) -> u32 {
		self.t_uid.load(Ordering::Relaxed)
	}

	pub fn gid(&self) -> u32 {
		self.t_gid.load(Ordering::Relaxed)
	}

	pub fn set_identity(&self, uid: u32, gid: u32) {
		self.t_uid.store(uid, Ordering::Relaxed);
		self.t_gid.store(gid, Ordering::Relaxed);
	}

	pub fn swap_umask(&self, mask: u32) -> u32 {
		self.t_umask.swap(mask, Ordering::Relaxed)
	}

	pub fn set_flag(&self, flag: u32) {
		self.t_flags.fetch_or(flag, Ordering::Relaxed);
	}

	pub fn clear_flag(&self, flag: u32) {
		self.t_flags.fetch_and(!flag, Ordering::Relaxed);
	}

	pub fn has_flag(&self, flag: u32) -> bool {
		self.t_flags.load(Ordering::Relaxed) & flag != 0
	}

	/// Give up the remaining time slice so the scheduler switches away
	/// at the next tick.
	pub fn surrender_timeslice(&self) {
		self.t_ticks_left.store(0, Ordering::Relaxed);
	}

	pub fn set_dataend(&self, addr: UserAddr) {
		self.t_dataend.store(addr, Ordering::Relaxed);
	}

	pub fn dataend(&self) -> UserAddr {
		self.t_dataend.load(Ordering::Relaxed)
	}

	/// Mark the task as exited. The scheduler reaps it at the next
	/// switch; nothing here runs on its behalf afterwards.
	pub fn exit(&self, code: i32) {
		self.t_exit_code.store(code, Ordering::Relaxed);
		self.set_flag(TF_EXITED);
	}

	pub fn exit_code(&self) -> i32 {
		self.t_exit_code.load(Ordering::Relaxed)
	}
}

static INIT_TASK: Once<Arc<Task>> = Once::new();

/// The current task. Single CPU, no kernel preemption: reading the
/// pointer without further synchronization is sound.
pub fn current() -> Arc<Task> {
	INIT_TASK.call_once(|| Arc::new(Task::new(1))).clone()
}

/// Point a fresh task at the VFS root.
pub fn init_task_vfs(task: &Task) -> Result<()> {
	let root = crate::fs::vfs_root()?;
	task.t_vfs.set_cwd(Path::new(d_get(&root), None));
	Ok(())
}

/// Fork support: the child starts in the parent's working directory,
/// with its own counted references.
pub fn copy_task_vfs(dst: &Task, src: &Task) {
	if let Some(cwd) = src.t_vfs.cwd() {
		dst.t_vfs.set_cwd(cwd);
	}
}
