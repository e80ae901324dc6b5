// SPDX-License-Identifier: GPL-2.0

//! Open file descriptions
//!
//! A [`File`] is the shared state behind one or more file descriptors:
//! the resolved path it was opened on, the open flags, and the cursor.
//! `dup` shares a description by taking another protocol reference;
//! the description owns its path exclusively and releases it when the
//! last reference goes away.

use core::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::fs::dentry::Dentry;
use crate::fs::inode::Inode;
use crate::fs::path::Path;
use crate::fs::{KStat, SEEK_CUR, SEEK_END, SEEK_SET};
use crate::sync::Arc;
use crate::warn;

bitflags::bitflags! {
	/// Which of the optional file operations a driver implements.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct FileCaps: u32 {
		const OPEN = 1 << 0;
		const CLOSE = 1 << 1;
		const READ = 1 << 2;
		const WRITE = 1 << 3;
		const LSEEK = 1 << 4;
		const FSTAT = 1 << 5;
		const IOCTL = 1 << 6;
	}
}

/// File operations vtable. Every member is optional; the VFS consults
/// [`FileOperations::caps`] and falls back per operation when a member
/// is absent.
pub trait FileOperations: Send + Sync {
	fn caps(&self) -> FileCaps {
		FileCaps::empty()
	}

	fn open(&self, _file: &File, _dentry: &Arc<Dentry>, _flags: u32) -> Result<()> {
		Ok(())
	}

	fn close(&self, _file: &File) -> Result<()> {
		Ok(())
	}

	fn read(&self, _file: &File, _buf: &mut [u8]) -> Result<usize> {
		Err(Error::EINVAL)
	}

	fn write(&self, _file: &File, _buf: &[u8]) -> Result<usize> {
		Err(Error::EINVAL)
	}

	fn lseek(&self, _file: &File, _offset: i64, _whence: i32) -> Result<i64> {
		Err(Error::EINVAL)
	}

	fn fstat(&self, _file: &File, _st: &mut KStat) -> Result<()> {
		Err(Error::EINVAL)
	}

	fn ioctl(&self, _file: &File, _request: u32, _arg: usize) -> Result<isize> {
		Err(Error::EINVAL)
	}
}

/// An open file description
pub struct File {
	/// The location this description was opened on (owned exclusively)
	pub f_path: Path,
	pub f_ops: Arc<dyn FileOperations>,
	/// Open flags, fixed at open time
	pub f_status: u32,
	f_off: AtomicI64,
	/// Protocol reference count; one per descriptor pointing here
	f_refs: AtomicU32,
}

impl File {
	pub fn offset(&self) -> i64 {
		self.f_off.load(Ordering::Relaxed)
	}

	pub fn set_offset(&self, off: i64) {
		self.f_off.store(off, Ordering::Relaxed);
	}

	pub fn refs(&self) -> u32 {
		self.f_refs.load(Ordering::Relaxed)
	}

	pub fn inode(&self) -> Option<Arc<Inode>> {
		self.f_path.dentry().inode()
	}
}

/// Take a description reference (for `dup`).
pub fn file_get(file: &Arc<File>) -> Arc<File> {
	file.f_refs.fetch_add(1, Ordering::Relaxed);
	file.clone()
}

/// Drop a description reference. The owned path goes away with the
/// description itself once the last holder lets go.
pub fn file_put(file: &Arc<File>) {
	if file.f_refs.load(Ordering::Relaxed) == 0 {
		warn!("file_put: file reference count going negative");
		return;
	}
	file.f_refs.fetch_sub(1, Ordering::Relaxed);
}

/// Open a description on an already-resolved location. This is the
/// kernel-internal door the loader uses; permission checks belong to
/// the callers that take names.
pub fn file_open(path: &Path, flags: u32) -> Result<Arc<File>> {
	let inode = path.dentry().inode().ok_or(Error::EACCES)?;
	let file = Arc::new(File {
		f_path: path.clone(),
		f_ops: inode.i_default_fops.clone(),
		f_status: flags,
		f_off: AtomicI64::new(0),
		f_refs: AtomicU32::new(1),
	});
	if file.f_ops.caps().contains(FileCaps::OPEN) {
		file.f_ops.open(&file, file.f_path.dentry(), flags)?;
	}
	Ok(file)
}

/// Close a description opened with [`file_open`]. A driver close error
/// leaves the description open, matching `sys_close`.
pub fn file_close(file: &Arc<File>) -> Result<()> {
	if file.f_ops.caps().contains(FileCaps::CLOSE) {
		file.f_ops.close(file)?;
	}
	file_put(file);
	Ok(())
}

pub fn file_read(file: &Arc<File>, buf: &mut [u8]) -> Result<usize> {
	if !file.f_ops.caps().contains(FileCaps::READ) {
		return Err(Error::EINVAL);
	}
	file.f_ops.read(file, buf)
}

pub fn file_write(file: &Arc<File>, buf: &[u8]) -> Result<usize> {
	if !file.f_ops.caps().contains(FileCaps::WRITE) {
		return Err(Error::EINVAL);
	}
	file.f_ops.write(file, buf)
}

/// Move the cursor, delegating to the driver when it has its own idea
/// of seeking and otherwise synthesizing from the cached size.
pub fn file_seek(file: &Arc<File>, offset: i64, whence: i32) -> Result<i64> {
	if file.f_ops.caps().contains(FileCaps::LSEEK) {
		return file.f_ops.lseek(file, offset, whence);
	}

	let new_off = match whence {
		SEEK_SET => offset,
		SEEK_CUR => file.offset() + offset,
		SEEK_END => {
			let size = file
				.inode()
				.map(|inode| inode.i_size.load(Ordering::Relaxed))
				.unwrap_or(0);
			size as i64 + offset
		}
		_ => return Err(Error::EINVAL),
	};
	file.set_offset(new_off);
	Ok(new_off)
}
