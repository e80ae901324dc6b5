// SPDX-License-Identifier: GPL-2.0

//! Inode abstraction
//!
//! Inodes are materialized on demand by [`i_get`]: the superblock's
//! driver fills in an [`InodeInit`] and the VFS builds the in-memory
//! object around it. Each live inode pins its superblock; the
//! superblock's inode list and the attached-dentries list are weak.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::fs::dentry::Dentry;
use crate::fs::super_block::{super_get, super_put, SuperBlock};
use crate::fs::file::FileOperations;
use crate::fs::KStat;
use crate::sync::{Arc, Mutex, Weak};
use crate::warn;

bitflags::bitflags! {
	/// Which of the optional inode operations a driver implements.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct InodeCaps: u32 {
		const LOOKUP = 1 << 0;
		const CREAT = 1 << 1;
		const LINK = 1 << 2;
		const TRUNCATE = 1 << 3;
		const CHMOD = 1 << 4;
		const CHOWN = 1 << 5;
	}
}

/// Inode operations vtable. Every member is optional; the VFS consults
/// [`InodeOperations::caps`] and falls back per operation when a member
/// is absent.
pub trait InodeOperations: Send + Sync {
	fn caps(&self) -> InodeCaps {
		InodeCaps::empty()
	}

	/// Map `name` inside the directory `dir` to an inode number.
	fn lookup(&self, _dir: &Inode, _name: &str) -> Result<u64> {
		Err(Error::ENOSYS)
	}

	/// Create a regular file named `name` in `dir`, returning its inode
	/// number.
	fn creat(&self, _dir: &Inode, _name: &str, _mode: u32) -> Result<u64> {
		Err(Error::ENOSYS)
	}

	/// Add a second name for `inode` inside `dir`.
	fn link(&self, _dir: &Inode, _name: &str, _inode: &Inode) -> Result<()> {
		Err(Error::ENOSYS)
	}

	/// Truncate the file to zero length.
	fn truncate(&self, _inode: &Inode) -> Result<()> {
		Err(Error::ENOSYS)
	}

	fn chmod(&self, _inode: &Inode, _mode: u32) -> Result<()> {
		Err(Error::ENOSYS)
	}

	fn chown(&self, _inode: &Inode, _uid: Option<u32>, _gid: Option<u32>) -> Result<()> {
		Err(Error::ENOSYS)
	}
}

/// Initial contents of an inode, produced by the driver's `read_inode`.
pub struct InodeInit {
	pub mode: u32,
	pub nlinks: u32,
	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	/// Device number for special files, zero otherwise
	pub dev: u32,
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	pub ops: Arc<dyn InodeOperations>,
	pub fops: Arc<dyn FileOperations>,
}

/// In-memory file object
pub struct Inode {
	/// Inode number within the superblock
	pub i_ino: u64,
	/// Device number for special files
	pub i_dev: u32,
	pub i_mode: AtomicU32,
	pub i_nlinks: AtomicU32,
	pub i_uid: AtomicU32,
	pub i_gid: AtomicU32,
	pub i_size: AtomicU64,
	pub i_atime: AtomicI64,
	pub i_mtime: AtomicI64,
	pub i_ctime: AtomicI64,
	/// Owning superblock, pinned while this inode lives
	pub i_super: Arc<SuperBlock>,
	pub i_ops: Arc<dyn InodeOperations>,
	/// File operations installed into descriptions opened on this inode
	pub i_default_fops: Arc<dyn FileOperations>,
	/// Dentries currently bound to this inode (reverse lookup only)
	i_dentries: Mutex<Vec<Weak<Dentry>>>,
	/// Protocol reference count
	i_ref: AtomicU32,
}

impl Inode {
	pub fn refs(&self) -> u32 {
		self.i_ref.load(Ordering::Relaxed)
	}

	pub fn is_directory(&self) -> bool {
		crate::fs::mode::s_isdir(self.i_mode.load(Ordering::Relaxed))
	}

	/// Synthesize `stat` contents from the cached fields.
	pub fn stat(&self) -> KStat {
		KStat {
			st_dev: self.i_super.s_dev,
			st_ino: self.i_ino,
			st_mode: self.i_mode.load(Ordering::Relaxed),
			st_nlink: self.i_nlinks.load(Ordering::Relaxed),
			st_uid: self.i_uid.load(Ordering::Relaxed),
			st_gid: self.i_gid.load(Ordering::Relaxed),
			st_rdev: self.i_dev,
			st_size: self.i_size.load(Ordering::Relaxed) as i64,
			st_blksize: self.i_super.blocksize(),
			st_blocks: 0,
			st_atime: self.i_atime.load(Ordering::Relaxed),
			st_mtime: self.i_mtime.load(Ordering::Relaxed),
			st_ctime: self.i_ctime.load(Ordering::Relaxed),
		}
	}

	pub(crate) fn attach_dentry(&self, dentry: Weak<Dentry>) {
		self.i_dentries.lock().push(dentry);
	}

	pub(crate) fn detach_dentry(&self, dentry: *const Dentry) {
		self.i_dentries
			.lock()
			.retain(|w| w.as_ptr() != dentry && w.strong_count() > 0);
	}
}

/// Materialize the inode `ino` of `sb`. The driver fills the contents;
/// the returned reference and one superblock reference belong to the
/// caller's inode.
pub fn i_get(sb: &Arc<SuperBlock>, ino: u64) -> Result<Arc<Inode>> {
	let ops = sb.ops().ok_or(Error::EIO)?;
	let sbref = super_get(sb);
	let init = match ops.read_inode(sb, ino) {
		Ok(init) => init,
		Err(err) => {
			super_put(&sbref);
			return Err(err);
		}
	};

	let inode = Arc::new(Inode {
		i_ino: ino,
		i_dev: init.dev,
		i_mode: AtomicU32::new(init.mode),
		i_nlinks: AtomicU32::new(init.nlinks),
		i_uid: AtomicU32::new(init.uid),
		i_gid: AtomicU32::new(init.gid),
		i_size: AtomicU64::new(init.size),
		i_atime: AtomicI64::new(init.atime),
		i_mtime: AtomicI64::new(init.mtime),
		i_ctime: AtomicI64::new(init.ctime),
		i_super: sbref,
		i_ops: init.ops,
		i_default_fops: init.fops,
		i_dentries: Mutex::new(Vec::new()),
		i_ref: AtomicU32::new(1),
	});
	sb.add_inode(Arc::downgrade(&inode));
	Ok(inode)
}

/// Take an inode reference.
pub fn i_getref(inode: &Arc<Inode>) -> Arc<Inode> {
	inode.i_ref.fetch_add(1, Ordering::Relaxed);
	inode.clone()
}

/// Drop an inode reference. The last reference hands the inode back to
/// the driver, unlinks it from the superblock list and drops the
/// superblock reference it held.
pub fn i_put(inode: &Arc<Inode>) {
	let count = inode.i_ref.load(Ordering::Relaxed);
	if count == 0 {
		warn!("i_put: inode {} reference count going negative", inode.i_ino);
		return;
	}
	inode.i_ref.fetch_sub(1, Ordering::Relaxed);
	if count > 1 {
		return;
	}

	if let Some(ops) = inode.i_super.ops() {
		ops.put_inode(&inode.i_super, inode);
	}
	inode.i_super.remove_inode(Arc::as_ptr(inode));
	super_put(&inode.i_super);
}
