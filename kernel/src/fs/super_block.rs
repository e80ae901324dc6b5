// SPDX-License-Identifier: GPL-2.0

//! Superblocks and the filesystem type registry
//!
//! A [`Filesystem`] is a registered driver; a [`SuperBlock`] is one
//! mounted instance of it. Drivers populate the superblock from
//! `read_super` and tear it down from `put_super`; between those calls
//! the root dentry's inode holds the one protocol reference umount
//! checks for.

use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::fs::dentry::Dentry;
use crate::fs::inode::{Inode, InodeInit};
use crate::sync::{Arc, Mutex, Weak};
use crate::warn;

bitflags::bitflags! {
	/// Driver-level flags
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct FsFlags: u32 {
		/// The filesystem is inherently read-only.
		const RDONLY = 1 << 0;
		/// The filesystem does not sit on a device.
		const NODEV = 1 << 1;
	}
}

/// A filesystem driver, registered once and shared by all its mounts.
pub trait Filesystem: Send + Sync {
	fn name(&self) -> &str;

	fn flags(&self) -> FsFlags {
		FsFlags::empty()
	}

	/// Populate `sb`: install the superblock operations, private state
	/// and the root dentry.
	fn read_super(&self, sb: &Arc<SuperBlock>, device: u32, flags: u32) -> Result<()>;

	/// Release driver state before the superblock is torn down.
	fn put_super(&self, _sb: &Arc<SuperBlock>) -> Result<()> {
		Ok(())
	}
}

/// Superblock operations vtable
pub trait SuperOperations: Send + Sync {
	/// Fill in the on-disk contents of inode `ino`.
	fn read_inode(&self, sb: &Arc<SuperBlock>, ino: u64) -> Result<InodeInit>;

	/// Called when the last reference to an inode drops.
	fn put_inode(&self, _sb: &Arc<SuperBlock>, _inode: &Inode) {}
}

/// One mounted filesystem instance
pub struct SuperBlock {
	/// Backing device id, zero for device-less filesystems
	pub s_dev: u32,
	/// Mount flags the instance was created with
	pub s_flags: u32,
	/// The driver this instance belongs to
	pub s_fs: Arc<dyn Filesystem>,
	s_blocksize: AtomicU32,
	s_magic: AtomicU32,
	s_ops: Mutex<Option<Arc<dyn SuperOperations>>>,
	s_root: Mutex<Option<Arc<Dentry>>>,
	/// Inodes currently materialized from this superblock (weak; the
	/// strong edge runs inode -> superblock)
	s_inode_list: Mutex<Vec<Weak<Inode>>>,
	s_private: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
	/// Protocol reference count, held by live inodes
	s_refs: AtomicU32,
}

impl SuperBlock {
	pub fn new(fs: Arc<dyn Filesystem>, device: u32, flags: u32) -> Arc<SuperBlock> {
		Arc::new(SuperBlock {
			s_dev: device,
			s_flags: flags,
			s_fs: fs,
			s_blocksize: AtomicU32::new(4096),
			s_magic: AtomicU32::new(0),
			s_ops: Mutex::new(None),
			s_root: Mutex::new(None),
			s_inode_list: Mutex::new(Vec::new()),
			s_private: Mutex::new(None),
			s_refs: AtomicU32::new(0),
		})
	}

	pub fn refs(&self) -> u32 {
		self.s_refs.load(Ordering::Relaxed)
	}

	pub fn blocksize(&self) -> u32 {
		self.s_blocksize.load(Ordering::Relaxed)
	}

	pub fn set_blocksize(&self, blocksize: u32) {
		self.s_blocksize.store(blocksize, Ordering::Relaxed);
	}

	pub fn magic(&self) -> u32 {
		self.s_magic.load(Ordering::Relaxed)
	}

	pub fn set_magic(&self, magic: u32) {
		self.s_magic.store(magic, Ordering::Relaxed);
	}

	pub fn ops(&self) -> Option<Arc<dyn SuperOperations>> {
		self.s_ops.lock().clone()
	}

	pub fn set_ops(&self, ops: Arc<dyn SuperOperations>) {
		*self.s_ops.lock() = Some(ops);
	}

	pub fn root(&self) -> Option<Arc<Dentry>> {
		self.s_root.lock().clone()
	}

	pub fn set_root(&self, root: Arc<Dentry>) {
		*self.s_root.lock() = Some(root);
	}

	pub(crate) fn take_root(&self) -> Option<Arc<Dentry>> {
		self.s_root.lock().take()
	}

	pub fn private(&self) -> Option<Arc<dyn Any + Send + Sync>> {
		self.s_private.lock().clone()
	}

	pub fn set_private(&self, private: Arc<dyn Any + Send + Sync>) {
		*self.s_private.lock() = Some(private);
	}

	pub fn take_private(&self) -> Option<Arc<dyn Any + Send + Sync>> {
		self.s_private.lock().take()
	}

	pub(crate) fn add_inode(&self, inode: Weak<Inode>) {
		self.s_inode_list.lock().push(inode);
	}

	pub(crate) fn remove_inode(&self, inode: *const Inode) {
		self.s_inode_list
			.lock()
			.retain(|w| w.as_ptr() != inode && w.strong_count() > 0);
	}
}

/// Take a superblock reference.
pub fn super_get(sb: &Arc<SuperBlock>) -> Arc<SuperBlock> {
	sb.s_refs.fetch_add(1, Ordering::Relaxed);
	sb.clone()
}

/// Drop a superblock reference. Destruction is driven by umount, not by
/// the counter reaching zero.
pub fn super_put(sb: &Arc<SuperBlock>) {
	if sb.s_refs.load(Ordering::Relaxed) == 0 {
		warn!("super_put: superblock reference count going negative");
		return;
	}
	sb.s_refs.fetch_sub(1, Ordering::Relaxed);
}

/// Registered filesystem drivers
static FILESYSTEMS: Mutex<Vec<Arc<dyn Filesystem>>> = Mutex::new(Vec::new());

/// Register a filesystem driver. Names are unique.
pub fn register_filesystem(fs: Arc<dyn Filesystem>) -> Result<()> {
	let mut list = FILESYSTEMS.lock();
	if list.iter().any(|entry| entry.name() == fs.name()) {
		return Err(Error::EEXIST);
	}
	list.push(fs);
	Ok(())
}

/// Disconnect a filesystem driver. Fails while any mount still uses it.
pub fn unregister_filesystem(name: &str) -> Result<()> {
	if crate::fs::mount::driver_in_use(name) {
		return Err(Error::EBUSY);
	}
	let mut list = FILESYSTEMS.lock();
	let pos = list
		.iter()
		.position(|entry| entry.name() == name)
		.ok_or(Error::ENOENT)?;
	list.remove(pos);
	Ok(())
}

/// Find a registered driver by name.
pub fn get_filesystem(name: &str) -> Result<Arc<dyn Filesystem>> {
	let list = FILESYSTEMS.lock();
	list.iter()
		.find(|entry| entry.name() == name)
		.cloned()
		.ok_or(Error::ENODEV)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::testfs::TestFs;

	#[test]
	fn registry_rejects_duplicates_and_reports_missing() {
		let _guard = crate::testsupport::boot();

		assert_eq!(
			register_filesystem(Arc::new(TestFs::new("testfs"))),
			Err(Error::EEXIST)
		);
		assert_eq!(get_filesystem("nosuchfs").err(), Some(Error::ENODEV));
		assert!(get_filesystem("testfs").is_ok());
		assert_eq!(unregister_filesystem("nosuchfs"), Err(Error::ENOENT));
	}
}
