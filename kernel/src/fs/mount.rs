// SPDX-License-Identifier: GPL-2.0

//! Mount table and superblock lifecycle
//!
//! A mountpoint is the anchor slot on a dentry where mounts stack; the
//! top of the stack is the active mount the resolver crosses into. The
//! global mount list exists for duplicate detection and driver-in-use
//! checks. A mount starts with one reference (the filesystem's own) and
//! can only be unmounted at exactly that one.

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::fs::dentry::{d_get, d_put, Dentry};
use crate::fs::path::{path_lookup, LOOKUP_DEFAULT};
use crate::fs::super_block::{get_filesystem, FsFlags, SuperBlock};
use crate::info;
use crate::sync::{Arc, Mutex, Weak};
use crate::warn;

/// Mount read-only.
pub const MS_RDONLY: u32 = 1;
/// Ignore set-user-id bits (passed through to the driver).
pub const MS_NOSUID: u32 = 2;
/// Disallow access to device files (passed through to the driver).
pub const MS_NODEV: u32 = 4;
/// Disallow execution from this mount.
pub const MS_NOEXEC: u32 = 8;

/// The anchor slot on a dentry where mounts stack.
pub struct Mountpoint {
	/// Host dentry, pinned while the mountpoint exists
	pub mp_point: Arc<Dentry>,
	/// Stacked mounts, most recent first; the first entry is active
	mp_mounts: Mutex<Vec<Arc<Mount>>>,
}

impl Mountpoint {
	/// The active mount of this stack.
	pub fn top_mount(&self) -> Option<Arc<Mount>> {
		self.mp_mounts.lock().first().cloned()
	}
}

/// One live mount instance
pub struct Mount {
	pub m_super: Arc<SuperBlock>,
	pub m_flags: u32,
	/// Driver-specific mount data
	pub m_data: Option<String>,
	/// Back-pointer to the anchor; the strong edge runs the other way
	m_point: Weak<Mountpoint>,
	/// Protocol reference count; starts at 1 for the mount itself
	m_refs: AtomicU32,
}

impl Mount {
	pub fn refs(&self) -> u32 {
		self.m_refs.load(Ordering::Relaxed)
	}

	pub fn is_readonly(&self) -> bool {
		self.m_flags & MS_RDONLY != 0
	}

	pub fn is_noexec(&self) -> bool {
		self.m_flags & MS_NOEXEC != 0
	}
}

/// Take a mount reference.
pub fn mnt_get(mount: &Arc<Mount>) -> Arc<Mount> {
	mount.m_refs.fetch_add(1, Ordering::Relaxed);
	mount.clone()
}

/// Drop a mount reference. Teardown is umount's job, not the counter's.
pub fn mnt_put(mount: &Arc<Mount>) {
	if mount.m_refs.load(Ordering::Relaxed) == 0 {
		warn!("mnt_put: mount reference count going negative");
		return;
	}
	mount.m_refs.fetch_sub(1, Ordering::Relaxed);
}

/// Every live mount, for duplicate detection
static MOUNT_LIST: Mutex<Vec<Arc<Mount>>> = Mutex::new(Vec::new());

/// Whether any live mount belongs to the named driver.
pub(crate) fn driver_in_use(name: &str) -> bool {
	MOUNT_LIST
		.lock()
		.iter()
		.any(|mount| mount.m_super.s_fs.name() == name)
}

/// Number of live mounts.
pub fn mount_count() -> usize {
	MOUNT_LIST.lock().len()
}

/// Mount a filesystem instance of type `fstype` at `target`. `source`
/// names the backing device; it only has to resolve when the driver
/// needs one.
pub fn do_mount(
	source: &str,
	target: &str,
	fstype: &str,
	flags: u32,
	data: Option<&str>,
) -> Result<()> {
	let target_path = path_lookup(target, LOOKUP_DEFAULT)?;
	let source_path = path_lookup(source, LOOKUP_DEFAULT);

	let filesystem = get_filesystem(fstype)?;

	let device = if filesystem.flags().contains(FsFlags::NODEV) {
		0
	} else {
		let source_path = source_path?;
		source_path
			.dentry()
			.inode()
			.map(|inode| inode.i_dev)
			.ok_or(Error::ENODEV)?
	};

	// One filesystem per device; one instance per device-less driver.
	{
		let mounts = MOUNT_LIST.lock();
		for item in mounts.iter() {
			if device == 0 {
				if item.m_super.s_dev == 0
					&& Arc::ptr_eq(&item.m_super.s_fs, &filesystem)
				{
					return Err(Error::EBUSY);
				}
			} else if item.m_super.s_dev == device {
				return Err(Error::EBUSY);
			}
		}
	}

	// A read-only filesystem cannot be mounted read/write.
	if flags & MS_RDONLY == 0 && filesystem.flags().contains(FsFlags::RDONLY) {
		return Err(Error::EACCES);
	}

	let sb = SuperBlock::new(filesystem.clone(), device, flags);
	filesystem.read_super(&sb, device, flags)?;
	let root = sb.root().ok_or(Error::EINVAL)?;

	let mountpoint = match target_path.dentry().mountpoint() {
		Some(mp) => mp,
		None => {
			let mp = Arc::new(Mountpoint {
				mp_point: d_get(target_path.dentry()),
				mp_mounts: Mutex::new(Vec::new()),
			});
			target_path.dentry().set_mountpoint(Some(mp.clone()));
			mp
		}
	};

	// The new root joins the same anchor so lookups can cross back in.
	root.set_mountpoint(Some(mountpoint.clone()));

	let mount = Arc::new(Mount {
		m_super: sb,
		m_flags: flags,
		m_data: data.map(String::from),
		m_point: Arc::downgrade(&mountpoint),
		m_refs: AtomicU32::new(1),
	});
	mountpoint.mp_mounts.lock().insert(0, mount.clone());
	MOUNT_LIST.lock().push(mount);

	info!("mounted {} on {} (type {})", source, target, fstype);
	Ok(())
}

/// Unmount the filesystem whose root is at `target`.
pub fn do_umount(target: &str, _flags: u32) -> Result<()> {
	let mut path = path_lookup(target, LOOKUP_DEFAULT)?;
	// Naming the mountpoint names the mount stacked on top of it.
	crate::fs::path::follow_mount(&mut path)?;

	let mount = path.mount().cloned().ok_or(Error::EINVAL)?;
	let root = mount.m_super.root().ok_or(Error::EINVAL)?;

	// The target must be the root of the mount it resolved through.
	if !Arc::ptr_eq(path.dentry(), &root) {
		return Err(Error::EINVAL);
	}

	let sb = mount.m_super.clone();
	let mountpoint = mount.m_point.upgrade().ok_or(Error::EINVAL)?;
	drop(root);
	drop(path);

	// One reference means mounted and otherwise unused.
	if mount.refs() != 1 {
		return Err(Error::EBUSY);
	}
	// The root inode holds the only superblock reference when idle.
	if sb.refs() != 1 {
		return Err(Error::EBUSY);
	}

	sb.s_fs.put_super(&sb)?;

	mountpoint
		.mp_mounts
		.lock()
		.retain(|entry| !Arc::ptr_eq(entry, &mount));
	MOUNT_LIST.lock().retain(|entry| !Arc::ptr_eq(entry, &mount));

	// Release the mounted tree: the root dentry drops its inode, which
	// drops the last superblock reference.
	if let Some(root) = sb.take_root() {
		root.set_mountpoint(None);
		d_put(&root);
	}

	// The stack emptied: the anchor dissolves and the host dentry is
	// released.
	let emptied = mountpoint.mp_mounts.lock().is_empty();
	if emptied {
		mountpoint.mp_point.set_mountpoint(None);
		d_put(&mountpoint.mp_point);
	}

	info!("unmounted {}", target);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::super_block::{register_filesystem, unregister_filesystem};
	use crate::fs::testfs::TestFs;
	use crate::sync::Weak as SyncWeak;

	#[test]
	fn unknown_type_is_enodev() {
		let _guard = crate::testsupport::boot();
		assert_eq!(
			do_mount("", "/", "nosuchfs", 0, None),
			Err(Error::ENODEV)
		);
	}

	#[test]
	fn deviceless_driver_mounts_once() {
		let _guard = crate::testsupport::boot();

		do_mount("", "/", "testfs", 0, None).unwrap();
		assert_eq!(do_mount("", "/", "testfs", 0, None), Err(Error::EBUSY));
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn readonly_driver_rejects_rw_mount() {
		let _guard = crate::testsupport::boot();
		register_filesystem(Arc::new(TestFs::with_flags(
			"rotestfs",
			FsFlags::NODEV | FsFlags::RDONLY,
		)))
		.ok();

		assert_eq!(do_mount("", "/", "rotestfs", 0, None), Err(Error::EACCES));
		do_mount("", "/", "rotestfs", MS_RDONLY, None).unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn stacked_mounts_unwind_in_order() {
		let _guard = crate::testsupport::boot();
		register_filesystem(Arc::new(TestFs::new("stackfs"))).ok();

		do_mount("", "/", "testfs", 0, None).unwrap();
		let lower = path_lookup("/", LOOKUP_DEFAULT).unwrap();

		do_mount("", "/", "stackfs", 0, None).unwrap();
		let upper = path_lookup("/", LOOKUP_DEFAULT).unwrap();
		assert!(!Arc::ptr_eq(lower.dentry(), upper.dentry()));
		assert_eq!(upper.mount().map(|m| m.m_super.s_fs.name()), Some("stackfs"));
		drop(upper);

		// Unmounting the top exposes the lower mount again.
		do_umount("/", 0).unwrap();
		let back = path_lookup("/", LOOKUP_DEFAULT).unwrap();
		assert!(Arc::ptr_eq(lower.dentry(), back.dentry()));
		drop(back);
		drop(lower);

		do_umount("/", 0).unwrap();
		assert_eq!(mount_count(), 0);
	}

	#[test]
	fn umount_frees_the_superblock() {
		let _guard = crate::testsupport::boot();

		do_mount("", "/", "testfs", 0, None).unwrap();
		let weak_sb: SyncWeak<SuperBlock> = {
			let path = path_lookup("/", LOOKUP_DEFAULT).unwrap();
			let inode = path.dentry().inode().unwrap();
			Arc::downgrade(&inode.i_super)
		};
		assert!(weak_sb.upgrade().is_some());

		do_umount("/", 0).unwrap();
		assert!(weak_sb.upgrade().is_none());
	}

	#[test]
	fn unregister_fails_while_mounted() {
		let _guard = crate::testsupport::boot();
		register_filesystem(Arc::new(TestFs::new("busyfs"))).ok();

		do_mount("", "/", "busyfs", 0, None).unwrap();
		assert_eq!(unregister_filesystem("busyfs"), Err(Error::EBUSY));
		do_umount("/", 0).unwrap();
		unregister_filesystem("busyfs").unwrap();
	}

	#[test]
	fn umount_target_must_be_mount_root() {
		let _guard = crate::testsupport::boot();

		do_mount("", "/", "testfs", 0, None).unwrap();
		crate::fs::operations::sys_close(
			crate::fs::operations::sys_open(
				"/dir.txt",
				crate::fs::flags::O_CREAT | crate::fs::flags::O_RDWR,
				0o644,
			)
			.unwrap(),
		)
		.unwrap();
		assert_eq!(do_umount("/dir.txt", 0), Err(Error::EINVAL));
		do_umount("/", 0).unwrap();
	}
}
