// SPDX-License-Identifier: GPL-2.0

//! Directory entry (dentry) abstraction
//!
//! A dentry binds one name to one inode at one position in the tree.
//! The protocol reference count `d_count` records how many paths,
//! mountpoints and children pin the entry; dropping the last protocol
//! reference releases the inode and detaches the entry from its parent.
//! Children and the inode's attachment list are weak edges so reverse
//! lookup never keeps an entry alive on its own.

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::fs::inode::{i_get, i_put, Inode, InodeCaps};
use crate::fs::mode;
use crate::fs::mount::Mountpoint;
use crate::sync::{Arc, Mutex, Weak};
use crate::warn;

/// Directory entry
pub struct Dentry {
	/// Entry name, "/" for filesystem roots
	pub d_name: String,
	/// Parent entry; `None` only for filesystem roots
	pub d_parent: Option<Arc<Dentry>>,
	/// Bound inode
	d_inode: Mutex<Option<Arc<Inode>>>,
	/// Mount anchor, set while mounts are stacked on this entry
	d_mountpoint: Mutex<Option<Arc<Mountpoint>>>,
	/// Live children, for repeated lookups
	d_children: Mutex<Vec<Weak<Dentry>>>,
	/// Protocol reference count
	d_count: AtomicU32,
}

impl Dentry {
	pub fn inode(&self) -> Option<Arc<Inode>> {
		self.d_inode.lock().clone()
	}

	pub fn mountpoint(&self) -> Option<Arc<Mountpoint>> {
		self.d_mountpoint.lock().clone()
	}

	pub fn set_mountpoint(&self, mp: Option<Arc<Mountpoint>>) {
		*self.d_mountpoint.lock() = mp;
	}

	pub fn count(&self) -> u32 {
		self.d_count.load(Ordering::Relaxed)
	}

	fn find_child(&self, name: &str) -> Option<Arc<Dentry>> {
		let children = self.d_children.lock();
		for weak in children.iter() {
			if let Some(child) = weak.upgrade() {
				if child.d_name == name {
					return Some(child);
				}
			}
		}
		None
	}

	fn remove_child(&self, child: *const Dentry) {
		self.d_children
			.lock()
			.retain(|w| w.as_ptr() != child && w.strong_count() > 0);
	}
}

/// Allocate a dentry with one reference owned by the caller. A parent,
/// when given, is pinned by the new child.
pub fn d_alloc(name: &str, parent: Option<&Arc<Dentry>>) -> Arc<Dentry> {
	let dentry = Arc::new(Dentry {
		d_name: name.into(),
		d_parent: parent.map(d_get),
		d_inode: Mutex::new(None),
		d_mountpoint: Mutex::new(None),
		d_children: Mutex::new(Vec::new()),
		d_count: AtomicU32::new(1),
	});
	if let Some(parent) = parent {
		parent.d_children.lock().push(Arc::downgrade(&dentry));
	}
	dentry
}

/// Bind an inode to a dentry, taking over the caller's inode reference.
pub fn d_bind(dentry: &Arc<Dentry>, inode: Arc<Inode>) {
	inode.attach_dentry(Arc::downgrade(dentry));
	*dentry.d_inode.lock() = Some(inode);
}

/// Take a dentry reference.
pub fn d_get(dentry: &Arc<Dentry>) -> Arc<Dentry> {
	dentry.d_count.fetch_add(1, Ordering::Relaxed);
	dentry.clone()
}

/// Drop a dentry reference. The last reference releases the bound inode
/// and unlinks the entry from its parent.
pub fn d_put(dentry: &Arc<Dentry>) {
	let count = dentry.d_count.load(Ordering::Relaxed);
	if count == 0 {
		warn!("d_put: dentry \"{}\" reference count going negative", dentry.d_name);
		return;
	}
	dentry.d_count.fetch_sub(1, Ordering::Relaxed);
	if count > 1 {
		return;
	}

	let inode = dentry.d_inode.lock().take();
	if let Some(inode) = inode {
		inode.detach_dentry(Arc::as_ptr(dentry));
		i_put(&inode);
	}
	if let Some(parent) = &dentry.d_parent {
		parent.remove_child(Arc::as_ptr(dentry));
		d_put(parent);
	}
}

/// Resolve one name inside a directory. A live child is reused; a miss
/// asks the filesystem driver and materializes the inode it names. The
/// returned reference belongs to the caller.
pub fn d_lookup(dir: &Arc<Dentry>, name: &str) -> Result<Arc<Dentry>> {
	let inode = dir.inode().ok_or(Error::ENOENT)?;
	if !mode::s_isdir(inode.i_mode.load(Ordering::Relaxed)) {
		return Err(Error::ENOTDIR);
	}

	if let Some(child) = dir.find_child(name) {
		return Ok(d_get(&child));
	}

	if !inode.i_ops.caps().contains(InodeCaps::LOOKUP) {
		return Err(Error::ENOENT);
	}
	let ino = inode.i_ops.lookup(&inode, name)?;
	let child_inode = i_get(&inode.i_super, ino)?;

	let child = d_alloc(name, Some(dir));
	d_bind(&child, child_inode);
	Ok(child)
}
