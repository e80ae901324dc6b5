// SPDX-License-Identifier: GPL-2.0

//! Path resolution
//!
//! A [`Path`] is a transient `(dentry, mount)` pair with held references.
//! There is no `path_get`: copying goes through `Clone` (the counted
//! `path_copy`) and release through `Drop` (`path_put`), so every error
//! path gives back exactly what it took.

use core::mem;

use crate::error::{Error, Result};
use crate::fs::dentry::{d_get, d_lookup, d_put, Dentry};
use crate::fs::mount::{mnt_get, mnt_put, Mount};
use crate::fs::operations::path_access;
use crate::fs::{PATH_MAX, X_OK};
use crate::sync::Arc;

/// Lookup flags (reserved)
pub const LOOKUP_DEFAULT: u32 = 0;

/// A resolved location in the tree
pub struct Path {
	p_dentry: Arc<Dentry>,
	p_mount: Option<Arc<Mount>>,
}

impl Path {
	/// Assemble a path from references the caller already owns.
	pub fn new(dentry: Arc<Dentry>, mount: Option<Arc<Mount>>) -> Path {
		Path {
			p_dentry: dentry,
			p_mount: mount,
		}
	}

	pub fn dentry(&self) -> &Arc<Dentry> {
		&self.p_dentry
	}

	pub fn mount(&self) -> Option<&Arc<Mount>> {
		self.p_mount.as_ref()
	}

	/// Swap in a new dentry reference, releasing the old one.
	pub(crate) fn replace_dentry(&mut self, dentry: Arc<Dentry>) {
		let old = mem::replace(&mut self.p_dentry, dentry);
		d_put(&old);
	}

	/// Swap in a new mount reference, releasing the old one.
	pub(crate) fn replace_mount(&mut self, mount: Option<Arc<Mount>>) {
		if let Some(old) = mem::replace(&mut self.p_mount, mount) {
			mnt_put(&old);
		}
	}
}

impl Clone for Path {
	fn clone(&self) -> Path {
		Path {
			p_dentry: d_get(&self.p_dentry),
			p_mount: self.p_mount.as_ref().map(mnt_get),
		}
	}
}

impl Drop for Path {
	fn drop(&mut self) {
		d_put(&self.p_dentry);
		if let Some(mount) = &self.p_mount {
			mnt_put(mount);
		}
	}
}

/// Step through the mounts stacked on the path's dentry so the path
/// names the active mount's root instead of the host entry.
pub fn follow_mount(path: &mut Path) -> Result<()> {
	loop {
		let top = match path.dentry().mountpoint() {
			Some(mp) => match mp.top_mount() {
				Some(top) => top,
				None => return Ok(()),
			},
			None => return Ok(()),
		};
		let root = top.m_super.root().ok_or(Error::EIO)?;
		if Arc::ptr_eq(&root, path.dentry()) {
			return Ok(());
		}
		path.replace_dentry(d_get(&root));
		path.replace_mount(Some(mnt_get(&top)));
	}
}

/// Resolve `name` to a `(dentry, mount)` pair with references held by
/// the caller. Absolute names start at the VFS root, relative names at
/// the current task's working directory.
pub fn path_lookup(name: &str, _flags: u32) -> Result<Path> {
	// The resolver works on one bounded internal copy of the name.
	if name.len() > PATH_MAX - 1 {
		return Err(Error::ENAMETOOLONG);
	}
	let mut query = [0u8; PATH_MAX];
	query[..name.len()].copy_from_slice(name.as_bytes());
	let len = name.len();

	let mut pos = 0usize;
	let mut path = if query.first() == Some(&b'/') && len > 0 {
		pos = 1;
		Path::new(d_get(&crate::fs::vfs_root()?), None)
	} else {
		crate::task::current()
			.t_vfs
			.cwd()
			.ok_or(Error::ENOENT)?
	};

	loop {
		// This position is a mountpoint: continue inside the mount
		// stacked on top of it.
		follow_mount(&mut path)?;

		let rest = &query[pos..len];

		// The query ended: the caller wanted what we already have.
		if rest.is_empty() {
			return Ok(path);
		}

		// Check for ".", "..", "./*", "../*"
		if rest[0] == b'.' {
			match rest.get(1) {
				// They just wanted the current directory entry.
				None => return Ok(path),
				Some(b'/') => {
					pos += 2;
					continue;
				}
				Some(b'.') => {
					let next = rest.get(2);
					if next.is_none() || next == Some(&b'/') {
						// No parent above a filesystem root;
						// stepping up through the mount is a
						// known gap.
						let parent = match &path.dentry().d_parent {
							Some(parent) => parent.clone(),
							None => return Err(Error::ENOENT),
						};
						path.replace_dentry(d_get(&parent));
						if next.is_none() {
							return Ok(path);
						}
						pos += 3;
						continue;
					}
					// A name that merely starts with ".." falls
					// through to the normal component handling.
				}
				_ => {}
			}
		}

		// Do we have search permission here?
		path_access(&path, X_OK).map_err(|_| Error::EACCES)?;

		let rest = &query[pos..len];
		match rest.iter().position(|&b| b == b'/') {
			None => {
				let component =
					core::str::from_utf8(rest).map_err(|_| Error::EINVAL)?;
				let child = d_lookup(path.dentry(), component)?;
				path.replace_dentry(child);
				return Ok(path);
			}
			Some(slash) => {
				let component = core::str::from_utf8(&rest[..slash])
					.map_err(|_| Error::EINVAL)?;
				let child = d_lookup(path.dentry(), component)?;
				path.replace_dentry(child);
				pos += slash + 1;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::flags::{O_CREAT, O_RDWR};
	use crate::fs::mount::{do_mount, do_umount};
	use crate::fs::operations::{sys_close, sys_open};

	fn touch(name: &str) {
		sys_close(sys_open(name, O_CREAT | O_RDWR, 0o755).unwrap()).unwrap();
	}

	#[test]
	fn name_too_long_is_rejected() {
		let _guard = crate::testsupport::boot();
		let long = alloc::string::String::from_utf8(alloc::vec![b'a'; PATH_MAX]).unwrap();
		assert_eq!(path_lookup(&long, LOOKUP_DEFAULT).err(), Some(Error::ENAMETOOLONG));
	}

	#[test]
	fn root_resolves_to_the_active_mount_root() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();

		let path = path_lookup("/", LOOKUP_DEFAULT).unwrap();
		let fsroot = path.mount().unwrap().m_super.root().unwrap();
		assert!(Arc::ptr_eq(path.dentry(), &fsroot));
		drop(path);

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn lookup_is_deterministic() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		touch("/stable.txt");

		let first = path_lookup("/stable.txt", LOOKUP_DEFAULT).unwrap();
		let second = path_lookup("/stable.txt", LOOKUP_DEFAULT).unwrap();
		assert!(Arc::ptr_eq(first.dentry(), second.dentry()));
		drop(first);
		drop(second);

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn dot_and_dotdot_navigate() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		touch("/a.txt");

		let plain = path_lookup("/a.txt", LOOKUP_DEFAULT).unwrap();
		let dotted = path_lookup("/./a.txt", LOOKUP_DEFAULT).unwrap();
		assert!(Arc::ptr_eq(plain.dentry(), dotted.dentry()));
		drop(plain);
		drop(dotted);

		// ".." above a filesystem root has nowhere to go.
		assert_eq!(path_lookup("/..", LOOKUP_DEFAULT).err(), Some(Error::ENOENT));
		assert_eq!(
			path_lookup("/../a.txt", LOOKUP_DEFAULT).err(),
			Some(Error::ENOENT)
		);

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn dotdot_steps_back_into_the_parent() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();

		// Directories below the root come straight from the driver's
		// creat, which honors the format bits it is handed.
		crate::fs::create_file("/sub", crate::fs::mode::S_IFDIR | 0o755).unwrap();
		touch("/sub/inner.txt");

		let direct = path_lookup("/sub/inner.txt", LOOKUP_DEFAULT).unwrap();
		let dotted = path_lookup("/sub/../sub/inner.txt", LOOKUP_DEFAULT).unwrap();
		assert!(Arc::ptr_eq(direct.dentry(), dotted.dentry()));
		drop(direct);
		drop(dotted);

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn missing_component_is_enoent() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();

		assert_eq!(
			path_lookup("/no/such/file", LOOKUP_DEFAULT).err(),
			Some(Error::ENOENT)
		);

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn lookup_references_balance() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		touch("/ref.txt");

		let baseline = {
			let path = path_lookup("/ref.txt", LOOKUP_DEFAULT).unwrap();
			path.dentry().count()
		};
		// The path above was dropped; a fresh lookup must observe the
		// same count again.
		let path = path_lookup("/ref.txt", LOOKUP_DEFAULT).unwrap();
		assert_eq!(path.dentry().count(), baseline);
		drop(path);

		do_umount("/", 0).unwrap();
	}
}
