// SPDX-License-Identifier: GPL-2.0

//! Virtual File System (VFS)
//!
//! The pluggable filesystem backplane: path resolution over the dentry
//! tree, the mount table, per-task open files, and the driver vtables
//! concrete filesystems implement.

pub mod dentry;
pub mod file;
pub mod inode;
pub mod mode;
pub mod mount;
pub mod operations;
pub mod path;
pub mod super_block;
pub mod testfs;

pub use dentry::*;
pub use file::*;
pub use inode::*;
pub use mount::*;
pub use operations::*;
pub use path::*;
pub use super_block::*;

use crate::error::{Error, Result};
use crate::sync::{Arc, Once};

/// Open flags
pub mod flags {
	pub const O_RDONLY: u32 = 0o00000000;
	pub const O_WRONLY: u32 = 0o00000001;
	pub const O_RDWR: u32 = 0o00000002;
	pub const O_ACCMODE: u32 = 0o00000003;
	pub const O_CREAT: u32 = 0o00000100;
	pub const O_EXCL: u32 = 0o00000200;
	pub const O_TRUNC: u32 = 0o00001000;
	pub const O_APPEND: u32 = 0o00002000;
}

/// Access-mode halves after the +1 offset over `O_ACCMODE`
pub const FREAD: u32 = 1;
pub const FWRITE: u32 = 2;

/// Seek anchors
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

/// `access` mode bits
pub const F_OK: u32 = 0;
pub const X_OK: u32 = 1;
pub const W_OK: u32 = 2;
pub const R_OK: u32 = 4;

/// Bound of the resolver's internal name copy, terminator included
pub const PATH_MAX: usize = 512;

/// File status, as synthesized from cached inode fields
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KStat {
	pub st_dev: u32,
	pub st_ino: u64,
	pub st_mode: u32,
	pub st_nlink: u32,
	pub st_uid: u32,
	pub st_gid: u32,
	pub st_rdev: u32,
	pub st_size: i64,
	pub st_blksize: u32,
	pub st_blocks: u64,
	pub st_atime: i64,
	pub st_mtime: i64,
	pub st_ctime: i64,
}

/// Root directory entry of the whole tree
static VFS_ROOT: Once<Arc<Dentry>> = Once::new();

/// Set up the root directory entry and register the built-in in-memory
/// filesystem. Safe to call again; later calls are no-ops.
pub fn initialize_filesystem() -> Result<()> {
	VFS_ROOT.call_once(|| d_alloc("/", None));
	match register_filesystem(Arc::new(testfs::TestFs::new("testfs"))) {
		Ok(()) | Err(Error::EEXIST) => Ok(()),
		Err(err) => Err(err),
	}
}

/// The root directory entry for the entire filesystem.
pub fn vfs_root() -> Result<Arc<Dentry>> {
	VFS_ROOT.get().cloned().ok_or(Error::ENOENT)
}
