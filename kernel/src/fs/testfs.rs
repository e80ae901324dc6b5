// SPDX-License-Identifier: GPL-2.0

//! Simple in-memory filesystem
//!
//! The boot filesystem and the test fixture in one: a device-less tree
//! of nodes held in a `BTreeMap`, implementing the full optional
//! surface of the inode vtable plus plain read/write file operations.
//! Several instances can be registered under different names.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::fs::dentry::{d_alloc, d_bind};
use crate::fs::file::{File, FileCaps, FileOperations};
use crate::fs::inode::{i_get, Inode, InodeCaps, InodeInit, InodeOperations};
use crate::fs::mode::{self, S_IFMT};
use crate::fs::super_block::{Filesystem, FsFlags, SuperBlock, SuperOperations};
use crate::sync::Mutex;

pub const TESTFS_MAGIC: u32 = 0x5445_5354; // "TEST"

const ROOT_INO: u64 = 1;

struct TestNode {
	mode: u32,
	uid: u32,
	gid: u32,
	nlinks: u32,
	atime: i64,
	mtime: i64,
	ctime: i64,
	data: Vec<u8>,
	children: Vec<(String, u64)>,
}

/// Per-mount state: the node table and an inode allocator.
struct TestFsInner {
	nodes: Mutex<alloc::collections::BTreeMap<u64, TestNode>>,
	next_ino: AtomicU64,
	/// Fake clock; every mutation advances it by one tick.
	ticks: AtomicI64,
}

impl TestFsInner {
	fn new() -> Self {
		let task = crate::task::current();
		let mut nodes = alloc::collections::BTreeMap::new();
		nodes.insert(
			ROOT_INO,
			TestNode {
				mode: mode::S_IFDIR | mode::DEFAULT_DIR_MODE,
				uid: task.uid(),
				gid: task.gid(),
				nlinks: 1,
				atime: 0,
				mtime: 0,
				ctime: 0,
				data: Vec::new(),
				children: Vec::new(),
			},
		);
		Self {
			nodes: Mutex::new(nodes),
			next_ino: AtomicU64::new(ROOT_INO + 1),
			ticks: AtomicI64::new(1),
		}
	}

	fn now(&self) -> i64 {
		self.ticks.fetch_add(1, Ordering::Relaxed)
	}

	fn alloc_ino(&self) -> u64 {
		self.next_ino.fetch_add(1, Ordering::Relaxed)
	}
}

fn inner_of(sb: &Arc<SuperBlock>) -> Result<Arc<TestFsInner>> {
	sb.private()
		.ok_or(Error::EIO)?
		.downcast::<TestFsInner>()
		.map_err(|_| Error::EIO)
}

/// The registered driver. Distinct instances under distinct names give
/// independent device-less filesystems.
pub struct TestFs {
	name: &'static str,
	flags: FsFlags,
}

impl TestFs {
	pub fn new(name: &'static str) -> Self {
		Self {
			name,
			flags: FsFlags::NODEV,
		}
	}

	pub fn with_flags(name: &'static str, flags: FsFlags) -> Self {
		Self { name, flags }
	}
}

impl Filesystem for TestFs {
	fn name(&self) -> &str {
		self.name
	}

	fn flags(&self) -> FsFlags {
		self.flags
	}

	fn read_super(&self, sb: &Arc<SuperBlock>, _device: u32, _flags: u32) -> Result<()> {
		sb.set_private(Arc::new(TestFsInner::new()));
		sb.set_ops(Arc::new(TestFsSuperOps));
		sb.set_magic(TESTFS_MAGIC);
		sb.set_blocksize(4096);

		let root_inode = i_get(sb, ROOT_INO)?;
		let root = d_alloc("/", None);
		d_bind(&root, root_inode);
		sb.set_root(root);
		Ok(())
	}

	fn put_super(&self, sb: &Arc<SuperBlock>) -> Result<()> {
		sb.take_private();
		Ok(())
	}
}

struct TestFsSuperOps;

impl SuperOperations for TestFsSuperOps {
	fn read_inode(&self, sb: &Arc<SuperBlock>, ino: u64) -> Result<InodeInit> {
		let inner = inner_of(sb)?;
		let nodes = inner.nodes.lock();
		let node = nodes.get(&ino).ok_or(Error::ENOENT)?;
		Ok(InodeInit {
			mode: node.mode,
			nlinks: node.nlinks,
			uid: node.uid,
			gid: node.gid,
			size: node.data.len() as u64,
			dev: 0,
			atime: node.atime,
			mtime: node.mtime,
			ctime: node.ctime,
			ops: Arc::new(TestFsInodeOps),
			fops: Arc::new(TestFsFileOps),
		})
	}
}

struct TestFsInodeOps;

impl InodeOperations for TestFsInodeOps {
	fn caps(&self) -> InodeCaps {
		InodeCaps::LOOKUP
			| InodeCaps::CREAT
			| InodeCaps::LINK
			| InodeCaps::TRUNCATE
			| InodeCaps::CHMOD
			| InodeCaps::CHOWN
	}

	fn lookup(&self, dir: &Inode, name: &str) -> Result<u64> {
		let inner = inner_of(&dir.i_super)?;
		let nodes = inner.nodes.lock();
		let node = nodes.get(&dir.i_ino).ok_or(Error::ENOENT)?;
		node.children
			.iter()
			.find(|(child, _)| child == name)
			.map(|(_, ino)| *ino)
			.ok_or(Error::ENOENT)
	}

	fn creat(&self, dir: &Inode, name: &str, mode: u32) -> Result<u64> {
		let task = crate::task::current();
		let inner = inner_of(&dir.i_super)?;
		let now = inner.now();
		let mut nodes = inner.nodes.lock();

		let parent = nodes.get_mut(&dir.i_ino).ok_or(Error::ENOENT)?;
		if !mode::s_isdir(parent.mode) {
			return Err(Error::ENOTDIR);
		}
		if parent.children.iter().any(|(child, _)| child == name) {
			return Err(Error::EEXIST);
		}
		parent.mtime = now;

		let ino = inner.alloc_ino();
		let parent = nodes.get_mut(&dir.i_ino).ok_or(Error::ENOENT)?;
		parent.children.push((name.into(), ino));
		nodes.insert(
			ino,
			TestNode {
				mode,
				uid: task.uid(),
				gid: task.gid(),
				nlinks: 1,
				atime: now,
				mtime: now,
				ctime: now,
				data: Vec::new(),
				children: Vec::new(),
			},
		);
		Ok(ino)
	}

	fn link(&self, dir: &Inode, name: &str, inode: &Inode) -> Result<()> {
		let inner = inner_of(&dir.i_super)?;
		let now = inner.now();
		let mut nodes = inner.nodes.lock();

		{
			let parent = nodes.get(&dir.i_ino).ok_or(Error::ENOENT)?;
			if !mode::s_isdir(parent.mode) {
				return Err(Error::ENOTDIR);
			}
			if parent.children.iter().any(|(child, _)| child == name) {
				return Err(Error::EEXIST);
			}
		}

		let target = nodes.get_mut(&inode.i_ino).ok_or(Error::ENOENT)?;
		target.nlinks += 1;
		target.ctime = now;
		inode.i_nlinks.fetch_add(1, Ordering::Relaxed);

		let parent = nodes.get_mut(&dir.i_ino).ok_or(Error::ENOENT)?;
		parent.children.push((name.into(), inode.i_ino));
		parent.mtime = now;
		Ok(())
	}

	fn truncate(&self, inode: &Inode) -> Result<()> {
		let inner = inner_of(&inode.i_super)?;
		let now = inner.now();
		let mut nodes = inner.nodes.lock();
		let node = nodes.get_mut(&inode.i_ino).ok_or(Error::ENOENT)?;
		node.data.clear();
		node.mtime = now;
		node.ctime = now;
		inode.i_size.store(0, Ordering::Relaxed);
		Ok(())
	}

	fn chmod(&self, inode: &Inode, mode: u32) -> Result<()> {
		let inner = inner_of(&inode.i_super)?;
		let now = inner.now();
		let mut nodes = inner.nodes.lock();
		let node = nodes.get_mut(&inode.i_ino).ok_or(Error::ENOENT)?;
		node.mode = (node.mode & S_IFMT) | (mode & !S_IFMT);
		node.ctime = now;
		inode.i_mode.store(node.mode, Ordering::Relaxed);
		Ok(())
	}

	fn chown(&self, inode: &Inode, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
		let inner = inner_of(&inode.i_super)?;
		let now = inner.now();
		let mut nodes = inner.nodes.lock();
		let node = nodes.get_mut(&inode.i_ino).ok_or(Error::ENOENT)?;
		if let Some(uid) = uid {
			node.uid = uid;
			inode.i_uid.store(uid, Ordering::Relaxed);
		}
		if let Some(gid) = gid {
			node.gid = gid;
			inode.i_gid.store(gid, Ordering::Relaxed);
		}
		node.ctime = now;
		Ok(())
	}
}

struct TestFsFileOps;

impl FileOperations for TestFsFileOps {
	fn caps(&self) -> FileCaps {
		FileCaps::READ | FileCaps::WRITE
	}

	fn read(&self, file: &File, buf: &mut [u8]) -> Result<usize> {
		let inode = file.inode().ok_or(Error::EINVAL)?;
		let inner = inner_of(&inode.i_super)?;
		let nodes = inner.nodes.lock();
		let node = nodes.get(&inode.i_ino).ok_or(Error::ENOENT)?;

		let off = file.offset().max(0) as usize;
		if off >= node.data.len() {
			return Ok(0);
		}
		let n = buf.len().min(node.data.len() - off);
		buf[..n].copy_from_slice(&node.data[off..off + n]);
		file.set_offset((off + n) as i64);
		Ok(n)
	}

	fn write(&self, file: &File, buf: &[u8]) -> Result<usize> {
		let inode = file.inode().ok_or(Error::EINVAL)?;
		let inner = inner_of(&inode.i_super)?;
		let now = inner.now();
		let mut nodes = inner.nodes.lock();
		let node = nodes.get_mut(&inode.i_ino).ok_or(Error::ENOENT)?;

		let off = file.offset().max(0) as usize;
		if node.data.len() < off + buf.len() {
			node.data.resize(off + buf.len(), 0);
		}
		node.data[off..off + buf.len()].copy_from_slice(buf);
		node.mtime = now;
		inode.i_size.store(node.data.len() as u64, Ordering::Relaxed);
		file.set_offset((off + buf.len()) as i64);
		Ok(buf.len())
	}
}
