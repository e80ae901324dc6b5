// SPDX-License-Identifier: GPL-2.0

//! File and path system calls over the open-file table
//!
//! Everything here runs against the current task: descriptors index its
//! fixed-size open vector, relative names start at its working
//! directory, and permission checks use its identity.

use core::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::fs::dentry::{d_alloc, d_bind};
use crate::fs::file::{file_get, file_open, file_put, file_read, file_seek, FileCaps};
use crate::fs::flags::{O_ACCMODE, O_APPEND, O_CREAT, O_EXCL, O_TRUNC};
use crate::fs::inode::{i_get, Inode, InodeCaps};
use crate::fs::mode::{
	S_IFMT, S_IFREG, S_IRGRP, S_IROTH, S_IRUSR, S_IWGRP, S_IWOTH, S_IWUSR, S_IXGRP,
	S_IXOTH, S_IXUSR,
};
use crate::fs::mount::mnt_get;
use crate::fs::path::{path_lookup, Path, LOOKUP_DEFAULT};
use crate::fs::{KStat, F_OK, FREAD, FWRITE, R_OK, W_OK, X_OK};
use crate::sync::Arc;
use crate::task;

/// The read/write halves encoded in the access mode, offset by one so
/// `O_RDONLY` (zero) still names a capability.
fn open_mode(flags: u32) -> u32 {
	(flags & O_ACCMODE) + 1
}

/// Last component of a path; trailing slashes are significant, so
/// `"/x/y/"` has an empty basename.
pub fn basename(path: &str) -> &str {
	match path.rfind('/') {
		Some(pos) => &path[pos + 1..],
		None => path,
	}
}

/// Split into the containing directory and the basename. No slash means
/// the current directory.
fn split_path(path: &str) -> (&str, &str) {
	match path.rfind('/') {
		Some(0) => ("/", &path[1..]),
		Some(pos) => (&path[..pos], &path[pos + 1..]),
		None => ("", path),
	}
}

/// POSIX permission check against the current task's identity. Root
/// passes everything; the mount's read-only and no-exec flags take
/// precedence over the mode bits.
pub fn path_access(path: &Path, amode: u32) -> Result<()> {
	if amode != F_OK && amode & !(X_OK | W_OK | R_OK) != 0 {
		return Err(Error::EINVAL);
	}

	let task = task::current();
	if task.uid() == 0 {
		return Ok(());
	}
	// The name resolved, so the file plainly exists.
	if amode == F_OK {
		return Ok(());
	}

	let inode = path.dentry().inode().ok_or(Error::EACCES)?;
	let mode = inode.i_mode.load(Ordering::Relaxed);
	let owner = task.uid() == inode.i_uid.load(Ordering::Relaxed);
	let group = task.gid() == inode.i_gid.load(Ordering::Relaxed);

	if amode & W_OK != 0 {
		if path.mount().map_or(false, |m| m.is_readonly()) {
			return Err(Error::EACCES);
		}
		let bit = if owner {
			S_IWUSR
		} else if group {
			S_IWGRP
		} else {
			S_IWOTH
		};
		if mode & bit == 0 {
			return Err(Error::EACCES);
		}
	}
	if amode & R_OK != 0 {
		let bit = if owner {
			S_IRUSR
		} else if group {
			S_IRGRP
		} else {
			S_IROTH
		};
		if mode & bit == 0 {
			return Err(Error::EACCES);
		}
	}
	if amode & X_OK != 0 {
		if path.mount().map_or(false, |m| m.is_noexec()) {
			return Err(Error::EACCES);
		}
		let bit = if owner {
			S_IXUSR
		} else if group {
			S_IXGRP
		} else {
			S_IXOTH
		};
		if mode & bit == 0 {
			return Err(Error::EACCES);
		}
	}

	Ok(())
}

/// Create a new regular file and hand back its resolved path. The
/// caller guarantees the file does not exist yet.
pub fn create_file(filename: &str, mode: u32) -> Result<Path> {
	let (dir_name, name) = split_path(filename);
	if name.is_empty() {
		return Err(Error::ENOENT);
	}

	// Look up the containing directory.
	let dir = path_lookup(dir_name, LOOKUP_DEFAULT)?;
	path_access(&dir, W_OK)?;

	let dir_inode = dir.dentry().inode().ok_or(Error::EACCES)?;
	if !dir_inode.i_ops.caps().contains(InodeCaps::CREAT) {
		return Err(Error::EACCES);
	}

	let ino = dir_inode.i_ops.creat(&dir_inode, name, mode)?;
	let inode = i_get(&dir_inode.i_super, ino)?;

	let dentry = d_alloc(name, Some(dir.dentry()));
	d_bind(&dentry, inode);

	// The new file shares the parent's mount.
	let mount = dir.mount().map(mnt_get);
	Ok(Path::new(dentry, mount))
}

/// Truncate through the driver; a filesystem without truncate refuses.
pub fn inode_trunc(inode: &Arc<Inode>) -> Result<()> {
	if !inode.i_ops.caps().contains(InodeCaps::TRUNCATE) {
		return Err(Error::EACCES);
	}
	inode.i_ops.truncate(inode)
}

/// Open `filename`, creating it when asked to, and install the
/// description into the lowest free descriptor slot.
pub fn sys_open(filename: &str, flags: u32, mode: u32) -> Result<i32> {
	let task = task::current();
	let fd = task.t_vfs.find_free_fd().ok_or(Error::EMFILE)?;

	let path = match path_lookup(filename, LOOKUP_DEFAULT) {
		Ok(path) => {
			if flags & O_EXCL != 0 {
				return Err(Error::EEXIST);
			}
			path
		}
		Err(Error::ENOENT) if flags & O_CREAT != 0 => {
			create_file(filename, (mode & !S_IFMT) | S_IFREG)?
		}
		Err(err) => return Err(err),
	};

	let fmode = open_mode(flags);
	let mut amode = 0;
	if fmode & FWRITE != 0 {
		amode |= W_OK;
	}
	if fmode & FREAD != 0 {
		amode |= R_OK;
	}
	path_access(&path, amode)?;

	let inode = path.dentry().inode().ok_or(Error::EACCES)?;
	// A directory opens read-only or not at all.
	if inode.is_directory() && fmode & FWRITE != 0 {
		return Err(Error::EISDIR);
	}

	if flags & O_TRUNC != 0 {
		if fmode & FWRITE == 0 {
			return Err(Error::EACCES);
		}
		let _ = inode_trunc(&inode);
	}

	let file = file_open(&path, flags)?;
	drop(path);

	task.t_vfs.install_fd(fd, file);
	Ok(fd)
}

/// Close an open file descriptor. A driver close error leaves the
/// descriptor in place.
pub fn sys_close(fd: i32) -> Result<()> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;

	if file.f_ops.caps().contains(FileCaps::CLOSE) {
		file.f_ops.close(&file)?;
	}

	task.t_vfs.clear_fd(fd);
	file_put(&file);
	Ok(())
}

/// Read from an open file descriptor.
pub fn sys_read(fd: i32, buf: &mut [u8]) -> Result<usize> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;

	if open_mode(file.f_status) & FREAD == 0 {
		return Err(Error::EINVAL);
	}
	file_read(&file, buf)
}

/// Write to an open file descriptor. An append-mode write happens at
/// the cached end of file and leaves the cursor where it was.
pub fn sys_write(fd: i32, buf: &[u8]) -> Result<usize> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;

	if open_mode(file.f_status) & FWRITE == 0 {
		return Err(Error::EINVAL);
	}
	if !file.f_ops.caps().contains(FileCaps::WRITE) {
		return Err(Error::EINVAL);
	}

	if file.f_status & O_APPEND != 0 {
		let old_off = file.offset();
		let size = file
			.inode()
			.map(|inode| inode.i_size.load(Ordering::Relaxed))
			.unwrap_or(0);
		file.set_offset(size as i64);
		let result = file.f_ops.write(&file, buf);
		file.set_offset(old_off);
		return result;
	}

	file.f_ops.write(&file, buf)
}

/// Reposition an open file descriptor.
pub fn sys_lseek(fd: i32, offset: i64, whence: i32) -> Result<i64> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;
	file_seek(&file, offset, whence)
}

/// Duplicate a descriptor; both ends share one file description.
pub fn sys_dup(fd: i32) -> Result<i32> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;

	let new_fd = task.t_vfs.find_free_fd().ok_or(Error::EMFILE)?;
	task.t_vfs.install_fd(new_fd, file_get(&file));
	Ok(new_fd)
}

/// Create a hard link `new_path` for `old_path`. Both must live on the
/// same mount, the mount must be writable, and the filesystem must
/// support links at all.
pub fn sys_link(old_path: &str, new_path: &str) -> Result<()> {
	let (new_dir, new_base) = split_path(new_path);

	let oldp = path_lookup(old_path, LOOKUP_DEFAULT)?;
	let newp = path_lookup(new_dir, LOOKUP_DEFAULT)?;

	let same_mount = match (oldp.mount(), newp.mount()) {
		(Some(a), Some(b)) => Arc::ptr_eq(a, b),
		(None, None) => true,
		_ => false,
	};
	if !same_mount {
		return Err(Error::EXDEV);
	}
	if newp.mount().map_or(false, |m| m.is_readonly()) {
		return Err(Error::EROFS);
	}

	let dir_inode = newp.dentry().inode().ok_or(Error::EACCES)?;
	let old_inode = oldp.dentry().inode().ok_or(Error::ENOENT)?;
	if !dir_inode.i_ops.caps().contains(InodeCaps::LINK) {
		return Err(Error::EPERM);
	}

	dir_inode.i_ops.link(&dir_inode, new_base, &old_inode)
}

/// `stat` through an open descriptor; without driver support the cached
/// inode fields stand in.
pub fn sys_fstat(fd: i32, st: &mut KStat) -> Result<()> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;

	if file.f_ops.caps().contains(FileCaps::FSTAT) {
		return file.f_ops.fstat(&file, st);
	}

	let inode = file.inode().ok_or(Error::EINVAL)?;
	*st = inode.stat();
	Ok(())
}

/// Device control on an open descriptor.
pub fn sys_ioctl(fd: i32, request: u32, arg: usize) -> Result<isize> {
	let task = task::current();
	let file = task.t_vfs.get_file(fd).ok_or(Error::EBADF)?;

	if !file.f_ops.caps().contains(FileCaps::IOCTL) {
		return Err(Error::EINVAL);
	}
	file.f_ops.ioctl(&file, request, arg)
}

/// Check whether the calling task may access `filename`.
pub fn sys_access(filename: &str, amode: u32) -> Result<()> {
	let path = path_lookup(filename, LOOKUP_DEFAULT)?;
	path_access(&path, amode)
}

/// Change permission bits, through the driver when it wants a say.
pub fn sys_chmod(filename: &str, mode: u32) -> Result<()> {
	let path = path_lookup(filename, LOOKUP_DEFAULT)?;
	let inode = path.dentry().inode().ok_or(Error::ENOENT)?;

	if inode.i_ops.caps().contains(InodeCaps::CHMOD) {
		return inode.i_ops.chmod(&inode, mode);
	}

	// Keep the format bits, replace the permission bits.
	let old = inode.i_mode.load(Ordering::Relaxed);
	inode.i_mode
		.store((old & S_IFMT) | (mode & !S_IFMT), Ordering::Relaxed);
	Ok(())
}

/// Change ownership. Only root may change the owner.
pub fn sys_chown(filename: &str, owner: Option<u32>, group: Option<u32>) -> Result<()> {
	let task = task::current();
	if owner.is_some() && task.uid() != 0 {
		return Err(Error::EPERM);
	}

	let path = path_lookup(filename, LOOKUP_DEFAULT)?;
	let inode = path.dentry().inode().ok_or(Error::ENOENT)?;

	if inode.i_ops.caps().contains(InodeCaps::CHOWN) {
		return inode.i_ops.chown(&inode, owner, group);
	}

	if let Some(owner) = owner {
		inode.i_uid.store(owner, Ordering::Relaxed);
	}
	if let Some(group) = group {
		inode.i_gid.store(group, Ordering::Relaxed);
	}
	Ok(())
}

/// Swap the task's file creation mask, returning the old one.
pub fn sys_umask(mask: u32) -> u32 {
	task::current().swap_umask(mask)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::flags::{O_RDONLY, O_RDWR, O_WRONLY};
	use crate::fs::mount::{do_mount, do_umount, MS_NOEXEC, MS_RDONLY};
	use crate::fs::super_block::register_filesystem;
	use crate::fs::testfs::TestFs;

	fn write_file(name: &str, data: &[u8]) {
		let fd = sys_open(name, O_CREAT | O_RDWR, 0o644).unwrap();
		assert_eq!(sys_write(fd, data).unwrap(), data.len());
		sys_close(fd).unwrap();
	}

	#[test]
	fn open_read_close_roundtrip() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/a.txt", b"hello world");

		let fd = sys_open("/a.txt", O_RDONLY, 0).unwrap();
		assert_eq!(fd, 0);
		let mut buf = [0u8; 10];
		let n = sys_read(fd, &mut buf).unwrap();
		assert!(n <= 10);
		assert_eq!(&buf[..n], b"hello worl");
		// The driver offers no ioctl.
		assert_eq!(sys_ioctl(fd, 0x5401, 0), Err(Error::EINVAL));
		sys_close(fd).unwrap();

		// The slot is free again.
		assert_eq!(sys_read(fd, &mut buf), Err(Error::EBADF));

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn exclusive_create_rejects_existing() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/excl.txt", b"x");

		assert_eq!(
			sys_open("/excl.txt", O_CREAT | O_EXCL | O_RDWR, 0o644),
			Err(Error::EEXIST)
		);
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn missing_file_without_creat_is_enoent() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();

		assert_eq!(sys_open("/absent", O_RDONLY, 0), Err(Error::ENOENT));
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn directory_rejects_write_open() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();

		assert_eq!(sys_open("/", O_WRONLY, 0), Err(Error::EISDIR));
		let fd = sys_open("/", O_RDONLY, 0).unwrap();
		sys_close(fd).unwrap();

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn truncate_on_open_empties_the_file() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/t.txt", b"not empty");

		assert_eq!(sys_open("/t.txt", O_TRUNC | O_RDONLY, 0), Err(Error::EACCES));

		let fd = sys_open("/t.txt", O_TRUNC | O_WRONLY, 0).unwrap();
		sys_close(fd).unwrap();
		let fd = sys_open("/t.txt", O_RDONLY, 0).unwrap();
		let mut st = KStat::default();
		sys_fstat(fd, &mut st).unwrap();
		assert_eq!(st.st_size, 0);
		sys_close(fd).unwrap();

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn append_leaves_the_cursor_alone() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/log.txt", b"abc");

		let fd = sys_open("/log.txt", O_WRONLY | O_APPEND, 0).unwrap();
		let before = {
			let file = task::current().t_vfs.get_file(fd).unwrap();
			file.offset()
		};
		assert_eq!(sys_write(fd, b"xyz").unwrap(), 3);
		let after = {
			let file = task::current().t_vfs.get_file(fd).unwrap();
			file.offset()
		};
		assert_eq!(before, after);
		sys_close(fd).unwrap();

		let fd = sys_open("/log.txt", O_RDONLY, 0).unwrap();
		let mut buf = [0u8; 16];
		let n = sys_read(fd, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"abcxyz");
		sys_close(fd).unwrap();

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn dup_shares_one_description() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/d.txt", b"abcdef");

		let fd = sys_open("/d.txt", O_RDONLY, 0).unwrap();
		let fd2 = sys_dup(fd).unwrap();
		assert_ne!(fd, fd2);

		let mut buf = [0u8; 3];
		sys_read(fd, &mut buf).unwrap();
		assert_eq!(&buf, b"abc");
		// The duplicate observes the advanced offset.
		sys_read(fd2, &mut buf).unwrap();
		assert_eq!(&buf, b"def");

		sys_close(fd).unwrap();
		sys_close(fd2).unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn lseek_synthesizes_without_driver_support() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/s.txt", b"0123456789");

		let fd = sys_open("/s.txt", O_RDONLY, 0).unwrap();
		assert_eq!(sys_lseek(fd, 4, crate::fs::SEEK_SET).unwrap(), 4);
		assert_eq!(sys_lseek(fd, 2, crate::fs::SEEK_CUR).unwrap(), 6);
		assert_eq!(sys_lseek(fd, -1, crate::fs::SEEK_END).unwrap(), 9);
		assert_eq!(sys_lseek(fd, 0, 99), Err(Error::EINVAL));

		let mut buf = [0u8; 1];
		sys_read(fd, &mut buf).unwrap();
		assert_eq!(&buf, b"9");

		sys_close(fd).unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn fstat_synthesizes_from_the_inode() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/st.txt", b"stat me");

		let fd = sys_open("/st.txt", O_RDONLY, 0).unwrap();
		let mut st = KStat::default();
		sys_fstat(fd, &mut st).unwrap();
		assert!(crate::fs::mode::s_isreg(st.st_mode));
		assert_eq!(st.st_size, 7);
		assert_eq!(st.st_blksize, 4096);
		assert_ne!(st.st_ino, 0);
		sys_close(fd).unwrap();

		assert_eq!(sys_fstat(31, &mut st), Err(Error::EBADF));
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn access_matrix_matches_posix() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/m.txt", b"modes");
		sys_chmod("/m.txt", 0o640).unwrap();
		sys_chown("/m.txt", Some(1000), Some(100)).unwrap();

		// Root passes everything, even the execute bit it lacks.
		assert!(sys_access("/m.txt", R_OK | W_OK | X_OK).is_ok());

		// Owner: read and write, no execute.
		task::current().set_identity(1000, 999);
		assert!(sys_access("/m.txt", R_OK | W_OK).is_ok());
		assert_eq!(sys_access("/m.txt", X_OK), Err(Error::EACCES));

		// Group: read only.
		task::current().set_identity(999, 100);
		assert!(sys_access("/m.txt", R_OK).is_ok());
		assert_eq!(sys_access("/m.txt", W_OK), Err(Error::EACCES));

		// Other: nothing, though mere existence still checks out.
		task::current().set_identity(999, 999);
		assert_eq!(sys_access("/m.txt", R_OK), Err(Error::EACCES));
		assert!(sys_access("/m.txt", F_OK).is_ok());

		assert_eq!(sys_access("/m.txt", 0x80), Err(Error::EINVAL));

		task::current().set_identity(0, 0);
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn readonly_mount_blocks_writes() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", MS_RDONLY, None).unwrap();
		// Root bypasses the permission check, so it can still seed the
		// tree through the driver.
		write_file("/w.txt", b"w");
		sys_chmod("/w.txt", 0o666).unwrap();

		task::current().set_identity(1000, 1000);
		assert_eq!(sys_access("/w.txt", W_OK), Err(Error::EACCES));
		assert!(sys_access("/w.txt", R_OK).is_ok());

		task::current().set_identity(0, 0);
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn noexec_mount_blocks_execute() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", MS_NOEXEC, None).unwrap();
		write_file("/x.sh", b"#!");
		sys_chmod("/x.sh", 0o777).unwrap();

		task::current().set_identity(1000, 1000);
		assert_eq!(sys_access("/x.sh", X_OK), Err(Error::EACCES));

		task::current().set_identity(0, 0);
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn link_creates_a_second_name() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/src.txt", b"linked");

		sys_link("/src.txt", "/dst.txt").unwrap();
		let fd = sys_open("/dst.txt", O_RDONLY, 0).unwrap();
		let mut buf = [0u8; 6];
		sys_read(fd, &mut buf).unwrap();
		assert_eq!(&buf, b"linked");

		let mut st = KStat::default();
		sys_fstat(fd, &mut st).unwrap();
		assert_eq!(st.st_nlink, 2);
		sys_close(fd).unwrap();

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn link_across_mounts_is_exdev() {
		let _guard = crate::testsupport::boot();
		register_filesystem(Arc::new(TestFs::new("linkfs"))).ok();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/mnt", b"");
		do_mount("", "/mnt", "linkfs", 0, None).unwrap();
		write_file("/src.txt", b"x");

		// The trailing dot makes the resolver step into the mount, so
		// the new parent really is the other filesystem's root.
		assert_eq!(sys_link("/src.txt", "/mnt/./dst.txt"), Err(Error::EXDEV));

		do_umount("/mnt", 0).unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn umask_swaps() {
		let _guard = crate::testsupport::boot();
		let old = sys_umask(0o027);
		assert_eq!(sys_umask(old), 0o027);
	}

	#[test]
	fn busy_mount_cannot_be_unmounted() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/busy.txt", b"busy");

		let fd = sys_open("/busy.txt", O_RDONLY, 0).unwrap();
		assert_eq!(do_umount("/", 0), Err(Error::EBUSY));
		sys_close(fd).unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn descriptor_table_is_bounded() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/fd.txt", b"fd");

		let mut fds = alloc::vec::Vec::new();
		loop {
			match sys_open("/fd.txt", O_RDONLY, 0) {
				Ok(fd) => fds.push(fd),
				Err(err) => {
					assert_eq!(err, Error::EMFILE);
					break;
				}
			}
		}
		assert_eq!(fds.len(), crate::task::TASK_MAX_OPEN_FILES);
		for fd in fds {
			sys_close(fd).unwrap();
		}

		do_umount("/", 0).unwrap();
	}
}
