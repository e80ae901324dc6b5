// SPDX-License-Identifier: GPL-2.0

//! System call boundary
//!
//! Typed entry points for the POSIX-flavored surface, applying the
//! return contract: non-negative on success, negated errno on failure.
//! The trap/interrupt plumbing that decodes raw registers into these
//! calls belongs to the platform layer.

use crate::error::Result;
use crate::exec;
use crate::fs::{self, KStat};

fn ret<T>(result: Result<T>, map: fn(T) -> isize) -> isize {
	match result {
		Ok(value) => map(value),
		Err(err) => -(err.to_errno() as isize),
	}
}

fn ret0<T>(result: Result<T>) -> isize {
	ret(result, |_| 0)
}

pub fn open(path: &str, flags: u32, mode: u32) -> isize {
	ret(fs::sys_open(path, flags, mode), |fd| fd as isize)
}

pub fn close(fd: i32) -> isize {
	ret0(fs::sys_close(fd))
}

pub fn read(fd: i32, buf: &mut [u8]) -> isize {
	ret(fs::sys_read(fd, buf), |n| n as isize)
}

pub fn write(fd: i32, buf: &[u8]) -> isize {
	ret(fs::sys_write(fd, buf), |n| n as isize)
}

pub fn lseek(fd: i32, offset: i64, whence: i32) -> i64 {
	match fs::sys_lseek(fd, offset, whence) {
		Ok(off) => off,
		Err(err) => -(err.to_errno() as i64),
	}
}

pub fn dup(fd: i32) -> isize {
	ret(fs::sys_dup(fd), |fd| fd as isize)
}

pub fn link(old_path: &str, new_path: &str) -> isize {
	ret0(fs::sys_link(old_path, new_path))
}

pub fn fstat(fd: i32, st: &mut KStat) -> isize {
	ret0(fs::sys_fstat(fd, st))
}

pub fn ioctl(fd: i32, request: u32, arg: usize) -> isize {
	ret(fs::sys_ioctl(fd, request, arg), |v| v)
}

pub fn access(path: &str, amode: u32) -> isize {
	ret0(fs::sys_access(path, amode))
}

pub fn chmod(path: &str, mode: u32) -> isize {
	ret0(fs::sys_chmod(path, mode))
}

/// `u32::MAX` (-1 in the C ABI) leaves the respective id unchanged.
pub fn chown(path: &str, owner: u32, group: u32) -> isize {
	let owner = (owner != u32::MAX).then_some(owner);
	let group = (group != u32::MAX).then_some(group);
	ret0(fs::sys_chown(path, owner, group))
}

pub fn umask(mask: u32) -> isize {
	fs::sys_umask(mask) as isize
}

pub fn mount(source: &str, target: &str, fstype: &str, flags: u32, data: Option<&str>) -> isize {
	ret0(fs::do_mount(source, target, fstype, flags, data))
}

pub fn umount(target: &str, flags: u32) -> isize {
	ret0(fs::do_umount(target, flags))
}

pub fn execve(path: &str, argv: &[&str], envp: &[&str]) -> isize {
	ret0(exec::sys_execve(path, argv, envp))
}

pub fn insmod(path: &str) -> isize {
	ret0(exec::sys_insmod(path))
}

pub fn rmmod(name: &str) -> isize {
	ret0(exec::sys_rmmod(name))
}
