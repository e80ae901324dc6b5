// SPDX-License-Identifier: GPL-2.0

//! Error handling types and utilities

use core::fmt;

/// Kernel error type. Every variant maps to one Linux errno value; system
/// calls surface these negated at the user boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// Operation not permitted (EPERM)
	EPERM,
	/// No such file or directory (ENOENT)
	ENOENT,
	/// I/O error (EIO)
	EIO,
	/// Argument list too long (E2BIG)
	E2BIG,
	/// Exec format error (ENOEXEC)
	ENOEXEC,
	/// Bad file descriptor (EBADF)
	EBADF,
	/// Out of memory (ENOMEM)
	ENOMEM,
	/// Permission denied (EACCES)
	EACCES,
	/// Bad address (EFAULT)
	EFAULT,
	/// Resource busy (EBUSY)
	EBUSY,
	/// File exists (EEXIST)
	EEXIST,
	/// Cross-device link (EXDEV)
	EXDEV,
	/// No such device (ENODEV)
	ENODEV,
	/// Not a directory (ENOTDIR)
	ENOTDIR,
	/// Is a directory (EISDIR)
	EISDIR,
	/// Invalid argument (EINVAL)
	EINVAL,
	/// Too many open files (EMFILE)
	EMFILE,
	/// Inappropriate ioctl for device (ENOTTY)
	ENOTTY,
	/// Read-only filesystem (EROFS)
	EROFS,
	/// File name too long (ENAMETOOLONG)
	ENAMETOOLONG,
	/// Function not implemented (ENOSYS)
	ENOSYS,
	/// Too many levels of symbolic links (ELOOP)
	ELOOP,
}

impl Error {
	/// Convert to the positive Linux errno value.
	pub fn to_errno(self) -> i32 {
		match self {
			Error::EPERM => 1,
			Error::ENOENT => 2,
			Error::EIO => 5,
			Error::E2BIG => 7,
			Error::ENOEXEC => 8,
			Error::EBADF => 9,
			Error::ENOMEM => 12,
			Error::EACCES => 13,
			Error::EFAULT => 14,
			Error::EBUSY => 16,
			Error::EEXIST => 17,
			Error::EXDEV => 18,
			Error::ENODEV => 19,
			Error::ENOTDIR => 20,
			Error::EISDIR => 21,
			Error::EINVAL => 22,
			Error::EMFILE => 24,
			Error::ENOTTY => 25,
			Error::EROFS => 30,
			Error::ENAMETOOLONG => 36,
			Error::ENOSYS => 38,
			Error::ELOOP => 40,
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			Error::EPERM => "Operation not permitted",
			Error::ENOENT => "No such file or directory",
			Error::EIO => "Input/output error",
			Error::E2BIG => "Argument list too long",
			Error::ENOEXEC => "Exec format error",
			Error::EBADF => "Bad file descriptor",
			Error::ENOMEM => "Out of memory",
			Error::EACCES => "Permission denied",
			Error::EFAULT => "Bad address",
			Error::EBUSY => "Resource busy",
			Error::EEXIST => "File exists",
			Error::EXDEV => "Cross-device link",
			Error::ENODEV => "No such device",
			Error::ENOTDIR => "Not a directory",
			Error::EISDIR => "Is a directory",
			Error::EINVAL => "Invalid argument",
			Error::EMFILE => "Too many open files",
			Error::ENOTTY => "Inappropriate ioctl for device",
			Error::EROFS => "Read-only file system",
			Error::ENAMETOOLONG => "File name too long",
			Error::ENOSYS => "Function not implemented",
			Error::ELOOP => "Too many levels of symbolic links",
		};
		write!(f, "{}", text)
	}
}

/// Kernel result type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn errno_values_match_linux() {
		assert_eq!(Error::EPERM.to_errno(), 1);
		assert_eq!(Error::ENOENT.to_errno(), 2);
		assert_eq!(Error::E2BIG.to_errno(), 7);
		assert_eq!(Error::ENOEXEC.to_errno(), 8);
		assert_eq!(Error::EMFILE.to_errno(), 24);
		assert_eq!(Error::ENAMETOOLONG.to_errno(), 36);
	}
}
