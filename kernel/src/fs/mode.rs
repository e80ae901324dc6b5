// SPDX-License-Identifier: GPL-2.0

//! File mode bits and type predicates

/// File type mask
pub const S_IFMT: u32 = 0o170000;
/// Regular file
pub const S_IFREG: u32 = 0o100000;
/// Block device
pub const S_IFBLK: u32 = 0o060000;
/// Directory
pub const S_IFDIR: u32 = 0o040000;
/// Character device
pub const S_IFCHR: u32 = 0o020000;

/// Owner permissions
pub const S_IRUSR: u32 = 0o000400;
pub const S_IWUSR: u32 = 0o000200;
pub const S_IXUSR: u32 = 0o000100;

/// Group permissions
pub const S_IRGRP: u32 = 0o000040;
pub const S_IWGRP: u32 = 0o000020;
pub const S_IXGRP: u32 = 0o000010;

/// Other permissions
pub const S_IROTH: u32 = 0o000004;
pub const S_IWOTH: u32 = 0o000002;
pub const S_IXOTH: u32 = 0o000001;

pub fn s_isreg(mode: u32) -> bool {
	(mode & S_IFMT) == S_IFREG
}

pub fn s_isdir(mode: u32) -> bool {
	(mode & S_IFMT) == S_IFDIR
}

pub fn s_ischr(mode: u32) -> bool {
	(mode & S_IFMT) == S_IFCHR
}

pub fn s_isblk(mode: u32) -> bool {
	(mode & S_IFMT) == S_IFBLK
}

/// Default mode for new regular files (0644)
pub const DEFAULT_FILE_MODE: u32 = S_IRUSR | S_IWUSR | S_IRGRP | S_IROTH;

/// Default mode for new directories (0755)
pub const DEFAULT_DIR_MODE: u32 =
	S_IRUSR | S_IWUSR | S_IXUSR | S_IRGRP | S_IXGRP | S_IROTH | S_IXOTH;
