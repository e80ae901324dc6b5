// SPDX-License-Identifier: GPL-2.0

//! User address-space interface
//!
//! Page tables and the physical allocator are owned by the memory
//! manager; the VFS/loader core only needs the operations `execve`
//! performs on the current task's user image, expressed as the
//! [`AddressSpace`] trait. [`FlatAddressSpace`] is the in-memory backend
//! used until a real MMU backend is attached, and by the test suite.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;

use crate::error::{Error, Result};
use crate::sync::Mutex;

/// A user-space virtual address. The user image is 32-bit.
pub type UserAddr = u32;

/// Page size of the user address space
pub const PAGE_SIZE: usize = 4096;

const PAGE_MASK: UserAddr = !(PAGE_SIZE as UserAddr - 1);

/// Operations the loader performs on a task's user address space.
pub trait AddressSpace: Send + Sync {
	/// Drop every user mapping. The kernel half of the address space is
	/// untouched. There is no undo.
	fn strip_user(&self);

	/// Map zeroed pages covering `[base, top)`.
	fn map_range(&self, base: UserAddr, top: UserAddr) -> Result<()>;

	/// Copy `bytes` into user memory at `addr`.
	fn write_user(&self, addr: UserAddr, bytes: &[u8]) -> Result<()>;

	/// Copy user memory at `addr` into `buf`.
	fn read_user(&self, addr: UserAddr, buf: &mut [u8]) -> Result<()>;
}

/// Page-granular in-memory address space
pub struct FlatAddressSpace {
	pages: Mutex<BTreeMap<UserAddr, Box<[u8]>>>,
}

impl FlatAddressSpace {
	pub const fn new() -> Self {
		Self {
			pages: Mutex::new(BTreeMap::new()),
		}
	}

	/// Number of mapped user pages.
	pub fn mapped_pages(&self) -> usize {
		self.pages.lock().len()
	}
}

impl AddressSpace for FlatAddressSpace {
	fn strip_user(&self) {
		self.pages.lock().clear();
	}

	fn map_range(&self, base: UserAddr, top: UserAddr) -> Result<()> {
		if base > top {
			return Err(Error::EINVAL);
		}
		let mut pages = self.pages.lock();
		let mut addr = base & PAGE_MASK;
		while addr < top {
			pages.insert(addr, vec![0u8; PAGE_SIZE].into_boxed_slice());
			addr = addr.wrapping_add(PAGE_SIZE as UserAddr);
			if addr == 0 {
				break;
			}
		}
		Ok(())
	}

	fn write_user(&self, addr: UserAddr, bytes: &[u8]) -> Result<()> {
		let mut pages = self.pages.lock();
		let mut addr = addr;
		let mut pos = 0usize;
		while pos < bytes.len() {
			let page = addr & PAGE_MASK;
			let off = (addr - page) as usize;
			let n = (bytes.len() - pos).min(PAGE_SIZE - off);
			let frame = pages.get_mut(&page).ok_or(Error::EFAULT)?;
			frame[off..off + n].copy_from_slice(&bytes[pos..pos + n]);
			pos += n;
			addr = addr.wrapping_add(n as UserAddr);
		}
		Ok(())
	}

	fn read_user(&self, addr: UserAddr, buf: &mut [u8]) -> Result<()> {
		let pages = self.pages.lock();
		let mut addr = addr;
		let mut pos = 0usize;
		while pos < buf.len() {
			let page = addr & PAGE_MASK;
			let off = (addr - page) as usize;
			let n = (buf.len() - pos).min(PAGE_SIZE - off);
			let frame = pages.get(&page).ok_or(Error::EFAULT)?;
			buf[pos..pos + n].copy_from_slice(&frame[off..off + n]);
			pos += n;
			addr = addr.wrapping_add(n as UserAddr);
		}
		Ok(())
	}
}
