// SPDX-License-Identifier: GPL-2.0

//! Executable and module loader
//!
//! A registry of binary-format drivers fronts both `execve` and
//! `insmod`: the first driver that recognizes an image claims it.
//! `execve` marshals the argument block into kernel memory, tears down
//! the calling task's user image, rebuilds the stack and hands control
//! to the format driver; past the teardown there is no way back, a load
//! failure ends the task.

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{self, Registers, USER_CS, USER_DS, USER_EFLAGS};
use crate::error::{Error, Result};
use crate::fs::file::{file_close, file_open, file_read, file_seek, File};
use crate::fs::flags::O_RDONLY;
use crate::fs::path::{path_lookup, LOOKUP_DEFAULT};
use crate::fs::SEEK_SET;
use crate::memory::UserAddr;
use crate::sync::{Arc, Mutex};
use crate::task::{self, TASK_MAX_ARG_SIZE, TASK_STACK_INIT_BASE, TASK_STACK_START, TF_EXECVE};
use crate::{error, notice, warn};

/// Bytes of the image header made available to `check`
pub const EXEC_HEADER_SIZE: usize = 256;

/// Context of one exec attempt
pub struct Exec {
	/// The opened image
	pub file: Arc<File>,
	pub argv: Vec<String>,
	pub envp: Vec<String>,
	/// First bytes of the image, for format probing
	pub buffer: [u8; EXEC_HEADER_SIZE],
	/// Entry point, set by the format driver
	pub entry: UserAddr,
	/// End of the loaded data/bss image, set by the format driver
	pub bssend: UserAddr,
}

impl Exec {
	fn new(file: Arc<File>, argv: &[&str], envp: &[&str]) -> Exec {
		Exec {
			file,
			argv: argv.iter().map(|arg| String::from(*arg)).collect(),
			envp: envp.iter().map(|env| String::from(*env)).collect(),
			buffer: [0; EXEC_HEADER_SIZE],
			entry: 0,
			bssend: 0,
		}
	}
}

/// A loaded kernel module
pub struct Module {
	pub m_name: String,
	/// The relocated module image; freed when the module is removed
	pub m_image: Vec<u8>,
	/// Called after the module is linked into the list
	pub m_load: Option<fn(&Module) -> Result<()>>,
	/// Called before the module is removed
	pub m_remove: Option<fn(&Module) -> Result<()>>,
	m_refs: AtomicU32,
}

impl Module {
	pub fn new(name: &str, image: Vec<u8>) -> Module {
		Module {
			m_name: name.into(),
			m_image: image,
			m_load: None,
			m_remove: None,
			m_refs: AtomicU32::new(0),
		}
	}

	pub fn refs(&self) -> u32 {
		self.m_refs.load(Ordering::Relaxed)
	}

	/// Pin the module; removal refuses while pins are outstanding.
	pub fn get(&self) {
		self.m_refs.fetch_add(1, Ordering::Relaxed);
	}

	pub fn put(&self) {
		if self.m_refs.load(Ordering::Relaxed) == 0 {
			warn!("module {}: reference count going negative", self.m_name);
			return;
		}
		self.m_refs.fetch_sub(1, Ordering::Relaxed);
	}
}

/// A binary-format driver. A driver may support program images, module
/// images, or both.
pub trait ExecFormat: Send + Sync {
	fn name(&self) -> &'static str;

	/// Whether this driver recognizes the image.
	fn check(&self, _exec: &Exec) -> bool {
		false
	}

	/// Map the image and fill in `entry` and `bssend`.
	fn load_exec(&self, _exec: &mut Exec) -> Result<()> {
		Err(Error::ENOEXEC)
	}

	/// Try to load the file as a kernel module. `None` means "not my
	/// format"; `Some(Err)` means it was this driver's format but the
	/// load failed.
	fn load_module(&self, _file: &Arc<File>) -> Option<Result<Module>> {
		None
	}
}

static EXEC_FORMATS: Mutex<Vec<Arc<dyn ExecFormat>>> = Mutex::new(Vec::new());
static MODULES: Mutex<Vec<Arc<Module>>> = Mutex::new(Vec::new());

/// Register a format driver. The newest registration is probed first.
pub fn register_exec_type(format: Arc<dyn ExecFormat>) {
	EXEC_FORMATS.lock().insert(0, format);
}

/// Remove a format driver from the registry.
pub fn unregister_exec_type(name: &str) -> Result<()> {
	let mut formats = EXEC_FORMATS.lock();
	let pos = formats
		.iter()
		.position(|format| format.name() == name)
		.ok_or(Error::ENOENT)?;
	formats.remove(pos);
	Ok(())
}

/// Find a loaded module by name.
pub fn get_module(name: &str) -> Option<Arc<Module>> {
	MODULES.lock().iter().find(|m| m.m_name == name).cloned()
}

/// Number of loaded modules.
pub fn module_count() -> usize {
	MODULES.lock().len()
}

/// An unrecoverable failure after the old image is gone: the task has
/// nothing left to run, so it exits with the error.
fn exec_fatal(err: Error) -> Error {
	error!("execve: unrecoverable failure after address-space teardown: {}", err);
	task::current().exit(err.to_errno());
	err
}

/// Replace the current task's image with `filename`.
///
/// On real hardware this does not return on success: the task halts
/// until the scheduler re-enters user mode on the rebuilt frame. On
/// hosted builds the handoff is external and the call returns.
pub fn sys_execve(filename: &str, argv: &[&str], envp: &[&str]) -> Result<()> {
	let path = path_lookup(filename, LOOKUP_DEFAULT)?;
	let filp = file_open(&path, O_RDONLY)?;
	drop(path);

	let mut exec = Exec::new(filp, argv, envp);

	// Seed the header buffer for the format probes.
	let _ = file_seek(&exec.file, 0, SEEK_SET);
	let _ = file_read(&exec.file, &mut exec.buffer);

	// The first driver that accepts the image claims the load.
	let format = {
		let formats = EXEC_FORMATS.lock();
		formats.iter().find(|format| format.check(&exec)).cloned()
	};
	let format = match format {
		Some(format) => format,
		None => {
			let _ = file_close(&exec.file);
			return Err(Error::ENOEXEC);
		}
	};

	// Count the argument block: both pointer arrays with their NULL
	// terminators plus the packed strings.
	let argc = exec.argv.len();
	let envc = exec.envp.len();
	let argsz: usize = exec.argv.iter().map(|arg| arg.len() + 1).sum();
	let envsz: usize = exec.envp.iter().map(|env| env.len() + 1).sum();
	let total = argsz + envsz + 4 * (argc + 1) + 4 * (envc + 1);
	if total > TASK_MAX_ARG_SIZE {
		let _ = file_close(&exec.file);
		return Err(Error::E2BIG);
	}

	// Stage the block in kernel memory with the pointers already
	// pointing at their final user addresses.
	let base = TASK_STACK_START - total as UserAddr;
	let envp_base = base + (4 * (argc + 1)) as UserAddr;
	let mut straddr = envp_base + (4 * (envc + 1)) as UserAddr;

	let mut image: Vec<u8> = Vec::with_capacity(total);
	for arg in exec.argv.iter() {
		image.extend_from_slice(&straddr.to_le_bytes());
		straddr += arg.len() as UserAddr + 1;
	}
	image.extend_from_slice(&0u32.to_le_bytes());
	for env in exec.envp.iter() {
		image.extend_from_slice(&straddr.to_le_bytes());
		straddr += env.len() as UserAddr + 1;
	}
	image.extend_from_slice(&0u32.to_le_bytes());
	for text in exec.argv.iter().chain(exec.envp.iter()) {
		image.extend_from_slice(text.as_bytes());
		image.push(0);
	}

	// Point of no return: the old user image goes away.
	let task = task::current();
	task.t_mm.strip_user();

	if let Err(err) = task.t_mm.map_range(TASK_STACK_INIT_BASE, TASK_STACK_START) {
		return Err(exec_fatal(err));
	}
	if let Err(err) = task.t_mm.write_user(base, &image) {
		return Err(exec_fatal(err));
	}

	if let Err(err) = format.load_exec(&mut exec) {
		return Err(exec_fatal(err));
	}

	// The C entry trio right below the argument block: argc, argv,
	// envp.
	let mut trio = [0u8; 12];
	trio[0..4].copy_from_slice(&(argc as u32).to_le_bytes());
	trio[4..8].copy_from_slice(&base.to_le_bytes());
	trio[8..12].copy_from_slice(&envp_base.to_le_bytes());
	if let Err(err) = task.t_mm.write_user(base - 12, &trio) {
		return Err(exec_fatal(err));
	}

	let _ = file_close(&exec.file);

	// Rebuild the register frame so the next switch lands on the new
	// image in user mode.
	{
		let mut regs = task.t_regs.lock();
		*regs = Registers::default();
		regs.eip = exec.entry;
		regs.useresp = base - 12;
		regs.eflags = USER_EFLAGS;
		regs.cs = USER_CS;
		regs.ss = USER_DS;
		regs.ds = USER_DS;
	}
	task.set_dataend(exec.bssend);
	task.set_flag(TF_EXECVE);
	task.surrender_timeslice();

	arch::enable_interrupts();
	arch::wait_for_reschedule();
	Ok(())
}

/// Load a kernel module from `filename`.
pub fn sys_insmod(filename: &str) -> Result<()> {
	let path = path_lookup(filename, LOOKUP_DEFAULT)?;
	let filp = file_open(&path, O_RDONLY)?;
	drop(path);

	let formats: Vec<Arc<dyn ExecFormat>> = EXEC_FORMATS.lock().clone();
	let mut loaded = None;
	for format in formats.iter() {
		match format.load_module(&filp) {
			None => continue,
			Some(Err(err)) => {
				let _ = file_close(&filp);
				return Err(err);
			}
			Some(Ok(module)) => {
				loaded = Some(module);
				break;
			}
		}
	}

	let module = match loaded {
		Some(module) => Arc::new(module),
		None => {
			let _ = file_close(&filp);
			return Err(Error::ENOEXEC);
		}
	};

	MODULES.lock().push(module.clone());

	if let Some(load) = module.m_load {
		if let Err(err) = load(&module) {
			// Unlink again; the image buffer goes away with the
			// module.
			MODULES.lock().retain(|entry| !Arc::ptr_eq(entry, &module));
			let _ = file_close(&filp);
			return Err(err);
		}
	}

	notice!("loaded module {} from {}", module.m_name, filename);
	let _ = file_close(&filp);
	Ok(())
}

/// Remove a loaded kernel module by name.
pub fn sys_rmmod(name: &str) -> Result<()> {
	let module = get_module(name).ok_or(Error::ENOENT)?;
	if module.refs() != 0 {
		return Err(Error::EBUSY);
	}
	if let Some(remove) = module.m_remove {
		remove(&module)?;
	}
	MODULES.lock().retain(|entry| !Arc::ptr_eq(entry, &module));
	notice!("removed module {}", name);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::flags::{O_CREAT, O_RDWR};
	use crate::fs::mount::{do_mount, do_umount};
	use crate::fs::operations::{sys_close, sys_open, sys_write};
	use crate::task::TF_EXITED;

	const FLAT_MAGIC: &[u8; 4] = b"FLAT";
	const KO_MAGIC: &[u8; 4] = b"KO!!";

	struct FlatFormat {
		name: &'static str,
		entry: UserAddr,
	}

	impl ExecFormat for FlatFormat {
		fn name(&self) -> &'static str {
			self.name
		}

		fn check(&self, exec: &Exec) -> bool {
			&exec.buffer[..4] == FLAT_MAGIC
		}

		fn load_exec(&self, exec: &mut Exec) -> Result<()> {
			exec.entry = self.entry;
			exec.bssend = self.entry + 0x1000;
			Ok(())
		}
	}

	struct FailingFormat;

	impl ExecFormat for FailingFormat {
		fn name(&self) -> &'static str {
			"failing"
		}

		fn check(&self, exec: &Exec) -> bool {
			&exec.buffer[..4] == b"BAD!"
		}

		fn load_exec(&self, _exec: &mut Exec) -> Result<()> {
			Err(Error::ENOMEM)
		}
	}

	struct KoFormat;

	impl ExecFormat for KoFormat {
		fn name(&self) -> &'static str {
			"ko"
		}

		fn load_module(&self, file: &Arc<File>) -> Option<Result<Module>> {
			let mut header = [0u8; 4];
			if file_seek(file, 0, SEEK_SET).is_err() {
				return Some(Err(Error::EIO));
			}
			match file_read(file, &mut header) {
				Ok(4) if &header == KO_MAGIC => {}
				_ => return None,
			}
			let mut image = alloc::vec![0u8; 64];
			let n = match file_read(file, &mut image) {
				Ok(n) => n,
				Err(err) => return Some(Err(err)),
			};
			image.truncate(n);
			Some(Ok(Module::new("m", image)))
		}
	}

	fn write_file(name: &str, data: &[u8]) {
		let fd = sys_open(name, O_CREAT | O_RDWR, 0o755).unwrap();
		assert_eq!(sys_write(fd, data).unwrap(), data.len());
		sys_close(fd).unwrap();
	}

	fn read_user_u32(addr: UserAddr) -> u32 {
		let mut word = [0u8; 4];
		crate::task::current().t_mm.read_user(addr, &mut word).unwrap();
		u32::from_le_bytes(word)
	}

	fn read_user_cstr(addr: UserAddr) -> alloc::string::String {
		let mut out = alloc::vec::Vec::new();
		let mut addr = addr;
		loop {
			let mut byte = [0u8; 1];
			crate::task::current().t_mm.read_user(addr, &mut byte).unwrap();
			if byte[0] == 0 {
				break;
			}
			out.push(byte[0]);
			addr += 1;
		}
		alloc::string::String::from_utf8(out).unwrap()
	}

	#[test]
	fn execve_rebuilds_the_argument_block() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/prog", FLAT_MAGIC);

		register_exec_type(Arc::new(FlatFormat {
			name: "flat",
			entry: 0x1000,
		}));

		let argv = ["prog", "hello", "world"];
		let envp = ["TERM=vt100"];
		sys_execve("/prog", &argv, &envp).unwrap();

		let task = crate::task::current();
		let regs = task.t_regs.lock().clone();
		assert_eq!(regs.eip, 0x1000);
		assert_eq!(regs.cs, USER_CS);
		assert_eq!(regs.ss, USER_DS);
		assert_eq!(regs.eflags, USER_EFLAGS);

		// Walk the stack exactly the way crt0 would.
		let sp = regs.useresp;
		let argc = read_user_u32(sp);
		let argv_base = read_user_u32(sp + 4);
		let envp_base = read_user_u32(sp + 8);
		assert_eq!(argc, 3);

		for (i, expected) in argv.iter().enumerate() {
			let ptr = read_user_u32(argv_base + 4 * i as UserAddr);
			assert_eq!(read_user_cstr(ptr), *expected);
		}
		assert_eq!(read_user_u32(argv_base + 4 * 3), 0);

		for (i, expected) in envp.iter().enumerate() {
			let ptr = read_user_u32(envp_base + 4 * i as UserAddr);
			assert_eq!(read_user_cstr(ptr), *expected);
		}
		assert_eq!(read_user_u32(envp_base + 4), 0);

		assert!(task.has_flag(TF_EXECVE));
		task.clear_flag(TF_EXECVE);

		unregister_exec_type("flat").unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn execve_picks_the_first_accepting_format() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/prog", FLAT_MAGIC);

		// Registration prepends, so "second" is probed first.
		register_exec_type(Arc::new(FlatFormat {
			name: "first",
			entry: 0x1000,
		}));
		register_exec_type(Arc::new(FlatFormat {
			name: "second",
			entry: 0x2000,
		}));

		sys_execve("/prog", &["prog"], &[]).unwrap();
		let task = crate::task::current();
		assert_eq!(task.t_regs.lock().eip, 0x2000);
		task.clear_flag(TF_EXECVE);

		unregister_exec_type("first").unwrap();
		unregister_exec_type("second").unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn unknown_format_is_enoexec() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/junk", b"\x00\x01\x02\x03");

		assert_eq!(sys_execve("/junk", &["junk"], &[]), Err(Error::ENOEXEC));
		assert_eq!(
			sys_execve("/absent", &["absent"], &[]),
			Err(Error::ENOENT)
		);

		do_umount("/", 0).unwrap();
	}

	#[test]
	fn oversized_arguments_fail_before_teardown() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/prog", FLAT_MAGIC);
		register_exec_type(Arc::new(FlatFormat {
			name: "flat",
			entry: 0x1000,
		}));

		// A marker mapping that a strip would wipe out.
		let task = crate::task::current();
		task.t_mm.strip_user();
		task.t_mm.map_range(0x1000, 0x2000).unwrap();
		task.t_mm.write_user(0x1000, b"marker").unwrap();
		task.clear_flag(TF_EXECVE);

		let big = alloc::string::String::from_utf8(alloc::vec![
			b'a';
			TASK_MAX_ARG_SIZE
		])
		.unwrap();
		assert_eq!(
			sys_execve("/prog", &["prog", big.as_str()], &[]),
			Err(Error::E2BIG)
		);

		let mut marker = [0u8; 6];
		task.t_mm.read_user(0x1000, &mut marker).unwrap();
		assert_eq!(&marker, b"marker");
		assert!(!task.has_flag(TF_EXECVE));

		unregister_exec_type("flat").unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn load_failure_after_teardown_ends_the_task() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		write_file("/bad", b"BAD!");
		register_exec_type(Arc::new(FailingFormat));

		assert_eq!(sys_execve("/bad", &["bad"], &[]), Err(Error::ENOMEM));
		let task = crate::task::current();
		assert!(task.has_flag(TF_EXITED));
		assert_eq!(task.exit_code(), Error::ENOMEM.to_errno());
		task.clear_flag(TF_EXITED);

		unregister_exec_type("failing").unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn module_lifecycle() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		register_exec_type(Arc::new(KoFormat));

		let mut image = alloc::vec::Vec::new();
		image.extend_from_slice(KO_MAGIC);
		image.extend_from_slice(b"payload");
		write_file("/m.ko", &image);

		let before = module_count();
		sys_insmod("/m.ko").unwrap();
		assert_eq!(module_count(), before + 1);
		let module = get_module("m").unwrap();
		assert_eq!(module.m_image, b"payload");
		drop(module);

		sys_rmmod("m").unwrap();
		assert_eq!(module_count(), before);
		assert_eq!(sys_rmmod("m"), Err(Error::ENOENT));

		// A module that isn't any registered format at all.
		write_file("/none.ko", b"????");
		assert_eq!(sys_insmod("/none.ko"), Err(Error::ENOEXEC));

		unregister_exec_type("ko").unwrap();
		do_umount("/", 0).unwrap();
	}

	#[test]
	fn pinned_module_refuses_removal() {
		let _guard = crate::testsupport::boot();
		do_mount("", "/", "testfs", 0, None).unwrap();
		register_exec_type(Arc::new(KoFormat));

		let mut image = alloc::vec::Vec::new();
		image.extend_from_slice(KO_MAGIC);
		write_file("/pin.ko", &image);

		sys_insmod("/pin.ko").unwrap();
		let module = get_module("m").unwrap();
		module.get();
		assert_eq!(sys_rmmod("m"), Err(Error::EBUSY));
		module.put();
		drop(module);
		sys_rmmod("m").unwrap();

		unregister_exec_type("ko").unwrap();
		do_umount("/", 0).unwrap();
	}
}
