// SPDX-License-Identifier: GPL-2.0

//! VFS and loader self-test battery
//!
//! End-to-end scenarios runnable from kernel context, for bring-up on
//! hardware where the hosted test harness is out of reach. Each
//! scenario leaves the kernel the way it found it.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::exec::{
	register_exec_type, sys_execve, sys_insmod, sys_rmmod, unregister_exec_type, Exec,
	ExecFormat, Module,
};
use crate::fs::file::File;
use crate::fs::flags::{O_CREAT, O_RDONLY, O_RDWR};
use crate::fs::mount::{do_mount, do_umount, MS_NOEXEC, MS_RDONLY};
use crate::fs::operations::{sys_chmod, sys_close, sys_open, sys_read, sys_write};
use crate::fs::path::{path_lookup, LOOKUP_DEFAULT};
use crate::fs::{file_read, file_seek, SEEK_SET};
use crate::sync::Arc;
use crate::task;

/// Outcome of one scenario
#[derive(Debug, Clone)]
pub struct TestResult {
	pub name: String,
	pub passed: bool,
	pub message: String,
}

/// Suite statistics
#[derive(Debug, Clone)]
pub struct TestStats {
	pub total_tests: u32,
	pub passed_tests: u32,
	pub failed_tests: u32,
}

type Scenario = fn() -> core::result::Result<(), String>;

fn run_scenario(name: &str, scenario: Scenario) -> TestResult {
	match scenario() {
		Ok(()) => TestResult {
			name: name.into(),
			passed: true,
			message: String::from("ok"),
		},
		Err(message) => TestResult {
			name: name.into(),
			passed: false,
			message,
		},
	}
}

fn check(cond: bool, what: &str) -> core::result::Result<(), String> {
	if cond {
		Ok(())
	} else {
		Err(format!("check failed: {}", what))
	}
}

fn expect<T>(result: Result<T>, what: &str) -> core::result::Result<T, String> {
	result.map_err(|err| format!("{}: {}", what, err))
}

fn expect_err<T>(
	result: Result<T>,
	want: Error,
	what: &str,
) -> core::result::Result<(), String> {
	match result {
		Err(err) if err == want => Ok(()),
		Err(err) => Err(format!("{}: got {}, wanted {}", what, err, want)),
		Ok(_) => Err(format!("{}: unexpectedly succeeded", what)),
	}
}

/// Run every scenario and log a summary.
pub fn run_all_tests() -> TestStats {
	crate::info!("running VFS/loader self-tests...");
	let _ = crate::kernel_init();

	let mut results = Vec::new();
	results.push(run_scenario("boot filesystem", scenario_boot_filesystem));
	results.push(run_scenario("open-close round-trip", scenario_open_close));
	results.push(run_scenario("exec denial on no-exec mount", scenario_noexec_denial));
	results.push(run_scenario("busy umount", scenario_busy_umount));
	results.push(run_scenario("argument overflow", scenario_argument_overflow));
	results.push(run_scenario("module lifecycle", scenario_module_lifecycle));

	let stats = TestStats {
		total_tests: results.len() as u32,
		passed_tests: results.iter().filter(|r| r.passed).count() as u32,
		failed_tests: results.iter().filter(|r| !r.passed).count() as u32,
	};

	for result in &results {
		if result.passed {
			crate::info!("self-test: {}: ok", result.name);
		} else {
			crate::error!("self-test: {}: FAILED: {}", result.name, result.message);
		}
	}
	crate::info!(
		"self-tests complete: {}/{} passed",
		stats.passed_tests,
		stats.total_tests
	);
	stats
}

/// The fake binary format the loader scenarios run against. The probe
/// looks for an ELF-style magic so a real loader can slot in later.
struct SelfTestFormat;

const SELFTEST_MAGIC: &[u8; 4] = b"\x7fELF";

impl ExecFormat for SelfTestFormat {
	fn name(&self) -> &'static str {
		"elf"
	}

	fn check(&self, exec: &Exec) -> bool {
		&exec.buffer[..4] == SELFTEST_MAGIC
	}

	fn load_exec(&self, exec: &mut Exec) -> Result<()> {
		exec.entry = 0x0804_8000;
		exec.bssend = 0x0804_9000;
		Ok(())
	}

	fn load_module(&self, file: &Arc<File>) -> Option<Result<Module>> {
		let mut header = [0u8; 4];
		if file_seek(file, 0, SEEK_SET).is_err() {
			return Some(Err(Error::EIO));
		}
		match file_read(file, &mut header) {
			Ok(4) if &header == SELFTEST_MAGIC => {}
			_ => return None,
		}
		let mut image = alloc::vec![0u8; 256];
		match file_read(file, &mut image) {
			Ok(n) => image.truncate(n),
			Err(err) => return Some(Err(err)),
		}
		Some(Ok(Module::new("selftest", image)))
	}
}

fn write_file(name: &str, data: &[u8]) -> core::result::Result<(), String> {
	let fd = expect(sys_open(name, O_CREAT | O_RDWR, 0o755), "create")?;
	expect(sys_write(fd, data), "write")?;
	expect(sys_close(fd), "close")?;
	Ok(())
}

/// Scenario 1: a mounted in-memory filesystem takes over the root.
fn scenario_boot_filesystem() -> core::result::Result<(), String> {
	expect(do_mount("", "/", "testfs", MS_RDONLY, None), "mount")?;

	let result = (|| {
		let path = expect(path_lookup("/", LOOKUP_DEFAULT), "lookup /")?;
		let mount = path.mount().cloned();
		let fsroot = mount
			.as_ref()
			.and_then(|m| m.m_super.root())
			.ok_or_else(|| String::from("no filesystem root behind /"))?;
		check(
			Arc::ptr_eq(path.dentry(), &fsroot),
			"/ resolves to the mounted root",
		)
	})();

	let umount = expect(do_umount("/", 0), "umount");
	result.and(umount.map(|_| ()))
}

/// Scenario 2: open, read, close against a just-created file.
fn scenario_open_close() -> core::result::Result<(), String> {
	expect(do_mount("", "/", "testfs", 0, None), "mount")?;

	let result = (|| {
		write_file("/a.txt", b"scenario two")?;
		let fd = expect(sys_open("/a.txt", O_RDONLY, 0), "open")?;
		check(fd == 0, "first free descriptor is zero")?;
		let mut buf = [0u8; 10];
		let n = expect(sys_read(fd, &mut buf), "read")?;
		check(n <= 10, "short read stays within bounds")?;
		expect(sys_close(fd), "close")?;
		check(
			task::current().t_vfs.get_file(fd).is_none(),
			"slot empty after close",
		)
	})();

	let umount = expect(do_umount("/", 0), "umount");
	result.and(umount.map(|_| ()))
}

/// Scenario 3: a no-exec mount denies execution during path
/// evaluation.
fn scenario_noexec_denial() -> core::result::Result<(), String> {
	expect(do_mount("", "/", "testfs", MS_RDONLY | MS_NOEXEC, None), "mount")?;

	let result = (|| {
		// Root may seed the tree through the driver even on a
		// read-only mount.
		let mut image = Vec::new();
		image.extend_from_slice(SELFTEST_MAGIC);
		write_file("/prog", &image)?;
		expect(sys_chmod("/prog", 0o755), "chmod")?;

		task::current().set_identity(1000, 1000);
		let denied = sys_execve("/prog", &["prog"], &[]);
		task::current().set_identity(0, 0);
		expect_err(denied, Error::EACCES, "execve on no-exec mount")
	})();

	let umount = expect(do_umount("/", 0), "umount");
	result.and(umount.map(|_| ()))
}

/// Scenario 4: an open file keeps its mount busy.
fn scenario_busy_umount() -> core::result::Result<(), String> {
	expect(do_mount("", "/", "testfs", 0, None), "mount")?;

	let result = (|| {
		write_file("/busy.txt", b"busy")?;
		let fd = expect(sys_open("/busy.txt", O_RDONLY, 0), "open")?;
		let busy = expect_err(do_umount("/", 0), Error::EBUSY, "umount while open");
		expect(sys_close(fd), "close")?;
		busy
	})();

	let umount = expect(do_umount("/", 0), "umount after close");
	result.and(umount.map(|_| ()))
}

/// Scenario 5: an oversized argument block fails before the address
/// space is touched.
fn scenario_argument_overflow() -> core::result::Result<(), String> {
	expect(do_mount("", "/", "testfs", 0, None), "mount")?;
	register_exec_type(Arc::new(SelfTestFormat));

	let result = (|| {
		let mut image = Vec::new();
		image.extend_from_slice(SELFTEST_MAGIC);
		write_file("/prog", &image)?;

		let task = task::current();
		task.t_mm.strip_user();
		expect(task.t_mm.map_range(0x1000, 0x2000), "map marker page")?;
		expect(task.t_mm.write_user(0x1000, b"marker"), "write marker")?;
		task.clear_flag(task::TF_EXECVE);

		let big = String::from_utf8(alloc::vec![b'a'; task::TASK_MAX_ARG_SIZE])
			.map_err(|_| String::from("utf8"))?;
		expect_err(
			sys_execve("/prog", &["prog", big.as_str()], &[]),
			Error::E2BIG,
			"oversized argv",
		)?;

		let mut marker = [0u8; 6];
		expect(task.t_mm.read_user(0x1000, &mut marker), "read marker")?;
		check(&marker == b"marker", "address space untouched")?;
		check(!task.has_flag(task::TF_EXECVE), "no execve flag")
	})();

	let _ = unregister_exec_type("elf");
	let umount = expect(do_umount("/", 0), "umount");
	result.and(umount.map(|_| ()))
}

/// Scenario 6: module load, removal, and double removal.
fn scenario_module_lifecycle() -> core::result::Result<(), String> {
	expect(do_mount("", "/", "testfs", 0, None), "mount")?;
	register_exec_type(Arc::new(SelfTestFormat));

	let result = (|| {
		let mut image = Vec::new();
		image.extend_from_slice(SELFTEST_MAGIC);
		image.extend_from_slice(b"module body");
		write_file("/m.ko", &image)?;

		expect(sys_insmod("/m.ko"), "insmod")?;
		check(
			crate::exec::get_module("selftest").is_some(),
			"module is listed",
		)?;
		expect(sys_rmmod("selftest"), "rmmod")?;
		expect_err(
			sys_rmmod("selftest"),
			Error::ENOENT,
			"second rmmod",
		)
	})();

	let _ = unregister_exec_type("elf");
	let umount = expect(do_umount("/", 0), "umount");
	result.and(umount.map(|_| ()))
}
