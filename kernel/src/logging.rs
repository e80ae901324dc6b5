// SPDX-License-Identifier: GPL-2.0

//! Kernel logging and debugging system
//!
//! Messages are kept in a bounded in-memory ring so late consumers (the
//! console driver, a future syslog device) can drain them; the console
//! itself is an external collaborator and not wired up here.

use alloc::string::String;
use alloc::vec::Vec;

use crate::sync::Mutex;

/// Log levels (compatible with Linux kernel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
	Emergency = 0, // KERN_EMERG
	Alert = 1,     // KERN_ALERT
	Critical = 2,  // KERN_CRIT
	Error = 3,     // KERN_ERR
	Warning = 4,   // KERN_WARNING
	Notice = 5,    // KERN_NOTICE
	Info = 6,      // KERN_INFO
	Debug = 7,     // KERN_DEBUG
}

impl LogLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Emergency => "EMERG",
			LogLevel::Alert => "ALERT",
			LogLevel::Critical => "CRIT",
			LogLevel::Error => "ERROR",
			LogLevel::Warning => "WARN",
			LogLevel::Notice => "NOTICE",
			LogLevel::Info => "INFO",
			LogLevel::Debug => "DEBUG",
		}
	}
}

/// One buffered log record
#[derive(Debug, Clone)]
pub struct LogEntry {
	pub seq: u64,
	pub level: LogLevel,
	pub module: String,
	pub message: String,
}

/// Logging statistics
#[derive(Debug, Clone, Default)]
pub struct LogStats {
	pub total_entries: u64,
	pub entries_by_level: [u64; 8],
	pub dropped_entries: u64,
}

/// Kernel logger with a bounded entry ring
pub struct KernelLogger {
	min_level: LogLevel,
	max_entries: usize,
	next_seq: u64,
	entries: Vec<LogEntry>,
	stats: LogStats,
}

impl KernelLogger {
	pub const fn new() -> Self {
		Self {
			min_level: LogLevel::Debug,
			max_entries: 256,
			next_seq: 0,
			entries: Vec::new(),
			stats: LogStats {
				total_entries: 0,
				entries_by_level: [0; 8],
				dropped_entries: 0,
			},
		}
	}

	fn log(&mut self, level: LogLevel, module: &str, message: &str) {
		if level > self.min_level {
			return;
		}

		self.stats.total_entries += 1;
		self.stats.entries_by_level[level as usize] += 1;

		if self.entries.len() >= self.max_entries {
			self.entries.remove(0);
			self.stats.dropped_entries += 1;
		}

		let seq = self.next_seq;
		self.next_seq += 1;
		self.entries.push(LogEntry {
			seq,
			level,
			module: module.into(),
			message: message.into(),
		});
	}
}

static LOGGER: Mutex<KernelLogger> = Mutex::new(KernelLogger::new());

/// Record one message. Callers normally go through the level macros.
pub fn log(level: LogLevel, module: &str, message: &str) {
	LOGGER.lock().log(level, module, message);
}

/// Raise or lower the threshold below which messages are dropped.
pub fn set_min_level(level: LogLevel) {
	LOGGER.lock().min_level = level;
}

/// Snapshot of the buffered entries, oldest first.
pub fn recent_entries() -> Vec<LogEntry> {
	LOGGER.lock().entries.clone()
}

/// Snapshot of the logging counters.
pub fn stats() -> LogStats {
	LOGGER.lock().stats.clone()
}

#[macro_export]
macro_rules! info {
	($($arg:tt)*) => {
		$crate::logging::log(
			$crate::logging::LogLevel::Info,
			module_path!(),
			&::alloc::format!($($arg)*),
		)
	};
}

#[macro_export]
macro_rules! notice {
	($($arg:tt)*) => {
		$crate::logging::log(
			$crate::logging::LogLevel::Notice,
			module_path!(),
			&::alloc::format!($($arg)*),
		)
	};
}

#[macro_export]
macro_rules! warn {
	($($arg:tt)*) => {
		$crate::logging::log(
			$crate::logging::LogLevel::Warning,
			module_path!(),
			&::alloc::format!($($arg)*),
		)
	};
}

#[macro_export]
macro_rules! error {
	($($arg:tt)*) => {
		$crate::logging::log(
			$crate::logging::LogLevel::Error,
			module_path!(),
			&::alloc::format!($($arg)*),
		)
	};
}

#[macro_export]
macro_rules! debug {
	($($arg:tt)*) => {
		$crate::logging::log(
			$crate::logging::LogLevel::Debug,
			module_path!(),
			&::alloc::format!($($arg)*),
		)
	};
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_is_bounded_and_counts() {
		let _guard = crate::testsupport::boot();
		let before = stats().total_entries;
		for i in 0..300 {
			crate::debug!("filler {}", i);
		}
		let after = stats();
		assert_eq!(after.total_entries, before + 300);
		assert!(recent_entries().len() <= 256);
		assert!(after.dropped_entries > 0);
	}

	#[test]
	fn refcount_underflow_warns() {
		let _guard = crate::testsupport::boot();
		let dentry = crate::fs::d_alloc("orphan", None);
		crate::fs::d_put(&dentry);
		// One put too many: diagnosed, not wrapped around.
		crate::fs::d_put(&dentry);
		assert_eq!(dentry.count(), 0);
		let entries = recent_entries();
		assert!(entries.iter().any(|entry| entry.level == LogLevel::Warning
			&& entry.message.contains("reference count going negative")));
	}

	#[test]
	fn level_threshold_filters() {
		let _guard = crate::testsupport::boot();
		set_min_level(LogLevel::Warning);
		let before = stats().total_entries;
		crate::debug!("should be dropped");
		assert_eq!(stats().total_entries, before);
		set_min_level(LogLevel::Debug);
	}
}
