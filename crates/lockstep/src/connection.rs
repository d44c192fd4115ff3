use core::ffi::{c_int, c_void};
use std::ffi::CString;
use std::ptr::NonNull;
use std::time::Duration;

use crate::command::Command;
use crate::error::{Error, Result, check_ok, sqlite_error};
use crate::unlock::UnlockWaiter;
use crate::{ffi, raw};

/// Which page cache a connection uses.
///
/// Connections in the same process that open the same file with
/// [`CacheMode::Shared`] share one cache. Conflicts between them are reported
/// as table-level "locked" conditions, which the retry loop waits out with
/// unlock notifications. Private connections conflict at the file level and
/// see "busy" instead.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum CacheMode {
	/// Whatever the library was compiled or configured to use.
	#[default]
	Default,
	Private,
	Shared,
}

impl CacheMode {
	const fn open_flag(self) -> c_int {
		match self {
			Self::Default => 0,
			Self::Private => ffi::SQLITE_OPEN_PRIVATECACHE,
			Self::Shared => ffi::SQLITE_OPEN_SHAREDCACHE,
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionOptions {
	pub data_source: String,
	pub cache: CacheMode,
	/// Timeout given to commands created by the connection. Zero means no deadline.
	pub default_timeout: Duration,
	/// How many times a "busy" result is retried before it is surfaced.
	pub busy_retries: u32,
	/// Passed to `sqlite3_busy_timeout`. Zero leaves busy results to the retry loop.
	pub engine_busy_timeout: Duration,
}

impl Default for ConnectionOptions {
	fn default() -> Self {
		Self::new(":memory:")
	}
}

impl ConnectionOptions {
	pub fn new(data_source: impl Into<String>) -> Self {
		Self {
			data_source: data_source.into(),
			cache: CacheMode::Default,
			default_timeout: Duration::ZERO,
			busy_retries: 0,
			engine_busy_timeout: Duration::ZERO,
		}
	}

	#[must_use]
	pub const fn with_cache(mut self, cache: CacheMode) -> Self {
		self.cache = cache;
		self
	}

	#[must_use]
	pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout = timeout;
		self
	}

	#[must_use]
	pub const fn with_busy_retries(mut self, retries: u32) -> Self {
		self.busy_retries = retries;
		self
	}

	#[must_use]
	pub const fn with_engine_busy_timeout(mut self, timeout: Duration) -> Self {
		self.engine_busy_timeout = timeout;
		self
	}
}

pub struct Connection {
	db: NonNull<ffi::Sqlite3>,
	options: ConnectionOptions,
}

impl Connection {
	pub fn open(options: &ConnectionOptions) -> Result<Self> {
		let path_c = CString::new(options.data_source.as_str())
			.map_err(|_| Error::misuse("database path contains a NUL byte"))?;

		let mut db: *mut ffi::Sqlite3 = std::ptr::null_mut();
		let flags = ffi::SQLITE_OPEN_READWRITE
			| ffi::SQLITE_OPEN_CREATE
			| ffi::SQLITE_OPEN_URI
			| options.cache.open_flag();

		let code =
			unsafe { ffi::sqlite3_open_v2(path_c.as_ptr(), &raw mut db, flags, std::ptr::null()) };
		if code != ffi::SQLITE_OK {
			let error = sqlite_error(db, code);
			if !db.is_null() {
				let _ = unsafe { ffi::sqlite3_close_v2(db) };
			}
			return Err(error);
		}

		let db = NonNull::new(db)
			.ok_or_else(|| Error::misuse("SQLite returned a null connection handle"))?;
		let conn = Self { db, options: options.clone() };

		let _ = unsafe { ffi::sqlite3_extended_result_codes(db.as_ptr(), 1) };

		let busy_ms = c_int::try_from(options.engine_busy_timeout.as_millis()).unwrap_or(c_int::MAX);
		let code = unsafe { ffi::sqlite3_busy_timeout(db.as_ptr(), busy_ms) };
		check_ok(db.as_ptr(), code)?;

		tracing::debug!(
			data_source = %options.data_source,
			cache = ?options.cache,
			"opened connection"
		);
		Ok(conn)
	}

	pub fn open_in_memory() -> Result<Self> {
		Self::open(&ConnectionOptions::default())
	}

	pub const fn options(&self) -> &ConnectionOptions {
		&self.options
	}

	/// A command for `sql` that inherits the connection's default timeout.
	pub fn create_command(&self, sql: impl Into<String>) -> Command<'_> {
		Command::new(self, sql).with_timeout(self.options.default_timeout)
	}

	/// Runs a whole batch and returns its aggregate change count (-1 if nothing was modified).
	pub fn execute(&self, sql: &str) -> Result<i64> {
		self.create_command(sql).execute_non_query()
	}

	pub(crate) fn changes(&self) -> i64 {
		unsafe { ffi::sqlite3_changes64(self.db.as_ptr()) }
	}

	pub(crate) fn total_changes(&self) -> i64 {
		unsafe { ffi::sqlite3_total_changes64(self.db.as_ptr()) }
	}

	pub(crate) fn error(&self, code: c_int) -> Error {
		sqlite_error(self.db.as_ptr(), code)
	}

	/// Asks SQLite to signal `waiter` once the connection blocking this one
	/// finishes its transaction. When nothing is blocking any more, SQLite
	/// fires the callback before returning.
	pub(crate) fn register_unlock_notify(&self, waiter: &UnlockWaiter) -> Result<()> {
		let code = unsafe {
			raw::sqlite3_unlock_notify(self.db.as_ptr(), Some(unlock_notify_callback), waiter.context())
		};
		check_ok(self.db.as_ptr(), code)
	}

	pub(crate) fn cancel_unlock_notify(&self) {
		let _ = unsafe { raw::sqlite3_unlock_notify(self.db.as_ptr(), None, std::ptr::null_mut()) };
	}

	#[must_use]
	pub const fn as_ptr(&self) -> *mut ffi::Sqlite3 {
		self.db.as_ptr()
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		let _ = unsafe { ffi::sqlite3_close_v2(self.db.as_ptr()) };
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection").field("options", &self.options).finish_non_exhaustive()
	}
}

unsafe extern "C" fn unlock_notify_callback(args: *mut *mut c_void, count: c_int) {
	if args.is_null() {
		return;
	}
	let count = usize::try_from(count).unwrap_or_default();
	let contexts = unsafe { std::slice::from_raw_parts(args, count) };
	for context in contexts {
		UnlockWaiter::signal_context(*context);
	}
}
