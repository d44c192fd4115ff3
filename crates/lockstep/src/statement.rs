use core::ffi::c_int;
use std::ffi::{CStr, CString};
use std::ptr::NonNull;

use crate::connection::Connection;
use crate::error::{Error, Result, check_ok};
use crate::retry::{self, RetryPolicy};
use crate::{Value, ffi};

/// Sole owner of one prepared statement handle. Dropping it finalizes the handle.
pub(crate) struct Statement<'conn> {
	conn: &'conn Connection,
	stmt: NonNull<ffi::Sqlite3Stmt>,
	produced_rows: bool,
}

impl<'conn> Statement<'conn> {
	/// Takes ownership of `stmt`; `None` when SQLite compiled nothing.
	pub(crate) fn from_raw(conn: &'conn Connection, stmt: *mut ffi::Sqlite3Stmt) -> Option<Self> {
		NonNull::new(stmt).map(|stmt| Self { conn, stmt, produced_rows: false })
	}

	pub(crate) const fn connection(&self) -> &'conn Connection {
		self.conn
	}

	pub(crate) fn parameter_count(&self) -> usize {
		let n = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt.as_ptr()) };
		usize::try_from(n).unwrap_or_default()
	}

	/// Placeholder text including its prefix, or `None` for anonymous `?` placeholders.
	pub(crate) fn parameter_name(&self, index: c_int) -> Option<String> {
		let ptr = unsafe { ffi::sqlite3_bind_parameter_name(self.stmt.as_ptr(), index) };
		if ptr.is_null() {
			None
		} else {
			Some(unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() })
		}
	}

	pub(crate) fn parameter_index(&self, name: &str) -> Result<Option<c_int>> {
		let name = CString::new(name).map_err(|_| Error::misuse("binding name contains a NUL byte"))?;
		let index = unsafe { ffi::sqlite3_bind_parameter_index(self.stmt.as_ptr(), name.as_ptr()) };
		Ok((index > 0).then_some(index))
	}

	pub(crate) fn bind_value(&mut self, index: c_int, value: &Value) -> Result<()> {
		match value {
			Value::Null => self.bind_null(index),
			Value::Integer(v) => self.bind_i64(index, *v),
			Value::Float(v) => self.bind_f64(index, *v),
			Value::Text(v) => self.bind_text(index, v),
			Value::Blob(v) => self.bind_blob(index, v),
		}
	}

	fn bind_null(&mut self, index: c_int) -> Result<()> {
		let code = unsafe { ffi::sqlite3_bind_null(self.stmt.as_ptr(), index) };
		check_ok(self.conn.as_ptr(), code)
	}

	fn bind_i64(&mut self, index: c_int, value: i64) -> Result<()> {
		let code = unsafe { ffi::sqlite3_bind_int64(self.stmt.as_ptr(), index, value) };
		check_ok(self.conn.as_ptr(), code)
	}

	fn bind_f64(&mut self, index: c_int, value: f64) -> Result<()> {
		let code = unsafe { ffi::sqlite3_bind_double(self.stmt.as_ptr(), index, value) };
		check_ok(self.conn.as_ptr(), code)
	}

	fn bind_text(&mut self, index: c_int, value: &str) -> Result<()> {
		let len = u64::try_from(value.len()).map_err(|_| Error::misuse("text parameter is too large"))?;

		let code = unsafe {
			ffi::sqlite3_bind_text64(
				self.stmt.as_ptr(),
				index,
				value.as_ptr().cast(),
				len,
				Some(sqlite_transient()),
				ffi::SQLITE_UTF8,
			)
		};
		check_ok(self.conn.as_ptr(), code)
	}

	fn bind_blob(&mut self, index: c_int, value: &[u8]) -> Result<()> {
		let len = u64::try_from(value.len()).map_err(|_| Error::misuse("blob parameter is too large"))?;

		let code = unsafe {
			ffi::sqlite3_bind_blob64(
				self.stmt.as_ptr(),
				index,
				value.as_ptr().cast(),
				len,
				Some(sqlite_transient()),
			)
		};
		check_ok(self.conn.as_ptr(), code)
	}

	/// Advances one row, waiting out lock conflicts. `true` means a row is available.
	///
	/// Once a row has been handed out, a lock is reported instead of resetting
	/// the statement, which would replay rows already seen.
	pub(crate) fn step(&mut self, policy: RetryPolicy) -> Result<bool> {
		let stmt = self.stmt.as_ptr();
		let code = retry::run(
			self.conn,
			self.lock_policy(policy),
			|| unsafe { ffi::sqlite3_step(stmt) },
			|| {
				let _ = unsafe { ffi::sqlite3_reset(stmt) };
			},
		)?;
		match code {
			ffi::SQLITE_ROW => {
				self.produced_rows = true;
				Ok(true)
			}
			ffi::SQLITE_DONE => Ok(false),
			_ => Err(self.conn.error(code)),
		}
	}

	const fn lock_policy(&self, policy: RetryPolicy) -> RetryPolicy {
		if self.produced_rows { policy.without_restart() } else { policy }
	}

	pub(crate) fn is_read_only(&self) -> bool {
		unsafe { ffi::sqlite3_stmt_readonly(self.stmt.as_ptr()) != 0 }
	}

	pub(crate) fn column_count(&self) -> usize {
		let n = unsafe { ffi::sqlite3_column_count(self.stmt.as_ptr()) };
		usize::try_from(n).unwrap_or_default()
	}

	pub(crate) fn column_name(&self, index: c_int) -> Option<String> {
		let ptr = unsafe { ffi::sqlite3_column_name(self.stmt.as_ptr(), index) };
		if ptr.is_null() {
			None
		} else {
			Some(unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() })
		}
	}

	pub(crate) fn row_values(&self) -> Vec<Value> {
		let mut row = Vec::with_capacity(self.column_count());
		for i in 0..self.column_count() {
			let Ok(index) = c_int::try_from(i) else {
				break;
			};
			row.push(self.column_value(index));
		}
		row
	}

	pub(crate) fn column_value(&self, index: c_int) -> Value {
		match unsafe { ffi::sqlite3_column_type(self.stmt.as_ptr(), index) } {
			ffi::SQLITE_INTEGER => {
				Value::Integer(unsafe { ffi::sqlite3_column_int64(self.stmt.as_ptr(), index) })
			}
			ffi::SQLITE_FLOAT => {
				Value::Float(unsafe { ffi::sqlite3_column_double(self.stmt.as_ptr(), index) })
			}
			ffi::SQLITE_TEXT => {
				let ptr = unsafe { ffi::sqlite3_column_text(self.stmt.as_ptr(), index) };
				let bytes = unsafe { ffi::sqlite3_column_bytes(self.stmt.as_ptr(), index) };
				if ptr.is_null() || bytes <= 0 {
					Value::Text(String::new())
				} else {
					let slice =
						unsafe { std::slice::from_raw_parts(ptr, usize::try_from(bytes).unwrap_or_default()) };
					Value::Text(String::from_utf8_lossy(slice).into_owned())
				}
			}
			ffi::SQLITE_BLOB => {
				let ptr = unsafe { ffi::sqlite3_column_blob(self.stmt.as_ptr(), index) };
				let bytes = unsafe { ffi::sqlite3_column_bytes(self.stmt.as_ptr(), index) };
				if ptr.is_null() || bytes <= 0 {
					Value::Blob(Vec::new())
				} else {
					let slice = unsafe {
						std::slice::from_raw_parts(ptr.cast::<u8>(), usize::try_from(bytes).unwrap_or_default())
					};
					Value::Blob(slice.to_vec())
				}
			}
			_ => Value::Null,
		}
	}

	pub(crate) fn sql(&self) -> Option<String> {
		let ptr = unsafe { ffi::sqlite3_sql(self.stmt.as_ptr()) };
		if ptr.is_null() {
			None
		} else {
			Some(unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() })
		}
	}
}

impl Drop for Statement<'_> {
	fn drop(&mut self) {
		let _ = unsafe { ffi::sqlite3_finalize(self.stmt.as_ptr()) };
	}
}

impl std::fmt::Debug for Statement<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Statement").field("sql", &self.sql()).finish_non_exhaustive()
	}
}

fn sqlite_transient() -> unsafe extern "C" fn(*mut std::ffi::c_void) {
	unsafe { std::mem::transmute::<isize, unsafe extern "C" fn(*mut std::ffi::c_void)>(-1_isize) }
}
