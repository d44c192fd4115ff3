use core::ffi::c_char;
use std::ffi::CString;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::ffi;
use crate::retry::{self, RetryPolicy};
use crate::statement::Statement;

/// Compiles a multi-statement batch one statement at a time.
///
/// Text that compiles to nothing (whitespace, comments, stray semicolons) is
/// skipped. The first compile error ends the iteration.
pub(crate) struct BatchCompiler<'conn> {
	conn: &'conn Connection,
	sql: CString,
	offset: usize,
	policy: RetryPolicy,
}

impl<'conn> BatchCompiler<'conn> {
	pub(crate) fn new(conn: &'conn Connection, sql: &str, policy: RetryPolicy) -> Result<Self> {
		let sql = CString::new(sql).map_err(|_| Error::misuse("SQL contains a NUL byte"))?;
		Ok(Self { conn, sql, offset: 0, policy })
	}

	/// The part of the batch not compiled yet.
	pub(crate) fn remaining(&self) -> &str {
		self.sql.to_str().ok().and_then(|sql| sql.get(self.offset..)).unwrap_or_default()
	}

	fn is_exhausted(&self) -> bool {
		self.offset >= self.sql.as_bytes().len()
	}

	fn compile_next(&mut self) -> Result<Option<Statement<'conn>>> {
		let db = self.conn.as_ptr();
		let base = self.sql.as_ptr();
		let start = base.wrapping_add(self.offset);
		let mut stmt = std::ptr::null_mut();
		let mut tail: *const c_char = std::ptr::null();

		retry::run(
			self.conn,
			self.policy,
			|| unsafe { ffi::sqlite3_prepare_v3(db, start, -1, 0, &raw mut stmt, &raw mut tail) },
			|| {},
		)?;

		let end = self.sql.as_bytes().len();
		let next = if tail.is_null() { end } else { tail.addr().saturating_sub(base.addr()).min(end) };
		// An empty compile that consumed nothing would loop forever.
		self.offset = if stmt.is_null() && next <= self.offset { end } else { next };

		Ok(Statement::from_raw(self.conn, stmt))
	}
}

impl<'conn> Iterator for BatchCompiler<'conn> {
	type Item = Result<Statement<'conn>>;

	fn next(&mut self) -> Option<Self::Item> {
		while !self.is_exhausted() {
			match self.compile_next() {
				Ok(Some(stmt)) => {
					tracing::debug!(sql = ?stmt.sql(), remaining = self.remaining().len(), "compiled statement");
					return Some(Ok(stmt));
				}
				Ok(None) => {}
				Err(err) => {
					self.offset = self.sql.as_bytes().len();
					return Some(Err(err));
				}
			}
		}
		None
	}
}
