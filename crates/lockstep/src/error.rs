use core::ffi::c_int;
use std::ffi::CStr;

use thiserror::Error;

use crate::ffi;

/// Text of [`Error::Timeout`].
pub const COMMAND_TIMEOUT_MESSAGE: &str = "Command timed out.";

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
	/// A result code reported by SQLite. `code` is the primary code.
	#[error("SQLite Error {code}: '{message}'.")]
	Sqlite { code: c_int, extended_code: c_int, message: String },

	/// A locked table or schema did not become available before the command deadline.
	#[error("{}", COMMAND_TIMEOUT_MESSAGE)]
	Timeout,

	#[error("Must add values for the following parameters: {names}")]
	MissingParameters { names: String },

	#[error("{message}")]
	Misuse { message: String },

	#[error("The operation was cancelled.")]
	Cancelled,
}

impl Error {
	pub(crate) fn misuse(message: impl Into<String>) -> Self {
		Self::Misuse { message: message.into() }
	}

	/// Primary SQLite result code, for native errors.
	pub const fn sqlite_code(&self) -> Option<c_int> {
		match self {
			Self::Sqlite { code, .. } => Some(*code),
			_ => None,
		}
	}

	pub const fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout)
	}
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) const fn primary_code(code: c_int) -> c_int {
	code & 0xff
}

pub(crate) fn sqlite_error(db: *mut ffi::Sqlite3, code: c_int) -> Error {
	Error::Sqlite { code: primary_code(code), extended_code: code, message: db_error_message(db, code) }
}

pub(crate) fn check_ok(db: *mut ffi::Sqlite3, code: c_int) -> Result<()> {
	if code == ffi::SQLITE_OK { Ok(()) } else { Err(sqlite_error(db, code)) }
}

fn db_error_message(db: *mut ffi::Sqlite3, code: c_int) -> String {
	if db.is_null() {
		return lockstep_sqlite_ffi::sqlite_error_string(code);
	}

	let message_ptr = unsafe { ffi::sqlite3_errmsg(db) };
	if message_ptr.is_null() {
		return lockstep_sqlite_ffi::sqlite_error_string(code);
	}

	unsafe { CStr::from_ptr(message_ptr).to_string_lossy().into_owned() }
}
