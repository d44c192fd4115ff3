//! Batch execution for SQLite with lock-aware retries.
//!
//! A [`Command`] splits its text into statements, binds a shared
//! [`ParameterSet`], runs mutating statements to completion and hands the
//! read-only ones to a lazy [`DataReader`]. Steps that hit a conflicting lock
//! in a shared cache park on SQLite's unlock notification instead of polling.

mod batch;
mod command;
mod connection;
mod error;
mod params;
mod reader;
mod retry;
mod statement;
mod unlock;

pub use lockstep_sqlite_ffi::ffi;
pub use lockstep_sqlite_ffi::raw;

pub use command::Command;
pub use connection::{CacheMode, Connection, ConnectionOptions};
pub use error::{COMMAND_TIMEOUT_MESSAGE, Error, Result};
pub use params::{Parameter, ParameterKey, ParameterSet};
pub use reader::DataReader;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Integer(i64),
	Float(f64),
	Text(String),
	Blob(Vec<u8>),
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Integer(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Self::Integer(i64::from(value))
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Self::Integer(i64::from(value))
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::Text(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}

impl From<&[u8]> for Value {
	fn from(value: &[u8]) -> Self {
		Self::Blob(value.to_vec())
	}
}

impl From<Vec<u8>> for Value {
	fn from(value: Vec<u8>) -> Self {
		Self::Blob(value)
	}
}

impl<T: Into<Self>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Null, Into::into)
	}
}

pub fn sqlite_lib_version() -> String {
	lockstep_sqlite_ffi::sqlite_lib_version()
}

pub fn sqlite_lib_version_number() -> i32 {
	lockstep_sqlite_ffi::sqlite_lib_version_number()
}

pub fn sqlite_source_id() -> String {
	lockstep_sqlite_ffi::sqlite_source_id()
}

pub fn sqlite_error_string(code: core::ffi::c_int) -> String {
	lockstep_sqlite_ffi::sqlite_error_string(code)
}

pub fn sqlite_compile_option_used(name: &str) -> bool {
	lockstep_sqlite_ffi::sqlite_compile_option_used(name)
}

pub fn sqlite_compile_options() -> Vec<String> {
	lockstep_sqlite_ffi::sqlite_compile_options()
}
