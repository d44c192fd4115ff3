//! Symbols that only exist when SQLite is compiled with optional features.
//!
//! `sqlite3_unlock_notify` requires `SQLITE_ENABLE_UNLOCK_NOTIFY`. Linking fails
//! against a library built without it.

use core::ffi::{c_int, c_void};

pub use crate::ffi::*;

/// `void xNotify(void **apArg, int nArg)`
pub type Sqlite3UnlockNotifyCallback = Option<unsafe extern "C" fn(*mut *mut c_void, c_int)>;

unsafe extern "C" {
	pub fn sqlite3_unlock_notify(
		p_blocked: *mut Sqlite3,
		x_notify: Sqlite3UnlockNotifyCallback,
		p_notify_arg: *mut c_void,
	) -> c_int;
}
