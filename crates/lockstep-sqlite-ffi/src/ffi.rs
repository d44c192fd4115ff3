use core::ffi::{c_char, c_int, c_uchar, c_void};

pub type Sqlite3Int64 = i64;
pub type Sqlite3UInt64 = u64;
pub type Sqlite3DestructorType = Option<unsafe extern "C" fn(*mut c_void)>;

pub const SQLITE_OK: c_int = 0;
pub const SQLITE_ERROR: c_int = 1;
pub const SQLITE_BUSY: c_int = 5;
pub const SQLITE_LOCKED: c_int = 6;
pub const SQLITE_MISUSE: c_int = 21;
pub const SQLITE_ROW: c_int = 100;
pub const SQLITE_DONE: c_int = 101;

pub const SQLITE_LOCKED_SHAREDCACHE: c_int = SQLITE_LOCKED | (1 << 8);

pub const SQLITE_INTEGER: c_int = 1;
pub const SQLITE_FLOAT: c_int = 2;
pub const SQLITE_TEXT: c_int = 3;
pub const SQLITE_BLOB: c_int = 4;
pub const SQLITE_NULL: c_int = 5;

pub const SQLITE_UTF8: c_uchar = 1;

pub const SQLITE_OPEN_READWRITE: c_int = 0x0000_0002;
pub const SQLITE_OPEN_CREATE: c_int = 0x0000_0004;
pub const SQLITE_OPEN_URI: c_int = 0x0000_0040;
pub const SQLITE_OPEN_NOMUTEX: c_int = 0x0000_8000;
pub const SQLITE_OPEN_SHAREDCACHE: c_int = 0x0002_0000;
pub const SQLITE_OPEN_PRIVATECACHE: c_int = 0x0004_0000;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Sqlite3 {
	_unused: [u8; 0],
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct Sqlite3Stmt {
	_unused: [u8; 0],
}

unsafe extern "C" {
	pub fn sqlite3_libversion_number() -> c_int;
	pub fn sqlite3_libversion() -> *const c_char;
	pub fn sqlite3_sourceid() -> *const c_char;
	pub fn sqlite3_compileoption_used(name: *const c_char) -> c_int;
	pub fn sqlite3_compileoption_get(n: c_int) -> *const c_char;
	pub fn sqlite3_open_v2(
		filename: *const c_char,
		pp_db: *mut *mut Sqlite3,
		flags: c_int,
		z_vfs: *const c_char,
	) -> c_int;
	pub fn sqlite3_close_v2(db: *mut Sqlite3) -> c_int;
	pub fn sqlite3_busy_timeout(db: *mut Sqlite3, ms: c_int) -> c_int;
	pub fn sqlite3_changes64(db: *mut Sqlite3) -> Sqlite3Int64;
	pub fn sqlite3_total_changes64(db: *mut Sqlite3) -> Sqlite3Int64;
	pub fn sqlite3_errmsg(db: *mut Sqlite3) -> *const c_char;
	pub fn sqlite3_errstr(code: c_int) -> *const c_char;
	pub fn sqlite3_extended_result_codes(db: *mut Sqlite3, onoff: c_int) -> c_int;
	pub fn sqlite3_prepare_v3(
		db: *mut Sqlite3,
		z_sql: *const c_char,
		n_byte: c_int,
		prep_flags: u32,
		pp_stmt: *mut *mut Sqlite3Stmt,
		pz_tail: *mut *const c_char,
	) -> c_int;
	pub fn sqlite3_step(p_stmt: *mut Sqlite3Stmt) -> c_int;
	pub fn sqlite3_finalize(p_stmt: *mut Sqlite3Stmt) -> c_int;
	pub fn sqlite3_reset(p_stmt: *mut Sqlite3Stmt) -> c_int;
	pub fn sqlite3_stmt_readonly(p_stmt: *mut Sqlite3Stmt) -> c_int;
	pub fn sqlite3_sql(p_stmt: *mut Sqlite3Stmt) -> *const c_char;
	pub fn sqlite3_bind_parameter_count(p_stmt: *mut Sqlite3Stmt) -> c_int;
	pub fn sqlite3_bind_parameter_name(p_stmt: *mut Sqlite3Stmt, i: c_int) -> *const c_char;
	pub fn sqlite3_bind_parameter_index(p_stmt: *mut Sqlite3Stmt, z_name: *const c_char) -> c_int;
	pub fn sqlite3_bind_null(p_stmt: *mut Sqlite3Stmt, i: c_int) -> c_int;
	pub fn sqlite3_bind_int64(p_stmt: *mut Sqlite3Stmt, i: c_int, value: Sqlite3Int64) -> c_int;
	pub fn sqlite3_bind_double(p_stmt: *mut Sqlite3Stmt, i: c_int, value: f64) -> c_int;
	pub fn sqlite3_bind_text64(
		p_stmt: *mut Sqlite3Stmt,
		i: c_int,
		value: *const c_char,
		n: Sqlite3UInt64,
		destructor: Sqlite3DestructorType,
		encoding: c_uchar,
	) -> c_int;
	pub fn sqlite3_bind_blob64(
		p_stmt: *mut Sqlite3Stmt,
		i: c_int,
		value: *const c_void,
		n: Sqlite3UInt64,
		destructor: Sqlite3DestructorType,
	) -> c_int;
	pub fn sqlite3_column_count(p_stmt: *mut Sqlite3Stmt) -> c_int;
	pub fn sqlite3_column_name(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> *const c_char;
	pub fn sqlite3_column_type(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> c_int;
	pub fn sqlite3_column_int64(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> Sqlite3Int64;
	pub fn sqlite3_column_double(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> f64;
	pub fn sqlite3_column_text(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> *const c_uchar;
	pub fn sqlite3_column_blob(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> *const c_void;
	pub fn sqlite3_column_bytes(p_stmt: *mut Sqlite3Stmt, i_col: c_int) -> c_int;
}
