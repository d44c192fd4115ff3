use std::env;
use std::path::PathBuf;

fn main() {
	let bundled = env::var_os("CARGO_FEATURE_BUNDLED_SQLITE").is_some();

	match bundled {
		true => build_bundled(),
		false => link_system(),
	}
}

fn build_bundled() {
	let manifest_dir =
		PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
	let sqlite_dir = manifest_dir.join("..").join("..").join("sqlite3");
	let sqlite_c = sqlite_dir.join("sqlite3.c");

	assert!(
		sqlite_c.exists(),
		"missing bundled SQLite amalgamation at {} (download it or build without bundled-sqlite)",
		sqlite_c.display()
	);

	println!("cargo:rerun-if-changed={}", sqlite_c.display());
	println!("cargo:rerun-if-env-changed=LIBSQLITE3_FLAGS");

	let mut build = cc::Build::new();
	build.file(&sqlite_c).include(&sqlite_dir).warnings(false);

	// Shared-cache lock waits depend on unlock-notify, so it is not optional here.
	for (name, value) in [
		("SQLITE_CORE", None),
		("SQLITE_ENABLE_API_ARMOR", None),
		("SQLITE_ENABLE_COLUMN_METADATA", None),
		("SQLITE_ENABLE_UNLOCK_NOTIFY", None),
		("SQLITE_THREADSAFE", Some("1")),
		("SQLITE_USE_URI", None),
		("HAVE_ISNAN", None),
		("HAVE_USLEEP", Some("1")),
		("_POSIX_THREAD_SAFE_FUNCTIONS", None),
	] {
		build.define(name, value);
	}

	if !env::var("CARGO_CFG_WINDOWS").is_ok_and(|v| !v.is_empty()) {
		build.define("HAVE_LOCALTIME_R", None);
	}

	// Extra compile-time options, e.g. `LIBSQLITE3_FLAGS="-DSQLITE_MAX_VARIABLE_NUMBER=1000"`.
	if let Ok(extras) = env::var("LIBSQLITE3_FLAGS") {
		for define in extras.split_whitespace().filter_map(|extra| extra.strip_prefix("-D")) {
			define_flag(&mut build, define);
		}
	}

	build.compile("sqlite3");
}

fn link_system() {
	let linked = pkg_config::Config::new()
		.atleast_version("3.37.0")
		.print_system_libs(false)
		.probe("sqlite3")
		.is_ok();

	if !linked {
		println!("cargo:rustc-link-lib=dylib=sqlite3");
	}
}

fn define_flag(build: &mut cc::Build, define: &str) {
	if let Some((name, value)) = define.split_once('=') {
		build.define(name, Some(value));
	} else {
		build.define(define, None);
	}
}
