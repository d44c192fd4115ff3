//! Retry loop around native calls that can report "locked" or "busy".
//!
//! "Locked" from a shared cache means another connection holds a conflicting
//! lock. SQLite can tell us when it clears, so the loop parks on an
//! [`UnlockWaiter`] until then. Plain "locked" means a pending statement on the
//! same connection is in the way; only the blocked thread could finish it, so
//! there is nothing to wait for. "Busy" is a file-level conflict with no
//! notification; it is retried only within the connection's busy budget and
//! otherwise surfaced as-is.

use core::ffi::c_int;
use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::error::{Error, Result, primary_code};
use crate::ffi;
use crate::unlock::{UnlockWaiter, WaitOutcome};

const BUSY_BACKOFF_START: Duration = Duration::from_millis(1);
const BUSY_BACKOFF_MAX: Duration = Duration::from_millis(50);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct RetryPolicy {
	/// Zero means no deadline.
	pub(crate) timeout: Duration,
	pub(crate) busy_retries: u32,
	/// Whether a call that hit a lock may be rearmed and repeated.
	pub(crate) restartable: bool,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(Duration::ZERO, 0)
	}
}

impl RetryPolicy {
	pub(crate) const fn new(timeout: Duration, busy_retries: u32) -> Self {
		Self { timeout, busy_retries, restartable: true }
	}

	/// Same policy, but a lock is surfaced instead of restarting the call.
	#[must_use]
	pub(crate) const fn without_restart(mut self) -> Self {
		self.restartable = false;
		self
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
	pub(crate) fn after(timeout: Duration) -> Self {
		if timeout.is_zero() { Self(None) } else { Self(Instant::now().checked_add(timeout)) }
	}

	pub(crate) fn expired(self) -> bool {
		self.0.is_some_and(|deadline| Instant::now() >= deadline)
	}

	/// Time left before the deadline; `None` when there is no deadline.
	pub(crate) fn remaining(self) -> Option<Duration> {
		self.0.map(|deadline| deadline.saturating_duration_since(Instant::now()))
	}
}

/// Runs `attempt` until it returns something other than locked or busy.
///
/// `rearm` runs after an unlock notification and before the next attempt; for
/// statements it resets the VM. Returns the final `SQLITE_OK`, `SQLITE_ROW` or
/// `SQLITE_DONE` code, and turns every other code into an error.
pub(crate) fn run(
	conn: &Connection,
	policy: RetryPolicy,
	mut attempt: impl FnMut() -> c_int,
	mut rearm: impl FnMut(),
) -> Result<c_int> {
	let deadline = Deadline::after(policy.timeout);
	let mut busy_attempts = 0_u32;
	let mut backoff = BUSY_BACKOFF_START;

	loop {
		let code = attempt();
		match primary_code(code) {
			ffi::SQLITE_OK | ffi::SQLITE_ROW | ffi::SQLITE_DONE => return Ok(code),
			ffi::SQLITE_LOCKED => {
				if !policy.restartable {
					tracing::debug!(code, "lock hit after rows were produced, not restarting");
					return Err(conn.error(code));
				}
				if code != ffi::SQLITE_LOCKED_SHAREDCACHE {
					return held_by_same_connection(conn, code, policy, deadline);
				}
				if deadline.expired() {
					tracing::warn!(timeout = ?policy.timeout, "command deadline passed while locked");
					return Err(Error::Timeout);
				}

				match wait_for_unlock(conn, deadline)? {
					WaitOutcome::Signaled => rearm(),
					WaitOutcome::TimedOut => {
						tracing::warn!(timeout = ?policy.timeout, "timed out waiting for unlock notification");
						return Err(Error::Timeout);
					}
				}
			}
			ffi::SQLITE_BUSY => {
				if busy_attempts >= policy.busy_retries || deadline.expired() {
					return Err(conn.error(code));
				}
				busy_attempts += 1;

				let pause = deadline.remaining().map_or(backoff, |remaining| remaining.min(backoff));
				tracing::trace!(attempt = busy_attempts, ?pause, "database busy, backing off");
				std::thread::sleep(pause);
				backoff = (backoff * 2).min(BUSY_BACKOFF_MAX);
			}
			_ => return Err(conn.error(code)),
		}
	}
}

/// No other connection will release this lock, so an unlock notification would
/// fire straight away. Block out the deadline, or fail at once without one.
fn held_by_same_connection(
	conn: &Connection,
	code: c_int,
	policy: RetryPolicy,
	deadline: Deadline,
) -> Result<c_int> {
	match deadline.remaining() {
		None => {
			tracing::warn!(code, "locked by a pending statement on the same connection");
			Err(conn.error(code))
		}
		Some(remaining) => {
			std::thread::sleep(remaining);
			tracing::warn!(
				timeout = ?policy.timeout,
				"command deadline passed while locked by the same connection"
			);
			Err(Error::Timeout)
		}
	}
}

fn wait_for_unlock(conn: &Connection, deadline: Deadline) -> Result<WaitOutcome> {
	let waiter = UnlockWaiter::new();
	if let Err(err) = conn.register_unlock_notify(&waiter) {
		tracing::warn!(%err, "unlock notification refused");
		return Err(err);
	}

	let outcome = if waiter.is_signaled() {
		tracing::trace!("lock already released");
		waiter.wait(Some(Duration::ZERO))
	} else {
		waiter.wait(deadline.remaining())
	};

	// No callback may be outstanding once the waiter is dropped.
	conn.cancel_unlock_notify();
	Ok(outcome)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;

	fn policy(timeout: Duration, busy_retries: u32) -> RetryPolicy {
		RetryPolicy::new(timeout, busy_retries)
	}

	#[test]
	fn zero_timeout_has_no_deadline() {
		let deadline = Deadline::after(Duration::ZERO);
		assert!(!deadline.expired());
		assert_eq!(deadline.remaining(), None);
	}

	#[test]
	fn deadline_expires() {
		let deadline = Deadline::after(Duration::from_millis(1));
		std::thread::sleep(Duration::from_millis(5));
		assert!(deadline.expired());
		assert_eq!(deadline.remaining(), Some(Duration::ZERO));
	}

	#[test]
	fn success_codes_pass_through() {
		let db = Connection::open_in_memory().expect("open memory database");
		for code in [ffi::SQLITE_OK, ffi::SQLITE_ROW, ffi::SQLITE_DONE] {
			let result = run(&db, policy(Duration::ZERO, 0), || code, || {});
			assert_eq!(result, Ok(code));
		}
	}

	#[test]
	fn other_errors_are_not_retried() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::from_secs(5), 10),
			|| {
				calls.set(calls.get() + 1);
				ffi::SQLITE_MISUSE
			},
			|| {},
		);
		assert_eq!(calls.get(), 1);
		assert_eq!(result.expect_err("misuse surfaces").sqlite_code(), Some(ffi::SQLITE_MISUSE));
	}

	#[test]
	fn busy_surfaces_immediately_without_budget() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::from_secs(5), 0),
			|| {
				calls.set(calls.get() + 1);
				ffi::SQLITE_BUSY
			},
			|| {},
		);
		assert_eq!(calls.get(), 1);
		assert_eq!(result.expect_err("busy surfaces").sqlite_code(), Some(ffi::SQLITE_BUSY));
	}

	#[test]
	fn busy_is_retried_within_budget() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::ZERO, 3),
			|| {
				calls.set(calls.get() + 1);
				if calls.get() < 3 { ffi::SQLITE_BUSY } else { ffi::SQLITE_DONE }
			},
			|| {},
		);
		assert_eq!(result, Ok(ffi::SQLITE_DONE));
		assert_eq!(calls.get(), 3);
	}

	#[test]
	fn busy_budget_exhaustion_reports_busy() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::ZERO, 2),
			|| {
				calls.set(calls.get() + 1);
				ffi::SQLITE_BUSY
			},
			|| {},
		);
		assert_eq!(calls.get(), 3);
		assert_eq!(result.expect_err("busy surfaces").sqlite_code(), Some(ffi::SQLITE_BUSY));
	}

	#[test]
	fn locked_without_blocker_retries_after_rearm() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let rearms = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::from_secs(5), 0),
			|| {
				calls.set(calls.get() + 1);
				if calls.get() == 1 { ffi::SQLITE_LOCKED_SHAREDCACHE } else { ffi::SQLITE_ROW }
			},
			|| rearms.set(rearms.get() + 1),
		);
		assert_eq!(result, Ok(ffi::SQLITE_ROW));
		assert_eq!(calls.get(), 2);
		assert_eq!(rearms.get(), 1);
	}

	#[test]
	fn same_connection_lock_blocks_until_deadline() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let started = Instant::now();
		let result = run(
			&db,
			policy(Duration::from_millis(50), 0),
			|| {
				calls.set(calls.get() + 1);
				ffi::SQLITE_LOCKED
			},
			|| {},
		);
		assert_eq!(result, Err(Error::Timeout));
		assert!(started.elapsed() >= Duration::from_millis(50));
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn same_connection_lock_without_deadline_fails_at_once() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::ZERO, 0),
			|| {
				calls.set(calls.get() + 1);
				ffi::SQLITE_LOCKED
			},
			|| {},
		);
		assert_eq!(calls.get(), 1);
		assert_eq!(result.expect_err("locked surfaces").sqlite_code(), Some(ffi::SQLITE_LOCKED));
	}

	#[test]
	fn shared_cache_lock_times_out() {
		let db = Connection::open_in_memory().expect("open memory database");
		let started = Instant::now();
		let result =
			run(&db, policy(Duration::from_millis(50), 0), || ffi::SQLITE_LOCKED_SHAREDCACHE, || {});
		assert_eq!(result, Err(Error::Timeout));
		assert!(started.elapsed() >= Duration::from_millis(50));
	}

	#[test]
	fn lock_is_surfaced_when_restart_is_disabled() {
		let db = Connection::open_in_memory().expect("open memory database");
		let calls = Cell::new(0);
		let rearms = Cell::new(0);
		let result = run(
			&db,
			policy(Duration::from_secs(5), 0).without_restart(),
			|| {
				calls.set(calls.get() + 1);
				ffi::SQLITE_LOCKED_SHAREDCACHE
			},
			|| rearms.set(rearms.get() + 1),
		);
		assert_eq!(calls.get(), 1);
		assert_eq!(rearms.get(), 0);
		assert_eq!(result.expect_err("locked surfaces").sqlite_code(), Some(ffi::SQLITE_LOCKED));
	}
}
