//! Suspends a thread until SQLite reports that a blocking lock was released.
//!
//! SQLite calls the unlock-notify callback from whichever thread concludes the
//! blocking transaction, handing back an opaque context pointer. The pointer
//! carries a registry token instead of an address, so a callback that arrives
//! after its waiter is gone finds nothing and does nothing.

use core::ffi::c_void;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

static WAITERS: LazyLock<Mutex<HashMap<usize, Arc<Signal>>>> = LazyLock::new(Mutex::default);
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum WaitOutcome {
	Signaled,
	TimedOut,
}

/// Auto-reset event: a successful wait consumes the signal.
#[derive(Debug, Default)]
struct Signal {
	fired: Mutex<bool>,
	cond: Condvar,
}

impl Signal {
	fn set(&self) {
		*lock(&self.fired) = true;
		self.cond.notify_one();
	}

	fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
		let mut fired = lock(&self.fired);
		let deadline = timeout.map(|timeout| Instant::now() + timeout);

		while !*fired {
			match deadline {
				None => {
					fired = self.cond.wait(fired).unwrap_or_else(PoisonError::into_inner);
				}
				Some(deadline) => {
					let now = Instant::now();
					if now >= deadline {
						return WaitOutcome::TimedOut;
					}
					fired = self
						.cond
						.wait_timeout(fired, deadline - now)
						.unwrap_or_else(PoisonError::into_inner)
						.0;
				}
			}
		}

		*fired = false;
		WaitOutcome::Signaled
	}

	fn is_set(&self) -> bool {
		*lock(&self.fired)
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One blocked native call's wait handle. Registered on creation, unregistered on drop.
#[derive(Debug)]
pub(crate) struct UnlockWaiter {
	token: usize,
	signal: Arc<Signal>,
}

impl UnlockWaiter {
	pub(crate) fn new() -> Self {
		let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
		let signal = Arc::new(Signal::default());
		lock(&WAITERS).insert(token, Arc::clone(&signal));
		Self { token, signal }
	}

	/// Context pointer handed to `sqlite3_unlock_notify`.
	pub(crate) fn context(&self) -> *mut c_void {
		std::ptr::without_provenance_mut(self.token)
	}

	/// Wakes the waiter registered under `context`, if it still exists.
	pub(crate) fn signal_context(context: *mut c_void) {
		let signal = lock(&WAITERS).get(&context.addr()).cloned();
		match signal {
			Some(signal) => signal.set(),
			None => tracing::trace!(token = context.addr(), "unlock notification for a retired waiter"),
		}
	}

	/// Blocks until signaled or until `timeout` elapses. `None` waits indefinitely.
	pub(crate) fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
		let outcome = self.signal.wait(timeout);
		tracing::trace!(token = self.token, ?outcome, "unlock wait finished");
		outcome
	}

	pub(crate) fn is_signaled(&self) -> bool {
		self.signal.is_set()
	}
}

impl Drop for UnlockWaiter {
	fn drop(&mut self) {
		lock(&WAITERS).remove(&self.token);
	}
}
