//! Utilities for synchronous blocking and parking.
//! Minimal helpers around std::thread::park/unpark; the collections manage
//! their own wait state.

use std::thread;
use std::time::{Duration, Instant};

/// Parks the current thread.
#[inline]
pub(crate) fn park_thread() {
  thread::park();
}

/// Parks the current thread for a given duration.
#[inline]
pub(crate) fn park_thread_timeout(duration: Duration) {
  thread::park_timeout(duration);
}

/// Unparks the given thread.
#[inline]
pub(crate) fn unpark_thread(thread: &thread::Thread) {
  thread.unpark();
}

/// Time left until `deadline`, or zero once it has passed.
#[inline]
pub(crate) fn remaining(deadline: Instant) -> Duration {
  deadline.saturating_duration_since(Instant::now())
}

/// Converts a relative timeout into a deadline. Timeouts too large to
/// represent are treated as no deadline at all.
#[inline]
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
  Instant::now().checked_add(timeout)
}
