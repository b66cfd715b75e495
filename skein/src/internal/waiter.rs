// src/internal/waiter.rs

//! Parked-thread slot embedded in every node that can be waited on.

use crate::sync_util;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread::{self, Thread};

/// Holds the handle of the thread waiting on a node, if any.
///
/// The waiter registers before it re-checks its node and parks; the thread
/// that completes the node changes the node first and then calls `wake`.
/// Both sides use sequentially consistent operations, so either the waiter
/// sees the change or the waker sees the handle.
pub(crate) struct WaiterSlot {
  thread: AtomicPtr<Thread>,
}

impl WaiterSlot {
  pub(crate) const fn new() -> Self {
    WaiterSlot {
      thread: AtomicPtr::new(ptr::null_mut()),
    }
  }

  pub(crate) fn is_registered(&self) -> bool {
    !self.thread.load(Ordering::SeqCst).is_null()
  }

  /// Publishes the current thread as the one to wake.
  pub(crate) fn register(&self) {
    let handle = Box::into_raw(Box::new(thread::current()));
    let prev = self.thread.swap(handle, Ordering::SeqCst);
    if !prev.is_null() {
      // SAFETY: non-null values in the slot always come from Box::into_raw.
      drop(unsafe { Box::from_raw(prev) });
    }
  }

  /// Withdraws the registration without waking anyone.
  pub(crate) fn clear(&self) {
    let prev = self.thread.swap(ptr::null_mut(), Ordering::SeqCst);
    if !prev.is_null() {
      drop(unsafe { Box::from_raw(prev) });
    }
  }

  /// Wakes the registered thread, if any.
  pub(crate) fn wake(&self) {
    let prev = self.thread.swap(ptr::null_mut(), Ordering::SeqCst);
    if !prev.is_null() {
      let handle = unsafe { Box::from_raw(prev) };
      sync_util::unpark_thread(&handle);
    }
  }
}

impl Drop for WaiterSlot {
  fn drop(&mut self) {
    let prev = *self.thread.get_mut();
    if !prev.is_null() {
      drop(unsafe { Box::from_raw(prev) });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use std::sync::Arc;
  use std::time::Duration;

  #[test]
  fn wake_unparks_registered_thread() {
    let slot = Arc::new(WaiterSlot::new());
    let done = Arc::new(AtomicBool::new(false));

    let handle = {
      let slot = slot.clone();
      let done = done.clone();
      thread::spawn(move || {
        slot.register();
        while !done.load(Ordering::SeqCst) {
          thread::park_timeout(Duration::from_millis(100));
        }
      })
    };

    while !slot.is_registered() {
      thread::yield_now();
    }
    done.store(true, Ordering::SeqCst);
    slot.wake();
    handle.join().unwrap();
    assert!(!slot.is_registered());
  }
}
