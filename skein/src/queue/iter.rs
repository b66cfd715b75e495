// src/queue/iter.rs

use super::{LinkedQueue, Node};

use crossbeam_epoch::{self as epoch, Guard, Shared};
use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering;

/// Weakly consistent iterator over a [`LinkedQueue`], yielding clones.
///
/// The iterator keeps the current thread pinned for as long as it is alive,
/// which holds back memory reclamation for the whole process. Keep it
/// short-lived.
pub struct Iter<'a, T> {
  queue: &'a LinkedQueue<T>,
  guard: Guard,
  /// Node of the last yielded element; null before the first call.
  last: *const Node<T>,
  done: bool,
}

impl<'a, T> Iter<'a, T> {
  pub(super) fn new(queue: &'a LinkedQueue<T>) -> Self {
    Iter {
      queue,
      guard: epoch::pin(),
      last: ptr::null(),
      done: false,
    }
  }
}

impl<'a, T: Clone + Sync> Iterator for Iter<'a, T> {
  type Item = T;

  fn next(&mut self) -> Option<T> {
    if self.done {
      return None;
    }
    let guard = &self.guard;
    let mut p: Shared<'_, Node<T>> = if self.last.is_null() {
      self.queue.first(guard)
    } else {
      // The guard has been held since `last` was read, so it is still
      // allocated even if it has been retired since.
      self.queue.succ(Shared::from(self.last), guard)
    };

    while !p.is_null() {
      let item = unsafe { p.deref() }.item.load(Ordering::Acquire, guard);
      if !item.is_null() {
        if let Some(value) = unsafe { item.deref() }.inspect(T::clone) {
          self.last = p.as_raw();
          return Some(value);
        }
      }
      p = self.queue.succ(p, guard);
    }
    self.done = true;
    None
  }
}

impl<T> fmt::Debug for Iter<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Iter").field("done", &self.done).finish()
  }
}
