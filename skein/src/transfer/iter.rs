// src/transfer/iter.rs

use super::list::Node;
use super::TransferQueue;

use crossbeam_epoch::{self as epoch, Guard, Shared};
use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering;

/// Weakly consistent iterator over a [`TransferQueue`], yielding clones of
/// the queued elements.
///
/// Like the other iterators in this crate it keeps the thread pinned while
/// alive. Unlinked nodes stay readable while pinned, so the iterator follows
/// their links instead of restarting.
pub struct Iter<'a, T> {
  queue: &'a TransferQueue<T>,
  guard: Guard,
  last: *const Node<T>,
  done: bool,
}

impl<'a, T> Iter<'a, T> {
  pub(super) fn new(queue: &'a TransferQueue<T>) -> Self {
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
    let list = &self.queue.list;
    let mut p: Shared<'_, Node<T>> = if self.last.is_null() {
      list.first(guard)
    } else {
      let last = unsafe { &*self.last };
      last.next.load(Ordering::Acquire, guard).with_tag(0)
    };

    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      if p_ref.is_data {
        let item = p_ref.item.load(Ordering::Acquire, guard);
        if !item.is_null() {
          if let Some(value) = unsafe { item.deref() }.inspect(T::clone) {
            self.last = p.as_raw();
            return Some(value);
          }
        }
      } else if !p_ref.is_matched(guard) {
        // Waiting consumers mean nothing is queued behind them.
        break;
      }
      p = p_ref.next.load(Ordering::Acquire, guard).with_tag(0);
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
