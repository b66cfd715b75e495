// src/deque/iter.rs

use super::node::{is_terminated, release, Node};
use super::{End, LinkedDeque};

use crossbeam_epoch::{self as epoch, Shared};
use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering;

/// Weakly consistent iterator over a [`LinkedDeque`], yielding clones.
///
/// The iterator holds a count on the node it last yielded rather than
/// pinning the thread, so it may be kept across long pauses. If that node is
/// cut out of the deque meanwhile, iteration resumes from the end it started
/// at and skips everything already passed.
pub struct Iter<'a, T> {
  deque: &'a LinkedDeque<T>,
  from: End,
  /// Counted node of the last yielded element.
  cursor: *const Node<T>,
  /// Position of the last yielded element.
  last_seq: Option<i64>,
  done: bool,
}

impl<'a, T> Iter<'a, T> {
  pub(super) fn new(deque: &'a LinkedDeque<T>, from: End) -> Self {
    Iter {
      deque,
      from,
      cursor: ptr::null(),
      last_seq: None,
      done: false,
    }
  }

  /// True if a node at position `seq` lies beyond the last yielded element.
  fn is_ahead(&self, seq: i64) -> bool {
    match (self.last_seq, self.from) {
      (None, _) => true,
      (Some(last), End::Front) => seq > last,
      (Some(last), End::Back) => seq < last,
    }
  }

  fn release_cursor(&mut self) {
    if !self.cursor.is_null() {
      let guard = &epoch::pin();
      unsafe { release(Shared::from(self.cursor), guard) };
      self.cursor = ptr::null();
    }
  }
}

impl<'a, T: Clone + Sync> Iterator for Iter<'a, T> {
  type Item = T;

  fn next(&mut self) -> Option<T> {
    if self.done {
      return None;
    }
    let toward = self.from.opposite();
    let guard = epoch::pin();

    let mut p: Shared<'_, Node<T>> = if self.cursor.is_null() {
      self.deque.end_node(self.from, &guard)
    } else {
      // SAFETY: the cursor holds a count, so the node is still allocated.
      let q = toward
        .outward(unsafe { &*self.cursor })
        .load(Ordering::Acquire, &guard);
      if is_terminated(q) {
        self.deque.end_node(self.from, &guard)
      } else {
        q
      }
    };

    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      if self.is_ahead(p_ref.seq) {
        let item = p_ref.item.load(Ordering::Acquire, &guard);
        if !item.is_null() {
          if let Some(value) = unsafe { item.deref() }.inspect(T::clone) {
            let seq = p_ref.seq;
            let raw = p.as_raw();
            let held = p_ref.try_acquire();
            drop(guard);
            self.release_cursor();
            // A node that could not be held resumes from the start next time.
            self.cursor = if held { raw } else { ptr::null() };
            self.last_seq = Some(seq);
            return Some(value);
          }
        }
      }
      let q = toward.outward(p_ref).load(Ordering::Acquire, &guard);
      p = if is_terminated(q) {
        self.deque.end_node(self.from, &guard)
      } else {
        q
      };
    }

    drop(guard);
    self.release_cursor();
    self.done = true;
    None
  }
}

impl<T> Drop for Iter<'_, T> {
  fn drop(&mut self) {
    self.release_cursor();
  }
}

impl<T> fmt::Debug for Iter<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Iter")
      .field("from", &self.from)
      .field("last_seq", &self.last_seq)
      .field("done", &self.done)
      .finish()
  }
}
