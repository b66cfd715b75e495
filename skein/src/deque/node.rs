// src/deque/node.rs

//! Deque nodes and their link discipline.
//!
//! A deque link (`prev`, `next`, `head`, `tail`) holds one of three things:
//! a node, a plain null meaning "this end of the list", or a null tagged
//! [`TERMINATOR`] meaning the node has been cut out of the list on that side.
//!
//! Stale CAS attempts can store a pointer to a node that was cut out earlier,
//! so a node cannot be reclaimed just because the algorithm stopped linking
//! to it. Every link holding a node owns one count on it (as do iterators).
//! A node whose count drops to zero has its own links terminated and
//! released and is handed to the epoch collector. Cycles between cut nodes
//! are broken by terminating the whole cut run.

use crate::internal::item::{self, Item};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Tag on a null link: the node has left the list on that side.
pub(crate) const TERMINATOR: usize = 1;

pub(crate) struct Node<T> {
  pub(crate) item: Atomic<Item<T>>,
  pub(crate) prev: Atomic<Node<T>>,
  pub(crate) next: Atomic<Node<T>>,
  refs: AtomicUsize,
  /// Decreases toward the front, increases toward the back.
  pub(crate) seq: i64,
}

impl<T> Node<T> {
  pub(crate) fn dummy() -> Self {
    Node {
      item: Atomic::null(),
      prev: Atomic::null(),
      next: Atomic::null(),
      // Referenced by both head and tail.
      refs: AtomicUsize::new(2),
      seq: 0,
    }
  }

  /// A node about to be linked: the count anticipates the neighbour link
  /// that will point at it once the linking CAS succeeds.
  pub(crate) fn new(value: T) -> Self {
    Node {
      item: Atomic::new(Item::new(value)),
      prev: Atomic::null(),
      next: Atomic::null(),
      refs: AtomicUsize::new(1),
      seq: 0,
    }
  }

  /// Takes a count unless the node is already unreachable.
  pub(crate) fn try_acquire(&self) -> bool {
    let mut count = self.refs.load(Ordering::Relaxed);
    loop {
      if count == 0 {
        return false;
      }
      match self
        .refs
        .compare_exchange_weak(count, count + 1, Ordering::Acquire, Ordering::Relaxed)
      {
        Ok(_) => return true,
        Err(actual) => count = actual,
      }
    }
  }

  #[inline]
  pub(crate) fn has_item(&self, guard: &Guard) -> bool {
    !self.item.load(Ordering::Acquire, guard).is_null()
  }
}

impl<T> Drop for Node<T> {
  fn drop(&mut self) {
    // SAFETY: dropped only once unreachable; an element still present here
    // was never handed to anyone.
    unsafe {
      let item = self.item.load(Ordering::Relaxed, epoch::unprotected());
      if !item.is_null() {
        item::drop_unreachable(item);
      }
    }
  }
}

#[inline]
pub(crate) fn terminator<'g, T>() -> Shared<'g, Node<T>> {
  Shared::null().with_tag(TERMINATOR)
}

/// A plain null link: the node is at that end of the list.
#[inline]
pub(crate) fn is_end<T>(link: Shared<'_, Node<T>>) -> bool {
  link.is_null() && link.tag() == 0
}

#[inline]
pub(crate) fn is_terminated<T>(link: Shared<'_, Node<T>>) -> bool {
  link.is_null() && link.tag() == TERMINATOR
}

/// Drops one count on `node`. The last count terminates and releases the
/// node's own links, cascading, and defers the node's destruction.
///
/// # Safety
/// `node` must be non-null and the caller must own the count it releases.
pub(crate) unsafe fn release<T>(node: Shared<'_, Node<T>>, guard: &Guard) {
  if node.deref().refs.fetch_sub(1, Ordering::AcqRel) != 1 {
    return;
  }
  let mut dead: Vec<*const Node<T>> = vec![node.as_raw()];
  while let Some(raw) = dead.pop() {
    let n: Shared<'_, Node<T>> = Shared::from(raw);
    let n_ref = n.deref();
    for link in [&n_ref.prev, &n_ref.next] {
      let old = link.swap(terminator(), Ordering::AcqRel, guard);
      if !old.is_null() && old.deref().refs.fetch_sub(1, Ordering::AcqRel) == 1 {
        dead.push(old.as_raw());
      }
    }
    guard.defer_destroy(n);
  }
}

/// CAS `link` from `current` to the node `new`, moving a count from the old
/// target to the new one. Fails without effect if `new` is already
/// unreachable.
///
/// # Safety
/// `new` must be non-null and protected by `guard`.
pub(crate) unsafe fn cas_link<'g, T>(
  link: &Atomic<Node<T>>,
  current: Shared<'g, Node<T>>,
  new: Shared<'g, Node<T>>,
  guard: &'g Guard,
) -> bool {
  if !new.deref().try_acquire() {
    return false;
  }
  match link.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire, guard) {
    Ok(_) => {
      if !current.is_null() {
        release(current, guard);
      }
      true
    }
    Err(_) => {
      release(new, guard);
      false
    }
  }
}

/// Terminates both links of every node in a run that has been cut out of the
/// list, releasing what they pointed at.
///
/// # Safety
/// Every pointer in `run` must be protected by `guard`.
pub(crate) unsafe fn terminate_run<T>(run: &[*const Node<T>], guard: &Guard) {
  for &raw in run {
    let node = &*raw;
    for link in [&node.prev, &node.next] {
      let old = link.swap(terminator(), Ordering::AcqRel, guard);
      if !old.is_null() {
        release(old, guard);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossbeam_epoch::Owned;

  #[test]
  fn link_classification() {
    let end: Shared<'_, Node<u8>> = Shared::null();
    assert!(is_end(end));
    assert!(!is_terminated(end));
    let term: Shared<'_, Node<u8>> = terminator();
    assert!(is_terminated(term));
    assert!(!is_end(term));
  }

  #[test]
  fn acquire_fails_once_released() {
    let guard = &epoch::pin();
    let node = Owned::new(Node::new(5u32)).into_shared(guard);
    assert!(unsafe { node.deref() }.try_acquire());
    unsafe { release(node, guard) };
    assert!(unsafe { node.deref() }.try_acquire());
    unsafe {
      release(node, guard);
      release(node, guard);
    }
    // Count reached zero and destruction is deferred; the memory is still
    // valid while pinned.
    assert!(!unsafe { node.deref() }.try_acquire());
  }
}
