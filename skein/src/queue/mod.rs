// src/queue/mod.rs

//! An unbounded, lock-free FIFO queue of linked nodes.
//!
//! The list always holds at least one node. `head` points at the first node
//! (live or a dummy whose element is gone), `tail` lags the true last node by
//! at most a couple of links. Insertion appends with a single CAS on the last
//! node's `next`; removal clears a node's element and lets `head` skip the
//! emptied prefix in batches.
//!
//! Each node carries a sequence number one greater than its predecessor's.
//! The thread whose CAS moves `head` past a run of nodes first makes sure
//! `tail` is no further back than the new head, then retires the run to the
//! epoch collector. Retired nodes are self-linked so that a traversal which
//! was standing on one knows to jump back to `head`.
//!
//! `remove` also splices emptied nodes out from behind a live front. The
//! node's `next` is first frozen with a mark so nothing can be linked past
//! it, then its predecessor is pointed at its successor. Whoever wins that
//! CAS owns the node unless `head` reached it first; the two sides settle it
//! on the node's `next` (a walker's swap against the splicer's bypassed
//! bit). A spliced node is destroyed two grace periods later, which outlasts
//! any stale `head` CAS that was about to land on it. A thread that moves
//! `head` onto a frozen node steps it forward again.

mod iter;

pub use iter::Iter;

use crate::internal::item::{self, Item};
use crate::telemetry;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use std::fmt;
use std::iter::FromIterator;
use std::sync::atomic::Ordering;

/// Tag on `next`: the node is being spliced out and its successor is fixed.
const MARK: usize = 1;
/// Tag on `next`: the splice succeeded and the splicer reclaims the node.
const BYPASSED: usize = 2;

pub(crate) struct Node<T> {
  pub(crate) item: Atomic<Item<T>>,
  pub(crate) next: Atomic<Node<T>>,
  seq: u64,
}

impl<T> Node<T> {
  /// Successor with tags stripped. A self-link means the node was retired.
  #[inline]
  fn successor<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
    self.next.load(Ordering::Acquire, guard).with_tag(0)
  }

  fn dummy() -> Self {
    Node {
      item: Atomic::null(),
      next: Atomic::null(),
      seq: 0,
    }
  }

  fn new(value: T) -> Self {
    Node {
      item: Atomic::new(Item::new(value)),
      next: Atomic::null(),
      seq: 0,
    }
  }
}

impl<T> Drop for Node<T> {
  fn drop(&mut self) {
    // SAFETY: a node is dropped only once no other thread can reach it, so its
    // element (if still present) belongs to nobody else.
    unsafe {
      let item = self.item.load(Ordering::Relaxed, epoch::unprotected());
      if !item.is_null() {
        item::drop_unreachable(item);
      }
    }
  }
}

/// An unbounded thread-safe FIFO queue.
///
/// All operations are lock-free. Elements are stored by value; inspection
/// methods (`peek`, `contains`, `iter`) clone or compare them in place and so
/// need `T: Sync`.
///
/// `len` walks the whole list and is only a snapshot under concurrent
/// modification.
pub struct LinkedQueue<T> {
  head: CachePadded<Atomic<Node<T>>>,
  tail: CachePadded<Atomic<Node<T>>>,
}

unsafe impl<T: Send> Send for LinkedQueue<T> {}
unsafe impl<T: Send> Sync for LinkedQueue<T> {}

impl<T> LinkedQueue<T> {
  /// Creates an empty queue.
  pub fn new() -> Self {
    let dummy = Atomic::new(Node::dummy());
    // SAFETY: the dummy is not shared yet.
    let shared = dummy.load(Ordering::Relaxed, unsafe { epoch::unprotected() });
    LinkedQueue {
      head: CachePadded::new(Atomic::from(shared)),
      tail: CachePadded::new(Atomic::from(shared)),
    }
  }

  /// Inserts `value` at the tail. Never fails.
  pub fn push(&self, value: T) {
    let guard = &epoch::pin();
    let mut node = Owned::new(Node::new(value));

    let mut t = self.tail.load(Ordering::Acquire, guard);
    let mut p = t;
    loop {
      // SAFETY: every node reachable from `head` or `tail` stays allocated
      // while this thread is pinned.
      let p_ref = unsafe { p.deref() };
      let q = p_ref.successor(guard);
      if q.is_null() {
        // p is the last node.
        node.seq = p_ref.seq + 1;
        match p_ref.next.compare_exchange(
          Shared::null(),
          node,
          Ordering::Release,
          Ordering::Relaxed,
          guard,
        ) {
          Ok(new) => {
            // Let tail lag by one link; swing it on every second append.
            if p != t {
              let _ = self
                .tail
                .compare_exchange(t, new, Ordering::Release, Ordering::Relaxed, guard);
            }
            return;
          }
          Err(e) => node = e.new,
        }
      } else if q == p {
        // p was retired. Resume from tail if it has moved, otherwise from
        // head, which is always ahead of any retired node.
        let nt = self.tail.load(Ordering::Acquire, guard);
        p = if nt != t {
          t = nt;
          t
        } else {
          self.head.load(Ordering::Acquire, guard)
        };
      } else {
        // Check for tail updates after two hops.
        p = if p != t {
          let nt = self.tail.load(Ordering::Acquire, guard);
          if nt != t {
            t = nt;
            t
          } else {
            q
          }
        } else {
          q
        };
      }
    }
  }

  /// Removes and returns the head element, or `None` if the queue is empty.
  pub fn pop(&self) -> Option<T> {
    let guard = &epoch::pin();
    'restart: loop {
      let h = self.head.load(Ordering::Acquire, guard);
      let mut p = h;
      loop {
        let p_ref = unsafe { p.deref() };
        let item = p_ref.item.load(Ordering::Acquire, guard);
        if !item.is_null()
          && p_ref
            .item
            .compare_exchange(item, Shared::null(), Ordering::AcqRel, Ordering::Relaxed, guard)
            .is_ok()
        {
          // Successful CAS is the linearization point for removal.
          if p != h {
            let q = p_ref.successor(guard);
            if q != p {
              self.update_head(h, if q.is_null() { p } else { q }, guard);
            }
          }
          return Some(unsafe { item::take_detached(item, guard) });
        }
        let q = p_ref.successor(guard);
        if q.is_null() {
          self.update_head(h, p, guard);
          return None;
        }
        if q == p {
          continue 'restart;
        }
        p = q;
      }
    }
  }

  /// Returns a clone of the head element without removing it.
  pub fn peek(&self) -> Option<T>
  where
    T: Clone + Sync,
  {
    let guard = &epoch::pin();
    loop {
      let p = self.first(guard);
      if p.is_null() {
        return None;
      }
      let item = unsafe { p.deref() }.item.load(Ordering::Acquire, guard);
      if item.is_null() {
        continue;
      }
      if let Some(value) = unsafe { item.deref() }.inspect(T::clone) {
        return Some(value);
      }
    }
  }

  /// True if the queue holds no elements.
  pub fn is_empty(&self) -> bool {
    let guard = &epoch::pin();
    self.first(guard).is_null()
  }

  /// Number of elements, counted by walking the list.
  pub fn len(&self) -> usize {
    let guard = &epoch::pin();
    let mut count = 0;
    let mut p = self.first(guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      if !p_ref.item.load(Ordering::Acquire, guard).is_null() {
        count += 1;
      }
      p = self.succ(p, guard);
    }
    count
  }

  /// True if some element equals `value`.
  pub fn contains(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    let guard = &epoch::pin();
    let mut p = self.first(guard);
    while !p.is_null() {
      let item = unsafe { p.deref() }.item.load(Ordering::Acquire, guard);
      if !item.is_null() && unsafe { item.deref() }.inspect(|v| v == value) == Some(true) {
        return true;
      }
      p = self.succ(p, guard);
    }
    false
  }

  /// Removes the first element equal to `value`. Returns whether one was
  /// removed.
  ///
  /// The element is dropped immediately. Its node, and any emptied node the
  /// scan passes, is spliced out unless it is the last node.
  pub fn remove(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    let guard = &epoch::pin();
    let mut p = self.first(guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      let item = p_ref.item.load(Ordering::Acquire, guard);
      if item.is_null() {
        self.unlink(p, guard);
      } else if unsafe { item.deref() }.inspect(|v| v == value) == Some(true)
        && p_ref
          .item
          .compare_exchange(item, Shared::null(), Ordering::AcqRel, Ordering::Relaxed, guard)
          .is_ok()
      {
        self.unlink(p, guard);
        drop(unsafe { item::take_detached(item, guard) });
        return true;
      }
      p = self.succ(p, guard);
    }
    false
  }

  /// Removes every element, moving each into `sink` in FIFO order. Returns
  /// how many were moved.
  pub fn drain_into<E: Extend<T>>(&self, sink: &mut E) -> usize {
    self.drain_into_max(sink, usize::MAX)
  }

  /// Like [`drain_into`](Self::drain_into), moving at most `max` elements.
  pub fn drain_into_max<E: Extend<T>>(&self, sink: &mut E, max: usize) -> usize {
    let mut moved = 0;
    while moved < max {
      match self.pop() {
        Some(value) => {
          sink.extend(Some(value));
          moved += 1;
        }
        None => break,
      }
    }
    moved
  }

  /// Removes all elements.
  pub fn clear(&self) {
    while self.pop().is_some() {}
  }

  /// Iterates over clones of the elements, head to tail.
  ///
  /// The iterator is weakly consistent: it never yields an element twice and
  /// never fails, and it reflects some but not necessarily all modifications
  /// made after it was created.
  pub fn iter(&self) -> Iter<'_, T>
  where
    T: Clone + Sync,
  {
    Iter::new(self)
  }

  /// First node holding an element, or null. Moves `head` up to it.
  pub(crate) fn first<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
    'restart: loop {
      let h = self.head.load(Ordering::Acquire, guard);
      let mut p = h;
      loop {
        let p_ref = unsafe { p.deref() };
        let has_item = !p_ref.item.load(Ordering::Acquire, guard).is_null();
        let q = p_ref.successor(guard);
        if has_item || q.is_null() {
          self.update_head(h, p, guard);
          return if has_item { p } else { Shared::null() };
        }
        if q == p {
          continue 'restart;
        }
        p = q;
      }
    }
  }

  /// Successor of `p`, or the current head if `p` has been retired.
  pub(crate) fn succ<'g>(&self, p: Shared<'g, Node<T>>, guard: &'g Guard) -> Shared<'g, Node<T>> {
    let next = unsafe { p.deref() }.successor(guard);
    if next == p {
      self.head.load(Ordering::Acquire, guard)
    } else {
      next
    }
  }

  /// Swings head from `h` to `p`. The winning thread retires the nodes
  /// before `p` on the path from `h`, except those a splicer has claimed.
  fn update_head<'g>(&self, h: Shared<'g, Node<T>>, p: Shared<'g, Node<T>>, guard: &'g Guard) {
    if h == p
      || self
        .head
        .compare_exchange(h, p, Ordering::SeqCst, Ordering::Relaxed, guard)
        .is_err()
    {
      return;
    }
    let p_ref = unsafe { p.deref() };
    self.fix_tail(p, guard);

    // `p` may have been spliced out since it was chosen, so the walk stops
    // by position rather than at `p` itself.
    let mut retired = 0u64;
    let mut cur = h;
    while !cur.is_null() && unsafe { cur.deref() }.seq < p_ref.seq {
      let next = unsafe { cur.deref() }.next.swap(cur, Ordering::SeqCst, guard);
      if next.with_tag(0) == cur {
        break;
      }
      if next.tag() & BYPASSED == 0 {
        unsafe { guard.defer_destroy(cur) };
        retired += 1;
      }
      cur = next.with_tag(0);
    }
    if retired > 1 {
      telemetry::increment_counter("queue::update_head", "BatchRetire");
    }

    let n = p_ref.next.load(Ordering::SeqCst, guard);
    if n.tag() & MARK != 0 {
      self.update_head(p, n.with_tag(0), guard);
    }
  }

  /// Splices out `x`, a node whose element is gone. Leaves the last node and
  /// anything `head` has reached.
  fn unlink<'g>(&self, x: Shared<'g, Node<T>>, guard: &'g Guard) {
    if self.head.load(Ordering::Acquire, guard) == x {
      return;
    }
    let x_ref = unsafe { x.deref() };
    let succ = loop {
      let n = x_ref.next.load(Ordering::SeqCst, guard);
      let s = n.with_tag(0);
      if s.is_null() || s == x || n.tag() & BYPASSED != 0 {
        return;
      }
      if n.tag() & MARK != 0 {
        break s;
      }
      if x_ref
        .next
        .compare_exchange(n, s.with_tag(MARK), Ordering::SeqCst, Ordering::Acquire, guard)
        .is_ok()
      {
        break s;
      }
    };

    let backoff = Backoff::new();
    loop {
      let pred = match self.find_pred(x, guard) {
        Some(pred) => pred,
        None => return,
      };
      if unsafe { pred.deref() }
        .next
        .compare_exchange(x, succ, Ordering::SeqCst, Ordering::Acquire, guard)
        .is_ok()
      {
        break;
      }
      // The predecessor is itself being spliced out; its splicer will
      // relink `x` behind a live node.
      if backoff.is_completed() {
        return;
      }
      backoff.snooze();
    }

    self.fix_tail(succ, guard);
    let prior = x_ref.next.fetch_or(BYPASSED, Ordering::SeqCst, guard);
    if prior.with_tag(0) == x {
      // A head walker got here first and retired it.
      return;
    }
    telemetry::increment_counter("queue::unlink", "Bypass");
    let raw = x.as_raw();
    // SAFETY: nothing links to `x` any more. Threads pinned now may still
    // move `head` onto it and step off again; they have unpinned by the time
    // the outer closure runs, and the inner deferral covers threads that
    // read `head` meanwhile.
    unsafe {
      guard.defer_unchecked(move || {
        let guard = epoch::pin();
        guard.defer_destroy(Shared::from(raw));
      });
    }
  }

  /// The node whose `next` points at `x`, searching from `head`. `None` once
  /// `head` has reached or passed `x`.
  fn find_pred<'g>(
    &self,
    x: Shared<'g, Node<T>>,
    guard: &'g Guard,
  ) -> Option<Shared<'g, Node<T>>> {
    let x_seq = unsafe { x.deref() }.seq;
    'restart: loop {
      let mut p = self.head.load(Ordering::SeqCst, guard);
      loop {
        if p == x {
          return None;
        }
        let p_ref = unsafe { p.deref() };
        if p_ref.seq > x_seq {
          return None;
        }
        let q = p_ref.successor(guard);
        if q == p {
          continue 'restart;
        }
        if q == x {
          return Some(p);
        }
        if q.is_null() {
          return None;
        }
        p = q;
      }
    }
  }

  /// Ensures `tail` is not behind `p`, so it never points at a node about to
  /// be retired.
  fn fix_tail<'g>(&self, p: Shared<'g, Node<T>>, guard: &'g Guard) {
    let seq = unsafe { p.deref() }.seq;
    loop {
      let t = self.tail.load(Ordering::Acquire, guard);
      if unsafe { t.deref() }.seq >= seq {
        return;
      }
      if self
        .tail
        .compare_exchange(t, p, Ordering::AcqRel, Ordering::Relaxed, guard)
        .is_ok()
      {
        return;
      }
    }
  }
}

impl<T> Default for LinkedQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Drop for LinkedQueue<T> {
  fn drop(&mut self) {
    // SAFETY: `&mut self` means no other thread is operating on the queue;
    // everything from head onwards is owned by it and has no self-links.
    // Spliced nodes are off this path and belong to their deferred closures.
    unsafe {
      let guard = epoch::unprotected();
      let mut p = self.head.load(Ordering::Relaxed, guard);
      while !p.is_null() {
        let next = p.deref().next.load(Ordering::Relaxed, guard).with_tag(0);
        drop(p.into_owned());
        p = next;
      }
    }
  }
}

impl<T> FromIterator<T> for LinkedQueue<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let queue = LinkedQueue::new();
    for value in iter {
      queue.push(value);
    }
    queue
  }
}

impl<T> Extend<T> for LinkedQueue<T> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for value in iter {
      self.push(value);
    }
  }
}

impl<T> fmt::Debug for LinkedQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinkedQueue")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tail_never_trails_head_after_bulk_pop() {
    let queue = LinkedQueue::new();
    for i in 0..64 {
      queue.push(i);
    }
    for i in 0..64 {
      assert_eq!(queue.pop(), Some(i));
    }
    let guard = &epoch::pin();
    let head = queue.head.load(Ordering::Acquire, guard);
    let tail = queue.tail.load(Ordering::Acquire, guard);
    assert!(unsafe { tail.deref() }.seq >= unsafe { head.deref() }.seq);
    drop(guard);

    queue.push(100);
    assert_eq!(queue.pop(), Some(100));
    assert!(queue.is_empty());
  }

  #[test]
  fn removed_interior_nodes_are_skipped() {
    let queue: LinkedQueue<u32> = (0..5).collect();
    assert!(queue.remove(&2));
    assert!(!queue.remove(&2));
    assert_eq!(queue.len(), 4);
    let drained: Vec<u32> = std::iter::from_fn(|| queue.pop()).collect();
    assert_eq!(drained, vec![0, 1, 3, 4]);
  }

  #[test]
  fn removed_nodes_leave_the_chain_behind_a_live_front() {
    let queue = LinkedQueue::new();
    queue.push(u32::MAX);
    for i in 0..1000 {
      queue.push(i);
      assert!(queue.remove(&i));
    }

    let guard = &epoch::pin();
    let mut linked = 0;
    let mut p = queue.head.load(Ordering::Acquire, guard);
    while !p.is_null() {
      linked += 1;
      p = unsafe { p.deref() }.successor(guard);
    }
    drop(guard);

    // The live front and the last emptied node, which stays as the tail.
    assert_eq!(linked, 2);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pop(), Some(u32::MAX));
    assert!(queue.is_empty());
  }

  #[test]
  fn pushing_after_splices_keeps_order() {
    let queue: LinkedQueue<u32> = (0..8).collect();
    assert!(queue.remove(&3));
    assert!(queue.remove(&4));
    assert!(queue.remove(&5));
    queue.push(8);
    assert!(queue.remove(&7));
    queue.push(9);
    assert_eq!(queue.iter().collect::<Vec<_>>(), vec![0, 1, 2, 6, 8, 9]);
    let drained: Vec<u32> = std::iter::from_fn(|| queue.pop()).collect();
    assert_eq!(drained, vec![0, 1, 2, 6, 8, 9]);
  }
}
