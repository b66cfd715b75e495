// src/deque/mod.rs

//! An unbounded, lock-free double-ended queue of doubly-linked nodes.
//!
//! Elements are removed in three phases:
//!
//! 1. *Logical deletion*: CAS the node's element away. This is the
//!    linearization point; the node is now dead but still linked.
//! 2. *Unlinking*: CAS neighbouring links so that traversals from the live
//!    nodes no longer reach the dead ones.
//! 3. *gc-unlinking*: once a re-check shows the cut run is unreachable from
//!    every live node and from `head`/`tail`, terminate the run's own links.
//!
//! A node is *active* if it holds an element, or if it is the first or last
//! node of the list. Runs of dead nodes touching either end are cut out when
//! an end operation reaches them. A dead run between two live elements is
//! spliced out by the removal that created it: the live neighbours are
//! linked to each other, then the run is terminated once a re-check shows
//! nothing still points into it.
//!
//! `head` and `tail` only approximate the ends and may lag by a couple of
//! links. Inserting and removing at the same end are linearizable with each
//! other; combinations spanning both ends (for example `len`) are not.

mod iter;
mod node;

pub use iter::Iter;

use node::{cas_link, is_end, is_terminated, release, terminate_run, Node};

use crate::internal::item;
use crate::telemetry;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use std::collections::HashSet;
use std::fmt;
use std::iter::FromIterator;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Links traversed before re-reading `head`/`tail`, and the shortest dead run
/// an interior removal cuts when it touches an end.
const HOPS: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum End {
  Front,
  Back,
}

impl End {
  fn opposite(self) -> End {
    match self {
      End::Front => End::Back,
      End::Back => End::Front,
    }
  }

  /// The link leading toward this end: `prev` for the front.
  fn outward<T>(self, node: &Node<T>) -> &Atomic<Node<T>> {
    match self {
      End::Front => &node.prev,
      End::Back => &node.next,
    }
  }

  /// The link leading away from this end: `next` for the front.
  fn inward<T>(self, node: &Node<T>) -> &Atomic<Node<T>> {
    self.opposite().outward(node)
  }

  fn seq_step(self) -> i64 {
    match self {
      End::Front => -1,
      End::Back => 1,
    }
  }
}

/// A cut run whose final re-check failed. The run still holds counts on its
/// nodes so they stay allocated until the deque is dropped.
struct OrphanRun<T> {
  nodes: Vec<*const Node<T>>,
  next: *mut OrphanRun<T>,
}

/// An unbounded thread-safe deque.
///
/// All operations are lock-free. Inspection methods (`peek_*`, `contains`,
/// `iter`) work on the elements in place and need `T: Sync`.
///
/// `len` walks the list and is only a snapshot under concurrent
/// modification.
pub struct LinkedDeque<T> {
  head: CachePadded<Atomic<Node<T>>>,
  tail: CachePadded<Atomic<Node<T>>>,
  orphans: AtomicPtr<OrphanRun<T>>,
}

unsafe impl<T: Send> Send for LinkedDeque<T> {}
unsafe impl<T: Send> Sync for LinkedDeque<T> {}

impl<T> LinkedDeque<T> {
  /// Creates an empty deque.
  pub fn new() -> Self {
    // SAFETY: the dummy is not shared yet.
    let dummy = Owned::new(Node::dummy()).into_shared(unsafe { epoch::unprotected() });
    LinkedDeque {
      head: CachePadded::new(Atomic::from(dummy)),
      tail: CachePadded::new(Atomic::from(dummy)),
      orphans: AtomicPtr::new(ptr::null_mut()),
    }
  }

  /// Inserts `value` at the front. Never fails.
  pub fn push_front(&self, value: T) {
    self.link(End::Front, value);
  }

  /// Inserts `value` at the back. Never fails.
  pub fn push_back(&self, value: T) {
    self.link(End::Back, value);
  }

  /// Removes and returns the front element.
  pub fn pop_front(&self) -> Option<T> {
    self.pop(End::Front)
  }

  /// Removes and returns the back element.
  pub fn pop_back(&self) -> Option<T> {
    self.pop(End::Back)
  }

  /// A clone of the front element.
  pub fn peek_front(&self) -> Option<T>
  where
    T: Clone + Sync,
  {
    self.peek(End::Front)
  }

  /// A clone of the back element.
  pub fn peek_back(&self) -> Option<T>
  where
    T: Clone + Sync,
  {
    self.peek(End::Back)
  }

  /// True if the deque holds no elements.
  pub fn is_empty(&self) -> bool {
    let guard = &epoch::pin();
    self.live_end(End::Front, guard).is_null()
  }

  /// Number of elements, counted by walking the list.
  pub fn len(&self) -> usize {
    let guard = &epoch::pin();
    'restart: loop {
      let mut count = 0usize;
      let mut p = self.end_node(End::Front, guard);
      while !p.is_null() {
        let p_ref = unsafe { p.deref() };
        if p_ref.has_item(guard) {
          count += 1;
        }
        let q = p_ref.next.load(Ordering::Acquire, guard);
        if is_terminated(q) {
          continue 'restart;
        }
        p = q;
      }
      return count;
    }
  }

  /// True if some element equals `value`.
  pub fn contains(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    let guard = &epoch::pin();
    let mut p = self.end_node(End::Front, guard);
    while !p.is_null() {
      let item = unsafe { p.deref() }.item.load(Ordering::Acquire, guard);
      if !item.is_null() && unsafe { item.deref() }.inspect(|v| v == value) == Some(true) {
        return true;
      }
      p = self.succ(End::Back, p, guard);
    }
    false
  }

  /// Removes the first element (front to back) equal to `value`.
  pub fn remove_first_occurrence(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    self.remove_occurrence(End::Front, value)
  }

  /// Removes the last element (back to front) equal to `value`.
  pub fn remove_last_occurrence(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    self.remove_occurrence(End::Back, value)
  }

  /// Removes all elements.
  pub fn clear(&self) {
    while self.pop_front().is_some() {}
  }

  /// Removes elements from the front into `sink`. Returns how many moved.
  pub fn drain_into<E: Extend<T>>(&self, sink: &mut E) -> usize {
    self.drain_into_max(sink, usize::MAX)
  }

  /// Like [`drain_into`](Self::drain_into), moving at most `max` elements.
  pub fn drain_into_max<E: Extend<T>>(&self, sink: &mut E, max: usize) -> usize {
    let mut moved = 0;
    while moved < max {
      match self.pop_front() {
        Some(value) => {
          sink.extend(Some(value));
          moved += 1;
        }
        None => break,
      }
    }
    moved
  }

  /// Iterates over clones of the elements, front to back.
  ///
  /// Weakly consistent: never yields an element twice, never fails, and may
  /// or may not reflect changes made after creation.
  pub fn iter(&self) -> Iter<'_, T>
  where
    T: Clone + Sync,
  {
    Iter::new(self, End::Front)
  }

  /// Iterates over clones of the elements, back to front.
  pub fn iter_rev(&self) -> Iter<'_, T>
  where
    T: Clone + Sync,
  {
    Iter::new(self, End::Back)
  }

  // --- Insertion ---

  fn link(&self, end: End, value: T) {
    let guard = &epoch::pin();
    let mut node = Owned::new(Node::new(value));
    loop {
      let (r, p) = self.find_end(end, guard);
      let p_ref = unsafe { p.deref() };
      if !p_ref.try_acquire() {
        continue;
      }
      node.seq = p_ref.seq + end.seq_step();
      end.inward(&*node).store(p, Ordering::Relaxed);
      match end.outward(p_ref).compare_exchange(
        Shared::null(),
        node,
        Ordering::AcqRel,
        Ordering::Acquire,
        guard,
      ) {
        Ok(new) => {
          // Successful CAS is the linearization point for the element to
          // become a member of this deque. Hop two nodes at a time.
          if p != r {
            unsafe { cas_link(self.root(end), r, new, guard) };
          }
          return;
        }
        Err(e) => {
          node = e.new;
          let held = end.inward(&*node).swap(Shared::null(), Ordering::Relaxed, guard);
          unsafe { release(held, guard) };
        }
      }
    }
  }

  // --- Removal ---

  fn pop(&self, end: End) -> Option<T> {
    let guard = &epoch::pin();
    'restart: loop {
      let first = self.end_node(end, guard);
      let first_ref = unsafe { first.deref() };
      let mut p = first;
      loop {
        let p_ref = unsafe { p.deref() };
        let item = p_ref.item.load(Ordering::Acquire, guard);
        if !item.is_null() {
          // The node we started from must still be at the end.
          if !is_end(end.outward(first_ref).load(Ordering::Acquire, guard)) {
            continue 'restart;
          }
          if p_ref
            .item
            .compare_exchange(item, Shared::null(), Ordering::AcqRel, Ordering::Relaxed, guard)
            .is_ok()
          {
            self.unlink(p, guard);
            return Some(unsafe { item::take_detached(item, guard) });
          }
        }
        let q = end.inward(p_ref).load(Ordering::Acquire, guard);
        if is_terminated(q) {
          continue 'restart;
        }
        if q.is_null() {
          if !is_end(end.outward(first_ref).load(Ordering::Acquire, guard)) {
            continue 'restart;
          }
          return None;
        }
        p = q;
      }
    }
  }

  fn remove_occurrence(&self, from: End, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    let guard = &epoch::pin();
    let toward = from.opposite();
    let mut p = self.end_node(from, guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      let item = p_ref.item.load(Ordering::Acquire, guard);
      if !item.is_null()
        && unsafe { item.deref() }.inspect(|v| v == value) == Some(true)
        && p_ref
          .item
          .compare_exchange(item, Shared::null(), Ordering::AcqRel, Ordering::Relaxed, guard)
          .is_ok()
      {
        self.unlink(p, guard);
        drop(unsafe { item::take_detached(item, guard) });
        return true;
      }
      p = self.succ(toward, p, guard);
    }
    false
  }

  /// Unlinks a node whose element has just been taken.
  fn unlink<'g>(&self, x: Shared<'g, Node<T>>, guard: &'g Guard) {
    let x_ref = unsafe { x.deref() };
    let prev = x_ref.prev.load(Ordering::Acquire, guard);
    let next = x_ref.next.load(Ordering::Acquire, guard);
    if is_end(prev) {
      self.unlink_end(End::Front, x, next, guard);
      return;
    }
    if is_end(next) {
      self.unlink_end(End::Back, x, prev, guard);
      return;
    }
    if prev.is_null() || next.is_null() {
      // Already cut out on one side.
      return;
    }

    // Interior node: find the nearest active neighbours on both sides,
    // collecting the dead run between them.
    let mut run = vec![x.as_raw()];
    let mut hops = 1;
    let (active_pred, is_first) = match self.find_active(End::Front, prev, &mut run, &mut hops, guard)
    {
      Some(found) => found,
      None => return,
    };
    let (active_succ, is_last) = match self.find_active(End::Back, next, &mut run, &mut hops, guard)
    {
      Some(found) => found,
      None => return,
    };

    if hops < HOPS && (is_first || is_last) {
      // A short run at an end is cut by the next end operation.
      return;
    }

    self.skip_deleted(End::Back, active_pred, guard);
    self.skip_deleted(End::Front, active_succ, guard);

    let pred_ref = unsafe { active_pred.deref() };
    let succ_ref = unsafe { active_succ.deref() };
    let stable = pred_ref.next.load(Ordering::Acquire, guard) == active_succ
      && succ_ref.prev.load(Ordering::Acquire, guard) == active_pred
      && if is_first {
        is_end(pred_ref.prev.load(Ordering::Acquire, guard))
      } else {
        pred_ref.has_item(guard)
      }
      && if is_last {
        is_end(succ_ref.next.load(Ordering::Acquire, guard))
      } else {
        succ_ref.has_item(guard)
      };

    self.retire_run(run, stable, guard);
  }

  /// Walks from `start` toward `toward` to the first active node. Dead nodes
  /// passed on the way are appended to `run`. Returns the node and whether it
  /// is the end node, or `None` if the walk ran into a node that has left the
  /// list.
  fn find_active<'g>(
    &self,
    toward: End,
    start: Shared<'g, Node<T>>,
    run: &mut Vec<*const Node<T>>,
    hops: &mut usize,
    guard: &'g Guard,
  ) -> Option<(Shared<'g, Node<T>>, bool)> {
    let mut p = start;
    loop {
      let p_ref = unsafe { p.deref() };
      if p_ref.has_item(guard) {
        return Some((p, false));
      }
      let q = toward.outward(p_ref).load(Ordering::Acquire, guard);
      if is_end(q) {
        if is_terminated(toward.inward(p_ref).load(Ordering::Acquire, guard)) {
          return None;
        }
        return Some((p, true));
      }
      if q.is_null() {
        return None;
      }
      run.push(p.as_raw());
      p = q;
      *hops += 1;
    }
  }

  /// Cuts the dead run beyond `first`, the end node at `end` whose element is
  /// gone. `next` is the link value read from `first` toward the interior.
  fn unlink_end<'g>(
    &self,
    end: End,
    first: Shared<'g, Node<T>>,
    next: Shared<'g, Node<T>>,
    guard: &'g Guard,
  ) {
    if next.is_null() {
      return;
    }
    let first_ref = unsafe { first.deref() };
    let inner = end.opposite();
    let mut run = Vec::new();
    let mut p = next;
    loop {
      let p_ref = unsafe { p.deref() };
      let q = inner.outward(p_ref).load(Ordering::Acquire, guard);
      if p_ref.has_item(guard) || is_end(q) {
        if !run.is_empty()
          && !is_terminated(end.outward(p_ref).load(Ordering::Acquire, guard))
          && unsafe { cas_link(end.inward(first_ref), next, p, guard) }
        {
          self.skip_deleted(end, p, guard);
          let stable = is_end(end.outward(first_ref).load(Ordering::Acquire, guard))
            && (is_end(inner.outward(p_ref).load(Ordering::Acquire, guard)) || p_ref.has_item(guard))
            && end.outward(p_ref).load(Ordering::Acquire, guard) == first;
          self.retire_run(run, stable, guard);
        }
        return;
      }
      if q.is_null() {
        return;
      }
      run.push(p.as_raw());
      p = q;
    }
  }

  /// Terminates a cut run once it is known to be unreachable, or parks it
  /// until drop if the re-check failed.
  fn retire_run(&self, run: Vec<*const Node<T>>, stable: bool, guard: &Guard) {
    if stable {
      self.update_root(End::Front, guard);
      self.update_root(End::Back, guard);
      unsafe { terminate_run(&run, guard) };
      if run.len() > 1 {
        telemetry::increment_counter("deque::retire_run", "BatchCut");
      }
    } else {
      self.orphan(run);
    }
  }

  fn orphan(&self, run: Vec<*const Node<T>>) {
    let nodes: Vec<*const Node<T>> = run
      .into_iter()
      .filter(|&raw| unsafe { &*raw }.try_acquire())
      .collect();
    if nodes.is_empty() {
      return;
    }
    tracing::debug!(nodes = nodes.len(), "deque cut run failed its re-check; holding it until drop");
    telemetry::increment_counter("deque::orphan", "HeldRun");

    let entry = Box::into_raw(Box::new(OrphanRun {
      nodes,
      next: ptr::null_mut(),
    }));
    let mut top = self.orphans.load(Ordering::Relaxed);
    loop {
      unsafe { (*entry).next = top };
      match self
        .orphans
        .compare_exchange_weak(top, entry, Ordering::Release, Ordering::Relaxed)
      {
        Ok(_) => return,
        Err(current) => top = current,
      }
    }
  }

  /// Points `x`'s link toward `toward` at its nearest active neighbour on
  /// that side, retrying while `x` stays active.
  fn skip_deleted<'g>(&self, toward: End, x: Shared<'g, Node<T>>, guard: &'g Guard) {
    let x_ref = unsafe { x.deref() };
    loop {
      if self.try_skip_deleted(toward, x_ref, guard) {
        return;
      }
      let still_active = x_ref.has_item(guard)
        || is_end(toward.opposite().outward(x_ref).load(Ordering::Acquire, guard));
      if !still_active {
        return;
      }
    }
  }

  fn try_skip_deleted(&self, toward: End, x_ref: &Node<T>, guard: &Guard) -> bool {
    let link = toward.outward(x_ref);
    let prev = link.load(Ordering::Acquire, guard);
    if prev.is_null() {
      return true;
    }
    let mut p = prev;
    loop {
      let p_ref = unsafe { p.deref() };
      if p_ref.has_item(guard) {
        break;
      }
      let q = toward.outward(p_ref).load(Ordering::Acquire, guard);
      if is_end(q) {
        if is_terminated(toward.inward(p_ref).load(Ordering::Acquire, guard)) {
          return false;
        }
        break;
      }
      if q.is_null() {
        return false;
      }
      p = q;
    }
    prev == p || unsafe { cas_link(link, prev, p, guard) }
  }

  // --- Endpoints ---

  fn root(&self, end: End) -> &Atomic<Node<T>> {
    match end {
      End::Front => &self.head,
      End::Back => &self.tail,
    }
  }

  /// Walks from the value of `root` toward `toward` until a node whose link
  /// on that side is a plain null. Returns the root value last read and that
  /// node, or the root value if the walk hit a node that left the list.
  fn walk<'g>(
    root: &Atomic<Node<T>>,
    toward: End,
    guard: &'g Guard,
  ) -> Result<(Shared<'g, Node<T>>, Shared<'g, Node<T>>), Shared<'g, Node<T>>> {
    let mut r = root.load(Ordering::Acquire, guard);
    let mut p = r;
    let mut hops = 0usize;
    loop {
      let q = toward.outward(unsafe { p.deref() }).load(Ordering::Acquire, guard);
      if is_end(q) {
        return Ok((r, p));
      }
      if q.is_null() {
        return Err(r);
      }
      p = q;
      hops += 1;
      if hops % HOPS == 0 {
        let nr = root.load(Ordering::Acquire, guard);
        if nr != r {
          r = nr;
          p = r;
        }
      }
    }
  }

  /// The current end node at `end` (active or not) and the root value it was
  /// reached from.
  fn find_end<'g>(
    &self,
    end: End,
    guard: &'g Guard,
  ) -> (Shared<'g, Node<T>>, Shared<'g, Node<T>>) {
    let root = self.root(end);
    let backoff = Backoff::new();
    loop {
      let r = match Self::walk(root, end, guard) {
        Ok(found) => return found,
        Err(r) => r,
      };
      if root.load(Ordering::Acquire, guard) != r {
        continue;
      }
      // A stale CAS can leave the root on a node that was cut out; approach
      // the end from the other root instead.
      if is_terminated(end.outward(unsafe { r.deref() }).load(Ordering::Acquire, guard)) {
        tracing::trace!(?end, "deque root stranded on a cut node; walking from the opposite root");
        if let Ok((_, p)) = Self::walk(self.root(end.opposite()), end, guard) {
          return (r, p);
        }
      }
      backoff.snooze();
    }
  }

  /// The end node at `end`, moving the root onto it.
  pub(crate) fn end_node<'g>(&self, end: End, guard: &'g Guard) -> Shared<'g, Node<T>> {
    loop {
      let (r, p) = self.find_end(end, guard);
      if p == r || unsafe { cas_link(self.root(end), r, p, guard) } {
        return p;
      }
    }
  }

  /// The node after `p` moving toward `toward`; null past the end. A node
  /// that has left the list continues from the opposite end.
  pub(crate) fn succ<'g>(
    &self,
    toward: End,
    p: Shared<'g, Node<T>>,
    guard: &'g Guard,
  ) -> Shared<'g, Node<T>> {
    let q = toward.outward(unsafe { p.deref() }).load(Ordering::Acquire, guard);
    if is_terminated(q) {
      self.end_node(toward.opposite(), guard)
    } else {
      q
    }
  }

  /// Nearest node holding an element, seen from `end`; null if none.
  fn live_end<'g>(&self, end: End, guard: &'g Guard) -> Shared<'g, Node<T>> {
    'restart: loop {
      let first = self.end_node(end, guard);
      let first_ref = unsafe { first.deref() };
      let mut p = first;
      loop {
        let p_ref = unsafe { p.deref() };
        if p_ref.has_item(guard) {
          if !is_end(end.outward(first_ref).load(Ordering::Acquire, guard)) {
            continue 'restart;
          }
          return p;
        }
        let q = end.inward(p_ref).load(Ordering::Acquire, guard);
        if is_terminated(q) {
          continue 'restart;
        }
        if q.is_null() {
          if !is_end(end.outward(first_ref).load(Ordering::Acquire, guard)) {
            continue 'restart;
          }
          return Shared::null();
        }
        p = q;
      }
    }
  }

  fn peek(&self, end: End) -> Option<T>
  where
    T: Clone + Sync,
  {
    let guard = &epoch::pin();
    loop {
      let p = self.live_end(end, guard);
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

  /// Moves the root at `end` onto the end node if it sits on a dead node
  /// some way in.
  fn update_root(&self, end: End, guard: &Guard) {
    let root = self.root(end);
    'restart: loop {
      let h = root.load(Ordering::Acquire, guard);
      let h_ref = unsafe { h.deref() };
      if h_ref.has_item(guard) {
        return;
      }
      let mut p = end.outward(h_ref).load(Ordering::Acquire, guard);
      if p.is_null() {
        return;
      }
      let mut hops = 1usize;
      loop {
        let q = end.outward(unsafe { p.deref() }).load(Ordering::Acquire, guard);
        if is_end(q) {
          if unsafe { cas_link(root, h, p, guard) } {
            return;
          }
          continue 'restart;
        }
        if q.is_null() {
          return;
        }
        p = q;
        hops += 1;
        if hops % HOPS == 0 && root.load(Ordering::Acquire, guard) != h {
          continue 'restart;
        }
      }
    }
  }
}

impl<T> Default for LinkedDeque<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Drop for LinkedDeque<T> {
  fn drop(&mut self) {
    // SAFETY: `&mut self` excludes every other user. All nodes still holding
    // counts are reachable from the roots or from held runs; nodes whose
    // counts reached zero are already with the collector and unreachable.
    unsafe {
      let guard = epoch::unprotected();
      let mut pending: Vec<*const Node<T>> = vec![
        self.head.load(Ordering::Relaxed, guard).as_raw(),
        self.tail.load(Ordering::Relaxed, guard).as_raw(),
      ];
      let mut run = *self.orphans.get_mut();
      while !run.is_null() {
        let held = Box::from_raw(run);
        pending.extend(held.nodes.iter().copied());
        run = held.next;
      }

      let mut seen: HashSet<*const Node<T>> = HashSet::new();
      while let Some(raw) = pending.pop() {
        if raw.is_null() || !seen.insert(raw) {
          continue;
        }
        let node = &*raw;
        for link in [&node.prev, &node.next] {
          let target = link.load(Ordering::Relaxed, guard);
          if !target.is_null() {
            pending.push(target.as_raw());
          }
        }
      }
      for raw in seen {
        drop(Box::from_raw(raw as *mut Node<T>));
      }
    }
  }
}

impl<T> FromIterator<T> for LinkedDeque<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let deque = LinkedDeque::new();
    for value in iter {
      deque.push_back(value);
    }
    deque
  }
}

impl<T> Extend<T> for LinkedDeque<T> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for value in iter {
      self.push_back(value);
    }
  }
}

impl<T> fmt::Debug for LinkedDeque<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinkedDeque")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}
