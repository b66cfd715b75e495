// src/transfer/list.rs

//! The dual list behind [`TransferQueue`](super::TransferQueue) and the fair
//! rendezvous strategy.
//!
//! The list holds nodes of one mode at a time: either DATA nodes (elements
//! waiting for consumers) or REQUEST nodes (consumers waiting for elements),
//! preceded by a prefix of nodes that have already been matched or
//! cancelled. An arriving operation scans for the first unmatched node; if it
//! is of the opposite mode the two are paired with a single CAS on that
//! node's item, otherwise the caller appends a node of its own mode and
//! (depending on [`How`]) waits for it to be matched.
//!
//! Nodes are reference counted: the list owns one `Arc` count per node,
//! released through the epoch collector when the node is unlinked, and a
//! waiting thread owns another so it can park without staying pinned.
//!
//! Unlinking follows Harris: a node's `next` is first frozen by tagging it
//! with [`MARK`], then the predecessor's `next` is swung past it. Only the
//! thread whose swing succeeds retires the node. The trailing node is never
//! unlinked, since appends CAS its `next`. When a cancelled node cannot be
//! unlinked directly, the thread casts a vote; every `SWEEP_THRESHOLD + 1`th
//! vote sweeps the whole list.

use crate::internal::item::{self, Item, CANCELLED, CONSUMED};
use crate::internal::membership::{self, counted};
use crate::internal::spin::{self, SPIN_FOR_TIMEOUT_THRESHOLD};
use crate::internal::waiter::WaiterSlot;
use crate::sync_util;
use crate::telemetry;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Tag on a node's `next`: the node is being unlinked and must not gain a
/// new successor.
pub(crate) const MARK: usize = 1;

/// Failed unsplices tolerated before a sweep.
pub(crate) const SWEEP_THRESHOLD: usize = 32;

/// How long an operation is willing to wait for its counterpart.
#[derive(Clone, Copy, Debug)]
pub(crate) enum How {
  /// Match an existing node or give up.
  Now,
  /// Append without waiting.
  Async,
  /// Append and wait until matched.
  Sync,
  /// Append and wait until matched or the deadline passes.
  Timed(Instant),
}

impl How {
  /// A timed wait for `timeout`; an unrepresentable deadline waits forever.
  pub(crate) fn timed(timeout: std::time::Duration) -> How {
    match sync_util::deadline_after(timeout) {
      Some(deadline) => How::Timed(deadline),
      None => How::Sync,
    }
  }
}

/// Spin budget before a waiter parks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SpinPolicy {
  /// Spin long near the front, shorter behind another spinner.
  Chained,
  /// Spin only when first in line (rendezvous).
  FrontOnly,
}

pub(crate) struct Node<T> {
  pub(crate) item: Atomic<Item<T>>,
  pub(crate) next: Atomic<Node<T>>,
  pub(crate) waiter: WaiterSlot,
  pub(crate) is_data: bool,
  pub(crate) seq: AtomicU64,
}

impl<T> Node<T> {
  /// The permanent first node; counts as a matched DATA node.
  fn sentinel() -> Self {
    Node {
      item: Atomic::null(),
      next: Atomic::null(),
      waiter: WaiterSlot::new(),
      is_data: true,
      seq: AtomicU64::new(0),
    }
  }

  fn new(item: Option<Owned<Item<T>>>, is_data: bool) -> Self {
    Node {
      item: match item {
        Some(owned) => Atomic::from(owned),
        None => Atomic::null(),
      },
      next: Atomic::null(),
      waiter: WaiterSlot::new(),
      is_data,
      seq: AtomicU64::new(0),
    }
  }

  /// True once the node no longer waits for a counterpart.
  pub(crate) fn is_matched(&self, guard: &Guard) -> bool {
    let item = self.item.load(Ordering::Acquire, guard);
    if self.is_data {
      item.is_null()
    } else {
      !item.is_null() || item.tag() != 0
    }
  }

  /// An unmatched node of the other mode; a node of mode `have_data` may not
  /// be appended after it.
  fn cannot_precede(&self, have_data: bool, guard: &Guard) -> bool {
    self.is_data != have_data && !self.is_matched(guard)
  }

  /// Reclaims the element of a node that was never linked.
  fn take_unpublished(&self) -> Option<Owned<Item<T>>> {
    // SAFETY: the node was never published, so no other thread can see it.
    unsafe {
      let guard = epoch::unprotected();
      let item = self.item.swap(Shared::null(), Ordering::Relaxed, guard);
      if item.is_null() {
        None
      } else {
        Some(item.into_owned())
      }
    }
  }
}

impl<T> Drop for Node<T> {
  fn drop(&mut self) {
    unsafe {
      let item = self.item.load(Ordering::Relaxed, epoch::unprotected());
      if !item.is_null() {
        item::drop_unreachable(item);
      }
    }
  }
}

pub(crate) struct DualList<T> {
  head: Arc<Node<T>>,
  tail: CachePadded<Atomic<Node<T>>>,
  sweep_votes: CachePadded<AtomicUsize>,
  spin: SpinPolicy,
}

impl<T> DualList<T> {
  pub(crate) fn new(spin: SpinPolicy) -> Self {
    let head = Arc::new(Node::sentinel());
    let tail = Atomic::from(Arc::as_ptr(&head));
    DualList {
      head,
      tail: CachePadded::new(tail),
      sweep_votes: CachePadded::new(AtomicUsize::new(0)),
      spin,
    }
  }

  #[inline]
  pub(crate) fn sentinel<'g>(&self) -> Shared<'g, Node<T>> {
    Shared::from(Arc::as_ptr(&self.head))
  }

  /// First node after the sentinel.
  #[inline]
  pub(crate) fn first<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
    self.head.next.load(Ordering::Acquire, guard)
  }

  /// Offers an element (`Some`) or asks for one (`None`).
  ///
  /// Returns the element received by a request, or, for an offer, the
  /// element handed back because it was not taken (`Now` without a waiting
  /// consumer, or a timeout). `None` otherwise.
  pub(crate) fn xfer(&self, offer: Option<T>, how: How) -> Option<T> {
    let have_data = offer.is_some();
    let mut item = offer.map(|value| Owned::new(Item::new(value)));
    let how = match how {
      How::Timed(deadline) if Instant::now() >= deadline => How::Now,
      other => other,
    };

    loop {
      let guard = epoch::pin();
      if let Some(received) = self.try_match(have_data, &mut item, &guard) {
        return received;
      }
      if let How::Now = how {
        return item.map(Item::into_value);
      }

      let s = Arc::new(Node::new(item.take(), have_data));
      let pred = match self.try_append(&s, have_data, &guard) {
        Some(pred) => pred,
        None => {
          // Lost a race with an opposite-mode arrival; go match it.
          item = s.take_unpublished();
          continue;
        }
      };
      let deadline = match how {
        How::Async => return None,
        How::Timed(deadline) => Some(deadline),
        _ => None,
      };
      let pred = unsafe { counted(pred) };
      drop(guard);
      return self.await_match(s, pred, deadline);
    }
  }

  /// Scans for the first unmatched node and pairs with it if it is of the
  /// opposite mode. `Some(result)` on a match.
  fn try_match(
    &self,
    have_data: bool,
    item: &mut Option<Owned<Item<T>>>,
    guard: &Guard,
  ) -> Option<Option<T>> {
    'restart: loop {
      let mut pred = self.sentinel();
      let first = self.first(guard);
      let mut p = first;
      while !p.is_null() {
        let p_ref = unsafe { p.deref() };
        let next = p_ref.next.load(Ordering::Acquire, guard);
        if next.tag() == MARK {
          // p is being unlinked; help, then carry on from its successor.
          if !unsafe { self.unlink_after(pred.deref(), p, guard) } {
            continue 'restart;
          }
          p = next.with_tag(0);
          continue;
        }

        let current = p_ref.item.load(Ordering::Acquire, guard);
        let unmatched = if p_ref.is_data {
          !current.is_null()
        } else {
          current.is_null() && current.tag() == 0
        };
        if unmatched {
          if p_ref.is_data == have_data {
            return None;
          }
          let matched = if have_data {
            let offer = match item.take() {
              Some(offer) => offer,
              None => return None,
            };
            match p_ref.item.compare_exchange(
              current,
              offer,
              Ordering::AcqRel,
              Ordering::Acquire,
              guard,
            ) {
              Ok(_) => Some(None),
              Err(e) => {
                *item = Some(e.new);
                None
              }
            }
          } else {
            match p_ref.item.compare_exchange(
              current,
              Shared::null(),
              Ordering::AcqRel,
              Ordering::Acquire,
              guard,
            ) {
              Ok(_) => Some(Some(unsafe { item::take_detached(current, guard) })),
              Err(_) => None,
            }
          };
          if let Some(result) = matched {
            // Keep at most one matched node ahead of the live ones.
            if p != first {
              self.skip_matched_prefix(guard);
            }
            p_ref.waiter.wake();
            return Some(result);
          }
          // Lost the race for p; look at it again.
          continue;
        }
        pred = p;
        p = next;
      }
      return None;
    }
  }

  /// Appends `s` after the last node. Returns its predecessor, or `None` if
  /// an unmatched node of the opposite mode turned up first.
  fn try_append<'g>(
    &self,
    s: &Arc<Node<T>>,
    have_data: bool,
    guard: &'g Guard,
  ) -> Option<Shared<'g, Node<T>>> {
    let raw = Arc::into_raw(s.clone());
    let new: Shared<'g, Node<T>> = Shared::from(raw);

    let mut t = self.tail.load(Ordering::Acquire, guard);
    let mut p = t;
    loop {
      let p_ref = unsafe { p.deref() };
      if p_ref.cannot_precede(have_data, guard) {
        // SAFETY: the membership count was never published.
        unsafe { drop(Arc::from_raw(raw)) };
        return None;
      }
      let n = p_ref.next.load(Ordering::Acquire, guard);
      if !n.is_null() {
        // Not last; re-read tail after two hops.
        p = if p != t {
          let u = self.tail.load(Ordering::Acquire, guard);
          if u != t {
            t = u;
            t
          } else {
            n.with_tag(0)
          }
        } else {
          n.with_tag(0)
        };
        continue;
      }
      s.seq.store(p_ref.seq.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
      if p_ref
        .next
        .compare_exchange(Shared::null(), new, Ordering::AcqRel, Ordering::Acquire, guard)
        .is_ok()
      {
        if p != t {
          let _ = self
            .tail
            .compare_exchange(t, new, Ordering::Release, Ordering::Relaxed, guard);
        }
        return Some(p);
      }
    }
  }

  /// Spins, then parks, until `s` is matched or the deadline passes.
  fn await_match(
    &self,
    s: Arc<Node<T>>,
    pred: Arc<Node<T>>,
    deadline: Option<Instant>,
  ) -> Option<T> {
    let chained = spin::chained_spins().max(1);
    let mut spins: Option<u32> = None;
    loop {
      let guard = epoch::pin();
      let current = s.item.load(Ordering::Acquire, &guard);
      if s.is_data {
        if current.is_null() {
          s.waiter.clear();
          return None;
        }
      } else if !current.is_null() {
        let handed = s
          .item
          .swap(Shared::null().with_tag(CONSUMED), Ordering::AcqRel, &guard);
        s.waiter.clear();
        return Some(unsafe { item::take_detached(handed, &guard) });
      }

      if deadline.map_or(false, |d| Instant::now() >= d) {
        let cancelled = Shared::null().with_tag(CANCELLED);
        if s
          .item
          .compare_exchange(current, cancelled, Ordering::AcqRel, Ordering::Acquire, &guard)
          .is_ok()
        {
          let seq = s.seq.load(Ordering::Relaxed);
          tracing::trace!(seq, is_data = s.is_data, "transfer wait timed out; node cancelled");
          telemetry::log_event(Some(seq), "transfer::await_match", "Cancelled", None);
          s.waiter.clear();
          let returned = if s.is_data {
            Some(unsafe { item::take_detached(current, &guard) })
          } else {
            None
          };
          self.unsplice(&pred, Shared::from(Arc::as_ptr(&s)), &guard);
          return returned;
        }
        continue;
      }

      match spins {
        None => spins = Some(self.spins_for(&pred, deadline.is_some(), s.is_data, &guard)),
        Some(n) if n > 0 => {
          spins = Some(n - 1);
          if n % chained == 0 {
            thread::yield_now();
          } else {
            hint::spin_loop();
          }
        }
        Some(_) => {
          if !s.waiter.is_registered() {
            // Publish the waiter, then re-check before parking.
            s.waiter.register();
            continue;
          }
          drop(guard);
          telemetry::increment_counter("transfer::await_match", "Park");
          match deadline {
            Some(d) => {
              let left = sync_util::remaining(d);
              if left > SPIN_FOR_TIMEOUT_THRESHOLD {
                sync_util::park_thread_timeout(left);
              } else {
                thread::yield_now();
              }
            }
            None => sync_util::park_thread(),
          }
        }
      }
    }
  }

  fn spins_for(&self, pred: &Node<T>, timed: bool, have_data: bool, guard: &Guard) -> u32 {
    match self.spin {
      SpinPolicy::Chained => {
        if pred.is_data != have_data {
          // Phase change: the front is about to flip.
          spin::front_spins() + spin::chained_spins()
        } else if pred.is_matched(guard) {
          spin::front_spins()
        } else if !pred.waiter.is_registered() {
          spin::chained_spins()
        } else {
          0
        }
      }
      SpinPolicy::FrontOnly => {
        if pred.is_matched(guard) {
          if timed {
            spin::max_timed_spins()
          } else {
            spin::max_untimed_spins()
          }
        } else {
          0
        }
      }
    }
  }

  // --- Unlinking ---

  /// Freezes `x` and swings `pred.next` past it. Returns true if this call
  /// unlinked `x`; only that caller retires it.
  ///
  /// # Safety
  /// `x` must be protected by `guard`.
  pub(crate) unsafe fn unlink_after(
    &self,
    pred: &Node<T>,
    x: Shared<'_, Node<T>>,
    guard: &Guard,
  ) -> bool {
    let x_ref = x.deref();
    let mut n = x_ref.next.load(Ordering::Acquire, guard);
    while n.tag() != MARK {
      if n.is_null() {
        // The trailing node stays.
        return false;
      }
      match x_ref
        .next
        .compare_exchange(n, n.with_tag(MARK), Ordering::AcqRel, Ordering::Acquire, guard)
      {
        Ok(_) => break,
        Err(e) => n = e.current,
      }
    }
    let succ = n.with_tag(0);
    if pred
      .next
      .compare_exchange(x, succ, Ordering::AcqRel, Ordering::Acquire, guard)
      .is_err()
    {
      return false;
    }
    self.retire(x, succ, guard);
    true
  }

  /// Moves `tail` past `x`, then releases the list's count on it once no
  /// pinned thread can still be looking at it.
  unsafe fn retire(&self, x: Shared<'_, Node<T>>, succ: Shared<'_, Node<T>>, guard: &Guard) {
    let x_seq = x.deref().seq.load(Ordering::Relaxed);
    loop {
      let t = self.tail.load(Ordering::Acquire, guard);
      if t.deref().seq.load(Ordering::Relaxed) > x_seq {
        break;
      }
      if self
        .tail
        .compare_exchange(t, succ, Ordering::AcqRel, Ordering::Acquire, guard)
        .is_ok()
      {
        break;
      }
    }
    membership::retire(x, guard);
  }

  /// Unlinks matched nodes from the front, keeping the trailing node.
  fn skip_matched_prefix(&self, guard: &Guard) {
    loop {
      let h = self.first(guard);
      if h.is_null() {
        return;
      }
      let h_ref = unsafe { h.deref() };
      let hn = h_ref.next.load(Ordering::Acquire, guard);
      if hn.is_null() {
        return;
      }
      if hn.tag() != MARK && !h_ref.is_matched(guard) {
        return;
      }
      unsafe { self.unlink_after(&self.head, h, guard) };
    }
  }

  /// Removes a cancelled or removed node `s` reached through `pred`. Falls
  /// back to voting for a sweep when `s` may stay reachable.
  pub(crate) fn unsplice(&self, pred: &Node<T>, s: Shared<'_, Node<T>>, guard: &Guard) {
    if pred.next.load(Ordering::Acquire, guard) != s {
      return;
    }
    let s_ref = unsafe { s.deref() };
    let n = s_ref.next.load(Ordering::Acquire, guard);
    let removed = !n.is_null() && unsafe { self.unlink_after(pred, s, guard) };
    let pred_is_sentinel = ptr::eq(pred, &*self.head);
    if removed && pred_is_sentinel {
      return;
    }
    if !(n.is_null() || (removed && pred.is_matched(guard))) {
      return;
    }

    // If s or pred is at the front, the matched prefix will be skipped by a
    // later match.
    let pred_ptr: Shared<'_, Node<T>> = Shared::from(pred as *const Node<T>);
    loop {
      let h = self.first(guard);
      if h.is_null() || h == pred_ptr || h == s {
        return;
      }
      let h_ref = unsafe { h.deref() };
      let hn = h_ref.next.load(Ordering::Acquire, guard);
      if hn.tag() != MARK && !h_ref.is_matched(guard) {
        break;
      }
      if hn.is_null() {
        return;
      }
      unsafe { self.unlink_after(&self.head, h, guard) };
    }

    let pred_frozen = pred.next.load(Ordering::Acquire, guard).tag() == MARK;
    let s_frozen = s_ref.next.load(Ordering::Acquire, guard).tag() == MARK;
    if !pred_frozen && !s_frozen {
      self.vote_for_sweep(guard);
    }
  }

  fn vote_for_sweep(&self, guard: &Guard) {
    loop {
      let votes = self.sweep_votes.load(Ordering::Relaxed);
      if votes < SWEEP_THRESHOLD {
        if self
          .sweep_votes
          .compare_exchange(votes, votes + 1, Ordering::AcqRel, Ordering::Relaxed)
          .is_ok()
        {
          return;
        }
      } else if self
        .sweep_votes
        .compare_exchange(votes, 0, Ordering::AcqRel, Ordering::Relaxed)
        .is_ok()
      {
        tracing::debug!(votes = votes + 1, "sweeping matched nodes after failed unsplices");
        telemetry::increment_counter("transfer::unsplice", "Sweep");
        self.sweep(guard);
        return;
      }
    }
  }

  /// Unlinks every matched node except the trailing one.
  fn sweep(&self, guard: &Guard) {
    let sentinel = self.sentinel();
    let mut p = sentinel;
    loop {
      let p_ref = unsafe { p.deref() };
      let s = p_ref.next.load(Ordering::Acquire, guard);
      if s.tag() == MARK {
        // p itself is leaving; start over.
        p = sentinel;
        continue;
      }
      if s.is_null() {
        return;
      }
      let s_ref = unsafe { s.deref() };
      let n = s_ref.next.load(Ordering::Acquire, guard);
      if n.tag() != MARK && !s_ref.is_matched(guard) {
        p = s;
        continue;
      }
      if n.is_null() {
        return;
      }
      unsafe { self.unlink_after(p_ref, s, guard) };
    }
  }

  #[cfg(test)]
  pub(crate) fn sweep_votes(&self) -> usize {
    self.sweep_votes.load(Ordering::Relaxed)
  }

  // --- Inspection ---

  /// First unmatched node, or null.
  pub(crate) fn first_unmatched<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
    let mut p = self.first(guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      let next = p_ref.next.load(Ordering::Acquire, guard);
      if next.tag() != MARK && !p_ref.is_matched(guard) {
        return p;
      }
      p = next.with_tag(0);
    }
    Shared::null()
  }

  /// Number of unmatched nodes of the given mode.
  pub(crate) fn count_of_mode(&self, data: bool) -> usize {
    let guard = &epoch::pin();
    let mut count = 0usize;
    let mut p = self.first(guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      let next = p_ref.next.load(Ordering::Acquire, guard);
      if next.tag() != MARK && !p_ref.is_matched(guard) {
        if p_ref.is_data != data {
          return 0;
        }
        count += 1;
      }
      p = next.with_tag(0);
    }
    count
  }

  /// True if the first unmatched node is of the given mode.
  pub(crate) fn has_waiting(&self, data: bool) -> bool {
    let guard = &epoch::pin();
    let p = self.first_unmatched(guard);
    !p.is_null() && unsafe { p.deref() }.is_data == data
  }

  /// Applies `f` to the element of each unmatched DATA node until it returns
  /// `Some`.
  pub(crate) fn find_data<R>(&self, mut f: impl FnMut(&T) -> Option<R>) -> Option<R>
  where
    T: Sync,
  {
    let guard = &epoch::pin();
    let mut p = self.first(guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      if !p_ref.is_data {
        if !p_ref.is_matched(guard) {
          return None;
        }
      } else {
        let current = p_ref.item.load(Ordering::Acquire, guard);
        if !current.is_null() {
          if let Some(Some(found)) = unsafe { current.deref() }.inspect(&mut f) {
            return Some(found);
          }
        }
      }
      p = p_ref.next.load(Ordering::Acquire, guard).with_tag(0);
    }
    None
  }

  /// Removes one unmatched element equal to `value`, waking a producer that
  /// may be waiting on it.
  pub(crate) fn remove_data(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    let guard = &epoch::pin();
    let mut pred = self.sentinel();
    let mut p = self.first(guard);
    while !p.is_null() {
      let p_ref = unsafe { p.deref() };
      let next = p_ref.next.load(Ordering::Acquire, guard);
      let current = p_ref.item.load(Ordering::Acquire, guard);
      if p_ref.is_data {
        if !current.is_null()
          && unsafe { current.deref() }.inspect(|v| v == value) == Some(true)
          && p_ref
            .item
            .compare_exchange(current, Shared::null(), Ordering::AcqRel, Ordering::Acquire, guard)
            .is_ok()
        {
          p_ref.waiter.wake();
          self.unsplice(unsafe { pred.deref() }, p, guard);
          drop(unsafe { item::take_detached(current, guard) });
          return true;
        }
      } else if !p_ref.is_matched(guard) {
        return false;
      }
      pred = p;
      p = next.with_tag(0);
    }
    false
  }

  /// Total number of linked nodes after the sentinel, matched or not.
  #[cfg(test)]
  pub(crate) fn node_count(&self) -> usize {
    let guard = &epoch::pin();
    let mut count = 0;
    let mut p = self.first(guard);
    while !p.is_null() {
      count += 1;
      p = unsafe { p.deref() }.next.load(Ordering::Acquire, guard).with_tag(0);
    }
    count
  }
}

impl<T> Drop for DualList<T> {
  fn drop(&mut self) {
    // SAFETY: `&mut self` excludes other users, so no thread waits on a node
    // and every linked node holds exactly the list's membership count plus
    // any not yet released by the collector.
    unsafe {
      let guard = epoch::unprotected();
      let mut p = self.head.next.load(Ordering::Relaxed, guard).with_tag(0);
      while !p.is_null() {
        let next = p.deref().next.load(Ordering::Relaxed, guard).with_tag(0);
        membership::release_now(p);
        p = next;
      }
    }
  }
}
