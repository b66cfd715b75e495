// src/rendezvous/stack.rs

//! Unfair rendezvous: a dual stack.
//!
//! An arriving operation that finds the stack empty, or topped by a node of
//! its own mode, pushes a waiting node and blocks. One that finds a waiting
//! node of the other mode pushes a FULFILLING node, matches the node below it
//! and pops both. Threads that find a fulfiller on top help it finish before
//! retrying.
//!
//! Popping and unlinking freeze the removed node's `next` with [`MARK`]
//! before the CAS that detaches it; the thread whose CAS succeeds retires the
//! node.

use crate::internal::item::{self, Item, CANCELLED};
use crate::internal::membership::{self, counted};
use crate::internal::spin::{self, SPIN_FOR_TIMEOUT_THRESHOLD};
use crate::internal::waiter::WaiterSlot;
use crate::sync_util;
use crate::telemetry;
use crate::transfer::list::{How, MARK};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use std::hint;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

const REQUEST: u8 = 0;
const DATA: u8 = 1;
const FULFILLING: u8 = 2;

#[inline]
fn is_fulfilling(mode: u8) -> bool {
  mode & FULFILLING != 0
}

struct Node<T> {
  item: Atomic<Item<T>>,
  mode: u8,
  next: Atomic<Node<T>>,
  /// The fulfiller this node was paired with (holding one count on it), or
  /// null tagged `CANCELLED`.
  matched: Atomic<Node<T>>,
  waiter: WaiterSlot,
}

impl<T> Node<T> {
  fn new(item: Option<Owned<Item<T>>>, mode: u8, next: Shared<'_, Node<T>>) -> Self {
    Node {
      item: match item {
        Some(owned) => Atomic::from(owned),
        None => Atomic::null(),
      },
      mode,
      next: Atomic::from(next),
      matched: Atomic::null(),
      waiter: WaiterSlot::new(),
    }
  }

  fn is_cancelled(&self, guard: &Guard) -> bool {
    let m = self.matched.load(Ordering::Acquire, guard);
    m.is_null() && m.tag() == CANCELLED
  }

  fn try_cancel(&self, guard: &Guard) -> bool {
    self
      .matched
      .compare_exchange(
        Shared::null(),
        Shared::null().with_tag(CANCELLED),
        Ordering::AcqRel,
        Ordering::Acquire,
        guard,
      )
      .is_ok()
  }

  /// Pairs this waiting node with fulfiller `s`. True if it is (now or
  /// already) matched to `s`.
  fn try_match(&self, s: Shared<'_, Node<T>>, guard: &Guard) -> bool {
    let current = self.matched.load(Ordering::Acquire, guard);
    if current.is_null() && current.tag() == 0 {
      // SAFETY: stack nodes are Arc allocations and `s` is protected by guard.
      let raw = Arc::into_raw(unsafe { counted(s) });
      match self.matched.compare_exchange(
        Shared::null(),
        Shared::from(raw),
        Ordering::AcqRel,
        Ordering::Acquire,
        guard,
      ) {
        Ok(_) => {
          self.waiter.wake();
          return true;
        }
        Err(e) => {
          unsafe { drop(Arc::from_raw(raw)) };
          return e.current == s;
        }
      }
    }
    current == s
  }

  /// Moves the element out of a node nobody else will take it from.
  fn take_item(&self, guard: &Guard) -> Option<T> {
    let current = self.item.swap(Shared::null(), Ordering::AcqRel, guard);
    if current.is_null() {
      None
    } else {
      Some(unsafe { item::take_detached(current, guard) })
    }
  }
}

impl<T> Drop for Node<T> {
  fn drop(&mut self) {
    unsafe {
      let guard = epoch::unprotected();
      let current = self.item.load(Ordering::Relaxed, guard);
      if !current.is_null() {
        item::drop_unreachable(current);
      }
      let fulfiller = self.matched.load(Ordering::Relaxed, guard);
      if !fulfiller.is_null() {
        membership::release_now(fulfiller);
      }
    }
  }
}

pub(crate) struct DualStack<T> {
  head: CachePadded<Atomic<Node<T>>>,
}

unsafe impl<T: Send> Send for DualStack<T> {}
unsafe impl<T: Send> Sync for DualStack<T> {}

impl<T> DualStack<T> {
  pub(crate) fn new() -> Self {
    DualStack {
      head: CachePadded::new(Atomic::null()),
    }
  }

  /// Offers an element (`Some`) or asks for one (`None`); same return
  /// convention as the dual list.
  pub(crate) fn transfer(&self, offer: Option<T>, how: How) -> Option<T> {
    let mode = if offer.is_some() { DATA } else { REQUEST };
    let mut item = offer.map(|value| Owned::new(Item::new(value)));
    let deadline = match how {
      How::Timed(deadline) => Some(deadline),
      _ => None,
    };
    let can_wait = match how {
      How::Now => false,
      How::Timed(deadline) => Instant::now() < deadline,
      How::Sync | How::Async => true,
    };

    loop {
      let guard = epoch::pin();
      let h = self.head.load(Ordering::Acquire, &guard);
      let top = unsafe { h.as_ref() };

      match top {
        None => {}
        Some(top) if top.mode == mode => {}
        Some(top) if !is_fulfilling(top.mode) => {
          if top.is_cancelled(&guard) {
            unsafe { self.pop(h, &guard) };
            continue;
          }
          let s = Arc::new(Node::new(item.take(), FULFILLING | mode, h));
          let s_ptr = match self.push(&s, h, &guard) {
            Some(s_ptr) => s_ptr,
            None => {
              item = s.take_item(&guard).map(|v| Owned::new(Item::new(v)));
              continue;
            }
          };
          match self.fulfill(&s, s_ptr, mode, &guard) {
            Some(received) => return received,
            None => {
              // Every waiter below gave up; start over with the element.
              item = s.take_item(&guard).map(|v| Owned::new(Item::new(v)));
              continue;
            }
          }
        }
        Some(top) => {
          self.help_fulfill(top, h, &guard);
          continue;
        }
      }

      // Empty, or a waiter of the same mode on top.
      if !can_wait {
        if top.map_or(false, |top| top.is_cancelled(&guard)) {
          unsafe { self.pop(h, &guard) };
          continue;
        }
        return item.map(Item::into_value);
      }
      let s = Arc::new(Node::new(item.take(), mode, h));
      if self.push(&s, h, &guard).is_none() {
        item = s.take_item(&guard).map(|v| Owned::new(Item::new(v)));
        continue;
      }
      drop(guard);
      return self.await_fulfill(s, deadline);
    }
  }

  /// Pushes `s` (whose `next` is `h`) if the top is still `h`.
  fn push<'g>(
    &self,
    s: &Arc<Node<T>>,
    h: Shared<'g, Node<T>>,
    guard: &'g Guard,
  ) -> Option<Shared<'g, Node<T>>> {
    let raw = Arc::into_raw(s.clone());
    let new = Shared::from(raw);
    match self
      .head
      .compare_exchange(h, new, Ordering::AcqRel, Ordering::Acquire, guard)
    {
      Ok(_) => Some(new),
      Err(_) => {
        unsafe { drop(Arc::from_raw(raw)) };
        None
      }
    }
  }

  /// Matches the waiter below fulfiller `s` and pops both. `None` if no
  /// waiter is left.
  fn fulfill(
    &self,
    s: &Node<T>,
    s_ptr: Shared<'_, Node<T>>,
    mode: u8,
    guard: &Guard,
  ) -> Option<Option<T>> {
    loop {
      let m = s.next.load(Ordering::Acquire, guard).with_tag(0);
      if m.is_null() {
        unsafe { self.pop(s_ptr, guard) };
        return None;
      }
      let m_ref = unsafe { m.deref() };
      if m_ref.try_match(s_ptr, guard) {
        unsafe { self.pop_pair(s_ptr, m, guard) };
        return Some(if mode == REQUEST {
          m_ref.take_item(guard)
        } else {
          None
        });
      }
      // m was cancelled.
      unsafe { self.unlink_after(s, m, guard) };
    }
  }

  fn help_fulfill(&self, h_ref: &Node<T>, h: Shared<'_, Node<T>>, guard: &Guard) {
    let m = h_ref.next.load(Ordering::Acquire, guard).with_tag(0);
    if m.is_null() {
      unsafe { self.pop(h, guard) };
      return;
    }
    let m_ref = unsafe { m.deref() };
    if m_ref.try_match(h, guard) {
      unsafe { self.pop_pair(h, m, guard) };
    } else {
      unsafe { self.unlink_after(h_ref, m, guard) };
    }
  }

  fn should_spin(&self, s: Shared<'_, Node<T>>, guard: &Guard) -> bool {
    let h = self.head.load(Ordering::Acquire, guard);
    h == s || h.is_null() || is_fulfilling(unsafe { h.deref() }.mode)
  }

  fn await_fulfill(&self, s: Arc<Node<T>>, deadline: Option<Instant>) -> Option<T> {
    let s_ptr: Shared<'_, Node<T>> = Shared::from(Arc::as_ptr(&s));
    let mut spins: Option<u32> = None;
    loop {
      let guard = epoch::pin();
      let m = s.matched.load(Ordering::Acquire, &guard);
      if !m.is_null() {
        s.waiter.clear();
        // Help the fulfiller pop us.
        let h = self.head.load(Ordering::Acquire, &guard);
        if h == m && unsafe { h.deref() }.next.load(Ordering::Acquire, &guard).with_tag(0) == s_ptr
        {
          unsafe { self.pop_pair(h, s_ptr, &guard) };
        }
        return if s.mode == REQUEST {
          unsafe { m.deref() }.take_item(&guard)
        } else {
          None
        };
      }
      if m.tag() == CANCELLED {
        s.waiter.clear();
        tracing::trace!(mode = s.mode, "rendezvous wait timed out; node cancelled");
        telemetry::log_event(None, "rendezvous::await_fulfill", "Cancelled", None);
        self.clean(&s, &guard);
        return s.take_item(&guard);
      }
      if deadline.map_or(false, |d| Instant::now() >= d) {
        s.try_cancel(&guard);
        continue;
      }

      match spins {
        None => {
          spins = Some(if self.should_spin(s_ptr, &guard) {
            if deadline.is_some() {
              spin::max_timed_spins()
            } else {
              spin::max_untimed_spins()
            }
          } else {
            0
          })
        }
        Some(n) if n > 0 => {
          hint::spin_loop();
          spins = Some(if self.should_spin(s_ptr, &guard) { n - 1 } else { 0 });
        }
        Some(_) => {
          if !s.waiter.is_registered() {
            s.waiter.register();
            continue;
          }
          drop(guard);
          telemetry::increment_counter("rendezvous::await_fulfill", "Park");
          match deadline {
            Some(d) => {
              let left = sync_util::remaining(d);
              if left > SPIN_FOR_TIMEOUT_THRESHOLD {
                sync_util::park_thread_timeout(left);
              }
            }
            None => sync_util::park_thread(),
          }
        }
      }
    }
  }

  /// Removes cancelled node `s` and any other cancelled nodes between the
  /// top and `s`'s successor.
  fn clean(&self, s: &Node<T>, guard: &Guard) {
    let mut past = s.next.load(Ordering::Acquire, guard).with_tag(0);
    if let Some(p) = unsafe { past.as_ref() } {
      if p.is_cancelled(guard) {
        past = p.next.load(Ordering::Acquire, guard).with_tag(0);
      }
    }

    let mut p = self.head.load(Ordering::Acquire, guard);
    while !p.is_null() && p != past && unsafe { p.deref() }.is_cancelled(guard) {
      unsafe { self.pop(p, guard) };
      p = self.head.load(Ordering::Acquire, guard);
    }

    while !p.is_null() && p != past {
      let p_ref = unsafe { p.deref() };
      let n = p_ref.next.load(Ordering::Acquire, guard).with_tag(0);
      if let Some(n_ref) = unsafe { n.as_ref() } {
        if n_ref.is_cancelled(guard) && unsafe { self.unlink_after(p_ref, n, guard) } {
          continue;
        }
      }
      p = n;
    }
  }

  // --- Unlinking ---

  /// Freezes `x.next`, returning the successor it was frozen at.
  fn freeze<'g>(x: &Node<T>, guard: &'g Guard) -> Shared<'g, Node<T>> {
    let mut n = x.next.load(Ordering::Acquire, guard);
    loop {
      if n.tag() == MARK {
        return n.with_tag(0);
      }
      match x
        .next
        .compare_exchange(n, n.with_tag(MARK), Ordering::AcqRel, Ordering::Acquire, guard)
      {
        Ok(_) => return n,
        Err(e) => n = e.current,
      }
    }
  }

  /// Pops `h` if it is still on top.
  ///
  /// # Safety
  /// `h` must be non-null and protected by `guard`.
  unsafe fn pop(&self, h: Shared<'_, Node<T>>, guard: &Guard) -> bool {
    let succ = Self::freeze(h.deref(), guard);
    if self
      .head
      .compare_exchange(h, succ, Ordering::AcqRel, Ordering::Acquire, guard)
      .is_ok()
    {
      membership::retire(h, guard);
      true
    } else {
      false
    }
  }

  /// Pops fulfiller `h` together with its matched waiter `m`.
  ///
  /// # Safety
  /// Both must be non-null and protected by `guard`, and `m` must be
  /// matched to `h`.
  unsafe fn pop_pair(&self, h: Shared<'_, Node<T>>, m: Shared<'_, Node<T>>, guard: &Guard) {
    if Self::freeze(h.deref(), guard) != m {
      return;
    }
    let mn = Self::freeze(m.deref(), guard);
    if self
      .head
      .compare_exchange(h, mn, Ordering::AcqRel, Ordering::Acquire, guard)
      .is_ok()
    {
      membership::retire(h, guard);
      membership::retire(m, guard);
    }
  }

  /// Unlinks `x` from below `pred`.
  ///
  /// # Safety
  /// `x` must be non-null and protected by `guard`.
  unsafe fn unlink_after(&self, pred: &Node<T>, x: Shared<'_, Node<T>>, guard: &Guard) -> bool {
    let succ = Self::freeze(x.deref(), guard);
    if pred
      .next
      .compare_exchange(x, succ, Ordering::AcqRel, Ordering::Acquire, guard)
      .is_ok()
    {
      membership::retire(x, guard);
      true
    } else {
      false
    }
  }
}

impl<T> Drop for DualStack<T> {
  fn drop(&mut self) {
    // SAFETY: no thread is operating on the stack, so every node still
    // linked holds the stack's count and nothing else will release it.
    unsafe {
      let guard = epoch::unprotected();
      let mut p = self.head.load(Ordering::Relaxed, guard).with_tag(0);
      while !p.is_null() {
        let next = p.deref().next.load(Ordering::Relaxed, guard).with_tag(0);
        membership::release_now(p);
        p = next;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn immediate_offer_without_taker_is_refused() {
    let stack = DualStack::new();
    assert_eq!(stack.transfer(Some(7), How::Now), Some(7));
    assert_eq!(stack.transfer(None, How::Now), None);
    let guard = &epoch::pin();
    assert!(stack.head.load(Ordering::Acquire, guard).is_null());
  }

  #[test]
  fn cancelled_waiter_is_cleaned_from_top() {
    let stack: DualStack<u8> = DualStack::new();
    let deadline = Instant::now() + Duration::from_millis(5);
    assert_eq!(stack.transfer(None, How::Timed(deadline)), None);
    let guard = &epoch::pin();
    assert!(stack.head.load(Ordering::Acquire, guard).is_null());
  }

  #[test]
  fn waiting_taker_is_fulfilled_by_producer() {
    let stack = Arc::new(DualStack::new());
    let taker = {
      let stack = stack.clone();
      thread::spawn(move || stack.transfer(None, How::Sync))
    };
    // Keep offering until the taker is on the stack.
    let mut value = String::from("hand-off");
    while let Some(back) = stack.transfer(Some(value), How::Now) {
      value = back;
      thread::yield_now();
    }
    assert_eq!(taker.join().unwrap(), Some(String::from("hand-off")));
  }
}
