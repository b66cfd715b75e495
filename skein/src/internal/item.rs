// src/internal/item.rs

//! Element cells shared by every node type.
//!
//! A node refers to its element through an `Atomic<Item<T>>`. The thread that
//! swings that pointer away from a live item owns the element and moves it
//! out with [`Item::take`]. Threads that only look at the element (peek,
//! contains, iteration) go through [`Item::inspect`], which refuses once the
//! owner has started taking it, so a reference handed to a caller never
//! outlives the value.
//!
//! The null pointer's tag distinguishes why a node holds no element:
//! plain null means taken (or never set, for request nodes), `CANCELLED`
//! marks a waiter that gave up, and `CONSUMED` marks a request node whose
//! waiter already collected the element handed to it.

use crossbeam_epoch::{Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use std::cell::UnsafeCell;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Set in `readers` once the owner begins moving the value out.
const CLOSED: usize = 1 << (usize::BITS - 1);

/// Tag on a null item pointer: the waiting thread cancelled its node.
pub(crate) const CANCELLED: usize = 1;
/// Tag on a null item pointer: a request node's waiter took its element.
pub(crate) const CONSUMED: usize = 2;

pub(crate) struct Item<T> {
  readers: AtomicUsize,
  value: UnsafeCell<ManuallyDrop<T>>,
}

impl<T> Item<T> {
  pub(crate) fn new(value: T) -> Self {
    Item {
      readers: AtomicUsize::new(0),
      value: UnsafeCell::new(ManuallyDrop::new(value)),
    }
  }

  /// Runs `f` against the value unless its owner has started taking it.
  pub(crate) fn inspect<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
    if self.readers.fetch_add(1, Ordering::Acquire) & CLOSED != 0 {
      self.readers.fetch_sub(1, Ordering::Release);
      return None;
    }
    let _reader = ReaderGuard(&self.readers);
    // SAFETY: CLOSED was clear when this reader registered, and `take` waits
    // for every registered reader before moving the value out.
    Some(f(unsafe { &**self.value.get() }))
  }

  /// Moves the value out, waiting for in-flight readers to finish.
  ///
  /// # Safety
  /// The caller must be the single thread that detached this item from its
  /// node, and must call this at most once.
  pub(crate) unsafe fn take(&self) -> T {
    self.readers.fetch_or(CLOSED, Ordering::AcqRel);
    let backoff = Backoff::new();
    while self.readers.load(Ordering::Acquire) & !CLOSED != 0 {
      backoff.snooze();
    }
    ManuallyDrop::take(&mut *self.value.get())
  }

  /// Recovers the value from an item that was never published.
  pub(crate) fn into_value(item: Owned<Item<T>>) -> T {
    let item = item.into_box();
    ManuallyDrop::into_inner(item.value.into_inner())
  }
}

struct ReaderGuard<'a>(&'a AtomicUsize);

impl Drop for ReaderGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::Release);
  }
}

/// Takes the value out of an item this thread detached, and schedules the
/// cell for reclamation once concurrent readers have unpinned.
///
/// # Safety
/// `item` must be non-null and must have been detached by this thread's
/// successful CAS.
pub(crate) unsafe fn take_detached<T>(item: Shared<'_, Item<T>>, guard: &Guard) -> T {
  let value = item.deref().take();
  guard.defer_destroy(item);
  value
}

/// Drops an item and its value when no other thread can reach it.
///
/// # Safety
/// `item` must be non-null and exclusively owned by the caller.
pub(crate) unsafe fn drop_unreachable<T>(item: Shared<'_, Item<T>>) {
  let mut owned = item.into_owned();
  ManuallyDrop::drop(owned.value.get_mut());
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossbeam_epoch as epoch;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;

  struct DropCounter(Arc<AtomicUsize>);
  impl Drop for DropCounter {
    fn drop(&mut self) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn inspect_refuses_after_take() {
    let item = Item::new(String::from("value"));
    assert_eq!(item.inspect(|v| v.len()), Some(5));
    let value = unsafe { item.take() };
    assert_eq!(value, "value");
    assert_eq!(item.inspect(|v| v.len()), None);
  }

  #[test]
  fn unpublished_item_returns_its_value() {
    let owned = Owned::new(Item::new(vec![1, 2, 3]));
    assert_eq!(Item::into_value(owned), vec![1, 2, 3]);
  }

  #[test]
  fn drop_unreachable_drops_value_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let guard = unsafe { epoch::unprotected() };
    let shared = Owned::new(Item::new(DropCounter(drops.clone()))).into_shared(guard);
    unsafe { drop_unreachable(shared) };
    assert_eq!(drops.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn taken_value_is_not_dropped_by_cell() {
    let drops = Arc::new(AtomicUsize::new(0));
    let guard = &epoch::pin();
    let shared = Owned::new(Item::new(DropCounter(drops.clone()))).into_shared(guard);
    let value = unsafe { take_detached(shared, guard) };
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(value);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
  }
}
