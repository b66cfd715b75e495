// src/contract.rs

//! Queue contracts shared by the collections in this crate.
//!
//! Worker pools and schedulers can be written against these traits instead
//! of a concrete collection. [`ConcurrentQueue`] covers the non-blocking
//! operations every collection supports; [`BlockingQueue`] adds the waiting
//! operations of [`TransferQueue`] and [`SyncQueue`].

use crate::deque::LinkedDeque;
use crate::error::TransferTimeoutError;
use crate::queue::LinkedQueue;
use crate::rendezvous::SyncQueue;
use crate::transfer::TransferQueue;

use std::time::Duration;

/// Non-blocking queue operations.
pub trait ConcurrentQueue<T> {
  /// Inserts `value`. Returns false if the queue refused it.
  fn offer(&self, value: T) -> bool;

  /// Removes the head element, if any, without waiting.
  fn poll(&self) -> Option<T>;

  /// Removes one element equal to `value`.
  fn remove(&self, value: &T) -> bool
  where
    T: PartialEq + Sync;

  /// Number of elements. May be a traversal, and only a snapshot under
  /// concurrent modification.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Moves every available element into `sink`, returning how many moved.
  fn drain_into<E: Extend<T>>(&self, sink: &mut E) -> usize
  where
    Self: Sized,
  {
    self.drain_into_max(sink, usize::MAX)
  }

  /// Moves at most `max` available elements into `sink`.
  fn drain_into_max<E: Extend<T>>(&self, sink: &mut E, max: usize) -> usize
  where
    Self: Sized,
  {
    let mut moved = 0;
    while moved < max {
      match self.poll() {
        Some(value) => {
          sink.extend(Some(value));
          moved += 1;
        }
        None => break,
      }
    }
    moved
  }
}

/// Queue operations that may wait.
pub trait BlockingQueue<T>: ConcurrentQueue<T> {
  /// Inserts `value`, waiting as long as the queue requires.
  fn put(&self, value: T);

  /// Removes the head element, waiting for one.
  fn take(&self) -> T;

  /// Removes the head element, waiting up to `timeout`.
  fn poll_timeout(&self, timeout: Duration) -> Option<T>;

  /// Inserts `value`, waiting up to `timeout` for the queue to accept it.
  fn offer_timeout(&self, value: T, timeout: Duration) -> Result<(), TransferTimeoutError<T>>;

  /// Elements that can be inserted without waiting; `None` if unbounded.
  fn remaining_capacity(&self) -> Option<usize>;
}

// --- LinkedQueue ---

impl<T> ConcurrentQueue<T> for LinkedQueue<T> {
  fn offer(&self, value: T) -> bool {
    self.push(value);
    true
  }

  fn poll(&self) -> Option<T> {
    self.pop()
  }

  fn remove(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    LinkedQueue::remove(self, value)
  }

  fn len(&self) -> usize {
    LinkedQueue::len(self)
  }

  fn is_empty(&self) -> bool {
    LinkedQueue::is_empty(self)
  }
}

// --- LinkedDeque ---

impl<T> ConcurrentQueue<T> for LinkedDeque<T> {
  fn offer(&self, value: T) -> bool {
    self.push_back(value);
    true
  }

  fn poll(&self) -> Option<T> {
    self.pop_front()
  }

  fn remove(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    self.remove_first_occurrence(value)
  }

  fn len(&self) -> usize {
    LinkedDeque::len(self)
  }

  fn is_empty(&self) -> bool {
    LinkedDeque::is_empty(self)
  }
}

// --- TransferQueue ---

impl<T> ConcurrentQueue<T> for TransferQueue<T> {
  fn offer(&self, value: T) -> bool {
    TransferQueue::offer(self, value)
  }

  fn poll(&self) -> Option<T> {
    TransferQueue::poll(self)
  }

  fn remove(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    TransferQueue::remove(self, value)
  }

  fn len(&self) -> usize {
    TransferQueue::len(self)
  }

  fn is_empty(&self) -> bool {
    TransferQueue::is_empty(self)
  }
}

impl<T> BlockingQueue<T> for TransferQueue<T> {
  fn put(&self, value: T) {
    TransferQueue::put(self, value)
  }

  fn take(&self) -> T {
    TransferQueue::take(self)
  }

  fn poll_timeout(&self, timeout: Duration) -> Option<T> {
    TransferQueue::poll_timeout(self, timeout)
  }

  /// Never waits: the queue is unbounded.
  fn offer_timeout(&self, value: T, _timeout: Duration) -> Result<(), TransferTimeoutError<T>> {
    TransferQueue::put(self, value);
    Ok(())
  }

  fn remaining_capacity(&self) -> Option<usize> {
    None
  }
}

// --- SyncQueue ---

impl<T> ConcurrentQueue<T> for SyncQueue<T> {
  /// Succeeds only if a consumer is already waiting.
  fn offer(&self, value: T) -> bool {
    SyncQueue::offer(self, value).is_ok()
  }

  fn poll(&self) -> Option<T> {
    SyncQueue::poll(self)
  }

  /// Nothing is ever held, so nothing can be removed.
  fn remove(&self, _value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    false
  }

  fn len(&self) -> usize {
    0
  }

  fn is_empty(&self) -> bool {
    true
  }
}

impl<T> BlockingQueue<T> for SyncQueue<T> {
  fn put(&self, value: T) {
    SyncQueue::put(self, value)
  }

  fn take(&self) -> T {
    SyncQueue::take(self)
  }

  fn poll_timeout(&self, timeout: Duration) -> Option<T> {
    SyncQueue::poll_timeout(self, timeout)
  }

  fn offer_timeout(&self, value: T, timeout: Duration) -> Result<(), TransferTimeoutError<T>> {
    SyncQueue::offer_timeout(self, value, timeout)
  }

  fn remaining_capacity(&self) -> Option<usize> {
    Some(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fill_and_drain<Q: ConcurrentQueue<u32>>(queue: &Q) -> Vec<u32> {
    for i in 0..5 {
      assert!(queue.offer(i));
    }
    assert_eq!(queue.len(), 5);
    assert!(queue.remove(&2));
    let mut out = Vec::new();
    assert_eq!(queue.drain_into_max(&mut out, 3), 3);
    assert_eq!(queue.drain_into(&mut out), 1);
    assert!(queue.is_empty());
    out
  }

  #[test]
  fn unbounded_collections_share_the_contract() {
    assert_eq!(fill_and_drain(&LinkedQueue::new()), vec![0, 1, 3, 4]);
    assert_eq!(fill_and_drain(&LinkedDeque::new()), vec![0, 1, 3, 4]);
    assert_eq!(fill_and_drain(&TransferQueue::new()), vec![0, 1, 3, 4]);
  }

  #[test]
  fn rendezvous_refuses_without_partner() {
    let queue = SyncQueue::new();
    assert!(!ConcurrentQueue::offer(&queue, 1));
    assert_eq!(ConcurrentQueue::poll(&queue), None);
    assert_eq!(BlockingQueue::remaining_capacity(&queue), Some(0));
    let err = BlockingQueue::offer_timeout(&queue, 9, Duration::from_millis(2)).unwrap_err();
    assert_eq!(err.into_inner(), 9);
  }
}
