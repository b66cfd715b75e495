// src/transfer/mod.rs

//! An unbounded FIFO queue in which producers may wait for consumers.
//!
//! [`TransferQueue`] behaves like [`LinkedQueue`](crate::LinkedQueue) for
//! `put`/`offer`/`poll`, but a producer can also hand an element directly to
//! a consumer with [`transfer`](TransferQueue::transfer) (waiting as long as
//! it takes), [`try_transfer`](TransferQueue::try_transfer) (only if a
//! consumer is already waiting) or
//! [`try_transfer_timeout`](TransferQueue::try_transfer_timeout).
//!
//! Consumers that find the queue empty in `take`/`poll_timeout` enqueue a
//! request and wait; the next producer fills that request instead of
//! appending.

mod iter;
pub(crate) mod list;

#[cfg(test)]
mod tests;

pub use iter::Iter;

use crate::error::{TransferTimeoutError, TryTransferError};
use list::{DualList, How, SpinPolicy};

use std::fmt;
use std::iter::FromIterator;
use std::time::Duration;

/// An unbounded, lock-free queue with optional producer-consumer handoff.
///
/// Waiting operations spin briefly, then park the calling thread. Non-waiting
/// operations never block.
pub struct TransferQueue<T> {
  list: DualList<T>,
}

unsafe impl<T: Send> Send for TransferQueue<T> {}
unsafe impl<T: Send> Sync for TransferQueue<T> {}

impl<T> TransferQueue<T> {
  /// Creates an empty queue.
  pub fn new() -> Self {
    TransferQueue {
      list: DualList::new(SpinPolicy::Chained),
    }
  }

  /// Inserts `value` at the tail, or hands it to a waiting consumer. Never
  /// blocks.
  pub fn put(&self, value: T) {
    self.list.xfer(Some(value), How::Async);
  }

  /// Same as [`put`](Self::put); always returns `true`.
  pub fn offer(&self, value: T) -> bool {
    self.put(value);
    true
  }

  /// Hands `value` to a consumer, waiting for one if necessary.
  ///
  /// The element is enqueued while waiting, so it is visible to `poll`,
  /// `peek` and iteration, and can be taken by any consumer.
  pub fn transfer(&self, value: T) {
    let mut value = value;
    while let Some(back) = self.list.xfer(Some(value), How::Sync) {
      value = back;
    }
  }

  /// Hands `value` to a consumer that is already waiting. Otherwise returns
  /// it without enqueueing.
  pub fn try_transfer(&self, value: T) -> Result<(), TryTransferError<T>> {
    match self.list.xfer(Some(value), How::Now) {
      None => Ok(()),
      Some(back) => Err(TryTransferError::NoReceiver(back)),
    }
  }

  /// Hands `value` to a consumer, waiting up to `timeout` for one. On
  /// timeout the element is withdrawn from the queue and returned.
  pub fn try_transfer_timeout(
    &self,
    value: T,
    timeout: Duration,
  ) -> Result<(), TransferTimeoutError<T>> {
    match self.list.xfer(Some(value), How::timed(timeout)) {
      None => Ok(()),
      Some(back) => Err(TransferTimeoutError::Timeout(back)),
    }
  }

  /// Removes the head element, waiting for one if the queue is empty.
  pub fn take(&self) -> T {
    loop {
      if let Some(value) = self.list.xfer(None, How::Sync) {
        return value;
      }
    }
  }

  /// Removes the head element, or returns `None` if the queue is empty.
  pub fn poll(&self) -> Option<T> {
    self.list.xfer(None, How::Now)
  }

  /// Removes the head element, waiting up to `timeout` for one.
  pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
    self.list.xfer(None, How::timed(timeout))
  }

  /// Returns a clone of the head element without removing it.
  pub fn peek(&self) -> Option<T>
  where
    T: Clone + Sync,
  {
    self.list.find_data(|v| Some(v.clone()))
  }

  /// True if some element equals `value`.
  pub fn contains(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    self.list.find_data(|v| if v == value { Some(()) } else { None }).is_some()
  }

  /// Removes one element equal to `value`. A producer blocked in
  /// `transfer` on that element returns as if it had been received.
  pub fn remove(&self, value: &T) -> bool
  where
    T: PartialEq + Sync,
  {
    self.list.remove_data(value)
  }

  /// Number of elements, counted by walking the list.
  pub fn len(&self) -> usize {
    self.list.count_of_mode(true)
  }

  /// True if the queue holds no elements. Waiting consumers do not count.
  pub fn is_empty(&self) -> bool {
    !self.list.has_waiting(true)
  }

  /// True if at least one consumer is waiting in `take` or `poll_timeout`.
  pub fn has_waiting_consumer(&self) -> bool {
    self.list.has_waiting(false)
  }

  /// Estimated number of waiting consumers.
  pub fn waiting_consumer_count(&self) -> usize {
    self.list.count_of_mode(false)
  }

  /// Unbounded.
  pub fn remaining_capacity(&self) -> Option<usize> {
    None
  }

  /// Removes every available element, moving each into `sink` in FIFO order.
  pub fn drain_into<E: Extend<T>>(&self, sink: &mut E) -> usize {
    self.drain_into_max(sink, usize::MAX)
  }

  /// Like [`drain_into`](Self::drain_into), moving at most `max` elements.
  pub fn drain_into_max<E: Extend<T>>(&self, sink: &mut E, max: usize) -> usize {
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

  /// Iterates over clones of the queued elements, head to tail. Weakly
  /// consistent.
  pub fn iter(&self) -> Iter<'_, T>
  where
    T: Clone + Sync,
  {
    Iter::new(self)
  }
}

impl<T> Default for TransferQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> FromIterator<T> for TransferQueue<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let queue = TransferQueue::new();
    for value in iter {
      queue.put(value);
    }
    queue
  }
}

impl<T> Extend<T> for TransferQueue<T> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for value in iter {
      self.put(value);
    }
  }
}

impl<T> fmt::Debug for TransferQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransferQueue")
      .field("len", &self.len())
      .field("waiting_consumers", &self.waiting_consumer_count())
      .finish_non_exhaustive()
  }
}
