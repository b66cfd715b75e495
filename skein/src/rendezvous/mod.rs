// src/rendezvous/mod.rs

//! A zero-capacity rendezvous channel.
//!
//! Every insertion into a [`SyncQueue`] waits for a matching removal and vice
//! versa; the queue itself never holds elements. Pairing is done by one of
//! two strategies chosen at construction:
//!
//! - [`Fairness::Unfair`] (default): a dual stack. The most recent waiter is
//!   paired first, which keeps hot threads running.
//! - [`Fairness::Fair`]: a dual queue. Waiters are paired in arrival order.

mod stack;

use crate::error::{TransferTimeoutError, TryTransferError};
use crate::transfer::list::{DualList, How, SpinPolicy};
use stack::DualStack;

use std::fmt;
use std::iter;
use std::time::Duration;

/// Pairing policy of a [`SyncQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Fairness {
  /// Pair the most recently arrived waiter first.
  #[default]
  Unfair,
  /// Pair waiters in arrival order.
  Fair,
}

enum Transferer<T> {
  Stack(DualStack<T>),
  Queue(DualList<T>),
}

impl<T> Transferer<T> {
  fn transfer(&self, offer: Option<T>, how: How) -> Option<T> {
    match self {
      Transferer::Stack(stack) => stack.transfer(offer, how),
      Transferer::Queue(list) => list.xfer(offer, how),
    }
  }
}

/// A blocking queue with no capacity, in which each `put` waits for a `take`.
///
/// `len` is always 0 and iteration yields nothing. An element is only ever
/// "in" the queue while some thread is trying to hand it over.
pub struct SyncQueue<T> {
  transferer: Transferer<T>,
  fairness: Fairness,
}

unsafe impl<T: Send> Send for SyncQueue<T> {}
unsafe impl<T: Send> Sync for SyncQueue<T> {}

impl<T> SyncQueue<T> {
  /// Creates a queue with the unfair (stack) pairing policy.
  pub fn new() -> Self {
    Self::with_fairness(Fairness::Unfair)
  }

  /// Creates a queue with the given pairing policy.
  pub fn with_fairness(fairness: Fairness) -> Self {
    let transferer = match fairness {
      Fairness::Unfair => Transferer::Stack(DualStack::new()),
      Fairness::Fair => Transferer::Queue(DualList::new(SpinPolicy::FrontOnly)),
    };
    SyncQueue { transferer, fairness }
  }

  /// Hands `value` to a consumer, waiting as long as needed.
  pub fn put(&self, value: T) {
    let mut value = value;
    while let Some(back) = self.transferer.transfer(Some(value), How::Sync) {
      value = back;
    }
  }

  /// Receives an element, waiting as long as needed.
  pub fn take(&self) -> T {
    loop {
      if let Some(value) = self.transferer.transfer(None, How::Sync) {
        return value;
      }
    }
  }

  /// Hands `value` to a consumer that is already waiting; otherwise returns
  /// it.
  pub fn offer(&self, value: T) -> Result<(), TryTransferError<T>> {
    match self.transferer.transfer(Some(value), How::Now) {
      None => Ok(()),
      Some(back) => Err(TryTransferError::NoReceiver(back)),
    }
  }

  /// Hands `value` to a consumer, waiting up to `timeout` for one.
  pub fn offer_timeout(&self, value: T, timeout: Duration) -> Result<(), TransferTimeoutError<T>> {
    match self.transferer.transfer(Some(value), How::timed(timeout)) {
      None => Ok(()),
      Some(back) => Err(TransferTimeoutError::Timeout(back)),
    }
  }

  /// Same as [`offer`](Self::offer).
  pub fn try_transfer(&self, value: T) -> Result<(), TryTransferError<T>> {
    self.offer(value)
  }

  /// Receives an element from a producer that is already waiting.
  pub fn poll(&self) -> Option<T> {
    self.transferer.transfer(None, How::Now)
  }

  /// Receives an element, waiting up to `timeout` for a producer.
  pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
    self.transferer.transfer(None, How::timed(timeout))
  }

  /// Always 0.
  pub fn len(&self) -> usize {
    0
  }

  /// Always true.
  pub fn is_empty(&self) -> bool {
    true
  }

  /// Always 0.
  pub fn capacity(&self) -> usize {
    0
  }

  /// Always `Some(0)`.
  pub fn remaining_capacity(&self) -> Option<usize> {
    Some(0)
  }

  /// Moves elements from producers that are already waiting into `sink`.
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

  /// An iterator that yields nothing.
  pub fn iter(&self) -> iter::Empty<T> {
    iter::empty()
  }

  /// True if waiters are paired in arrival order.
  pub fn is_fair(&self) -> bool {
    self.fairness == Fairness::Fair
  }

  /// The pairing policy chosen at construction.
  pub fn fairness(&self) -> Fairness {
    self.fairness
  }
}

impl<T> Default for SyncQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for SyncQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SyncQueue")
      .field("fairness", &self.fairness)
      .finish_non_exhaustive()
  }
}
