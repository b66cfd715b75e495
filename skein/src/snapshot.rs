// src/snapshot.rs

// Only compiled with the 'serde' feature.
#![cfg(feature = "serde")]

//! Saving and restoring collections as ordered element lists.

use crate::deque::LinkedDeque;
use crate::queue::LinkedQueue;
use crate::rendezvous::{Fairness, SyncQueue};
use crate::transfer::TransferQueue;

use serde::{Deserialize, Serialize};

/// A serializable, point-in-time copy of a collection's elements, head to
/// tail.
///
/// Created with `to_snapshot()` on any collection and restored with the
/// matching `from_snapshot()`. Taken while other threads modify the
/// collection, it holds a weakly consistent view: each element at most once,
/// in queue order.
///
/// A [`SyncQueue`] never holds elements; its snapshot records only the
/// pairing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot<T> {
  elements: Vec<T>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  fairness: Option<Fairness>,
}

impl<T> QueueSnapshot<T> {
  pub(crate) fn new(elements: Vec<T>) -> Self {
    Self {
      elements,
      fairness: None,
    }
  }

  /// The saved elements, head first.
  pub fn elements(&self) -> &[T] {
    &self.elements
  }

  /// Consumes the snapshot, returning its elements.
  pub fn into_elements(self) -> Vec<T> {
    self.elements
  }
}

impl<T: Clone + Sync> LinkedQueue<T> {
  /// Copies the current elements into a snapshot.
  pub fn to_snapshot(&self) -> QueueSnapshot<T> {
    QueueSnapshot::new(self.iter().collect())
  }
}

impl<T> LinkedQueue<T> {
  /// Builds a queue holding the snapshot's elements in order.
  pub fn from_snapshot(snapshot: QueueSnapshot<T>) -> Self {
    snapshot.elements.into_iter().collect()
  }
}

impl<T: Clone + Sync> LinkedDeque<T> {
  /// Copies the current elements, front to back, into a snapshot.
  pub fn to_snapshot(&self) -> QueueSnapshot<T> {
    QueueSnapshot::new(self.iter().collect())
  }
}

impl<T> LinkedDeque<T> {
  /// Builds a deque holding the snapshot's elements, front to back.
  pub fn from_snapshot(snapshot: QueueSnapshot<T>) -> Self {
    snapshot.elements.into_iter().collect()
  }
}

impl<T: Clone + Sync> TransferQueue<T> {
  /// Copies the queued elements into a snapshot. Waiting consumers are not
  /// recorded; elements of producers blocked in `transfer` are.
  pub fn to_snapshot(&self) -> QueueSnapshot<T> {
    QueueSnapshot::new(self.iter().collect())
  }
}

impl<T> TransferQueue<T> {
  /// Builds a queue holding the snapshot's elements in order.
  pub fn from_snapshot(snapshot: QueueSnapshot<T>) -> Self {
    snapshot.elements.into_iter().collect()
  }
}

impl<T> SyncQueue<T> {
  /// Records the pairing policy.
  pub fn to_snapshot(&self) -> QueueSnapshot<T> {
    QueueSnapshot {
      elements: Vec::new(),
      fairness: Some(self.fairness()),
    }
  }

  /// Builds a queue with the saved pairing policy. Any saved elements are
  /// dropped, since a rendezvous queue cannot hold them.
  pub fn from_snapshot(snapshot: QueueSnapshot<T>) -> Self {
    SyncQueue::with_fairness(snapshot.fairness.unwrap_or_default())
  }
}
