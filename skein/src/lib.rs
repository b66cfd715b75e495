#![warn(missing_debug_implementations, rust_2018_idioms)]

//! Non-blocking, linked-node concurrent collections for Rust.
//!
//! Skein provides four collections built on the same lock-free linked-list
//! machinery:
//!
//! - [`LinkedQueue`]: an unbounded FIFO queue (Michael–Scott).
//! - [`LinkedDeque`]: an unbounded double-ended queue with lock-free
//!   insertion and removal at both ends.
//! - [`TransferQueue`]: an unbounded FIFO queue whose producers may
//!   optionally wait until a consumer receives their element.
//! - [`SyncQueue`]: a zero-capacity rendezvous channel in which every
//!   insertion waits for a matching removal, with an unfair (LIFO) or fair
//!   (FIFO) pairing policy.
//!
//! None of these collections use locks on their data paths. Blocking
//! operations spin briefly and then park the calling thread. Memory is
//! reclaimed with `crossbeam-epoch`, so traversals stay safe while other
//! threads unlink nodes concurrently.
//!
//! The [`ConcurrentQueue`] and [`BlockingQueue`] traits describe the common
//! queue contract. With the `serde` feature enabled, every collection can be
//! saved and restored as an ordered list of elements.

pub mod contract;
pub mod deque;
pub mod error;
pub mod queue;
pub mod rendezvous;
pub mod telemetry;
pub mod transfer;

#[cfg(feature = "serde")]
pub mod snapshot;

// Internal utilities - not part of public API but exposed for crate use
mod internal;
mod sync_util;

// Public re-exports for convenience
pub use contract::{BlockingQueue, ConcurrentQueue};
pub use deque::LinkedDeque;
pub use error::{TransferTimeoutError, TryTransferError};
pub use queue::LinkedQueue;
pub use rendezvous::{Fairness, SyncQueue};
pub use transfer::TransferQueue;

#[cfg(feature = "serde")]
pub use snapshot::QueueSnapshot;

// Helper function to check if a type is Send + Sync.
// Useful for static assertions in generic code.
#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
