// src/internal/membership.rs

//! Reference-counted nodes reached through epoch-protected pointers.
//!
//! Nodes a thread may park on are allocated with `Arc`. The structure owns
//! one count for as long as the node is linked; a waiting thread owns
//! another, so it can park without staying pinned.

use crossbeam_epoch::{Guard, Shared};
use std::sync::Arc;

/// Takes a new owning handle on a node reached while pinned.
///
/// # Safety
/// `node` must be non-null, must point into an `Arc` allocation, and must be
/// protected by a guard for the duration of the call.
pub(crate) unsafe fn counted<N>(node: Shared<'_, N>) -> Arc<N> {
  let raw = node.as_raw();
  Arc::increment_strong_count(raw);
  Arc::from_raw(raw)
}

/// Releases the structure's count on an unlinked node once every thread
/// pinned now has unpinned.
///
/// # Safety
/// `node` must come from `Arc::into_raw` for the structure's own count, and
/// only the thread that unlinked it may call this, once.
pub(crate) unsafe fn retire<N>(node: Shared<'_, N>, guard: &Guard) {
  let raw = node.as_raw();
  guard.defer_unchecked(move || drop(Arc::from_raw(raw)));
}

/// Drops the structure's count on a node with no concurrent users.
///
/// # Safety
/// As for [`retire`], and no other thread may be able to reach the node.
pub(crate) unsafe fn release_now<N>(node: Shared<'_, N>) {
  drop(Arc::from_raw(node.as_raw()));
}
