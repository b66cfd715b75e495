#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(500);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3);
pub const STRESS_TIMEOUT: Duration = Duration::from_secs(15);
pub const ITEMS_LOW: usize = 50;
pub const ITEMS_MEDIUM: usize = 200;
pub const ITEMS_HIGH: usize = 1000;

/// Counts how many instances have been dropped.
#[derive(Debug)]
pub struct DropCounter(pub Arc<AtomicUsize>);

impl Drop for DropCounter {
  fn drop(&mut self) {
    self.0.fetch_add(1, Ordering::SeqCst);
  }
}

/// Asserts every tag in `0..total` was seen exactly once.
pub fn assert_each_once(mut seen: Vec<usize>, total: usize) {
  seen.sort_unstable();
  assert_eq!(seen.len(), total, "wrong number of deliveries");
  for (expected, got) in seen.into_iter().enumerate() {
    assert_eq!(expected, got, "element {} delivered twice or lost", expected);
  }
}
