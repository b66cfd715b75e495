// src/internal/spin.rs

//! Spin budgets for threads about to park.
//!
//! Spinning only pays off when another processor can make progress in the
//! meantime, so every budget collapses to zero on a uniprocessor.

use once_cell::sync::Lazy;
use std::time::Duration;

static NCPU: Lazy<usize> = Lazy::new(num_cpus::get);

#[inline]
fn multiprocessor() -> bool {
  *NCPU > 1
}

/// Spins before blocking in a timed wait.
#[inline]
pub(crate) fn max_timed_spins() -> u32 {
  if multiprocessor() {
    32
  } else {
    0
  }
}

/// Spins before blocking in an untimed wait. Larger than the timed budget
/// because there is no deadline to check on each spin.
#[inline]
pub(crate) fn max_untimed_spins() -> u32 {
  max_timed_spins() * 16
}

/// Spins for a transfer-queue node that is first in line.
#[inline]
pub(crate) fn front_spins() -> u32 {
  if multiprocessor() {
    1 << 7
  } else {
    0
  }
}

/// Spins for a transfer-queue node queued behind an active waiter.
#[inline]
pub(crate) fn chained_spins() -> u32 {
  front_spins() >> 1
}

/// Below this much remaining time a timed wait spins instead of parking.
pub(crate) const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1000);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn budgets_are_consistent() {
    assert_eq!(max_untimed_spins(), max_timed_spins() * 16);
    assert_eq!(chained_spins() * 2, front_spins());
    if num_cpus::get() < 2 {
      assert_eq!(max_timed_spins(), 0);
      assert_eq!(front_spins(), 0);
    }
  }
}
