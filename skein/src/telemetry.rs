// src/telemetry.rs

//! Opt-in event and counter collection for diagnosing contention.
//!
//! With the `skein_telemetry` feature enabled, the collections record the
//! slow paths they take (parking, cancellation, cleanup sweeps) into a
//! process-wide collector. Without the feature every call compiles to
//! nothing.
//!
//! Locations are written `collection::operation`; the report groups counters
//! by the collection part.

#[cfg(feature = "skein_telemetry")]
pub mod enabled {
  use parking_lot::Mutex;
  use std::collections::{BTreeMap, VecDeque};
  use std::fmt;
  use std::thread::{self, ThreadId};
  use std::time::{Duration, Instant};

  /// Events beyond this many are discarded oldest-first.
  pub const MAX_RETAINED_EVENTS: usize = 4096;

  /// A slow path taken by one thread on one node.
  #[derive(Clone, Debug)]
  pub struct SlowPathEvent {
    pub ordinal: u64,
    pub elapsed: Duration,
    pub thread: ThreadId,
    /// Sequence number of the node involved, when the collection has one.
    pub node_seq: Option<u64>,
    pub location: &'static str,
    pub kind: &'static str,
    pub detail: Option<String>,
  }

  /// Point-in-time copy of everything collected so far.
  #[derive(Clone, Debug, Default)]
  pub struct TelemetryReport {
    pub events: Vec<SlowPathEvent>,
    pub discarded_events: u64,
    pub counters: BTreeMap<(&'static str, &'static str), usize>,
  }

  impl TelemetryReport {
    /// Sum of every counter recorded under `collection`, e.g. `"transfer"`.
    pub fn total_for(&self, collection: &str) -> usize {
      self
        .counters
        .iter()
        .filter(|((loc, _), _)| collection_of(loc) == collection)
        .map(|(_, n)| *n)
        .sum()
    }
  }

  fn collection_of(location: &str) -> &str {
    location.split("::").next().unwrap_or(location)
  }

  impl fmt::Display for TelemetryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      writeln!(f, "--- skein telemetry ---")?;
      if self.events.is_empty() {
        writeln!(f, "events: none")?;
      } else {
        writeln!(
          f,
          "events: {} retained, {} discarded",
          self.events.len(),
          self.discarded_events
        )?;
        for e in &self.events {
          let node = e.node_seq.map_or_else(|| "-".to_string(), |s| s.to_string());
          writeln!(
            f,
            "  #{:<6} +{:>10.6}s {:?} node={:<8} {} {} {}",
            e.ordinal,
            e.elapsed.as_secs_f64(),
            e.thread,
            node,
            e.location,
            e.kind,
            e.detail.as_deref().unwrap_or("")
          )?;
        }
      }

      if self.counters.is_empty() {
        return writeln!(f, "counters: none");
      }
      let mut current: Option<&str> = None;
      for ((loc, name), n) in &self.counters {
        let collection = collection_of(loc);
        if current != Some(collection) {
          writeln!(f, "[{}] total {}", collection, self.total_for(collection))?;
          current = Some(collection);
        }
        writeln!(f, "  {:<32} {:<16} {}", loc, name, n)?;
      }
      Ok(())
    }
  }

  struct Collector {
    started: Instant,
    next_ordinal: u64,
    discarded: u64,
    events: VecDeque<SlowPathEvent>,
    counters: BTreeMap<(&'static str, &'static str), usize>,
  }

  impl Collector {
    fn new() -> Self {
      Collector {
        started: Instant::now(),
        next_ordinal: 0,
        discarded: 0,
        events: VecDeque::new(),
        counters: BTreeMap::new(),
      }
    }

    fn push(&mut self, mut event: SlowPathEvent) {
      event.ordinal = self.next_ordinal;
      event.elapsed = self.started.elapsed();
      self.next_ordinal += 1;
      if self.events.len() == MAX_RETAINED_EVENTS {
        self.events.pop_front();
        self.discarded += 1;
      }
      self.events.push_back(event);
    }
  }

  lazy_static::lazy_static! {
    static ref COLLECTOR: Mutex<Collector> = Mutex::new(Collector::new());
  }

  // --- Public Instrumentation Functions ---

  pub fn log_event_fn(
    node_seq: Option<u64>,
    location: &'static str,
    kind: &'static str,
    detail: Option<String>,
  ) {
    let event = SlowPathEvent {
      ordinal: 0,
      elapsed: Duration::ZERO,
      thread: thread::current().id(),
      node_seq,
      location,
      kind,
      detail,
    };
    COLLECTOR.lock().push(event);
  }

  pub fn increment_counter_fn(location: &'static str, counter_name: &'static str) {
    *COLLECTOR
      .lock()
      .counters
      .entry((location, counter_name))
      .or_insert(0) += 1;
  }

  /// Current value of a counter; zero if it was never incremented.
  pub fn counter_value_fn(location: &'static str, counter_name: &'static str) -> usize {
    COLLECTOR
      .lock()
      .counters
      .get(&(location, counter_name))
      .copied()
      .unwrap_or(0)
  }

  pub fn report_fn() -> TelemetryReport {
    let c = COLLECTOR.lock();
    TelemetryReport {
      events: c.events.iter().cloned().collect(),
      discarded_events: c.discarded,
      counters: c.counters.clone(),
    }
  }

  pub fn print_telemetry_report_fn() {
    println!("{}", report_fn());
  }

  pub fn clear_telemetry_fn() {
    *COLLECTOR.lock() = Collector::new();
  }
} // mod enabled

#[cfg(not(feature = "skein_telemetry"))]
pub mod disabled {
  #[inline(always)]
  pub fn log_event_fn(
    _node_seq: Option<u64>,
    _location: &'static str,
    _kind: &'static str,
    _detail: Option<String>,
  ) {
  }
  #[inline(always)]
  pub fn increment_counter_fn(_location: &'static str, _counter_name: &'static str) {}
  #[inline(always)]
  pub fn counter_value_fn(_location: &'static str, _counter_name: &'static str) -> usize {
    0
  }
  #[inline(always)]
  pub fn print_telemetry_report_fn() {}
  #[inline(always)]
  pub fn clear_telemetry_fn() {}
}

#[cfg(feature = "skein_telemetry")]
pub use enabled::{
  clear_telemetry_fn as clear_telemetry, counter_value_fn as counter_value,
  increment_counter_fn as increment_counter, log_event_fn as log_event,
  print_telemetry_report_fn as print_telemetry_report, report_fn as report, SlowPathEvent,
  TelemetryReport,
};

#[cfg(not(feature = "skein_telemetry"))]
pub use disabled::{
  clear_telemetry_fn as clear_telemetry, counter_value_fn as counter_value,
  increment_counter_fn as increment_counter, log_event_fn as log_event,
  print_telemetry_report_fn as print_telemetry_report,
};

#[cfg(all(test, feature = "skein_telemetry"))]
mod tests {
  use super::*;

  #[test]
  fn counters_group_by_collection() {
    increment_counter("sample::await_match", "Park");
    increment_counter("sample::unsplice", "Sweep");
    increment_counter("sample::unsplice", "Sweep");
    log_event(Some(7), "sample::await_fulfill", "Cancelled", None);

    assert_eq!(counter_value("sample::unsplice", "Sweep"), 2);
    let r = report();
    assert_eq!(r.total_for("sample"), 3);
    assert!(r
      .events
      .iter()
      .any(|e| e.location == "sample::await_fulfill" && e.node_seq == Some(7)));
    assert!(r.to_string().contains("[sample] total 3"));
  }
}
