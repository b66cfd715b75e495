mod common;
use common::*;

use skein::LinkedQueue;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn polls_in_insertion_order() {
  let queue = LinkedQueue::new();
  queue.push(1);
  queue.push(2);
  queue.push(3);
  assert_eq!(queue.pop(), Some(1));
  assert_eq!(queue.pop(), Some(2));
  assert_eq!(queue.pop(), Some(3));
  assert_eq!(queue.pop(), None);
  assert!(queue.is_empty());
}

#[test]
fn peek_len_and_contains_do_not_remove() {
  let queue: LinkedQueue<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
  assert_eq!(queue.peek().as_deref(), Some("a"));
  assert_eq!(queue.len(), 3);
  assert!(queue.contains(&"b".to_string()));
  assert!(!queue.contains(&"z".to_string()));
  assert_eq!(queue.len(), 3);
}

#[test]
fn remove_skips_removed_elements() {
  let queue: LinkedQueue<u32> = (0..6).collect();
  assert!(queue.remove(&2));
  assert!(queue.remove(&4));
  assert!(!queue.remove(&4));
  assert_eq!(queue.iter().collect::<Vec<_>>(), vec![0, 1, 3, 5]);
  assert_eq!(queue.len(), 4);

  let mut drained = Vec::new();
  assert_eq!(queue.drain_into(&mut drained), 4);
  assert_eq!(drained, vec![0, 1, 3, 5]);
  assert!(queue.is_empty());
}

#[test]
fn drain_into_max_stops_at_limit() {
  let queue: LinkedQueue<usize> = (0..ITEMS_LOW).collect();
  let mut sink = Vec::new();
  assert_eq!(queue.drain_into_max(&mut sink, 10), 10);
  assert_eq!(sink, (0..10).collect::<Vec<_>>());
  assert_eq!(queue.len(), ITEMS_LOW - 10);
  queue.clear();
  assert!(queue.is_empty());
}

#[test]
fn dropping_the_queue_drops_remaining_elements() {
  let drops = Arc::new(AtomicUsize::new(0));
  {
    let queue = LinkedQueue::new();
    for _ in 0..5 {
      queue.push(DropCounter(drops.clone()));
    }
    drop(queue.pop());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
  }
  assert_eq!(drops.load(Ordering::SeqCst), 5);
}

#[test]
fn concurrent_producers_and_consumers_deliver_each_element_once() {
  let queue = Arc::new(LinkedQueue::new());
  let producers = 4;
  let per_producer = ITEMS_HIGH;
  let total = producers * per_producer;
  let received = Arc::new(Mutex::new(Vec::with_capacity(total)));
  let taken = Arc::new(AtomicUsize::new(0));

  let mut handles = Vec::new();
  for p in 0..producers {
    let queue = queue.clone();
    handles.push(thread::spawn(move || {
      for i in 0..per_producer {
        queue.push(p * per_producer + i);
      }
    }));
  }
  for _ in 0..4 {
    let queue = queue.clone();
    let received = received.clone();
    let taken = taken.clone();
    handles.push(thread::spawn(move || {
      let mut local = Vec::new();
      while taken.load(Ordering::SeqCst) < total {
        if let Some(v) = queue.pop() {
          taken.fetch_add(1, Ordering::SeqCst);
          local.push(v);
        } else {
          thread::yield_now();
        }
      }
      received.lock().unwrap().extend(local);
    }));
  }
  for handle in handles {
    handle.join().unwrap();
  }

  let seen = Arc::try_unwrap(received).unwrap().into_inner().unwrap();
  assert_each_once(seen, total);
  assert!(queue.is_empty());
}

#[test]
fn each_producers_elements_keep_their_order() {
  let queue = Arc::new(LinkedQueue::new());
  let producers = 3;

  let handles: Vec<_> = (0..producers)
    .map(|p| {
      let queue = queue.clone();
      thread::spawn(move || {
        for i in 0..ITEMS_MEDIUM {
          queue.push((p, i));
        }
      })
    })
    .collect();

  let mut last = vec![None; producers];
  let mut count = 0;
  while count < producers * ITEMS_MEDIUM {
    if let Some((p, i)) = queue.pop() {
      if let Some(prev) = last[p] {
        assert!(i > prev, "producer {} out of order: {} after {}", p, i, prev);
      }
      last[p] = Some(i);
      count += 1;
    }
  }
  for handle in handles {
    handle.join().unwrap();
  }
}

#[test]
fn concurrent_remove_and_pop_take_each_element_once() {
  let total = ITEMS_HIGH * 4;
  let queue: Arc<LinkedQueue<usize>> = Arc::new((0..total).collect());
  let taken = Arc::new(Mutex::new(Vec::with_capacity(total)));

  let mut handles = Vec::new();
  for r in 0..2 {
    let queue = queue.clone();
    let taken = taken.clone();
    handles.push(thread::spawn(move || {
      let mut local = Vec::new();
      // Remove from the back half, where pops arrive last.
      for v in (total / 2..total).filter(|v| v % 2 == r) {
        if queue.remove(&v) {
          local.push(v);
        }
      }
      taken.lock().unwrap().extend(local);
    }));
  }
  for _ in 0..2 {
    let queue = queue.clone();
    let taken = taken.clone();
    handles.push(thread::spawn(move || {
      let mut local = Vec::new();
      while let Some(v) = queue.pop() {
        local.push(v);
      }
      taken.lock().unwrap().extend(local);
    }));
  }
  for handle in handles {
    handle.join().unwrap();
  }
  while let Some(v) = queue.pop() {
    taken.lock().unwrap().push(v);
  }

  let seen = Arc::try_unwrap(taken).unwrap().into_inner().unwrap();
  assert_each_once(seen, total);
  assert!(queue.is_empty());
  assert_eq!(queue.len(), 0);
}

#[test]
fn spliced_elements_are_dropped_once() {
  struct Tagged(usize, DropCounter);
  impl PartialEq for Tagged {
    fn eq(&self, other: &Self) -> bool {
      self.0 == other.0
    }
  }

  let drops = Arc::new(AtomicUsize::new(0));
  let key_drops = Arc::new(AtomicUsize::new(0));
  {
    let queue = LinkedQueue::new();
    for i in 0..ITEMS_LOW {
      queue.push(Tagged(i, DropCounter(drops.clone())));
    }
    for i in (0..ITEMS_LOW).step_by(3) {
      assert!(queue.remove(&Tagged(i, DropCounter(key_drops.clone()))));
    }
    assert_eq!(drops.load(Ordering::SeqCst), (ITEMS_LOW + 2) / 3);
  }
  assert_eq!(drops.load(Ordering::SeqCst), ITEMS_LOW);
}
