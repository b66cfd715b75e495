mod common;
use common::*;

use serial_test::serial;
use skein::error::{TransferTimeoutError, TryTransferError};
use skein::{Fairness, SyncQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const BOTH: [Fairness; 2] = [Fairness::Unfair, Fairness::Fair];

#[test]
fn holds_nothing() {
  for fairness in BOTH {
    let queue: SyncQueue<u32> = SyncQueue::with_fairness(fairness);
    assert_eq!(queue.len(), 0);
    assert!(queue.is_empty());
    assert_eq!(queue.capacity(), 0);
    assert_eq!(queue.remaining_capacity(), Some(0));
    assert_eq!(queue.iter().count(), 0);
    assert_eq!(queue.is_fair(), fairness == Fairness::Fair);
    let mut sink = Vec::new();
    assert_eq!(queue.drain_into(&mut sink), 0);
  }
  assert_eq!(SyncQueue::<u8>::new().fairness(), Fairness::Unfair);
}

#[test]
fn immediate_operations_need_a_partner() {
  for fairness in BOTH {
    let queue = SyncQueue::with_fairness(fairness);
    assert_eq!(queue.offer(1), Err(TryTransferError::NoReceiver(1)));
    assert_eq!(queue.try_transfer(2), Err(TryTransferError::NoReceiver(2)));
    assert_eq!(queue.poll(), None);
  }
}

#[test]
fn timed_offer_without_consumer_returns_the_element() {
  for fairness in BOTH {
    let queue = SyncQueue::with_fairness(fairness);
    let start = Instant::now();
    let result = queue.offer_timeout(String::from("x"), Duration::from_millis(20));
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(result, Err(TransferTimeoutError::Timeout(String::from("x"))));
    assert_eq!(queue.poll_timeout(Duration::from_millis(5)), None);
  }
}

#[test]
#[serial]
fn put_does_not_complete_without_a_taker() {
  for fairness in BOTH {
    let queue = Arc::new(SyncQueue::with_fairness(fairness));
    let producer = {
      let queue = queue.clone();
      thread::spawn(move || queue.put(1))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!producer.is_finished(), "put completed with no taker ({:?})", fairness);
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.take(), 1);
    producer.join().unwrap();
  }
}

#[test]
fn fair_put_is_received_by_take() {
  let queue = Arc::new(SyncQueue::with_fairness(Fairness::Fair));
  let producer = {
    let queue = queue.clone();
    thread::spawn(move || queue.put(5))
  };
  let consumer = {
    let queue = queue.clone();
    thread::spawn(move || queue.take())
  };
  assert_eq!(consumer.join().unwrap(), 5);
  producer.join().unwrap();
}

#[test]
fn offer_succeeds_once_a_consumer_waits() {
  for fairness in BOTH {
    let queue = Arc::new(SyncQueue::with_fairness(fairness));
    let consumer = {
      let queue = queue.clone();
      thread::spawn(move || queue.poll_timeout(LONG_TIMEOUT))
    };
    let mut value = 3;
    let start = Instant::now();
    while let Err(e) = queue.offer(value) {
      assert!(start.elapsed() < LONG_TIMEOUT, "consumer never became visible");
      value = e.into_inner();
      thread::yield_now();
    }
    assert_eq!(consumer.join().unwrap(), Some(3));
  }
}

#[test]
#[serial]
fn waiting_producers_are_paired_by_policy() {
  for (fairness, expected) in [(Fairness::Fair, vec![0, 1, 2]), (Fairness::Unfair, vec![2, 1, 0])] {
    let queue = Arc::new(SyncQueue::with_fairness(fairness));
    let mut producers = Vec::new();
    for i in 0..3 {
      let queue = queue.clone();
      producers.push(thread::spawn(move || queue.put(i)));
      // Let each producer settle before the next arrives.
      thread::sleep(Duration::from_millis(50));
    }
    let received: Vec<i32> = (0..3).map(|_| queue.take()).collect();
    assert_eq!(received, expected, "{:?}", fairness);
    for producer in producers {
      producer.join().unwrap();
    }
  }
}

#[test]
fn drain_collects_from_waiting_producers() {
  let queue = Arc::new(SyncQueue::with_fairness(Fairness::Fair));
  let producer = {
    let queue = queue.clone();
    thread::spawn(move || queue.put(11))
  };
  let mut sink = Vec::new();
  let start = Instant::now();
  while sink.is_empty() {
    assert!(start.elapsed() < LONG_TIMEOUT);
    queue.drain_into(&mut sink);
    thread::yield_now();
  }
  assert_eq!(sink, vec![11]);
  producer.join().unwrap();
}

#[test]
fn handoff_stress_delivers_each_element_once() {
  for fairness in BOTH {
    let queue = Arc::new(SyncQueue::with_fairness(fairness));
    let producers = 4;
    let per_producer = ITEMS_MEDIUM;
    let total = producers * per_producer;
    let received = Arc::new(AtomicUsize::new(0));

    let producer_handles: Vec<_> = (0..producers)
      .map(|p| {
        let queue = queue.clone();
        thread::spawn(move || {
          for i in 0..per_producer {
            let tag = p * per_producer + i;
            if i % 2 == 0 {
              queue.put(tag);
            } else {
              let mut tag = tag;
              while let Err(e) = queue.offer_timeout(tag, Duration::from_millis(1)) {
                tag = e.into_inner();
              }
            }
          }
        })
      })
      .collect();

    let consumer_handles: Vec<_> = (0..4)
      .map(|c| {
        let queue = queue.clone();
        let received = received.clone();
        thread::spawn(move || {
          let mut local = Vec::new();
          while received.load(Ordering::SeqCst) < total {
            let next = if c % 2 == 0 {
              queue.poll_timeout(Duration::from_millis(1))
            } else {
              queue.poll()
            };
            match next {
              Some(v) => {
                received.fetch_add(1, Ordering::SeqCst);
                local.push(v);
              }
              None => thread::yield_now(),
            }
          }
          local
        })
      })
      .collect();

    for handle in producer_handles {
      handle.join().unwrap();
    }
    let mut seen = Vec::new();
    for handle in consumer_handles {
      seen.extend(handle.join().unwrap());
    }
    assert_each_once(seen, total);
  }
}
