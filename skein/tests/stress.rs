mod common;
use common::*;

use skein::{LinkedDeque, LinkedQueue, TransferQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Elements are pushed in increasing order, so any weakly consistent
/// traversal must see a strictly increasing sequence.
fn assert_strictly_increasing(seen: &[usize]) {
  for pair in seen.windows(2) {
    assert!(pair[0] < pair[1], "iteration went backwards or repeated: {:?}", pair);
  }
}

#[test]
fn queue_iteration_is_weakly_consistent_under_churn() {
  let queue = Arc::new(LinkedQueue::new());
  let done = Arc::new(AtomicBool::new(false));

  let churn = {
    let queue = queue.clone();
    let done = done.clone();
    thread::spawn(move || {
      for i in 0..ITEMS_HIGH * 10 {
        queue.push(i);
        if i % 3 == 0 {
          queue.pop();
        }
        if i % 7 == 0 {
          queue.remove(&(i / 2));
        }
      }
      done.store(true, Ordering::SeqCst);
    })
  };

  let start = Instant::now();
  while !done.load(Ordering::SeqCst) {
    assert!(start.elapsed() < STRESS_TIMEOUT);
    let seen: Vec<usize> = queue.iter().collect();
    assert_strictly_increasing(&seen);
  }
  churn.join().unwrap();
  let final_view: Vec<usize> = queue.iter().collect();
  assert_strictly_increasing(&final_view);
  assert_eq!(final_view.len(), queue.len());
}

#[test]
fn deque_iteration_is_weakly_consistent_under_churn() {
  let deque = Arc::new(LinkedDeque::new());
  let done = Arc::new(AtomicBool::new(false));

  let churn = {
    let deque = deque.clone();
    let done = done.clone();
    thread::spawn(move || {
      for i in 0..ITEMS_HIGH * 10 {
        deque.push_back(i);
        match i % 5 {
          0 => {
            deque.pop_front();
          }
          1 => {
            deque.remove_first_occurrence(&(i - 1));
          }
          2 if i > 10 => {
            deque.remove_last_occurrence(&(i - 10));
          }
          _ => {}
        }
      }
      done.store(true, Ordering::SeqCst);
    })
  };

  let start = Instant::now();
  while !done.load(Ordering::SeqCst) {
    assert!(start.elapsed() < STRESS_TIMEOUT);
    let forward: Vec<usize> = deque.iter().collect();
    assert_strictly_increasing(&forward);
    let mut backward: Vec<usize> = deque.iter_rev().collect();
    backward.reverse();
    assert_strictly_increasing(&backward);
  }
  churn.join().unwrap();
  let forward: Vec<usize> = deque.iter().collect();
  let mut backward: Vec<usize> = deque.iter_rev().collect();
  backward.reverse();
  assert_eq!(forward, backward);
  assert_eq!(forward.len(), deque.len());
}

#[test]
fn transfer_queue_iteration_is_weakly_consistent_under_churn() {
  let queue = Arc::new(TransferQueue::new());
  let done = Arc::new(AtomicBool::new(false));

  let churn = {
    let queue = queue.clone();
    let done = done.clone();
    thread::spawn(move || {
      for i in 0..ITEMS_HIGH * 10 {
        queue.put(i);
        if i % 2 == 0 {
          queue.poll();
        }
      }
      done.store(true, Ordering::SeqCst);
    })
  };

  let start = Instant::now();
  while !done.load(Ordering::SeqCst) {
    assert!(start.elapsed() < STRESS_TIMEOUT);
    let seen: Vec<usize> = queue.iter().collect();
    assert_strictly_increasing(&seen);
  }
  churn.join().unwrap();
  assert_eq!(queue.iter().count(), queue.len());
}
