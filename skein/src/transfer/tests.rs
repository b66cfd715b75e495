use super::list::SWEEP_THRESHOLD;
use super::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn drained_queue_keeps_only_trailing_node() {
  let queue = TransferQueue::new();
  queue.put(1);
  queue.put(2);
  queue.put(3);
  assert_eq!(queue.list.node_count(), 3);

  assert_eq!(queue.poll(), Some(1));
  assert_eq!(queue.poll(), Some(2));
  // The second match skipped the matched prefix.
  assert_eq!(queue.list.node_count(), 1);
  assert_eq!(queue.poll(), Some(3));
  assert_eq!(queue.poll(), None);
  assert_eq!(queue.list.node_count(), 1);
  assert!(queue.is_empty());
}

#[test]
fn cancelled_trailing_requests_are_swept_after_threshold() {
  let queue = Arc::new(TransferQueue::<u32>::new());

  let consumers: Vec<_> = (0..2)
    .map(|_| {
      let queue = queue.clone();
      thread::spawn(move || queue.take())
    })
    .collect();
  while queue.waiting_consumer_count() < 2 {
    thread::yield_now();
  }

  // Each timed poll queues behind the two takers and cancels at the tail,
  // where it cannot be unlinked, so it votes instead.
  for _ in 0..SWEEP_THRESHOLD {
    assert_eq!(queue.poll_timeout(Duration::from_millis(1)), None);
  }
  assert_eq!(queue.list.sweep_votes(), SWEEP_THRESHOLD);
  assert_eq!(queue.list.node_count(), 2 + SWEEP_THRESHOLD);

  // One more failed unsplice triggers the sweep.
  assert_eq!(queue.poll_timeout(Duration::from_millis(1)), None);
  assert_eq!(queue.list.sweep_votes(), 0);
  assert_eq!(queue.list.node_count(), 3);
  assert_eq!(queue.waiting_consumer_count(), 2);

  queue.put(10);
  queue.put(20);
  let mut received: Vec<u32> = consumers.into_iter().map(|h| h.join().unwrap()).collect();
  received.sort_unstable();
  assert_eq!(received, vec![10, 20]);
}

#[test]
fn timed_out_transfer_leaves_no_element_behind() {
  let queue = TransferQueue::new();
  queue.put(1);
  let err = queue
    .try_transfer_timeout(2, Duration::from_millis(5))
    .unwrap_err();
  assert_eq!(err.into_inner(), 2);
  assert_eq!(queue.len(), 1);
  assert!(!queue.contains(&2));
  assert_eq!(queue.poll(), Some(1));
  assert_eq!(queue.poll(), None);
}
