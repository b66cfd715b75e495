use bench_matrix::{
  criterion_runner::sync_suite::SyncBenchmarkSuite, AbstractCombination, MatrixCellValue,
};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use skein::{ConcurrentQueue, LinkedDeque, LinkedQueue, TransferQueue};

const ITEM_VALUE: u64 = 42;

// --- Config, State, Context ---
#[derive(Debug, Clone)]
struct QueueBenchConfig {
  kind: u64,
  producers: usize,
  items_per_producer: usize,
}

impl QueueBenchConfig {
  fn total_items(&self) -> usize {
    self.producers * self.items_per_producer
  }
}

#[derive(Default, Debug)]
struct BenchContext {
  items_processed_total: usize,
}

type SharedQueue = Arc<dyn QueueOps>;

trait QueueOps: Send + Sync {
  fn offer(&self, item: u64);
  fn poll(&self) -> Option<u64>;
}

impl<Q: ConcurrentQueue<u64> + Send + Sync> QueueOps for Q {
  fn offer(&self, item: u64) {
    ConcurrentQueue::offer(self, item);
  }
  fn poll(&self) -> Option<u64> {
    ConcurrentQueue::poll(self)
  }
}

struct QueueState {
  queue: SharedQueue,
}

fn extract_queue_config(combo: &AbstractCombination) -> Result<QueueBenchConfig, String> {
  let kind = combo.get_u64(0)?;
  let producers = (combo.get_u64(1)? as usize).max(1);
  let items_per_producer = (combo.get_u64(2)? as usize).max(1);
  if kind > 2 {
    return Err(format!("Skipping combination: unknown queue kind {}", kind));
  }
  Ok(QueueBenchConfig {
    kind,
    producers,
    items_per_producer,
  })
}

fn setup_fn_queue(cfg: &QueueBenchConfig) -> Result<(BenchContext, QueueState), String> {
  let queue: SharedQueue = match cfg.kind {
    0 => Arc::new(LinkedQueue::<u64>::new()),
    1 => Arc::new(LinkedDeque::<u64>::new()),
    _ => Arc::new(TransferQueue::<u64>::new()),
  };
  Ok((BenchContext::default(), QueueState { queue }))
}

// Producers offer concurrently while a single consumer polls everything.
fn benchmark_logic_queue(
  mut ctx: BenchContext,
  state: QueueState,
  cfg: &QueueBenchConfig,
) -> (BenchContext, QueueState, Duration) {
  let start_time = Instant::now();
  let handles: Vec<_> = (0..cfg.producers)
    .map(|_| {
      let queue = state.queue.clone();
      let n = cfg.items_per_producer;
      thread::spawn(move || {
        for _ in 0..n {
          queue.offer(ITEM_VALUE);
        }
      })
    })
    .collect();

  let total = cfg.total_items();
  let mut received = 0;
  while received < total {
    if state.queue.poll().is_some() {
      received += 1;
    } else {
      thread::yield_now();
    }
  }
  for handle in handles {
    handle.join().unwrap();
  }
  let duration = start_time.elapsed();
  ctx.items_processed_total += total;
  (ctx, state, duration)
}

fn teardown_queue(_ctx: BenchContext, _state: QueueState, _cfg: &QueueBenchConfig) {}

// Suites
fn queue_throughput_benches(c: &mut Criterion) {
  let parameter_axes = vec![
    vec![
      MatrixCellValue::Unsigned(0),
      MatrixCellValue::Unsigned(1),
      MatrixCellValue::Unsigned(2),
    ], // Kind: LinkedQueue, LinkedDeque, TransferQueue
    vec![
      MatrixCellValue::Unsigned(1),
      MatrixCellValue::Unsigned(4),
    ], // Producers
    vec![
      MatrixCellValue::Unsigned(1_000),
      MatrixCellValue::Unsigned(100_000),
    ], // ItemsPerProducer
  ];
  let parameter_names = vec![
    "Kind".to_string(),
    "Prod".to_string(),
    "ItemsPerProd".to_string(),
  ];

  SyncBenchmarkSuite::new(
    c,
    "QueueThroughput".to_string(),
    Some(parameter_names),
    parameter_axes,
    Box::new(extract_queue_config),
    setup_fn_queue,
    benchmark_logic_queue,
    teardown_queue,
  )
  .throughput(|cfg: &QueueBenchConfig| Throughput::Elements(cfg.total_items() as u64))
  .run();
}

criterion_group!(benches, queue_throughput_benches);
criterion_main!(benches);
