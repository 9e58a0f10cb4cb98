use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use esp_heap_hal::sim::{SimConfig, SimPlatform};
use esp_heap_hal::{HeapBlock, HeapCaps, MemoryCaps, SystemState, TaskHeapInfo, TaskHeapParams};
use heap_trace_demo::config::{DelayPolicy, StressConfig, Variant};
use heap_trace_demo::{start, Error};

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(10);
  while !done() {
    assert!(Instant::now() < deadline, "timed out waiting for {}", what);
    thread::sleep(Duration::from_millis(5));
  }
}

#[test]
fn tracing_unavailable_is_fatal() {
  let sim = Arc::new(SimPlatform::new(SimConfig::builder().trace_available(false).time_scale(0.0).build()));
  let demo = Variant::Fixed.config(2);

  match start(&sim, &demo) {
    Err(Error::TraceInit(err)) => assert_eq!(err.code(), esp_heap_hal::ESP_ERR_NOT_SUPPORTED),
    other => panic!("expected a trace init failure, got {:?}", other),
  }
  assert!(!sim.is_tracing());

  // Nothing was started.
  let tasks = sim.task_snapshot::<8>();
  assert!(tasks.iter().all(|t| t.name.starts_with("IDLE")));
}

#[test]
fn fixed_variant_tasks_run_and_leak() {
  let sim = Arc::new(SimPlatform::new(SimConfig::builder().time_scale(0.001).build()));

  let mut demo = Variant::Fixed.config(2);
  demo.reporter_task = None;
  let stress = StressConfig::builder()
    .delay(DelayPolicy::Fixed(Duration::from_secs(1)))
    .iterations(4)
    .build();
  for (_, config) in &mut demo.stress_tasks {
    *config = stress.clone();
  }

  start(&sim, &demo).unwrap();
  assert!(sim.is_tracing());

  let names: Vec<_> = sim.task_snapshot::<8>().iter().map(|t| t.name.clone()).collect();
  assert!(names.contains(&"fixed_alloc_0".to_string()));
  assert!(names.contains(&"fixed_alloc_1".to_string()));

  // Four iterations leak twice.
  let params = TaskHeapParams::byte_and_word();
  wait_for("both tasks to leak", || {
    let info = sim.per_task_info::<8, 8>(&params);
    ["fixed_alloc_0", "fixed_alloc_1"]
      .iter()
      .all(|name| info.totals_for(name).map_or(false, |t| t.size[0] == 2000))
  });

  let (records, overflowed) = sim.trace_records();
  assert!(!overflowed);
  assert!(records.iter().filter(|r| !r.freed).count() >= 4);
}

#[test]
fn random_variant_traces_leaks_only() {
  let sim = Arc::new(SimPlatform::new(SimConfig::builder().time_scale(0.0).build()));

  let mut demo = Variant::Random.config(2);
  demo.reporter_task = None;
  demo.stress_tasks.clear();

  start(&sim, &demo).unwrap();
  assert!(sim.is_tracing());

  let freed = sim.malloc(64, MemoryCaps::BIT8).unwrap();
  drop(freed);
  assert!(sim.trace_records().0.is_empty());

  let kept = sim.malloc(32, MemoryCaps::BIT8).unwrap().leak();
  let (records, _) = sim.trace_records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].address, kept);
}

#[test]
fn single_core_pins_everything_to_core_zero() {
  let sim = Arc::new(SimPlatform::new(SimConfig::builder().cores(1).time_scale(0.001).build()));

  let mut demo = Variant::Random.config(1);
  demo.reporter_task = None;
  for (_, config) in &mut demo.stress_tasks {
    *config = StressConfig::builder().iterations(1).build();
  }

  start(&sim, &demo).unwrap();

  let tasks = sim.task_snapshot::<8>();
  let stress: Vec<_> = tasks.iter().filter(|t| t.name.starts_with("random_alloc")).collect();
  assert_eq!(stress.len(), 2);
  assert!(stress.iter().all(|t| t.core == esp_heap_hal::Core::Pinned(0)));
}
