//! An in-process model of the ESP-IDF heap and task APIs.
//!
//! Heap regions carry capability sets and keep free and minimum-free counters
//! the way `multi_heap` does. Blocks are placed first fit inside their region
//! and freed spans merge with their neighbours, so the largest free block
//! shrinks as a region fragments. Tasks are std threads; the
//! stack sizes they are created with are only bookkeeping for the high-water
//! marks, the host threads get a stack large enough for std.

use core::fmt;
use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::{
  Bounded, Core, EspError, HeapBlock, HeapCaps, HeapInfo, HeapTrace, MemoryCaps, PerTaskHeapInfo, Scheduler,
  SystemState, TaskConfig, TaskHeapInfo, TaskHeapParams, TaskStatus, TraceDest, TraceMode, ESP_ERR_INVALID_ARG,
  ESP_ERR_INVALID_STATE, ESP_ERR_NOT_SUPPORTED, ESP_ERR_NO_MEM,
};

mod state;
pub use state::TraceRecord;
use state::{SimState, SimTask};

pub type TaskId = u32;

/// Stack depth charged to a task by a `malloc` call.
const MALLOC_STACK_DEPTH: usize = 640;
/// Stack depth charged to a task by a `delay` call.
const DELAY_STACK_DEPTH: usize = 448;
/// Stack depth of a task that has only just started.
const ENTRY_STACK_DEPTH: usize = 352;
/// Stack given to the host thread backing a task.
const HOST_THREAD_STACK: usize = 256 * 1024;
const IDLE_STACK_SIZE: usize = 1536;

static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
  static CURRENT_TASK: Cell<Option<TaskId>> = Cell::new(None);
}

fn current_task() -> Option<TaskId> {
  CURRENT_TASK.with(Cell::get)
}

fn next_task_id() -> TaskId {
  NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// A heap region of the simulated chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionConfig {
  pub caps: MemoryCaps,
  pub base: usize,
  pub size: usize,
}

/// Configuration for a [`SimPlatform`].
#[derive(Debug, Clone)]
pub struct SimConfig {
  regions: Vec<RegionConfig>,
  cores: u8,
  time_scale: f64,
  trace_available: bool,
  idle_tasks: bool,
}

impl SimConfig {
  pub fn builder() -> SimConfigBuilder {
    SimConfigBuilder::default()
  }

  /// Roughly the heap layout of an ESP32 after boot: byte-addressable DRAM
  /// and word-addressable IRAM.
  pub fn esp32() -> Self {
    Self::builder().build()
  }

  pub fn regions(&self) -> &[RegionConfig] {
    &self.regions
  }
}

#[derive(Debug, Clone)]
pub struct SimConfigBuilder {
  regions: Vec<RegionConfig>,
  cores: u8,
  time_scale: f64,
  trace_available: bool,
  idle_tasks: bool,
}

impl Default for SimConfigBuilder {
  fn default() -> Self {
    Self {
      regions: Vec::new(),
      cores: 2,
      time_scale: 1.0,
      trace_available: true,
      idle_tasks: true,
    }
  }
}

impl SimConfigBuilder {
  pub fn region(&mut self, caps: MemoryCaps, base: usize, size: usize) -> &mut Self {
    self.regions.push(RegionConfig { caps, base, size });
    self
  }

  pub fn cores(&mut self, cores: u8) -> &mut Self {
    self.cores = cores;
    self
  }

  /// Factor applied to every `delay`. `0.0` turns delays into yields.
  pub fn time_scale(&mut self, time_scale: f64) -> &mut Self {
    self.time_scale = time_scale;
    self
  }

  /// Whether heap tracing was compiled in. Without it `trace_init` fails.
  pub fn trace_available(&mut self, trace_available: bool) -> &mut Self {
    self.trace_available = trace_available;
    self
  }

  /// Whether to create one idle task per core.
  pub fn idle_tasks(&mut self, idle_tasks: bool) -> &mut Self {
    self.idle_tasks = idle_tasks;
    self
  }

  pub fn build(&self) -> SimConfig {
    let regions = if self.regions.is_empty() {
      vec![
        RegionConfig {
          caps: MemoryCaps::BIT8 | MemoryCaps::BIT32 | MemoryCaps::DMA | MemoryCaps::INTERNAL | MemoryCaps::DEFAULT,
          base: 0x3ffa_e6e0,
          size: 180 * 1024,
        },
        RegionConfig {
          caps: MemoryCaps::BIT32 | MemoryCaps::EXEC | MemoryCaps::INTERNAL,
          base: 0x4009_4000,
          size: 48 * 1024,
        },
      ]
    } else {
      self.regions.clone()
    };

    SimConfig {
      regions,
      cores: self.cores,
      time_scale: self.time_scale,
      trace_available: self.trace_available,
      idle_tasks: self.idle_tasks,
    }
  }
}

#[derive(Debug)]
struct Inner {
  config: SimConfig,
  state: Mutex<SimState>,
}

impl Inner {
  fn state(&self) -> MutexGuard<'_, SimState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn touch_stack(&self, depth: usize) {
    if let Some(id) = current_task() {
      self.state().touch_stack(id, depth);
    }
  }
}

/// Simulated ESP-IDF platform. Clones share the same heap and tasks.
#[derive(Debug, Clone)]
pub struct SimPlatform {
  inner: Arc<Inner>,
}

impl SimPlatform {
  pub fn new(config: SimConfig) -> Self {
    let mut state = SimState::new(config.regions());

    if config.idle_tasks {
      for core in 0..config.cores {
        state.add_task(SimTask {
          id: next_task_id(),
          name: format!("IDLE{}", core),
          stack_size: IDLE_STACK_SIZE,
          max_stack_used: ENTRY_STACK_DEPTH,
          priority: 0,
          core: Core::Pinned(core),
          alive: true,
        });
      }
    }

    Self { inner: Arc::new(Inner { config, state: Mutex::new(state) }) }
  }

  pub fn esp32() -> Self {
    Self::new(SimConfig::esp32())
  }

  /// Registers the calling thread as a task, the way `app_main` runs inside the `main` task.
  pub fn enter_task(&self, name: &str, stack_size: usize) -> TaskId {
    let id = self.register_task(name, stack_size, Core::Any);
    CURRENT_TASK.with(|current| current.set(Some(id)));
    id
  }

  /// Adds a task that exists only in the task list, like one created by another component.
  pub fn register_task(&self, name: &str, stack_size: usize, core: Core) -> TaskId {
    let id = next_task_id();
    self.inner.state().add_task(SimTask {
      id,
      name: name.into(),
      stack_size,
      max_stack_used: ENTRY_STACK_DEPTH.min(stack_size),
      priority: crate::DEFAULT_PRIORITY,
      core,
      alive: true,
    });
    id
  }

  /// Records that the calling task reached `depth` bytes of stack.
  pub fn touch_stack(&self, depth: usize) {
    self.inner.touch_stack(depth);
  }

  /// Like [`SimPlatform::touch_stack`] for any task.
  pub fn touch_task_stack(&self, id: TaskId, depth: usize) {
    self.inner.state().touch_stack(id, depth);
  }

  pub fn trace_records(&self) -> (Vec<TraceRecord>, bool) {
    let state = self.inner.state();
    let (records, overflowed) = state.trace_records();
    (records.to_vec(), overflowed)
  }

  pub fn is_tracing(&self) -> bool {
    self.inner.state().trace_running()
  }

  /// What [`HeapTrace::trace_dump`] prints.
  pub fn trace_summary(&self) -> TraceSummary {
    let (records, overflowed) = self.trace_records();
    TraceSummary { records, overflowed }
  }
}

/// The trace records in the layout of `heap_trace_dump`.
#[derive(Debug, Clone)]
pub struct TraceSummary {
  pub records: Vec<TraceRecord>,
  pub overflowed: bool,
}

impl TraceSummary {
  /// Bytes and number of allocations not freed.
  pub fn leaked(&self) -> (usize, usize) {
    self.records.iter().filter(|r| !r.freed).fold((0, 0), |(bytes, count), r| (bytes + r.size, count + 1))
  }
}

impl fmt::Display for TraceSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "====== Heap Trace: {} records ======", self.records.len())?;
    for record in &self.records {
      writeln!(
        f,
        "{} bytes (@ 0x{:08x}) allocated by task '{}'{}",
        record.size,
        record.address,
        record.owner,
        if record.freed { " freed" } else { "" },
      )?;
    }
    let (leaked, count) = self.leaked();
    writeln!(f, "{} bytes 'leaked' in trace ({} allocations)", leaked, count)?;
    if self.overflowed {
      writeln!(f, "(NB: Buffer has overflowed, so trace data is incomplete.)")?;
    }
    writeln!(f, "====== Heap Trace Summary ======")
  }
}

/// A block of the simulated heap. The bytes are real host memory.
#[derive(Debug)]
pub struct SimBlock {
  address: usize,
  data: Vec<u8>,
  heap: Option<Arc<Inner>>,
}

impl HeapBlock for SimBlock {
  fn addr(&self) -> usize {
    self.address
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    &mut self.data
  }

  fn len(&self) -> usize {
    self.data.len()
  }

  fn leak(mut self) -> usize {
    self.heap = None;
    self.address
  }
}

impl Drop for SimBlock {
  fn drop(&mut self) {
    if let Some(heap) = self.heap.take() {
      heap.state().free(self.address);
    }
  }
}

impl HeapCaps for SimPlatform {
  type Block = SimBlock;

  fn free_size(&self, caps: MemoryCaps) -> usize {
    self.inner.state().heap_info(caps).free
  }

  fn total_size(&self, caps: MemoryCaps) -> usize {
    self.inner.state().heap_info(caps).total
  }

  fn minimum_free_size(&self, caps: MemoryCaps) -> usize {
    self.inner.state().heap_info(caps).minimum_free
  }

  fn largest_free_block(&self, caps: MemoryCaps) -> usize {
    self.inner.state().heap_info(caps).largest_free_block
  }

  fn info(&self, caps: MemoryCaps) -> HeapInfo {
    self.inner.state().heap_info(caps)
  }

  fn malloc(&self, size: usize, caps: MemoryCaps) -> Option<SimBlock> {
    self.inner.touch_stack(MALLOC_STACK_DEPTH);
    let address = self.inner.state().malloc(size, caps, current_task())?;
    Some(SimBlock { address, data: vec![0; size], heap: Some(Arc::clone(&self.inner)) })
  }
}

impl HeapTrace for SimPlatform {
  fn trace_init(&self, dest: TraceDest) -> Result<(), EspError> {
    if !self.inner.config.trace_available {
      return Err(EspError::from(ESP_ERR_NOT_SUPPORTED));
    }

    let mut state = self.inner.state();
    if state.trace_running() {
      return Err(EspError::from(ESP_ERR_INVALID_STATE));
    }
    if let TraceDest::Standalone { records: 0 } = dest {
      return Err(EspError::from(ESP_ERR_INVALID_ARG));
    }
    state.trace_init(dest);
    debug!("heap trace initialized: {:?}", dest);
    Ok(())
  }

  fn trace_start(&self, mode: TraceMode) -> Result<(), EspError> {
    let mut state = self.inner.state();
    if !state.trace_initialized() {
      return Err(EspError::from(ESP_ERR_INVALID_STATE));
    }
    state.trace_start(mode);
    debug!("heap trace started: {:?}", mode);
    Ok(())
  }

  fn trace_stop(&self) -> Result<(), EspError> {
    match self.inner.state().trace_stop() {
      Some(_) => Ok(()),
      None => Err(EspError::from(ESP_ERR_INVALID_STATE)),
    }
  }

  fn trace_resume(&self) -> Result<(), EspError> {
    let mut state = self.inner.state();
    if !state.trace_initialized() {
      return Err(EspError::from(ESP_ERR_INVALID_STATE));
    }
    state.trace_resume();
    Ok(())
  }

  fn trace_dump(&self) {
    print!("{}", self.trace_summary());
  }
}

impl TaskHeapInfo for SimPlatform {
  fn per_task_info<const T: usize, const B: usize>(&self, params: &TaskHeapParams) -> PerTaskHeapInfo<T, B> {
    self.inner.state().per_task_info(params)
  }
}

impl SystemState for SimPlatform {
  fn task_snapshot<const N: usize>(&self) -> Bounded<TaskStatus, N> {
    self.inner.state().snapshot()
  }
}

impl Scheduler for SimPlatform {
  fn core_count(&self) -> u8 {
    self.inner.config.cores
  }

  fn spawn<F>(&self, config: &TaskConfig, f: F) -> Result<(), EspError>
  where
    F: FnOnce() + Send + 'static,
  {
    if let Core::Pinned(core) = config.core() {
      if core >= self.core_count() {
        return Err(EspError::from(ESP_ERR_INVALID_ARG));
      }
    }

    let id = self.register_task(config.name(), config.stack_size(), config.core());
    let inner = Arc::clone(&self.inner);

    let spawned = thread::Builder::new()
      .name(config.name().into())
      .stack_size(HOST_THREAD_STACK)
      .spawn(move || {
        CURRENT_TASK.with(|current| current.set(Some(id)));
        let _retire = Retire { inner, id };
        f();
      });

    match spawned {
      Ok(_) => Ok(()),
      Err(err) => {
        warn!("failed to spawn thread for task '{}': {}", config.name(), err);
        self.inner.state().retire_task(id);
        Err(EspError::from(ESP_ERR_NO_MEM))
      }
    }
  }

  fn delay(&self, duration: Duration) {
    self.inner.touch_stack(DELAY_STACK_DEPTH);

    let scale = self.inner.config.time_scale;
    if scale > 0.0 {
      thread::sleep(duration.mul_f64(scale));
    } else {
      thread::yield_now();
    }
  }

  fn current_task_name(&self) -> Option<String> {
    current_task().and_then(|id| self.inner.state().task_name(id))
  }
}

/// Marks a task deleted once its function returns or unwinds.
struct Retire {
  inner: Arc<Inner>,
  id: TaskId,
}

impl Drop for Retire {
  fn drop(&mut self) {
    self.inner.state().retire_task(self.id);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::mpsc;

  use super::*;

  fn quiet() -> SimPlatform {
    SimPlatform::new(SimConfig::builder().time_scale(0.0).idle_tasks(false).build())
  }

  #[test]
  fn dropping_a_block_frees_it() {
    let sim = quiet();
    let before = sim.free_size(MemoryCaps::BIT8);

    let block = sim.malloc(1000, MemoryCaps::BIT8).unwrap();
    assert_eq!(block.len(), 1000);
    assert_eq!(sim.free_size(MemoryCaps::BIT8), before - 1000);

    drop(block);
    assert_eq!(sim.free_size(MemoryCaps::BIT8), before);
    assert_eq!(sim.minimum_free_size(MemoryCaps::BIT8), before - 1000);
  }

  #[test]
  fn leaked_blocks_stay_allocated() {
    let sim = quiet();
    let before = sim.free_size(MemoryCaps::BIT8);

    let mut block = sim.malloc(64, MemoryCaps::BIT8).unwrap();
    block.fill(0x23);
    assert!(block.as_mut_slice().iter().all(|&b| b == 0x23));
    block.leak();

    assert_eq!(sim.free_size(MemoryCaps::BIT8), before - 64);
  }

  #[test]
  fn allocations_are_attributed_to_the_spawning_task() {
    let sim = quiet();
    let (tx, rx) = mpsc::channel();

    let task_sim = sim.clone();
    let config = TaskConfig::builder("worker").pinned_to(1).build();
    sim.spawn(&config, move || {
      let block = task_sim.malloc(128, MemoryCaps::BIT8).unwrap();
      tx.send((block.leak(), task_sim.current_task_name())).unwrap();
    }).unwrap();

    let (address, name) = rx.recv().unwrap();
    assert_eq!(name.as_deref(), Some("worker"));

    let info = sim.per_task_info::<4, 4>(&TaskHeapParams::byte_and_word());
    let worker = info.totals_for("worker").unwrap();
    assert_eq!(worker.size, [128, 0]);
    assert_eq!(info.blocks[0].address, address);
  }

  #[test]
  fn main_thread_allocations_are_pre_scheduler() {
    let sim = quiet();
    sim.malloc(32, MemoryCaps::BIT8).unwrap().leak();
    let info = sim.per_task_info::<4, 4>(&TaskHeapParams::byte_and_word());
    assert_eq!(info.totals[0].owner, crate::TaskOwner::PreScheduler);
  }

  #[test]
  fn pinning_to_a_missing_core_fails() {
    let sim = SimPlatform::new(SimConfig::builder().cores(1).build());
    let config = TaskConfig::builder("stress").pinned_to(1).build();
    assert_eq!(sim.spawn(&config, || {}), Err(EspError::from(ESP_ERR_INVALID_ARG)));
  }

  #[test]
  fn idle_tasks_show_up_in_snapshot() {
    let sim = SimPlatform::esp32();
    let snapshot = sim.task_snapshot::<8>();
    let names: Vec<_> = snapshot.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["IDLE0", "IDLE1"]);
  }

  #[test]
  fn trace_must_be_initialized_first() {
    let sim = quiet();
    assert_eq!(sim.trace_start(TraceMode::All), Err(EspError::from(ESP_ERR_INVALID_STATE)));
    assert_eq!(sim.trace_stop(), Err(EspError::from(ESP_ERR_INVALID_STATE)));

    sim.trace_init(TraceDest::default()).unwrap();
    sim.trace_start(TraceMode::All).unwrap();
    assert!(sim.is_tracing());

    sim.malloc(16, MemoryCaps::BIT8).unwrap().leak();
    let (records, _) = sim.trace_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].owner, "Pre-Scheduler allocs");

    sim.trace_stop().unwrap();
    assert!(!sim.is_tracing());
  }

  #[test]
  fn trace_summary_lists_records_and_leaks() {
    let sim = quiet();
    sim.trace_init(TraceDest::Standalone { records: 2 }).unwrap();
    sim.trace_start(TraceMode::All).unwrap();

    drop(sim.malloc(100, MemoryCaps::BIT8).unwrap());
    let kept = sim.malloc(40, MemoryCaps::BIT8).unwrap().leak();
    sim.malloc(8, MemoryCaps::BIT8).unwrap().leak();

    let summary = sim.trace_summary();
    assert_eq!(summary.leaked(), (40, 1));
    assert!(summary.overflowed);

    let text = summary.to_string();
    assert!(text.starts_with("====== Heap Trace: 2 records ======\n"));
    assert!(text.contains("100 bytes (@ 0x"));
    assert!(text.contains("allocated by task 'Pre-Scheduler allocs' freed\n"));
    assert!(text.contains(&format!("40 bytes (@ 0x{:08x}) allocated by task 'Pre-Scheduler allocs'\n", kept)));
    assert!(text.contains("40 bytes 'leaked' in trace (1 allocations)"));
    assert!(text.contains("(NB: Buffer has overflowed, so trace data is incomplete.)"));
    assert!(text.ends_with("====== Heap Trace Summary ======\n"));

    // Printing goes through the same text.
    sim.trace_dump();
  }

  #[test]
  fn trace_init_fails_without_tracing_support() {
    let sim = SimPlatform::new(SimConfig::builder().trace_available(false).build());
    assert_eq!(sim.trace_init(TraceDest::ToHost), Err(EspError::from(ESP_ERR_NOT_SUPPORTED)));
  }

  #[test]
  fn entered_task_owns_its_stack_usage() {
    let (tx, rx) = mpsc::channel();
    let sim = quiet();
    let probe = sim.clone();

    thread::spawn(move || {
      probe.enter_task("main", 3584);
      probe.touch_stack(2000);
      tx.send(()).unwrap();
    }).join().unwrap();
    rx.recv().unwrap();

    let snapshot = sim.task_snapshot::<4>();
    assert_eq!(snapshot[0].name, "main");
    assert_eq!(snapshot[0].stack_high_water_mark, 1584);
  }
}
