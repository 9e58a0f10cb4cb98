use std::collections::BTreeMap;

use crate::{
  Bounded, Core, HeapInfo, MemoryCaps, PerTaskHeapInfo, TaskBlock, TaskHeapParams, TaskOwner, TaskStatus, TaskTotals,
  TraceDest, TraceMode,
};

use super::{RegionConfig, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hole {
  offset: usize,
  len: usize,
}

#[derive(Debug)]
pub(crate) struct Region {
  caps: MemoryCaps,
  base: usize,
  size: usize,
  free: usize,
  minimum_free: usize,
  /// Unused spans, sorted by offset and never adjacent.
  holes: Vec<Hole>,
}

impl Region {
  fn new(config: &RegionConfig) -> Self {
    let holes = if config.size > 0 { vec![Hole { offset: 0, len: config.size }] } else { Vec::new() };
    Self {
      caps: config.caps,
      base: config.base,
      size: config.size,
      free: config.size,
      minimum_free: config.size,
      holes,
    }
  }

  fn largest_hole(&self) -> usize {
    self.holes.iter().map(|h| h.len).max().unwrap_or(0)
  }

  /// First fit. Spans are rounded up to four bytes where the hole allows it.
  /// Returns the offset and the span taken.
  fn take(&mut self, size: usize) -> Option<(usize, usize)> {
    let aligned = size.checked_add(3)? & !3;
    let index = self.holes.iter().position(|h| h.len >= size)?;

    let hole = &mut self.holes[index];
    let span = aligned.min(hole.len);
    let offset = hole.offset;
    hole.offset += span;
    hole.len -= span;
    if hole.len == 0 {
      self.holes.remove(index);
    }

    self.free -= size;
    self.minimum_free = self.minimum_free.min(self.free);
    Some((offset, span))
  }

  fn give_back(&mut self, offset: usize, span: usize, size: usize) {
    self.free += size;

    let mut index = self.holes.partition_point(|h| h.offset < offset);
    self.holes.insert(index, Hole { offset, len: span });

    if index > 0 && self.holes[index - 1].offset + self.holes[index - 1].len == offset {
      self.holes[index - 1].len += span;
      self.holes.remove(index);
      index -= 1;
    }
    if index + 1 < self.holes.len() {
      let hole = self.holes[index];
      if hole.offset + hole.len == self.holes[index + 1].offset {
        self.holes[index].len += self.holes[index + 1].len;
        self.holes.remove(index + 1);
      }
    }
  }
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
  region: usize,
  offset: usize,
  span: usize,
  size: usize,
  owner: Option<TaskId>,
}

#[derive(Debug, Clone)]
pub(crate) struct SimTask {
  pub id: TaskId,
  pub name: String,
  pub stack_size: usize,
  pub max_stack_used: usize,
  pub priority: u8,
  pub core: Core,
  pub alive: bool,
}

/// A record kept by the simulated heap tracer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
  pub address: usize,
  pub size: usize,
  pub owner: String,
  pub freed: bool,
}

#[derive(Debug, Default)]
struct Tracer {
  dest: Option<TraceDest>,
  mode: Option<TraceMode>,
  stopped: Option<TraceMode>,
  records: Vec<TraceRecord>,
  overflowed: bool,
}

impl Tracer {
  fn capacity(&self) -> usize {
    match self.dest {
      Some(TraceDest::Standalone { records }) => records,
      _ => usize::MAX,
    }
  }
}

/// Everything the simulated platform keeps track of, behind one lock.
#[derive(Debug)]
pub(crate) struct SimState {
  regions: Vec<Region>,
  allocations: BTreeMap<usize, Allocation>,
  tasks: Vec<SimTask>,
  tracer: Tracer,
}

impl SimState {
  pub fn new(regions: &[RegionConfig]) -> Self {
    Self {
      regions: regions.iter().map(Region::new).collect(),
      allocations: BTreeMap::new(),
      tasks: Vec::new(),
      tracer: Tracer::default(),
    }
  }

  fn matching(&self, caps: MemoryCaps) -> impl Iterator<Item = &Region> {
    self.regions.iter().filter(move |r| r.caps.contains(caps))
  }

  pub fn heap_info(&self, caps: MemoryCaps) -> HeapInfo {
    let mut info = HeapInfo { caps, ..HeapInfo::default() };
    for region in self.matching(caps) {
      info.free += region.free;
      info.total += region.size;
      info.minimum_free += region.minimum_free;
      info.largest_free_block = info.largest_free_block.max(region.largest_hole());
    }
    info
  }

  pub fn malloc(&mut self, size: usize, caps: MemoryCaps, owner: Option<TaskId>) -> Option<usize> {
    if size == 0 {
      return None;
    }

    let (index, offset, span) = self
      .regions
      .iter_mut()
      .enumerate()
      .filter(|(_, r)| r.caps.contains(caps))
      .find_map(|(index, r)| r.take(size).map(|(offset, span)| (index, offset, span)))?;
    let address = self.regions[index].base + offset;

    self.allocations.insert(address, Allocation { region: index, offset, span, size, owner });
    self.trace_alloc(address, size, owner);
    Some(address)
  }

  pub fn free(&mut self, address: usize) {
    if let Some(allocation) = self.allocations.remove(&address) {
      self.regions[allocation.region].give_back(allocation.offset, allocation.span, allocation.size);
      self.trace_free(address);
    }
  }

  fn owner(&self, id: Option<TaskId>) -> TaskOwner {
    match id.and_then(|id| self.tasks.iter().find(|t| t.id == id)) {
      Some(task) => TaskOwner::Task { handle: task.id as usize, name: task.name.clone() },
      None => TaskOwner::PreScheduler,
    }
  }

  pub fn per_task_info<const T: usize, const B: usize>(&self, params: &TaskHeapParams) -> PerTaskHeapInfo<T, B> {
    let classes = *params.classes();
    let mut info = PerTaskHeapInfo { classes, ..PerTaskHeapInfo::default() };
    let mut totals = BTreeMap::<Option<TaskId>, TaskTotals>::new();

    for (&address, allocation) in &self.allocations {
      let region_caps = self.regions[allocation.region].caps;

      // Each region counts towards the first class it matches.
      let class = classes.iter().position(|c| c.map_or(false, |c| c.matches(region_caps)));
      let class = match class {
        Some(class) => class,
        None => continue,
      };

      let owner = self.owner(allocation.owner);
      if !params.includes(&owner) {
        continue;
      }

      let entry = totals.entry(allocation.owner).or_insert_with(|| TaskTotals::new(owner.clone()));
      entry.size[class] += allocation.size;
      entry.count[class] += 1;

      info.blocks.push(TaskBlock { owner, address, size: allocation.size });
    }

    info.totals.extend(totals.into_values());
    info
  }

  pub fn add_task(&mut self, task: SimTask) {
    self.tasks.push(task);
  }

  pub fn retire_task(&mut self, id: TaskId) {
    if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
      task.alive = false;
    }
  }

  pub fn task_name(&self, id: TaskId) -> Option<String> {
    self.tasks.iter().find(|t| t.id == id).map(|t| t.name.clone())
  }

  pub fn touch_stack(&mut self, id: TaskId, depth: usize) {
    if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
      task.max_stack_used = task.max_stack_used.max(depth.min(task.stack_size));
    }
  }

  pub fn snapshot<const N: usize>(&self) -> Bounded<TaskStatus, N> {
    self.tasks
      .iter()
      .filter(|t| t.alive)
      .map(|t| TaskStatus {
        name: t.name.clone(),
        number: t.id,
        priority: t.priority,
        stack_high_water_mark: t.stack_size - t.max_stack_used,
        core: t.core,
      })
      .collect()
  }

  pub fn trace_init(&mut self, dest: TraceDest) {
    self.tracer = Tracer { dest: Some(dest), ..Tracer::default() };
  }

  pub fn trace_initialized(&self) -> bool {
    self.tracer.dest.is_some()
  }

  pub fn trace_start(&mut self, mode: TraceMode) {
    self.tracer.mode = Some(mode);
    self.tracer.records.clear();
    self.tracer.overflowed = false;
  }

  pub fn trace_running(&self) -> bool {
    self.tracer.mode.is_some()
  }

  pub fn trace_stop(&mut self) -> Option<TraceMode> {
    let mode = self.tracer.mode.take();
    self.tracer.stopped = mode;
    mode
  }

  /// Continues with the mode tracing was stopped in, keeping the records.
  pub fn trace_resume(&mut self) {
    if self.tracer.mode.is_none() {
      self.tracer.mode = Some(self.tracer.stopped.take().unwrap_or_default());
    }
  }

  pub fn trace_records(&self) -> (&[TraceRecord], bool) {
    (&self.tracer.records, self.tracer.overflowed)
  }

  fn trace_alloc(&mut self, address: usize, size: usize, owner: Option<TaskId>) {
    if self.tracer.mode.is_none() {
      return;
    }
    if self.tracer.records.len() >= self.tracer.capacity() {
      self.tracer.overflowed = true;
      return;
    }
    let owner = self.owner(owner).name().to_owned();
    self.tracer.records.push(TraceRecord { address, size, owner, freed: false });
  }

  fn trace_free(&mut self, address: usize) {
    let mode = match self.tracer.mode {
      Some(mode) => mode,
      None => return,
    };
    let records = &mut self.tracer.records;
    if let Some(index) = records.iter().position(|r| r.address == address && !r.freed) {
      match mode {
        TraceMode::All => records[index].freed = true,
        TraceMode::Leaks => {
          records.remove(index);
        }
      }
    }
  }
}
