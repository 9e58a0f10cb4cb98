use core::fmt;

use crate::{Bounded, CapsFilter, MemoryCaps};

/// Number of capability classes a per-task query can split totals into.
pub const MAX_CAPS_CLASSES: usize = 2;

/// Task that made an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskOwner {
  /// Allocated before the scheduler started, so no task owns it.
  PreScheduler,
  Task { handle: usize, name: String },
}

impl TaskOwner {
  pub fn name(&self) -> &str {
    match self {
      Self::PreScheduler => "Pre-Scheduler allocs",
      Self::Task { name, .. } => name,
    }
  }

  pub fn handle(&self) -> Option<usize> {
    match self {
      Self::PreScheduler => None,
      Self::Task { handle, .. } => Some(*handle),
    }
  }
}

impl fmt::Display for TaskOwner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Outstanding bytes of one task, one entry per capability class of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTotals {
  pub owner: TaskOwner,
  pub size: [usize; MAX_CAPS_CLASSES],
  pub count: [usize; MAX_CAPS_CLASSES],
}

impl TaskTotals {
  pub fn new(owner: TaskOwner) -> Self {
    Self { owner, size: [0; MAX_CAPS_CLASSES], count: [0; MAX_CAPS_CLASSES] }
  }
}

/// A single outstanding allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBlock {
  pub owner: TaskOwner,
  pub address: usize,
  pub size: usize,
}

/// What to ask `heap_caps_get_per_task_info` for.
#[derive(Debug, Clone, Default)]
pub struct TaskHeapParams {
  classes: [Option<CapsFilter>; MAX_CAPS_CLASSES],
  tasks: Option<Vec<usize>>,
}

impl TaskHeapParams {
  pub fn new() -> Self {
    Self::default()
  }

  /// The usual split: byte-addressable memory first, word-addressable second.
  pub fn byte_and_word() -> Self {
    let mut params = Self::new();
    params
      .class(0, CapsFilter::having(MemoryCaps::BIT8))
      .class(1, CapsFilter::having(MemoryCaps::BIT32));
    params
  }

  /// Sets class `index`. Indices past [`MAX_CAPS_CLASSES`] are ignored.
  pub fn class(&mut self, index: usize, filter: CapsFilter) -> &mut Self {
    if let Some(slot) = self.classes.get_mut(index) {
      *slot = Some(filter);
    }
    self
  }

  /// Limits the query to the given task handles. By default all tasks are reported.
  pub fn only_tasks(&mut self, handles: Vec<usize>) -> &mut Self {
    self.tasks = Some(handles);
    self
  }

  pub fn classes(&self) -> &[Option<CapsFilter>; MAX_CAPS_CLASSES] {
    &self.classes
  }

  pub fn tasks(&self) -> Option<&[usize]> {
    self.tasks.as_deref()
  }

  pub fn includes(&self, owner: &TaskOwner) -> bool {
    match (&self.tasks, owner.handle()) {
      (None, _) => true,
      (Some(_), None) => false,
      (Some(tasks), Some(handle)) => tasks.contains(&handle),
    }
  }
}

/// Result of a per-task heap query, truncated to `T` totals and `B` blocks.
#[derive(Debug, Clone, Default)]
pub struct PerTaskHeapInfo<const T: usize, const B: usize> {
  pub classes: [Option<CapsFilter>; MAX_CAPS_CLASSES],
  pub totals: Bounded<TaskTotals, T>,
  pub blocks: Bounded<TaskBlock, B>,
}

impl<const T: usize, const B: usize> PerTaskHeapInfo<T, B> {
  /// Sum over all reported tasks, per class.
  pub fn total_per_class(&self) -> [usize; MAX_CAPS_CLASSES] {
    let mut sum = [0; MAX_CAPS_CLASSES];
    for totals in &self.totals {
      for (acc, size) in sum.iter_mut().zip(totals.size) {
        *acc += size;
      }
    }
    sum
  }

  pub fn totals_for(&self, name: &str) -> Option<&TaskTotals> {
    self.totals.iter().find(|t| t.owner.name() == name)
  }
}

/// Per-task heap attribution (`heap_caps_get_per_task_info`).
pub trait TaskHeapInfo {
  fn per_task_info<const T: usize, const B: usize>(&self, params: &TaskHeapParams) -> PerTaskHeapInfo<T, B>;
}
