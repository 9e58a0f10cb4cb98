use core::fmt;
use std::time::Duration;

use crate::{Bounded, EspError};

/// Default stack for tasks spawned through [`Scheduler::spawn`], in bytes.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Default priority, one above the idle tasks.
pub const DEFAULT_PRIORITY: u8 = 5;

#[cfg(any(target_device = "esp32c3", target_device = "esp32c6", target_device = "esp32s2"))]
pub const CORE_COUNT: u8 = 1;
#[cfg(not(any(target_device = "esp32c3", target_device = "esp32c6", target_device = "esp32s2")))]
pub const CORE_COUNT: u8 = 2;

/// CPU affinity of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Core {
  Pinned(u8),
  Any,
}

impl Default for Core {
  fn default() -> Self {
    Self::Any
  }
}

impl fmt::Display for Core {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Pinned(core) => write!(f, "{}", core),
      Self::Any => f.write_str("-"),
    }
  }
}

/// Configuration for a task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
  name: String,
  stack_size: usize,
  priority: u8,
  core: Core,
}

impl TaskConfig {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn stack_size(&self) -> usize {
    self.stack_size
  }

  pub fn priority(&self) -> u8 {
    self.priority
  }

  pub fn core(&self) -> Core {
    self.core
  }

  pub fn builder(name: &str) -> TaskConfigBuilder {
    TaskConfigBuilder {
      name: name.into(),
      stack_size: DEFAULT_STACK_SIZE,
      priority: DEFAULT_PRIORITY,
      core: Core::Any,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskConfigBuilder {
  name: String,
  stack_size: usize,
  priority: u8,
  core: Core,
}

impl TaskConfigBuilder {
  pub fn stack_size(&mut self, stack_size: usize) -> &mut Self {
    self.stack_size = stack_size;
    self
  }

  pub fn priority(&mut self, priority: u8) -> &mut Self {
    self.priority = priority;
    self
  }

  pub fn core(&mut self, core: Core) -> &mut Self {
    self.core = core;
    self
  }

  pub fn pinned_to(&mut self, core: u8) -> &mut Self {
    self.core(Core::Pinned(core))
  }

  pub fn build(&self) -> TaskConfig {
    TaskConfig {
      name: self.name.clone(),
      stack_size: self.stack_size,
      priority: self.priority,
      core: self.core,
    }
  }
}

/// One row of a system state snapshot (`uxTaskGetSystemState`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
  pub name: String,
  pub number: u32,
  pub priority: u8,
  /// Least stack space the task has had left since it was created, in bytes.
  pub stack_high_water_mark: usize,
  pub core: Core,
}

/// Snapshot of all live tasks.
pub trait SystemState {
  /// Returns at most `N` tasks. Tasks that do not fit are left out.
  fn task_snapshot<const N: usize>(&self) -> Bounded<TaskStatus, N>;
}

/// Task creation and blocking.
pub trait Scheduler {
  fn core_count(&self) -> u8;

  /// Creates a task running `f`. The task must never return.
  fn spawn<F>(&self, config: &TaskConfig, f: F) -> Result<(), EspError>
  where
    F: FnOnce() + Send + 'static;

  /// Blocks the calling task.
  fn delay(&self, duration: Duration);

  fn current_task_name(&self) -> Option<String>;
}
