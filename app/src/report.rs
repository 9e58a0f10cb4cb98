use core::fmt;
use std::sync::Arc;

use esp_heap_hal::{Bounded, CapsFilter, HeapInfo, PerTaskHeapInfo, Platform, TaskStatus, MAX_CAPS_CLASSES};

use crate::config::ReporterConfig;

/// Max number of per-task totals a report holds.
pub const MAX_TASK_NUM: usize = 20;
/// Max number of per-block records a report holds.
pub const MAX_BLOCK_NUM: usize = 20;
/// Max number of tasks in the stack section of a report.
pub const MAX_TASK_SNAPSHOT: usize = 20;

const WIDTH: usize = 67;

/// One round of diagnostics. Sections are truncated to their capacity.
#[derive(Debug, Clone)]
pub struct Report<const T: usize = MAX_TASK_NUM, const B: usize = MAX_BLOCK_NUM, const S: usize = MAX_TASK_SNAPSHOT> {
  pub tag: String,
  pub heap: HeapInfo,
  pub per_task: PerTaskHeapInfo<T, B>,
  pub tasks: Bounded<TaskStatus, S>,
  pub show_blocks: bool,
}

fn class_label(class: &Option<CapsFilter>) -> &'static str {
  class.as_ref().map_or("-", |c| c.caps.label())
}

fn rule(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
  for _ in 0..WIDTH {
    write!(f, "{}", c)?;
  }
  writeln!(f)
}

fn more<X, const N: usize>(f: &mut fmt::Formatter<'_>, list: &Bounded<X, N>) -> fmt::Result {
  if list.overflow() > 0 {
    writeln!(f, "  ... {} more not shown", list.overflow())?;
  }
  Ok(())
}

impl<const T: usize, const B: usize, const S: usize> fmt::Display for Report<T, B, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let title = format!(" FREE HEAP @ {} ", self.tag);
    writeln!(f, "{:=^width$}", title, width = WIDTH)?;
    writeln!(f, "{}", self.heap)?;

    rule(f, '-')?;
    let classes = &self.per_task.classes;
    write!(f, "{:<24}", "Task")?;
    for class in classes.iter().take(MAX_CAPS_CLASSES) {
      write!(f, "{:>12}", class_label(class))?;
    }
    writeln!(f)?;
    for totals in &self.per_task.totals {
      write!(f, "{:<24}", totals.owner.name())?;
      for size in totals.size {
        write!(f, "{:>12}", size)?;
      }
      writeln!(f)?;
    }
    more(f, &self.per_task.totals)?;

    if self.show_blocks {
      rule(f, '-')?;
      writeln!(f, "{:<24}{:>14}{:>12}", "Owner", "Address", "Size")?;
      for block in &self.per_task.blocks {
        writeln!(f, "{:<24}{:>#14x}{:>12}", block.owner.name(), block.address, block.size)?;
      }
      more(f, &self.per_task.blocks)?;
    }

    rule(f, '-')?;
    writeln!(f, "{:<24}{:>6}{:>6}{:>12}", "Task", "Core", "Prio", "Stack HWM")?;
    for task in &self.tasks {
      writeln!(f, "{:<24}{:>6}{:>6}{:>12}", task.name, task.core.to_string(), task.priority, task.stack_high_water_mark)?;
    }
    more(f, &self.tasks)?;

    rule(f, '=')
  }
}

/// Periodic heap and stack reporter.
pub struct Reporter<P, const T: usize = MAX_TASK_NUM, const B: usize = MAX_BLOCK_NUM, const S: usize = MAX_TASK_SNAPSHOT> {
  platform: Arc<P>,
  config: ReporterConfig,
}

impl<P, const T: usize, const B: usize, const S: usize> fmt::Debug for Reporter<P, T, B, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Reporter")
      .field("config", &self.config)
      .field("max_totals", &T)
      .field("max_blocks", &B)
      .field("max_tasks", &S)
      .finish()
  }
}

impl<P: Platform, const T: usize, const B: usize, const S: usize> Reporter<P, T, B, S> {
  pub fn new(platform: Arc<P>, config: ReporterConfig) -> Self {
    Self { platform, config }
  }

  pub fn collect(&self, tag: &str) -> Report<T, B, S> {
    Report {
      tag: tag.into(),
      heap: self.platform.info(self.config.caps),
      per_task: self.platform.per_task_info(&self.config.params),
      tasks: self.platform.task_snapshot(),
      show_blocks: self.config.show_blocks,
    }
  }

  pub fn print(&self, tag: &str) {
    println!("{}", self.collect(tag));
  }

  pub fn run(self) -> ! {
    loop {
      self.print("STATUS");
      self.platform.delay(self.config.period);
    }
  }
}
