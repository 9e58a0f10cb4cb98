//! Heap tracing demo: tasks that allocate and leak on a timer, and a reporter
//! that shows where the memory went.

use core::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use esp_heap_hal::{Platform, Scheduler};
use log::info;

pub mod config;
mod error;
pub use error::{Error, Result};
pub mod leak;
pub mod report;
pub mod stress;

use config::DemoConfig;
use report::Reporter;
use stress::StressTask;

const PARK_PERIOD: Duration = Duration::from_secs(1);

/// Blocks the calling task forever.
pub fn park<S: Scheduler + ?Sized>(scheduler: &S) -> ! {
  loop {
    scheduler.delay(PARK_PERIOD);
  }
}

/// Starts heap tracing and creates the configured tasks.
///
/// Prints a `SYSTEM INIT` report between initializing and starting the
/// tracer. Failing to initialize or start tracing is fatal.
pub fn start<P: Platform>(platform: &Arc<P>, demo: &DemoConfig) -> Result<()> {
  platform.trace_init(demo.trace_dest).map_err(Error::TraceInit)?;

  Reporter::<P>::new(Arc::clone(platform), demo.report.clone()).print("SYSTEM INIT");

  platform.trace_start(demo.trace_mode).map_err(Error::TraceStart)?;

  for (task, stress) in &demo.stress_tasks {
    let stress = StressTask::new(Arc::clone(platform), stress.clone());
    platform
      .spawn(task, move || stress.run())
      .map_err(|source| Error::Spawn { task: task.name().into(), source })?;
    info!("created task '{}' on core {}", task.name(), task.core());
  }

  if let Some(task) = &demo.reporter_task {
    let reporter = Reporter::<P>::new(Arc::clone(platform), demo.report.clone());
    platform
      .spawn(task, move || reporter.run())
      .map_err(|source| Error::Spawn { task: task.name().into(), source })?;
    info!("created task '{}' on core {}", task.name(), task.core());
  }

  Ok(())
}

/// Runs the demo on the calling task. Only returns if starting fails.
pub fn run<P: Platform>(platform: Arc<P>, demo: &DemoConfig) -> Result<Infallible> {
  start(&platform, demo)?;

  match &demo.inline {
    Some(stress) => StressTask::new(platform, stress.clone()).run(),
    None => park(&*platform),
  }
}
