use core::fmt;
use std::sync::Arc;

use esp_heap_hal::{HeapBlock, Platform};
use log::{debug, error, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{OomPolicy, SizePolicy, StressConfig};
use crate::leak::{LeakCounter, LeakGauge};
use crate::report::Reporter;
use crate::{park, Error, Result};

/// What one iteration did with its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  Freed { size: usize },
  Leaked { size: usize },
  /// The allocation failed and the task is configured to carry on.
  Skipped { size: usize },
}

/// Allocates on a timer and leaks some of what it allocates.
pub struct StressTask<P: Platform> {
  platform: Arc<P>,
  config: StressConfig,
  iteration: u32,
  leaked: LeakCounter,
  rng: SmallRng,
  reporter: Option<Reporter<P>>,
}

impl<P: Platform> fmt::Debug for StressTask<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StressTask")
      .field("config", &self.config)
      .field("iteration", &self.iteration)
      .field("leaked", &self.leaked.get())
      .finish()
  }
}

impl<P: Platform> StressTask<P> {
  pub fn new(platform: Arc<P>, config: StressConfig) -> Self {
    let rng = match config.seed {
      Some(seed) => SmallRng::seed_from_u64(seed),
      None => SmallRng::from_entropy(),
    };

    let reporter = config.report_inline.clone().map(|report| Reporter::new(Arc::clone(&platform), report));

    Self { platform, config, iteration: 0, leaked: LeakCounter::new(), rng, reporter }
  }

  /// The reporter printing after every allocation, if any.
  pub fn reporter(&self) -> Option<&Reporter<P>> {
    self.reporter.as_ref()
  }

  pub fn iteration(&self) -> u32 {
    self.iteration
  }

  pub fn leaked(&self) -> usize {
    self.leaked.get()
  }

  pub fn leak_gauge(&self) -> LeakGauge {
    self.leaked.gauge()
  }

  /// Whether the configured number of iterations has run.
  pub fn is_done(&self) -> bool {
    self.config.iterations.map_or(false, |n| self.iteration >= n)
  }

  fn task_name(&self) -> String {
    self.platform.current_task_name().unwrap_or_else(|| "main".into())
  }

  fn next_size(&mut self) -> usize {
    match self.config.size {
      SizePolicy::Fixed(size) => size,
      SizePolicy::Random { max } => self.rng.gen_range(1..=max.max(1)),
    }
  }

  /// Runs one iteration: allocate, fill, wait, then free or leak.
  pub fn step(&mut self) -> Result<Step> {
    let size = self.next_size();
    let task = self.task_name();

    let mut block = match self.platform.malloc(size, self.config.caps) {
      Some(block) => block,
      None => {
        self.iteration += 1;
        error!("{}: failed to allocate {} bytes", task, size);

        return match self.config.on_oom {
          OomPolicy::Abort => Err(Error::OutOfMemory { task, size }),
          OomPolicy::Skip => {
            self.platform.delay(self.config.delay.for_size(size));
            Ok(Step::Skipped { size })
          }
        };
      }
    };

    if let Some(byte) = self.config.fill {
      block.fill(byte);
    }

    if let Some(reporter) = &self.reporter {
      reporter.print("STATUS");
    }

    self.platform.delay(self.config.delay.for_size(size));
    self.iteration += 1;

    if self.config.retention.frees(self.iteration, size) {
      info!("{}: free", task);
      drop(block);
      Ok(Step::Freed { size })
    } else {
      let addr = block.leak();
      self.leaked.add(size);
      debug!("{}: leaked {} bytes @ 0x{:08x}", task, size, addr);
      Ok(Step::Leaked { size })
    }
  }

  /// Steps until the configured iterations are done and logs the leak total.
  ///
  /// Returns the first fatal allocation failure. `step` logs every failure,
  /// so callers only decide what happens next.
  pub fn run_to_end(&mut self) -> Result<usize> {
    while !self.is_done() {
      self.step()?;
    }

    let leaked = self.leaked.get();
    error!("{}: DONE! Leaked: {} bytes", self.task_name(), leaked);
    Ok(leaked)
  }

  /// Like [`StressTask::run_to_end`], then parks.
  ///
  /// An allocation failure under [`OomPolicy::Abort`] aborts the program.
  pub fn run(mut self) -> ! {
    if self.run_to_end().is_err() {
      std::process::abort();
    }
    park(&*self.platform)
  }
}
