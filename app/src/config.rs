use core::str::FromStr;
use std::time::Duration;

use esp_heap_hal::{Core, MemoryCaps, TaskConfig, TaskHeapParams, TraceDest, TraceMode};

/// Iterations of the inline variant before it reports the leak total.
pub const LOOP: u32 = 10;
/// Allocation size of the fixed-size variants.
pub const SIZE: usize = 1000;
/// Byte written over every fresh allocation.
pub const FILL_BYTE: u8 = 0x23;

/// How big the next allocation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
  Fixed(usize),
  /// Uniform in `1..=max`.
  Random { max: usize },
}

/// How long a task holds an allocation before deciding its fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
  Fixed(Duration),
  /// `per_byte` times the allocation size.
  PerByte(Duration),
}

impl DelayPolicy {
  pub fn for_size(&self, size: usize) -> Duration {
    match *self {
      Self::Fixed(delay) => delay,
      Self::PerByte(per_byte) => per_byte.saturating_mul(u32::try_from(size).unwrap_or(u32::MAX)),
    }
  }
}

/// Which allocations get freed. Everything else is leaked on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
  /// Free when the iteration count, after incrementing, is even: the first
  /// allocation leaks, the second is freed, and so on.
  FreeEvenIterations,
  /// Free allocations of at most `threshold` bytes.
  SizeThreshold { threshold: usize },
}

impl RetentionPolicy {
  /// `iteration` counts from one.
  pub fn frees(&self, iteration: u32, size: usize) -> bool {
    match *self {
      Self::FreeEvenIterations => iteration % 2 == 0,
      Self::SizeThreshold { threshold } => size <= threshold,
    }
  }
}

/// What a stress task does when `malloc` returns nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomPolicy {
  /// Log and abort the program.
  Abort,
  /// Log and carry on with the next iteration.
  Skip,
}

/// Configuration for a stress task.
#[derive(Debug, Clone)]
pub struct StressConfig {
  pub(crate) size: SizePolicy,
  pub(crate) caps: MemoryCaps,
  pub(crate) fill: Option<u8>,
  pub(crate) delay: DelayPolicy,
  pub(crate) retention: RetentionPolicy,
  pub(crate) on_oom: OomPolicy,
  pub(crate) iterations: Option<u32>,
  pub(crate) report_inline: Option<ReporterConfig>,
  pub(crate) seed: Option<u64>,
}

impl StressConfig {
  pub fn builder() -> StressConfigBuilder {
    StressConfigBuilder::default()
  }

  pub fn size(&self) -> SizePolicy {
    self.size
  }

  pub fn retention(&self) -> RetentionPolicy {
    self.retention
  }

  pub fn on_oom(&self) -> OomPolicy {
    self.on_oom
  }

  pub fn iterations(&self) -> Option<u32> {
    self.iterations
  }

  pub fn delay(&self) -> DelayPolicy {
    self.delay
  }

  pub fn report_inline(&self) -> Option<&ReporterConfig> {
    self.report_inline.as_ref()
  }
}

#[derive(Debug, Clone)]
pub struct StressConfigBuilder {
  size: SizePolicy,
  caps: MemoryCaps,
  fill: Option<u8>,
  delay: DelayPolicy,
  retention: RetentionPolicy,
  on_oom: OomPolicy,
  iterations: Option<u32>,
  report_inline: Option<ReporterConfig>,
  seed: Option<u64>,
}

impl Default for StressConfigBuilder {
  fn default() -> Self {
    Self {
      size: SizePolicy::Fixed(SIZE),
      caps: MemoryCaps::BIT8,
      fill: Some(FILL_BYTE),
      delay: DelayPolicy::Fixed(Duration::from_millis(1000)),
      retention: RetentionPolicy::FreeEvenIterations,
      on_oom: OomPolicy::Abort,
      iterations: None,
      report_inline: None,
      seed: None,
    }
  }
}

impl StressConfigBuilder {
  pub fn size(&mut self, size: SizePolicy) -> &mut Self {
    self.size = size;
    self
  }

  pub fn caps(&mut self, caps: MemoryCaps) -> &mut Self {
    self.caps = caps;
    self
  }

  pub fn fill(&mut self, fill: Option<u8>) -> &mut Self {
    self.fill = fill;
    self
  }

  pub fn delay(&mut self, delay: DelayPolicy) -> &mut Self {
    self.delay = delay;
    self
  }

  pub fn retention(&mut self, retention: RetentionPolicy) -> &mut Self {
    self.retention = retention;
    self
  }

  pub fn on_oom(&mut self, on_oom: OomPolicy) -> &mut Self {
    self.on_oom = on_oom;
    self
  }

  /// Stop allocating after `iterations` rounds. Runs forever by default.
  pub fn iterations(&mut self, iterations: u32) -> &mut Self {
    self.iterations = Some(iterations);
    self
  }

  /// Print a heap report with `report` after every allocation, while the
  /// block is still held.
  pub fn report_inline(&mut self, report: ReporterConfig) -> &mut Self {
    self.report_inline = Some(report);
    self
  }

  /// Seed for random sizes. Seeded from entropy when unset.
  pub fn seed(&mut self, seed: u64) -> &mut Self {
    self.seed = Some(seed);
    self
  }

  pub fn build(&self) -> StressConfig {
    StressConfig {
      size: self.size,
      caps: self.caps,
      fill: self.fill,
      delay: self.delay,
      retention: self.retention,
      on_oom: self.on_oom,
      iterations: self.iterations,
      report_inline: self.report_inline.clone(),
      seed: self.seed,
    }
  }
}

/// Configuration for the diagnostic reporter.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
  pub(crate) period: Duration,
  pub(crate) caps: MemoryCaps,
  pub(crate) params: TaskHeapParams,
  pub(crate) show_blocks: bool,
}

impl ReporterConfig {
  pub fn builder() -> ReporterConfigBuilder {
    ReporterConfigBuilder::default()
  }

  pub fn period(&self) -> Duration {
    self.period
  }
}

impl Default for ReporterConfig {
  fn default() -> Self {
    Self::builder().build()
  }
}

#[derive(Debug, Clone)]
pub struct ReporterConfigBuilder {
  period: Duration,
  caps: MemoryCaps,
  params: TaskHeapParams,
  show_blocks: bool,
}

impl Default for ReporterConfigBuilder {
  fn default() -> Self {
    Self {
      period: Duration::from_secs(5),
      caps: MemoryCaps::BIT8,
      params: TaskHeapParams::byte_and_word(),
      show_blocks: true,
    }
  }
}

impl ReporterConfigBuilder {
  pub fn period(&mut self, period: Duration) -> &mut Self {
    self.period = period;
    self
  }

  /// Capabilities of the heaps summed up in the header.
  pub fn caps(&mut self, caps: MemoryCaps) -> &mut Self {
    self.caps = caps;
    self
  }

  pub fn params(&mut self, params: TaskHeapParams) -> &mut Self {
    self.params = params;
    self
  }

  pub fn show_blocks(&mut self, show_blocks: bool) -> &mut Self {
    self.show_blocks = show_blocks;
    self
  }

  pub fn build(&self) -> ReporterConfig {
    ReporterConfig {
      period: self.period,
      caps: self.caps,
      params: self.params.clone(),
      show_blocks: self.show_blocks,
    }
  }
}

/// Everything [`crate::start`] sets up.
#[derive(Debug, Clone)]
pub struct DemoConfig {
  pub trace_dest: TraceDest,
  pub trace_mode: TraceMode,
  pub report: ReporterConfig,
  /// Stress loop run on the calling task instead of a task of its own.
  pub inline: Option<StressConfig>,
  pub stress_tasks: Vec<(TaskConfig, StressConfig)>,
  pub reporter_task: Option<TaskConfig>,
}

const STRESS_STACK_SIZE: usize = 4096;
const REPORTER_STACK_SIZE: usize = 8192;

/// The demo programs that can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
  /// One loop on the main task, reporting after every allocation.
  Inline,
  /// Fixed-size allocations on two pinned tasks, freeing every other one.
  Fixed,
  /// Random-size allocations on two pinned tasks, freeing the small ones.
  Random,
}

impl Default for Variant {
  fn default() -> Self {
    Self::Inline
  }
}

impl Variant {
  /// Builds the configuration, pinning tasks only to cores below `cores`.
  pub fn config(&self, cores: u8) -> DemoConfig {
    let last_core = cores.saturating_sub(1);
    let core = |n: u8| Core::Pinned(n.min(last_core));

    let mut demo = DemoConfig {
      trace_dest: TraceDest::default(),
      trace_mode: TraceMode::All,
      report: ReporterConfig::default(),
      inline: None,
      stress_tasks: Vec::new(),
      reporter_task: None,
    };

    match self {
      Self::Inline => {
        demo.report = ReporterConfig::builder().show_blocks(false).build();
        demo.inline = Some(StressConfig::builder().iterations(LOOP).report_inline(demo.report.clone()).build());
      }
      Self::Fixed => {
        let stress = StressConfig::builder().build();
        for n in 0..2 {
          let task = TaskConfig::builder(&format!("fixed_alloc_{}", n))
            .stack_size(STRESS_STACK_SIZE)
            .core(core(n))
            .build();
          demo.stress_tasks.push((task, stress.clone()));
        }
        demo.reporter_task = Some(Self::reporter_task(core(0)));
      }
      Self::Random => {
        demo.trace_mode = TraceMode::Leaks;
        for n in 0..2 {
          let task = TaskConfig::builder(&format!("random_alloc_{}", n))
            .stack_size(STRESS_STACK_SIZE)
            .core(core(n))
            .build();
          let stress = StressConfig::builder()
            .size(SizePolicy::Random { max: 2 * 1024 })
            .delay(DelayPolicy::PerByte(Duration::from_millis(1)))
            .retention(RetentionPolicy::SizeThreshold { threshold: 1024 })
            .on_oom(OomPolicy::Skip)
            .build();
          demo.stress_tasks.push((task, stress));
        }
        demo.reporter_task = Some(Self::reporter_task(core(1)));
      }
    }

    demo
  }

  fn reporter_task(core: Core) -> TaskConfig {
    TaskConfig::builder("heap_report")
      .stack_size(REPORTER_STACK_SIZE)
      .priority(esp_heap_hal::DEFAULT_PRIORITY + 1)
      .core(core)
      .build()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}', expected one of: inline, fixed, random")]
pub struct UnknownVariant(String);

impl FromStr for Variant {
  type Err = UnknownVariant;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "inline" => Ok(Self::Inline),
      "fixed" => Ok(Self::Fixed),
      "random" => Ok(Self::Random),
      _ => Err(UnknownVariant(s.into())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parity_frees_every_second_iteration() {
    let rule = RetentionPolicy::FreeEvenIterations;
    let freed: Vec<_> = (1..=6).map(|i| rule.frees(i, SIZE)).collect();
    assert_eq!(freed, [false, true, false, true, false, true]);
  }

  #[test]
  fn threshold_frees_small_blocks() {
    let rule = RetentionPolicy::SizeThreshold { threshold: 1024 };
    assert!(rule.frees(1, 1));
    assert!(rule.frees(1, 1024));
    assert!(!rule.frees(2, 1025));
  }

  #[test]
  fn per_byte_delay_scales_with_size() {
    let delay = DelayPolicy::PerByte(Duration::from_millis(2));
    assert_eq!(delay.for_size(500), Duration::from_secs(1));
    assert_eq!(DelayPolicy::Fixed(Duration::from_millis(7)).for_size(500), Duration::from_millis(7));
  }

  #[test]
  fn variant_names() {
    assert_eq!("inline".parse(), Ok(Variant::Inline));
    assert_eq!(" Random ".parse(), Ok(Variant::Random));
    assert!("leaky".parse::<Variant>().is_err());
  }

  #[test]
  fn inline_variant_runs_ten_reported_iterations() {
    let demo = Variant::Inline.config(2);
    let stress = demo.inline.unwrap();
    assert_eq!(stress.iterations(), Some(LOOP));
    assert_eq!(stress.size(), SizePolicy::Fixed(SIZE));
    assert_eq!(stress.on_oom(), OomPolicy::Abort);
    assert_eq!(stress.retention(), RetentionPolicy::FreeEvenIterations);
    assert!(!stress.report_inline().unwrap().show_blocks);
    assert_eq!(demo.trace_dest, TraceDest::Standalone { records: 100 });
    assert_eq!(demo.trace_mode, TraceMode::All);
    assert!(demo.stress_tasks.is_empty());
    assert!(demo.reporter_task.is_none());
  }

  #[test]
  fn fixed_variant_presets() {
    let demo = Variant::Fixed.config(2);
    assert_eq!(demo.trace_mode, TraceMode::All);
    assert!(demo.inline.is_none());
    assert_eq!(demo.reporter_task.as_ref().unwrap().name(), "heap_report");

    let names: Vec<_> = demo.stress_tasks.iter().map(|(task, _)| task.name()).collect();
    assert_eq!(names, ["fixed_alloc_0", "fixed_alloc_1"]);
    for (task, stress) in &demo.stress_tasks {
      assert_eq!(task.stack_size(), 4096);
      assert_eq!(stress.size(), SizePolicy::Fixed(SIZE));
      assert_eq!(stress.delay(), DelayPolicy::Fixed(Duration::from_secs(1)));
      assert_eq!(stress.retention(), RetentionPolicy::FreeEvenIterations);
      assert_eq!(stress.on_oom(), OomPolicy::Abort);
      assert_eq!(stress.iterations(), None);
      assert!(stress.report_inline().is_none());
    }
  }

  #[test]
  fn random_variant_presets() {
    let demo = Variant::Random.config(2);
    assert_eq!(demo.trace_mode, TraceMode::Leaks);
    assert!(demo.inline.is_none());

    let reporter = demo.reporter_task.as_ref().unwrap();
    assert_eq!(reporter.core(), Core::Pinned(1));
    assert_eq!(reporter.priority(), esp_heap_hal::DEFAULT_PRIORITY + 1);

    let names: Vec<_> = demo.stress_tasks.iter().map(|(task, _)| task.name()).collect();
    assert_eq!(names, ["random_alloc_0", "random_alloc_1"]);
    for (_, stress) in &demo.stress_tasks {
      assert_eq!(stress.size(), SizePolicy::Random { max: 2048 });
      assert_eq!(stress.delay(), DelayPolicy::PerByte(Duration::from_millis(1)));
      assert_eq!(stress.retention(), RetentionPolicy::SizeThreshold { threshold: 1024 });
      assert_eq!(stress.on_oom(), OomPolicy::Skip);
    }
  }

  #[test]
  fn unknown_variant_names_the_choices() {
    let err = "leaky".parse::<Variant>().unwrap_err();
    assert_eq!(err.to_string(), "unknown variant 'leaky', expected one of: inline, fixed, random");
  }

  #[test]
  fn single_core_pins_everything_to_core_zero() {
    let demo = Variant::Random.config(1);
    assert!(demo.stress_tasks.iter().all(|(task, _)| task.core() == Core::Pinned(0)));
    assert_eq!(demo.reporter_task.unwrap().core(), Core::Pinned(0));

    let demo = Variant::Fixed.config(2);
    let cores: Vec<_> = demo.stress_tasks.iter().map(|(task, _)| task.core()).collect();
    assert_eq!(cores, [Core::Pinned(0), Core::Pinned(1)]);
  }
}
