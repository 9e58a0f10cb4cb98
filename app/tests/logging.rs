use std::sync::{Arc, Mutex};
use std::time::Duration;

use esp_heap_hal::sim::{SimConfig, SimPlatform};
use esp_heap_hal::MemoryCaps;
use heap_trace_demo::config::{DelayPolicy, OomPolicy, RetentionPolicy, StressConfig};
use heap_trace_demo::stress::StressTask;
use heap_trace_demo::Error;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct Capture {
  lines: Mutex<Vec<(Level, String)>>,
}

impl Log for Capture {
  fn enabled(&self, _: &Metadata<'_>) -> bool {
    true
  }

  fn log(&self, record: &Record<'_>) {
    let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
    lines.push((record.level(), record.args().to_string()));
  }

  fn flush(&self) {}
}

static CAPTURE: Capture = Capture { lines: Mutex::new(Vec::new()) };
// Tests in this file share the logger.
static SERIAL: Mutex<()> = Mutex::new(());

fn captured<R>(f: impl FnOnce() -> R) -> (R, Vec<(Level, String)>) {
  let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
  let _ = log::set_logger(&CAPTURE);
  log::set_max_level(LevelFilter::Trace);

  CAPTURE.lines.lock().unwrap().clear();
  let result = f();
  let lines = CAPTURE.lines.lock().unwrap().clone();
  (result, lines)
}

fn tiny_heap() -> Arc<SimPlatform> {
  Arc::new(SimPlatform::new(
    SimConfig::builder()
      .region(MemoryCaps::BIT8 | MemoryCaps::BIT32, 0x3ffb_0000, 1500)
      .time_scale(0.0)
      .build(),
  ))
}

#[test]
fn fatal_allocation_failure_is_logged_once() {
  let config = StressConfig::builder()
    .delay(DelayPolicy::Fixed(Duration::ZERO))
    .retention(RetentionPolicy::SizeThreshold { threshold: 0 })
    .on_oom(OomPolicy::Abort)
    .iterations(5)
    .build();
  let mut task = StressTask::new(tiny_heap(), config);

  let (result, lines) = captured(|| task.run_to_end());

  assert!(matches!(result, Err(Error::OutOfMemory { size: 1000, .. })));
  let errors: Vec<_> = lines.iter().filter(|(level, _)| *level == Level::Error).collect();
  assert_eq!(errors.len(), 1, "{:?}", errors);
  assert!(errors[0].1.contains("failed to allocate 1000 bytes"));
  assert!(!lines.iter().any(|(_, line)| line.contains("DONE!")));
}

#[test]
fn leak_total_is_logged_as_an_error() {
  let config = StressConfig::builder().delay(DelayPolicy::Fixed(Duration::ZERO)).iterations(4).build();
  let sim = Arc::new(SimPlatform::new(SimConfig::builder().time_scale(0.0).build()));
  let mut task = StressTask::new(sim, config);

  let (result, lines) = captured(|| task.run_to_end());

  assert_eq!(result.unwrap(), 2000);
  let done: Vec<_> = lines.iter().filter(|(_, line)| line.contains("DONE! Leaked: 2000 bytes")).collect();
  assert_eq!(done.len(), 1);
  assert_eq!(done[0].0, Level::Error);
  assert_eq!(lines.iter().filter(|(_, line)| line.ends_with(": free")).count(), 2);
}
