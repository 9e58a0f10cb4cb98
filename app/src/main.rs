use std::sync::Arc;

use anyhow::Context;
use esp_heap_hal::Scheduler;
use heap_trace_demo::config::Variant;

/// Picked at build time, there is no other way to configure the firmware.
fn variant() -> anyhow::Result<Variant> {
  match option_env!("HEAP_DEMO_VARIANT") {
    Some(name) => name.parse().context("HEAP_DEMO_VARIANT"),
    None => Ok(Variant::default()),
  }
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
  esp_idf_sys::link_patches();
  esp_idf_svc::log::EspLogger::initialize_default();

  let platform = Arc::new(esp_heap_hal::esp::Esp::new());
  let demo = variant()?.config(platform.core_count());

  match heap_trace_demo::run(platform, &demo)? {}
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
  use esp_heap_hal::sim::SimPlatform;

  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let platform = Arc::new(SimPlatform::esp32());
  platform.enter_task("main", 8000);
  let demo = variant()?.config(platform.core_count());

  match heap_trace_demo::run(platform, &demo)? {}
}
