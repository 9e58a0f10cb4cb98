//! Heap and task introspection for ESP-IDF.
//!
//! The services are exposed as traits so that code built on top of them runs
//! against the real ESP-IDF APIs on a device ([`esp::Esp`]) and against an
//! in-process model of them on a host ([`sim::SimPlatform`]).

#![warn(missing_debug_implementations)]

#[macro_use]
mod esp_error;
pub use esp_error::*;

mod bounded;
pub use bounded::Bounded;
mod caps;
pub use caps::{CapsFilter, MemoryCaps};
mod heap;
pub use heap::{HeapBlock, HeapCaps, HeapInfo};
mod trace;
pub use trace::{HeapTrace, TraceDest, TraceMode};
mod task_info;
pub use task_info::*;
mod task;
pub use task::*;

#[cfg(target_os = "espidf")]
pub mod esp;
pub mod sim;

/// Everything a heap diagnostics application needs from the platform.
pub trait Platform: HeapCaps + HeapTrace + TaskHeapInfo + SystemState + Scheduler + Send + Sync + 'static {}

impl<P> Platform for P where P: HeapCaps + HeapTrace + TaskHeapInfo + SystemState + Scheduler + Send + Sync + 'static {}

static_assertions::assert_impl_all!(sim::SimPlatform: Platform, Clone);
#[cfg(target_os = "espidf")]
static_assertions::assert_impl_all!(esp::Esp: Platform);
static_assertions::assert_impl_all!(sim::SimBlock: HeapBlock, Send);
// `heap_task_totals_t` has room for exactly two classes.
static_assertions::const_assert_eq!(MAX_CAPS_CLASSES, 2);
static_assertions::const_assert!(CORE_COUNT >= 1);
