//! The ESP-IDF implementation.
//!
//! Per-task heap info needs `CONFIG_HEAP_TASK_TRACKING`, task snapshots need
//! `CONFIG_FREERTOS_USE_TRACE_FACILITY` and `CONFIG_FREERTOS_VTASKLIST_INCLUDE_COREID`,
//! heap tracing needs `CONFIG_HEAP_TRACING_STANDALONE` or `CONFIG_HEAP_TRACING_TOHOST`.

use core::ffi::{c_void, CStr};
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::{mem, slice};
use std::ffi::CString;
use std::time::Duration;

use esp_idf_sys as sys;

use crate::{
  Bounded, Core, EspError, HeapBlock, HeapCaps, HeapTrace, MemoryCaps, PerTaskHeapInfo, Scheduler, SystemState,
  TaskBlock, TaskConfig, TaskHeapInfo, TaskHeapParams, TaskOwner, TaskStatus, TaskTotals, TraceDest, TraceMode,
  CORE_COUNT, ESP_ERR_INVALID_ARG, ESP_ERR_NO_MEM, MAX_CAPS_CLASSES,
};

const PD_PASS: sys::BaseType_t = 1;
const NO_AFFINITY: sys::BaseType_t = 0x7fff_ffff;

/// Handle to the ESP-IDF heap and FreeRTOS task APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Esp {
  _marker: PhantomData<()>,
}

impl Esp {
  pub fn new() -> Self {
    Self { _marker: PhantomData }
  }
}

fn task_name(handle: sys::TaskHandle_t) -> String {
  unsafe {
    let name = sys::pcTaskGetName(handle);
    if name.is_null() {
      return String::new();
    }
    CStr::from_ptr(name).to_string_lossy().into_owned()
  }
}

fn owner(handle: sys::TaskHandle_t) -> TaskOwner {
  if handle.is_null() {
    TaskOwner::PreScheduler
  } else {
    TaskOwner::Task { handle: handle as usize, name: task_name(handle) }
  }
}

/// A block from `heap_caps_malloc`.
#[derive(Debug)]
pub struct EspBlock {
  ptr: NonNull<u8>,
  len: usize,
}

unsafe impl Send for EspBlock {}

impl HeapBlock for EspBlock {
  fn addr(&self) -> usize {
    self.ptr.as_ptr() as usize
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
  }

  fn len(&self) -> usize {
    self.len
  }

  fn leak(self) -> usize {
    let addr = self.addr();
    mem::forget(self);
    addr
  }
}

impl Drop for EspBlock {
  fn drop(&mut self) {
    unsafe { sys::heap_caps_free(self.ptr.as_ptr() as *mut c_void) };
  }
}

impl HeapCaps for Esp {
  type Block = EspBlock;

  fn free_size(&self, caps: MemoryCaps) -> usize {
    unsafe { sys::heap_caps_get_free_size(caps.bits()) as usize }
  }

  fn total_size(&self, caps: MemoryCaps) -> usize {
    unsafe { sys::heap_caps_get_total_size(caps.bits()) as usize }
  }

  fn minimum_free_size(&self, caps: MemoryCaps) -> usize {
    unsafe { sys::heap_caps_get_minimum_free_size(caps.bits()) as usize }
  }

  fn largest_free_block(&self, caps: MemoryCaps) -> usize {
    unsafe { sys::heap_caps_get_largest_free_block(caps.bits()) as usize }
  }

  fn malloc(&self, size: usize, caps: MemoryCaps) -> Option<EspBlock> {
    let ptr = unsafe { sys::heap_caps_malloc(size as _, caps.bits()) };
    NonNull::new(ptr as *mut u8).map(|ptr| EspBlock { ptr, len: size })
  }
}

impl HeapTrace for Esp {
  fn trace_init(&self, dest: TraceDest) -> Result<(), EspError> {
    match dest {
      TraceDest::Standalone { records } => {
        // The tracer keeps writing into this buffer for as long as the program runs.
        let buffer: &'static mut [sys::heap_trace_record_t] = Box::leak(
          (0..records).map(|_| unsafe { mem::zeroed() }).collect::<Vec<_>>().into_boxed_slice(),
        );
        esp_ok!(sys::heap_trace_init_standalone(buffer.as_mut_ptr(), buffer.len() as _))
      }
      TraceDest::ToHost => esp_ok!(sys::heap_trace_init_tohost()),
    }
  }

  fn trace_start(&self, mode: TraceMode) -> Result<(), EspError> {
    let mode = match mode {
      TraceMode::All => sys::heap_trace_mode_t_HEAP_TRACE_ALL,
      TraceMode::Leaks => sys::heap_trace_mode_t_HEAP_TRACE_LEAKS,
    };
    esp_ok!(sys::heap_trace_start(mode))
  }

  fn trace_stop(&self) -> Result<(), EspError> {
    esp_ok!(sys::heap_trace_stop())
  }

  fn trace_resume(&self) -> Result<(), EspError> {
    esp_ok!(sys::heap_trace_resume())
  }

  fn trace_dump(&self) {
    unsafe { sys::heap_trace_dump() };
  }
}

impl TaskHeapInfo for Esp {
  fn per_task_info<const T: usize, const B: usize>(&self, params: &TaskHeapParams) -> PerTaskHeapInfo<T, B> {
    let mut raw_totals: [sys::heap_task_totals_t; T] = unsafe { mem::zeroed() };
    let mut raw_blocks: [sys::heap_task_block_t; B] = unsafe { mem::zeroed() };
    let mut num_totals: usize = 0;
    let mut tasks: Vec<sys::TaskHandle_t> = params
      .tasks()
      .map(|handles| handles.iter().map(|&h| h as sys::TaskHandle_t).collect())
      .unwrap_or_default();

    let mut raw: sys::heap_task_info_params_t = unsafe { mem::zeroed() };
    for (index, class) in params.classes().iter().enumerate() {
      match class {
        Some(filter) => {
          raw.caps[index] = filter.caps.bits();
          raw.mask[index] = filter.mask.bits();
        }
        // Nothing satisfies `caps & 0 == u32::MAX`.
        None => {
          raw.caps[index] = u32::MAX;
          raw.mask[index] = 0;
        }
      }
    }
    if params.tasks().is_some() {
      raw.tasks = tasks.as_mut_ptr();
      raw.num_tasks = tasks.len() as _;
    }
    raw.totals = raw_totals.as_mut_ptr();
    raw.num_totals = &mut num_totals as *mut usize as *mut _;
    raw.max_totals = T as _;
    raw.blocks = raw_blocks.as_mut_ptr();
    raw.max_blocks = B as _;

    let num_blocks = unsafe { sys::heap_caps_get_per_task_info(&mut raw) } as usize;

    let mut info = PerTaskHeapInfo { classes: *params.classes(), ..PerTaskHeapInfo::default() };
    info.totals.extend(raw_totals.iter().take(num_totals.min(T)).map(|t| {
      let mut totals = TaskTotals::new(owner(t.task));
      for class in 0..MAX_CAPS_CLASSES {
        totals.size[class] = t.size[class] as usize;
        totals.count[class] = t.count[class] as usize;
      }
      totals
    }));
    info.blocks.extend(raw_blocks.iter().take(num_blocks.min(B)).map(|b| TaskBlock {
      owner: owner(b.task),
      address: b.address as usize,
      size: b.size as usize,
    }));
    info
  }
}

impl SystemState for Esp {
  fn task_snapshot<const N: usize>(&self) -> Bounded<TaskStatus, N> {
    // `uxTaskGetSystemState` fills nothing when the array is too small, so
    // make room for every task and truncate afterwards.
    let count = unsafe { sys::uxTaskGetNumberOfTasks() } as usize + 2;
    let mut raw: Vec<sys::TaskStatus_t> = (0..count).map(|_| unsafe { mem::zeroed() }).collect();
    let filled = unsafe { sys::uxTaskGetSystemState(raw.as_mut_ptr(), raw.len() as _, ptr::null_mut()) } as usize;

    raw.iter()
      .take(filled)
      .map(|status| TaskStatus {
        name: if status.pcTaskName.is_null() {
          String::new()
        } else {
          unsafe { CStr::from_ptr(status.pcTaskName) }.to_string_lossy().into_owned()
        },
        number: status.xTaskNumber as u32,
        priority: status.uxCurrentPriority as u8,
        stack_high_water_mark: status.usStackHighWaterMark as usize,
        core: if status.xCoreID == NO_AFFINITY { Core::Any } else { Core::Pinned(status.xCoreID as u8) },
      })
      .collect()
  }
}

type TaskFn = Box<dyn FnOnce() + Send>;

extern "C" fn task_entry(param: *mut c_void) {
  let f = unsafe { Box::from_raw(param as *mut TaskFn) };
  f();
  unsafe { sys::vTaskDelete(ptr::null_mut()) };
}

impl Scheduler for Esp {
  fn core_count(&self) -> u8 {
    CORE_COUNT
  }

  fn spawn<F>(&self, config: &TaskConfig, f: F) -> Result<(), EspError>
  where
    F: FnOnce() + Send + 'static,
  {
    let core = match config.core() {
      Core::Pinned(core) if core >= CORE_COUNT => return Err(EspError::from(ESP_ERR_INVALID_ARG)),
      Core::Pinned(core) => core as sys::BaseType_t,
      Core::Any => NO_AFFINITY,
    };
    let name = CString::new(config.name()).map_err(|_| EspError::from(ESP_ERR_INVALID_ARG))?;

    let param = Box::into_raw(Box::new(Box::new(f) as TaskFn));
    let created = unsafe {
      sys::xTaskCreatePinnedToCore(
        Some(task_entry),
        name.as_ptr(),
        config.stack_size() as _,
        param as *mut c_void,
        config.priority() as _,
        ptr::null_mut(),
        core,
      )
    };

    if created == PD_PASS {
      Ok(())
    } else {
      drop(unsafe { Box::from_raw(param) });
      Err(EspError::from(ESP_ERR_NO_MEM))
    }
  }

  fn delay(&self, duration: Duration) {
    let ticks = duration.as_millis() as u64 * sys::configTICK_RATE_HZ as u64 / 1000;
    let ticks = if ticks == 0 && !duration.is_zero() { 1 } else { ticks };
    unsafe { sys::vTaskDelay(ticks as _) };
  }

  fn current_task_name(&self) -> Option<String> {
    let handle = unsafe { sys::xTaskGetCurrentTaskHandle() };
    if handle.is_null() {
      None
    } else {
      Some(task_name(handle))
    }
  }
}
