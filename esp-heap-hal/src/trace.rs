use crate::EspError;

/// Where heap trace records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDest {
  /// Keep up to `records` records in a buffer on the device.
  Standalone { records: usize },
  /// Stream records to the host over JTAG (`heap_trace_init_tohost`).
  ToHost,
}

impl Default for TraceDest {
  fn default() -> Self {
    Self::Standalone { records: 100 }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
  /// Record every allocation and free.
  All,
  /// Drop the record of an allocation once it is freed.
  Leaks,
}

impl Default for TraceMode {
  fn default() -> Self {
    Self::All
  }
}

/// Heap tracing (`heap_trace_*`). Has to be initialized once before it is started.
pub trait HeapTrace {
  fn trace_init(&self, dest: TraceDest) -> Result<(), EspError>;

  fn trace_start(&self, mode: TraceMode) -> Result<(), EspError>;

  fn trace_stop(&self) -> Result<(), EspError>;

  fn trace_resume(&self) -> Result<(), EspError>;

  /// Prints the recorded allocations to the console.
  fn trace_dump(&self);
}
