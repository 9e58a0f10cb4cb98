use esp_heap_hal::EspError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("failed to initialize heap tracing: {0}")]
  TraceInit(#[source] EspError),

  #[error("failed to start heap tracing: {0}")]
  TraceStart(#[source] EspError),

  #[error("failed to create task '{task}': {source}")]
  Spawn { task: String, source: EspError },

  #[error("task '{task}' could not allocate {size} bytes")]
  OutOfMemory { task: String, size: usize },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
