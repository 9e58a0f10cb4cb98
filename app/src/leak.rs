use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Running total of bytes a stress task chose not to free.
///
/// Only the owning task can add to it; everybody else gets a [`LeakGauge`].
#[derive(Debug, Default)]
pub struct LeakCounter {
  bytes: Arc<AtomicUsize>,
}

impl LeakCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, bytes: usize) {
    self.bytes.fetch_add(bytes, Ordering::Relaxed);
  }

  pub fn get(&self) -> usize {
    self.bytes.load(Ordering::Relaxed)
  }

  pub fn gauge(&self) -> LeakGauge {
    LeakGauge { bytes: Arc::clone(&self.bytes) }
  }
}

/// Read-only view of a [`LeakCounter`].
#[derive(Debug, Clone)]
pub struct LeakGauge {
  bytes: Arc<AtomicUsize>,
}

impl LeakGauge {
  pub fn get(&self) -> usize {
    self.bytes.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gauge_follows_counter() {
    let mut counter = LeakCounter::new();
    let gauge = counter.gauge();
    counter.add(1000);
    counter.add(24);
    assert_eq!(counter.get(), 1024);
    assert_eq!(gauge.clone().get(), 1024);
  }
}
