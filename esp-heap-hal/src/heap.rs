use core::fmt;

use crate::MemoryCaps;

/// Point-in-time sizes of all heaps with a given set of capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapInfo {
  pub caps: MemoryCaps,
  pub free: usize,
  pub total: usize,
  /// Lowest `free` observed since boot.
  pub minimum_free: usize,
  pub largest_free_block: usize,
}

impl HeapInfo {
  pub fn used(&self) -> usize {
    self.total.saturating_sub(self.free)
  }

  pub fn used_percent(&self) -> f32 {
    if self.total == 0 {
      return 0.0;
    }
    100.0 - (self.free as f32 / self.total as f32 * 100.0)
  }

  pub fn low_watermark_percent(&self) -> f32 {
    if self.total == 0 {
      return 0.0;
    }
    self.minimum_free as f32 / self.total as f32 * 100.0
  }
}

impl fmt::Display for HeapInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Total free: {}/{} {:.2}% used", self.free, self.total, self.used_percent())?;
    writeln!(f, "Low watermark: {}/{} {:.2}% left", self.minimum_free, self.total, self.low_watermark_percent())?;
    write!(f, "Largest free block: {}", self.largest_free_block)
  }
}

/// An owned heap allocation.
///
/// Dropping the block returns it to the heap it came from.
pub trait HeapBlock: Send {
  fn addr(&self) -> usize;

  fn as_mut_slice(&mut self) -> &mut [u8];

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn fill(&mut self, byte: u8) {
    for b in self.as_mut_slice() {
      *b = byte;
    }
  }

  /// Gives up ownership without freeing. The memory stays allocated until reset.
  fn leak(self) -> usize where Self: Sized;
}

/// Capability-aware heap queries and allocation (`heap_caps_*`).
pub trait HeapCaps {
  type Block: HeapBlock;

  fn free_size(&self, caps: MemoryCaps) -> usize;

  fn total_size(&self, caps: MemoryCaps) -> usize;

  fn minimum_free_size(&self, caps: MemoryCaps) -> usize;

  fn largest_free_block(&self, caps: MemoryCaps) -> usize;

  fn info(&self, caps: MemoryCaps) -> HeapInfo {
    HeapInfo {
      caps,
      free: self.free_size(caps),
      total: self.total_size(caps),
      minimum_free: self.minimum_free_size(caps),
      largest_free_block: self.largest_free_block(caps),
    }
  }

  /// Allocates `size` bytes from a heap having all of `caps`.
  ///
  /// Returns `None` when no such heap has room.
  fn malloc(&self, size: usize, caps: MemoryCaps) -> Option<Self::Block>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percentages() {
    let info = HeapInfo { caps: MemoryCaps::BIT8, free: 750, total: 1000, minimum_free: 500, largest_free_block: 700 };
    assert_eq!(info.used(), 250);
    assert!((info.used_percent() - 25.0).abs() < 0.01);
    assert!((info.low_watermark_percent() - 50.0).abs() < 0.01);
  }

  #[test]
  fn empty_heap_has_no_percentages() {
    let info = HeapInfo::default();
    assert_eq!(info.used_percent(), 0.0);
    assert_eq!(info.low_watermark_percent(), 0.0);
  }

  #[test]
  fn display_matches_console_layout() {
    let info = HeapInfo { caps: MemoryCaps::BIT8, free: 900, total: 1000, minimum_free: 800, largest_free_block: 600 };
    let text = info.to_string();
    assert!(text.contains("Total free: 900/1000 10.00% used"));
    assert!(text.contains("Low watermark: 800/1000 80.00% left"));
  }
}
