use bitflags::bitflags;

bitflags! {
  /// Memory capabilities, with the same bit values as ESP-IDF's `MALLOC_CAP_*`.
  #[derive(Default)]
  pub struct MemoryCaps: u32 {
    const EXEC     = 1 << 0;
    const BIT32    = 1 << 1;
    const BIT8     = 1 << 2;
    const DMA      = 1 << 3;
    const SPIRAM   = 1 << 10;
    const INTERNAL = 1 << 11;
    const DEFAULT  = 1 << 12;
  }
}

impl MemoryCaps {
  /// Short label used in report headers.
  pub fn label(&self) -> &'static str {
    if self.contains(Self::BIT8) {
      "CAP_8BIT"
    } else if self.contains(Self::BIT32) {
      "CAP_32BIT"
    } else if self.contains(Self::EXEC) {
      "CAP_EXEC"
    } else if self.contains(Self::DMA) {
      "CAP_DMA"
    } else if self.contains(Self::SPIRAM) {
      "CAP_SPIRAM"
    } else if self.contains(Self::DEFAULT) {
      "CAP_DEFAULT"
    } else {
      "CAP_OTHER"
    }
  }
}

/// A capability class used to bucket outstanding allocations.
///
/// A region belongs to the class when `region_caps & mask == caps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapsFilter {
  pub caps: MemoryCaps,
  pub mask: MemoryCaps,
}

impl CapsFilter {
  /// Matches every region that has all of `caps`.
  pub const fn having(caps: MemoryCaps) -> Self {
    Self { caps, mask: caps }
  }

  pub fn matches(&self, region: MemoryCaps) -> bool {
    region & self.mask == self.caps
  }
}
