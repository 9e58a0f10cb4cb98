use core::fmt;
use core::ops::Deref;

use arrayvec::ArrayVec;

/// A list with room for at most `N` items.
///
/// Pushing into a full list drops the item and bumps [`Bounded::overflow`].
/// That is how every diagnostic query in this crate reports more tasks or
/// blocks than the caller made room for: the result is truncated, never an
/// error. Backends that cannot see past the capacity (the ESP-IDF queries
/// stop filling once the array is full) leave the overflow count at zero, so
/// check [`Bounded::is_saturated`] to learn whether truncation may have
/// happened.
pub struct Bounded<T, const N: usize> {
  items: ArrayVec<T, N>,
  overflow: usize,
}

impl<T, const N: usize> Bounded<T, N> {
  pub fn new() -> Self {
    Self { items: ArrayVec::new(), overflow: 0 }
  }

  /// Appends `item`, or drops it when the list is full.
  ///
  /// Returns `false` if the item was dropped.
  pub fn push(&mut self, item: T) -> bool {
    match self.items.try_push(item) {
      Ok(()) => true,
      Err(_) => {
        self.overflow += 1;
        false
      }
    }
  }

  pub const fn capacity(&self) -> usize {
    N
  }

  /// Number of items that did not fit.
  pub fn overflow(&self) -> usize {
    self.overflow
  }

  pub fn is_saturated(&self) -> bool {
    self.items.is_full()
  }

  pub fn as_slice(&self) -> &[T] {
    &self.items
  }
}

impl<T, const N: usize> Default for Bounded<T, N> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T, const N: usize> Deref for Bounded<T, N> {
  type Target = [T];

  fn deref(&self) -> &[T] {
    &self.items
  }
}

impl<T, const N: usize> Extend<T> for Bounded<T, N> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for item in iter {
      self.push(item);
    }
  }
}

impl<T, const N: usize> FromIterator<T> for Bounded<T, N> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let mut bounded = Self::new();
    bounded.extend(iter);
    bounded
  }
}

impl<'a, T, const N: usize> IntoIterator for &'a Bounded<T, N> {
  type Item = &'a T;
  type IntoIter = core::slice::Iter<'a, T>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for Bounded<T, N> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Bounded")
      .field("items", &self.items.as_slice())
      .field("capacity", &N)
      .field("overflow", &self.overflow)
      .finish()
  }
}

impl<T: Clone, const N: usize> Clone for Bounded<T, N> {
  fn clone(&self) -> Self {
    Self { items: self.items.clone(), overflow: self.overflow }
  }
}
