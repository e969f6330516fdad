//! Fixed-capacity, append-ordered arrays backing a page.
use std::fmt;

use crate::error::{DigestError, Result};

/// Element type that can be stored in a `FixedArray`.
pub trait Slot: Copy + fmt::Debug + PartialOrd {
    /// Check that the value may be stored.
    fn validate(self) -> Result<Self>;
}

impl Slot for f64 {
    #[inline]
    fn validate(self) -> Result<Self> {
        if self.is_finite() {
            Ok(self)
        } else {
            Err(DigestError::Validation {
                what: "mean must be finite",
            })
        }
    }
}

impl Slot for i64 {
    #[inline]
    fn validate(self) -> Result<Self> {
        if self >= 0 {
            Ok(self)
        } else {
            Err(DigestError::Validation {
                what: "weight must not be negative",
            })
        }
    }
}

/// Array with a capacity that is fixed at construction.
///
/// The populated slots always form the prefix `[0, size)`. Writes are only allowed inside that
/// prefix or exactly at its end, so the array can never contain holes:
///
/// ```
/// use paged_tdigest::array::WeightArray;
///
/// let mut counts = WeightArray::with_capacity(4);
/// counts.set(0, 3).unwrap();
/// assert!(counts.set(2, 1).is_err()); // would leave a hole
/// counts.set(1, 5).unwrap();
/// counts.insert(0, 1).unwrap();
/// assert_eq!(counts.as_slice(), &[1, 3, 5]);
/// assert_eq!(counts.delete_at(2).unwrap(), 5);
/// assert_eq!(counts.size(), 2);
/// ```
///
/// Growth beyond the capacity is never done implicitly. When a page is full it has to be split by
/// its owner.
#[derive(Clone, PartialEq)]
pub struct FixedArray<T>
where
    T: Slot,
{
    values: Vec<T>,
    capacity: usize,
}

/// Means of the centroids of one page.
pub type MeanArray = FixedArray<f64>;

/// Weights of the centroids of one page.
pub type WeightArray = FixedArray<i64>;

impl<T> FixedArray<T>
where
    T: Slot,
{
    /// Create empty array that can hold up to `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of populated slots.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Checks if no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Checks if every slot is populated.
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Get element at `index`, or `None` if the slot is not populated.
    pub fn get(&self, index: usize) -> Option<T> {
        self.values.get(index).copied()
    }

    /// Populated slots in order.
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Overwrite the element at `index`, or append if `index == size()`.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let value = value.validate()?;
        self.check_write(index)?;

        if index == self.values.len() {
            self.values.push(value);
        } else {
            self.values[index] = value;
        }
        Ok(())
    }

    /// Insert element at `index`, shifting everything from `index` onwards one slot to the right.
    pub fn insert(&mut self, index: usize, value: T) -> Result<()> {
        let value = value.validate()?;
        self.check_write(index)?;
        if self.is_full() {
            return Err(DigestError::Capacity {
                capacity: self.capacity,
            });
        }

        self.values.insert(index, value);
        Ok(())
    }

    /// Remove and return the element at `index`, shifting the tail one slot to the left.
    pub fn delete_at(&mut self, index: usize) -> Result<T> {
        if index >= self.values.len() {
            return Err(DigestError::Bounds {
                index,
                limit: self.values.len(),
            });
        }
        Ok(self.values.remove(index))
    }

    /// Move the elements `[at, size)` into a new array of the same capacity.
    pub fn split_off(&mut self, at: usize) -> Result<Self> {
        if at > self.values.len() {
            return Err(DigestError::Bounds {
                index: at,
                limit: self.values.len(),
            });
        }

        let mut values = Vec::with_capacity(self.capacity);
        values.extend(self.values.drain(at..));
        Ok(Self {
            values,
            capacity: self.capacity,
        })
    }

    /// Drop all elements.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    fn check_write(&self, index: usize) -> Result<()> {
        if index >= self.capacity {
            Err(DigestError::Bounds {
                index,
                limit: self.capacity,
            })
        } else if index > self.values.len() {
            Err(DigestError::Ordering {
                index,
                size: self.values.len(),
            })
        } else {
            Ok(())
        }
    }
}

impl<T> fmt::Debug for FixedArray<T>
where
    T: Slot,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FixedArray {{ size: {}, capacity: {} }}",
            self.values.len(),
            self.capacity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{MeanArray, WeightArray};
    use crate::error::DigestError;

    #[test]
    fn empty() {
        let a = WeightArray::with_capacity(4);
        assert_eq!(a.size(), 0);
        assert_eq!(a.capacity(), 4);
        assert!(a.is_empty());
        assert!(!a.is_full());
        assert_eq!(a.get(0), None);
    }

    #[test]
    fn ordering_contract() {
        let mut a = WeightArray::with_capacity(4);

        a.set(0, 10).unwrap();
        assert_eq!(a.size(), 1);

        assert_eq!(
            a.set(2, 20),
            Err(DigestError::Ordering { index: 2, size: 1 })
        );
        assert_eq!(a.size(), 1);

        a.set(1, 20).unwrap();
        assert_eq!(a.size(), 2);

        a.insert(0, 5).unwrap();
        assert_eq!(a.size(), 3);
        assert_eq!(a.as_slice(), &[5, 10, 20]);

        assert_eq!(a.delete_at(a.size() - 1).unwrap(), 20);
        assert_eq!(a.size(), 2);
        assert_eq!(a.as_slice(), &[5, 10]);
    }

    #[test]
    fn set_overwrites() {
        let mut a = MeanArray::with_capacity(4);
        a.set(0, 1.5).unwrap();
        a.set(0, 2.5).unwrap();
        assert_eq!(a.size(), 1);
        assert_eq!(a.get(0), Some(2.5));
    }

    #[test]
    fn bounds() {
        let mut a = WeightArray::with_capacity(2);
        assert_eq!(
            a.set(2, 1),
            Err(DigestError::Bounds { index: 2, limit: 2 })
        );
        assert_eq!(
            a.insert(5, 1),
            Err(DigestError::Bounds { index: 5, limit: 2 })
        );
        assert_eq!(a.delete_at(0), Err(DigestError::Bounds { index: 0, limit: 0 }));
    }

    #[test]
    fn insert_into_full_array() {
        let mut a = WeightArray::with_capacity(2);
        a.insert(0, 1).unwrap();
        a.insert(0, 2).unwrap();
        assert!(a.is_full());
        assert_eq!(a.insert(1, 3), Err(DigestError::Capacity { capacity: 2 }));
        assert_eq!(a.as_slice(), &[2, 1]);
    }

    #[test]
    fn validation_before_mutation() {
        let mut counts = WeightArray::with_capacity(2);
        counts.set(0, 1).unwrap();
        assert!(matches!(
            counts.set(0, -1),
            Err(DigestError::Validation { .. })
        ));
        assert!(matches!(
            counts.insert(0, -3),
            Err(DigestError::Validation { .. })
        ));
        assert_eq!(counts.as_slice(), &[1]);

        let mut means = MeanArray::with_capacity(2);
        assert!(matches!(
            means.set(0, f64::NAN),
            Err(DigestError::Validation { .. })
        ));
        assert!(matches!(
            means.insert(0, f64::INFINITY),
            Err(DigestError::Validation { .. })
        ));
        assert!(means.is_empty());
    }

    #[test]
    fn split_off() {
        let mut a = WeightArray::with_capacity(4);
        for (i, w) in [1, 2, 3, 4].iter().enumerate() {
            a.set(i, *w).unwrap();
        }
        let b = a.split_off(2).unwrap();
        assert_eq!(a.as_slice(), &[1, 2]);
        assert_eq!(b.as_slice(), &[3, 4]);
        assert_eq!(b.capacity(), 4);
        assert!(a.split_off(3).is_err());
    }

    #[test]
    fn debug() {
        let a = MeanArray::with_capacity(8);
        assert_eq!(format!("{:?}", a), "FixedArray { size: 0, capacity: 8 }");
    }
}
