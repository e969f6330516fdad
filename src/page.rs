//! One sorted segment of the centroid sequence.
use crate::array::{MeanArray, Slot, WeightArray};
use crate::error::{DigestError, Result};

/// A `(mean, weight)` summary point.
///
/// Inside a digest centroids only exist positionally (see `Page`); this type is used when they are
/// handed out or fed back in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    /// Mean of all observations merged into this centroid.
    pub mean: f64,

    /// Number of observations merged into this centroid.
    pub weight: i64,
}

impl Centroid {
    /// Create new centroid.
    pub fn new(mean: f64, weight: i64) -> Self {
        Self { mean, weight }
    }
}

/// A page bundles the means and weights of up to `capacity` centroids, sorted by mean.
///
/// The two arrays are parallel: slot `i` of `means` and slot `i` of `weights` form one centroid.
/// `total_count` caches the sum of `weights`; it is maintained by whoever mutates the page and is
/// never recomputed from the arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    means: MeanArray,
    weights: WeightArray,
    total_count: i64,
}

impl Page {
    /// Create empty page that holds up to `capacity` centroids.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            means: MeanArray::with_capacity(capacity),
            weights: WeightArray::with_capacity(capacity),
            total_count: 0,
        }
    }

    /// Create page from existing arrays.
    ///
    /// Both arrays must agree in capacity and size. `total_count` starts as the sum of `weights`.
    pub fn from_arrays(means: MeanArray, weights: WeightArray) -> Result<Self> {
        if means.capacity() != weights.capacity() {
            return Err(DigestError::Validation {
                what: "page arrays differ in capacity",
            });
        }
        if means.size() != weights.size() {
            return Err(DigestError::Validation {
                what: "page arrays differ in size",
            });
        }

        let total_count = weights.as_slice().iter().sum();
        Ok(Self {
            means,
            weights,
            total_count,
        })
    }

    /// Maximum number of centroids.
    pub fn capacity(&self) -> usize {
        self.means.capacity()
    }

    /// Number of populated centroid slots.
    pub fn active(&self) -> usize {
        self.means.size()
    }

    /// Checks if the page holds no centroid.
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Checks if the page cannot take another centroid without splitting.
    pub fn is_full(&self) -> bool {
        self.means.is_full()
    }

    /// Mean of centroid `i`.
    pub fn mean(&self, i: usize) -> Option<f64> {
        self.means.get(i)
    }

    /// Weight of centroid `i`.
    pub fn weight(&self, i: usize) -> Option<i64> {
        self.weights.get(i)
    }

    /// Centroid `i`.
    pub fn centroid(&self, i: usize) -> Option<Centroid> {
        Some(Centroid::new(self.means.get(i)?, self.weights.get(i)?))
    }

    /// Smallest mean on this page.
    pub fn first_mean(&self) -> Option<f64> {
        self.means.as_slice().first().copied()
    }

    /// Largest mean on this page.
    pub fn last_mean(&self) -> Option<f64> {
        self.means.as_slice().last().copied()
    }

    /// Means array.
    pub fn means(&self) -> &MeanArray {
        &self.means
    }

    /// Weights array.
    pub fn weights(&self) -> &WeightArray {
        &self.weights
    }

    /// Mutable means array. Callers are responsible for keeping the page sorted.
    pub fn means_mut(&mut self) -> &mut MeanArray {
        &mut self.means
    }

    /// Mutable weights array. Callers are responsible for keeping `total_count` in sync.
    pub fn weights_mut(&mut self) -> &mut WeightArray {
        &mut self.weights
    }

    /// Cached sum of all weights on this page.
    pub fn total_count(&self) -> i64 {
        self.total_count
    }

    /// Overwrite the cached weight sum.
    pub fn set_total_count(&mut self, total_count: i64) {
        self.total_count = total_count;
    }

    /// Insert centroid in sorted position, in front of the first centroid with a mean `>= value`.
    ///
    /// If the page is full, it is split first. The upper half is returned and must be placed
    /// directly after this page by the caller.
    pub fn add(&mut self, value: f64, weight: i64) -> Result<Option<Self>> {
        let value = value.validate()?;
        let weight = weight.validate()?;
        self.grown_total(weight)?;
        if self.capacity() < 2 {
            return Err(DigestError::Capacity {
                capacity: self.capacity(),
            });
        }

        let i = self.means.as_slice().partition_point(|m| *m < value);
        if !self.is_full() {
            self.add_at(i, value, weight)?;
            return Ok(None);
        }

        let mut upper = self.split()?;
        let kept = self.active();
        if i <= kept {
            self.add_at(i, value, weight)?;
        } else {
            upper.add_at(i - kept, value, weight)?;
        }
        Ok(Some(upper))
    }

    /// Insert centroid at slot `index` (clamped to the end) and account for its weight.
    pub fn add_at(&mut self, index: usize, value: f64, weight: i64) -> Result<()> {
        let weight = weight.validate()?;
        let total_count = self.grown_total(weight)?;
        let index = index.min(self.active());

        // arrays are in lockstep, so the second insert cannot fail once the first one succeeded
        self.means.insert(index, value)?;
        self.weights.insert(index, weight)?;
        self.total_count = total_count;
        Ok(())
    }

    fn grown_total(&self, weight: i64) -> Result<i64> {
        self.total_count
            .checked_add(weight)
            .ok_or(DigestError::Validation {
                what: "page weight overflows",
            })
    }

    /// Remove centroid `index` and subtract its weight.
    pub fn remove(&mut self, index: usize) -> Result<Centroid> {
        let mean = self.means.delete_at(index)?;
        let weight = self.weights.delete_at(index)?;
        self.total_count -= weight;
        Ok(Centroid::new(mean, weight))
    }

    /// Split a full page.
    ///
    /// `self` keeps the lower `capacity - capacity / 2` centroids, the returned page gets the upper
    /// `capacity / 2`. Both `total_count`s are adjusted by the weight that moved.
    pub fn split(&mut self) -> Result<Self> {
        if !self.is_full() {
            return Err(DigestError::State {
                what: "only full pages can be split",
            });
        }

        let at = self.capacity() - self.capacity() / 2;
        let means = self.means.split_off(at)?;
        let weights = self.weights.split_off(at)?;
        let moved: i64 = weights.as_slice().iter().sum();
        self.total_count -= moved;

        log::trace!(
            "split page at {}, moved {} centroids with weight {}",
            at,
            means.size(),
            moved
        );
        Ok(Self {
            means,
            weights,
            total_count: moved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Centroid, Page};
    use crate::array::{MeanArray, WeightArray};
    use crate::error::DigestError;

    fn page_of(capacity: usize, values: &[(f64, i64)]) -> Page {
        let mut page = Page::with_capacity(capacity);
        for (m, w) in values {
            assert!(page.add(*m, *w).unwrap().is_none());
        }
        page
    }

    #[test]
    fn from_arrays() {
        let mut means = MeanArray::with_capacity(4);
        let mut weights = WeightArray::with_capacity(4);
        means.set(0, 1.0).unwrap();
        means.set(1, 2.0).unwrap();
        weights.set(0, 3).unwrap();
        weights.set(1, 4).unwrap();

        let page = Page::from_arrays(means, weights).unwrap();
        assert_eq!(page.active(), 2);
        assert_eq!(page.capacity(), 4);
        assert_eq!(page.total_count(), 7);
        assert_eq!(page.centroid(1), Some(Centroid::new(2.0, 4)));
        assert_eq!(page.centroid(2), None);
    }

    #[test]
    fn from_arrays_rejects_mismatch() {
        let means = MeanArray::with_capacity(4);
        let weights = WeightArray::with_capacity(8);
        assert!(matches!(
            Page::from_arrays(means, weights),
            Err(DigestError::Validation { .. })
        ));

        let mut means = MeanArray::with_capacity(4);
        means.set(0, 1.0).unwrap();
        let weights = WeightArray::with_capacity(4);
        assert!(matches!(
            Page::from_arrays(means, weights),
            Err(DigestError::Validation { .. })
        ));
    }

    #[test]
    fn total_count_is_cached() {
        let mut page = page_of(4, &[(1.0, 2)]);
        page.weights_mut().set(0, 10).unwrap();
        assert_eq!(page.total_count(), 2);
        page.set_total_count(10);
        assert_eq!(page.total_count(), 10);
    }

    #[test]
    fn add_sorted() {
        let page = page_of(8, &[(3.0, 1), (1.0, 1), (2.0, 2), (2.0, 3)]);
        assert_eq!(page.means().as_slice(), &[1.0, 2.0, 2.0, 3.0]);
        assert_eq!(page.weights().as_slice(), &[1, 3, 2, 1]);
        assert_eq!(page.total_count(), 7);
        assert_eq!(page.first_mean(), Some(1.0));
        assert_eq!(page.last_mean(), Some(3.0));
    }

    #[test]
    fn add_splits_full_page() {
        let mut page = page_of(4, &[(1.0, 1), (2.0, 2), (4.0, 3), (5.0, 4)]);
        let upper = page.add(3.0, 5).unwrap().unwrap();

        assert_eq!(page.means().as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(page.total_count(), 8);
        assert_eq!(upper.means().as_slice(), &[4.0, 5.0]);
        assert_eq!(upper.total_count(), 7);
    }

    #[test]
    fn add_splits_into_upper_half() {
        let mut page = page_of(5, &[(1.0, 1), (2.0, 1), (3.0, 1), (4.0, 1), (5.0, 1)]);
        let upper = page.add(4.5, 1).unwrap().unwrap();

        assert_eq!(page.means().as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(upper.means().as_slice(), &[4.0, 4.5, 5.0]);
        assert_eq!(page.total_count() + upper.total_count(), 6);
    }

    #[test]
    fn remove() {
        let mut page = page_of(4, &[(1.0, 1), (2.0, 2)]);
        assert_eq!(page.remove(0).unwrap(), Centroid::new(1.0, 1));
        assert_eq!(page.total_count(), 2);
        assert_eq!(page.active(), 1);
        assert!(page.remove(1).is_err());
    }

    #[test]
    fn split_requires_full_page() {
        let mut page = page_of(4, &[(1.0, 1)]);
        assert!(matches!(page.split(), Err(DigestError::State { .. })));
    }

    #[test]
    fn add_rejects_weight_overflow() {
        let mut page = page_of(4, &[(1.0, i64::MAX)]);
        assert!(matches!(
            page.add(2.0, 1),
            Err(DigestError::Validation { .. })
        ));
        assert!(page.add_at(1, 2.0, 1).is_err());
        assert_eq!(page.active(), 1);
        assert_eq!(page.total_count(), i64::MAX);

        // a full page must not be split before the overflow is detected
        let mut page = page_of(4, &[(1.0, 1), (2.0, 1), (3.0, 1), (4.0, i64::MAX - 3)]);
        assert!(page.add(5.0, 1).is_err());
        assert_eq!(page.active(), 4);
        assert_eq!(page.total_count(), i64::MAX);
    }

    #[test]
    fn add_rejects_invalid_input() {
        let mut page = Page::with_capacity(4);
        assert!(page.add(f64::NAN, 1).is_err());
        assert!(page.add(1.0, -1).is_err());
        assert!(page.is_empty());
        assert_eq!(page.total_count(), 0);
    }
}
