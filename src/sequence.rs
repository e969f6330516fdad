//! Ordered list of pages forming the full centroid sequence.
use std::slice;

use crate::error::{DigestError, Result};
use crate::page::Page;

/// Fixed-capacity list of pages.
///
/// Each page is sorted on its own and the pages do not overlap, so reading them front to back
/// yields all centroids in ascending order of their means. The list follows the same write
/// contract as `FixedArray`: pages can be replaced, inserted or appended, but never placed past
/// the current end.
#[derive(Clone, Debug, PartialEq)]
pub struct PagedSequence {
    pages: Vec<Page>,
    max_size: usize,
}

impl PagedSequence {
    /// Create empty sequence that can hold up to `max_size` pages.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            pages: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Maximum number of pages.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of pages.
    pub fn size(&self) -> usize {
        self.pages.len()
    }

    /// Checks if there are no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Checks if no further page can be added.
    pub fn is_full(&self) -> bool {
        self.pages.len() == self.max_size
    }

    /// Page at `index`.
    pub fn get(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    /// Mutable page at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Page> {
        self.pages.get_mut(index)
    }

    /// Last page.
    pub fn last(&self) -> Option<&Page> {
        self.pages.last()
    }

    /// Iterate over the pages in order.
    pub fn iter(&self) -> slice::Iter<'_, Page> {
        self.pages.iter()
    }

    /// Replace page at `index`, or append if `index == size()`.
    ///
    /// A replaced page is handed back to the caller.
    pub fn set(&mut self, index: usize, page: Page) -> Result<Option<Page>> {
        self.check_write(index)?;

        if index == self.pages.len() {
            self.pages.push(page);
            Ok(None)
        } else {
            Ok(Some(std::mem::replace(&mut self.pages[index], page)))
        }
    }

    /// Insert page at `index`, shifting all following pages one position back.
    pub fn insert(&mut self, index: usize, page: Page) -> Result<()> {
        self.check_write(index)?;
        if self.is_full() {
            return Err(DigestError::Capacity {
                capacity: self.max_size,
            });
        }

        self.pages.insert(index, page);
        Ok(())
    }

    /// Append page.
    pub fn push(&mut self, page: Page) -> Result<()> {
        if self.is_full() {
            return Err(DigestError::Capacity {
                capacity: self.max_size,
            });
        }

        self.pages.push(page);
        Ok(())
    }

    /// Remove page at `index` and hand it back, shifting all following pages one position forward.
    pub fn delete_at(&mut self, index: usize) -> Result<Page> {
        if index >= self.pages.len() {
            return Err(DigestError::Bounds {
                index,
                limit: self.pages.len(),
            });
        }
        Ok(self.pages.remove(index))
    }

    /// Drop all pages.
    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Number of centroids over all pages.
    pub fn centroid_count(&self) -> usize {
        self.pages.iter().map(Page::active).sum()
    }

    /// Sum of the cached `total_count` of all pages.
    pub fn total_weight(&self) -> i64 {
        self.pages.iter().map(Page::total_count).sum()
    }

    fn check_write(&self, index: usize) -> Result<()> {
        if index >= self.max_size {
            Err(DigestError::Bounds {
                index,
                limit: self.max_size,
            })
        } else if index > self.pages.len() {
            Err(DigestError::Ordering {
                index,
                size: self.pages.len(),
            })
        } else {
            Ok(())
        }
    }
}

impl<'a> IntoIterator for &'a PagedSequence {
    type Item = &'a Page;
    type IntoIter = slice::Iter<'a, Page>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
