//! Construction parameters of a digest.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

/// Smallest page size that still leaves two non-empty halves after a split.
pub const MIN_PAGE_SIZE: usize = 4;

/// Number of centroids per `compression` unit a digest may hold before it gets rebuilt.
pub const CENTROIDS_PER_COMPRESSION: f64 = 20.;

/// Parameters of a digest.
///
/// ```
/// use paged_tdigest::config::DigestConfig;
///
/// let config = DigestConfig::new(50.).with_page_size(16);
/// assert_eq!(config.page_size, 16);
/// assert_eq!(config.max_pages(), 127);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DigestConfig {
    /// Resolution. Larger values allow more centroids and a finer approximation.
    pub compression: f64,

    /// Number of centroids per page.
    pub page_size: usize,

    /// Upper bound of the number of pages, derived from `compression` and `page_size` if unset.
    pub max_pages: Option<usize>,
}

impl DigestConfig {
    /// Config with the given `compression` and defaults for everything else.
    pub fn new(compression: f64) -> Self {
        Self {
            compression,
            ..Self::default()
        }
    }

    /// Set the number of centroids per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set an explicit page budget.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Number of centroids above which the digest gets rebuilt.
    pub fn centroid_limit(&self) -> f64 {
        CENTROIDS_PER_COMPRESSION * self.compression
    }

    /// Page budget.
    ///
    /// Pages are at least half full after a split, so `centroid_limit + 1` centroids fit into
    /// `ceil((centroid_limit + 1) / (page_size / 2))` pages. One extra page covers the page that
    /// is being split while the limit is exceeded.
    pub fn max_pages(&self) -> usize {
        self.max_pages.unwrap_or_else(|| {
            let half = (self.page_size / 2).max(1) as f64;
            ((self.centroid_limit() + 1.) / half).ceil() as usize + 1
        })
    }

    /// Check parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.compression.is_finite() && self.compression > 0.) {
            return Err(DigestError::Validation {
                what: "compression must be finite and positive",
            });
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(DigestError::Validation {
                what: "page size has to be 4 or higher",
            });
        }
        if self.max_pages == Some(0) {
            return Err(DigestError::Validation {
                what: "page budget must not be zero",
            });
        }
        Ok(())
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            compression: 100.,
            page_size: 32,
            max_pages: None,
        }
    }
}
