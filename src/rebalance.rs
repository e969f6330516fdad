//! Structural maintenance of a digest's pages.
use std::mem;

use log::{debug, trace};
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::cursor::Position;
use crate::digest::{add_centroid, DigestState};
use crate::error::{DigestError, Result};
use crate::page::{Centroid, Page};

/// Operations a digest delegates whenever centroids have to be created, removed or reorganized.
///
/// The insertion algorithm only merges weight into existing centroids on its own. Everything that
/// changes the layout of the pages goes through this trait, so the storage strategy can be
/// swapped out. Implementations must keep the centroid sequence sorted and must update
/// `total_weight`, `centroid_count` and the page `total_count`s for every change they make.
pub trait Rebalance {
    /// Logical position accepted by `delete`.
    type Handle;

    /// First centroid with a mean `>= value`, `None` if there is none.
    ///
    /// Only consulted when no centroid at or below `value` exists.
    fn ceil(&mut self, state: &DigestState, value: f64) -> Result<Option<Position>>;

    /// Insert a new centroid.
    fn add_raw(&mut self, state: &mut DigestState, value: f64, weight: i64) -> Result<()>;

    /// Remove a centroid.
    fn delete(&mut self, state: &mut DigestState, handle: Self::Handle) -> Result<()>;

    /// Rebuild the digest. Called once the centroid count exceeds `20 * compression`.
    fn compress(&mut self, state: &mut DigestState, rng: &mut dyn RngCore) -> Result<()>;

    /// Translate a page coordinate into a handle for `delete`.
    fn memoized_index(&mut self, state: &DigestState, position: Position) -> Self::Handle;
}

/// Rebalancer working directly on the page list.
///
/// New centroids go into the page whose range covers them, full pages are split in two, pages
/// that run empty are removed. A rebuild re-adds all centroids in random order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagedRebalancer;

impl Rebalance for PagedRebalancer {
    type Handle = Position;

    fn ceil(&mut self, state: &DigestState, value: f64) -> Result<Option<Position>> {
        let position = state
            .data()
            .iter()
            .enumerate()
            .find(|(_, page)| page.last_mean().is_some_and(|m| m >= value))
            .map(|(i, page)| {
                let element = page.means().as_slice().partition_point(|m| *m < value);
                Position::new(i, element)
            });
        Ok(position)
    }

    fn add_raw(&mut self, state: &mut DigestState, value: f64, weight: i64) -> Result<()> {
        let total_weight = state
            .total_weight()
            .checked_add(weight)
            .ok_or(DigestError::Validation {
                what: "total weight overflows",
            })?;
        let page_size = state.page_size();
        let data = state.data_mut();

        if data.is_empty() {
            let mut page = Page::with_capacity(page_size);
            page.add(value, weight)?;
            data.push(page)?;
        } else {
            let next = (1..data.size())
                .find(|&i| data.get(i).and_then(Page::first_mean).is_some_and(|m| m > value))
                .unwrap_or(data.size());
            let target = next - 1;

            if data.get(target).is_some_and(Page::is_full) && data.is_full() {
                return Err(DigestError::Capacity {
                    capacity: data.max_size(),
                });
            }

            let page = data.get_mut(target).ok_or(DigestError::State {
                what: "no page to insert into",
            })?;
            if let Some(upper) = page.add(value, weight)? {
                data.insert(next, upper)?;
                trace!("page {} split, now {} pages", target, data.size());
            }
        }

        state.set_total_weight(total_weight);
        state.set_centroid_count(state.centroid_count() + 1);
        Ok(())
    }

    fn delete(&mut self, state: &mut DigestState, handle: Position) -> Result<()> {
        let data = state.data_mut();
        let size = data.size();
        let page = data.get_mut(handle.page).ok_or(DigestError::Bounds {
            index: handle.page,
            limit: size,
        })?;

        let removed = page.remove(handle.element)?;
        if page.is_empty() {
            data.delete_at(handle.page)?;
            trace!("removed empty page {}", handle.page);
        }

        state.set_total_weight(state.total_weight() - removed.weight);
        state.set_centroid_count(state.centroid_count().saturating_sub(1));
        Ok(())
    }

    fn compress(&mut self, state: &mut DigestState, rng: &mut dyn RngCore) -> Result<()> {
        let mut centroids: Vec<Centroid> = state.centroids().filter(|c| c.weight > 0).collect();
        centroids.shuffle(rng);

        // `state` stays untouched until the rebuild went through
        let mut rebuilt = state.empty_like();
        for c in centroids {
            add_centroid(&mut rebuilt, rng, self, c.mean, c.weight)?;
        }

        let old = mem::replace(state, rebuilt);
        debug!(
            "rebuilt digest: {} -> {} centroids, {} pages",
            old.centroid_count(),
            state.centroid_count(),
            state.data().size()
        );
        Ok(())
    }

    fn memoized_index(&mut self, _state: &DigestState, position: Position) -> Position {
        position
    }
}

#[cfg(test)]
mod tests {
    use super::{PagedRebalancer, Rebalance};
    use crate::config::DigestConfig;
    use crate::cursor::Position;
    use crate::digest::DigestState;
    use crate::error::DigestError;
    use crate::page::{Centroid, Page};
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    fn state(page_size: usize) -> DigestState {
        DigestState::new(&DigestConfig::new(100.).with_page_size(page_size)).unwrap()
    }

    fn means(state: &DigestState) -> Vec<f64> {
        state.centroids().map(|c| c.mean).collect()
    }

    #[test]
    fn add_raw_into_empty() {
        let mut state = state(4);
        PagedRebalancer.add_raw(&mut state, 1.0, 2).unwrap();

        assert_eq!(state.data().size(), 1);
        assert_eq!(state.total_weight(), 2);
        assert_eq!(state.centroid_count(), 1);
        assert_eq!(state.data().get(0).unwrap().capacity(), 4);
    }

    #[test]
    fn add_raw_splits_pages() {
        let mut state = state(4);
        let mut r = PagedRebalancer;
        for v in [5.0, 1.0, 3.0, 7.0, 2.0, 6.0, 4.0, 0.0] {
            r.add_raw(&mut state, v, 1).unwrap();
        }

        assert_eq!(means(&state), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(state.centroid_count(), 8);
        assert_eq!(state.total_weight(), 8);
        assert!(state.data().size() > 1);
        for page in state.data() {
            assert!(!page.is_empty());
            assert_eq!(page.total_count(), page.active() as i64);
        }
    }

    #[test]
    fn add_raw_capacity() {
        let mut state =
            DigestState::new(&DigestConfig::new(100.).with_page_size(4).with_max_pages(1))
                .unwrap();
        let mut r = PagedRebalancer;
        for v in 0..4 {
            r.add_raw(&mut state, f64::from(v), 1).unwrap();
        }

        assert_eq!(
            r.add_raw(&mut state, 10.0, 1),
            Err(DigestError::Capacity { capacity: 1 })
        );
        assert_eq!(state.centroid_count(), 4);
        assert_eq!(state.total_weight(), 4);
    }

    #[test]
    fn ceil() {
        let mut state = state(4);
        let mut r = PagedRebalancer;
        assert_eq!(r.ceil(&state, 1.0).unwrap(), None);

        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            r.add_raw(&mut state, v, 1).unwrap();
        }
        let lookup = |value: f64| {
            PagedRebalancer
                .ceil(&state, value)
                .unwrap()
                .map(|p| state.centroid(p).unwrap().mean)
        };
        assert_eq!(lookup(0.0), Some(1.0));
        assert_eq!(lookup(2.5), Some(3.0));
        assert_eq!(lookup(4.0), Some(4.0));
        assert_eq!(lookup(5.5), None);
    }

    #[test]
    fn delete_removes_empty_pages() {
        let mut state = state(4);
        let mut r = PagedRebalancer;
        for v in 0..5 {
            r.add_raw(&mut state, f64::from(v), 2).unwrap();
        }
        let pages = state.data().size();

        let handle = r.memoized_index(&state, Position::new(0, 1));
        r.delete(&mut state, handle).unwrap();
        assert_eq!(state.total_weight(), 8);
        assert_eq!(state.centroid_count(), 4);
        assert_eq!(means(&state), vec![0.0, 2.0, 3.0, 4.0]);

        let last = state.data().size() - 1;
        while state.data().get(last).is_some_and(|p| !p.is_empty()) {
            r.delete(&mut state, Position::new(last, 0)).unwrap();
        }
        assert!(state.data().size() < pages);
        assert!(state.data().iter().all(|p| !p.is_empty()));
        assert_eq!(state.centroid_count(), state.data().centroid_count());
        assert_eq!(state.total_weight(), state.data().total_weight());
    }

    #[test]
    fn delete_out_of_bounds() {
        let mut state = state(4);
        assert_eq!(
            PagedRebalancer.delete(&mut state, Position::new(0, 0)),
            Err(DigestError::Bounds { index: 0, limit: 0 })
        );
    }

    #[test]
    fn compress_keeps_weight() {
        let mut state = state(4);
        let mut r = PagedRebalancer;
        for v in 0..50 {
            r.add_raw(&mut state, f64::from(v % 10), 1).unwrap();
        }
        let mut rng = ChaChaRng::from_seed([0; 32]);
        r.compress(&mut state, &mut rng).unwrap();

        assert_eq!(state.total_weight(), 50);
        assert!(state.centroid_count() <= 10);
        assert_eq!(state.centroid_count(), state.data().centroid_count());
        let m = means(&state);
        assert!(m.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn add_raw_rejects_weight_overflow() {
        let mut state = state(4);
        let mut r = PagedRebalancer;
        r.add_raw(&mut state, 1.0, i64::MAX).unwrap();

        assert!(matches!(
            r.add_raw(&mut state, 2.0, 1),
            Err(DigestError::Validation { .. })
        ));
        assert_eq!(state.centroid_count(), 1);
        assert_eq!(state.total_weight(), i64::MAX);
        assert_eq!(state.data().centroid_count(), 1);
    }

    #[test]
    fn failed_compress_keeps_state() {
        // two packed pages cannot be rebuilt into two pages by random re-insertion
        let config = DigestConfig::new(1000.).with_page_size(4).with_max_pages(2);
        let mut failures = 0;
        for seed in 0..16 {
            let mut state = DigestState::new(&config).unwrap();
            let mut r = PagedRebalancer;
            for first in [0, 4] {
                let mut page = Page::with_capacity(4);
                for v in first..first + 4 {
                    page.add_at(page.active(), f64::from(v), 1).unwrap();
                }
                state.data_mut().push(page).unwrap();
            }
            state.set_total_weight(8);
            state.set_centroid_count(8);
            let before = state.clone();

            let mut rng = ChaChaRng::seed_from_u64(seed);
            match r.compress(&mut state, &mut rng) {
                Err(e) => {
                    assert_eq!(e, DigestError::Capacity { capacity: 2 });
                    assert_eq!(state, before);
                    failures += 1;
                }
                Ok(()) => {
                    assert_eq!(state.total_weight(), 8);
                    assert_eq!(state.centroid_count(), 8);
                }
            }
        }
        assert!(failures > 0);
    }

    #[test]
    fn compress_keeps_page_budget() {
        let config = DigestConfig::new(100.).with_page_size(4).with_max_pages(7);
        let mut state = DigestState::new(&config).unwrap();
        let mut r = PagedRebalancer;
        r.add_raw(&mut state, 1.0, 1).unwrap();

        let mut rng = ChaChaRng::from_seed([0; 32]);
        r.compress(&mut state, &mut rng).unwrap();
        assert_eq!(state.data().max_size(), 7);
        assert_eq!(state.page_size(), 4);
    }

    #[test]
    fn compress_drops_zero_weights() {
        let mut state = state(4);
        let mut r = PagedRebalancer;
        r.add_raw(&mut state, 1.0, 0).unwrap();
        r.add_raw(&mut state, 2.0, 3).unwrap();

        let mut rng = ChaChaRng::from_seed([0; 32]);
        r.compress(&mut state, &mut rng).unwrap();
        assert_eq!(
            state.centroids().collect::<Vec<_>>(),
            vec![Centroid::new(2.0, 3)]
        );
    }
}
