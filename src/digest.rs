//! Online t-digest insertion on top of paged centroid storage.
use std::fmt;

use rand::{Rng, RngCore};

use crate::config::{DigestConfig, CENTROIDS_PER_COMPRESSION};
use crate::cursor::{head_sum, shift, Cursor, Direction, Position};
use crate::error::{DigestError, Result};
use crate::page::Centroid;
use crate::rebalance::{PagedRebalancer, Rebalance};
use crate::sequence::PagedSequence;

const WEIGHT_OVERFLOW: DigestError = DigestError::Validation {
    what: "total weight overflows",
};

/// Storage and bookkeeping of a digest.
///
/// This is everything a `Rebalance` implementation is allowed to touch. `total_weight` and
/// `centroid_count` are plain counters: whoever adds or removes centroids has to update them.
#[derive(Clone, Debug, PartialEq)]
pub struct DigestState {
    data: PagedSequence,
    total_weight: i64,
    centroid_count: usize,
    compression: f64,
    page_size: usize,
    rebuilding: bool,
}

impl DigestState {
    /// Create empty state.
    pub fn new(config: &DigestConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            data: PagedSequence::with_max_size(config.max_pages()),
            total_weight: 0,
            centroid_count: 0,
            compression: config.compression,
            page_size: config.page_size,
            rebuilding: false,
        })
    }

    /// Pages holding the centroids.
    pub fn data(&self) -> &PagedSequence {
        &self.data
    }

    /// Mutable pages. Callers must keep the pages sorted and the counters in sync.
    pub fn data_mut(&mut self) -> &mut PagedSequence {
        &mut self.data
    }

    /// Sum of all weights merged into the digest.
    pub fn total_weight(&self) -> i64 {
        self.total_weight
    }

    /// Overwrite the total weight.
    pub fn set_total_weight(&mut self, total_weight: i64) {
        self.total_weight = total_weight;
    }

    /// Number of centroids.
    pub fn centroid_count(&self) -> usize {
        self.centroid_count
    }

    /// Overwrite the centroid count.
    pub fn set_centroid_count(&mut self, centroid_count: usize) {
        self.centroid_count = centroid_count;
    }

    /// Compression factor.
    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Capacity of newly created pages.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Checks if the centroid count exceeds `20 * compression`.
    pub fn needs_compression(&self) -> bool {
        self.centroid_count as f64 > CENTROIDS_PER_COMPRESSION * self.compression
    }

    /// Centroid at `position`.
    pub fn centroid(&self, position: Position) -> Option<Centroid> {
        self.data.get(position.page)?.centroid(position.element)
    }

    /// All centroids in ascending order of their means.
    pub fn centroids(&self) -> impl Iterator<Item = Centroid> + '_ {
        self.data.iter().flat_map(|page| {
            page.means()
                .as_slice()
                .iter()
                .zip(page.weights().as_slice())
                .map(|(mean, weight)| Centroid::new(*mean, *weight))
        })
    }

    /// Empty state with the same parameters and page budget.
    ///
    /// A rebuild in progress stays marked as such, so centroids added to the new state while
    /// rebuilding do not start another rebuild.
    pub fn empty_like(&self) -> Self {
        Self {
            data: PagedSequence::with_max_size(self.data.max_size()),
            total_weight: 0,
            centroid_count: 0,
            compression: self.compression,
            page_size: self.page_size,
            rebuilding: self.rebuilding,
        }
    }

    /// Drop all centroids and reset the counters.
    pub fn clear(&mut self) {
        self.data.clear();
        self.total_weight = 0;
        self.centroid_count = 0;
    }

    /// Backward cursor at the last centroid whose mean does not exceed `value`.
    ///
    /// Pages are scanned front to back for the first one starting above `value`, the page before
    /// it is searched for the cut. Returns the sentinel if the digest is empty or every centroid
    /// lies above `value`.
    pub fn locate_predecessor_region(&self, value: f64) -> Cursor {
        let seq = &self.data;
        if seq.is_empty() {
            return Cursor::sentinel(Direction::Backward);
        }

        let next = (1..seq.size())
            .find(|&i| seq.get(i).and_then(|p| p.first_mean()).is_some_and(|m| m > value))
            .unwrap_or(seq.size());
        let page = next - 1;
        let cut = seq.get(page).map_or(0, |p| {
            p.means().as_slice().partition_point(|m| *m <= value)
        });

        Cursor::build(Direction::Backward, page as isize, cut as isize - 1, seq)
    }

    /// Position to start the neighbour search for `value` from.
    ///
    /// This is the last centroid at or below `value`. If it belongs to a run of centroids with a
    /// mean equal to `value`, the walk moves back to the front of that run, stopping one step
    /// short of the very first centroid of the sequence.
    pub fn locate_floor(&self, value: f64) -> Option<Position> {
        let seq = &self.data;
        let mut region = self.locate_predecessor_region(value);

        let mut result = region.advance(seq)?;
        let mut current = result;
        while let Some(next) = region.advance(seq) {
            if self.centroid(current).map(|c| c.mean) != Some(value) {
                break;
            }
            result = current;
            current = next;
        }
        Some(result)
    }

    fn centroid_at(&self, position: Position) -> Result<Centroid> {
        self.centroid(position).ok_or(DigestError::State {
            what: "cursor points outside of the sequence",
        })
    }

    /// Merge `weight` into the centroid at `position` and move it to `mean`.
    fn merge_into(&mut self, position: Position, mean: f64, weight: i64) -> Result<()> {
        let current = self.centroid_at(position)?;
        if !mean.is_finite() {
            return Err(DigestError::Validation {
                what: "merged mean is not finite",
            });
        }
        let merged = current.weight.checked_add(weight).ok_or(WEIGHT_OVERFLOW)?;
        let total_weight = self.total_weight.checked_add(weight).ok_or(WEIGHT_OVERFLOW)?;

        let page = self
            .data
            .get_mut(position.page)
            .ok_or(DigestError::State {
                what: "cursor points outside of the sequence",
            })?;
        let total_count = page.total_count().checked_add(weight).ok_or(WEIGHT_OVERFLOW)?;
        page.weights_mut().set(position.element, merged)?;
        page.means_mut().set(position.element, mean)?;
        page.set_total_count(total_count);

        self.total_weight = total_weight;
        Ok(())
    }
}

/// Add `value` with `weight` to `state`, delegating structural changes to `rebalancer`.
///
/// This is the insertion algorithm behind `Digest::add_weighted`. It is exposed so `Rebalance`
/// implementations can feed centroids back in while rebuilding.
pub fn add_centroid<B>(
    state: &mut DigestState,
    rng: &mut dyn RngCore,
    rebalancer: &mut B,
    value: f64,
    weight: i64,
) -> Result<()>
where
    B: Rebalance + ?Sized,
{
    if !value.is_finite() {
        return Err(DigestError::Validation {
            what: "value must be finite",
        });
    }
    if weight <= 0 {
        return Err(DigestError::Validation {
            what: "weight must be positive",
        });
    }
    // every centroid and page total is bounded by the total weight
    if state.total_weight.checked_add(weight).is_none() {
        return Err(WEIGHT_OVERFLOW);
    }

    let mut start = state.locate_floor(value);
    if start.is_none() {
        if let Some(position) = rebalancer.ceil(state, value)? {
            if Cursor::at(Direction::Forward, Some(position), &state.data).is_sentinel() {
                return Err(DigestError::State {
                    what: "ceil returned a position outside of the sequence",
                });
            }
            start = Some(position);
        }
    }

    match start {
        None => rebalancer.add_raw(state, value, weight)?,
        Some(start) => merge_or_create(state, rng, rebalancer, start, value, weight)?,
    }

    if state.needs_compression() {
        rebuild(state, rng, rebalancer)?;
    }
    Ok(())
}

fn merge_or_create<B>(
    state: &mut DigestState,
    rng: &mut dyn RngCore,
    rebalancer: &mut B,
    start: Position,
    value: f64,
    weight: i64,
) -> Result<()>
where
    B: Rebalance + ?Sized,
{
    let walk = Cursor::at(Direction::Forward, Some(start), &state.data);

    // distances only shrink until the closest centroid is passed
    let mut min_distance = f64::MAX;
    let mut last_neighbor = 0;
    let mut closest = None;
    let mut n = 0_u32;

    for (i, position) in walk.walk(&state.data).enumerate() {
        let distance = (state.centroid_at(position)?.mean - value).abs();
        if distance == 0. {
            closest = Some(position);
            n = 1;
            break;
        } else if distance <= min_distance {
            min_distance = distance;
            last_neighbor = i;
        } else {
            break;
        }
    }

    if closest.is_none() {
        let total = state.total_weight as f64;
        let mut sum = head_sum(start, &state.data);

        for position in walk.walk(&state.data).take(last_neighbor + 1) {
            let centroid = state.centroid_at(position)?;
            let distance = (centroid.mean - value).abs();
            let q = (sum as f64 + centroid.weight as f64 / 2.) / total;
            let k = 4. * total * q * (1. - q) / state.compression;

            if distance == min_distance && centroid.weight.saturating_add(weight) as f64 <= k {
                n += 1;
                if rng.random::<f64>() < 1. / f64::from(n) {
                    closest = Some(position);
                }
            }
            sum += centroid.weight;
        }
    }

    let Some(closest) = closest else {
        return rebalancer.add_raw(state, value, weight);
    };
    let centroid = state.centroid_at(closest)?;
    let merged_weight = centroid.weight.checked_add(weight).ok_or(WEIGHT_OVERFLOW)?;

    if n == 1 {
        let mean = centroid.mean + (value - centroid.mean) / merged_weight as f64;
        return state.merge_into(closest, mean, weight);
    }

    let center = centroid.mean + (value - centroid.mean) / weight as f64;
    if !center.is_finite() {
        return Err(DigestError::Validation {
            what: "merged mean is not finite",
        });
    }
    let lower = neighbor_mean(state, closest, -1)?.unwrap_or(f64::NEG_INFINITY);
    let upper = neighbor_mean(state, closest, 1)?.unwrap_or(f64::INFINITY);

    if lower <= center && center <= upper {
        return state.merge_into(closest, center, weight);
    }

    // delete and re-insert succeed together or not at all
    let snapshot = state.clone();
    let handle = rebalancer.memoized_index(state, closest);
    let result = rebalancer
        .delete(state, handle)
        .and_then(|()| rebalancer.add_raw(state, center, merged_weight));
    if result.is_err() {
        *state = snapshot;
    }
    result
}

fn neighbor_mean(state: &DigestState, position: Position, delta: isize) -> Result<Option<f64>> {
    shift(position, delta, &state.data)
        .map(|p| state.centroid_at(p).map(|c| c.mean))
        .transpose()
}

fn rebuild<B>(state: &mut DigestState, rng: &mut dyn RngCore, rebalancer: &mut B) -> Result<()>
where
    B: Rebalance + ?Sized,
{
    // re-adding centroids during a rebuild must not start another rebuild
    if state.rebuilding {
        return Ok(());
    }

    state.rebuilding = true;
    let result = rebalancer.compress(state, rng);
    state.rebuilding = false;
    result
}

/// A t-digest that stores its centroids in fixed-capacity pages.
///
/// Incoming values are either merged into the closest centroid, if that centroid is still small
/// enough for its position in the distribution, or become a new centroid. When the number of
/// centroids exceeds `20 * compression`, the digest is rebuilt.
///
/// # Examples
/// ```
/// use paged_tdigest::digest::Digest;
/// use paged_tdigest::rand::SeedableRng;
/// use rand_chacha::ChaChaRng;
///
/// let rng = ChaChaRng::from_seed([0; 32]);
/// let mut digest = Digest::new(100., rng).unwrap();
///
/// for i in 0..1000 {
///     digest.add(f64::from(i)).unwrap();
/// }
///
/// assert_eq!(digest.total_weight(), 1000);
/// let median = digest.quantile(0.5).unwrap();
/// assert!((median - 500.).abs() < 10.);
/// ```
///
/// # Applications
/// - Percentiles of latencies or sizes over a stream without keeping every observation.
/// - Approximate CDF of a data set that does not fit into memory.
///
/// # How It Works
///
/// ## Storage
/// Centroids live in pages of a fixed size. Every page is sorted by mean and the pages follow
/// each other without overlap. Each page caches the sum of its weights, which makes prefix sums
/// over whole pages cheap.
///
/// ## Insertion
/// The insertion point is located, then the neighbours with the smallest distance to the new
/// value are collected. A neighbour may absorb the value if its weight stays below
/// `4 * N * q * (1 - q) / compression`, where `q` is its estimated quantile. Ties between
/// admissible neighbours are broken by reservoir sampling, using the RNG passed at
/// construction. If no neighbour qualifies, a new centroid is created.
///
/// ## Rebuild
/// Structural changes (new centroids, deletions, rebuilds) are delegated to a `Rebalance`
/// implementation. The default, `PagedRebalancer`, rebuilds by re-adding all centroids in random
/// order.
///
/// # References
/// - ["Computing Extremely Accurate Quantiles Using t-Digests", Ted Dunning, Otmar Ertl,
///   2019](https://arxiv.org/abs/1902.04023)
pub struct Digest<R, B = PagedRebalancer>
where
    R: Rng,
    B: Rebalance,
{
    state: DigestState,
    rng: R,
    rebalancer: B,
}

impl<R> Digest<R>
where
    R: Rng,
{
    /// Create empty digest with the given `compression` and default page layout.
    pub fn new(compression: f64, rng: R) -> Result<Self> {
        Self::with_config(DigestConfig::new(compression), rng)
    }

    /// Create empty digest from `config`.
    pub fn with_config(config: DigestConfig, rng: R) -> Result<Self> {
        Self::with_rebalancer(config, rng, PagedRebalancer)
    }
}

impl<R, B> Digest<R, B>
where
    R: Rng,
    B: Rebalance,
{
    /// Create empty digest that delegates structural changes to `rebalancer`.
    pub fn with_rebalancer(config: DigestConfig, rng: R, rebalancer: B) -> Result<Self> {
        Ok(Self {
            state: DigestState::new(&config)?,
            rng,
            rebalancer,
        })
    }

    /// Observe `value` once.
    pub fn add(&mut self, value: f64) -> Result<()> {
        self.add_weighted(value, 1)
    }

    /// Observe `value` `weight` times.
    ///
    /// A failed insert leaves the digest unchanged. If the insert succeeds but the rebuild it
    /// triggers fails, the value stays recorded, the previous centroids are kept, and the rebuild
    /// error is returned.
    pub fn add_weighted(&mut self, value: f64, weight: i64) -> Result<()> {
        add_centroid(
            &mut self.state,
            &mut self.rng,
            &mut self.rebalancer,
            value,
            weight,
        )
    }

    /// Observe every value of `values` once.
    pub fn add_all<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = f64>,
    {
        values.into_iter().try_for_each(|v| self.add(v))
    }

    /// Add centroids, e.g. taken from another digest via `centroids`.
    pub fn import<I>(&mut self, centroids: I) -> Result<()>
    where
        I: IntoIterator<Item = Centroid>,
    {
        centroids
            .into_iter()
            .try_for_each(|c| self.add_weighted(c.mean, c.weight))
    }

    /// Rebuild the digest now.
    pub fn compress(&mut self) -> Result<()> {
        rebuild(&mut self.state, &mut self.rng, &mut self.rebalancer)
    }

    /// Estimate the value below which a fraction `q` of all observations lies.
    ///
    /// Returns NaN for an empty digest.
    pub fn quantile(&self, q: f64) -> Result<f64> {
        if !(0. ..=1.).contains(&q) {
            return Err(DigestError::Validation {
                what: "quantile must be in [0, 1]",
            });
        }

        let state = &self.state;
        let seq = &state.data;
        match state.centroid_count {
            0 => return Ok(f64::NAN),
            1 => return Ok(state.centroids().next().map_or(f64::NAN, |c| c.mean)),
            _ => {}
        }

        let index = q * (state.total_weight - 1) as f64;

        // skip whole pages using their cached totals
        let mut total = 0.;
        let mut first_page = 0;
        while first_page + 1 < seq.size() {
            let page_total = seq.get(first_page).map_or(0, |p| p.total_count()) as f64;
            if total + page_total >= index {
                break;
            }
            total += page_total;
            first_page += 1;
        }

        let Some(first) = shift(Position::new(first_page, 0), 0, seq) else {
            return Ok(f64::NAN);
        };
        let mut previous = match shift(first, -1, seq) {
            Some(p) => {
                let c = state.centroid_at(p)?;
                Some((total - (c.weight as f64 + 1.) / 2., c.mean))
            }
            None => None,
        };

        let mut walk = Cursor::at(Direction::Forward, Some(first), seq).walk(seq).peekable();
        while let Some(position) = walk.next() {
            let c = state.centroid_at(position)?;
            let next_index = total + (c.weight as f64 - 1.) / 2.;

            if next_index >= index {
                return Ok(match previous {
                    Some((previous_index, previous_mean)) => weighted_quantile(
                        previous_index,
                        index,
                        next_index,
                        previous_mean,
                        c.mean,
                    ),
                    None => c.mean,
                });
            } else if walk.peek().is_none() {
                return Ok(c.mean);
            }

            total += c.weight as f64;
            previous = Some((next_index, c.mean));
        }
        Ok(f64::NAN)
    }

    /// Estimate the fraction of observations below `value`.
    ///
    /// Returns NaN for an empty digest.
    pub fn cdf(&self, value: f64) -> f64 {
        let total = self.state.total_weight as f64;
        if self.state.centroid_count == 0 || total <= 0. {
            return f64::NAN;
        }

        let mut below = 0.;
        let mut left = None;
        let mut centroids = self.state.centroids().peekable();
        while let Some(c) = centroids.next() {
            let right = centroids.peek().map(|next| (next.mean - c.mean) / 2.);
            let (l, r) = match (left, right) {
                (Some(l), Some(r)) => (l, r),
                (Some(l), None) => (l, l),
                (None, Some(r)) => (r, r),
                (None, None) => (0., 0.),
            };

            if value < c.mean + r {
                let fraction = interpolate(value, c.mean - l, c.mean + r);
                return (below + c.weight as f64 * fraction) / total;
            }
            below += c.weight as f64;
            left = right;
        }
        1.
    }

    /// All centroids in ascending order of their means.
    pub fn centroids(&self) -> impl Iterator<Item = Centroid> + '_ {
        self.state.centroids()
    }

    /// Sum of all observed weights.
    pub fn total_weight(&self) -> i64 {
        self.state.total_weight
    }

    /// Number of centroids.
    pub fn centroid_count(&self) -> usize {
        self.state.centroid_count
    }

    /// Compression factor.
    pub fn compression(&self) -> f64 {
        self.state.compression
    }

    /// Checks if nothing was observed yet.
    pub fn is_empty(&self) -> bool {
        self.state.centroid_count == 0
    }

    /// Forget all observations.
    pub fn clear(&mut self) {
        self.state.clear();
    }

    /// Storage and counters.
    pub fn state(&self) -> &DigestState {
        &self.state
    }

    /// Structural collaborator.
    pub fn rebalancer(&self) -> &B {
        &self.rebalancer
    }
}

impl<R, B> fmt::Debug for Digest<R, B>
where
    R: Rng,
    B: Rebalance,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest {{ compression: {}, centroids: {}, total_weight: {} }}",
            self.state.compression, self.state.centroid_count, self.state.total_weight
        )
    }
}

fn weighted_quantile(
    previous_index: f64,
    index: f64,
    next_index: f64,
    previous_mean: f64,
    next_mean: f64,
) -> f64 {
    let delta = next_index - previous_index;
    let previous_weight = (next_index - index) / delta;
    let next_weight = (index - previous_index) / delta;
    previous_mean * previous_weight + next_mean * next_weight
}

fn interpolate(x: f64, x0: f64, x1: f64) -> f64 {
    if x1 <= x0 {
        return 0.;
    }
    ((x - x0) / (x1 - x0)).clamp(0., 1.)
}
