//! Navigation over the flattened centroid sequence.
//!
//! A `Position` addresses one centroid as `(page, element)`. A `Cursor` walks positions in one
//! direction and hides page boundaries. Walking past either end of the sequence yields the
//! sentinel, represented as `None`.
use crate::page::Page;
use crate::sequence::PagedSequence;

/// Coordinate of one centroid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    /// Index of the page in the sequence.
    pub page: usize,

    /// Index of the centroid inside its page.
    pub element: usize,
}

impl Position {
    /// Create new position.
    pub fn new(page: usize, element: usize) -> Self {
        Self { page, element }
    }
}

/// Walking direction of a `Cursor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Towards larger means.
    Forward,

    /// Towards smaller means.
    Backward,
}

/// Bidirectional cursor over a `PagedSequence`.
///
/// The first call to `advance` after construction returns the starting position itself, every
/// following call moves by one centroid:
///
/// ```
/// use paged_tdigest::cursor::{Cursor, Direction, Position};
/// use paged_tdigest::page::Page;
/// use paged_tdigest::sequence::PagedSequence;
///
/// let mut seq = PagedSequence::with_max_size(2);
/// for means in [[1.0, 2.0], [3.0, 4.0]] {
///     let mut page = Page::with_capacity(4);
///     for m in means {
///         page.add(m, 1).unwrap();
///     }
///     seq.push(page).unwrap();
/// }
///
/// let mut cursor = Cursor::build(Direction::Forward, 0, 1, &seq);
/// assert_eq!(cursor.advance(&seq), Some(Position::new(0, 1)));
/// assert_eq!(cursor.advance(&seq), Some(Position::new(1, 0)));
/// assert_eq!(cursor.advance(&seq), Some(Position::new(1, 1)));
/// assert_eq!(cursor.advance(&seq), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    position: Option<Position>,
    direction: Direction,
    fresh: bool,
}

impl Cursor {
    /// Normalize a raw, possibly out-of-range coordinate into a cursor.
    ///
    /// Forward cursors become the sentinel unless `(page, element)` addresses a centroid. Backward
    /// cursors with a negative `element` roll over to the last centroid of the previous non-empty
    /// page first, so `(page, -1)` means "right before page `page`".
    pub fn build(direction: Direction, page: isize, element: isize, seq: &PagedSequence) -> Self {
        let (mut page, mut element) = (page, element);

        if direction == Direction::Backward {
            while page >= 0 && element < 0 {
                page -= 1;
                match usize::try_from(page).ok().and_then(|p| seq.get(p)) {
                    Some(p) => element = p.active() as isize - 1,
                    None => break,
                }
            }
        }

        let position = match (usize::try_from(page), usize::try_from(element)) {
            (Ok(page), Ok(element)) => Some(Position::new(page, element)),
            _ => None,
        };
        Self::at(direction, position, seq)
    }

    /// Cursor starting at `position`, or the sentinel if `position` does not address a centroid.
    pub fn at(direction: Direction, position: Option<Position>, seq: &PagedSequence) -> Self {
        Self {
            position: position.filter(|p| is_valid(*p, seq)),
            direction,
            fresh: true,
        }
    }

    /// Cursor that is already exhausted.
    pub fn sentinel(direction: Direction) -> Self {
        Self {
            position: None,
            direction,
            fresh: true,
        }
    }

    /// Current position, `None` for the sentinel.
    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Checks if the cursor points to no centroid.
    pub fn is_sentinel(&self) -> bool {
        self.position.is_none()
    }

    /// Walking direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Checks if `advance` has not been called yet.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Step to the next position in walking direction and return it.
    ///
    /// A fresh cursor returns its starting position without moving. Empty pages are skipped. Once
    /// the sentinel is reached, the cursor stays there.
    pub fn advance(&mut self, seq: &PagedSequence) -> Option<Position> {
        let current = self.position?;
        if self.fresh {
            self.fresh = false;
            return Some(current);
        }

        self.position = match self.direction {
            Direction::Forward => next_forward(current, seq),
            Direction::Backward => next_backward(current, seq),
        };
        self.position
    }

    /// Iterator over all remaining positions of this cursor.
    pub fn walk(self, seq: &PagedSequence) -> Walk<'_> {
        Walk { cursor: self, seq }
    }
}

/// Iterator returned by `Cursor::walk`.
#[derive(Clone, Copy, Debug)]
pub struct Walk<'a> {
    cursor: Cursor,
    seq: &'a PagedSequence,
}

impl Iterator for Walk<'_> {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        self.cursor.advance(self.seq)
    }
}

/// Move `position` by `delta` centroids, crossing page boundaries as needed.
///
/// Returns `None` if the target lies outside of the sequence.
pub fn shift(position: Position, delta: isize, seq: &PagedSequence) -> Option<Position> {
    let mut page = position.page;
    let mut element = position.element as isize + delta;

    while let Some(p) = seq.get(page) {
        let active = p.active() as isize;
        if element < active {
            break;
        }
        element -= active;
        page += 1;
    }

    while page > 0 && element < 0 {
        page -= 1;
        element += seq.get(page).map_or(0, Page::active) as isize;
    }

    let element = usize::try_from(element).ok()?;
    Some(Position::new(page, element)).filter(|p| is_valid(*p, seq))
}

/// Total weight of all centroids strictly before `position`.
///
/// Whole pages contribute their cached `total_count`, the page of `position` contributes the
/// individual weights in front of `position.element`.
pub fn head_sum(position: Position, seq: &PagedSequence) -> i64 {
    let whole: i64 = seq
        .iter()
        .take(position.page)
        .map(Page::total_count)
        .sum();

    let partial: i64 = seq.get(position.page).map_or(0, |p| {
        let weights = p.weights().as_slice();
        weights[..position.element.min(weights.len())].iter().sum()
    });

    whole + partial
}

fn is_valid(position: Position, seq: &PagedSequence) -> bool {
    seq.get(position.page)
        .is_some_and(|p| position.element < p.active())
}

fn next_forward(current: Position, seq: &PagedSequence) -> Option<Position> {
    let active = seq.get(current.page).map_or(0, Page::active);
    if current.element + 1 < active {
        return Some(Position::new(current.page, current.element + 1));
    }

    (current.page + 1..seq.size())
        .find(|&i| seq.get(i).is_some_and(|p| !p.is_empty()))
        .map(|i| Position::new(i, 0))
}

fn next_backward(current: Position, seq: &PagedSequence) -> Option<Position> {
    if current.element > 0 {
        return Some(Position::new(current.page, current.element - 1));
    }

    (0..current.page).rev().find_map(|i| {
        let active = seq.get(i).map_or(0, Page::active);
        (active > 0).then(|| Position::new(i, active - 1))
    })
}
