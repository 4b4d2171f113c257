//! Row ranges and row sets
//!
//! Bounds use `std::ops::Bound` so that open, closed and unbounded ends are
//! explicit. Rows are raw byte strings; the empty row is the smallest row.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use bytes::Bytes;

/// Compare two lower bounds by the first row they admit
pub fn cmp_lower(a: &Bound<Bytes>, b: &Bound<Bytes>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

/// Compare two upper bounds by the last row they admit
pub fn cmp_upper(a: &Bound<Bytes>, b: &Bound<Bytes>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => {
            x.cmp(y)
        }
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

fn lower_admits(lower: &Bound<Bytes>, row: &[u8]) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(x) => row >= x.as_ref(),
        Bound::Excluded(x) => row > x.as_ref(),
    }
}

fn upper_admits(upper: &Bound<Bytes>, row: &[u8]) -> bool {
    match upper {
        Bound::Unbounded => true,
        Bound::Included(x) => row <= x.as_ref(),
        Bound::Excluded(x) => row < x.as_ref(),
    }
}

/// Immediate successor of a row in byte order
fn row_successor(row: &[u8]) -> Bytes {
    let mut next = row.to_vec();
    next.push(0);
    Bytes::from(next)
}

/// Bound that starts right where `upper` stops
fn flip_upper(upper: &Bound<Bytes>) -> Option<Bound<Bytes>> {
    match upper {
        Bound::Unbounded => None,
        Bound::Included(x) => Some(Bound::Excluded(x.clone())),
        Bound::Excluded(x) => Some(Bound::Included(x.clone())),
    }
}

/// Bound that stops right where `lower` starts
fn flip_lower(lower: &Bound<Bytes>) -> Option<Bound<Bytes>> {
    match lower {
        Bound::Unbounded => None,
        Bound::Included(x) => Some(Bound::Excluded(x.clone())),
        Bound::Excluded(x) => Some(Bound::Included(x.clone())),
    }
}

// =============================================================================
// RowProbe
// =============================================================================

/// Search point for ordered tablet lookup
///
/// Tablets are sorted by upper bound. A probe is either a concrete row (find
/// the tablet whose upper bound admits it) or an explicit upper bound (find
/// the tablet ending exactly there).
#[derive(Debug, Clone, Copy)]
pub enum RowProbe<'a> {
    Row(&'a [u8]),
    Upper(&'a Bound<Bytes>),
}

impl RowProbe<'_> {
    /// Ordering of `upper` relative to this probe
    ///
    /// A row probe never compares equal, so `binary_search_by` yields the
    /// index of the first upper bound admitting the row.
    pub fn cmp_upper(&self, upper: &Bound<Bytes>) -> Ordering {
        match self {
            RowProbe::Row(row) => {
                if upper_admits(upper, row) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            RowProbe::Upper(bound) => cmp_upper(upper, bound),
        }
    }
}

// =============================================================================
// RowRange
// =============================================================================

/// A contiguous span of rows with explicit bound semantics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowRange {
    pub lower: Bound<Bytes>,
    pub upper: Bound<Bytes>,
}

impl RowRange {
    pub fn new(lower: Bound<Bytes>, upper: Bound<Bytes>) -> Self {
        Self { lower, upper }
    }

    /// Every possible row
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// `[start, end)`
    pub fn half_open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Excluded(end.into()))
    }

    /// `[start, +inf)`
    pub fn from_row(start: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Unbounded)
    }

    /// `(-inf, end)`
    pub fn before_row(end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Unbounded, Bound::Excluded(end.into()))
    }

    /// Exactly one row
    pub fn single(row: impl Into<Bytes>) -> Self {
        let row = row.into();
        Self::new(Bound::Included(row.clone()), Bound::Included(row))
    }

    pub fn contains(&self, row: &[u8]) -> bool {
        lower_admits(&self.lower, row) && upper_admits(&self.upper, row)
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (_, Bound::Unbounded) => false,
            (Bound::Unbounded, Bound::Included(_)) => false,
            (Bound::Unbounded, Bound::Excluded(hi)) => hi.is_empty(),
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi)) => lo >= hi,
            (Bound::Excluded(lo), Bound::Included(hi)) => lo >= hi,
            // (lo, lo\0) holds no row
            (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi || *hi == row_successor(lo),
        }
    }

    /// Lowest row admitted by this range (empty ranges included)
    pub fn first_row(&self) -> Bytes {
        match &self.lower {
            Bound::Unbounded => Bytes::new(),
            Bound::Included(x) => x.clone(),
            Bound::Excluded(x) => row_successor(x),
        }
    }

    pub fn intersect(&self, other: &RowRange) -> RowRange {
        let lower = match cmp_lower(&self.lower, &other.lower) {
            Ordering::Less => other.lower.clone(),
            _ => self.lower.clone(),
        };
        let upper = match cmp_upper(&self.upper, &other.upper) {
            Ordering::Greater => other.upper.clone(),
            _ => self.upper.clone(),
        };
        RowRange { lower, upper }
    }

    pub fn overlaps(&self, other: &RowRange) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Pieces of `self` left after removing `other` (zero, one or two)
    pub fn subtract(&self, other: &RowRange) -> Vec<RowRange> {
        if !self.overlaps(other) {
            return vec![self.clone()];
        }

        let mut pieces = Vec::with_capacity(2);
        if let Some(upper) = flip_lower(&other.lower) {
            let left = RowRange::new(self.lower.clone(), upper).intersect(self);
            if !left.is_empty() {
                pieces.push(left);
            }
        }
        if let Some(lower) = flip_upper(&other.upper) {
            let right = RowRange::new(lower, self.upper.clone()).intersect(self);
            if !right.is_empty() {
                pieces.push(right);
            }
        }
        pieces
    }

    /// Whether `next` starts exactly where this range stops
    pub fn is_followed_by(&self, next: &RowRange) -> bool {
        flip_upper(&self.upper).as_ref() == Some(&next.lower)
    }

    /// Smallest range covering both (only meaningful when they touch)
    fn hull(&self, other: &RowRange) -> RowRange {
        let lower = match cmp_lower(&self.lower, &other.lower) {
            Ordering::Greater => other.lower.clone(),
            _ => self.lower.clone(),
        };
        let upper = match cmp_upper(&self.upper, &other.upper) {
            Ordering::Less => other.upper.clone(),
            _ => self.upper.clone(),
        };
        RowRange { lower, upper }
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Bound::Unbounded => write!(f, "(-inf")?,
            Bound::Included(x) => write!(f, "[{:?}", String::from_utf8_lossy(x))?,
            Bound::Excluded(x) => write!(f, "({:?}", String::from_utf8_lossy(x))?,
        }
        match &self.upper {
            Bound::Unbounded => write!(f, ", +inf)"),
            Bound::Included(x) => write!(f, ", {:?}]", String::from_utf8_lossy(x)),
            Bound::Excluded(x) => write!(f, ", {:?})", String::from_utf8_lossy(x)),
        }
    }
}

// =============================================================================
// RowSet
// =============================================================================

/// An ordered set of disjoint row ranges
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSet {
    ranges: Vec<RowRange>,
}

impl RowSet {
    /// The set of all rows
    pub fn all() -> Self {
        Self {
            ranges: vec![RowRange::all()],
        }
    }

    /// The empty set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from arbitrary ranges; overlapping ranges are coalesced
    pub fn new(ranges: impl IntoIterator<Item = RowRange>) -> Self {
        let mut ranges: Vec<RowRange> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        ranges.sort_by(|a, b| cmp_lower(&a.lower, &b.lower));

        let mut merged: Vec<RowRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.overlaps(&range) => *last = last.hull(&range),
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, row: &[u8]) -> bool {
        let idx = self
            .ranges
            .partition_point(|r| RowProbe::Row(row).cmp_upper(&r.upper) == Ordering::Less);
        self.ranges.get(idx).is_some_and(|r| r.contains(row))
    }

    pub fn overlaps(&self, range: &RowRange) -> bool {
        self.ranges.iter().any(|r| r.overlaps(range))
    }

    /// Lowest row in the set, or None if empty
    pub fn first_row(&self) -> Option<Bytes> {
        self.ranges.first().map(RowRange::first_row)
    }

    /// Rows of this set that are also in `range`
    pub fn intersect_range(&self, range: &RowRange) -> RowSet {
        RowSet {
            ranges: self
                .ranges
                .iter()
                .map(|r| r.intersect(range))
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    /// Rows in both sets
    pub fn intersect(&self, other: &RowSet) -> RowSet {
        RowSet::new(
            other
                .ranges
                .iter()
                .flat_map(|r| self.intersect_range(r).ranges),
        )
    }

    /// Rows in either set
    pub fn union(&self, other: &RowSet) -> RowSet {
        RowSet::new(self.ranges.iter().chain(other.ranges.iter()).cloned())
    }

    /// Rows of this set that are not in `range`
    pub fn subtract(&self, range: &RowRange) -> RowSet {
        RowSet {
            ranges: self.ranges.iter().flat_map(|r| r.subtract(range)).collect(),
        }
    }
}

impl From<RowRange> for RowSet {
    fn from(range: RowRange) -> Self {
        RowSet::new([range])
    }
}

impl fmt::Display for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", range)?;
        }
        write!(f, "}}")
    }
}
