//! Half-open position ranges `[lower, upper)` and the algebra the merge engine
//! needs: overlap, adjacency, containment, subtraction and joining.

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// A half-open range of positions: `lower` inclusive, `upper` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange<P> {
    pub lower: P,
    pub upper: P,
}

impl<P: Position> PositionRange<P> {
    pub fn new(lower: P, upper: P) -> Self {
        Self { lower, upper }
    }

    /// Zero-width (or inverted) ranges hold nothing.
    pub fn is_empty(&self) -> bool {
        self.lower >= self.upper
    }

    pub fn contains(&self, position: &P) -> bool {
        &self.lower <= position && position < &self.upper
    }

    /// Returns `true` if the two ranges share at least one position.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.lower < other.upper && other.lower < self.upper
    }

    /// Returns `true` if the ranges overlap or one ends exactly where the other starts.
    pub fn touches(&self, other: &Self) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }

    /// Returns `true` if `self` is a superset of `other`.
    pub fn covers(&self, other: &Self) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    /// The parts of `self` not covered by `other`, newest first.
    ///
    /// Yields zero, one or two non-empty pieces.
    pub fn subtract(&self, other: &Self) -> Vec<Self> {
        if !self.overlaps(other) {
            return vec![self.clone()];
        }

        let above = Self::new(other.upper.clone(), self.upper.clone());
        let below = Self::new(self.lower.clone(), other.lower.clone());
        [above, below].into_iter().filter(|r| !r.is_empty()).collect()
    }

    /// The smallest range covering `self` and every range in `others`.
    pub fn join<'a>(&self, others: impl IntoIterator<Item = &'a Self>) -> Self
    where
        P: 'a,
    {
        others.into_iter().fold(self.clone(), |acc, r| Self {
            lower: acc.lower.min(r.lower.clone()),
            upper: acc.upper.max(r.upper.clone()),
        })
    }

    /// Gaps of `self` left uncovered by `holes`, newest first.
    ///
    /// `holes` must be pairwise disjoint and lie inside `self`.
    pub fn gaps_around(&self, holes: &[Self]) -> Vec<Self> {
        let mut sorted: Vec<&Self> = holes.iter().collect();
        sorted.sort_by(|a, b| b.upper.cmp(&a.upper));

        let mut gaps = Vec::with_capacity(sorted.len() + 1);
        let mut cursor = self.upper.clone();
        for hole in sorted {
            let gap = Self::new(hole.upper.clone(), cursor);
            if !gap.is_empty() {
                gaps.push(gap);
            }
            cursor = hole.lower.clone();
        }
        let last = Self::new(self.lower.clone(), cursor);
        if !last.is_empty() {
            gaps.push(last);
        }
        gaps
    }
}
