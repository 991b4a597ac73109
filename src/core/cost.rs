//! Per-tier cost vectors and cost-ranked sorting.
//!
//! A [`CostVector`] holds one value per priority tier. It is used both for
//! account balances (available quota, possibly negative) and for the cost a
//! run has accumulated. Vectors of different lengths behave as if the shorter
//! one were padded with zeros.

use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::util::types::Priority;

/// Ordered per-tier quantities, most significant tier first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostVector(Vec<f64>);

impl CostVector {
    /// All-zero vector with `tiers` slots.
    #[must_use]
    pub fn zero(tiers: usize) -> Self {
        Self(vec![0.0; tiers])
    }

    /// Vector with the given components.
    #[must_use]
    pub const fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Value at `tier`, zero past the end.
    #[must_use]
    pub fn get(&self, tier: Priority) -> f64 {
        self.0.get(tier).copied().unwrap_or(0.0)
    }

    /// Add `amount` to a single tier, growing the vector if needed.
    pub fn add_at(&mut self, tier: Priority, amount: f64) {
        self.ensure_len(tier + 1);
        self.0[tier] += amount;
    }

    /// Overwrite a single tier, growing the vector if needed.
    pub fn set(&mut self, tier: Priority, value: f64) {
        self.ensure_len(tier + 1);
        self.0[tier] = value;
    }

    /// Number of stored slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no slots are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Components as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Sum of all components.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// True when no component is NaN or infinite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Most privileged tier below `tiers` whose component is strictly positive.
    ///
    /// This is the admission rule: a balance funds the first tier it can pay
    /// for, and only that tier's own component is inspected.
    #[must_use]
    pub fn best_priority(&self, tiers: usize) -> Option<Priority> {
        (0..tiers).find(|&p| self.get(p) > 0.0)
    }

    /// Lexicographic comparison from tier 0, zero-padded, IEEE total order.
    #[must_use]
    pub fn cost_cmp(&self, other: &Self) -> Ordering {
        let len = self.len().max(other.len());
        for tier in 0..len {
            match self.get(tier).total_cmp(&other.get(tier)) {
                Ordering::Equal => {}
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }

    /// True if `self` is strictly cheaper than `other`.
    #[must_use]
    pub fn less(&self, other: &Self) -> bool {
        self.cost_cmp(other) == Ordering::Less
    }

    fn ensure_len(&mut self, len: usize) {
        if self.0.len() < len {
            self.0.resize(len, 0.0);
        }
    }
}

impl From<Vec<f64>> for CostVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl From<&[f64]> for CostVector {
    fn from(values: &[f64]) -> Self {
        Self(values.to_vec())
    }
}

impl AddAssign<&CostVector> for CostVector {
    fn add_assign(&mut self, rhs: &CostVector) {
        self.ensure_len(rhs.len());
        for (slot, v) in self.0.iter_mut().zip(rhs.0.iter()) {
            *slot += v;
        }
    }
}

impl SubAssign<&CostVector> for CostVector {
    fn sub_assign(&mut self, rhs: &CostVector) {
        self.ensure_len(rhs.len());
        for (slot, v) in self.0.iter_mut().zip(rhs.0.iter()) {
            *slot -= v;
        }
    }
}

impl Add for &CostVector {
    type Output = CostVector;

    fn add(self, rhs: &CostVector) -> CostVector {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub for &CostVector {
    type Output = CostVector;

    fn sub(self, rhs: &CostVector) -> CostVector {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

/// Stable sort, cheapest first. Equal-cost items keep their relative order.
pub fn sort_ascending_cost<T, F>(items: &mut [T], cost: F)
where
    F: Fn(&T) -> &CostVector,
{
    items.sort_by(|a, b| cost(a).cost_cmp(cost(b)));
}

/// Stable sort, most expensive first. Equal-cost items keep their relative order.
pub fn sort_descending_cost<T, F>(items: &mut [T], cost: F)
where
    F: Fn(&T) -> &CostVector,
{
    items.sort_by(|a, b| cost(b).cost_cmp(cost(a)));
}
