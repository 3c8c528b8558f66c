//! Fractional sibling ordering keys.
//!
//! A sort key is a point in an integer score space, stored and exchanged as a
//! decimal string but always compared numerically (`"900"` sorts before
//! `"1000"`). Inserting between two siblings takes the midpoint of their
//! scores; inserting at either end steps `STEP` past the boundary key; the
//! first child of a parent lands on `SPACE_MID`.
//!
//! When two neighbours are ≤ 1 apart there is no integer between them and
//! [`SortKey::between`] returns `None`. The engine treats that as the signal to
//! re-space the whole sibling group with [`SortKey::spread`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::BlockId;

/// Ordering token for a block among its siblings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortKey(i64);

impl SortKey {
    /// Key given to the first child of an empty parent.
    pub const SPACE_MID: i64 = 500_000;
    /// Distance between a new end-of-list key and its neighbour.
    pub const STEP: i64 = 100_000;

    pub fn new(score: i64) -> Self {
        Self(score)
    }

    pub fn score(&self) -> i64 {
        self.0
    }

    /// Key for the first child of an empty parent.
    pub fn first() -> Self {
        Self(Self::SPACE_MID)
    }

    /// Key sorting after `last`.
    pub fn after(last: SortKey) -> Self {
        Self(last.0.saturating_add(Self::STEP))
    }

    /// Key sorting before `first`.
    pub fn before(first: SortKey) -> Self {
        Self(first.0.saturating_sub(Self::STEP))
    }

    /// Midpoint strictly between `prev` and `next`, or `None` when the gap is
    /// exhausted (or the arguments are out of order).
    pub fn between(prev: SortKey, next: SortKey) -> Option<Self> {
        let (lo, hi) = (prev.0 as i128, next.0 as i128);
        if hi - lo <= 1 {
            return None;
        }
        Some(Self((lo + (hi - lo) / 2) as i64))
    }

    /// Key for an insertion slot given optional neighbours.
    ///
    /// `None` means the slot needs a rebalance first, including when an end
    /// key would overflow the score space.
    pub fn for_slot(prev: Option<SortKey>, next: Option<SortKey>) -> Option<Self> {
        match (prev, next) {
            (None, None) => Some(Self::first()),
            (Some(p), None) => p.0.checked_add(Self::STEP).map(Self),
            (None, Some(n)) => n.0.checked_sub(Self::STEP).map(Self),
            (Some(p), Some(n)) => Self::between(p, n),
        }
    }

    /// Evenly spaced keys for `count` siblings: `STEP, 2*STEP, …`.
    pub fn spread(count: usize) -> Vec<SortKey> {
        (1..=count as i64).map(|i| Self(i * Self::STEP)).collect()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing a sort key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sort key '{0}' is not a decimal integer")]
pub struct SortKeyError(pub String);

impl FromStr for SortKey {
    type Err = SortKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| SortKeyError(s.to_string()))
    }
}

impl Serialize for SortKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SortKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Order siblings by numeric key, breaking ties on block id.
pub fn sibling_order(a: (SortKey, BlockId), b: (SortKey, BlockId)) -> std::cmp::Ordering {
    a.0.cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_child_is_space_mid() {
        assert_eq!(SortKey::for_slot(None, None), Some(SortKey::new(500_000)));
    }

    #[test]
    fn test_ends_step_by_100k() {
        let k = SortKey::new(500_000);
        assert_eq!(SortKey::for_slot(Some(k), None), Some(SortKey::new(600_000)));
        assert_eq!(SortKey::for_slot(None, Some(k)), Some(SortKey::new(400_000)));
    }

    #[test]
    fn test_midpoint() {
        let mid = SortKey::between(SortKey::new(400_000), SortKey::new(500_000)).unwrap();
        assert_eq!(mid.score(), 450_000);
        let neg = SortKey::between(SortKey::new(-7), SortKey::new(3)).unwrap();
        assert_eq!(neg.score(), -2);
    }

    #[test]
    fn test_exhausted_gap_needs_rebalance() {
        assert_eq!(SortKey::between(SortKey::new(10), SortKey::new(11)), None);
        assert_eq!(SortKey::between(SortKey::new(10), SortKey::new(10)), None);
        assert_eq!(SortKey::between(SortKey::new(11), SortKey::new(10)), None);
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        let a: SortKey = "900".parse().unwrap();
        let b: SortKey = "1000".parse().unwrap();
        assert!(a < b);
        assert!("900" > "1000");
    }

    #[test]
    fn test_repeated_bisection_eventually_exhausts() {
        let lo = SortKey::new(500_000);
        let mut hi = SortKey::new(600_000);
        let mut steps = 0;
        while let Some(mid) = SortKey::between(lo, hi) {
            hi = mid;
            steps += 1;
        }
        assert!(steps >= 16 && steps <= 17, "took {steps} bisections");
    }

    #[test]
    fn test_end_slot_overflow_needs_rebalance() {
        assert_eq!(SortKey::for_slot(Some(SortKey::new(i64::MAX - 5)), None), None);
        assert_eq!(SortKey::for_slot(None, Some(SortKey::new(i64::MIN + 5))), None);
    }

    #[test]
    fn test_spread() {
        let keys = SortKey::spread(3);
        assert_eq!(
            keys,
            vec![SortKey::new(100_000), SortKey::new(200_000), SortKey::new(300_000)]
        );
    }

    #[test]
    fn test_serde_as_decimal_string() {
        let k = SortKey::new(-42);
        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, "\"-42\"");
        let back: SortKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, k);
        assert!(serde_json::from_str::<SortKey>("\"1.5\"").is_err());
    }

    #[test]
    fn test_tie_break_on_block_id() {
        let a = BlockId::new();
        let b = BlockId::new();
        let k = SortKey::new(5);
        assert_eq!(sibling_order((k, a), (k, b)), a.cmp(&b));
    }
}
