//! Version vector: per-node counters with a four-valued causal comparison

use crate::error::ParseError;
use std::collections::BTreeMap;
use std::fmt;

/// Causal relationship between two version vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Causality {
    /// No counter differs
    Equal,
    /// Every difference favors the left-hand vector
    Greater,
    /// Every difference favors the right-hand vector
    Lesser,
    /// Differences favor both sides; the versions are siblings
    Diverged,
}

impl Causality {
    /// The relation seen from the other vector's side
    pub fn reverse(self) -> Self {
        match self {
            Causality::Greater => Causality::Lesser,
            Causality::Lesser => Causality::Greater,
            other => other,
        }
    }

    /// True when the two versions were written concurrently
    pub fn is_diverged(self) -> bool {
        self == Causality::Diverged
    }

    /// True when the left-hand side already contains every event of the right
    pub fn dominates(self) -> bool {
        matches!(self, Causality::Equal | Causality::Greater)
    }
}

impl fmt::Display for Causality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Causality::Equal => "equal",
            Causality::Greater => "greater",
            Causality::Lesser => "lesser",
            Causality::Diverged => "diverged",
        };
        f.write_str(label)
    }
}

/// A version vector owned by one node
///
/// Counters are kept in a `BTreeMap` so the text encoding is always sorted by
/// node identifier. A node that has never been referenced reads as zero.
#[derive(Debug, Clone)]
pub struct VersionVector {
    owner: String,
    counters: BTreeMap<String, u64>,
}

impl VersionVector {
    /// Create an empty vector owned by `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            counters: BTreeMap::new(),
        }
    }

    /// Decode a `node:counter;node:counter` string into a vector owned by `owner`
    ///
    /// Empty input yields an empty vector; empty segments (`a:1;;b:2`) are skipped.
    pub fn parse(owner: impl Into<String>, encoded: &str) -> Result<Self, ParseError> {
        let mut vector = Self::new(owner);
        for pair in encoded.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (node, value) = pair
                .split_once(':')
                .ok_or_else(|| ParseError::MissingSeparator {
                    pair: pair.to_string(),
                })?;
            if node.is_empty() {
                return Err(ParseError::EmptyNode {
                    pair: pair.to_string(),
                });
            }
            let counter = value
                .parse::<u64>()
                .map_err(|source| ParseError::InvalidCounter {
                    node: node.to_string(),
                    value: value.to_string(),
                    source,
                })?;
            vector.counters.insert(node.to_string(), counter);
        }
        Ok(vector)
    }

    /// Node that owns this vector
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Current counter for `node` (zero when never referenced)
    pub fn counter(&self, node: &str) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    /// Nodes with a recorded counter, in ascending order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.counters.keys().map(String::as_str)
    }

    /// True when no node has a non-zero counter
    pub fn is_empty(&self) -> bool {
        self.counters.values().all(|c| *c == 0)
    }

    /// Record a local write: bump the owner's counter by one.
    ///
    /// A counter already at `u64::MAX` stays there.
    pub fn increment(&mut self) {
        let counter = self.counters.entry(self.owner.clone()).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// Compare against `other` over the union of both node sets
    pub fn compare(&self, other: &VersionVector) -> Causality {
        let mut ahead = false;
        let mut behind = false;

        for node in self.counters.keys().chain(other.counters.keys()) {
            let mine = self.counter(node);
            let theirs = other.counter(node);
            if mine > theirs {
                ahead = true;
            } else if mine < theirs {
                behind = true;
            }
            if ahead && behind {
                return Causality::Diverged;
            }
        }

        match (ahead, behind) {
            (false, false) => Causality::Equal,
            (true, false) => Causality::Greater,
            (false, true) => Causality::Lesser,
            (true, true) => Causality::Diverged,
        }
    }

    /// Absorb `other`: pointwise maximum, then one local increment
    ///
    /// The trailing increment makes the merge its own event, so the merged
    /// vector compares `Greater` than both inputs.
    pub fn merge(&mut self, other: &VersionVector) {
        self.absorb(other);
        self.increment();
    }

    /// Pointwise maximum with `other`, without recording a local event
    pub fn absorb(&mut self, other: &VersionVector) {
        for (node, theirs) in &other.counters {
            let mine = self.counters.entry(node.clone()).or_insert(0);
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
    }

    /// Return a merged copy without touching `self`
    pub fn merged(&self, other: &VersionVector) -> VersionVector {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Re-own this vector, e.g. when a node adopts a fetched version
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

/// Sorted `node:counter;node:counter` encoding; zero counters are omitted so
/// that vectors comparing `Equal` always encode to the same bytes.
impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (node, counter) in self.counters.iter().filter(|(_, c)| **c > 0) {
            if !first {
                f.write_str(";")?;
            }
            write!(f, "{}:{}", node, counter)?;
            first = false;
        }
        Ok(())
    }
}

impl PartialEq for VersionVector {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Causality::Equal
    }
}

impl Eq for VersionVector {}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(encoded: &str) -> VersionVector {
        VersionVector::parse("nodeid", encoded).unwrap()
    }

    #[test]
    fn test_increment_saturates_at_max() {
        let mut vector = VersionVector::parse("me", "me:18446744073709551615;other:2").unwrap();
        let before = vector.clone();
        vector.increment();

        assert_eq!(vector.counter("me"), u64::MAX);
        assert_eq!(vector.counter("other"), 2);
        assert_eq!(vector.compare(&before), Causality::Equal);
    }

    #[test]
    fn test_single_node_equal() {
        assert_eq!(vv("a:1").compare(&vv("a:1")), Causality::Equal);
    }

    #[test]
    fn test_single_node_lesser() {
        assert_eq!(vv("a:1").compare(&vv("a:2")), Causality::Lesser);
    }

    #[test]
    fn test_order_of_pairs_is_irrelevant() {
        assert_eq!(vv("a:1;b:2").compare(&vv("b:2;a:1")), Causality::Equal);
    }

    #[test]
    fn test_disjoint_nodes_diverge() {
        assert_eq!(vv("a:1").compare(&vv("b:2")), Causality::Diverged);
    }

    #[test]
    fn test_greater_by_counter() {
        assert_eq!(vv("a:2;b:2").compare(&vv("b:2;a:1")), Causality::Greater);
    }

    #[test]
    fn test_greater_by_additional_node() {
        assert_eq!(
            vv("a:1;b:2;c:1").compare(&vv("b:2;a:1")),
            Causality::Greater
        );
    }

    #[test]
    fn test_increment_missing_owner() {
        let mut v = vv("a:1;b:2");
        v.increment();
        assert_eq!(v.to_string(), "a:1;b:2;nodeid:1");
        assert_eq!(v.counter("nodeid"), 1);
    }

    #[test]
    fn test_increment_existing_owner() {
        let mut v = vv("nodeid:1;b:1");
        v.increment();
        assert_eq!(v.to_string(), "b:1;nodeid:2");
        assert_eq!(v.counter("nodeid"), 2);
    }

    #[test]
    fn test_increment_only_touches_owner() {
        let mut v = vv("a:4;b:7");
        v.increment();
        assert_eq!(v.counter("a"), 4);
        assert_eq!(v.counter("b"), 7);
    }

    #[test]
    fn test_merge_includes_all_nodes_and_increments_owner() {
        let mut v1 = vv("a:2;b:3");
        let v2 = vv("b:3;c:2");
        v1.merge(&v2);
        assert_eq!(v1.to_string(), "a:2;b:3;c:2;nodeid:1");
    }

    #[test]
    fn test_merge_takes_pointwise_max() {
        let mut v1 = vv("a:5;b:1");
        v1.merge(&vv("a:2;b:9"));
        assert_eq!(v1.counter("a"), 5);
        assert_eq!(v1.counter("b"), 9);
    }

    #[test]
    fn test_zero_counters_do_not_affect_equality() {
        let v1 = vv("a:1;b:0");
        let v2 = vv("a:1");
        assert_eq!(v1.compare(&v2), Causality::Equal);
        assert_eq!(v1.to_string(), v2.to_string());
    }

    #[test]
    fn test_parse_empty_string() {
        let v = vv("");
        assert!(v.is_empty());
        assert_eq!(v.to_string(), "");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            VersionVector::parse("n", "a1"),
            Err(ParseError::MissingSeparator { .. })
        ));
        assert!(matches!(
            VersionVector::parse("n", ":1"),
            Err(ParseError::EmptyNode { .. })
        ));
        assert!(matches!(
            VersionVector::parse("n", "a:x"),
            Err(ParseError::InvalidCounter { .. })
        ));
    }

    #[test]
    fn test_causality_display() {
        assert_eq!(Causality::Diverged.to_string(), "diverged");
        assert_eq!(Causality::Greater.reverse(), Causality::Lesser);
        assert_eq!(Causality::Equal.reverse(), Causality::Equal);
    }

    #[test]
    fn test_absorb_does_not_increment() {
        let mut v1 = VersionVector::parse("n", "a:1;b:4").unwrap();
        let v2 = VersionVector::parse("m", "a:3").unwrap();
        v1.absorb(&v2);
        assert_eq!(v1.to_string(), "a:3;b:4");
        assert_eq!(v1.counter("n"), 0);
    }
}
