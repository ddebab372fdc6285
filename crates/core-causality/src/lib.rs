//! Riaktive Core Causality: version vectors for document versions
//!
//! # Overview
//!
//! A [`VersionVector`] keeps one counter per node that has written a document.
//! Comparing two vectors tells whether one version happened after the other,
//! whether they are the same version, or whether they were written
//! concurrently (siblings) and need to be reconciled.
//!
//! ```text
//!   a:2;b:1   vs  a:1;b:1   => Greater   (left happened after right)
//!   a:1       vs  a:1       => Equal
//!   a:1       vs  b:2       => Diverged  (siblings, merge required)
//! ```
//!
//! Merging two diverged vectors produces a vector that is causally after both,
//! so the reconciled document always wins against either sibling.
//!
//! # Example
//!
//! ```
//! use riaktive_core_causality::{Causality, VersionVector};
//!
//! let mut left = VersionVector::parse("node-a", "a:2;b:3").unwrap();
//! let right = VersionVector::parse("node-b", "b:3;c:2").unwrap();
//!
//! assert_eq!(left.compare(&right), Causality::Diverged);
//!
//! left.merge(&right);
//! assert_eq!(left.to_string(), "a:2;b:3;c:2;node-a:1");
//! assert_eq!(left.compare(&right), Causality::Greater);
//! ```

pub mod error;
pub mod vector;

pub use error::ParseError;
pub use vector::{Causality, VersionVector};
