//! Riaktive Core Readiness: provision a bucket before letting operations through
//!
//! # Overview
//!
//! A bucket that relies on full-text search needs its schema uploaded, its
//! search index created and its properties set before reads and writes make
//! sense. A [`ReadinessController`] performs those steps in order and holds
//! back every operation submitted in the meantime:
//!
//! ```text
//!   checkingSchema ──► checkingIndex ──► creating ──► ready
//!     (schema file)     (index + grace)   (property diff)   (drain queue)
//! ```
//!
//! States, events and transitions live in a static table ([`state`]); the
//! controller itself is a single Tokio task that owns the deferred queue, so
//! queued operations leave it exactly once and in submission order.
//!
//! Schema and index creation go through [`SchemaCache`] and [`IndexCache`],
//! which are shared between all controllers of a client and never upload the
//! same name twice.

pub mod cache;
pub mod controller;
pub mod error;
pub mod plan;
pub mod state;

pub use cache::{IndexCache, Provisioner, SchemaCache, DEFAULT_INDEX_GRACE};
pub use controller::{Dispatch, ProvisionCaches, ReadinessController, Status};
pub use error::{ProvisionError, Result, Step};
pub use plan::{diff, Properties, ReadinessPlan};
pub use state::{ReadinessEvent, ReadinessState};
