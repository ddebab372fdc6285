/*!
 * Sibling reconciliation using embedded version vectors
 *
 * When a key comes back with several live values, each sibling's `_vector`
 * field tells which writes it has seen. A sibling whose vector dominates every
 * other one already contains all of their history and wins outright.
 * Otherwise the writes were concurrent: the vectors are merged and the caller
 * decides how to merge the bodies.
 */

use crate::document::Document;
use crate::error::Result;
use riaktive_core_causality::VersionVector;
use tracing::debug;

/// Outcome of [`reconcile`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// One sibling supersedes all the others
    Winner(Document),
    /// Concurrent siblings; `vector` is their merge, owned by the local node
    Conflict {
        vector: VersionVector,
        siblings: Vec<Document>,
    },
}

/// Pick a dominating sibling or merge their vectors.
///
/// A sibling without an embedded vector counts as having seen nothing.
pub fn reconcile(siblings: Vec<Document>, owner: &str) -> Result<Resolution> {
    let vectors = siblings
        .iter()
        .map(|doc| Ok(doc.vector(owner)?.unwrap_or_else(|| VersionVector::new(owner))))
        .collect::<Result<Vec<_>>>()?;

    let winner = vectors.iter().position(|candidate| {
        vectors
            .iter()
            .all(|other| candidate.compare(other).dominates())
    });

    if let Some(index) = winner {
        debug!(siblings = siblings.len(), winner = index, "Sibling dominates");
        let mut siblings = siblings;
        return Ok(Resolution::Winner(siblings.swap_remove(index)));
    }

    let mut vector = VersionVector::new(owner);
    for other in &vectors {
        vector.absorb(other);
    }
    vector.increment();
    debug!(siblings = siblings.len(), merged = %vector, "Siblings diverged");

    Ok(Resolution::Conflict { vector, siblings })
}
