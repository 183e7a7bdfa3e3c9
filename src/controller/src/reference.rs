//! Reference classification of segments against the two placement views.
//!
//! A segment is referenced while either view maps it to at least one
//! instance. Presence in the ideal state alone blocks deletion, even when the
//! external view has already converged away from it.

use crate::cluster::PlacementView;

/// Returns true when `segment_id` must not be deleted yet.
pub fn is_referenced(segment_id: &str, ideal: &PlacementView, external: &PlacementView) -> bool {
    claims(ideal, segment_id) || claims(external, segment_id)
}

fn claims(view: &PlacementView, segment_id: &str) -> bool {
    view.instance_states(segment_id)
        .is_some_and(|instances| !instances.is_empty())
}

/// Segments split by reference status, each side keeping input order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReferencePartition {
    pub referenced: Vec<String>,
    pub candidates: Vec<String>,
}

pub fn partition<'a, I>(segment_ids: I, ideal: &PlacementView, external: &PlacementView) -> ReferencePartition
where
    I: IntoIterator<Item = &'a String>,
{
    let mut split = ReferencePartition::default();
    for segment_id in segment_ids {
        if is_referenced(segment_id, ideal, external) {
            split.referenced.push(segment_id.clone());
        } else {
            split.candidates.push(segment_id.clone());
        }
    }
    split
}
