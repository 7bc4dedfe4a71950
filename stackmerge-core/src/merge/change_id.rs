//! Three-way reconciliation of node change ids.
//!
//! | parent vs last merge | instance        | merged node takes |
//! |----------------------|-----------------|-------------------|
//! | equal                | any             | instance id       |
//! | different            | equals last     | parent id         |
//! | different            | changed too     | nothing forced    |
//! | absent from both     | any             | instance id       |

use std::collections::BTreeMap;

use tracing::trace;

use crate::emitter::Emitter;
use crate::ids::{ChangeId, NodeId};

/// Node change ids of an emitter's graph.
pub type ChangeIdTable = BTreeMap<NodeId, ChangeId>;

/// Change ids of every node of an emitter.
pub fn gather_change_ids(emitter: &Emitter) -> ChangeIdTable {
    emitter.graph.change_ids()
}

/// Decides which change id each node of the instance should carry after a
/// merge. Nodes with no entry keep whatever id the merge gave them.
pub fn diff_change_ids(
    parent: &ChangeIdTable,
    last_merged_parent: Option<&ChangeIdTable>,
    instance: &ChangeIdTable,
) -> ChangeIdTable {
    let empty = ChangeIdTable::new();
    let last = last_merged_parent.unwrap_or(&empty);
    instance
        .iter()
        .filter_map(|(&node, &instance_id)| {
            let forced = match (parent.get(&node), last.get(&node)) {
                (None, None) => Some(instance_id),
                (Some(p), Some(l)) if p == l => Some(instance_id),
                (Some(p), Some(l)) if instance_id == *l => Some(*p),
                (Some(_), Some(_)) => None,
                // Only known to the snapshot: upstream removed the node
                // and the instance still has it.
                (None, Some(_)) => Some(instance_id),
                // Not in the snapshot: nothing says who changed it last.
                (Some(_), None) => None,
            };
            forced.map(|id| (node, id))
        })
        .collect()
}

/// Overwrites the change ids of the nodes of `merged` present in `forced`.
/// Returns the number of updated nodes.
pub fn resolve_change_ids(merged: &mut Emitter, forced: &ChangeIdTable) -> usize {
    let mut updated = 0;
    for (&node, &change_id) in forced {
        if merged.graph.force_change_id(node, change_id) {
            trace!(%node, %change_id, "forced change id");
            updated += 1;
        }
    }
    updated
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    const NODE: NodeId = NodeId::from_u128(1);
    const P: ChangeId = ChangeId::from_u128(10);
    const L: ChangeId = ChangeId::from_u128(11);
    const I: ChangeId = ChangeId::from_u128(12);

    fn table(id: Option<ChangeId>) -> ChangeIdTable {
        id.into_iter().map(|id| (NODE, id)).collect()
    }

    #[rstest]
    #[case::upstream_unchanged(Some(P), Some(P), I, Some(I))]
    #[case::upstream_changed_cleanly(Some(P), Some(L), L, Some(P))]
    #[case::both_changed(Some(P), Some(L), I, None)]
    #[case::local_addition(None, None, I, Some(I))]
    #[case::removed_upstream(None, Some(L), I, Some(I))]
    #[case::no_snapshot_entry(Some(P), None, I, None)]
    fn forced_ids(
        #[case] parent: Option<ChangeId>,
        #[case] last: Option<ChangeId>,
        #[case] instance: ChangeId,
        #[case] expected: Option<ChangeId>,
    ) {
        let forced = diff_change_ids(&table(parent), Some(&table(last)), &table(Some(instance)));
        assert_eq!(forced.get(&NODE).copied(), expected);
    }

    #[test]
    fn first_merge_uses_no_snapshot() {
        let forced = diff_change_ids(&table(Some(P)), None, &table(Some(I)));
        assert!(forced.is_empty());
        let forced = diff_change_ids(&table(None), None, &table(Some(I)));
        assert_eq!(forced[&NODE], I);
    }
}
