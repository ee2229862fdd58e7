use itertools::Itertools;
use log::*;
use std::collections::BTreeSet;
use stitch_core::{ViewGroup, ViewId};

/// Merges a possibly-overlapping collection of view groups into a disjoint
/// partition.
///
/// Any two groups sharing at least one view are unioned transitively. Empty
/// groups are dropped, and a group supplied twice collapses into one cell
/// with a warning. The resulting partition is unique for a given input.
pub(crate) fn merge_groups(groups: &[ViewGroup]) -> Vec<ViewGroup> {
    let mut seen: Vec<&ViewGroup> = Vec::new();
    let mut merged: Vec<BTreeSet<ViewId>> = Vec::new();
    for group in groups {
        if group.is_empty() {
            continue;
        }
        if seen.contains(&group) {
            warn!(
                "group {{{}}} was supplied twice, treating the duplicates as one",
                group.iter().format(", ")
            );
            continue;
        }
        seen.push(group);

        // Union this group with every existing cell it overlaps. Because
        // every previous overlap was already unioned, a single sweep keeps
        // the cells disjoint and reaches the transitive fixed point.
        let (overlapping, disjoint): (Vec<_>, Vec<_>) = merged
            .into_iter()
            .partition(|cell| !cell.is_disjoint(group));
        let mut cell: BTreeSet<ViewId> = group.0.clone();
        for other in overlapping {
            cell.extend(other);
        }
        merged = disjoint;
        merged.push(cell);
    }
    if merged.len() != groups.len() {
        debug!("merged {} groups into {}", groups.len(), merged.len());
    }
    merged.into_iter().map(ViewGroup).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(setup: u32) -> ViewId {
        ViewId::new(0, setup)
    }

    #[test]
    fn overlapping_groups_merge_transitively() {
        let groups = vec![
            ViewGroup::new([view(0), view(1)]),
            ViewGroup::new([view(1), view(2)]),
        ];
        let merged = merge_groups(&groups);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], ViewGroup::new([view(0), view(1), view(2)]));
    }

    #[test]
    fn chained_overlaps_reach_a_fixed_point() {
        // The middle group bridges two cells that are otherwise disjoint.
        let groups = vec![
            ViewGroup::new([view(0), view(1)]),
            ViewGroup::new([view(3), view(4)]),
            ViewGroup::new([view(1), view(3)]),
        ];
        let merged = merge_groups(&groups);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].len(), 4);
    }

    #[test]
    fn disjoint_groups_stay_separate() {
        let groups = vec![
            ViewGroup::new([view(0), view(1)]),
            ViewGroup::new([view(2), view(3)]),
        ];
        let merged = merge_groups(&groups);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn output_is_a_partition() {
        let groups = vec![
            ViewGroup::new([view(0), view(1)]),
            ViewGroup::new([view(2), view(3)]),
            ViewGroup::new([view(1), view(2)]),
            ViewGroup::new([view(5), view(6)]),
            ViewGroup::new([]),
        ];
        let merged = merge_groups(&groups);
        let mut all: Vec<ViewId> = merged.iter().flat_map(|g| g.iter().copied()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "a view appeared in two output groups");
        assert!(merged.iter().all(|g| !g.is_empty()));
    }

    #[test]
    fn duplicate_groups_collapse() {
        let groups = vec![
            ViewGroup::new([view(0), view(1)]),
            ViewGroup::new([view(0), view(1)]),
        ];
        let merged = merge_groups(&groups);
        assert_eq!(merged.len(), 1);
    }
}
