use std::collections::HashMap;
use stitch_core::{ViewGroup, ViewId};

use crate::ViewPairMatches;

/// Computes one weight per pair-matches entry, compensating for uneven
/// correspondence density between individually-tracked views and grouped
/// views.
///
/// Within a group, the member with the most correspondences would otherwise
/// dominate the shared node's fit relative to single-view nodes. Every view
/// gets a scale of `max_ratio / ratio` over its group (1.0 when ungrouped or
/// when the group has no correspondences at all), and each link is weighted
/// by the larger scale of its two endpoint views.
pub(crate) fn assign_link_weights(
    pairs: &[(usize, &ViewPairMatches)],
    groups: &[ViewGroup],
) -> Vec<f64> {
    let mut own: HashMap<ViewId, usize> = HashMap::new();
    for (_, pair) in pairs {
        *own.entry(pair.a).or_default() += pair.matches.len();
        *own.entry(pair.b).or_default() += pair.matches.len();
    }

    let group_of: HashMap<ViewId, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(ix, group)| group.iter().map(move |&view| (view, ix)))
        .collect();
    let group_counts: Vec<usize> = groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|view| own.get(view).copied().unwrap_or(0))
                .sum()
        })
        .collect();

    let ratio = |view: ViewId| -> f64 {
        match group_of.get(&view) {
            Some(&g) if group_counts[g] > 0 => {
                own.get(&view).copied().unwrap_or(0) as f64 / group_counts[g] as f64
            }
            _ => 1.0,
        }
    };
    let max_ratios: Vec<f64> = groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|&view| ratio(view))
                .fold(0.0, f64::max)
        })
        .collect();
    let scale = |view: ViewId| -> f64 {
        match group_of.get(&view) {
            Some(&g) => {
                let r = ratio(view);
                if r > 0.0 {
                    max_ratios[g] / r
                } else {
                    1.0
                }
            }
            None => 1.0,
        }
    };

    pairs
        .iter()
        .map(|(_, pair)| f64::max(scale(pair.a), scale(pair.b)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_core::PointCorrespondence;
    use stitch_core::nalgebra::Point3;

    fn view(setup: u32) -> ViewId {
        ViewId::new(0, setup)
    }

    fn pair(a: u32, b: u32, n: usize) -> ViewPairMatches {
        let matches = (0..n)
            .map(|i| {
                let p = Point3::new(i as f64, 0.0, 0.0);
                PointCorrespondence(p, p)
            })
            .collect();
        ViewPairMatches::new(view(a), view(b), matches)
    }

    #[test]
    fn grouped_views_are_rebalanced() {
        // V1 and V2 form one group; V1 carries 30 correspondences, V2 only
        // 10, so the V2 link gets upweighted by 3 to even out influence.
        let pairs = vec![pair(0, 1, 30), pair(0, 2, 10)];
        let refs: Vec<(usize, &ViewPairMatches)> = pairs.iter().enumerate().collect();
        let groups = vec![ViewGroup::new([view(1), view(2)])];
        let weights = assign_link_weights(&refs, &groups);
        assert_eq!(weights, vec![1.0, 3.0]);
    }

    #[test]
    fn ungrouped_views_keep_unit_weight() {
        let pairs = vec![pair(0, 1, 30), pair(1, 2, 5)];
        let refs: Vec<(usize, &ViewPairMatches)> = pairs.iter().enumerate().collect();
        let weights = assign_link_weights(&refs, &[]);
        assert_eq!(weights, vec![1.0, 1.0]);
    }

    #[test]
    fn empty_group_counts_are_guarded() {
        // A group whose views have no correspondences at all must fall back
        // to unit weights instead of dividing by zero.
        let pairs = vec![pair(0, 1, 10)];
        let refs: Vec<(usize, &ViewPairMatches)> = pairs.iter().enumerate().collect();
        let groups = vec![ViewGroup::new([view(7), view(8)])];
        let weights = assign_link_weights(&refs, &groups);
        assert_eq!(weights, vec![1.0]);
    }
}
