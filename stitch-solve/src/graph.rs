use itertools::Itertools;
use log::*;
use std::collections::{BTreeSet, HashMap};
use stitch_core::{ModelKind, PointCorrespondence, TileModel, ViewGroup, ViewId};

use crate::{AlignmentError, ViewPairMatches};

/// One optimization unit: a free view or a merged group of views sharing a
/// single transform.
#[derive(Debug, Clone)]
pub(crate) struct TileNode {
    /// The node's own transform instance; never shared with another node.
    pub model: TileModel,
    /// The views resolved by this node, sorted.
    pub views: Vec<ViewId>,
    /// Whether the transform is held constant as an anchor.
    pub fixed: bool,
    /// Whether the node was permanently dropped from refinement because it
    /// ran out of usable correspondences.
    pub excluded: bool,
    /// Indices of every link touching this node, removed ones included.
    pub links: Vec<usize>,
}

impl TileNode {
    /// A short label naming the node by its views, for log lines.
    pub fn label(&self) -> String {
        self.views.iter().format("+").to_string()
    }
}

/// A weighted bundle of point correspondences between two nodes.
///
/// Correspondences are stored in the orientation of the node pair: the first
/// point of every pair belongs to node `a`, the second to node `b`.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub a: usize,
    pub b: usize,
    /// The original view pair the matches came from, for reporting.
    pub views: (ViewId, ViewId),
    /// The index of the pair-matches entry this link was built from.
    pub pair: usize,
    pub matches: Vec<PointCorrespondence>,
    pub weight: f64,
    /// The weighted mean residual from the latest refinement pass.
    pub residual: f64,
    pub removed: bool,
}

impl Link {
    pub fn other(&self, node: usize) -> usize {
        if self.a == node {
            self.b
        } else {
            self.a
        }
    }
}

/// The graph of tile nodes wired together by correspondence links.
///
/// Nodes live in an arena and are addressed by index; every view maps to
/// exactly one node through `view_to_node`. The graph is built fresh for one
/// optimization run and discarded afterwards.
#[derive(Debug, Clone)]
pub(crate) struct TileGraph {
    pub nodes: Vec<TileNode>,
    pub links: Vec<Link>,
    pub view_to_node: HashMap<ViewId, usize>,
}

impl TileGraph {
    /// Whether a link still participates in solving. Links to a node that
    /// was dropped for lack of data are treated as if they never existed.
    pub fn link_active(&self, link: usize) -> bool {
        let l = &self.links[link];
        !l.removed && !self.nodes[l.a].excluded && !self.nodes[l.b].excluded
    }

    pub fn active_degree(&self, node: usize) -> usize {
        self.nodes[node]
            .links
            .iter()
            .filter(|&&l| self.link_active(l))
            .count()
    }

    /// Whether the node entered the solve graph at all (at least one link,
    /// or fixed so it can anchor others).
    pub fn in_solve_graph(&self, node: usize) -> bool {
        !self.nodes[node].links.is_empty() || self.nodes[node].fixed
    }

    /// Resets every non-fixed, still-refinable node to its starting model.
    pub fn reset_free_models(&mut self, kind: ModelKind, seeds: &HashMap<ViewId, TileModel>) {
        for node in &mut self.nodes {
            if node.fixed || node.excluded {
                continue;
            }
            node.model = seeded_model(kind, &node.views, seeds);
        }
    }
}

fn seeded_model(
    kind: ModelKind,
    views: &[ViewId],
    seeds: &HashMap<ViewId, TileModel>,
) -> TileModel {
    views
        .iter()
        .find_map(|view| seeds.get(view))
        .copied()
        .unwrap_or_else(|| kind.identity())
}

/// Builds the tile graph: one node per merged group, one node per remaining
/// view, and one link per non-empty pair-matches entry whose endpoints map
/// to distinct nodes.
pub(crate) fn build_graph(
    kind: ModelKind,
    views: &BTreeSet<ViewId>,
    groups: &[ViewGroup],
    fixed: &BTreeSet<ViewId>,
    seeds: &HashMap<ViewId, TileModel>,
    pairs: &[(usize, &ViewPairMatches)],
    weights: &[f64],
) -> Result<TileGraph, AlignmentError> {
    let mut nodes: Vec<TileNode> = Vec::new();
    let mut view_to_node: HashMap<ViewId, usize> = HashMap::new();

    for group in groups {
        let ix = nodes.len();
        let members: Vec<ViewId> = group.iter().copied().collect();
        for &view in &members {
            if view_to_node.insert(view, ix).is_some() {
                return Err(AlignmentError::GroupOverlap { view });
            }
        }
        nodes.push(TileNode {
            model: seeded_model(kind, &members, seeds),
            fixed: members.iter().any(|v| fixed.contains(v)),
            views: members,
            excluded: false,
            links: Vec::new(),
        });
    }
    for &view in views {
        if view_to_node.contains_key(&view) {
            continue;
        }
        let ix = nodes.len();
        view_to_node.insert(view, ix);
        nodes.push(TileNode {
            model: seeded_model(kind, &[view], seeds),
            views: vec![view],
            fixed: fixed.contains(&view),
            excluded: false,
            links: Vec::new(),
        });
    }

    let mut links: Vec<Link> = Vec::new();
    for (&(pair_ix, pair), &weight) in pairs.iter().zip(weights) {
        if pair.matches.is_empty() {
            // A link without correspondences is inert.
            continue;
        }
        let a = view_to_node[&pair.a];
        let b = view_to_node[&pair.b];
        if a == b {
            debug!(
                "dropping matches between {} and {}: both resolve to the same tile",
                pair.a, pair.b
            );
            continue;
        }
        let ix = links.len();
        nodes[a].links.push(ix);
        nodes[b].links.push(ix);
        links.push(Link {
            a,
            b,
            views: (pair.a, pair.b),
            pair: pair_ix,
            matches: pair.matches.clone(),
            weight,
            residual: 0.0,
            removed: false,
        });
    }

    if links.is_empty() {
        return Err(AlignmentError::NothingToOptimize);
    }
    debug!(
        "graph: {} tiles ({} fixed), {} links",
        nodes.len(),
        nodes.iter().filter(|n| n.fixed).count(),
        links.len()
    );
    Ok(TileGraph {
        nodes,
        links,
        view_to_node,
    })
}
