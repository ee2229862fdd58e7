use average::Mean;
use log::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use stitch_core::nalgebra::Point3;
use stitch_core::{FitError, ModelKind, TileModel, ViewId};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::graph::TileGraph;
use crate::SolverSettings;

/// Aggregate residual statistics over all active links, in the linear units
/// of the input points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ResidualStats {
    /// The weighted mean residual over every correspondence pair.
    pub avg: f64,
    /// The smallest per-link weighted mean residual.
    pub min: f64,
    /// The largest per-link weighted mean residual.
    pub max: f64,
}

/// A recoverable per-tile issue collected during solving.
///
/// None of these abort the run; they are returned alongside the result so a
/// single bad tile never takes down a multi-hundred-view optimization.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Diagnostic {
    /// The tile was unreachable from any anchor and keeps its starting
    /// transform.
    NotPreAligned { views: Vec<ViewId> },
    /// The tile had fewer usable correspondences than the model family
    /// requires and was permanently dropped from refinement.
    NotEnoughPoints {
        views: Vec<ViewId>,
        found: usize,
        required: usize,
    },
    /// The tile's correspondences were degenerate for the model family; the
    /// tile kept its previous transform for the affected passes.
    IllDefinedPoints { views: Vec<ViewId> },
    /// The run ended without satisfying the convergence test.
    DidNotConverge { avg: f64, max: f64 },
    /// No further link could be removed without disconnecting a tile.
    LinkRemovalExhausted,
    /// The cancellation flag was set; the result is the best effort so far.
    Cancelled,
}

/// The state threaded through one solver run (pre-align plus refinement).
#[derive(Debug, Clone, Default)]
pub(crate) struct SolverState {
    pub iterations: usize,
    pub stats: ResidualStats,
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
    /// Which nodes were reached from an anchor during pre-alignment.
    pub aligned: Vec<bool>,
}

/// Runs one full solve on the graph: breadth-first pre-alignment from the
/// anchors, then up to `max_passes` Jacobi-style refinement passes.
///
/// `seeded` marks nodes whose models are already valid and must be treated
/// as visited by pre-alignment (used by the second round of two-round
/// solving). Writes of refined models are buffered and applied at the end of
/// each pass, so every node fits against the same frozen snapshot of its
/// neighbors.
pub(crate) fn run_solver(
    graph: &mut TileGraph,
    kind: ModelKind,
    settings: &SolverSettings,
    cancel: Option<&AtomicBool>,
    seeded: Option<Vec<bool>>,
    max_passes: usize,
) -> SolverState {
    let mut state = SolverState::default();
    state.aligned = pre_align(graph, kind, &mut state.diagnostics, seeded);
    refine(graph, kind, settings, cancel, max_passes, &mut state);
    state
}

/// Propagates an initial transform estimate through the connection graph.
///
/// Starting from every fixed connected node (or an arbitrary connected node
/// as a temporary anchor when none is fixed), each newly visited node's
/// model is fit to its correspondences against all already-visited
/// neighbors. Returns the visited set.
fn pre_align(
    graph: &mut TileGraph,
    kind: ModelKind,
    diagnostics: &mut Vec<Diagnostic>,
    seeded: Option<Vec<bool>>,
) -> Vec<bool> {
    let count = graph.nodes.len();
    let mut visited = seeded.unwrap_or_else(|| vec![false; count]);
    for ix in 0..count {
        if graph.nodes[ix].fixed && graph.active_degree(ix) > 0 {
            visited[ix] = true;
        }
    }
    let mut queue: VecDeque<usize> = (0..count).filter(|&ix| visited[ix]).collect();
    if queue.is_empty() {
        if let Some(first) = (0..count).find(|&ix| graph.active_degree(ix) > 0) {
            debug!(
                "no fixed tile is connected, using {} as a temporary anchor",
                graph.nodes[first].label()
            );
            visited[first] = true;
            queue.push_back(first);
        }
    }

    while let Some(node) = queue.pop_front() {
        for link_ix in graph.nodes[node].links.clone() {
            if !graph.link_active(link_ix) {
                continue;
            }
            let next = graph.links[link_ix].other(node);
            if visited[next] {
                continue;
            }
            if !graph.nodes[next].excluded {
                let data = fit_data(graph, next, Some(&visited));
                match kind.fit(&data) {
                    Ok(model) => {
                        graph.nodes[next].model = model;
                    }
                    Err(FitError::NotEnoughPoints { found, required }) => {
                        warn!(
                            "tile {}: not enough data points ({} of {}), dropping it from refinement",
                            graph.nodes[next].label(),
                            found,
                            required
                        );
                        diagnostics.push(Diagnostic::NotEnoughPoints {
                            views: graph.nodes[next].views.clone(),
                            found,
                            required,
                        });
                        graph.nodes[next].excluded = true;
                    }
                    Err(FitError::IllDefinedPoints) => {
                        warn!(
                            "tile {}: ill-defined data points during pre-alignment, keeping its starting transform",
                            graph.nodes[next].label()
                        );
                        diagnostics.push(Diagnostic::IllDefinedPoints {
                            views: graph.nodes[next].views.clone(),
                        });
                    }
                }
            }
            visited[next] = true;
            queue.push_back(next);
        }
    }

    let mut reached = 0;
    let mut connected = 0;
    for ix in 0..count {
        if graph.active_degree(ix) == 0 {
            continue;
        }
        connected += 1;
        if visited[ix] {
            reached += 1;
        } else {
            warn!(
                "tile {} could not be pre-aligned: no path to an anchor",
                graph.nodes[ix].label()
            );
            diagnostics.push(Diagnostic::NotPreAligned {
                views: graph.nodes[ix].views.clone(),
            });
        }
    }
    info!("pre-aligned {} of {} connected tiles", reached, connected);
    visited
}

/// Refines all free nodes for up to `max_passes` block-coordinate passes.
fn refine(
    graph: &mut TileGraph,
    kind: ModelKind,
    settings: &SolverSettings,
    cancel: Option<&AtomicBool>,
    max_passes: usize,
    state: &mut SolverState,
) {
    let mut best = f64::INFINITY;
    let mut plateau = 0;
    let mut ill_reported = vec![false; graph.nodes.len()];

    for _ in 0..max_passes {
        if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
            warn!("cancellation requested, returning the best effort so far");
            state.diagnostics.push(Diagnostic::Cancelled);
            state.cancelled = true;
            break;
        }

        let free: Vec<usize> = (0..graph.nodes.len())
            .filter(|&ix| {
                let node = &graph.nodes[ix];
                !node.fixed && !node.excluded && graph.active_degree(ix) > 0
            })
            .collect();

        // Fit every free node against the same frozen snapshot; the new
        // models are applied only after the whole sweep.
        let fits: Vec<(usize, Result<TileModel, FitError>)> = {
            let frozen: &TileGraph = graph;
            #[cfg(not(feature = "rayon"))]
            {
                free.iter()
                    .map(|&ix| (ix, kind.fit(&fit_data(frozen, ix, None))))
                    .collect()
            }
            #[cfg(feature = "rayon")]
            {
                free.par_iter()
                    .map(|&ix| (ix, kind.fit(&fit_data(frozen, ix, None))))
                    .collect()
            }
        };

        for (ix, fit) in fits {
            match fit {
                Ok(model) => {
                    graph.nodes[ix].model = model;
                }
                Err(FitError::NotEnoughPoints { found, required }) => {
                    warn!(
                        "tile {}: not enough data points ({} of {}), dropping it from refinement",
                        graph.nodes[ix].label(),
                        found,
                        required
                    );
                    state.diagnostics.push(Diagnostic::NotEnoughPoints {
                        views: graph.nodes[ix].views.clone(),
                        found,
                        required,
                    });
                    graph.nodes[ix].excluded = true;
                }
                Err(FitError::IllDefinedPoints) => {
                    if !ill_reported[ix] {
                        ill_reported[ix] = true;
                        warn!(
                            "tile {}: ill-defined data points, keeping its previous transform",
                            graph.nodes[ix].label()
                        );
                        state.diagnostics.push(Diagnostic::IllDefinedPoints {
                            views: graph.nodes[ix].views.clone(),
                        });
                    }
                }
            }
        }

        state.stats = update_stats(graph);
        state.iterations += 1;
        debug!(
            "iteration {}: avg residual {:.6}, min {:.6}, max {:.6}",
            state.iterations, state.stats.avg, state.stats.min, state.stats.max
        );

        if state.stats.avg <= settings.max_allowed_error {
            debug!(
                "average residual {:.6} at or below {:.6}, stopping refinement",
                state.stats.avg, settings.max_allowed_error
            );
            break;
        }
        if state.stats.avg + f64::EPSILON < best {
            best = state.stats.avg;
            plateau = 0;
        } else {
            plateau += 1;
            if plateau >= settings.max_plateau_width {
                debug!(
                    "no improvement for {} passes, stopping refinement",
                    plateau
                );
                break;
            }
        }
    }

    if state.iterations == 0 {
        // A zero-pass run (cancelled immediately) still reports statistics.
        state.stats = update_stats(graph);
    }
}

/// Gathers the weighted fit data for one node: its own point of every active
/// correspondence, paired with the neighbor's point mapped through the
/// neighbor's current model.
fn fit_data(
    graph: &TileGraph,
    node: usize,
    visited: Option<&[bool]>,
) -> Vec<(Point3<f64>, Point3<f64>, f64)> {
    let mut data = Vec::new();
    for &link_ix in &graph.nodes[node].links {
        if !graph.link_active(link_ix) {
            continue;
        }
        let link = &graph.links[link_ix];
        let neighbor = link.other(node);
        if let Some(visited) = visited {
            if !visited[neighbor] {
                continue;
            }
        }
        let model = &graph.nodes[neighbor].model;
        for pc in &link.matches {
            let (own, theirs) = if link.a == node {
                (pc.0, pc.1)
            } else {
                (pc.1, pc.0)
            };
            data.push((own, model.apply(theirs), link.weight));
        }
    }
    data
}

/// Recomputes every active link's weighted mean residual and the aggregate
/// statistics over all correspondence pairs.
pub(crate) fn update_stats(graph: &mut TileGraph) -> ResidualStats {
    let mut total = 0.0;
    let mut pairs = 0usize;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for link_ix in 0..graph.links.len() {
        if !graph.link_active(link_ix) {
            continue;
        }
        let (a, b, weight) = {
            let link = &graph.links[link_ix];
            (link.a, link.b, link.weight)
        };
        let model_a = graph.nodes[a].model;
        let model_b = graph.nodes[b].model;
        let mean: Mean = graph.links[link_ix]
            .matches
            .iter()
            .map(|pc| weight * (model_a.apply(pc.0) - model_b.apply(pc.1)).norm())
            .collect();
        let residual = mean.mean();
        graph.links[link_ix].residual = residual;
        total += residual * graph.links[link_ix].matches.len() as f64;
        pairs += graph.links[link_ix].matches.len();
        min = min.min(residual);
        max = max.max(residual);
    }
    if pairs == 0 {
        return ResidualStats::default();
    }
    ResidualStats {
        avg: total / pairs as f64,
        min,
        max,
    }
}
