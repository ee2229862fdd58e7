use log::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use stitch_core::{ModelKind, PointCorrespondence, TileModel, ViewGroup, ViewId};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::convergence::{is_converged, remove_worst_link};
use crate::graph::TileGraph;
use crate::groups::merge_groups;
use crate::solver::{run_solver, Diagnostic, ResidualStats, SolverState};
use crate::weights::assign_link_weights;
use crate::{graph::build_graph, AlignmentError, SolverSettings};

/// The inlier correspondences one pairwise comparison produced between two
/// views.
///
/// The `correlation` records how trustworthy the comparison was (for
/// example the cross-correlation of the pairwise registration). Two-round
/// solving treats pairs at or above [`SolverSettings::min_correlation`] as
/// strong links and everything below as weak, metadata-grade links.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ViewPairMatches {
    pub a: ViewId,
    pub b: ViewId,
    /// The matched points: one in `a`'s local coordinates, one in `b`'s.
    pub matches: Vec<PointCorrespondence>,
    pub correlation: f64,
}

impl ViewPairMatches {
    pub fn new(a: ViewId, b: ViewId, matches: Vec<PointCorrespondence>) -> Self {
        Self {
            a,
            b,
            matches,
            correlation: 1.0,
        }
    }

    /// Sets the trustworthiness of this pair.
    pub fn correlation(self, correlation: f64) -> Self {
        Self {
            correlation,
            ..self
        }
    }
}

/// A link dropped by the iterative controller, for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RemovedLink {
    pub views: (ViewId, ViewId),
    pub residual: f64,
}

/// The outcome of one global alignment run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct AlignmentResult {
    /// The resolved transform of every view whose tile entered the solve
    /// graph. Views of one group all map to the same model.
    pub models: HashMap<ViewId, TileModel>,
    /// Views whose tile had no connection at all; their transforms were
    /// never touched.
    pub excluded: Vec<ViewId>,
    /// Aggregate residuals after the final refinement pass.
    pub stats: ResidualStats,
    /// The number of tiles that took part in the optimization.
    pub optimized_nodes: usize,
    /// The number of refinement passes of the final solve.
    pub iterations: usize,
    /// Whether the convergence test accepted the final solution.
    pub converged: bool,
    /// Links dropped by the link-removal strategy, in removal order.
    pub removed_links: Vec<RemovedLink>,
    /// The weighted mean residual of every surviving link.
    pub link_residuals: Vec<(ViewId, ViewId, f64)>,
    /// Recoverable per-tile issues encountered along the way.
    pub diagnostics: Vec<Diagnostic>,
}

/// One global alignment run: the views, groups, fixed anchors, and pairwise
/// correspondences to align, plus the solver configuration.
///
/// The problem is assembled once, then solved with [`solve_iterative`] (all
/// links, dropping the worst one until the solution converges) or
/// [`solve_two_round`] (strong links first, weak links only to rescue tiles
/// without an anchor path). Solving never mutates the problem; each solve
/// builds and discards its own tile graph.
///
/// [`solve_iterative`]: AlignmentProblem::solve_iterative
/// [`solve_two_round`]: AlignmentProblem::solve_two_round
pub struct AlignmentProblem {
    kind: ModelKind,
    settings: SolverSettings,
    views: BTreeSet<ViewId>,
    groups: Vec<ViewGroup>,
    fixed: BTreeSet<ViewId>,
    seeds: HashMap<ViewId, TileModel>,
    matches: Vec<ViewPairMatches>,
    cancel: Option<Arc<AtomicBool>>,
}

impl AlignmentProblem {
    /// Creates an empty problem solving for models of the given family.
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            settings: SolverSettings::default(),
            views: BTreeSet::new(),
            groups: Vec::new(),
            fixed: BTreeSet::new(),
            seeds: HashMap::new(),
            matches: Vec::new(),
            cancel: None,
        }
    }

    /// Set the solver settings.
    pub fn settings(self, settings: SolverSettings) -> Self {
        Self { settings, ..self }
    }

    /// Set a cooperative cancellation flag, checked once per refinement
    /// pass.
    pub fn cancel_flag(self, cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel: Some(cancel),
            ..self
        }
    }

    /// Registers a view, even if no correspondences mention it.
    pub fn add_view(&mut self, view: ViewId) {
        self.views.insert(view);
    }

    pub fn add_views(&mut self, views: impl IntoIterator<Item = ViewId>) {
        self.views.extend(views);
    }

    /// Adds a group of views that must share one transform.
    pub fn add_group(&mut self, group: ViewGroup) {
        self.views.extend(group.iter().copied());
        self.groups.push(group);
    }

    /// Holds a view's transform constant as an anchor.
    pub fn fix_view(&mut self, view: ViewId) {
        self.views.insert(view);
        self.fixed.insert(view);
    }

    /// Seeds a view's starting transform (identity otherwise). For fixed
    /// views this is the value that is held; for free views it is only the
    /// starting point and pre-alignment will overwrite it.
    pub fn seed_view(&mut self, view: ViewId, model: TileModel) {
        self.views.insert(view);
        self.seeds.insert(view, model);
    }

    /// Adds the correspondences of one pairwise comparison.
    pub fn add_pair_matches(&mut self, pair: ViewPairMatches) {
        self.views.insert(pair.a);
        self.views.insert(pair.b);
        self.matches.push(pair);
    }

    /// Solves using every link: solve, test convergence, drop the worst
    /// removable link, and repeat until the test passes or no link can be
    /// spared.
    pub fn solve_iterative(&self) -> Result<AlignmentResult, AlignmentError> {
        let all: Vec<usize> = (0..self.matches.len()).collect();
        let mut graph = self.build(&all)?;
        let round = self.solve_with_removal(&mut graph);
        Ok(self.finish(&graph, round.state, round.removed, round.converged))
    }

    /// Solves in two rounds: the iterative controller on strong links only,
    /// then one more solve with weak links added for tiles that still have
    /// no path to an anchor.
    ///
    /// The second round performs a single bounded refinement pass on the
    /// augmented graph rather than the full removal loop.
    pub fn solve_two_round(&self) -> Result<AlignmentResult, AlignmentError> {
        let (strong, weak): (Vec<usize>, Vec<usize>) = (0..self.matches.len())
            .partition(|&ix| self.matches[ix].correlation >= self.settings.min_correlation);

        let mut aligned_models: HashMap<ViewId, TileModel> = HashMap::new();
        let mut first: Option<(TileGraph, Round)> = None;
        if strong.is_empty() {
            warn!(
                "no links at or above correlation {}, skipping the strong round",
                self.settings.min_correlation
            );
        } else {
            let mut graph = self.build(&strong)?;
            let round = self.solve_with_removal(&mut graph);
            if round.state.cancelled {
                return Ok(self.finish(&graph, round.state, round.removed, false));
            }
            for (ix, node) in graph.nodes.iter().enumerate() {
                if round.state.aligned[ix] && !node.excluded {
                    for &view in &node.views {
                        aligned_models.insert(view, node.model);
                    }
                }
            }
            first = Some((graph, round));
        }

        // A fixed view is an anchor by definition, aligned or not.
        let mut anchored: BTreeSet<ViewId> = aligned_models.keys().copied().collect();
        anchored.extend(self.fixed.iter().copied());
        for view in self.views.difference(&anchored) {
            warn!(
                "view {} has no path to an anchor after the strong round",
                view
            );
        }

        let rescued: Vec<usize> = weak
            .iter()
            .copied()
            .filter(|&ix| {
                let pair = &self.matches[ix];
                !anchored.contains(&pair.a) || !anchored.contains(&pair.b)
            })
            .collect();

        if rescued.is_empty() {
            return match first {
                Some((graph, round)) => {
                    Ok(self.finish(&graph, round.state, round.removed, round.converged))
                }
                None => Err(AlignmentError::NothingToOptimize),
            };
        }
        info!(
            "round two: adding {} weak links for tiles without an anchor path",
            rescued.len()
        );

        let (removed, removed_pairs, mut carried) = match first {
            Some((_, round)) => (round.removed, round.removed_pairs, round.state.diagnostics),
            None => (Vec::new(), BTreeSet::new(), Vec::new()),
        };
        let augmented: Vec<usize> = strong
            .iter()
            .copied()
            .filter(|ix| !removed_pairs.contains(ix))
            .chain(rescued)
            .collect();

        let mut graph = self.build(&augmented)?;
        let mut seeded = vec![false; graph.nodes.len()];
        for (ix, node) in graph.nodes.iter_mut().enumerate() {
            if let Some(model) = node.views.iter().find_map(|view| aligned_models.get(view)) {
                node.model = *model;
                seeded[ix] = true;
            }
        }
        let mut state = run_solver(
            &mut graph,
            self.kind,
            &self.settings,
            self.cancel.as_deref(),
            Some(seeded),
            1,
        );
        carried.append(&mut state.diagnostics);
        state.diagnostics = carried;
        let converged = is_converged(&state.stats, &self.settings);
        if !converged {
            state.diagnostics.push(Diagnostic::DidNotConverge {
                avg: state.stats.avg,
                max: state.stats.max,
            });
        }
        Ok(self.finish(&graph, state, removed, converged))
    }

    /// Builds the tile graph over the selected pair-matches entries.
    fn build(&self, subset: &[usize]) -> Result<TileGraph, AlignmentError> {
        let merged = merge_groups(&self.groups);
        let selected: Vec<(usize, &ViewPairMatches)> = subset
            .iter()
            .map(|&ix| (ix, &self.matches[ix]))
            .collect();
        let weights = assign_link_weights(&selected, &merged);
        build_graph(
            self.kind,
            &self.views,
            &merged,
            &self.fixed,
            &self.seeds,
            &selected,
            &weights,
        )
    }

    /// The solve / convergence-test / drop-worst-link loop. Every round
    /// re-runs pre-alignment and refinement on the reduced graph, so the
    /// loop runs at most once per link.
    fn solve_with_removal(&self, graph: &mut TileGraph) -> Round {
        let mut removed = Vec::new();
        let mut removed_pairs = BTreeSet::new();
        loop {
            graph.reset_free_models(self.kind, &self.seeds);
            let mut state = run_solver(
                graph,
                self.kind,
                &self.settings,
                self.cancel.as_deref(),
                None,
                self.settings.max_iterations,
            );
            if state.cancelled {
                return Round {
                    state,
                    removed,
                    removed_pairs,
                    converged: false,
                };
            }
            if is_converged(&state.stats, &self.settings) {
                info!(
                    "converged after removing {} links: avg residual {:.6} (min {:.6}, max {:.6})",
                    removed.len(),
                    state.stats.avg,
                    state.stats.min,
                    state.stats.max
                );
                return Round {
                    state,
                    removed,
                    removed_pairs,
                    converged: true,
                };
            }
            match remove_worst_link(graph) {
                Some((pair, link)) => {
                    removed_pairs.insert(pair);
                    removed.push(link);
                }
                None => {
                    warn!(
                        "cannot remove any further link, accepting a non-converged solution (avg {:.6}, max {:.6})",
                        state.stats.avg, state.stats.max
                    );
                    state.diagnostics.push(Diagnostic::LinkRemovalExhausted);
                    state.diagnostics.push(Diagnostic::DidNotConverge {
                        avg: state.stats.avg,
                        max: state.stats.max,
                    });
                    return Round {
                        state,
                        removed,
                        removed_pairs,
                        converged: false,
                    };
                }
            }
        }
    }

    /// Extracts the per-view transforms and diagnostics from the solved
    /// graph.
    fn finish(
        &self,
        graph: &TileGraph,
        state: SolverState,
        removed: Vec<RemovedLink>,
        converged: bool,
    ) -> AlignmentResult {
        let mut models = HashMap::new();
        let mut excluded = Vec::new();
        let mut optimized_nodes = 0;
        for (ix, node) in graph.nodes.iter().enumerate() {
            if !graph.in_solve_graph(ix) {
                excluded.extend(node.views.iter().copied());
                continue;
            }
            if !node.links.is_empty() {
                optimized_nodes += 1;
            }
            debug!(
                "final model for tile {}: {:?}",
                node.label(),
                node.model
            );
            for &view in &node.views {
                models.insert(view, node.model);
            }
        }
        let link_residuals = (0..graph.links.len())
            .filter(|&ix| graph.link_active(ix))
            .map(|ix| {
                let link = &graph.links[ix];
                (link.views.0, link.views.1, link.residual)
            })
            .collect();
        AlignmentResult {
            models,
            excluded,
            stats: state.stats,
            optimized_nodes,
            iterations: state.iterations,
            converged,
            removed_links: removed,
            link_residuals,
            diagnostics: state.diagnostics,
        }
    }
}

/// The artifacts of one run of the removal loop.
struct Round {
    state: SolverState,
    removed: Vec<RemovedLink>,
    removed_pairs: BTreeSet<usize>,
    converged: bool,
}
