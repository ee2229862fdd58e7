use float_ord::FloatOrd;
use log::*;

use crate::graph::TileGraph;
use crate::solver::ResidualStats;
use crate::{RemovedLink, SolverSettings};

/// Decides from aggregate residual statistics whether the current solution
/// is acceptable.
///
/// The solution is converged unless the maximum residual spikes too far
/// above the average (and above the noise floor), or the average itself
/// exceeds the absolute threshold. Pure function; it is re-evaluated after
/// every refinement run.
pub(crate) fn is_converged(stats: &ResidualStats, settings: &SolverSettings) -> bool {
    !((stats.avg * settings.relative_threshold < stats.max
        && stats.max > settings.min_max_error_floor)
        || stats.avg > settings.absolute_threshold)
}

/// Removes the worst-fitting link that can be spared.
///
/// A link can only be spared if both of its tiles keep at least one other
/// active connection, so removal never isolates a tile from the graph.
/// Returns the removed link's pair index and report, or `None` when no
/// removable link remains and the caller must settle for the current
/// solution.
pub(crate) fn remove_worst_link(graph: &mut TileGraph) -> Option<(usize, RemovedLink)> {
    let worst = (0..graph.links.len())
        .filter(|&ix| graph.link_active(ix))
        .filter(|&ix| {
            let link = &graph.links[ix];
            graph.active_degree(link.a) > 1 && graph.active_degree(link.b) > 1
        })
        .max_by_key(|&ix| FloatOrd(graph.links[ix].residual))?;
    let link = &mut graph.links[worst];
    link.removed = true;
    info!(
        "removed worst link {} -> {} with residual {:.6}",
        link.views.0, link.views.1, link.residual
    );
    Some((
        link.pair,
        RemovedLink {
            views: link.views,
            residual: link.residual,
        },
    ))
}
