//! # Stitch Solve
//!
//! This library aligns many 3d views of one physical specimen into a single
//! consistent global coordinate frame. An external pairwise matching stage
//! compares views and produces robust point correspondences; this crate
//! consumes those correspondences and solves for one transform per view (or
//! per group of views that must share a transform), anchored by one or more
//! fixed views.
//!
//! The solve is a graph-structured, iterative optimization. Views and merged
//! view groups become tile nodes, pairwise correspondences become weighted
//! links, and the solver first propagates an initial estimate breadth-first
//! from the anchors, then repeatedly refits every free tile against its
//! neighbors until the residuals settle. When the solution does not pass the
//! convergence test, the iterative controller drops the single
//! worst-fitting link and solves again; two-round solving additionally
//! separates trustworthy links from metadata-grade ones and only falls back
//! to the latter for tiles that would otherwise stay disconnected.
//!
//! Per-tile numerical trouble (too few or degenerate correspondences) never
//! aborts a run; it is reported in the result's [`Diagnostic`] list while
//! the rest of the graph keeps solving. Only structural problems — an empty
//! graph, or overlapping groups surviving the merge — fail the run as a
//! whole, in which case no transform is modified.
//!
//! ```
//! use stitch_core::nalgebra::Point3;
//! use stitch_core::{ModelKind, PointCorrespondence, ViewId};
//! use stitch_solve::{AlignmentProblem, ViewPairMatches};
//!
//! let a = ViewId::new(0, 0);
//! let b = ViewId::new(0, 1);
//! // Ten correspondences all agreeing that b sits 5 units right of a.
//! let matches = (0..10)
//!     .map(|i| {
//!         let p = Point3::new(i as f64, (i % 3) as f64, (i % 4) as f64);
//!         PointCorrespondence(p, Point3::new(p.x - 5.0, p.y, p.z))
//!     })
//!     .collect();
//! let mut problem = AlignmentProblem::new(ModelKind::Translation);
//! problem.fix_view(a);
//! problem.add_pair_matches(ViewPairMatches::new(a, b, matches));
//! let result = problem.solve_iterative().unwrap();
//! assert!(result.converged);
//! let placed = result.models[&b].apply(Point3::origin());
//! assert!((placed.x - 5.0).abs() < 1e-9);
//! ```

mod controller;
mod convergence;
mod graph;
mod groups;
mod settings;
mod solver;
mod weights;

pub use controller::*;
pub use settings::*;
pub use solver::{Diagnostic, ResidualStats};

use stitch_core::ViewId;
use thiserror::Error;

/// A structural problem that fails the whole run before any transform is
/// modified.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentError {
    /// No two tiles are connected by any correspondence.
    #[error("nothing to optimize: no two tiles are connected by point correspondences")]
    NothingToOptimize,
    /// A view ended up in two groups after merging. This is a programming
    /// invariant violation; the group merge is supposed to make it
    /// impossible.
    #[error("view {view} belongs to two merged groups")]
    GroupOverlap { view: ViewId },
}
