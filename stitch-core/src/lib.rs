//! # Stitch Core
//!
//! This library provides the common types shared by the multi-view stitching
//! crates: view identities, view groups, point correspondences, and the 3d
//! transform models that place each view in the global coordinate frame.
//! The crate is deliberately small so that every crate in the workspace can
//! agree on one vocabulary without pulling in the solver itself.
//!
//! A *view* is one acquisition of the physical specimen, identified by its
//! timepoint and setup. Views that must share a single transform (for example
//! the channels of one physical tile) are collected into a [`ViewGroup`].
//! An external matching stage compares pairs of views and produces
//! [`PointCorrespondence`] inliers; the solver consumes those and resolves one
//! [`TileModel`] per view.

mod matches;
mod model;
mod view;

pub use matches::*;
pub use model::*;
pub use view::*;

pub use nalgebra;
