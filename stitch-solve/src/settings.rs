#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for the global alignment solver.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone)]
pub struct SolverSettings {
    /// The average residual at or below which refinement stops early.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_allowed_error")
    )]
    pub max_allowed_error: f64,
    /// The maximum number of refinement passes per solve.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// The number of consecutive passes without improvement of the average
    /// residual after which refinement stops.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_plateau_width")
    )]
    pub max_plateau_width: usize,
    /// The factor by which the maximum residual may exceed the average
    /// residual before the solution counts as not converged.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_relative_threshold")
    )]
    pub relative_threshold: f64,
    /// The absolute average residual above which the solution counts as not
    /// converged.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_absolute_threshold")
    )]
    pub absolute_threshold: f64,
    /// The maximum residual below which relative spikes are ignored, so that
    /// noise-level outliers cannot block convergence.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_max_error_floor")
    )]
    pub min_max_error_floor: f64,
    /// The pairwise correlation at or above which a link counts as strong in
    /// two-round solving.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_correlation"))]
    pub min_correlation: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_allowed_error: default_max_allowed_error(),
            max_iterations: default_max_iterations(),
            max_plateau_width: default_max_plateau_width(),
            relative_threshold: default_relative_threshold(),
            absolute_threshold: default_absolute_threshold(),
            min_max_error_floor: default_min_max_error_floor(),
            min_correlation: default_min_correlation(),
        }
    }
}

fn default_max_allowed_error() -> f64 {
    5.0
}

fn default_max_iterations() -> usize {
    500
}

fn default_max_plateau_width() -> usize {
    200
}

fn default_relative_threshold() -> f64 {
    2.5
}

fn default_absolute_threshold() -> f64 {
    3.5
}

fn default_min_max_error_floor() -> f64 {
    0.75
}

fn default_min_correlation() -> f64 {
    0.3
}
