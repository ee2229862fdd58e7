use nalgebra::Point3;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A matched pair of 3d points, one in each view's local coordinates.
///
/// The first point lives in the coordinate system of the first view of the
/// pair that produced the match, the second point in that of the second view.
/// A correspondence is an inlier that already survived the external matching
/// stage; no outlier rejection happens downstream of this type.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PointCorrespondence(pub Point3<f64>, pub Point3<f64>);

impl PointCorrespondence {
    /// Swaps the two sides of the correspondence.
    #[must_use]
    pub fn flip(self) -> Self {
        Self(self.1, self.0)
    }
}
