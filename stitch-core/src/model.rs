use nalgebra::{
    IsometryMatrix3, Matrix3, Matrix3x4, Matrix4, Point3, Rotation3, Translation3, Vector3,
};
use thiserror::Error;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The reason a model could not be fit to a set of weighted correspondences.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FitError {
    /// Fewer correspondences were supplied than the model family requires.
    #[error("not enough data points ({found} found, {required} required)")]
    NotEnoughPoints { found: usize, required: usize },
    /// The correspondences are degenerate for the model family
    /// (coincident or collinear points, or a singular design matrix).
    #[error("ill-defined data points")]
    IllDefinedPoints,
}

/// The family of transform models a tile can be solved with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum ModelKind {
    Translation,
    Rigid,
    Affine,
}

impl ModelKind {
    /// The minimum number of correspondences required for a well-posed fit.
    pub fn minimum_points(self) -> usize {
        match self {
            ModelKind::Translation => 1,
            ModelKind::Rigid => 3,
            ModelKind::Affine => 4,
        }
    }

    /// The identity model of this family.
    pub fn identity(self) -> TileModel {
        match self {
            ModelKind::Translation => TileModel::Translation(Translation3::identity()),
            ModelKind::Rigid => TileModel::Rigid(IsometryMatrix3::identity()),
            ModelKind::Affine => TileModel::Affine(Matrix3x4::identity()),
        }
    }

    /// Fits a fresh model of this family to weighted point correspondences.
    ///
    /// Each datum is `(source, target, weight)`: the fit minimizes the
    /// weighted sum of squared distances between the transformed source
    /// points and their targets.
    pub fn fit(self, data: &[(Point3<f64>, Point3<f64>, f64)]) -> Result<TileModel, FitError> {
        let required = self.minimum_points();
        if data.len() < required {
            return Err(FitError::NotEnoughPoints {
                found: data.len(),
                required,
            });
        }
        let total: f64 = data.iter().map(|&(_, _, w)| w).sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(FitError::IllDefinedPoints);
        }
        match self {
            ModelKind::Translation => {
                let mut shift = Vector3::zeros();
                for &(p, q, w) in data {
                    shift += w * (q - p);
                }
                Ok(TileModel::Translation(Translation3::from(shift / total)))
            }
            ModelKind::Rigid => {
                let mut cp = Vector3::zeros();
                let mut cq = Vector3::zeros();
                for &(p, q, w) in data {
                    cp += w * p.coords;
                    cq += w * q.coords;
                }
                cp /= total;
                cq /= total;
                let mut covariance = Matrix3::zeros();
                for &(p, q, w) in data {
                    covariance += w * (p.coords - cp) * (q.coords - cq).transpose();
                }
                let svd = covariance
                    .try_svd(true, true, 1.0e-12, 1024)
                    .ok_or(FitError::IllDefinedPoints)?;
                // A rank below 2 leaves the rotation unconstrained about at
                // least one axis (coincident or collinear points).
                if svd.singular_values[1] <= svd.singular_values[0] * 1.0e-9 {
                    return Err(FitError::IllDefinedPoints);
                }
                let u = svd.u.ok_or(FitError::IllDefinedPoints)?;
                let v = svd.v_t.ok_or(FitError::IllDefinedPoints)?.transpose();
                let mut correction = Matrix3::identity();
                if (v * u.transpose()).determinant() < 0.0 {
                    correction[(2, 2)] = -1.0;
                }
                let rotation = Rotation3::from_matrix_unchecked(v * correction * u.transpose());
                let translation = Translation3::from(cq - rotation * cp);
                Ok(TileModel::Rigid(IsometryMatrix3::from_parts(
                    translation,
                    rotation,
                )))
            }
            ModelKind::Affine => {
                let mut design = Matrix4::zeros();
                let mut moment = Matrix3x4::zeros();
                for &(p, q, w) in data {
                    let ph = p.coords.push(1.0);
                    design += w * ph * ph.transpose();
                    moment += w * q.coords * ph.transpose();
                }
                let inverse = design.try_inverse().ok_or(FitError::IllDefinedPoints)?;
                let affine = moment * inverse;
                if affine.iter().any(|n| !n.is_finite()) {
                    return Err(FitError::IllDefinedPoints);
                }
                Ok(TileModel::Affine(affine))
            }
        }
    }
}

impl core::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "translation" => Ok(ModelKind::Translation),
            "rigid" => Ok(ModelKind::Rigid),
            "affine" => Ok(ModelKind::Affine),
            other => Err(format!("unknown model kind \"{}\"", other)),
        }
    }
}

/// A 3d transform placing one tile (a view or a group of views) in the
/// global coordinate frame.
///
/// This is a closed sum over the supported model families. Every variant
/// supports fitting to weighted point correspondences ([`ModelKind::fit`]),
/// application to points, composition, and conversion to a homogeneous
/// matrix for collaborators that resample images.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum TileModel {
    Translation(Translation3<f64>),
    Rigid(IsometryMatrix3<f64>),
    Affine(Matrix3x4<f64>),
}

impl TileModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TileModel::Translation(_) => ModelKind::Translation,
            TileModel::Rigid(_) => ModelKind::Rigid,
            TileModel::Affine(_) => ModelKind::Affine,
        }
    }

    /// Maps a point from the tile's local coordinates into the global frame.
    pub fn apply(&self, p: Point3<f64>) -> Point3<f64> {
        match self {
            TileModel::Translation(t) => t.transform_point(&p),
            TileModel::Rigid(iso) => iso.transform_point(&p),
            TileModel::Affine(m) => {
                let linear = m.fixed_slice::<3, 3>(0, 0).into_owned();
                let shift = m.column(3).into_owned();
                Point3::from(linear * p.coords + shift)
            }
        }
    }

    /// Maps a point from the global frame back into the tile's local
    /// coordinates. Returns `None` if the affine linear part is singular.
    pub fn apply_inverse(&self, p: Point3<f64>) -> Option<Point3<f64>> {
        match self {
            TileModel::Translation(t) => Some(t.inverse_transform_point(&p)),
            TileModel::Rigid(iso) => Some(iso.inverse_transform_point(&p)),
            TileModel::Affine(m) => {
                let linear = m.fixed_slice::<3, 3>(0, 0).into_owned();
                let shift = m.column(3).into_owned();
                let inverse = linear.try_inverse()?;
                Some(Point3::from(inverse * (p.coords - shift)))
            }
        }
    }

    /// Composes two models: the result applies `self` first, then `outer`.
    ///
    /// The resulting variant is the most general of the two inputs, so a
    /// translation folded into a rigid model stays rigid and anything
    /// composed with an affine model becomes affine.
    #[must_use]
    pub fn then(&self, outer: &TileModel) -> TileModel {
        use TileModel::*;
        match (*self, *outer) {
            (Translation(a), Translation(b)) => Translation(Translation3::from(a.vector + b.vector)),
            (Rigid(a), Rigid(b)) => Rigid(b * a),
            (Translation(a), Rigid(b)) => {
                Rigid(b * IsometryMatrix3::from_parts(a, Rotation3::identity()))
            }
            (Rigid(a), Translation(b)) => {
                Rigid(IsometryMatrix3::from_parts(b, Rotation3::identity()) * a)
            }
            (a, b) => {
                let composed = b.to_matrix() * a.to_matrix();
                Affine(composed.fixed_slice::<3, 4>(0, 0).into_owned())
            }
        }
    }

    /// The homogeneous matrix of the model.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        match self {
            TileModel::Translation(t) => t.to_homogeneous(),
            TileModel::Rigid(iso) => iso.to_homogeneous(),
            TileModel::Affine(m) => {
                let mut h = Matrix4::identity();
                h.fixed_slice_mut::<3, 4>(0, 0).copy_from(m);
                h
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spread_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 1.0, 2.0),
            Point3::new(2.0, 8.0, -1.0),
            Point3::new(-3.0, 4.0, 7.0),
            Point3::new(5.0, -6.0, 3.0),
            Point3::new(1.0, 2.0, 9.0),
        ]
    }

    fn data_for(model: &TileModel, points: &[Point3<f64>]) -> Vec<(Point3<f64>, Point3<f64>, f64)> {
        points.iter().map(|&p| (p, model.apply(p), 1.0)).collect()
    }

    #[test]
    fn translation_fit_recovers_shift() {
        let truth = TileModel::Translation(Translation3::new(5.0, -3.0, 0.5));
        let data = data_for(&truth, &spread_points());
        let fit = ModelKind::Translation.fit(&data).unwrap();
        assert_relative_eq!(fit.to_matrix(), truth.to_matrix(), epsilon = 1e-12);
    }

    #[test]
    fn rigid_fit_recovers_isometry() {
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.4);
        let truth = TileModel::Rigid(IsometryMatrix3::from_parts(
            Translation3::new(1.0, 2.0, 3.0),
            rotation,
        ));
        let data = data_for(&truth, &spread_points());
        let fit = ModelKind::Rigid.fit(&data).unwrap();
        assert_relative_eq!(fit.to_matrix(), truth.to_matrix(), epsilon = 1e-9);
    }

    #[test]
    fn affine_fit_recovers_shear() {
        let mut m = Matrix3x4::identity();
        m[(0, 1)] = 0.25;
        m[(1, 2)] = -0.5;
        m[(0, 3)] = 4.0;
        m[(2, 3)] = -2.0;
        let truth = TileModel::Affine(m);
        let data = data_for(&truth, &spread_points());
        let fit = ModelKind::Affine.fit(&data).unwrap();
        assert_relative_eq!(fit.to_matrix(), truth.to_matrix(), epsilon = 1e-9);
    }

    #[test]
    fn fit_respects_weights() {
        // An outlier with zero weight must not influence the result.
        let truth = TileModel::Translation(Translation3::new(2.0, 0.0, 0.0));
        let mut data = data_for(&truth, &spread_points());
        data.push((Point3::origin(), Point3::new(1000.0, 0.0, 0.0), 0.0));
        let fit = ModelKind::Translation.fit(&data).unwrap();
        assert_relative_eq!(fit.to_matrix(), truth.to_matrix(), epsilon = 1e-12);
    }

    #[test]
    fn too_few_points_is_reported() {
        let data = vec![
            (Point3::origin(), Point3::new(1.0, 0.0, 0.0), 1.0),
            (Point3::new(1.0, 1.0, 1.0), Point3::new(2.0, 1.0, 1.0), 1.0),
        ];
        assert_eq!(
            ModelKind::Affine.fit(&data),
            Err(FitError::NotEnoughPoints {
                found: 2,
                required: 4
            })
        );
    }

    #[test]
    fn collinear_points_are_ill_defined_for_rigid() {
        let data: Vec<_> = (0..5)
            .map(|i| {
                let p = Point3::new(i as f64, 0.0, 0.0);
                (p, Point3::new(i as f64 + 1.0, 0.0, 0.0), 1.0)
            })
            .collect();
        assert_eq!(
            ModelKind::Rigid.fit(&data),
            Err(FitError::IllDefinedPoints)
        );
    }

    #[test]
    fn coplanar_points_are_ill_defined_for_affine() {
        let data: Vec<_> = (0..6)
            .map(|i| {
                let p = Point3::new(i as f64, (i * i) as f64, 0.0);
                (p, p, 1.0)
            })
            .collect();
        assert_eq!(
            ModelKind::Affine.fit(&data),
            Err(FitError::IllDefinedPoints)
        );
    }

    #[test]
    fn composition_matches_matrix_product() {
        let a = TileModel::Rigid(IsometryMatrix3::from_parts(
            Translation3::new(1.0, 0.0, 0.0),
            Rotation3::from_axis_angle(&Vector3::y_axis(), 0.3),
        ));
        let mut shear = Matrix3x4::identity();
        shear[(0, 1)] = 0.1;
        let b = TileModel::Affine(shear);
        let composed = a.then(&b);
        assert_eq!(composed.kind(), ModelKind::Affine);
        assert_relative_eq!(
            composed.to_matrix(),
            b.to_matrix() * a.to_matrix(),
            epsilon = 1e-12
        );
        let p = Point3::new(3.0, -2.0, 5.0);
        assert_relative_eq!(composed.apply(p), b.apply(a.apply(p)), epsilon = 1e-12);
    }

    #[test]
    fn apply_inverse_round_trips() {
        let model = TileModel::Rigid(IsometryMatrix3::from_parts(
            Translation3::new(-4.0, 2.0, 1.0),
            Rotation3::from_axis_angle(&Vector3::x_axis(), 1.1),
        ));
        let p = Point3::new(0.5, 0.25, -3.0);
        let back = model.apply_inverse(model.apply(p)).unwrap();
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }
}
