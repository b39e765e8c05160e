//! Helical seed from three space points.
//!
//! The transverse projection of a helix in a solenoidal field is a circle.
//! The circle through the reference, middle and outer points fixes the
//! transverse momentum and the azimuth at closest approach; the arc lengths
//! to the middle and outer points fix the dip.

use log::debug;
use nalgebra::{Vector2, Vector3};
use std::f64::consts::PI;
use trackfit_core::parameters::{wrap_phi, FreeState};
use trackfit_core::{BoundMatrix, Error, Result, Surface, TrackState, C_LIGHT};

/// How the seed charge is assigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChargeHypothesis {
    /// Always +1.
    Positive,
    /// From the rotation sense in a field along +z.
    #[default]
    FromBending,
}

/// Seed estimator configuration.
#[derive(Clone, Debug)]
pub struct SeedConfig {
    /// Charge assignment.
    pub charge: ChargeHypothesis,
    /// Normalised chord cross products below this are collinear.
    pub collinearity_threshold: f64,
    /// Initial covariance of the seeded state.
    pub covariance: BoundMatrix,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            charge: ChargeHypothesis::FromBending,
            collinearity_threshold: 1e-12,
            covariance: BoundMatrix::identity(),
        }
    }
}

impl SeedConfig {
    /// Sets the charge hypothesis.
    #[must_use]
    pub fn with_charge(mut self, charge: ChargeHypothesis) -> Self {
        self.charge = charge;
        self
    }

    /// Sets the initial covariance.
    #[must_use]
    pub fn with_covariance(mut self, covariance: BoundMatrix) -> Self {
        self.covariance = covariance;
        self
    }
}

/// Helix parameters at the point of closest approach to the beam axis.
#[derive(Clone, Debug, PartialEq)]
pub struct HelixSeed {
    /// Signed transverse impact parameter (mm).
    pub d0: f64,
    /// Longitudinal impact parameter (mm).
    pub z0: f64,
    /// Azimuth of the direction at closest approach.
    pub phi0: f64,
    /// Polar angle.
    pub theta: f64,
    /// Charge over transverse momentum (1/GeV).
    pub q_over_pt: f64,
    /// Transverse circle centre.
    pub centre: Vector2<f64>,
    /// Transverse circle radius (mm).
    pub radius: f64,
    /// Field used for the momentum scale (T).
    pub field: f64,
    /// +1 for counter-clockwise motion seen from +z, -1 otherwise.
    rotation: f64,
}

impl HelixSeed {
    /// Charge sign.
    #[must_use]
    pub fn charge(&self) -> f64 {
        self.q_over_pt.signum()
    }

    /// Transverse momentum (GeV).
    #[must_use]
    pub fn pt(&self) -> f64 {
        1.0 / self.q_over_pt.abs()
    }

    /// Dip angle, `pi/2 - theta`.
    #[must_use]
    pub fn dip(&self) -> f64 {
        PI / 2.0 - self.theta
    }

    /// Charge over momentum (1/GeV).
    #[must_use]
    pub fn q_over_p(&self) -> f64 {
        self.q_over_pt * self.theta.sin()
    }

    /// Point of closest approach.
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        let (sin_phi, cos_phi) = self.phi0.sin_cos();
        Vector3::new(-self.d0 * sin_phi, self.d0 * cos_phi, self.z0)
    }

    /// Momentum at closest approach (GeV).
    #[must_use]
    pub fn momentum(&self) -> Vector3<f64> {
        let pt = self.pt();
        let (sin_phi, cos_phi) = self.phi0.sin_cos();
        Vector3::new(pt * cos_phi, pt * sin_phi, pt / self.theta.tan())
    }

    /// Signed distance of a point from the fitted circle.
    #[must_use]
    pub fn circle_residual(&self, point: &Vector3<f64>) -> f64 {
        (point.xy() - self.centre).norm() - self.radius
    }

    /// Transverse arc length from closest approach to the projection of `point`.
    #[must_use]
    pub fn arc_length(&self, point: &Vector3<f64>) -> f64 {
        let start = self.position().xy() - self.centre;
        let end = point.xy() - self.centre;
        let swept = wrap_phi(end.y.atan2(end.x) - start.y.atan2(start.x));
        self.radius * swept * self.rotation
    }

    /// z of the helix at the transverse position of `point`.
    #[must_use]
    pub fn z_at(&self, point: &Vector3<f64>) -> f64 {
        self.z0 + self.arc_length(point) / self.theta.tan()
    }

    /// Global representation at closest approach.
    #[must_use]
    pub fn free_state(&self) -> FreeState {
        FreeState::from_momentum(self.position(), self.momentum(), self.charge())
    }

    /// Expresses the seed on a perigee surface.
    #[must_use]
    pub fn to_track_state<'g>(&self, perigee: &'g Surface, covariance: BoundMatrix) -> TrackState<'g> {
        let parameters = perigee.to_bound(&self.free_state());
        TrackState::new(perigee, parameters, covariance)
    }
}

/// Three-point helix estimator.
#[derive(Clone, Debug, Default)]
pub struct SeedEstimator {
    config: SeedConfig,
}

impl SeedEstimator {
    /// Creates an estimator.
    #[must_use]
    pub fn new(config: SeedConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SeedConfig {
        &self.config
    }

    /// Estimates the helix through `reference`, `middle` and `outer`.
    ///
    /// # Errors
    /// Returns [`Error::DegenerateSeed`] for collinear or coincident points,
    /// for equal arc lengths of middle and outer, and for a non-positive
    /// field.
    pub fn estimate(
        &self,
        outer: &Vector3<f64>,
        middle: &Vector3<f64>,
        reference: &Vector3<f64>,
        field: f64,
    ) -> Result<HelixSeed> {
        if !(field.is_finite() && field > 0.0) {
            return Err(Error::DegenerateSeed(format!("field must be positive, got {field} T")));
        }

        let r = reference.xy();
        let m = middle.xy();
        let o = outer.xy();
        let first = m - r;
        let second = o - m;
        let norms = first.norm() * second.norm();
        if norms <= 0.0 {
            return Err(Error::DegenerateSeed("coincident points".to_string()));
        }
        let cross = first.perp(&second);
        if (cross / norms).abs() < self.config.collinearity_threshold {
            return Err(Error::DegenerateSeed("collinear points".to_string()));
        }

        let centre = circumcentre(&r, &m, &o);
        let radius = (r - centre).norm();
        if centre.norm() <= 0.0 {
            return Err(Error::DegenerateSeed("circle centred on the beam axis".to_string()));
        }
        let rotation = cross.signum();
        let charge = match self.config.charge {
            ChargeHypothesis::Positive => 1.0,
            // A positive charge turns clockwise in a field along +z.
            ChargeHypothesis::FromBending => -rotation,
        };

        // Closest approach to the beam axis lies on the line through the centre.
        let to_axis = -centre / centre.norm();
        let pca = centre + to_axis * radius;
        let tangent = Vector2::new(-to_axis.y, to_axis.x) * rotation;
        let phi0 = tangent.y.atan2(tangent.x);
        let d0 = -pca.x * phi0.sin() + pca.y * phi0.cos();

        let mut seed = HelixSeed {
            d0,
            z0: 0.0,
            phi0,
            theta: PI / 2.0,
            q_over_pt: charge / (C_LIGHT * field * radius),
            centre,
            radius,
            field,
            rotation,
        };

        let s_middle = seed.arc_length(middle);
        let s_outer = seed.arc_length(outer);
        if (s_outer - s_middle).abs() < f64::EPSILON * radius {
            return Err(Error::DegenerateSeed("middle and outer at the same arc length".to_string()));
        }
        let cot_theta = (outer.z - middle.z) / (s_outer - s_middle);
        seed.theta = 1.0_f64.atan2(cot_theta);
        seed.z0 = middle.z - s_middle * cot_theta;

        debug!(
            "seed: d0={:.4} z0={:.4} phi0={:.5} theta={:.5} q/pT={:.5}",
            seed.d0, seed.z0, seed.phi0, seed.theta, seed.q_over_pt
        );
        Ok(seed)
    }
}

fn circumcentre(a: &Vector2<f64>, b: &Vector2<f64>, c: &Vector2<f64>) -> Vector2<f64> {
    let d = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    let a2 = a.norm_squared();
    let b2 = b.norm_squared();
    let c2 = c.norm_squared();
    Vector2::new(
        (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / d,
        (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_points_on_circle() {
        let estimator = SeedEstimator::default();
        let reference = Vector3::zeros();
        let middle = Vector3::new(50.0, 5.0, 20.0);
        let outer = Vector3::new(100.0, 20.0, 41.0);
        let seed = estimator.estimate(&outer, &middle, &reference, 2.0).unwrap();

        for point in [&reference, &middle, &outer] {
            assert_relative_eq!(seed.circle_residual(point), 0.0, epsilon = 1e-9);
        }
        assert_relative_eq!(seed.z_at(&middle), middle.z, epsilon = 1e-9);
        assert_relative_eq!(seed.z_at(&outer), outer.z, epsilon = 1e-9);
        // Passes through the origin.
        assert_relative_eq!(seed.d0, 0.0, epsilon = 1e-9);
        assert_relative_eq!(seed.pt(), C_LIGHT * 2.0 * seed.radius, epsilon = 1e-12);
    }

    #[test]
    fn test_charge_from_bending() {
        let estimator = SeedEstimator::default();
        let reference = Vector3::zeros();
        // Counter-clockwise: negative in a +z field.
        let left = estimator
            .estimate(&Vector3::new(100.0, 20.0, 0.0), &Vector3::new(50.0, 5.0, 0.0), &reference, 2.0)
            .unwrap();
        assert_relative_eq!(left.charge(), -1.0);
        let right = estimator
            .estimate(&Vector3::new(100.0, -20.0, 0.0), &Vector3::new(50.0, -5.0, 0.0), &reference, 2.0)
            .unwrap();
        assert_relative_eq!(right.charge(), 1.0);

        let legacy = SeedEstimator::new(SeedConfig::default().with_charge(ChargeHypothesis::Positive))
            .estimate(&Vector3::new(100.0, 20.0, 0.0), &Vector3::new(50.0, 5.0, 0.0), &reference, 2.0)
            .unwrap();
        assert_relative_eq!(legacy.charge(), 1.0);
    }

    #[test]
    fn test_collinear_points() {
        let estimator = SeedEstimator::default();
        let result = estimator.estimate(
            &Vector3::new(2.0, 0.0, 0.0),
            &Vector3::new(1.0, 0.0, 0.0),
            &Vector3::zeros(),
            2.0,
        );
        assert!(matches!(result, Err(Error::DegenerateSeed(_))));
    }

    #[test]
    fn test_non_positive_field() {
        let estimator = SeedEstimator::default();
        let result = estimator.estimate(
            &Vector3::new(100.0, 20.0, 0.0),
            &Vector3::new(50.0, 5.0, 0.0),
            &Vector3::zeros(),
            0.0,
        );
        assert!(matches!(result, Err(Error::DegenerateSeed(_))));
    }

    #[test]
    fn test_momentum_direction() {
        let estimator = SeedEstimator::default();
        let seed = estimator
            .estimate(
                &Vector3::new(100.0, 1.0, 100.0),
                &Vector3::new(50.0, 0.25, 50.0),
                &Vector3::zeros(),
                1.0,
            )
            .unwrap();
        let direction = seed.momentum().normalize();
        // Nearly straight along (1, 0, 1).
        assert_relative_eq!(direction, Vector3::new(1.0, 0.0, 1.0).normalize(), epsilon = 1e-2);
        assert_relative_eq!(seed.dip(), PI / 4.0, epsilon = 1e-2);
    }
}
