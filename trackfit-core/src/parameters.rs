//! Track parameter representations.
//!
//! Two representations are used throughout:
//!
//! - **Bound** parameters `(loc0, loc1, phi, theta, q/p)` are expressed on a
//!   surface. `loc0`/`loc1` are surface-local coordinates, `phi` and `theta`
//!   are the global azimuthal and polar angles of the direction.
//! - **Free** parameters are the global position, unit direction and `q/p`.
//!
//! Units are millimetres, GeV, Tesla and radians throughout.

use nalgebra::{Matrix5, Vector3, Vector5};
use std::f64::consts::PI;

/// Bound parameter vector `(loc0, loc1, phi, theta, q/p)`.
pub type BoundVector = Vector5<f64>;

/// Covariance of a bound parameter vector.
pub type BoundMatrix = Matrix5<f64>;

/// Index of the first local coordinate.
pub const LOC0: usize = 0;
/// Index of the second local coordinate.
pub const LOC1: usize = 1;
/// Index of the azimuthal angle.
pub const PHI: usize = 2;
/// Index of the polar angle.
pub const THETA: usize = 3;
/// Index of charge over momentum.
pub const QOP: usize = 4;

/// Curvature constant in GeV / (T * mm): `pT = C * B * R`.
pub const C_LIGHT: f64 = 0.299_792_458e-3;

/// Wraps an azimuthal angle into `(-pi, pi]`.
#[inline]
#[must_use]
pub fn wrap_phi(phi: f64) -> f64 {
    let mut wrapped = (phi + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped += 2.0 * PI;
    }
    wrapped
}

/// Unit direction for the given global angles.
#[inline]
#[must_use]
pub fn direction_from_angles(phi: f64, theta: f64) -> Vector3<f64> {
    let (sin_theta, cos_theta) = theta.sin_cos();
    let (sin_phi, cos_phi) = phi.sin_cos();
    Vector3::new(cos_phi * sin_theta, sin_phi * sin_theta, cos_theta)
}

/// Difference of two bound vectors with the azimuth wrapped.
#[must_use]
pub fn bound_difference(a: &BoundVector, b: &BoundVector) -> BoundVector {
    let mut diff = a - b;
    diff[PHI] = wrap_phi(diff[PHI]);
    diff
}

/// Global track representation used while stepping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeState {
    /// Global position.
    pub position: Vector3<f64>,
    /// Unit direction of flight.
    pub direction: Vector3<f64>,
    /// Charge over momentum magnitude.
    pub qop: f64,
}

impl FreeState {
    /// Creates a free state, normalizing the direction.
    #[must_use]
    pub fn new(position: Vector3<f64>, direction: Vector3<f64>, qop: f64) -> Self {
        Self {
            position,
            direction: direction.normalize(),
            qop,
        }
    }

    /// Creates a free state from a momentum vector and a charge.
    #[must_use]
    pub fn from_momentum(position: Vector3<f64>, momentum: Vector3<f64>, charge: f64) -> Self {
        let p = momentum.norm();
        Self::new(position, momentum / p, charge / p)
    }

    /// Charge sign; a vanishing `q/p` is treated as positive.
    #[inline]
    #[must_use]
    pub fn charge(&self) -> f64 {
        if self.qop < 0.0 {
            -1.0
        } else {
            1.0
        }
    }

    /// Momentum magnitude in GeV.
    #[inline]
    #[must_use]
    pub fn p(&self) -> f64 {
        1.0 / self.qop.abs()
    }

    /// Momentum vector in GeV.
    #[inline]
    #[must_use]
    pub fn momentum(&self) -> Vector3<f64> {
        self.direction * self.p()
    }

    /// Transverse momentum in GeV.
    #[must_use]
    pub fn pt(&self) -> f64 {
        self.p() * self.direction.x.hypot(self.direction.y)
    }

    /// Global azimuthal angle of the direction.
    #[inline]
    #[must_use]
    pub fn phi(&self) -> f64 {
        self.direction.y.atan2(self.direction.x)
    }

    /// Global polar angle of the direction.
    #[inline]
    #[must_use]
    pub fn theta(&self) -> f64 {
        self.direction.x.hypot(self.direction.y).atan2(self.direction.z)
    }

    /// Returns true if every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.direction.iter().all(|v| v.is_finite())
            && self.qop.is_finite()
    }
}

/// Checks that a covariance is finite with a non-negative diagonal.
///
/// # Errors
/// Returns [`crate::Error::NumericalDivergence`] naming the first offending
/// element.
pub fn check_covariance(cov: &BoundMatrix) -> crate::Result<()> {
    if let Some(index) = cov.iter().position(|v| !v.is_finite()) {
        return Err(crate::Error::NumericalDivergence(format!(
            "non-finite covariance element ({}, {})",
            index % 5,
            index / 5
        )));
    }
    for i in 0..5 {
        if cov[(i, i)] < 0.0 {
            return Err(crate::Error::NumericalDivergence(format!(
                "negative variance {:e} at index {i}",
                cov[(i, i)]
            )));
        }
    }
    Ok(())
}

/// Symmetrizes a covariance in place.
pub fn symmetrize(cov: &mut BoundMatrix) {
    *cov = (*cov + cov.transpose()) * 0.5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wrap_phi() {
        assert_relative_eq!(wrap_phi(0.5), 0.5);
        assert_relative_eq!(wrap_phi(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_phi(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_phi(PI), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_free_state_angles() {
        let state = FreeState::from_momentum(
            Vector3::zeros(),
            Vector3::new(1.0, 1.0, 0.0),
            -1.0,
        );
        assert_relative_eq!(state.phi(), PI / 4.0, epsilon = 1e-12);
        assert_relative_eq!(state.theta(), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(state.p(), 2.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(state.charge(), -1.0);

        let dir = direction_from_angles(state.phi(), state.theta());
        assert_relative_eq!(dir, state.direction, epsilon = 1e-12);
    }

    #[test]
    fn test_bound_difference_wraps_phi() {
        let a = BoundVector::new(0.0, 0.0, PI - 0.01, 1.0, 0.1);
        let b = BoundVector::new(0.0, 0.0, -PI + 0.01, 1.0, 0.1);
        let diff = bound_difference(&a, &b);
        assert_relative_eq!(diff[PHI], -0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_check_covariance() {
        let mut cov = BoundMatrix::identity();
        assert!(check_covariance(&cov).is_ok());

        cov[(3, 3)] = -1e-3;
        assert!(matches!(
            check_covariance(&cov),
            Err(crate::Error::NumericalDivergence(_))
        ));

        cov[(3, 3)] = f64::NAN;
        assert!(check_covariance(&cov).is_err());
    }
}
