//! Two-dimensional position measurements on detector surfaces.

use crate::parameters::{BoundVector, LOC0, LOC1};
use crate::{Error, Identifier, Result, Surface};
use nalgebra::{Matrix2, SMatrix, Vector2};

/// Projection from bound parameters onto the two local coordinates.
pub type Projector = SMatrix<f64, 2, 5>;

/// A local position measurement bound to a surface.
///
/// Immutable once built. The surface is borrowed from the geometry, so a
/// measurement can only be matched against track states on the very same
/// surface instance.
#[derive(Debug, Clone, Copy)]
pub struct Measurement<'g> {
    surface: &'g Surface,
    identifier: Identifier,
    covariance: Matrix2<f64>,
    local: Vector2<f64>,
}

impl<'g> Measurement<'g> {
    /// Builds a measurement with uncorrelated local uncertainties.
    ///
    /// # Errors
    /// Returns [`Error::InvalidUncertainty`] unless both sigmas are finite and
    /// strictly positive.
    pub fn build(
        surface: &'g Surface,
        identifier: Identifier,
        local1: f64,
        local2: f64,
        sigma1: f64,
        sigma2: f64,
    ) -> Result<Self> {
        let valid = |sigma: f64| sigma.is_finite() && sigma > 0.0;
        if !valid(sigma1) || !valid(sigma2) {
            return Err(Error::InvalidUncertainty { sigma1, sigma2 });
        }
        Ok(Self {
            surface,
            identifier,
            covariance: Matrix2::new(sigma1 * sigma1, 0.0, 0.0, sigma2 * sigma2),
            local: Vector2::new(local1, local2),
        })
    }

    /// Surface the measurement lives on.
    #[inline]
    #[must_use]
    pub fn surface(&self) -> &'g Surface {
        self.surface
    }

    /// Identifier of the measuring module.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Local coordinates.
    #[inline]
    #[must_use]
    pub fn local(&self) -> &Vector2<f64> {
        &self.local
    }

    /// Local covariance.
    #[inline]
    #[must_use]
    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.covariance
    }

    /// Projection matrix selecting `(loc0, loc1)`.
    #[must_use]
    pub fn projector() -> Projector {
        let mut h = Projector::zeros();
        h[(0, LOC0)] = 1.0;
        h[(1, LOC1)] = 1.0;
        h
    }

    /// Residual against predicted bound parameters.
    #[must_use]
    pub fn residual(&self, parameters: &BoundVector) -> Vector2<f64> {
        self.local - Self::projector() * parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pose, SurfaceBounds};
    use approx::assert_relative_eq;

    fn module() -> Surface {
        Surface::plane(
            Pose::identity(),
            SurfaceBounds::Rectangle {
                half_x: 10.0,
                half_y: 10.0,
            },
        )
        .with_identifier(Identifier::new(100))
    }

    #[test]
    fn test_build_measurement() {
        let surface = module();
        let m = Measurement::build(&surface, Identifier::new(100), 1.0, 2.0, 0.1, 0.2).unwrap();
        assert!(m.surface().same_as(&surface));
        assert_eq!(m.identifier(), Identifier::new(100));
        assert_relative_eq!(m.covariance()[(0, 0)], 0.01, epsilon = 1e-15);
        assert_relative_eq!(m.covariance()[(1, 1)], 0.04, epsilon = 1e-15);
        assert_relative_eq!(m.covariance()[(0, 1)], 0.0);

        let residual = m.residual(&BoundVector::new(0.5, 2.5, 0.0, 1.0, 0.1));
        assert_relative_eq!(residual, Vector2::new(0.5, -0.5), epsilon = 1e-15);
    }

    #[test]
    fn test_invalid_uncertainty() {
        let surface = module();
        for (s1, s2) in [(0.0, 1.0), (1.0, -0.1), (f64::NAN, 1.0), (1.0, f64::INFINITY)] {
            let result = Measurement::build(&surface, Identifier::new(100), 0.0, 0.0, s1, s2);
            assert!(matches!(result, Err(Error::InvalidUncertainty { .. })));
        }
    }
}
