//! Material interactions applied when a track crosses a surface.

use trackfit_core::parameters::{PHI, QOP, THETA};
use trackfit_core::{BoundMatrix, BoundVector, Error, FreeState, Result, Surface};

/// Pion mass hypothesis (GeV).
pub const PION_MASS: f64 = 0.139_57;

/// Smallest |cos| of the incidence angle used for the path through a slab.
const MIN_INCIDENCE_COSINE: f64 = 1e-3;

/// Material update of bound parameters on a surface.
pub trait MaterialEffects: Send + Sync {
    /// Applies the material of `surface`, if any.
    ///
    /// `free` is the global state on the surface before the update and
    /// `path_length` the accumulated path, used for reporting.
    ///
    /// # Errors
    /// Returns [`Error::ParticleStopped`] if the particle ranges out.
    fn apply(
        &self,
        surface: &Surface,
        free: &FreeState,
        parameters: &mut BoundVector,
        covariance: &mut BoundMatrix,
        path_length: f64,
    ) -> Result<()>;
}

/// Ignores material.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMaterialEffects;

impl MaterialEffects for NoMaterialEffects {
    fn apply(
        &self,
        _surface: &Surface,
        _free: &FreeState,
        _parameters: &mut BoundVector,
        _covariance: &mut BoundMatrix,
        _path_length: f64,
    ) -> Result<()> {
        Ok(())
    }
}

/// Highland multiple scattering and mean ionisation loss.
#[derive(Clone, Copy, Debug)]
pub struct HighlandMaterialEffects {
    /// Mass hypothesis (GeV).
    pub mass: f64,
    /// Apply multiple scattering.
    pub multiple_scattering: bool,
    /// Apply energy loss.
    pub energy_loss: bool,
}

impl Default for HighlandMaterialEffects {
    fn default() -> Self {
        Self {
            mass: PION_MASS,
            multiple_scattering: true,
            energy_loss: true,
        }
    }
}

impl HighlandMaterialEffects {
    /// Width of the projected scattering angle distribution.
    #[must_use]
    pub fn highland_angle(&self, p: f64, thickness_in_x0: f64) -> f64 {
        if thickness_in_x0 <= 0.0 {
            return 0.0;
        }
        let energy = p.hypot(self.mass);
        let beta = p / energy;
        13.6e-3 / (beta * p) * thickness_in_x0.sqrt() * (1.0 + 0.038 * thickness_in_x0.ln())
    }
}

impl MaterialEffects for HighlandMaterialEffects {
    fn apply(
        &self,
        surface: &Surface,
        free: &FreeState,
        parameters: &mut BoundVector,
        covariance: &mut BoundMatrix,
        path_length: f64,
    ) -> Result<()> {
        let Some(slab) = surface.material() else {
            return Ok(());
        };
        let cosine = free
            .direction
            .dot(&surface.normal(&free.position))
            .abs()
            .max(MIN_INCIDENCE_COSINE);
        let traversed = slab.thickness / cosine;
        let p = 1.0 / parameters[QOP].abs();

        if self.multiple_scattering {
            let theta0 = self.highland_angle(p, traversed / slab.radiation_length);
            let variance = theta0 * theta0;
            let sin_theta = parameters[THETA].sin().abs().max(MIN_INCIDENCE_COSINE);
            covariance[(PHI, PHI)] += variance / (sin_theta * sin_theta);
            covariance[(THETA, THETA)] += variance;
        }

        if self.energy_loss {
            let energy = p.hypot(self.mass) - slab.energy_loss * traversed;
            if energy <= self.mass {
                return Err(Error::ParticleStopped { path_length });
            }
            let p_after = (energy * energy - self.mass * self.mass).sqrt();
            parameters[QOP] = parameters[QOP].signum() / p_after;
        }
        Ok(())
    }
}
