//! Surface-to-surface propagation and geometry navigation.
//!
//! A [`Propagator`] combines a [`Stepper`] for the equations of motion with
//! a [`MaterialEffects`] strategy. [`Propagator::propagate_to`] is the
//! prediction primitive of the fitter; [`Propagator::propagate`] walks a
//! [`TrackingGeometry`] and records every surface crossed.
//!
//! Covariances are transported with a central finite-difference Jacobian of
//! the bound-to-bound map.

use crate::material::MaterialEffects;
use crate::stepper::Stepper;
use log::{debug, warn};
use nalgebra::Vector3;
use trackfit_core::parameters::{bound_difference, check_covariance, symmetrize, QOP};
use trackfit_core::{
    BoundMatrix, BoundVector, Error, ExtrapolationStep, FitStage, FreeState, Result, StepKind,
    Surface, SurfaceKind, TrackState,
};
use trackfit_geometry::{PlacedSurface, SurfaceIndex, SurfaceRole, TrackingGeometry, VolumeIndex};

/// Smallest forward path accepted when looking for the next surface (mm).
const MIN_NAVIGATION_PATH: f64 = 1e-6;

/// Finite-difference steps for (loc0, loc1, phi, theta); q/p is relative.
const JACOBIAN_DELTAS: [f64; 4] = [1e-4, 1e-4, 1e-6, 1e-6];
const JACOBIAN_QOP_RELATIVE: f64 = 1e-4;
const JACOBIAN_QOP_MIN: f64 = 1e-8;

/// Propagation limits and tolerances.
#[derive(Clone, Debug)]
pub struct PropagatorConfig {
    /// Maximum navigation steps per [`Propagator::propagate`] call.
    pub max_steps: usize,
    /// Largest single integration step (mm).
    pub max_step_size: f64,
    /// Distance to a surface at which it counts as reached (mm).
    pub tolerance: f64,
    /// Refinement iterations per surface.
    pub max_iterations: usize,
    /// Longest path attempted towards one surface (mm).
    pub max_path_length: f64,
    /// Bounds tolerance for accepting an intersection (mm).
    pub bounds_tolerance: f64,
    /// Bounds tolerance of the straight-line candidate pre-selection (mm).
    pub navigation_slack: f64,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_step_size: 50.0,
            tolerance: 1e-9,
            max_iterations: 20,
            max_path_length: 1e5,
            bounds_tolerance: 1e-3,
            navigation_slack: 5.0,
        }
    }
}

impl PropagatorConfig {
    /// Sets the navigation step budget.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the largest integration step.
    #[must_use]
    pub fn with_max_step_size(mut self, max_step_size: f64) -> Self {
        self.max_step_size = max_step_size;
        self
    }
}

/// What to record while navigating.
#[derive(Clone, Debug)]
pub struct ExtrapolationOptions {
    /// Record sensitive surfaces.
    pub collect_sensitive: bool,
    /// Record passive surfaces.
    pub collect_passive: bool,
    /// Stop on the boundary of the navigation volume.
    pub stop_at_boundary: bool,
    /// Navigation volume; the highest volume if `None`.
    pub volume: Option<VolumeIndex>,
}

impl Default for ExtrapolationOptions {
    fn default() -> Self {
        Self {
            collect_sensitive: true,
            collect_passive: true,
            stop_at_boundary: true,
            volume: None,
        }
    }
}

impl ExtrapolationOptions {
    /// Only sensitive surfaces.
    #[must_use]
    pub fn sensitive_only() -> Self {
        Self {
            collect_passive: false,
            ..Self::default()
        }
    }

    /// Navigates inside the given volume.
    #[must_use]
    pub fn with_volume(mut self, volume: VolumeIndex) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Enables or disables stopping at the volume boundary.
    #[must_use]
    pub fn with_stop_at_boundary(mut self, stop: bool) -> Self {
        self.stop_at_boundary = stop;
        self
    }
}

/// Why navigation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The boundary of the navigation volume was reached.
    Boundary,
    /// No further surface could be reached.
    NoIntersection,
    /// The particle ranged out in material.
    ParticleStopped,
}

/// Ordered surface crossings of one navigation.
#[derive(Clone, Debug)]
pub struct Extrapolation<'g> {
    steps: Vec<ExtrapolationStep<'g>>,
    termination: Termination,
    path_length: f64,
}

impl<'g> Extrapolation<'g> {
    /// Recorded steps by increasing path length.
    #[must_use]
    pub fn steps(&self) -> &[ExtrapolationStep<'g>] {
        &self.steps
    }

    /// Termination reason.
    #[must_use]
    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Path length at termination (mm).
    #[must_use]
    pub fn path_length(&self) -> f64 {
        self.path_length
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps on planar surfaces, the measurement candidates.
    pub fn planar_steps(&self) -> impl Iterator<Item = &ExtrapolationStep<'g>> {
        self.steps
            .iter()
            .filter(|step| step.surface().kind() == SurfaceKind::Plane)
    }

    /// Steps on sensitive surfaces.
    pub fn sensitive_steps(&self) -> impl Iterator<Item = &ExtrapolationStep<'g>> {
        self.steps
            .iter()
            .filter(|step| step.kind == StepKind::Sensitive)
    }

    /// Consumes the container.
    #[must_use]
    pub fn into_steps(self) -> Vec<ExtrapolationStep<'g>> {
        self.steps
    }
}

/// Predicted state on a target surface.
#[derive(Clone, Debug)]
pub struct Prediction<'g> {
    /// State on the target, material included.
    pub state: TrackState<'g>,
    /// Transport Jacobian from the start parameters to the target parameters.
    pub jacobian: BoundMatrix,
}

/// Prediction capability used by the fitter.
pub trait Predictor: Send + Sync {
    /// Predicts `state` onto `target`.
    ///
    /// # Errors
    /// Propagation errors; see [`Error::is_truncation`].
    fn predict<'g>(&self, state: &TrackState<'g>, target: &'g Surface) -> Result<Prediction<'g>>;
}

/// Track propagator composed of a stepper and a material strategy.
#[derive(Clone, Debug)]
pub struct Propagator<S: Stepper, M: MaterialEffects> {
    stepper: S,
    material: M,
    config: PropagatorConfig,
}

impl<S: Stepper, M: MaterialEffects> Propagator<S, M> {
    /// Creates a propagator with default limits.
    pub fn new(stepper: S, material: M) -> Self {
        Self {
            stepper,
            material,
            config: PropagatorConfig::default(),
        }
    }

    /// Replaces the limits.
    #[must_use]
    pub fn with_config(mut self, config: PropagatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Limits in use.
    pub fn config(&self) -> &PropagatorConfig {
        &self.config
    }

    /// Stepper in use.
    pub fn stepper(&self) -> &S {
        &self.stepper
    }

    /// Moves a free state onto `target`.
    ///
    /// `estimate` is the straight-line path to start from; without one the
    /// nearest forward intersection is used. Returns the state on the
    /// surface and the signed path travelled.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn transport(
        &self,
        start: &FreeState,
        target: &Surface,
        estimate: Option<f64>,
    ) -> Result<(FreeState, f64)> {
        let mut state = *start;
        let mut path = 0.0;
        let mut remaining = match estimate {
            Some(s) => s,
            None => target
                .next_intersection(&state.position, &state.direction, -self.config.tolerance)
                .ok_or(Error::NoIntersection { path_length: 0.0 })?,
        };

        for _ in 0..self.config.max_iterations {
            if remaining.abs() <= self.config.tolerance {
                state.position += state.direction * remaining;
                return Ok((state, path + remaining));
            }
            let substeps = (remaining.abs() / self.config.max_step_size).ceil().max(1.0);
            let h = remaining / substeps;
            for _ in 0..substeps as usize {
                state = self.stepper.step(&state, h);
            }
            path += remaining;

            if !state.is_finite() {
                return Err(Error::NumericalDivergence(format!(
                    "non-finite state after {path:.3} mm"
                )));
            }
            if path.abs() > self.config.max_path_length {
                return Err(Error::NoIntersection { path_length: path });
            }
            remaining = target
                .path_to(&state.position, &state.direction)
                .ok_or(Error::NoIntersection { path_length: path })?;
        }
        Err(Error::NoIntersection { path_length: path })
    }

    fn transport_bound(
        &self,
        surface: &Surface,
        parameters: &BoundVector,
        target: &Surface,
        estimate: Option<f64>,
    ) -> Result<BoundVector> {
        let (free, _) = self.transport(&surface.to_global(parameters), target, estimate)?;
        Ok(target.to_bound(&free))
    }

    /// Central finite-difference Jacobian of the bound-to-bound transport.
    fn jacobian(
        &self,
        state: &TrackState<'_>,
        target: &Surface,
        estimate: Option<f64>,
    ) -> Result<BoundMatrix> {
        let mut jacobian = BoundMatrix::zeros();
        for j in 0..5 {
            let delta = if j == QOP {
                (state.parameters[QOP].abs() * JACOBIAN_QOP_RELATIVE).max(JACOBIAN_QOP_MIN)
            } else {
                JACOBIAN_DELTAS[j]
            };
            let mut plus = state.parameters;
            let mut minus = state.parameters;
            plus[j] += delta;
            minus[j] -= delta;
            let forward = self.transport_bound(state.surface, &plus, target, estimate)?;
            let backward = self.transport_bound(state.surface, &minus, target, estimate)?;
            jacobian.set_column(j, &(bound_difference(&forward, &backward) / (2.0 * delta)));
        }
        Ok(jacobian)
    }

    fn predict_with<'g>(
        &self,
        state: &TrackState<'g>,
        target: &'g Surface,
        estimate: Option<f64>,
    ) -> Result<Prediction<'g>> {
        let (free, path) = self.transport(&state.free(), target, estimate)?;
        let mut parameters = target.to_bound(&free);
        let jacobian = self.jacobian(state, target, estimate)?;
        let mut covariance = jacobian * state.covariance * jacobian.transpose();
        let path_length = state.path_length + path;

        self.material
            .apply(target, &free, &mut parameters, &mut covariance, path_length)?;
        symmetrize(&mut covariance);
        check_covariance(&covariance)?;

        Ok(Prediction {
            state: TrackState {
                surface: target,
                parameters,
                covariance,
                stage: FitStage::Predicted,
                measurement: None,
                path_length,
            },
            jacobian,
        })
    }

    /// Predicts a state onto `target` and transports its covariance.
    ///
    /// # Errors
    /// [`Error::NoIntersection`] if the surface is not reached,
    /// [`Error::ParticleStopped`] from energy loss and
    /// [`Error::NumericalDivergence`] for a broken covariance.
    pub fn propagate_to<'g>(
        &self,
        state: &TrackState<'g>,
        target: &'g Surface,
    ) -> Result<Prediction<'g>> {
        self.predict_with(state, target, None)
    }

    /// Straight-line candidates ahead of `free`, nearest first.
    ///
    /// The bounds slack grows with the sagitta `k * s^2` so that a surface
    /// the curved path reaches is not rejected by its straight-line miss.
    fn candidates(
        &self,
        geometry: &TrackingGeometry,
        surfaces: &[SurfaceIndex],
        free: &FreeState,
    ) -> Vec<(f64, SurfaceIndex)> {
        let curvature = self.stepper.curvature(free);
        let mut found: Vec<(f64, SurfaceIndex)> = surfaces
            .iter()
            .filter_map(|&index| {
                let placed = geometry.surface(index)?;
                let s = placed.surface.next_intersection(
                    &free.position,
                    &free.direction,
                    MIN_NAVIGATION_PATH,
                )?;
                let point: Vector3<f64> = free.position + free.direction * s;
                let slack = self.config.navigation_slack + curvature * s * s;
                placed
                    .surface
                    .is_inside(&point, slack)
                    .then_some((s, index))
            })
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found
    }

    /// Navigates from `start` through the geometry.
    ///
    /// Always moves to the reachable surface of the navigation volume with
    /// the shortest curved path. Running out of surfaces ends with
    /// [`Termination::NoIntersection`] and keeps the recorded steps.
    ///
    /// # Errors
    /// [`Error::PropagationLimitExceeded`] beyond `max_steps`,
    /// [`Error::NumericalDivergence`] for broken covariances and
    /// [`Error::ConfigError`] for an invalid navigation volume.
    pub fn propagate<'g>(
        &self,
        geometry: &'g TrackingGeometry,
        start: &TrackState<'g>,
        options: &ExtrapolationOptions,
    ) -> Result<Extrapolation<'g>> {
        let volume = options.volume.unwrap_or_else(|| geometry.highest_volume());
        let config_error = |e: trackfit_geometry::Error| Error::ConfigError(e.to_string());
        let mut surfaces = geometry.layer_surfaces(volume).map_err(config_error)?;
        if options.stop_at_boundary {
            surfaces.extend_from_slice(geometry.boundaries(volume).map_err(config_error)?);
        }

        let mut steps = Vec::new();
        let mut current = start.clone();
        let mut navigation_steps = 0;

        let termination = loop {
            navigation_steps += 1;
            if navigation_steps > self.config.max_steps {
                return Err(Error::PropagationLimitExceeded {
                    max_steps: self.config.max_steps,
                });
            }

            let free = current.free();
            let mut next: Option<(f64, f64, &PlacedSurface)> = None;
            for (estimate, index) in self.candidates(geometry, &surfaces, &free) {
                let Some(placed) = geometry.surface(index) else {
                    continue;
                };
                match self.transport(&free, &placed.surface, Some(estimate)) {
                    Ok((landed, path))
                        if path > MIN_NAVIGATION_PATH
                            && next.map_or(true, |(best, _, _)| path < best)
                            && placed
                                .surface
                                .is_inside(&landed.position, self.config.bounds_tolerance) =>
                    {
                        next = Some((path, estimate, placed));
                    }
                    Ok(_) => {}
                    Err(e) if e.is_truncation() => {}
                    Err(e) => return Err(e),
                }
            }

            let Some((_, estimate, placed)) = next else {
                warn!(
                    "no reachable surface after {:.3} mm, {} steps kept",
                    current.path_length,
                    steps.len()
                );
                break Termination::NoIntersection;
            };

            if placed.role == SurfaceRole::Boundary {
                debug!("boundary reached after {:.3} mm", current.path_length);
                break Termination::Boundary;
            }

            let prediction = match self.predict_with(&current, &placed.surface, Some(estimate)) {
                Ok(prediction) => prediction,
                Err(Error::ParticleStopped { path_length }) => {
                    warn!("particle stopped at {path_length:.3} mm");
                    break Termination::ParticleStopped;
                }
                Err(e) if e.is_truncation() => {
                    warn!("navigation ended: {e}");
                    break Termination::NoIntersection;
                }
                Err(e) => return Err(e),
            };
            current = prediction.state;

            let kind = match placed.role {
                SurfaceRole::Sensitive if options.collect_sensitive => Some(StepKind::Sensitive),
                SurfaceRole::Passive if options.collect_passive => Some(StepKind::Passive),
                _ => None,
            };
            debug!(
                "step {navigation_steps}: {:?} surface at {:.3} mm",
                placed.role, current.path_length
            );
            if let Some(kind) = kind {
                steps.push(ExtrapolationStep {
                    state: current.clone(),
                    kind,
                });
            }
        };

        Ok(Extrapolation {
            steps,
            termination,
            path_length: current.path_length,
        })
    }
}

impl<S: Stepper, M: MaterialEffects> Predictor for Propagator<S, M> {
    fn predict<'g>(&self, state: &TrackState<'g>, target: &'g Surface) -> Result<Prediction<'g>> {
        self.propagate_to(state, target)
    }
}
