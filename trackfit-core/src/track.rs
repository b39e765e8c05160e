//! Track states, extrapolation steps and fitted tracks.

use crate::parameters::{BoundMatrix, BoundVector, FreeState};
use crate::{Measurement, Surface};
use nalgebra::Vector3;

/// Stage of a state in the predict / update / smooth cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitStage {
    /// Propagated, not yet corrected.
    Predicted,
    /// Corrected with the measurement on its surface.
    Updated,
    /// Revised by the backward pass.
    Smoothed,
}

/// Track parameters with covariance, expressed on one surface.
#[derive(Debug, Clone)]
pub struct TrackState<'g> {
    /// Surface the parameters are bound to.
    pub surface: &'g Surface,
    /// Bound parameters `(loc0, loc1, phi, theta, q/p)`.
    pub parameters: BoundVector,
    /// Covariance of `parameters`.
    pub covariance: BoundMatrix,
    /// Fit stage.
    pub stage: FitStage,
    /// Measurement on this surface, if one was used.
    pub measurement: Option<Measurement<'g>>,
    /// Path length from the start surface (mm).
    pub path_length: f64,
}

impl<'g> TrackState<'g> {
    /// Creates a predicted state without measurement.
    #[must_use]
    pub fn new(surface: &'g Surface, parameters: BoundVector, covariance: BoundMatrix) -> Self {
        Self {
            surface,
            parameters,
            covariance,
            stage: FitStage::Predicted,
            measurement: None,
            path_length: 0.0,
        }
    }

    /// Global representation.
    #[must_use]
    pub fn free(&self) -> FreeState {
        self.surface.to_global(&self.parameters)
    }

    /// Global position.
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        self.free().position
    }

    /// Global momentum.
    #[must_use]
    pub fn momentum(&self) -> Vector3<f64> {
        self.free().momentum()
    }

    /// Charge sign.
    #[must_use]
    pub fn charge(&self) -> f64 {
        self.free().charge()
    }
}

/// Category of a surface recorded during extrapolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Surface that can produce a measurement.
    Sensitive,
    /// Material-only surface.
    Passive,
}

/// One recorded surface crossing.
#[derive(Debug, Clone)]
pub struct ExtrapolationStep<'g> {
    /// State on the crossed surface, after material effects.
    pub state: TrackState<'g>,
    /// Category of the surface.
    pub kind: StepKind,
}

impl<'g> ExtrapolationStep<'g> {
    /// Surface of the step.
    #[must_use]
    pub fn surface(&self) -> &'g Surface {
        self.state.surface
    }

    /// Path length from the start surface.
    #[must_use]
    pub fn path_length(&self) -> f64 {
        self.state.path_length
    }
}

/// Fit result: smoothed states, one per accepted measurement, in
/// propagation order.
#[derive(Debug, Clone, Default)]
pub struct Track<'g> {
    states: Vec<TrackState<'g>>,
}

impl<'g> Track<'g> {
    /// A track without states.
    #[must_use]
    pub fn empty() -> Self {
        Self { states: Vec::new() }
    }

    /// Creates a track from smoothed states.
    #[must_use]
    pub fn from_states(states: Vec<TrackState<'g>>) -> Self {
        Self { states }
    }

    /// Number of states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true if no measurement was fitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// States in propagation order.
    #[must_use]
    pub fn states(&self) -> &[TrackState<'g>] {
        &self.states
    }

    /// Iterates over the states.
    pub fn iter(&self) -> impl Iterator<Item = &TrackState<'g>> {
        self.states.iter()
    }

    /// Innermost state.
    #[must_use]
    pub fn first(&self) -> Option<&TrackState<'g>> {
        self.states.first()
    }

    /// Outermost state.
    #[must_use]
    pub fn last(&self) -> Option<&TrackState<'g>> {
        self.states.last()
    }
}

impl<'g> IntoIterator for Track<'g> {
    type Item = TrackState<'g>;
    type IntoIter = std::vec::IntoIter<TrackState<'g>>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.into_iter()
    }
}
