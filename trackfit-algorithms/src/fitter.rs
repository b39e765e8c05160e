//! Kalman filter with Rauch-Tung-Striebel smoothing.
//!
//! The forward pass predicts from the last filtered state to the next
//! surface and, where a measurement exists, corrects with the gain-matrix
//! formalism. The backward pass revises every filtered state with the
//! information of all later measurements.

use crate::propagator::Predictor;
use log::{debug, warn};
use nalgebra::Matrix2;
use trackfit_core::parameters::{bound_difference, check_covariance, symmetrize, wrap_phi, PHI};
use trackfit_core::{
    BoundMatrix, Error, FitStage, Measurement, Result, Surface, Track, TrackState,
};

/// Gain-matrix measurement update.
#[derive(Clone, Copy, Debug, Default)]
pub struct GainMatrixUpdater;

impl GainMatrixUpdater {
    /// Corrects a predicted state with a measurement on the same surface.
    ///
    /// # Errors
    /// [`Error::ConfigError`] if the measurement lives on another surface and
    /// [`Error::NumericalDivergence`] for a broken predicted or updated
    /// covariance or a singular innovation covariance.
    pub fn update<'g>(
        &self,
        predicted: &TrackState<'g>,
        measurement: &Measurement<'g>,
    ) -> Result<TrackState<'g>> {
        if !measurement.surface().same_as(predicted.surface) {
            return Err(Error::ConfigError(format!(
                "measurement {} is not on the predicted surface",
                measurement.identifier()
            )));
        }

        check_covariance(&predicted.covariance)?;
        let h = Measurement::projector();
        let p = &predicted.covariance;
        let residual = measurement.residual(&predicted.parameters);
        let innovation: Matrix2<f64> = h * p * h.transpose() + measurement.covariance();
        let innovation_inv = innovation.try_inverse().ok_or_else(|| {
            Error::NumericalDivergence("singular innovation covariance".to_string())
        })?;
        let gain = p * h.transpose() * innovation_inv;

        let mut parameters = predicted.parameters + gain * residual;
        parameters[PHI] = wrap_phi(parameters[PHI]);
        let mut covariance = (BoundMatrix::identity() - gain * h) * p;
        symmetrize(&mut covariance);
        check_covariance(&covariance)?;

        let chi2 = (residual.transpose() * innovation_inv * residual)[(0, 0)];
        debug!(
            "update on {}: chi2={chi2:.4}",
            measurement.identifier()
        );

        Ok(TrackState {
            surface: predicted.surface,
            parameters,
            covariance,
            stage: FitStage::Updated,
            measurement: Some(*measurement),
            path_length: predicted.path_length,
        })
    }
}

/// One surface visited by the fitter, optionally measured.
#[derive(Clone, Copy, Debug)]
pub struct FitStep<'g> {
    /// Surface to predict onto.
    pub surface: &'g Surface,
    /// Measurement on that surface.
    pub measurement: Option<Measurement<'g>>,
}

impl<'g> FitStep<'g> {
    /// A measured step.
    #[must_use]
    pub fn measured(measurement: Measurement<'g>) -> Self {
        Self {
            surface: measurement.surface(),
            measurement: Some(measurement),
        }
    }

    /// A step without measurement (a hole).
    #[must_use]
    pub fn hole(surface: &'g Surface) -> Self {
        Self {
            surface,
            measurement: None,
        }
    }
}

/// Forward-pass record of one step.
struct FilterRecord<'g> {
    predicted: TrackState<'g>,
    filtered: TrackState<'g>,
    jacobian: BoundMatrix,
}

/// Kalman fitter over an explicit prediction strategy.
#[derive(Clone, Debug)]
pub struct KalmanFitter<P: Predictor> {
    predictor: P,
    updater: GainMatrixUpdater,
}

impl<P: Predictor> KalmanFitter<P> {
    /// Creates a fitter.
    pub fn new(predictor: P) -> Self {
        Self {
            predictor,
            updater: GainMatrixUpdater,
        }
    }

    /// Prediction strategy.
    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    /// Fits measurements, one step per measurement in the given order.
    ///
    /// # Errors
    /// See [`KalmanFitter::fit_steps`].
    pub fn fit<'g>(
        &self,
        seed: &TrackState<'g>,
        measurements: &[Measurement<'g>],
    ) -> Result<Track<'g>> {
        let steps: Vec<FitStep<'g>> = measurements.iter().copied().map(FitStep::measured).collect();
        self.fit_steps(seed, &steps)
    }

    /// Runs the forward filter and the backward smoother.
    ///
    /// Returns one smoothed state per measured step that the forward pass
    /// reached. A prediction that fails with a truncation error ends the
    /// forward pass early; without any measurement the track is empty.
    ///
    /// # Errors
    /// [`Error::NumericalDivergence`] for a broken seed covariance or one
    /// that breaks down during the fit, and [`Error::ConfigError`] for a
    /// measurement on the wrong surface.
    pub fn fit_steps<'g>(&self, seed: &TrackState<'g>, steps: &[FitStep<'g>]) -> Result<Track<'g>> {
        if steps.iter().all(|step| step.measurement.is_none()) {
            return Ok(Track::empty());
        }
        check_covariance(&seed.covariance)?;

        let records = self.forward(seed, steps)?;
        if !records.iter().any(|r| r.filtered.measurement.is_some()) {
            return Ok(Track::empty());
        }

        let smoothed = smooth(&records)?;
        let states: Vec<TrackState<'g>> = smoothed
            .into_iter()
            .filter(|state| state.measurement.is_some())
            .collect();
        debug!("fitted track with {} states", states.len());
        Ok(Track::from_states(states))
    }

    fn forward<'g>(
        &self,
        seed: &TrackState<'g>,
        steps: &[FitStep<'g>],
    ) -> Result<Vec<FilterRecord<'g>>> {
        let mut records: Vec<FilterRecord<'g>> = Vec::with_capacity(steps.len());
        let mut current = seed.clone();

        for step in steps {
            let prediction = match self.predictor.predict(&current, step.surface) {
                Ok(prediction) => prediction,
                Err(e) if e.is_truncation() => {
                    warn!(
                        "forward pass truncated after {} of {} steps: {e}",
                        records.len(),
                        steps.len()
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            let filtered = match &step.measurement {
                Some(measurement) => self.updater.update(&prediction.state, measurement)?,
                None => prediction.state.clone(),
            };
            current = filtered.clone();
            records.push(FilterRecord {
                predicted: prediction.state,
                filtered,
                jacobian: prediction.jacobian,
            });
        }
        Ok(records)
    }
}

/// Rauch-Tung-Striebel backward pass.
fn smooth<'g>(records: &[FilterRecord<'g>]) -> Result<Vec<TrackState<'g>>> {
    let Some(last) = records.last() else {
        return Ok(Vec::new());
    };
    let mut smoothed = vec![last.filtered.clone(); records.len()];
    let n = records.len();
    smoothed[n - 1].stage = FitStage::Smoothed;

    for k in (0..n - 1).rev() {
        let filtered = &records[k].filtered;
        let next = &records[k + 1];
        let predicted_inv = next.predicted.covariance.try_inverse().ok_or_else(|| {
            Error::NumericalDivergence(format!("singular predicted covariance at step {}", k + 1))
        })?;
        let gain = filtered.covariance * next.jacobian.transpose() * predicted_inv;

        let later = &smoothed[k + 1];
        let mut parameters = filtered.parameters
            + gain * bound_difference(&later.parameters, &next.predicted.parameters);
        parameters[PHI] = wrap_phi(parameters[PHI]);
        let mut covariance = filtered.covariance
            + gain * (later.covariance - next.predicted.covariance) * gain.transpose();
        symmetrize(&mut covariance);
        check_covariance(&covariance)?;

        smoothed[k] = TrackState {
            parameters,
            covariance,
            stage: FitStage::Smoothed,
            ..filtered.clone()
        };
    }
    Ok(smoothed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::NoMaterialEffects;
    use crate::propagator::Propagator;
    use crate::stepper::StraightLineStepper;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use trackfit_core::{BoundVector, Identifier, Pose, SurfaceBounds};

    fn plane_at_x(x: f64, id: u64) -> Surface {
        Surface::plane(
            Pose::from_axes(Vector3::y(), Vector3::z(), Vector3::x(), Vector3::new(x, 0.0, 0.0)),
            SurfaceBounds::Rectangle {
                half_x: 50.0,
                half_y: 50.0,
            },
        )
        .with_identifier(Identifier::new(id))
    }

    #[test]
    fn test_update_moves_towards_measurement() {
        let surface = plane_at_x(10.0, 1);
        let predicted = TrackState::new(
            &surface,
            BoundVector::new(0.0, 0.0, 0.0, 1.5, 0.1),
            BoundMatrix::identity(),
        );
        let measurement =
            Measurement::build(&surface, Identifier::new(1), 1.0, -1.0, 1.0, 1.0).unwrap();
        let updated = GainMatrixUpdater.update(&predicted, &measurement).unwrap();

        // Equal weights: half way.
        assert_relative_eq!(updated.parameters[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(updated.parameters[1], -0.5, epsilon = 1e-12);
        assert_relative_eq!(updated.covariance[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(updated.covariance[(2, 2)], 1.0, epsilon = 1e-12);
        assert_eq!(updated.stage, FitStage::Updated);
        assert!(updated.measurement.is_some());
    }

    #[test]
    fn test_update_rejects_foreign_surface() {
        let a = plane_at_x(10.0, 1);
        let b = plane_at_x(20.0, 2);
        let predicted = TrackState::new(&a, BoundVector::zeros(), BoundMatrix::identity());
        let measurement = Measurement::build(&b, Identifier::new(2), 0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(matches!(
            GainMatrixUpdater.update(&predicted, &measurement),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_smoothing_pulls_first_state_towards_later_measurements() {
        let start = plane_at_x(0.0, 0);
        let surfaces = [plane_at_x(10.0, 1), plane_at_x(20.0, 2), plane_at_x(30.0, 3)];
        let seed = TrackState::new(
            &start,
            BoundVector::new(0.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2, 0.1),
            BoundMatrix::identity() * 0.01,
        );
        // A track with slope 0.01 in y.
        let measurements: Vec<Measurement<'_>> = surfaces
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let x = 10.0 * (i as f64 + 1.0);
                Measurement::build(s, Identifier::new(i as u64 + 1), 0.01 * x, 0.0, 0.01, 0.01)
                    .unwrap()
            })
            .collect();

        let fitter = KalmanFitter::new(Propagator::new(StraightLineStepper, NoMaterialEffects));
        let track = fitter.fit(&seed, &measurements).unwrap();
        assert_eq!(track.len(), 3);
        assert!(track.iter().all(|s| s.stage == FitStage::Smoothed));

        let first = track.first().unwrap();
        assert_relative_eq!(first.parameters[0], 0.1, epsilon = 5e-3);
        assert_relative_eq!(first.parameters[2], 0.01, epsilon = 1e-3);
        assert!(check_covariance(&first.covariance).is_ok());
    }
}
