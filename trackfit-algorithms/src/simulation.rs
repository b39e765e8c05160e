//! Pseudo-hit generation from generated particles.

use crate::material::MaterialEffects;
use crate::propagator::{ExtrapolationOptions, Propagator};
use crate::stepper::Stepper;
use log::{debug, warn};
use trackfit_core::parameters::{LOC0, LOC1};
use trackfit_core::{BoundMatrix, Error, Event, FreeState, GenParticle, RawHit, Result, TrackState};
use trackfit_geometry::{ReadoutSchemas, TrackingGeometry};

/// Propagates each particle through the geometry and records a quantised
/// hit on every sensitive planar surface it crosses.
///
/// # Errors
/// [`Error::DegenerateSeed`] for a particle without momentum or charge, and
/// fatal propagation errors.
pub fn simulate_event<S: Stepper, M: MaterialEffects>(
    geometry: &TrackingGeometry,
    readout: &ReadoutSchemas,
    propagator: &Propagator<S, M>,
    particles: &[GenParticle],
) -> Result<Event> {
    let options = ExtrapolationOptions::sensitive_only();
    let mut hits = Vec::new();

    for particle in particles {
        let momentum = particle.momentum();
        if momentum.norm() <= 0.0 || particle.charge == 0.0 {
            return Err(Error::DegenerateSeed(
                "particle without momentum or charge".to_string(),
            ));
        }
        let free = FreeState::from_momentum(particle.vertex.into(), momentum, particle.charge);
        let beamline = geometry.beamline();
        let start = TrackState::new(beamline, beamline.to_bound(&free), BoundMatrix::identity());
        let extrapolation = propagator.propagate(geometry, &start, &options)?;

        for step in extrapolation.planar_steps() {
            let Some(module) = step.surface().identifier() else {
                continue;
            };
            let parameters = &step.state.parameters;
            match readout.encode_hit(module, parameters[LOC0], parameters[LOC1]) {
                Ok(cell_id) => {
                    let position = step.state.position();
                    hits.push(RawHit::new(cell_id, position.into()));
                }
                Err(e) => warn!("cannot encode hit on {module}: {e}"),
            }
        }
        debug!(
            "particle pT={:.3}: {} steps, {:?}",
            particle.pt(),
            extrapolation.len(),
            extrapolation.termination()
        );
    }

    Ok(Event {
        hits,
        particles: particles.to_vec(),
    })
}
