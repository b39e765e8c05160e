//! Per-event reconstruction: hits to a fitted track.

use crate::fitter::{FitStep, KalmanFitter};
use crate::material::MaterialEffects;
use crate::propagator::{ExtrapolationOptions, Propagator, Termination};
use crate::seed::{HelixSeed, SeedConfig, SeedEstimator};
use crate::stepper::Stepper;
use log::{debug, info, warn};
use nalgebra::Vector3;
use rayon::prelude::*;
use trackfit_core::{
    Error, Event, Identifier, Measurement, RawHit, Result, StepKind, SurfaceKind, Track,
};
use trackfit_geometry::{ReadoutSchemas, SurfaceRegistry, TrackingGeometry};

/// Reconstruction parameters.
#[derive(Clone, Debug)]
pub struct ReconstructionConfig {
    /// Field along +z (T), used for the seed momentum scale.
    pub field: f64,
    /// Measurement uncertainty along local x (mm).
    pub sigma_loc0: f64,
    /// Measurement uncertainty along local y (mm).
    pub sigma_loc1: f64,
    /// Seed estimation.
    pub seed: SeedConfig,
    /// Navigation options for building the surface sequence.
    pub extrapolation: ExtrapolationOptions,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            field: 2.0,
            sigma_loc0: 0.001,
            sigma_loc1: 0.001,
            seed: SeedConfig::default(),
            extrapolation: ExtrapolationOptions::default(),
        }
    }
}

impl ReconstructionConfig {
    /// Sets the field.
    #[must_use]
    pub fn with_field(mut self, field: f64) -> Self {
        self.field = field;
        self
    }

    /// Sets both measurement uncertainties.
    #[must_use]
    pub fn with_sigma(mut self, sigma_loc0: f64, sigma_loc1: f64) -> Self {
        self.sigma_loc0 = sigma_loc0;
        self.sigma_loc1 = sigma_loc1;
        self
    }

    /// Sets the seed configuration.
    #[must_use]
    pub fn with_seed(mut self, seed: SeedConfig) -> Self {
        self.seed = seed;
        self
    }
}

/// Shared, read-only inputs of the reconstruction.
pub struct FitContext<'g, S: Stepper, M: MaterialEffects> {
    /// Tracking geometry.
    pub geometry: &'g TrackingGeometry,
    /// Identifier lookup for the geometry.
    pub registry: &'g SurfaceRegistry<'g>,
    /// Cell-id decoding.
    pub readout: &'g ReadoutSchemas,
    /// Fitter and its propagator.
    pub fitter: &'g KalmanFitter<Propagator<S, M>>,
    /// Parameters.
    pub config: &'g ReconstructionConfig,
}

/// Whether an event was fitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    /// Seeded, navigated and fitted.
    Fitted,
    /// Fewer than two usable hits; nothing to seed from.
    TooFewHits,
}

/// Result of reconstructing one event.
#[derive(Clone, Debug)]
pub struct EventFit<'g> {
    /// Outcome.
    pub status: EventStatus,
    /// Smoothed track; empty unless fitted.
    pub track: Track<'g>,
    /// Seed the fit started from.
    pub seed: Option<HelixSeed>,
    /// Hits turned into measurements.
    pub measurements: usize,
    /// Hits whose identifier is not in the registry or the readout.
    pub unknown_hits: usize,
    /// Measurements on surfaces the navigation did not cross.
    pub dropped_measurements: usize,
    /// How navigation ended.
    pub termination: Option<Termination>,
}

impl EventFit<'_> {
    fn skipped(measurements: usize, unknown_hits: usize) -> Self {
        Self {
            status: EventStatus::TooFewHits,
            track: Track::empty(),
            seed: None,
            measurements,
            unknown_hits,
            dropped_measurements: 0,
            termination: None,
        }
    }

    /// Summary of the innermost smoothed state; `None` for an empty track.
    #[must_use]
    pub fn summary(&self) -> Option<TrackSummary> {
        TrackSummary::from_track(&self.track)
    }
}

/// Momentum and position of a fitted track at its innermost state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSummary {
    /// Number of smoothed states.
    pub states: usize,
    /// Charge sign.
    pub charge: f64,
    /// Transverse momentum (GeV).
    pub pt: f64,
    /// Azimuthal angle of the momentum.
    pub phi: f64,
    /// Polar angle of the momentum.
    pub theta: f64,
    /// Global position of the innermost state (mm).
    pub position: [f64; 3],
}

impl TrackSummary {
    /// Summarises a fitted track; `None` for an empty track.
    #[must_use]
    pub fn from_track(track: &Track<'_>) -> Option<Self> {
        let free = track.first()?.free();
        Some(Self {
            states: track.len(),
            charge: free.charge(),
            pt: free.pt(),
            phi: free.phi(),
            theta: free.theta(),
            position: free.position.into(),
        })
    }
}

/// Hit turned into a measurement, with its global position.
struct DecodedHit<'g> {
    measurement: Measurement<'g>,
    position: Vector3<f64>,
}

fn decode_hits<'g, S: Stepper, M: MaterialEffects>(
    ctx: &FitContext<'g, S, M>,
    hits: &[RawHit],
) -> Result<(Vec<DecodedHit<'g>>, usize)> {
    let mut decoded = Vec::with_capacity(hits.len());
    let mut unknown = 0;
    for hit in hits {
        let located = ctx
            .readout
            .volume_id(hit.cell_id)
            .and_then(|id| Ok((id, ctx.readout.local_position(hit.cell_id)?)));
        let (identifier, (local0, local1)) = match located {
            Ok(found) => found,
            Err(e) => {
                debug!("skipping hit {:#x}: {e}", hit.cell_id);
                unknown += 1;
                continue;
            }
        };
        let surface = match ctx.registry.lookup(identifier) {
            Ok(surface) => surface,
            Err(Error::NotFound(id)) => {
                debug!("skipping hit {:#x}: no surface for {id}", hit.cell_id);
                unknown += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!(
            "hit {:#x} -> module {identifier}, local ({local0:.3}, {local1:.3})",
            hit.cell_id
        );
        let measurement = Measurement::build(
            surface,
            Identifier::new(hit.cell_id),
            local0,
            local1,
            ctx.config.sigma_loc0,
            ctx.config.sigma_loc1,
        )?;
        decoded.push(DecodedHit {
            measurement,
            position: hit.position(),
        });
    }
    Ok((decoded, unknown))
}

/// Reconstructs the track of one event.
///
/// Hits are decoded and looked up; unknown hits are skipped and counted.
/// The innermost and outermost hits seed a helix from the origin, the
/// propagator builds the surface sequence from the beamline and every
/// measurement is attached to the planar step on its surface. Passive
/// steps on other surfaces stay in the sequence as holes so that their
/// material enters the predictions. Events with fewer than two usable hits
/// are skipped with [`EventStatus::TooFewHits`].
///
/// # Errors
/// [`Error::DegenerateSeed`] for a degenerate triplet, and any fatal
/// propagation or fit error.
pub fn reconstruct_event<'g, S: Stepper, M: MaterialEffects>(
    ctx: &FitContext<'g, S, M>,
    event: &Event,
) -> Result<EventFit<'g>> {
    let (mut hits, unknown_hits) = decode_hits(ctx, &event.hits)?;
    if hits.len() < 2 {
        debug!("skipping event: {} usable hit(s), need at least 2", hits.len());
        return Ok(EventFit::skipped(hits.len(), unknown_hits));
    }
    hits.sort_by(|a, b| a.position.xy().norm().total_cmp(&b.position.xy().norm()));

    let estimator = SeedEstimator::new(ctx.config.seed.clone());
    let middle = hits[0].position;
    let outer = hits[hits.len() - 1].position;
    let seed = estimator.estimate(&outer, &middle, &Vector3::zeros(), ctx.config.field)?;
    let start = seed.to_track_state(ctx.geometry.beamline(), ctx.config.seed.covariance);

    let propagator = ctx.fitter.predictor();
    let extrapolation = propagator.propagate(ctx.geometry, &start, &ctx.config.extrapolation)?;

    let mut pending: Vec<Option<Measurement<'g>>> =
        hits.iter().map(|h| Some(h.measurement)).collect();
    let steps: Vec<FitStep<'g>> = extrapolation
        .steps()
        .iter()
        .filter(|step| {
            step.kind == StepKind::Passive || step.surface().kind() == SurfaceKind::Plane
        })
        .map(|step| {
            let surface = step.surface();
            let measurement = pending
                .iter_mut()
                .find(|m| m.is_some_and(|m| m.surface().same_as(surface)))
                .and_then(Option::take);
            FitStep {
                surface,
                measurement,
            }
        })
        .collect();

    let dropped_measurements = pending.iter().filter(|m| m.is_some()).count();
    if dropped_measurements > 0 {
        warn!("{dropped_measurements} measurement(s) not on the navigated surfaces");
    }

    let track = ctx.fitter.fit_steps(&start, &steps)?;
    info!(
        "event fitted: {} hits, {} unknown, {} states, q/pT seed {:.4}",
        event.hits.len(),
        unknown_hits,
        track.len(),
        seed.q_over_pt
    );

    Ok(EventFit {
        status: EventStatus::Fitted,
        track,
        seed: Some(seed),
        measurements: hits.len(),
        unknown_hits,
        dropped_measurements,
        termination: Some(extrapolation.termination()),
    })
}

/// Reconstructs events in parallel.
pub fn reconstruct_events<'g, S: Stepper, M: MaterialEffects>(
    ctx: &FitContext<'g, S, M>,
    events: &[Event],
) -> Vec<Result<EventFit<'g>>> {
    events
        .par_iter()
        .map(|event| reconstruct_event(ctx, event))
        .collect()
}
