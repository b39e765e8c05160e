use approx::assert_relative_eq;
use nalgebra::Vector3;
use trackfit_algorithms::{
    reconstruct_event, reconstruct_events, simulate_event, ConstantField, EventStatus,
    ExtrapolationOptions, FitContext, HighlandMaterialEffects, KalmanFitter, NoMaterialEffects,
    Propagator, ReconstructionConfig, RungeKuttaStepper, Termination,
};
use trackfit_core::{BoundMatrix, Event, FitStage, FreeState, GenParticle, RawHit, TrackState};
use trackfit_geometry::{GeometryConfig, SurfaceRegistry};

const FIELD: f64 = 2.0;

fn fitter() -> KalmanFitter<Propagator<RungeKuttaStepper<ConstantField>, NoMaterialEffects>> {
    KalmanFitter::new(Propagator::new(
        RungeKuttaStepper::new(ConstantField::along_z(FIELD)),
        NoMaterialEffects,
    ))
}

fn pitch_config() -> ReconstructionConfig {
    let twelve = 12.0_f64.sqrt();
    ReconstructionConfig::default()
        .with_field(FIELD)
        .with_sigma(0.05 / twelve, 0.1 / twelve)
}

#[test]
fn test_simulated_event_roundtrip() {
    let config = GeometryConfig::generic_detector();
    let geometry = config.build().unwrap();
    let readout = config.readout().unwrap();
    let registry = SurfaceRegistry::from_geometry(&geometry).unwrap();
    let fitter = fitter();
    let reco = pitch_config();

    let particle = GenParticle::new([1.0, 0.3, 0.2], 1.07, -1.0);
    let event = simulate_event(&geometry, &readout, fitter.predictor(), &[particle]).unwrap();
    assert!(event.hits.len() >= 5, "only {} hits", event.hits.len());
    for hit in &event.hits {
        assert!(registry.lookup(readout.volume_id(hit.cell_id).unwrap()).is_ok());
    }

    let ctx = FitContext {
        geometry: &geometry,
        registry: &registry,
        readout: &readout,
        fitter: &fitter,
        config: &reco,
    };
    let fit = reconstruct_event(&ctx, &event).unwrap();

    assert_eq!(fit.status, EventStatus::Fitted);
    assert_eq!(fit.termination, Some(Termination::Boundary));
    assert_eq!(fit.unknown_hits, 0);
    assert_eq!(fit.measurements, event.hits.len());
    assert!(fit.track.len() >= 3);
    let seed = fit.seed.unwrap();
    assert_relative_eq!(seed.charge(), -1.0);
    assert_relative_eq!(seed.pt(), particle.pt(), max_relative = 0.05);

    let first = fit.track.first().unwrap();
    assert_eq!(first.stage, FitStage::Smoothed);
    assert_relative_eq!(first.charge(), -1.0);
    let pt = first.momentum().xy().norm();
    assert_relative_eq!(pt, particle.pt(), max_relative = 0.05);

    let paths: Vec<f64> = fit.track.iter().map(|s| s.path_length).collect();
    assert!(paths.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_unknown_hits_are_skipped() {
    let config = GeometryConfig::generic_detector();
    let geometry = config.build().unwrap();
    let readout = config.readout().unwrap();
    let registry = SurfaceRegistry::from_geometry(&geometry).unwrap();
    let fitter = fitter();
    let reco = pitch_config();

    let particle = GenParticle::new([0.4, -0.9, 0.1], 1.0, 1.0);
    let mut event = simulate_event(&geometry, &readout, fitter.predictor(), &[particle]).unwrap();
    event.hits.push(RawHit::new(0x5, [1.0, 1.0, 0.0]));

    let ctx = FitContext {
        geometry: &geometry,
        registry: &registry,
        readout: &readout,
        fitter: &fitter,
        config: &reco,
    };
    let fit = reconstruct_event(&ctx, &event).unwrap();
    assert_eq!(fit.unknown_hits, 1);
    assert_eq!(fit.measurements, event.hits.len() - 1);
    assert_relative_eq!(fit.seed.unwrap().charge(), 1.0);
}

#[test]
fn test_events_in_parallel() {
    let config = GeometryConfig::generic_detector();
    let geometry = config.build().unwrap();
    let readout = config.readout().unwrap();
    let registry = SurfaceRegistry::from_geometry(&geometry).unwrap();
    let fitter = fitter();
    let reco = pitch_config();

    let particles = [
        GenParticle::new([1.5, 0.5, 0.3], 1.6, 1.0),
        GenParticle::new([-0.8, 0.9, -0.2], 1.2, -1.0),
    ];
    let mut events: Vec<Event> = particles
        .iter()
        .map(|p| simulate_event(&geometry, &readout, fitter.predictor(), &[*p]).unwrap())
        .collect();
    events.push(Event::default());

    let ctx = FitContext {
        geometry: &geometry,
        registry: &registry,
        readout: &readout,
        fitter: &fitter,
        config: &reco,
    };
    let results = reconstruct_events(&ctx, &events);
    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().is_ok_and(|fit| !fit.track.is_empty()));
    assert!(results[1].as_ref().is_ok_and(|fit| !fit.track.is_empty()));

    let empty = results[2].as_ref().unwrap();
    assert_eq!(empty.status, EventStatus::TooFewHits);
    assert!(empty.track.is_empty());
    assert!(empty.seed.is_none());
    assert!(empty.summary().is_none());
}

#[test]
fn test_single_hit_event_is_skipped() {
    let config = GeometryConfig::generic_detector();
    let geometry = config.build().unwrap();
    let readout = config.readout().unwrap();
    let registry = SurfaceRegistry::from_geometry(&geometry).unwrap();
    let fitter = fitter();
    let reco = pitch_config();

    let particle = GenParticle::new([1.0, 0.5, 0.0], 1.2, 1.0);
    let mut event = simulate_event(&geometry, &readout, fitter.predictor(), &[particle]).unwrap();
    event.hits.truncate(1);

    let ctx = FitContext {
        geometry: &geometry,
        registry: &registry,
        readout: &readout,
        fitter: &fitter,
        config: &reco,
    };
    let fit = reconstruct_event(&ctx, &event).unwrap();
    assert_eq!(fit.status, EventStatus::TooFewHits);
    assert_eq!(fit.measurements, 1);
    assert!(fit.termination.is_none());
}

/// Radii of the sensitive crossings of a particle from the origin.
fn crossing_radii(pt: f64, phi: f64, charge: f64) -> (Vec<f64>, Termination) {
    let geometry = GeometryConfig::generic_detector().build().unwrap();
    let propagator = Propagator::new(
        RungeKuttaStepper::new(ConstantField::along_z(FIELD)),
        NoMaterialEffects,
    );
    let momentum = Vector3::new(pt * phi.cos(), pt * phi.sin(), 0.0);
    let free = FreeState::from_momentum(Vector3::zeros(), momentum, charge);
    let beamline = geometry.beamline();
    let start = TrackState::new(beamline, beamline.to_bound(&free), BoundMatrix::identity());
    let extrapolation = propagator
        .propagate(&geometry, &start, &ExtrapolationOptions::default())
        .unwrap();
    let radii = extrapolation
        .sensitive_steps()
        .map(|step| step.state.position().xy().norm())
        .collect();
    (radii, extrapolation.termination())
}

#[test]
fn test_low_pt_track_crosses_every_barrel_layer() {
    // R = 333 mm: the sagitta between the two outer layers exceeds the
    // straight-line pre-selection slack.
    for phi in [2.41, 0.3, -1.7] {
        let (radii, termination) = crossing_radii(0.2, phi, -1.0);
        assert_eq!(termination, Termination::Boundary, "phi={phi}");
        for layer in [32.0, 72.0, 122.0, 182.0, 252.0] {
            assert!(
                radii.iter().any(|r| (layer - 0.5..layer + 10.0).contains(r)),
                "phi={phi}: no crossing of the r={layer} layer in {radii:?}"
            );
        }
        assert!(radii.windows(2).all(|w| w[0] < w[1]), "phi={phi}: {radii:?}");
    }
}

#[test]
fn test_beam_pipe_material_enters_the_fit() {
    let config = GeometryConfig::generic_detector();
    let geometry = config.build().unwrap();
    let readout = config.readout().unwrap();
    let registry = SurfaceRegistry::from_geometry(&geometry).unwrap();
    let reco = pitch_config();
    let particle = GenParticle::new([0.6, 0.4, 0.1], 0.8, 1.0);

    let plain = fitter();
    let event = simulate_event(&geometry, &readout, plain.predictor(), &[particle]).unwrap();
    let with_material = KalmanFitter::new(Propagator::new(
        RungeKuttaStepper::new(ConstantField::along_z(FIELD)),
        HighlandMaterialEffects::default(),
    ));

    let fit_plain = reconstruct_event(
        &FitContext {
            geometry: &geometry,
            registry: &registry,
            readout: &readout,
            fitter: &plain,
            config: &reco,
        },
        &event,
    )
    .unwrap();
    let fit_material = reconstruct_event(
        &FitContext {
            geometry: &geometry,
            registry: &registry,
            readout: &readout,
            fitter: &with_material,
            config: &reco,
        },
        &event,
    )
    .unwrap();

    assert_eq!(fit_plain.track.len(), fit_material.track.len());
    // Scattering in the beam pipe and the modules widens the innermost angles.
    let plain_first = fit_plain.track.first().unwrap();
    let material_first = fit_material.track.first().unwrap();
    assert!(material_first.covariance[(2, 2)] > plain_first.covariance[(2, 2)]);
}
