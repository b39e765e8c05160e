//! trackfit-algorithms: Seeding, propagation and Kalman fitting.
//!
//! This crate provides the reconstruction chain:
//! - **Seed** - Three-point helix estimate at the beamline
//! - **Propagator** - Runge-Kutta or straight-line stepping with material
//!   effects, surface-to-surface prediction and geometry navigation
//! - **Fitter** - Gain-matrix Kalman filter with RTS smoothing
//! - **Processing** - Per-event pipeline, parallel over events
//!
#![warn(missing_docs)]

mod field;
mod fitter;
mod material;
mod processing;
mod propagator;
mod seed;
mod simulation;
mod stepper;

pub use field::{ConstantField, MagneticField};
pub use fitter::{FitStep, GainMatrixUpdater, KalmanFitter};
pub use material::{HighlandMaterialEffects, MaterialEffects, NoMaterialEffects, PION_MASS};
pub use processing::{
    reconstruct_event, reconstruct_events, EventFit, EventStatus, FitContext,
    ReconstructionConfig, TrackSummary,
};
pub use propagator::{
    Extrapolation, ExtrapolationOptions, Prediction, Predictor, Propagator, PropagatorConfig,
    Termination,
};
pub use seed::{ChargeHypothesis, HelixSeed, SeedConfig, SeedEstimator};
pub use simulation::simulate_event;
pub use stepper::{RungeKuttaStepper, StraightLineStepper, Stepper};
