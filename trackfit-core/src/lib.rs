//! trackfit-core: Core types for charged-particle track reconstruction.
//!
//! This crate provides the shared vocabulary of the workspace: module
//! identifiers, surfaces and their local frames, bound and free track
//! parameters, measurements, track states and the error taxonomy.
//!

pub mod error;
pub mod hit;
pub mod identifier;
pub mod measurement;
pub mod parameters;
pub mod surface;
pub mod track;

pub use error::{Error, Result};
pub use hit::{Event, GenParticle, RawHit};
pub use identifier::Identifier;
pub use measurement::{Measurement, Projector};
pub use parameters::{BoundMatrix, BoundVector, FreeState, C_LIGHT};
pub use surface::{MaterialSlab, Pose, Surface, SurfaceBounds, SurfaceKind};
pub use track::{ExtrapolationStep, FitStage, StepKind, Track, TrackState};
