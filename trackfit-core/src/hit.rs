//! Raw event records: tracker hits and generated particles.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single tracker hit as delivered by the readout.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawHit {
    /// Packed cell identifier (volume fields plus segmentation fields).
    pub cell_id: u64,
    /// Global hit position in millimetres.
    pub position: [f64; 3],
}

impl RawHit {
    /// Creates a new raw hit.
    #[inline]
    #[must_use]
    pub fn new(cell_id: u64, position: [f64; 3]) -> Self {
        Self { cell_id, position }
    }

    /// Returns the position as a vector.
    #[inline]
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    /// Transverse distance from the beam axis.
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.position[0].hypot(self.position[1])
    }
}

/// A generator-level particle, used to compare fit results with truth.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GenParticle {
    /// Momentum in GeV.
    pub momentum: [f64; 3],
    /// Energy in GeV.
    pub energy: f64,
    /// Charge in units of e.
    pub charge: f64,
    /// Production vertex in millimetres.
    #[cfg_attr(feature = "serde", serde(default))]
    pub vertex: [f64; 3],
}

impl GenParticle {
    /// Creates a particle produced at the origin.
    #[must_use]
    pub fn new(momentum: [f64; 3], energy: f64, charge: f64) -> Self {
        Self {
            momentum,
            energy,
            charge,
            vertex: [0.0; 3],
        }
    }

    /// Returns the momentum as a vector.
    #[must_use]
    pub fn momentum(&self) -> Vector3<f64> {
        Vector3::from(self.momentum)
    }

    /// Transverse momentum.
    #[must_use]
    pub fn pt(&self) -> f64 {
        self.momentum[0].hypot(self.momentum[1])
    }
}

/// Hits and particles of one event.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Tracker hits in readout order.
    pub hits: Vec<RawHit>,
    /// Generated particles.
    #[cfg_attr(feature = "serde", serde(default))]
    pub particles: Vec<GenParticle>,
}

impl Event {
    /// Returns the number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the event has no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
