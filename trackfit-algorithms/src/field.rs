//! Magnetic field providers.

use nalgebra::Vector3;

/// Field lookup in Tesla.
pub trait MagneticField: Send + Sync {
    /// Field vector at a global position (mm).
    fn field(&self, position: &Vector3<f64>) -> Vector3<f64>;
}

/// Homogeneous field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantField {
    value: Vector3<f64>,
}

impl ConstantField {
    /// Field with the given components.
    #[must_use]
    pub fn new(value: Vector3<f64>) -> Self {
        Self { value }
    }

    /// Solenoid field along +z.
    #[must_use]
    pub fn along_z(bz: f64) -> Self {
        Self::new(Vector3::new(0.0, 0.0, bz))
    }

    /// Field vector.
    #[must_use]
    pub fn value(&self) -> Vector3<f64> {
        self.value
    }
}

impl MagneticField for ConstantField {
    #[inline]
    fn field(&self, _position: &Vector3<f64>) -> Vector3<f64> {
        self.value
    }
}
