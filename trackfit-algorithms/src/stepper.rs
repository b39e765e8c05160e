//! Single-step integrators for the equations of motion.

use crate::field::MagneticField;
use nalgebra::Vector3;
use trackfit_core::{FreeState, C_LIGHT};

/// Advances a free state along its trajectory.
pub trait Stepper: Send + Sync {
    /// Moves the state by path length `h` (mm); negative `h` steps backwards.
    fn step(&self, state: &FreeState, h: f64) -> FreeState;

    /// Local trajectory curvature (1/mm) at the state.
    fn curvature(&self, _state: &FreeState) -> f64 {
        0.0
    }
}

/// Field-free straight-line motion.
#[derive(Clone, Copy, Debug, Default)]
pub struct StraightLineStepper;

impl Stepper for StraightLineStepper {
    fn step(&self, state: &FreeState, h: f64) -> FreeState {
        FreeState {
            position: state.position + state.direction * h,
            ..*state
        }
    }
}

/// Classical fourth-order Runge-Kutta integration of the Lorentz force.
///
/// Integrates `dr/ds = t`, `dt/ds = (q/p) c (t x B)` in path length `s`.
#[derive(Clone, Debug)]
pub struct RungeKuttaStepper<F: MagneticField> {
    field: F,
}

impl<F: MagneticField> RungeKuttaStepper<F> {
    /// Creates a stepper for the given field.
    pub fn new(field: F) -> Self {
        Self { field }
    }

    /// Field provider.
    pub fn field(&self) -> &F {
        &self.field
    }

    #[inline]
    fn bending(&self, lambda: f64, position: &Vector3<f64>, direction: &Vector3<f64>) -> Vector3<f64> {
        direction.cross(&self.field.field(position)) * lambda
    }
}

impl<F: MagneticField> Stepper for RungeKuttaStepper<F> {
    fn step(&self, state: &FreeState, h: f64) -> FreeState {
        let lambda = state.qop * C_LIGHT;
        let r = state.position;
        let t1 = state.direction;
        let half = 0.5 * h;

        let k1 = self.bending(lambda, &r, &t1);
        let t2 = t1 + k1 * half;
        let k2 = self.bending(lambda, &(r + t1 * half), &t2);
        let t3 = t1 + k2 * half;
        let k3 = self.bending(lambda, &(r + t2 * half), &t3);
        let t4 = t1 + k3 * h;
        let k4 = self.bending(lambda, &(r + t3 * h), &t4);

        let position = r + (t1 + (t2 + t3) * 2.0 + t4) * (h / 6.0);
        let direction = t1 + (k1 + (k2 + k3) * 2.0 + k4) * (h / 6.0);
        FreeState::new(position, direction, state.qop)
    }

    fn curvature(&self, state: &FreeState) -> f64 {
        self.bending(state.qop * C_LIGHT, &state.position, &state.direction)
            .norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ConstantField;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_straight_line() {
        let state = FreeState::new(Vector3::zeros(), Vector3::new(0.0, 3.0, 4.0), 1.0);
        let moved = StraightLineStepper.step(&state, 10.0);
        assert_relative_eq!(moved.position, Vector3::new(0.0, 6.0, 8.0), epsilon = 1e-12);
    }

    #[test]
    fn test_full_circle_returns_home() {
        let bz = 2.0;
        let pt = 1.0;
        let stepper = RungeKuttaStepper::new(ConstantField::along_z(bz));
        let radius = pt / (C_LIGHT * bz);
        let mut state = FreeState::from_momentum(Vector3::zeros(), Vector3::new(pt, 0.0, 0.0), 1.0);
        let steps = 2000;
        let h = 2.0 * PI * radius / f64::from(steps);
        for _ in 0..steps {
            state = stepper.step(&state, h);
        }
        assert_relative_eq!(state.position, Vector3::zeros(), epsilon = 1e-3);
        assert_relative_eq!(state.direction, Vector3::x(), epsilon = 1e-6);
    }

    #[test]
    fn test_positive_charge_turns_clockwise() {
        let stepper = RungeKuttaStepper::new(ConstantField::along_z(2.0));
        let state = FreeState::from_momentum(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0), 1.0);
        let moved = stepper.step(&state, 100.0);
        assert!(moved.position.y < 0.0);
        let negative = FreeState { qop: -1.0, ..state };
        assert!(stepper.step(&negative, 100.0).position.y > 0.0);
    }

    #[test]
    fn test_helix_curvature() {
        let stepper = RungeKuttaStepper::new(ConstantField::along_z(2.0));
        let state = FreeState::from_momentum(Vector3::zeros(), Vector3::new(0.5, 0.0, 0.5), -1.0);
        // Helix curvature is c * B * pT / p^2.
        let expected = C_LIGHT * 2.0 * 0.5 / 0.5;
        assert_relative_eq!(stepper.curvature(&state), expected, max_relative = 1e-12);
        assert_relative_eq!(StraightLineStepper.curvature(&state), 0.0);
    }
}
