//! Detector surfaces and their local frames.

use crate::parameters::{direction_from_angles, BoundVector, FreeState, LOC0, LOC1, PHI, QOP, THETA};
use crate::Identifier;
use nalgebra::{Matrix3, Rotation3, Vector3};

/// Directions closer to parallel than this do not intersect.
const PARALLEL_EPSILON: f64 = 1e-12;

/// Shape tag of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Bounded plane (detector modules, disc boundaries).
    Plane,
    /// Cylinder around the local z axis (layers, beam pipe, boundaries).
    Cylinder,
    /// Line surface along the local z axis, used as the beamline perigee.
    Perigee,
}

/// Extent of a surface in its local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceBounds {
    /// No bounds.
    Unbounded,
    /// Rectangle centred on the local origin.
    Rectangle {
        /// Half extent along local x.
        half_x: f64,
        /// Half extent along local y.
        half_y: f64,
    },
    /// Annulus centred on the local origin.
    Disc {
        /// Inner radius.
        inner_radius: f64,
        /// Outer radius.
        outer_radius: f64,
    },
    /// Cylinder of finite length.
    Cylinder {
        /// Cylinder radius.
        radius: f64,
        /// Half length along local z.
        half_z: f64,
    },
}

/// Thin material layer attached to a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSlab {
    /// Thickness along the surface normal (mm).
    pub thickness: f64,
    /// Radiation length of the material (mm).
    pub radiation_length: f64,
    /// Mean ionisation loss per unit length (GeV/mm).
    pub energy_loss: f64,
}

impl MaterialSlab {
    /// Silicon of the given thickness.
    #[must_use]
    pub fn silicon(thickness: f64) -> Self {
        Self {
            thickness,
            radiation_length: 93.7,
            energy_loss: 3.87e-4,
        }
    }

    /// Beryllium, as used for beam pipes.
    #[must_use]
    pub fn beryllium(thickness: f64) -> Self {
        Self {
            thickness,
            radiation_length: 352.8,
            energy_loss: 2.95e-4,
        }
    }

    /// Thickness in units of radiation length.
    #[inline]
    #[must_use]
    pub fn thickness_in_x0(&self) -> f64 {
        self.thickness / self.radiation_length
    }
}

/// Rigid placement of a local frame in global coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Rotation from local to global axes.
    pub rotation: Rotation3<f64>,
    /// Position of the local origin.
    pub translation: Vector3<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Creates a pose from a rotation and a translation.
    #[must_use]
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The global frame.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros())
    }

    /// Translation only.
    #[must_use]
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(Rotation3::identity(), translation)
    }

    /// Builds a pose from the global images of the local axes.
    ///
    /// The axes must be orthonormal and right-handed.
    #[must_use]
    pub fn from_axes(
        local_x: Vector3<f64>,
        local_y: Vector3<f64>,
        normal: Vector3<f64>,
        translation: Vector3<f64>,
    ) -> Self {
        let matrix = Matrix3::from_columns(&[local_x, local_y, normal]);
        Self::new(Rotation3::from_matrix_unchecked(matrix), translation)
    }

    /// Maps a local point into the global frame.
    #[inline]
    #[must_use]
    pub fn to_global(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local + self.translation
    }

    /// Maps a global point into the local frame.
    #[inline]
    #[must_use]
    pub fn to_local(&self, global: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse_transform_vector(&(global - self.translation))
    }

    /// Maps a local direction into the global frame.
    #[inline]
    #[must_use]
    pub fn direction_to_global(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local
    }

    /// Maps a global direction into the local frame.
    #[inline]
    #[must_use]
    pub fn direction_to_local(&self, global: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse_transform_vector(global)
    }

    /// Global image of the local z axis.
    #[inline]
    #[must_use]
    pub fn z_axis(&self) -> Vector3<f64> {
        self.rotation * Vector3::z()
    }
}

/// An immutable detector surface.
///
/// Surfaces are owned by the geometry; everything else holds `&Surface`
/// and compares surfaces by identity (see [`Surface::same_as`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    kind: SurfaceKind,
    bounds: SurfaceBounds,
    pose: Pose,
    identifier: Option<Identifier>,
    material: Option<MaterialSlab>,
}

impl Surface {
    /// Creates a plane with the given bounds. The plane normal is the local z axis.
    #[must_use]
    pub fn plane(pose: Pose, bounds: SurfaceBounds) -> Self {
        Self {
            kind: SurfaceKind::Plane,
            bounds,
            pose,
            identifier: None,
            material: None,
        }
    }

    /// Creates a cylinder around the local z axis.
    #[must_use]
    pub fn cylinder(pose: Pose, radius: f64, half_z: f64) -> Self {
        Self {
            kind: SurfaceKind::Cylinder,
            bounds: SurfaceBounds::Cylinder { radius, half_z },
            pose,
            identifier: None,
            material: None,
        }
    }

    /// Creates a perigee (line) surface along global z through `point`.
    #[must_use]
    pub fn perigee(point: Vector3<f64>) -> Self {
        Self {
            kind: SurfaceKind::Perigee,
            bounds: SurfaceBounds::Unbounded,
            pose: Pose::from_translation(point),
            identifier: None,
            material: None,
        }
    }

    /// Attaches a module identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Attaches a material slab.
    #[must_use]
    pub fn with_material(mut self, material: MaterialSlab) -> Self {
        self.material = Some(material);
        self
    }

    /// Shape tag.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    /// Local bounds.
    #[inline]
    #[must_use]
    pub fn bounds(&self) -> SurfaceBounds {
        self.bounds
    }

    /// Placement.
    #[inline]
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Module identifier, if this is a sensitive module.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> Option<Identifier> {
        self.identifier
    }

    /// Attached material.
    #[inline]
    #[must_use]
    pub fn material(&self) -> Option<&MaterialSlab> {
        self.material.as_ref()
    }

    /// Identity comparison.
    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &Surface) -> bool {
        std::ptr::eq(self, other)
    }

    fn radius(&self) -> f64 {
        match self.bounds {
            SurfaceBounds::Cylinder { radius, .. } => radius,
            _ => 0.0,
        }
    }

    /// Surface normal at a global position.
    ///
    /// Planes return their local z axis; cylinders and lines the outward
    /// radial direction.
    #[must_use]
    pub fn normal(&self, position: &Vector3<f64>) -> Vector3<f64> {
        match self.kind {
            SurfaceKind::Plane => self.pose.z_axis(),
            SurfaceKind::Cylinder | SurfaceKind::Perigee => {
                let local = self.pose.to_local(position);
                let radial = Vector3::new(local.x, local.y, 0.0);
                let norm = radial.norm();
                if norm > 0.0 {
                    self.pose.direction_to_global(&(radial / norm))
                } else {
                    self.pose.direction_to_global(&Vector3::x())
                }
            }
        }
    }

    /// Checks whether a global position lies within the bounds.
    #[must_use]
    pub fn is_inside(&self, position: &Vector3<f64>, tolerance: f64) -> bool {
        let local = self.pose.to_local(position);
        match self.bounds {
            SurfaceBounds::Unbounded => true,
            SurfaceBounds::Rectangle { half_x, half_y } => {
                local.x.abs() <= half_x + tolerance && local.y.abs() <= half_y + tolerance
            }
            SurfaceBounds::Disc {
                inner_radius,
                outer_radius,
            } => {
                let r = local.x.hypot(local.y);
                r >= inner_radius - tolerance && r <= outer_radius + tolerance
            }
            SurfaceBounds::Cylinder { half_z, .. } => local.z.abs() <= half_z + tolerance,
        }
    }

    /// Converts bound parameters on this surface into a free state.
    #[must_use]
    pub fn to_global(&self, bound: &BoundVector) -> FreeState {
        let direction = direction_from_angles(bound[PHI], bound[THETA]);
        let local = match self.kind {
            SurfaceKind::Plane => Vector3::new(bound[LOC0], bound[LOC1], 0.0),
            SurfaceKind::Cylinder => {
                let radius = self.radius();
                let phi = bound[LOC0] / radius;
                Vector3::new(radius * phi.cos(), radius * phi.sin(), bound[LOC1])
            }
            SurfaceKind::Perigee => {
                let local_dir = self.pose.direction_to_local(&direction);
                let phi = local_dir.y.atan2(local_dir.x);
                Vector3::new(-bound[LOC0] * phi.sin(), bound[LOC0] * phi.cos(), bound[LOC1])
            }
        };
        FreeState {
            position: self.pose.to_global(&local),
            direction,
            qop: bound[QOP],
        }
    }

    /// Expresses a free state on this surface.
    ///
    /// The position is assumed to lie on the surface; it is projected into
    /// the local frame without further checks.
    #[must_use]
    pub fn to_bound(&self, free: &FreeState) -> BoundVector {
        let local = self.pose.to_local(&free.position);
        let (loc0, loc1) = match self.kind {
            SurfaceKind::Plane => (local.x, local.y),
            SurfaceKind::Cylinder => (self.radius() * local.y.atan2(local.x), local.z),
            SurfaceKind::Perigee => {
                let local_dir = self.pose.direction_to_local(&free.direction);
                let phi = local_dir.y.atan2(local_dir.x);
                (-local.x * phi.sin() + local.y * phi.cos(), local.z)
            }
        };
        BoundVector::new(loc0, loc1, free.phi(), free.theta(), free.qop)
    }

    /// Straight-line path lengths to the surface, ignoring bounds, ascending.
    fn straight_line_paths(&self, position: &Vector3<f64>, direction: &Vector3<f64>) -> Vec<f64> {
        let p = self.pose.to_local(position);
        let d = self.pose.direction_to_local(direction);
        match self.kind {
            SurfaceKind::Plane => {
                if d.z.abs() < PARALLEL_EPSILON {
                    Vec::new()
                } else {
                    vec![-p.z / d.z]
                }
            }
            SurfaceKind::Cylinder => {
                let radius = self.radius();
                let a = d.x * d.x + d.y * d.y;
                if a < PARALLEL_EPSILON {
                    return Vec::new();
                }
                let b = 2.0 * (p.x * d.x + p.y * d.y);
                let c = p.x * p.x + p.y * p.y - radius * radius;
                let discriminant = b * b - 4.0 * a * c;
                if discriminant < 0.0 {
                    return Vec::new();
                }
                let root = discriminant.sqrt();
                vec![(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)]
            }
            SurfaceKind::Perigee => {
                let a = d.x * d.x + d.y * d.y;
                if a < PARALLEL_EPSILON {
                    Vec::new()
                } else {
                    vec![-(p.x * d.x + p.y * d.y) / a]
                }
            }
        }
    }

    /// Straight-line path to the closest solution, in either direction.
    ///
    /// Used to refine a step onto a surface once the stepper is close to it.
    #[must_use]
    pub fn path_to(&self, position: &Vector3<f64>, direction: &Vector3<f64>) -> Option<f64> {
        self.straight_line_paths(position, direction)
            .into_iter()
            .min_by(|a, b| a.abs().total_cmp(&b.abs()))
    }

    /// Smallest straight-line path strictly beyond `min_path`, ignoring bounds.
    #[must_use]
    pub fn next_intersection(
        &self,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        min_path: f64,
    ) -> Option<f64> {
        self.straight_line_paths(position, direction)
            .into_iter()
            .find(|&s| s > min_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane_at_x(x: f64) -> Surface {
        Surface::plane(
            Pose::from_axes(Vector3::y(), Vector3::z(), Vector3::x(), Vector3::new(x, 0.0, 0.0)),
            SurfaceBounds::Rectangle {
                half_x: 50.0,
                half_y: 50.0,
            },
        )
    }

    #[test]
    fn test_plane_bound_roundtrip() {
        let surface = plane_at_x(10.0);
        let bound = BoundVector::new(1.5, -2.0, 0.1, 1.4, 0.5);
        let free = surface.to_global(&bound);
        assert_relative_eq!(free.position, Vector3::new(10.0, 1.5, -2.0), epsilon = 1e-12);
        let back = surface.to_bound(&free);
        assert_relative_eq!(back, bound, epsilon = 1e-12);
    }

    #[test]
    fn test_cylinder_bound_roundtrip() {
        let surface = Surface::cylinder(Pose::identity(), 30.0, 100.0);
        let bound = BoundVector::new(30.0 * 0.3, 12.0, 0.3, 1.2, -0.25);
        let free = surface.to_global(&bound);
        assert_relative_eq!(free.position.xy().norm(), 30.0, epsilon = 1e-12);
        let back = surface.to_bound(&free);
        assert_relative_eq!(back, bound, epsilon = 1e-12);
    }

    #[test]
    fn test_perigee_bound_roundtrip() {
        let surface = Surface::perigee(Vector3::zeros());
        let bound = BoundVector::new(0.02, -1.0, 0.7, 1.1, 0.4);
        let free = surface.to_global(&bound);
        // Closest approach: position is orthogonal to the transverse direction.
        let transverse = free.position.xy().dot(&free.direction.xy());
        assert_relative_eq!(transverse, 0.0, epsilon = 1e-12);
        let back = surface.to_bound(&free);
        assert_relative_eq!(back, bound, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_intersection_and_bounds() {
        let surface = plane_at_x(10.0);
        let origin = Vector3::zeros();
        let direction = Vector3::new(1.0, 0.0, 0.1).normalize();
        let path = surface.next_intersection(&origin, &direction, 0.0).unwrap();
        let hit = origin + direction * path;
        assert_relative_eq!(hit.x, 10.0, epsilon = 1e-12);
        assert!(surface.is_inside(&hit, 0.0));

        // Moving away from the plane has no forward solution.
        assert!(surface.next_intersection(&origin, &-direction, 0.0).is_none());
        assert!(surface.path_to(&origin, &-direction).unwrap() < 0.0);

        assert!(!surface.is_inside(&Vector3::new(10.0, 60.0, 0.0), 1e-6));
    }

    #[test]
    fn test_cylinder_intersection_from_inside() {
        let surface = Surface::cylinder(Pose::identity(), 25.0, 50.0);
        let origin = Vector3::zeros();
        let direction = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(surface.next_intersection(&origin, &direction, 0.0).unwrap(), 25.0);
        let normal = surface.normal(&Vector3::new(0.0, 25.0, 0.0));
        assert_relative_eq!(normal, Vector3::y(), epsilon = 1e-12);

        // Parallel to the axis never reaches the mantle.
        assert!(surface
            .next_intersection(&origin, &Vector3::z(), 0.0)
            .is_none());
    }

    #[test]
    fn test_disc_bounds() {
        let surface = Surface::plane(
            Pose::from_translation(Vector3::new(0.0, 0.0, 300.0)),
            SurfaceBounds::Disc {
                inner_radius: 10.0,
                outer_radius: 100.0,
            },
        );
        assert!(surface.is_inside(&Vector3::new(50.0, 0.0, 300.0), 0.0));
        assert!(!surface.is_inside(&Vector3::new(5.0, 0.0, 300.0), 0.0));
        assert_relative_eq!(surface.normal(&Vector3::zeros()), Vector3::z());
    }

    #[test]
    fn test_identity_comparison() {
        let a = plane_at_x(1.0);
        let b = a.clone();
        assert!(a.same_as(&a));
        assert!(!a.same_as(&b));
        assert_eq!(a, b);
    }
}
