//! Tracking geometry arena.
//!
//! Volumes, layers and surfaces live in flat vectors and refer to each other
//! by index. Containment is walked with an explicit worklist, capped at
//! [`MAX_DEPTH`] and guarded against cycles, so malformed descriptions fail
//! instead of recursing without bound.

use crate::{Error, Result};
use log::debug;
use nalgebra::Vector3;
use trackfit_core::{Identifier, Surface};

/// Maximum volume nesting depth.
pub const MAX_DEPTH: usize = 64;

/// Index of a volume in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeIndex(pub usize);

/// Index of a layer in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerIndex(pub usize);

/// Index of a surface in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceIndex(pub usize);

/// Role of a surface during navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    /// Detector module producing measurements.
    Sensitive,
    /// Material only (supports, beam pipe).
    Passive,
    /// Outer boundary of a volume.
    Boundary,
}

/// A surface together with its place in the hierarchy.
#[derive(Debug, Clone)]
pub struct PlacedSurface {
    /// The surface.
    pub surface: Surface,
    /// Navigation role.
    pub role: SurfaceRole,
    /// Owning volume.
    pub volume: VolumeIndex,
    /// Owning layer; `None` for boundaries.
    pub layer: Option<LayerIndex>,
}

/// A layer groups the surfaces at one radius or one z position.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Layer name.
    pub name: String,
    /// Owning volume.
    pub volume: VolumeIndex,
    /// Surfaces of the layer.
    pub surfaces: Vec<SurfaceIndex>,
}

/// A node of the volume tree.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Containing volume; `None` for the top volume.
    pub parent: Option<VolumeIndex>,
    /// Contained volumes.
    pub children: Vec<VolumeIndex>,
    /// Layers directly in this volume.
    pub layers: Vec<LayerIndex>,
    /// Boundary surfaces of this volume.
    pub boundaries: Vec<SurfaceIndex>,
}

impl Volume {
    fn new(name: &str, parent: Option<VolumeIndex>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            layers: Vec::new(),
            boundaries: Vec::new(),
        }
    }
}

/// Immutable tracking geometry.
#[derive(Debug, Clone)]
pub struct TrackingGeometry {
    volumes: Vec<Volume>,
    layers: Vec<Layer>,
    surfaces: Vec<PlacedSurface>,
    beamline: Surface,
}

impl TrackingGeometry {
    /// The outermost volume.
    #[must_use]
    pub fn highest_volume(&self) -> VolumeIndex {
        VolumeIndex(0)
    }

    /// Beamline perigee surface.
    #[must_use]
    pub fn beamline(&self) -> &Surface {
        &self.beamline
    }

    /// All volumes.
    #[must_use]
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// All layers.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// All placed surfaces.
    #[must_use]
    pub fn surfaces(&self) -> &[PlacedSurface] {
        &self.surfaces
    }

    /// Volume by index.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an index outside the arena.
    pub fn volume(&self, index: VolumeIndex) -> Result<&Volume> {
        self.volumes
            .get(index.0)
            .ok_or_else(|| Error::InvalidConfig(format!("no volume {}", index.0)))
    }

    /// Placed surface by index.
    #[must_use]
    pub fn surface(&self, index: SurfaceIndex) -> Option<&PlacedSurface> {
        self.surfaces.get(index.0)
    }

    /// Finds a volume by name.
    #[must_use]
    pub fn find_volume(&self, name: &str) -> Option<VolumeIndex> {
        self.volumes
            .iter()
            .position(|v| v.name == name)
            .map(VolumeIndex)
    }

    /// Sensitive surfaces with their identifiers.
    pub fn sensitive_surfaces(&self) -> impl Iterator<Item = (Identifier, &Surface)> {
        self.surfaces
            .iter()
            .filter(|p| p.role == SurfaceRole::Sensitive)
            .filter_map(|p| p.surface.identifier().map(|id| (id, &p.surface)))
    }

    /// Volumes below `root`, including it, with their depth.
    ///
    /// # Errors
    /// Returns [`Error::DepthExceeded`] beyond [`MAX_DEPTH`] and
    /// [`Error::CyclicContainment`] if a volume is reached twice.
    pub fn walk(&self, root: VolumeIndex) -> Result<Vec<(VolumeIndex, usize)>> {
        walk_volumes(&self.volumes, root)
    }

    /// Layer surfaces of every volume below `root`, boundaries excluded.
    ///
    /// # Errors
    /// See [`TrackingGeometry::walk`].
    pub fn layer_surfaces(&self, root: VolumeIndex) -> Result<Vec<SurfaceIndex>> {
        let mut out = Vec::new();
        for (volume, _) in self.walk(root)? {
            for layer in &self.volumes[volume.0].layers {
                out.extend_from_slice(&self.layers[layer.0].surfaces);
            }
        }
        Ok(out)
    }

    /// Boundary surfaces of a volume.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an unknown volume.
    pub fn boundaries(&self, volume: VolumeIndex) -> Result<&[SurfaceIndex]> {
        Ok(&self.volume(volume)?.boundaries)
    }
}

fn walk_volumes(volumes: &[Volume], root: VolumeIndex) -> Result<Vec<(VolumeIndex, usize)>> {
    if root.0 >= volumes.len() {
        return Err(Error::InvalidConfig(format!("no volume {}", root.0)));
    }
    let mut visited = vec![false; volumes.len()];
    let mut order = Vec::new();
    let mut stack = vec![(root, 0_usize)];

    while let Some((index, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        let volume = &volumes[index.0];
        if std::mem::replace(&mut visited[index.0], true) {
            return Err(Error::CyclicContainment(volume.name.clone()));
        }
        order.push((index, depth));
        // Reverse so children come out in declaration order.
        for &child in volume.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    Ok(order)
}

/// Incremental construction of a [`TrackingGeometry`].
#[derive(Debug, Clone)]
pub struct GeometryBuilder {
    volumes: Vec<Volume>,
    layers: Vec<Layer>,
    surfaces: Vec<PlacedSurface>,
    beamline: Vector3<f64>,
}

impl GeometryBuilder {
    /// Starts a geometry with the named top volume.
    #[must_use]
    pub fn new(top_volume: &str) -> Self {
        Self {
            volumes: vec![Volume::new(top_volume, None)],
            layers: Vec::new(),
            surfaces: Vec::new(),
            beamline: Vector3::zeros(),
        }
    }

    /// Index of the top volume.
    #[must_use]
    pub fn top(&self) -> VolumeIndex {
        VolumeIndex(0)
    }

    /// Moves the beamline to pass through `point`.
    #[must_use]
    pub fn with_beamline(mut self, point: Vector3<f64>) -> Self {
        self.beamline = point;
        self
    }

    fn check_volume(&self, index: VolumeIndex) -> Result<()> {
        if index.0 < self.volumes.len() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!("no volume {}", index.0)))
        }
    }

    /// Adds a volume inside `parent`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an unknown parent.
    pub fn add_volume(&mut self, name: &str, parent: VolumeIndex) -> Result<VolumeIndex> {
        self.check_volume(parent)?;
        let index = VolumeIndex(self.volumes.len());
        self.volumes.push(Volume::new(name, Some(parent)));
        self.volumes[parent.0].children.push(index);
        Ok(index)
    }

    /// Places an existing volume inside another one.
    ///
    /// The volume is detached from its previous parent. Cycles are only
    /// detected by [`GeometryBuilder::build`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for unknown volumes or the top volume.
    pub fn move_volume(&mut self, volume: VolumeIndex, parent: VolumeIndex) -> Result<()> {
        self.check_volume(volume)?;
        self.check_volume(parent)?;
        if volume == self.top() {
            return Err(Error::InvalidConfig("cannot move the top volume".to_string()));
        }
        if let Some(old) = self.volumes[volume.0].parent {
            self.volumes[old.0].children.retain(|&c| c != volume);
        }
        self.volumes[volume.0].parent = Some(parent);
        self.volumes[parent.0].children.push(volume);
        Ok(())
    }

    /// Adds an empty layer to a volume.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an unknown volume.
    pub fn add_layer(&mut self, name: &str, volume: VolumeIndex) -> Result<LayerIndex> {
        self.check_volume(volume)?;
        let index = LayerIndex(self.layers.len());
        self.layers.push(Layer {
            name: name.to_string(),
            volume,
            surfaces: Vec::new(),
        });
        self.volumes[volume.0].layers.push(index);
        Ok(index)
    }

    /// Adds a sensitive or passive surface to a layer.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an unknown layer, a boundary
    /// role, or a sensitive surface without identifier.
    pub fn add_surface(
        &mut self,
        layer: LayerIndex,
        surface: Surface,
        role: SurfaceRole,
    ) -> Result<SurfaceIndex> {
        let volume = self
            .layers
            .get(layer.0)
            .map(|l| l.volume)
            .ok_or_else(|| Error::InvalidConfig(format!("no layer {}", layer.0)))?;
        match role {
            SurfaceRole::Boundary => {
                return Err(Error::InvalidConfig(
                    "boundaries belong to volumes, not layers".to_string(),
                ));
            }
            SurfaceRole::Sensitive if surface.identifier().is_none() => {
                return Err(Error::InvalidConfig(
                    "sensitive surface without identifier".to_string(),
                ));
            }
            _ => {}
        }
        let index = SurfaceIndex(self.surfaces.len());
        self.surfaces.push(PlacedSurface {
            surface,
            role,
            volume,
            layer: Some(layer),
        });
        self.layers[layer.0].surfaces.push(index);
        Ok(index)
    }

    /// Adds a boundary surface to a volume.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for an unknown volume.
    pub fn add_boundary(&mut self, volume: VolumeIndex, surface: Surface) -> Result<SurfaceIndex> {
        self.check_volume(volume)?;
        let index = SurfaceIndex(self.surfaces.len());
        self.surfaces.push(PlacedSurface {
            surface,
            role: SurfaceRole::Boundary,
            volume,
            layer: None,
        });
        self.volumes[volume.0].boundaries.push(index);
        Ok(index)
    }

    /// Validates the hierarchy and freezes the geometry.
    ///
    /// # Errors
    /// Returns [`Error::CyclicContainment`] or [`Error::DepthExceeded`] for
    /// malformed hierarchies and [`Error::InvalidConfig`] for volumes not
    /// reachable from the top volume.
    pub fn build(self) -> Result<TrackingGeometry> {
        let reached = walk_volumes(&self.volumes, self.top())?;
        if reached.len() != self.volumes.len() {
            return Err(Error::InvalidConfig(format!(
                "{} volume(s) detached from the top volume",
                self.volumes.len() - reached.len()
            )));
        }
        debug!(
            "geometry built: {} volumes, {} layers, {} surfaces",
            self.volumes.len(),
            self.layers.len(),
            self.surfaces.len()
        );
        Ok(TrackingGeometry {
            volumes: self.volumes,
            layers: self.layers,
            surfaces: self.surfaces,
            beamline: Surface::perigee(self.beamline),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackfit_core::{Pose, SurfaceBounds};

    fn module(id: u64, x: f64) -> Surface {
        Surface::plane(
            Pose::from_axes(Vector3::y(), Vector3::z(), Vector3::x(), Vector3::new(x, 0.0, 0.0)),
            SurfaceBounds::Rectangle {
                half_x: 10.0,
                half_y: 10.0,
            },
        )
        .with_identifier(Identifier::new(id))
    }

    #[test]
    fn test_walk_order_and_depth() {
        let mut builder = GeometryBuilder::new("world");
        let barrel = builder.add_volume("barrel", builder.top()).unwrap();
        let inner = builder.add_volume("inner", barrel).unwrap();
        let endcap = builder.add_volume("endcap", builder.top()).unwrap();
        let geometry = builder.build().unwrap();

        let walked = geometry.walk(geometry.highest_volume()).unwrap();
        assert_eq!(
            walked,
            vec![(VolumeIndex(0), 0), (barrel, 1), (inner, 2), (endcap, 1)]
        );
        assert_eq!(geometry.find_volume("inner"), Some(inner));
    }

    #[test]
    fn test_layer_surfaces_of_subtree() {
        let mut builder = GeometryBuilder::new("world");
        let barrel = builder.add_volume("barrel", builder.top()).unwrap();
        let layer = builder.add_layer("l0", barrel).unwrap();
        builder
            .add_surface(layer, module(1, 10.0), SurfaceRole::Sensitive)
            .unwrap();
        builder
            .add_surface(layer, module(2, 20.0), SurfaceRole::Sensitive)
            .unwrap();
        builder
            .add_boundary(builder.top(), Surface::cylinder(Pose::identity(), 100.0, 100.0))
            .unwrap();
        let geometry = builder.build().unwrap();

        assert_eq!(geometry.layer_surfaces(geometry.highest_volume()).unwrap().len(), 2);
        assert_eq!(geometry.boundaries(geometry.highest_volume()).unwrap().len(), 1);
        assert_eq!(geometry.sensitive_surfaces().count(), 2);
    }

    #[test]
    fn test_cycle_detected() {
        let mut builder = GeometryBuilder::new("world");
        let a = builder.add_volume("a", builder.top()).unwrap();
        let b = builder.add_volume("b", a).unwrap();
        builder.move_volume(a, b).unwrap();
        // `a` is now unreachable from the top and contains itself through `b`.
        assert!(matches!(
            walk_volumes(&builder.volumes, a),
            Err(Error::CyclicContainment(_))
        ));
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_depth_cap() {
        let mut builder = GeometryBuilder::new("world");
        let mut parent = builder.top();
        for i in 0..=MAX_DEPTH {
            parent = builder.add_volume(&format!("v{i}"), parent).unwrap();
        }
        assert!(matches!(
            builder.build(),
            Err(Error::DepthExceeded { max_depth: MAX_DEPTH })
        ));
    }

    #[test]
    fn test_sensitive_needs_identifier() {
        let mut builder = GeometryBuilder::new("world");
        let layer = builder.add_layer("l0", builder.top()).unwrap();
        let bare = Surface::cylinder(Pose::identity(), 10.0, 10.0);
        assert!(builder
            .add_surface(layer, bare.clone(), SurfaceRole::Sensitive)
            .is_err());
        assert!(builder
            .add_surface(layer, bare, SurfaceRole::Passive)
            .is_ok());
    }
}
