//! trackfit-geometry: tracking geometry, cell-id decoding and surface registry.
//!
//! # Key Components
//!
//! - [`TrackingGeometry`] - Arena of volumes, layers and surfaces
//! - [`BitFieldSchema`] / [`ReadoutSchemas`] - Pure cell-id decoding
//! - [`SurfaceRegistry`] - Identifier to surface lookup
//! - [`GeometryConfig`] - JSON detector description with a generic default
//!

mod cellid;
mod error;
mod geometry;
mod registry;

pub use cellid::{
    BitField, BitFieldSchema, FieldValues, ReadoutSchemas, Region, Segmentation,
    BARREL_DESCRIPTOR, ENDCAP_DESCRIPTOR, SYSTEM_FIELD,
};
pub use error::{Error, Result};
pub use geometry::{
    GeometryBuilder, Layer, LayerIndex, PlacedSurface, SurfaceIndex, SurfaceRole,
    TrackingGeometry, Volume, VolumeIndex, MAX_DEPTH,
};
pub use registry::SurfaceRegistry;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use trackfit_core::{MaterialSlab, Pose, Surface, SurfaceBounds};

/// Tangential overlap of neighbouring modules.
const MODULE_OVERLAP: f64 = 1.02;

/// Barrel layer made of flat staves parallel to the beam.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarrelLayerConfig {
    /// Distance of the stave centres from the beam (mm).
    pub radius: f64,
    /// Half length of the layer along z (mm).
    pub half_length: f64,
    /// Number of staves around phi.
    pub staves: u32,
    /// Modules per stave along z.
    pub modules_per_stave: u32,
    /// Silicon thickness (mm).
    pub thickness: f64,
    /// Readout system code.
    pub system: i64,
}

/// Endcap disc made of petals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndcapDiscConfig {
    /// Disc position along z (mm); the sign selects the side.
    pub z: f64,
    /// Inner radius (mm).
    pub inner_radius: f64,
    /// Outer radius (mm).
    pub outer_radius: f64,
    /// Number of petals around phi.
    pub petals: u32,
    /// Silicon thickness (mm).
    pub thickness: f64,
    /// Readout system code.
    pub system: i64,
}

/// Beryllium beam pipe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamPipeConfig {
    /// Radius (mm).
    pub radius: f64,
    /// Half length (mm).
    pub half_length: f64,
    /// Wall thickness (mm).
    pub thickness: f64,
}

/// Readout descriptors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadoutConfig {
    /// Barrel descriptor.
    pub barrel: String,
    /// Endcap descriptor.
    pub endcap: String,
    /// Systems read out by the barrel schema.
    pub barrel_systems: Vec<i64>,
    /// Systems read out by the endcap schema.
    pub endcap_systems: Vec<i64>,
    /// Cell segmentation.
    pub segmentation: Segmentation,
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            barrel: BARREL_DESCRIPTOR.to_string(),
            endcap: ENDCAP_DESCRIPTOR.to_string(),
            barrel_systems: vec![10, 12],
            endcap_systems: vec![11, 13],
            segmentation: Segmentation::default(),
        }
    }
}

/// Detector description used to build a [`TrackingGeometry`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Barrel layers, innermost first.
    pub barrel_layers: Vec<BarrelLayerConfig>,
    /// Endcap discs.
    pub endcap_discs: Vec<EndcapDiscConfig>,
    /// Optional beam pipe.
    pub beam_pipe: Option<BeamPipeConfig>,
    /// Radius of the world boundary (mm).
    pub world_radius: f64,
    /// Half length of the world boundary (mm).
    pub world_half_length: f64,
    /// Readout layout.
    pub readout: ReadoutConfig,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self::generic_detector()
    }
}

// Intermediate structs for the JSON schema; absent sections fall back to
// the generic detector.
#[derive(Deserialize)]
struct JsonConfig {
    tracker: JsonTracker,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonTracker {
    barrel: Option<Vec<BarrelLayerConfig>>,
    endcap: Option<Vec<EndcapDiscConfig>>,
    beam_pipe: Option<BeamPipeConfig>,
    world: Option<JsonWorld>,
    readout: Option<ReadoutConfig>,
}

#[derive(Deserialize)]
struct JsonWorld {
    radius: f64,
    half_length: f64,
}

impl GeometryConfig {
    /// A five-layer pixel/strip barrel with two endcap discs per side.
    #[must_use]
    pub fn generic_detector() -> Self {
        let barrel_layers = [(32.0, 12), (72.0, 24), (122.0, 40), (182.0, 56), (252.0, 80)]
            .into_iter()
            .map(|(radius, staves)| BarrelLayerConfig {
                radius,
                half_length: 500.0,
                staves,
                modules_per_stave: 10,
                thickness: 0.3,
                system: 10,
            })
            .collect();
        let endcap_discs = [600.0, 700.0, -600.0, -700.0]
            .into_iter()
            .map(|z: f64| EndcapDiscConfig {
                z,
                inner_radius: 40.0,
                outer_radius: 260.0,
                petals: 32,
                thickness: 0.3,
                system: if z > 0.0 { 11 } else { 13 },
            })
            .collect();
        Self {
            barrel_layers,
            endcap_discs,
            beam_pipe: Some(BeamPipeConfig {
                radius: 20.0,
                half_length: 780.0,
                thickness: 0.8,
            }),
            world_radius: 300.0,
            world_half_length: 800.0,
            readout: ReadoutConfig::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Fails on I/O, JSON or validation errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Fails on JSON or validation errors.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let tracker = config.tracker;
        let defaults = Self::generic_detector();

        let (world_radius, world_half_length) = match tracker.world {
            Some(world) => (world.radius, world.half_length),
            None => (defaults.world_radius, defaults.world_half_length),
        };
        let config = Self {
            barrel_layers: tracker.barrel.unwrap_or(defaults.barrel_layers),
            endcap_discs: tracker.endcap.unwrap_or(defaults.endcap_discs),
            beam_pipe: tracker.beam_pipe.or(defaults.beam_pipe),
            world_radius,
            world_half_length,
            readout: tracker.readout.unwrap_or(defaults.readout),
        };

        // Validate once at load time
        config.validate()?;
        Ok(config)
    }

    /// Checks that every element is well formed and inside the world.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending element.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if !(self.world_radius > 0.0 && self.world_half_length > 0.0) {
            return invalid("world dimensions must be positive".to_string());
        }
        for (i, layer) in self.barrel_layers.iter().enumerate() {
            if !(layer.radius > 0.0 && layer.radius < self.world_radius) {
                return invalid(format!("barrel layer {i}: radius outside the world"));
            }
            if !(layer.half_length > 0.0 && layer.half_length < self.world_half_length) {
                return invalid(format!("barrel layer {i}: half length outside the world"));
            }
            if layer.staves < 3 || layer.modules_per_stave == 0 {
                return invalid(format!("barrel layer {i}: needs >= 3 staves and >= 1 module"));
            }
        }
        for (i, disc) in self.endcap_discs.iter().enumerate() {
            if disc.z.abs() >= self.world_half_length {
                return invalid(format!("endcap disc {i}: z outside the world"));
            }
            if !(disc.inner_radius >= 0.0
                && disc.inner_radius < disc.outer_radius
                && disc.outer_radius < self.world_radius)
            {
                return invalid(format!("endcap disc {i}: bad radii"));
            }
            if disc.petals < 3 {
                return invalid(format!("endcap disc {i}: needs >= 3 petals"));
            }
        }
        if let Some(pipe) = &self.beam_pipe {
            if !(pipe.radius > 0.0 && pipe.radius < self.world_radius) {
                return invalid("beam pipe radius outside the world".to_string());
            }
        }
        Ok(())
    }

    /// Parses the readout descriptors.
    ///
    /// # Errors
    /// Returns schema errors for malformed descriptors.
    pub fn readout(&self) -> Result<ReadoutSchemas> {
        ReadoutSchemas::new(
            BitFieldSchema::parse(&self.readout.barrel)?,
            BitFieldSchema::parse(&self.readout.endcap)?,
            self.readout.barrel_systems.clone(),
            self.readout.endcap_systems.clone(),
            self.readout.segmentation.clone(),
        )
    }

    /// Builds the geometry. Module identifiers come from the readout.
    ///
    /// # Errors
    /// Fails for invalid configurations or identifiers that do not fit the
    /// readout.
    pub fn build(&self) -> Result<TrackingGeometry> {
        self.validate()?;
        let readout = self.readout()?;
        let mut builder = GeometryBuilder::new("world");
        let world = builder.top();

        if let Some(pipe) = &self.beam_pipe {
            let layer = builder.add_layer("beam_pipe", world)?;
            let surface = Surface::cylinder(Pose::identity(), pipe.radius, pipe.half_length)
                .with_material(MaterialSlab::beryllium(pipe.thickness));
            builder.add_surface(layer, surface, SurfaceRole::Passive)?;
        }

        let barrel = builder.add_volume("barrel", world)?;
        for (i, config) in self.barrel_layers.iter().enumerate() {
            let layer = builder.add_layer(&format!("barrel_layer_{i}"), barrel)?;
            add_barrel_layer(&mut builder, layer, i, config, &readout)?;
        }

        for (side, name) in [(1.0, "endcap_pos"), (-1.0, "endcap_neg")] {
            let discs: Vec<_> = self
                .endcap_discs
                .iter()
                .filter(|d| d.z * side > 0.0)
                .collect();
            if discs.is_empty() {
                continue;
            }
            let volume = builder.add_volume(name, world)?;
            for (i, config) in discs.into_iter().enumerate() {
                let layer = builder.add_layer(&format!("{name}_disc_{i}"), volume)?;
                add_endcap_disc(&mut builder, layer, i, config, &readout)?;
            }
        }

        builder.add_boundary(
            world,
            Surface::cylinder(Pose::identity(), self.world_radius, self.world_half_length),
        )?;
        for side in [1.0, -1.0] {
            builder.add_boundary(
                world,
                Surface::plane(
                    Pose::from_translation(Vector3::new(0.0, 0.0, side * self.world_half_length)),
                    SurfaceBounds::Disc {
                        inner_radius: 0.0,
                        outer_radius: self.world_radius,
                    },
                ),
            )?;
        }

        builder.build()
    }
}

#[allow(clippy::cast_possible_wrap)]
fn add_barrel_layer(
    builder: &mut GeometryBuilder,
    layer: LayerIndex,
    index: usize,
    config: &BarrelLayerConfig,
    readout: &ReadoutSchemas,
) -> Result<()> {
    let staves = f64::from(config.staves);
    let modules = f64::from(config.modules_per_stave);
    let half_x = config.radius * (PI / staves).tan() * MODULE_OVERLAP;
    let half_y = config.half_length / modules;

    for stave in 0..config.staves {
        let phi = 2.0 * PI * f64::from(stave) / staves;
        let (sin_phi, cos_phi) = phi.sin_cos();
        let normal = Vector3::new(cos_phi, sin_phi, 0.0);
        let local_x = Vector3::new(-sin_phi, cos_phi, 0.0);
        for module in 0..config.modules_per_stave {
            let z = -config.half_length + (2.0 * f64::from(module) + 1.0) * half_y;
            let identifier = readout.module_id(
                config.system,
                &[
                    ("layer", index as i64),
                    ("rod", i64::from(stave)),
                    ("module", i64::from(module)),
                ],
            )?;
            let surface = Surface::plane(
                Pose::from_axes(
                    local_x,
                    Vector3::z(),
                    normal,
                    normal * config.radius + Vector3::new(0.0, 0.0, z),
                ),
                SurfaceBounds::Rectangle { half_x, half_y },
            )
            .with_identifier(identifier)
            .with_material(MaterialSlab::silicon(config.thickness));
            builder.add_surface(layer, surface, SurfaceRole::Sensitive)?;
        }
    }
    Ok(())
}

#[allow(clippy::cast_possible_wrap)]
fn add_endcap_disc(
    builder: &mut GeometryBuilder,
    layer: LayerIndex,
    index: usize,
    config: &EndcapDiscConfig,
    readout: &ReadoutSchemas,
) -> Result<()> {
    let petals = f64::from(config.petals);
    let centre = 0.5 * (config.inner_radius + config.outer_radius);
    let half_x = 0.5 * (config.outer_radius - config.inner_radius);
    let half_y = centre * (PI / petals).tan() * MODULE_OVERLAP;

    for petal in 0..config.petals {
        let phi = 2.0 * PI * f64::from(petal) / petals;
        let (sin_phi, cos_phi) = phi.sin_cos();
        let radial = Vector3::new(cos_phi, sin_phi, 0.0);
        let identifier = readout.module_id(
            config.system,
            &[
                ("layer", index as i64),
                ("petal", i64::from(petal)),
                ("module", 0),
            ],
        )?;
        let surface = Surface::plane(
            Pose::from_axes(
                radial,
                Vector3::new(-sin_phi, cos_phi, 0.0),
                Vector3::z(),
                radial * centre + Vector3::new(0.0, 0.0, config.z),
            ),
            SurfaceBounds::Rectangle { half_x, half_y },
        )
        .with_identifier(identifier)
        .with_material(MaterialSlab::silicon(config.thickness));
        builder.add_surface(layer, surface, SurfaceRole::Sensitive)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_detector_builds() {
        let config = GeometryConfig::generic_detector();
        let geometry = config.build().unwrap();
        let expected_barrel: u32 = config
            .barrel_layers
            .iter()
            .map(|l| l.staves * l.modules_per_stave)
            .sum();
        let expected_endcap: u32 = config.endcap_discs.iter().map(|d| d.petals).sum();
        assert_eq!(
            geometry.sensitive_surfaces().count(),
            (expected_barrel + expected_endcap) as usize
        );
        assert_eq!(geometry.boundaries(geometry.highest_volume()).unwrap().len(), 3);
        assert!(geometry.find_volume("endcap_neg").is_some());
    }

    #[test]
    fn test_json_partial_config() {
        let json = r#"{
            "tracker": {
                "barrel": [
                    { "radius": 50.0, "half_length": 200.0, "staves": 8,
                      "modules_per_stave": 4, "thickness": 0.2, "system": 12 }
                ],
                "endcap": []
            }
        }"#;

        let config = GeometryConfig::from_json(json).expect("Should parse partial config");
        assert_eq!(config.barrel_layers.len(), 1);
        assert!(config.endcap_discs.is_empty());
        assert_eq!(config.world_radius, 300.0); // Default
        assert!(config.beam_pipe.is_some()); // Default

        let geometry = config.build().unwrap();
        assert_eq!(geometry.sensitive_surfaces().count(), 32);
        assert!(geometry.find_volume("endcap_pos").is_none());
    }

    #[test]
    fn test_json_empty_tracker() {
        let config = GeometryConfig::from_json(r#"{ "tracker": {} }"#).unwrap();
        assert_eq!(config, GeometryConfig::generic_detector());
    }

    #[test]
    fn test_json_rejects_layer_outside_world() {
        let json = r#"{
            "tracker": {
                "world": { "radius": 100.0, "half_length": 100.0 },
                "endcap": []
            }
        }"#;
        assert!(matches!(
            GeometryConfig::from_json(json),
            Err(Error::InvalidConfig(_))
        ));
    }
}
