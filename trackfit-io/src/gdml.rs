//! GDML export of the tracking geometry.
//!
//! Every bounded surface becomes a thin solid placed at its pose:
//! rectangular planes as boxes, discs and cylinders as tubes. Tracking
//! volumes become assemblies nested like the volume tree, inside a world
//! box sized to the exported surfaces. Everything is made of a single
//! aluminium material; the export is meant for visualisation only.

use crate::{Error, Result};
use log::{debug, info, warn};
use nalgebra::Vector3;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use trackfit_core::{Surface, SurfaceBounds, SurfaceKind};
use trackfit_geometry::{SurfaceRole, TrackingGeometry, VolumeIndex};

/// Material assigned to every exported solid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GdmlMaterial {
    /// Material name.
    pub name: &'static str,
    /// Atomic mass (g/mole).
    pub a: f64,
    /// Atomic number.
    pub z: f64,
    /// Density (g/cm3).
    pub density: f64,
}

/// Aluminium, A = 26, Z = 13, density 3.
pub const ALUMINIUM: GdmlMaterial = GdmlMaterial {
    name: "Aluminium",
    a: 26.0,
    z: 13.0,
    density: 3.0,
};

/// Thickness given to surfaces without material (mm).
const DEFAULT_THICKNESS: f64 = 0.1;

/// Margin added around the exported surfaces for the world box (mm).
const WORLD_MARGIN: f64 = 10.0;

enum Solid {
    Box { x: f64, y: f64, z: f64 },
    Tube { rmin: f64, rmax: f64, z: f64 },
}

impl Solid {
    fn of(surface: &Surface) -> Option<Self> {
        let thickness = surface
            .material()
            .map_or(DEFAULT_THICKNESS, |m| m.thickness)
            .max(DEFAULT_THICKNESS);
        match (surface.kind(), surface.bounds()) {
            (SurfaceKind::Plane, SurfaceBounds::Rectangle { half_x, half_y }) => Some(Solid::Box {
                x: 2.0 * half_x,
                y: 2.0 * half_y,
                z: thickness,
            }),
            (
                SurfaceKind::Plane,
                SurfaceBounds::Disc {
                    inner_radius,
                    outer_radius,
                },
            ) => Some(Solid::Tube {
                rmin: inner_radius,
                rmax: outer_radius,
                z: thickness,
            }),
            (SurfaceKind::Cylinder, SurfaceBounds::Cylinder { radius, half_z }) => {
                Some(Solid::Tube {
                    rmin: (radius - 0.5 * thickness).max(0.0),
                    rmax: radius + 0.5 * thickness,
                    z: 2.0 * half_z,
                })
            }
            _ => None,
        }
    }

    /// Largest distance of the solid from its own origin.
    fn extent(&self) -> f64 {
        match *self {
            Solid::Box { x, y, z } => 0.5 * x.hypot(y).hypot(z),
            Solid::Tube { rmax, z, .. } => rmax.hypot(0.5 * z),
        }
    }

    fn write_xml(&self, name: &str, out: &mut String) {
        let _ = match *self {
            Solid::Box { x, y, z } => writeln!(
                out,
                "    <box name=\"{name}\" x=\"{x}\" y=\"{y}\" z=\"{z}\" lunit=\"mm\"/>"
            ),
            Solid::Tube { rmin, rmax, z } => writeln!(
                out,
                "    <tube name=\"{name}\" rmin=\"{rmin}\" rmax=\"{rmax}\" z=\"{z}\" \
                 startphi=\"0\" deltaphi=\"360\" aunit=\"deg\" lunit=\"mm\"/>"
            ),
        };
    }
}

/// Replaces characters GDML names cannot carry.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn assembly_name(geometry: &TrackingGeometry, volume: VolumeIndex) -> Result<String> {
    Ok(format!("{}_assembly", sanitize(&geometry.volume(volume)?.name)))
}

/// Exported surface with the names of its GDML objects.
struct ExportedSurface<'a> {
    surface: &'a Surface,
    logical: String,
}

/// Writes a [`TrackingGeometry`] as GDML.
pub struct GdmlWriter {
    material: GdmlMaterial,
    include_boundaries: bool,
}

impl Default for GdmlWriter {
    fn default() -> Self {
        Self {
            material: ALUMINIUM,
            include_boundaries: false,
        }
    }
}

impl GdmlWriter {
    /// Creates a writer using [`ALUMINIUM`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also exports volume boundary surfaces.
    #[must_use]
    pub fn with_boundaries(mut self, include: bool) -> Self {
        self.include_boundaries = include;
        self
    }

    /// Uses a different material.
    #[must_use]
    pub fn with_material(mut self, material: GdmlMaterial) -> Self {
        self.material = material;
        self
    }

    /// Renders the geometry as a GDML document.
    ///
    /// # Errors
    /// Returns [`Error::GeometryError`] for a malformed volume tree and
    /// [`Error::InvalidFormat`] when nothing can be exported.
    pub fn render(&self, geometry: &TrackingGeometry) -> Result<String> {
        let mut solids = String::new();
        let mut logicals = String::new();
        let mut assemblies = String::new();
        let mut exported = 0usize;
        let mut world_half = 0.0_f64;

        let top = geometry.highest_volume();
        let walk = geometry.walk(top)?;
        let mut volume_surfaces: Vec<Vec<ExportedSurface<'_>>> =
            (0..geometry.volumes().len()).map(|_| Vec::new()).collect();

        for (index, placed) in geometry.surfaces().iter().enumerate() {
            if placed.role == SurfaceRole::Boundary && !self.include_boundaries {
                continue;
            }
            let Some(solid) = Solid::of(&placed.surface) else {
                debug!("surface {index} has no GDML solid, skipped");
                continue;
            };
            let centre: Vector3<f64> = placed.surface.pose().translation;
            world_half = world_half.max(centre.abs().max() + solid.extent());

            let base = match placed.surface.identifier() {
                Some(id) => format!("sensor_{:x}", id.value()),
                None => format!("surface_{index}"),
            };
            let solid_name = format!("{base}_solid");
            let logical = format!("{base}_lv");
            solid.write_xml(&solid_name, &mut solids);
            let _ = writeln!(
                logicals,
                "    <volume name=\"{logical}\">\n      \
                 <materialref ref=\"{}\"/>\n      \
                 <solidref ref=\"{solid_name}\"/>\n    </volume>",
                self.material.name
            );
            volume_surfaces[placed.volume.0].push(ExportedSurface {
                surface: &placed.surface,
                logical,
            });
            exported += 1;
        }

        if exported == 0 {
            return Err(Error::InvalidFormat(
                "geometry has no exportable surfaces".to_string(),
            ));
        }

        // Descendants come after their ancestors in the walk.
        for &(volume, _) in walk.iter().rev() {
            if volume == top {
                continue;
            }
            let _ = writeln!(
                assemblies,
                "    <assembly name=\"{}\">",
                assembly_name(geometry, volume)?
            );
            write_contents(geometry, volume, &volume_surfaces, &mut assemblies)?;
            let _ = writeln!(assemblies, "    </assembly>");
        }

        let world_half = world_half + WORLD_MARGIN;
        let world_name = sanitize(&geometry.volume(top)?.name);
        let world_size = 2.0 * world_half;
        let _ = writeln!(
            solids,
            "    <box name=\"{world_name}_box\" x=\"{world_size}\" y=\"{world_size}\" \
             z=\"{world_size}\" lunit=\"mm\"/>"
        );

        let mut world = String::new();
        let _ = writeln!(world, "    <volume name=\"{world_name}\">");
        let _ = writeln!(
            world,
            "      <materialref ref=\"{}\"/>\n      <solidref ref=\"{world_name}_box\"/>",
            self.material.name
        );
        write_contents(geometry, top, &volume_surfaces, &mut world)?;
        let _ = writeln!(world, "    </volume>");

        let m = &self.material;
        let mut doc = String::new();
        doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        doc.push_str(
            "<gdml xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
             xsi:noNamespaceSchemaLocation=\"http://service-spi.web.cern.ch/service-spi/app/releases/GDML/schema/gdml.xsd\">\n",
        );
        doc.push_str("  <define/>\n");
        let _ = writeln!(
            doc,
            "  <materials>\n    <material name=\"{}\" Z=\"{}\">\n      \
             <D value=\"{}\" unit=\"g/cm3\"/>\n      <atom value=\"{}\"/>\n    \
             </material>\n  </materials>",
            m.name, m.z, m.density, m.a
        );
        let _ = write!(doc, "  <solids>\n{solids}  </solids>\n");
        let _ = write!(doc, "  <structure>\n{logicals}{assemblies}{world}  </structure>\n");
        let _ = writeln!(
            doc,
            "  <setup name=\"Default\" version=\"1.0\">\n    <world ref=\"{world_name}\"/>\n  </setup>"
        );
        doc.push_str("</gdml>\n");

        info!(
            "GDML export: {exported} surfaces, {} volumes, world half size {world_half:.1} mm",
            walk.len()
        );
        Ok(doc)
    }

    /// Writes the GDML document to a file.
    ///
    /// # Errors
    /// See [`GdmlWriter::render`]; also fails if the file cannot be written.
    pub fn write<P: AsRef<Path>>(&self, geometry: &TrackingGeometry, path: P) -> Result<()> {
        let doc = self.render(geometry)?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(doc.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Placements of a volume's own surfaces and of its child assemblies.
fn write_contents(
    geometry: &TrackingGeometry,
    volume: VolumeIndex,
    volume_surfaces: &[Vec<ExportedSurface<'_>>],
    out: &mut String,
) -> Result<()> {
    for exported in &volume_surfaces[volume.0] {
        write_physvol(out, &exported.logical, exported.surface);
    }
    for &child in &geometry.volume(volume)?.children {
        let _ = writeln!(
            out,
            "      <physvol>\n        <volumeref ref=\"{}\"/>\n      </physvol>",
            assembly_name(geometry, child)?
        );
    }
    if volume_surfaces[volume.0].is_empty() && geometry.volume(volume)?.children.is_empty() {
        warn!("volume {} exports nothing", geometry.volume(volume)?.name);
    }
    Ok(())
}

/// Placement of one surface with its pose.
///
/// GDML rotations are passive, so the inverse of the local-to-global
/// rotation is written.
fn write_physvol(out: &mut String, logical: &str, surface: &Surface) {
    let pose = surface.pose();
    let t = pose.translation;
    let (rx, ry, rz) = pose.rotation.inverse().euler_angles();
    let _ = writeln!(
        out,
        "      <physvol>\n        <volumeref ref=\"{logical}\"/>\n        \
         <position name=\"{logical}_pos\" x=\"{}\" y=\"{}\" z=\"{}\" unit=\"mm\"/>\n        \
         <rotation name=\"{logical}_rot\" x=\"{rx}\" y=\"{ry}\" z=\"{rz}\" unit=\"rad\"/>\n      \
         </physvol>",
        t.x, t.y, t.z
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackfit_core::{Identifier, MaterialSlab, Pose};
    use trackfit_geometry::GeometryBuilder;

    fn small_geometry() -> TrackingGeometry {
        let mut builder = GeometryBuilder::new("world");
        let barrel = builder.add_volume("barrel", builder.top()).unwrap();
        let layer = builder.add_layer("layer0", barrel).unwrap();
        let module = Surface::plane(
            Pose::from_axes(
                Vector3::y(),
                Vector3::z(),
                Vector3::x(),
                Vector3::new(30.0, 0.0, 0.0),
            ),
            SurfaceBounds::Rectangle {
                half_x: 10.0,
                half_y: 20.0,
            },
        )
        .with_identifier(Identifier::new(0x2a))
        .with_material(MaterialSlab::silicon(0.3));
        builder.add_surface(layer, module, SurfaceRole::Sensitive).unwrap();
        builder
            .add_surface(
                layer,
                Surface::cylinder(Pose::identity(), 20.0, 100.0),
                SurfaceRole::Passive,
            )
            .unwrap();
        builder
            .add_boundary(
                builder.top(),
                Surface::cylinder(Pose::identity(), 50.0, 150.0),
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_render_structure() {
        let doc = GdmlWriter::new().render(&small_geometry()).unwrap();
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<material name=\"Aluminium\" Z=\"13\">"));
        assert!(doc.contains("<atom value=\"26\"/>"));
        assert!(doc.contains("<box name=\"sensor_2a_solid\" x=\"20\" y=\"40\" z=\"0.3\""));
        assert!(doc.contains("<tube name=\"surface_1_solid\""));
        assert!(doc.contains("<assembly name=\"barrel_assembly\">"));
        assert!(doc.contains("<volumeref ref=\"barrel_assembly\"/>"));
        assert!(doc.contains("<world ref=\"world\"/>"));
        assert!(!doc.contains("surface_2_solid"));

        // Assemblies are defined before the world references them.
        let assembly = doc.find("<assembly name=\"barrel_assembly\">").unwrap();
        let world = doc.find("<volume name=\"world\">").unwrap();
        assert!(assembly < world);
    }

    #[test]
    fn test_boundaries_optional() {
        let doc = GdmlWriter::new()
            .with_boundaries(true)
            .render(&small_geometry())
            .unwrap();
        assert!(doc.contains("surface_2_solid"));
    }

    #[test]
    fn test_empty_geometry_rejected() {
        let geometry = GeometryBuilder::new("world").build().unwrap();
        assert!(matches!(
            GdmlWriter::new().render(&geometry),
            Err(Error::InvalidFormat(_))
        ));
    }
}
