//! trackfit command-line interface.
//!
//! Simulates events in the built-in or a JSON-configured detector, fits
//! them, decodes cell identifiers and exports the geometry to GDML.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::float_cmp,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn, LevelFilter};
use std::f64::consts::TAU;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use trackfit_algorithms::{
    reconstruct_events, simulate_event, ChargeHypothesis, ConstantField, EventStatus, FitContext,
    HighlandMaterialEffects, KalmanFitter, MaterialEffects, NoMaterialEffects, Propagator,
    PropagatorConfig, ReconstructionConfig, RungeKuttaStepper, SeedConfig,
};
use trackfit_core::{Event, GenParticle};
use trackfit_geometry::{
    GeometryConfig, ReadoutSchemas, Region, SurfaceRegistry, TrackingGeometry, SYSTEM_FIELD,
};
use trackfit_io::{EventFileReader, EventFileWriter, GdmlWriter};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TrackfitIo(#[from] trackfit_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] trackfit_core::Error),

    #[error("Geometry error: {0}")]
    Geometry(#[from] trackfit_geometry::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Material treatment during propagation.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Material {
    /// No material effects
    None,
    /// Highland multiple scattering and mean energy loss
    Highland,
}

/// Charge assignment of the seed.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Charge {
    /// From the bending direction
    Bending,
    /// Always positive
    Positive,
}

/// Silicon tracker reconstruction: simulation, Kalman fitting and geometry tools.
#[derive(Parser)]
#[command(name = "trackfit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Geometry configuration (JSON); the built-in generic detector if omitted
    #[arg(short, long, global = true)]
    geometry: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit every event of a JSON Lines event file
    Fit {
        /// Input event file
        input: PathBuf,

        /// Magnetic field along z (Tesla)
        #[arg(long, default_value = "2.0")]
        field: f64,

        /// Measurement uncertainty along local x (mm); pitch / sqrt(12) if omitted
        #[arg(long)]
        sigma0: Option<f64>,

        /// Measurement uncertainty along local y (mm); pitch / sqrt(12) if omitted
        #[arg(long)]
        sigma1: Option<f64>,

        /// Material effects
        #[arg(short, long, value_enum, default_value = "highland")]
        material: Material,

        /// Seed charge assignment
        #[arg(long, value_enum, default_value = "bending")]
        charge: Charge,

        /// Navigation step budget
        #[arg(long, default_value = "1000")]
        max_steps: usize,
    },

    /// Generate events by propagating particles through the detector
    Simulate {
        /// Output event file
        #[arg(short, long)]
        output: PathBuf,

        /// Number of events, one particle each
        #[arg(short = 'n', long, default_value = "10")]
        events: usize,

        /// Transverse momentum (GeV)
        #[arg(long, default_value = "1.0")]
        pt: f64,

        /// Largest absolute pseudorapidity; particles are spread evenly
        #[arg(long, default_value = "1.0")]
        eta_max: f64,

        /// Particle charge
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        charge: f64,

        /// Magnetic field along z (Tesla)
        #[arg(long, default_value = "2.0")]
        field: f64,

        /// Material effects
        #[arg(short, long, value_enum, default_value = "none")]
        material: Material,
    },

    /// Decode cell identifiers (decimal or 0x-prefixed hex)
    Decode {
        /// Cell identifiers
        #[arg(required = true)]
        cell_ids: Vec<String>,
    },

    /// Show information about the detector geometry
    Info,

    /// Export the detector geometry to GDML
    ExportGdml {
        /// Output GDML file
        #[arg(short, long, default_value = "TrkDetector.gdml")]
        output: PathBuf,

        /// Also export volume boundaries
        #[arg(long)]
        boundaries: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GeometryConfig> {
    let config = match path {
        Some(path) => {
            info!("geometry from {}", path.display());
            GeometryConfig::from_file(path)?
        }
        None => GeometryConfig::generic_detector(),
    };
    config.validate()?;
    Ok(config)
}

fn parse_cell_id(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| CliError::InvalidArgument(format!("{text:?}: {e}")))
}

/// Particles spread evenly in azimuth and pseudorapidity.
fn particle_gun(events: usize, pt: f64, eta_max: f64, charge: f64) -> Vec<GenParticle> {
    (0..events)
        .map(|i| {
            let fraction = if events > 1 {
                i as f64 / (events - 1) as f64
            } else {
                0.5
            };
            let eta = eta_max * (2.0 * fraction - 1.0);
            let phi = TAU * (i as f64 + 0.5) / events as f64;
            let pz = pt * eta.sinh();
            let momentum = [pt * phi.cos(), pt * phi.sin(), pz];
            let p = pt.hypot(pz);
            let energy = p.hypot(trackfit_algorithms::PION_MASS);
            GenParticle::new(momentum, energy, charge)
        })
        .collect()
}

fn simulate<M: MaterialEffects>(
    geometry: &TrackingGeometry,
    readout: &ReadoutSchemas,
    field: f64,
    material: M,
    particles: &[GenParticle],
    output: &Path,
) -> Result<()> {
    let propagator = Propagator::new(RungeKuttaStepper::new(ConstantField::along_z(field)), material);
    let mut writer = EventFileWriter::create(output)?;
    let mut hits = 0usize;
    for particle in particles {
        let event = simulate_event(geometry, readout, &propagator, std::slice::from_ref(particle))?;
        hits += event.len();
        writer.write_event(&event)?;
    }
    writer.flush()?;
    println!(
        "Wrote {} events ({} hits) to {}",
        writer.written(),
        hits,
        output.display()
    );
    Ok(())
}

fn fit<M: MaterialEffects>(
    geometry: &TrackingGeometry,
    readout: &ReadoutSchemas,
    propagator: Propagator<RungeKuttaStepper<ConstantField>, M>,
    config: &ReconstructionConfig,
    events: &[Event],
) -> Result<()> {
    let registry = SurfaceRegistry::from_geometry(geometry)?;
    let fitter = KalmanFitter::new(propagator);
    let ctx = FitContext {
        geometry,
        registry: &registry,
        readout,
        fitter: &fitter,
        config,
    };

    let start = Instant::now();
    let results = reconstruct_events(&ctx, events);
    let elapsed = start.elapsed();

    let mut fitted = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for (index, result) in results.iter().enumerate() {
        let fit = match result {
            Ok(fit) => fit,
            Err(e) => {
                warn!("event {index}: {e}");
                failed += 1;
                continue;
            }
        };
        if fit.status == EventStatus::TooFewHits {
            info!("event {index}: {} usable hit(s), skipped", fit.measurements);
            skipped += 1;
            continue;
        }
        let Some(summary) = fit.summary() else {
            warn!("event {index}: empty track");
            failed += 1;
            continue;
        };
        fitted += 1;
        let truth = events[index]
            .particles
            .first()
            .map_or_else(String::new, |p| format!(" (true pT {:.4})", p.pt()));
        let termination = fit
            .termination
            .map_or_else(String::new, |t| format!(", {t:?}"));
        println!(
            "event {:>5}: {:>2} states, q={:+}, pT={:.4} GeV{}, phi={:.4}, theta={:.4}{}",
            index,
            summary.states,
            summary.charge,
            summary.pt,
            truth,
            summary.phi,
            summary.theta,
            termination
        );
        if fit.unknown_hits > 0 || fit.dropped_measurements > 0 {
            println!(
                "             {} unknown hit(s), {} dropped measurement(s)",
                fit.unknown_hits, fit.dropped_measurements
            );
        }
    }

    println!(
        "Fitted {}/{} events in {:.3} s ({} skipped, {} failed)",
        fitted,
        events.len(),
        elapsed.as_secs_f64(),
        skipped,
        failed
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.geometry.as_deref())?;

    match cli.command {
        Commands::Fit {
            input,
            field,
            sigma0,
            sigma1,
            material,
            charge,
            max_steps,
        } => {
            let readout = config.readout()?;
            let geometry = config.build()?;
            let segmentation = readout.segmentation();
            let twelve = 12.0_f64.sqrt();
            let sigma0 = sigma0.unwrap_or(segmentation.pitch_x / twelve);
            let sigma1 = sigma1.unwrap_or(segmentation.pitch_y / twelve);

            let reader = EventFileReader::open(&input)?;
            let events = reader.read_all()?;
            info!("{} events from {}", events.len(), input.display());

            let seed = SeedConfig::default().with_charge(match charge {
                Charge::Bending => ChargeHypothesis::FromBending,
                Charge::Positive => ChargeHypothesis::Positive,
            });
            let reco = ReconstructionConfig::default()
                .with_field(field)
                .with_sigma(sigma0, sigma1)
                .with_seed(seed);
            let stepper = RungeKuttaStepper::new(ConstantField::along_z(field));
            let propagator_config = PropagatorConfig::default().with_max_steps(max_steps);

            match material {
                Material::None => fit(
                    &geometry,
                    &readout,
                    Propagator::new(stepper, NoMaterialEffects).with_config(propagator_config),
                    &reco,
                    &events,
                )?,
                Material::Highland => fit(
                    &geometry,
                    &readout,
                    Propagator::new(stepper, HighlandMaterialEffects::default())
                        .with_config(propagator_config),
                    &reco,
                    &events,
                )?,
            }
        }

        Commands::Simulate {
            output,
            events,
            pt,
            eta_max,
            charge,
            field,
            material,
        } => {
            if pt <= 0.0 || charge == 0.0 || !eta_max.is_finite() {
                return Err(CliError::InvalidArgument(
                    "pt must be positive, charge non-zero and eta-max finite".to_string(),
                ));
            }
            let readout = config.readout()?;
            let geometry = config.build()?;
            let particles = particle_gun(events, pt, eta_max, charge);
            match material {
                Material::None => simulate(
                    &geometry,
                    &readout,
                    field,
                    NoMaterialEffects,
                    &particles,
                    &output,
                )?,
                Material::Highland => simulate(
                    &geometry,
                    &readout,
                    field,
                    HighlandMaterialEffects::default(),
                    &particles,
                    &output,
                )?,
            }
        }

        Commands::Decode { cell_ids } => {
            let readout = config.readout()?;
            for text in &cell_ids {
                let raw = parse_cell_id(text)?;
                let fields = match readout.decode(raw) {
                    Ok(fields) => fields,
                    Err(e) => {
                        println!("{raw:#018x}: {e}");
                        continue;
                    }
                };
                let region = fields
                    .get(SYSTEM_FIELD)
                    .map(|system| readout.region(system))
                    .transpose()?;
                let module = readout.volume_id(raw)?;
                let (x, y) = readout.local_position(raw)?;
                match region {
                    Some(region) => println!("{raw:#018x} [{region:?}]"),
                    None => println!("{raw:#018x}"),
                }
                println!("  fields: {fields}");
                println!("  module: {module}");
                println!("  local:  ({x:.4}, {y:.4}) mm");
            }
        }

        Commands::Info => {
            let readout = config.readout()?;
            let geometry = config.build()?;
            println!("Geometry:");
            for (volume, depth) in geometry.walk(geometry.highest_volume())? {
                let v = geometry.volume(volume)?;
                let surfaces: usize = v
                    .layers
                    .iter()
                    .map(|l| geometry.layers()[l.0].surfaces.len())
                    .sum();
                println!(
                    "  {}{}: {} layers, {} surfaces, {} boundaries",
                    "  ".repeat(depth),
                    v.name,
                    v.layers.len(),
                    surfaces,
                    v.boundaries.len()
                );
            }
            println!(
                "  sensitive modules: {}",
                geometry.sensitive_surfaces().count()
            );
            println!("Readout:");
            println!(
                "  barrel: {}",
                readout
                    .schema(Region::Barrel)
                    .descriptor()
            );
            println!(
                "  endcap: {}",
                readout
                    .schema(Region::Endcap)
                    .descriptor()
            );
            let segmentation = readout.segmentation();
            println!(
                "  segmentation: {} x {} mm ({}, {})",
                segmentation.pitch_x,
                segmentation.pitch_y,
                segmentation.x_field,
                segmentation.y_field
            );
        }

        Commands::ExportGdml { output, boundaries } => {
            let geometry = config.build()?;
            GdmlWriter::new()
                .with_boundaries(boundaries)
                .write(&geometry, &output)?;
            println!("Wrote GDML to {}", output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cell_id() {
        assert_eq!(parse_cell_id("0x1a").unwrap(), 26);
        assert_eq!(parse_cell_id("26").unwrap(), 26);
        assert!(parse_cell_id("0xzz").is_err());
    }

    #[test]
    fn test_particle_gun_spread() {
        let particles = particle_gun(3, 1.5, 1.0, -1.0);
        assert_eq!(particles.len(), 3);
        for particle in &particles {
            assert!((particle.pt() - 1.5).abs() < 1e-12);
            assert!(particle.energy > particle.momentum().norm());
        }
        assert!(particles[0].momentum[2] < 0.0);
        assert!(particles[1].momentum[2].abs() < 1e-12);
        assert!(particles[2].momentum[2] > 0.0);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["trackfit", "-vv", "fit", "events.jsonl", "--field", "4"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Fit { field, .. } if (field - 4.0).abs() < 1e-12));
        assert!(Cli::try_parse_from(["trackfit", "fit", "events.jsonl", "-o", "out.csv"]).is_err());
    }
}
