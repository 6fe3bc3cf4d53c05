//! repsnapper CLI - slice STL meshes into shells and infill.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repsnapper_slicer::{mesh_bounds, slice, Polygon2f, Polyline, SliceSettings, TriangleMesh};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "repsnapper")]
#[command(about = "Slice STL meshes into layer contours, shells and infill", long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Slice an STL file and write a JSON report
    Slice {
        /// Input STL file (ASCII or binary)
        input: PathBuf,
        /// Settings file (TOML); missing keys use defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output JSON file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Override the number of shells
        #[arg(long)]
        shells: Option<u32>,
        /// Override the layer height (mm)
        #[arg(long)]
        layer_height: Option<f64>,
        /// Only write statistics, not geometry
        #[arg(long)]
        stats_only: bool,
    },
    /// Display information about an STL file
    Info {
        /// Path to the STL file
        file: PathBuf,
    },
    /// Print the default settings as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Slice {
            input,
            config,
            output,
            shells,
            layer_height,
            stats_only,
        } => {
            let mut settings = match config {
                Some(path) => SliceSettings::load(&path)
                    .with_context(|| format!("loading settings from {}", path.display()))?,
                None => SliceSettings::default(),
            };
            if let Some(shells) = shells {
                settings.shell_count = shells;
            }
            if let Some(layer_height) = layer_height {
                settings.layer_height = layer_height;
            }
            slice_file(&input, &settings, output.as_deref(), stats_only)?;
        }
        Commands::Info { file } => {
            show_info(&file)?;
        }
        Commands::Config => {
            print!("{}", SliceSettings::default().to_toml_string()?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct Report {
    stats: repsnapper_slicer::PrintStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    layers: Vec<LayerReport>,
}

#[derive(Serialize)]
struct LayerReport {
    index: usize,
    z: f64,
    layer_height: f64,
    link_attempts: usize,
    skipped: bool,
    contours: Vec<Vec<[f64; 2]>>,
    shells: Vec<Vec<Vec<[f64; 2]>>>,
    infill: Vec<Vec<[f64; 2]>>,
}

fn polygon_points(polygon: &Polygon2f) -> Vec<[f64; 2]> {
    polygon.points.iter().map(|p| [p.x, p.y]).collect()
}

fn polyline_points(line: &Polyline) -> Vec<[f64; 2]> {
    line.points.iter().map(|p| [p.x, p.y]).collect()
}

fn slice_file(
    input: &Path,
    settings: &SliceSettings,
    output: Option<&Path>,
    stats_only: bool,
) -> Result<()> {
    let mesh = TriangleMesh::load_stl(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let result = slice(&mesh, settings)?;

    let layers = if stats_only {
        Vec::new()
    } else {
        result
            .layers
            .iter()
            .map(|layer| LayerReport {
                index: layer.index,
                z: layer.z,
                layer_height: layer.layer_height,
                link_attempts: layer.link_attempts,
                skipped: layer.skipped,
                contours: layer
                    .shells
                    .contour_polygons()
                    .into_iter()
                    .map(polygon_points)
                    .collect(),
                shells: (0..layer.shells.shells.len())
                    .map(|i| {
                        layer
                            .shells
                            .shell(i)
                            .into_iter()
                            .map(polygon_points)
                            .collect()
                    })
                    .collect(),
                infill: layer.infill.iter().map(polyline_points).collect(),
            })
            .collect()
    };

    let report = Report {
        stats: result.stats,
        layers,
    };
    let json = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            fs::write(path, json)?;
            info!(path = %path.display(), "wrote slice report");
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn show_info(file: &Path) -> Result<()> {
    let mesh =
        TriangleMesh::load_stl(file).with_context(|| format!("reading {}", file.display()))?;

    println!("STL mesh: {}", file.display());
    println!("  Triangles: {}", mesh.num_triangles());
    println!("  Vertices: {}", mesh.num_vertices());

    if let Some((min, max)) = mesh_bounds(&mesh) {
        println!("\nBounds:");
        println!("  Min: ({:.3}, {:.3}, {:.3})", min[0], min[1], min[2]);
        println!("  Max: ({:.3}, {:.3}, {:.3})", max[0], max[1], max[2]);
        println!(
            "  Size: {:.3} x {:.3} x {:.3} mm",
            max[0] - min[0],
            max[1] - min[1],
            max[2] - min[2]
        );
    }

    Ok(())
}
