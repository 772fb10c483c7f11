use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dfntrans::config::TrackingConfig;
use dfntrans::discretization::generator::{CrossSpec, PlanarSpec, cross_network, planar_network};
use dfntrans::discretization::mesh::Mesh;
use dfntrans::tracking::driver::{prepare_mesh, run};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dfntrans")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Particle tracking on discrete fracture networks", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkKind {
    Planar,
    Cross,
}

#[derive(Subcommand)]
enum Commands {
    /// Track particles through a mesh
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        mesh: PathBuf,
    },
    /// Write a synthetic network as mesh JSON
    Generate {
        #[arg(short, long, value_enum)]
        kind: NetworkKind,
        #[arg(short, long)]
        out: PathBuf,
        /// Cells along each half of a fracture side
        #[arg(long)]
        cells: Option<usize>,
    },
    /// Check a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config, mesh } => track(config, mesh),
        Commands::Generate { kind, out, cells } => generate(kind, out, cells),
        Commands::Validate { config } => {
            TrackingConfig::from_file(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            println!("{} is valid", config.display());
            Ok(())
        }
    }
}

fn track(config_path: PathBuf, mesh_path: PathBuf) -> anyhow::Result<()> {
    let config = TrackingConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration {}", config_path.display()))?;
    let mut mesh = Mesh::from_file(&mesh_path)
        .with_context(|| format!("failed to load mesh {}", mesh_path.display()))?;
    info!(
        nodes = mesh.nodes.len(),
        cells = mesh.cells.len(),
        fractures = mesh.fractures.len(),
        "mesh loaded"
    );

    prepare_mesh(&mut mesh, &config);
    let report = run(&mesh, &config)?;
    report.summary.print_to_console();
    println!(
        "Summary saved to {}",
        config.output.out_dir.join("summary.txt").display()
    );
    Ok(())
}

fn generate(kind: NetworkKind, out: PathBuf, cells: Option<usize>) -> anyhow::Result<()> {
    let mesh = match kind {
        NetworkKind::Planar => {
            let mut spec = PlanarSpec::default();
            if let Some(n) = cells {
                spec.cells_per_half = n;
            }
            planar_network(&spec)
        }
        NetworkKind::Cross => {
            let mut spec = CrossSpec::default();
            if let Some(n) = cells {
                spec.cells_per_half = n;
            }
            cross_network(&spec)
        }
    };
    mesh.to_file(&out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    info!(
        nodes = mesh.nodes.len(),
        cells = mesh.cells.len(),
        "network written to {}",
        out.display()
    );
    Ok(())
}
