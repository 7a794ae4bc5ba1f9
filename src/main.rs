//! # Terracost CLI
//!
//! Command-line interface for the terracost library.
//! Computes least-cost distance surfaces from raw `f32` cost rasters.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;

use terracost::engine::compare_surfaces;
use terracost::{
    initialize_tile_size, reference_distances, Engine, EngineOptions, GridPoint, MemorySink,
    Phase, RasterSource, RawRaster, RawRasterWriter, RunMode, TerracostConfig,
};

mod cli;

/// Command-line interface for terracost
#[derive(Parser)]
#[command(name = "terracost")]
#[command(about = "Out-of-core least-cost distance surfaces over large raster grids")]
#[command(long_about = "Computes the accumulated cost distance from source cells over a cost raster,
tile by tile, keeping only one tile in memory at a time:
  terracost run --costs dem.f32 --rows 20000 --cols 30000 --source 10,10 -o dist.f32
  terracost run --workdir work --mode final -o dist.f32    # finish an interrupted run
  terracost plan --rows 20000 --cols 30000 --memory-mb 256
  terracost verify --workdir work

Rasters are headerless little-endian f32, row-major. -9999 and NaN mark null cells.")]
#[command(version = env!("TERRACOST_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run some or all phases and write the distance raster
    Run(RunArgs),
    /// Show the tile plan chosen for a grid without running anything
    Plan(PlanArgs),
    /// Re-check the checksums of every artifact in a work directory
    Verify {
        /// Work directory of an earlier run
        #[arg(long, default_value = "terracost-work")]
        workdir: PathBuf,
    },
}

/// Tiling and configuration flags shared by `run` and `plan`
#[derive(Args, Clone)]
struct TilingArgs {
    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tile height in cells (with --tile-cols)
    #[arg(long, requires = "tile_cols")]
    tile_rows: Option<u32>,

    /// Tile width in cells (with --tile-rows)
    #[arg(long, requires = "tile_rows")]
    tile_cols: Option<u32>,

    /// Approximate number of tiles
    #[arg(long, conflicts_with = "tile_rows")]
    num_tiles: Option<u32>,

    /// Memory budget in megabytes
    #[arg(long)]
    memory_mb: Option<u64>,

    /// East-west cell spacing
    #[arg(long)]
    ew_res: Option<f64>,

    /// North-south cell spacing
    #[arg(long)]
    ns_res: Option<f64>,

    /// Diagonal cell spacing (default: derived from ew/ns)
    #[arg(long)]
    diag_res: Option<f64>,

    /// Fail when a priority queue would grow past this many entries
    #[arg(long)]
    max_queue: Option<usize>,
}

impl TilingArgs {
    fn config(&self) -> Result<TerracostConfig> {
        let mut config = match &self.config {
            Some(path) => TerracostConfig::from_toml_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => TerracostConfig::default(),
        };
        if self.tile_rows.is_some() {
            config.tile_rows = self.tile_rows;
            config.tile_cols = self.tile_cols;
            config.num_tiles = None;
        }
        if self.num_tiles.is_some() {
            config.num_tiles = self.num_tiles;
            config.tile_rows = None;
            config.tile_cols = None;
        }
        if let Some(mb) = self.memory_mb {
            config.memory_mb = mb;
        }
        if let Some(ew) = self.ew_res {
            config.resolution.ew = ew;
        }
        if let Some(ns) = self.ns_res {
            config.resolution.ns = ns;
        }
        if self.diag_res.is_some() {
            config.resolution.diag = self.diag_res;
        }
        if self.max_queue.is_some() {
            config.max_queue_entries = self.max_queue;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct RunArgs {
    /// Cost raster (required when the load phase runs)
    #[arg(long)]
    costs: Option<PathBuf>,

    /// Raster rows
    #[arg(long)]
    rows: Option<u32>,

    /// Raster columns
    #[arg(long)]
    cols: Option<u32>,

    /// Source mask raster: one byte per cell, non-zero marks a source
    #[arg(long)]
    sources_mask: Option<PathBuf>,

    /// Source cell as ROW,COL (repeatable)
    #[arg(long = "source", value_parser = cli::parse_grid_point)]
    sources: Vec<GridPoint>,

    /// Output distance raster
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Work directory for intermediate artifacts
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Phases to run: "all", a bitmask 1-15, or a list like "load,substitute"
    #[arg(long, default_value = "all")]
    mode: RunMode,

    /// Re-scan artifact checksums before every phase
    #[arg(long)]
    verify: bool,

    /// Cross-check the result against a whole-grid in-memory search
    #[arg(long)]
    check: bool,

    /// Stream boundary structures from disk even when they fit in memory
    #[arg(long)]
    stream: bool,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,

    #[command(flatten)]
    tiling: TilingArgs,
}

#[derive(Args)]
struct PlanArgs {
    #[arg(long)]
    rows: u32,

    #[arg(long)]
    cols: u32,

    #[command(flatten)]
    tiling: TilingArgs,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", failure_message(&e));
        std::process::exit(1);
    }
}

/// Fatal error text for stderr, printed whatever the log filter says
fn failure_message(e: &anyhow::Error) -> String {
    format!("Error: {e:#}")
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if cli.verbose {
        eprintln!("terracost v{} starting...", env!("TERRACOST_VERSION"));
    }

    match cli.command {
        Command::Run(args) => run_phases(args),
        Command::Plan(args) => show_plan(args),
        Command::Verify { workdir } => verify(workdir),
    }
}

fn open_costs(args: &RunArgs) -> Result<RawRaster> {
    let (Some(costs), Some(rows), Some(cols)) = (&args.costs, args.rows, args.cols) else {
        bail!("the load phase needs --costs, --rows and --cols");
    };
    let raster = RawRaster::open(costs, rows, cols, args.sources_mask.as_deref())
        .with_context(|| format!("opening cost raster {}", costs.display()))?;
    Ok(raster.with_sources(args.sources.clone())?)
}

fn run_phases(args: RunArgs) -> Result<()> {
    let mut config = args.tiling.config()?;
    if let Some(dir) = &args.workdir {
        config.work_dir = dir.clone();
    }

    let progress =
        (!args.quiet).then(|| cli::ProgressManager::new(0, "terracost: computing cost distance"));
    let options = EngineOptions {
        progress: progress.as_ref().map(|p| p.callback()),
        verify_artifacts: args.verify,
        force_streaming: args.stream,
    };

    let loads = args.mode.contains(Phase::Load);
    let mut raster = if loads { Some(open_costs(&args)?) } else { None };
    let mut engine = match &raster {
        Some(r) => Engine::new(config.clone(), r.rows(), r.cols(), options)?,
        None => Engine::resume(config.clone(), options)
            .with_context(|| format!("resuming from {}", config.work_dir.display()))?,
    };
    let layout = *engine.layout();
    info!(
        "{}x{} grid in {} tiles of {}x{}",
        layout.nrows,
        layout.ncols,
        layout.tile_count(),
        layout.tile_rows,
        layout.tile_cols
    );

    for phase in args.mode.phases() {
        if let Some(p) = &progress {
            p.start_phase(phase);
        }
        let source = raster.as_mut().map(|r| r as &mut dyn RasterSource);
        let report = engine.run(phase.into(), source, None)?;
        if let Some(p) = &progress {
            p.finish_phase(phase);
        }
        if let Some(load) = report.load {
            eprintln!(
                "load: {} cells, {} null, {} sources ({} dropped)",
                load.cells, load.null_cells, load.sources, load.dropped_sources
            );
        }
        if let Some(s) = report.substitute {
            eprintln!(
                "substitute: {} b2b edges, {} s2b distances",
                s.b2b_records, s.s2b_records
            );
        }
        if let Some(s) = report.inter_tile {
            eprintln!(
                "inter-tile: {} boundary points settled, {} unreachable",
                s.settled, s.unreachable
            );
        }
        if let Some(s) = report.final_pass {
            eprintln!("final: {} interior distances", s.interior_written);
        }
    }

    if let Some(path) = &args.output {
        let mut writer = RawRasterWriter::create(path, layout.ncols)
            .with_context(|| format!("creating {}", path.display()))?;
        let reached = engine.write_output(&mut writer)?;
        writer.finish()?;
        eprintln!("Wrote {} ({} cells reached)", path.display(), reached);
    } else if args.mode.contains(Phase::Final) {
        warn!("no --output given; distances are kept in {}", config.work_dir.display());
    }

    if args.check {
        let mut reference_raster = open_costs(&args)?;
        let expected = reference_distances(
            &mut reference_raster,
            &engine.lock().resolution,
            config.max_queue_entries,
        )?;
        let mut sink = MemorySink::new(layout.nrows, layout.ncols);
        engine.write_output(&mut sink)?;
        let (max_diff, mismatched, reachability) = compare_surfaces(sink.values(), &expected, 1e-4);
        eprintln!(
            "check: max difference {max_diff}, {mismatched} cells off, {reachability} reachability mismatches"
        );
        if mismatched > 0 || reachability > 0 {
            bail!("tiled result differs from the whole-grid reference");
        }
    }
    Ok(())
}

fn show_plan(args: PlanArgs) -> Result<()> {
    let config = args.tiling.config()?;
    let plan = initialize_tile_size(args.rows, args.cols, config.sizing()?, config.memory_budget())?;
    let l = &plan.layout;
    let (tile_rows, tile_cols) = l.tile_grid();
    println!("grid:            {}x{}", l.nrows, l.ncols);
    println!("padded grid:     {}x{} ({} padding cells)", l.nrows_pad, l.ncols_pad, l.padding_waste());
    println!("tile size:       {}x{}", l.tile_rows, l.tile_cols);
    println!("tiles:           {}x{} = {}", tile_rows, tile_cols, l.tile_count());
    println!("boundary points: {}", plan.boundary_points);
    println!("tile working set: {} bytes of {} budget", plan.tile_bytes, plan.memory_budget);
    println!("cost boundary:   {}", if plan.cache_boundary { "cached" } else { "streamed" });
    println!("phase2 boundary: {}", if plan.cache_phase2 { "cached" } else { "streamed" });
    Ok(())
}

fn verify(workdir: PathBuf) -> Result<()> {
    let config = TerracostConfig {
        work_dir: workdir,
        ..Default::default()
    };
    let engine = Engine::resume(config, EngineOptions::default())?;
    for (name, summary) in engine.verify_artifacts()? {
        println!("{name}: {} records, crc64 {:016x}", summary.records, summary.crc64);
    }
    let completed: Vec<_> = engine.lock().completed.iter().map(|p| p.name()).collect();
    println!("completed phases: {}", completed.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_carries_context_chain() {
        let err = anyhow::anyhow!("tile 3 is missing").context("resuming from work");
        assert_eq!(failure_message(&err), "Error: resuming from work: tile 3 is missing");
    }

    #[test]
    fn test_failure_message_for_library_error() {
        let err: anyhow::Error =
            terracost::Error::InvalidConfig("tile_rows must be at least 2".into()).into();
        assert_eq!(
            failure_message(&err),
            "Error: Invalid configuration: tile_rows must be at least 2"
        );
    }
}
