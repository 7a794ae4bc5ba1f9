//! Phase orchestration
//!
//! An [`Engine`] owns the tile plan for one grid and a work directory. Every phase
//! reconstructs its inputs from that directory, checks them against the lock file and
//! records its outputs there once it has fully completed, so a run may be split across
//! invocations with [`RunMode`].

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::boundary::{BoundaryIndex, BoundaryTileReader};
use crate::core::{
    initialize_tile_size, CostSource, Dim, DistanceEdge, Error, GridLayout, GridPoint, IjCost,
    InteriorPoint, Resolution, Result, TerracostConfig, TilePlan, TileSizing, NODATA,
};
use crate::dijkstra::{grid_dijkstra, TravMult};
use crate::formats::stream::StreamSummary;
use crate::formats::{
    LockFile, B2B_STREAM, BOUNDARY_COST, FINAL_STREAM, INTERIOR_STREAM, PHASE2_BOUNDARY, S2B_STREAM,
};
use crate::phases::final_pass::{self, FinalStats};
use crate::phases::inter_tile::{self, InterTileStats};
use crate::phases::load::{self, LoadStats};
use crate::phases::substitute::{self, SubstituteStats};
use crate::phases::{Phase, PhaseContext, ProgressCallback, RunMode};
use crate::raster::{RasterSink, RasterSource};
use crate::tile::CostTile;

/// Options for an engine run
#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Optional progress callback, reset at the start of every phase
    pub progress: Option<ProgressCallback>,

    /// Re-scan input artifact checksums before each phase
    pub verify_artifacts: bool,

    /// Stream boundary structures from disk even when they fit the memory budget
    pub force_streaming: bool,
}

#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub load: Option<LoadStats>,
    pub substitute: Option<SubstituteStats>,
    pub inter_tile: Option<InterTileStats>,
    pub final_pass: Option<FinalStats>,
    /// Output cells with a distance, when output was written
    pub cells_reached: Option<u64>,
    pub timings: Vec<(Phase, Duration)>,
}

pub struct Engine {
    config: TerracostConfig,
    plan: TilePlan,
    index: BoundaryIndex,
    trav: TravMult,
    work_dir: PathBuf,
    options: EngineOptions,
    lock: LockFile,
}

impl Engine {
    /// Plan tiles for an `nrows x ncols` grid; a lock file for the same layout is reused
    pub fn new(config: TerracostConfig, nrows: Dim, ncols: Dim, options: EngineOptions) -> Result<Self> {
        config.validate()?;
        let plan = initialize_tile_size(nrows, ncols, config.sizing()?, config.memory_budget())?;
        let work_dir = config.work_dir.clone();
        std::fs::create_dir_all(&work_dir)?;

        let lock = if LockFile::exists(&work_dir) {
            let existing = LockFile::read(&work_dir)?;
            if existing.layout == plan.layout && existing.resolution == config.resolution {
                existing
            } else {
                info!(
                    "{} holds a different run; its artifacts will be replaced",
                    work_dir.display()
                );
                LockFile::new(plan.layout, config.resolution)
            }
        } else {
            LockFile::new(plan.layout, config.resolution)
        };
        Self::assemble(config, plan, work_dir, options, lock)
    }

    /// Continue a run whose layout and resolution are recorded in the work directory
    pub fn resume(mut config: TerracostConfig, options: EngineOptions) -> Result<Self> {
        config.validate()?;
        let work_dir = config.work_dir.clone();
        let lock = LockFile::read(&work_dir)?;
        let l = lock.layout;
        let plan = initialize_tile_size(
            l.nrows,
            l.ncols,
            TileSizing::Explicit {
                rows: l.tile_rows,
                cols: l.tile_cols,
            },
            config.memory_budget(),
        )?;
        lock.check_layout(&plan.layout)?;
        if config.resolution != lock.resolution {
            warn!("using the resolution recorded in the lock file, not the configured one");
            config.resolution = lock.resolution;
        }
        Self::assemble(config, plan, work_dir, options, lock)
    }

    fn assemble(
        config: TerracostConfig,
        mut plan: TilePlan,
        work_dir: PathBuf,
        options: EngineOptions,
        lock: LockFile,
    ) -> Result<Self> {
        if options.force_streaming {
            plan.cache_boundary = false;
            plan.cache_phase2 = false;
        }
        let index = BoundaryIndex::new(&plan.layout)?;
        index.self_check()?;
        let trav = TravMult::new(&config.resolution);
        Ok(Self {
            config,
            plan,
            index,
            trav,
            work_dir,
            options,
            lock,
        })
    }

    pub fn plan(&self) -> &TilePlan {
        &self.plan
    }

    pub fn layout(&self) -> &GridLayout {
        &self.plan.layout
    }

    pub fn lock(&self) -> &LockFile {
        &self.lock
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn context(&self) -> PhaseContext<'_> {
        PhaseContext {
            plan: &self.plan,
            index: &self.index,
            trav: self.trav,
            work_dir: &self.work_dir,
            max_queue_entries: self.config.max_queue_entries,
            progress: self.options.progress.as_ref(),
        }
    }

    fn require_phase(&self, phase: Phase) -> Result<()> {
        if let Some(prev) = phase.prerequisite() {
            if !self.lock.is_completed(prev) {
                return Err(Error::InvalidConfig(format!(
                    "the {phase} phase needs the {prev} phase to have completed in {}",
                    self.work_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Mark `phase` as in progress on disk before its outputs start changing
    fn begin(&mut self, phase: Phase) -> Result<()> {
        if self.lock.completed.iter().any(|p| *p >= phase) {
            self.lock.invalidate_from(phase);
            self.lock.write(&self.work_dir)?;
        }
        Ok(())
    }

    fn commit(&mut self, phase: Phase, artifacts: &[(&str, StreamSummary)]) -> Result<()> {
        for (name, summary) in artifacts {
            self.lock.record_artifact(name, *summary);
        }
        self.lock.mark_completed(phase);
        self.lock.write(&self.work_dir)
    }

    pub fn load<S: RasterSource + ?Sized>(&mut self, raster: &mut S) -> Result<LoadStats> {
        self.lock = LockFile::new(self.plan.layout, self.config.resolution);
        self.lock.write(&self.work_dir)?;
        let out = load::run(&self.context(), raster)?;
        self.lock.sources = out.stats.sources;
        self.commit(
            Phase::Load,
            &[(INTERIOR_STREAM, out.interior), (BOUNDARY_COST, out.boundary)],
        )?;
        Ok(out.stats)
    }

    pub fn substitute(&mut self) -> Result<SubstituteStats> {
        self.require_phase(Phase::Substitute)?;
        let deep = self.options.verify_artifacts;
        self.lock.require::<InteriorPoint>(&self.work_dir, INTERIOR_STREAM, deep)?;
        self.lock.require::<CostSource>(&self.work_dir, BOUNDARY_COST, deep)?;
        self.begin(Phase::Substitute)?;
        let out = substitute::run(&self.context())?;
        self.commit(Phase::Substitute, &[(B2B_STREAM, out.b2b), (S2B_STREAM, out.s2b)])?;
        Ok(out.stats)
    }

    pub fn inter_tile(&mut self) -> Result<InterTileStats> {
        self.require_phase(Phase::InterTile)?;
        let deep = self.options.verify_artifacts;
        self.lock.require::<DistanceEdge>(&self.work_dir, B2B_STREAM, deep)?;
        self.lock.require::<IjCost>(&self.work_dir, S2B_STREAM, deep)?;
        self.begin(Phase::InterTile)?;
        let out = inter_tile::run(&self.context())?;
        self.commit(Phase::InterTile, &[(PHASE2_BOUNDARY, out.phase2)])?;
        Ok(out.stats)
    }

    pub fn finalize(&mut self) -> Result<FinalStats> {
        self.require_phase(Phase::Final)?;
        let deep = self.options.verify_artifacts;
        self.lock.require::<InteriorPoint>(&self.work_dir, INTERIOR_STREAM, deep)?;
        self.lock.require::<CostSource>(&self.work_dir, BOUNDARY_COST, deep)?;
        self.lock.require::<f32>(&self.work_dir, PHASE2_BOUNDARY, deep)?;
        self.begin(Phase::Final)?;
        let out = final_pass::run(&self.context())?;
        self.commit(Phase::Final, &[(FINAL_STREAM, out.distances)])?;
        Ok(out.stats)
    }

    /// Hand the finished distance surface to `sink`, row by row; returns cells reached
    pub fn write_output<K: RasterSink + ?Sized>(&self, sink: &mut K) -> Result<u64> {
        if !self.lock.is_completed(Phase::Final) {
            return Err(Error::InvalidConfig(format!(
                "no finished run in {}: the final phase has not completed",
                self.work_dir.display()
            )));
        }
        let deep = self.options.verify_artifacts;
        let final_path = self.lock.require::<IjCost>(&self.work_dir, FINAL_STREAM, deep)?;
        let phase2_path = self.lock.require::<f32>(&self.work_dir, PHASE2_BOUNDARY, deep)?;
        let mut phase2 =
            BoundaryTileReader::open(self.index.clone(), &phase2_path, self.plan.cache_phase2)?;
        final_pass::write_output(&self.plan.layout, &final_path, &mut phase2, sink)
    }

    /// Run the phases selected by `mode`, in order
    ///
    /// `raster` is required when the load phase is selected; output is written to `sink`
    /// once the final phase has completed.
    pub fn run(
        &mut self,
        mode: RunMode,
        mut raster: Option<&mut dyn RasterSource>,
        sink: Option<&mut dyn RasterSink>,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        for phase in mode.phases() {
            info!("phase {phase} starting");
            let started = Instant::now();
            match phase {
                Phase::Load => {
                    let raster = raster.as_deref_mut().ok_or_else(|| {
                        Error::InvalidConfig("the load phase needs a cost raster".to_string())
                    })?;
                    report.load = Some(self.load(raster)?);
                }
                Phase::Substitute => report.substitute = Some(self.substitute()?),
                Phase::InterTile => report.inter_tile = Some(self.inter_tile()?),
                Phase::Final => report.final_pass = Some(self.finalize()?),
            }
            let elapsed = started.elapsed();
            info!("phase {phase} finished in {:.2?}", elapsed);
            report.timings.push((phase, elapsed));
        }
        if let Some(sink) = sink {
            report.cells_reached = Some(self.write_output(sink)?);
        }
        Ok(report)
    }

    /// Re-check every artifact in the lock file against its recorded checksum
    pub fn verify_artifacts(&self) -> Result<Vec<(String, StreamSummary)>> {
        let dir = &self.work_dir;
        let mut checked = Vec::new();
        for name in self.lock.artifacts.keys() {
            let path = match name.as_str() {
                INTERIOR_STREAM => self.lock.require::<InteriorPoint>(dir, name, true)?,
                BOUNDARY_COST => self.lock.require::<CostSource>(dir, name, true)?,
                B2B_STREAM => self.lock.require::<DistanceEdge>(dir, name, true)?,
                S2B_STREAM | FINAL_STREAM => self.lock.require::<IjCost>(dir, name, true)?,
                PHASE2_BOUNDARY => self.lock.require::<f32>(dir, name, true)?,
                other => {
                    return Err(Error::format(
                        dir.join(other),
                        "unknown artifact name in lock file",
                    ))
                }
            };
            let entry = self.lock.artifact(name)?;
            info!("verified {} ({} records)", path.display(), entry.records);
            checked.push((
                name.clone(),
                StreamSummary {
                    records: entry.records,
                    crc64: entry.crc64,
                },
            ));
        }
        Ok(checked)
    }
}

/// Whole-grid reference distances with the same input rules as the load phase
///
/// Holds the entire grid in memory; meant for cross-checking small runs.
pub fn reference_distances<S: RasterSource + ?Sized>(
    raster: &mut S,
    resolution: &Resolution,
    max_queue_entries: Option<usize>,
) -> Result<Vec<f32>> {
    let (rows, cols) = (raster.rows(), raster.cols());
    let mut grid = CostTile::new(rows, cols, CostSource::nodata());
    let mut stats = LoadStats::default();
    let mut costs = vec![0.0f32; cols as usize];
    let mut sources = vec![false; cols as usize];
    for row in 0..rows {
        raster.read_row(row, &mut costs, &mut sources)?;
        for col in 0..cols {
            let point = GridPoint::new(row, col);
            let cell = load::cell_from(point, costs[col as usize], sources[col as usize], &mut stats)?;
            grid.set(row, col, cell);
        }
    }
    let dist = grid_dijkstra(&grid, &TravMult::new(resolution), max_queue_entries)?;
    Ok(dist.as_slice().to_vec())
}

/// Largest absolute difference between two surfaces, and the number of cells whose
/// NODATA status disagrees
pub fn compare_surfaces(a: &[f32], b: &[f32], rel_tol: f32) -> (f32, u64, u64) {
    let mut max_diff = 0.0f32;
    let mut mismatched = 0u64;
    let mut reachability = 0u64;
    for (&x, &y) in a.iter().zip(b) {
        match (x == NODATA, y == NODATA) {
            (true, true) => {}
            (false, false) => {
                let diff = (x - y).abs();
                max_diff = max_diff.max(diff);
                if diff > rel_tol * x.abs().max(y.abs()).max(1.0) {
                    mismatched += 1;
                }
            }
            _ => reachability += 1,
        }
    }
    (max_diff, mismatched, reachability)
}
