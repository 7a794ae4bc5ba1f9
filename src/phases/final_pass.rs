//! Phase 4: final in-tile resolution
//!
//! Each tile is seeded with the resolved distances of its rim (sources at 0) plus its
//! interior sources, and one Dijkstra propagates them inward. Only interior cells inside
//! the original extent are emitted; rim values stay authoritative in the resolved
//! boundary store and are merged back in by [`write_output`].

use log::{debug, info};
use std::path::Path;

use super::PhaseContext;
use crate::boundary::{BoundaryStore, BoundaryTileReader};
use crate::core::{is_nodata, Error, GridLayout, GridPoint, IjCost, Result, NODATA};
use crate::dijkstra::{drain, DistTile, SearchStats, Visit, INF};
use crate::formats::sort::sort_stream;
use crate::formats::stream::{RecordReader, RecordWriter, StreamSummary};
use crate::formats::{BOUNDARY_COST, FINAL_STREAM, INTERIOR_STREAM, PHASE2_BOUNDARY};
use crate::raster::RasterSink;
use crate::tile_factory::TileFactory;

#[derive(Debug, Default, Clone, Copy)]
pub struct FinalStats {
    pub tiles: u64,
    pub seeded_boundary: u64,
    pub seeded_sources: u64,
    /// Rim cells left unseeded because no source reaches them
    pub unreachable_boundary: u64,
    pub interior_written: u64,
    pub search: SearchStats,
}

pub struct FinalOutput {
    pub stats: FinalStats,
    pub distances: StreamSummary,
}

pub fn run(ctx: &PhaseContext<'_>) -> Result<FinalOutput> {
    let layout = ctx.plan.layout;
    let costs = BoundaryTileReader::open(
        ctx.index.clone(),
        &ctx.work_dir.join(BOUNDARY_COST),
        ctx.plan.cache_boundary,
    )?;
    let mut factory = TileFactory::open(&layout, &ctx.work_dir.join(INTERIOR_STREAM), costs)?;
    let mut phase2 = BoundaryTileReader::<f32>::open(
        ctx.index.clone(),
        &ctx.work_dir.join(PHASE2_BOUNDARY),
        ctx.plan.cache_phase2,
    )?;
    info!("final: resolving interiors of {} tiles", layout.tile_count());

    let final_path = ctx.work_dir.join(FINAL_STREAM);
    let mut out = RecordWriter::<IjCost>::create(&final_path)?;
    let mut tile = factory.new_tile();
    let mut dist = DistTile::new(layout.tile_rows, layout.tile_cols, INF);
    let mut pq = ctx.tile_queue();
    let mut rim_dist = Vec::with_capacity(ctx.index.per_tile());
    let mut stats = FinalStats::default();
    let total = layout.tile_count();

    while factory.next_tile(&mut tile)? {
        let (tr, tc) = factory
            .current_tile()
            .ok_or_else(|| Error::invariant("tile factory produced a tile without a position"))?;
        let origin = tile.basis();
        dist.fill(INF);
        pq.clear();

        phase2.fill_tile(tr, tc, &mut rim_dist)?;
        for (p, &d) in phase2.rim().iter().zip(&rim_dist) {
            let (lr, lc) = (p.row - origin.row, p.col - origin.col);
            let cell = tile.get(lr, lc);
            if cell.is_null() {
                continue;
            }
            let seed = if cell.source { 0.0 } else { d };
            if is_nodata(seed) {
                stats.unreachable_boundary += 1;
                continue;
            }
            dist.set(lr, lc, seed);
            pq.insert(seed, GridPoint::new(lr, lc))?;
            stats.seeded_boundary += 1;
        }
        for (lr, lc) in tile.sources() {
            if !tile.is_rim(lr, lc) {
                dist.set(lr, lc, 0.0);
                pq.insert(0.0, GridPoint::new(lr, lc))?;
                stats.seeded_sources += 1;
            }
        }

        drain(&tile, &ctx.trav, &mut pq, &mut dist, &mut stats.search, |lr, lc, d| {
            if !tile.is_rim(lr, lc) {
                let g = tile.to_global(lr, lc);
                if layout.in_original(g.row, g.col) {
                    out.append(&IjCost::new(g, d))?;
                    stats.interior_written += 1;
                }
            }
            Ok(Visit::Continue)
        })?;

        stats.tiles += 1;
        debug!("final: tile ({tr}, {tc}) done");
        ctx.report(stats.tiles, total);
    }

    out.finish()?;
    let distances = sort_stream(&final_path, &final_path, ctx.plan.sort_run_records, |r: &IjCost| {
        r.point
    })?;
    info!(
        "final: {} interior distances written, {} unreachable rim cells",
        stats.interior_written, stats.unreachable_boundary
    );
    Ok(FinalOutput { stats, distances })
}

/// Merge final interior distances with resolved boundary distances into row-major output
///
/// Cells with no distance (null, unreachable) are emitted as NODATA.
pub fn write_output<K: RasterSink + ?Sized>(
    layout: &GridLayout,
    final_path: &Path,
    phase2: &mut BoundaryTileReader<f32>,
    sink: &mut K,
) -> Result<u64> {
    let mut interior = RecordReader::<IjCost>::open(final_path)?;
    let mut next = interior.read_next()?;
    let mut row_buf = vec![NODATA; layout.ncols as usize];
    let mut reached = 0u64;

    for row in 0..layout.nrows {
        row_buf.fill(NODATA);
        while let Some(rec) = next {
            if rec.point.row != row {
                break;
            }
            row_buf[rec.point.col as usize] = rec.value;
            next = interior.read_next()?;
        }
        for col in 0..layout.ncols {
            if layout.is_boundary(row, col) {
                row_buf[col as usize] = phase2.get(GridPoint::new(row, col))?;
            }
        }
        reached += row_buf.iter().filter(|v| !is_nodata(**v)).count() as u64;
        sink.write_row(row, &row_buf)?;
    }
    if let Some(rec) = next {
        return Err(Error::invariant(format!(
            "final stream not in row-major order: {} left over after the last row",
            rec.point
        )));
    }
    Ok(reached)
}
