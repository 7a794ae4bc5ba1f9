//! Phase 2: substitute graph construction
//!
//! For every tile:
//! - one search per rim point `p`, walked in row-major order, writing `(p, q, d)` and
//!   `(q, p, d)` for every rim point `q` after `p`. Each tile therefore contributes
//!   `nbt * (nbt - 1)` b2b records, NODATA where `q` is unreachable or either end is null.
//! - one multi-source search from the tile's sources, writing the distance of every rim
//!   point it finalizes to s2b.
//!
//! b2b is finally sorted by `(pos(from), pos(to))`, the order
//! [`BoundaryIndex::from_index`](crate::boundary::BoundaryIndex::from_index) addresses.

use log::{debug, info};

use super::PhaseContext;
use crate::boundary::BoundaryTileReader;
use crate::core::{Dim, DistanceEdge, GridPoint, IjCost, Result, NODATA};
use crate::dijkstra::{dijkstra_abs, drain, forward_rim_count, DistTile, SearchStats, Visit, INF};
use crate::formats::sort::sort_stream;
use crate::formats::stream::{RecordWriter, StreamSummary};
use crate::formats::{B2B_STREAM, BOUNDARY_COST, INTERIOR_STREAM, S2B_STREAM};
use crate::pqueue::PriorityQueue;
use crate::tile::CostTile;
use crate::tile_factory::TileFactory;

#[derive(Debug, Default, Clone, Copy)]
pub struct SubstituteStats {
    pub tiles: u64,
    /// Per-rim-point searches actually run
    pub boundary_searches: u64,
    /// Rim points skipped because their cell is null
    pub null_rim_points: u64,
    pub b2b_records: u64,
    pub s2b_records: u64,
    pub boundary: SearchStats,
    pub sources: SearchStats,
    pub peak_queue: usize,
}

pub struct SubstituteOutput {
    pub stats: SubstituteStats,
    pub b2b: StreamSummary,
    pub s2b: StreamSummary,
}

/// Rim cells of a tile in local row-major order
fn rim_row_major(rows: Dim, cols: Dim) -> Vec<(Dim, Dim)> {
    let mut rim = Vec::with_capacity(2 * (rows + cols) as usize);
    for lr in 0..rows {
        for lc in 0..cols {
            if lr == 0 || lc == 0 || lr == rows - 1 || lc == cols - 1 {
                rim.push((lr, lc));
            }
        }
    }
    rim
}

/// Write an edge in both directions
fn double_write(
    b2b: &mut RecordWriter<DistanceEdge>,
    a: GridPoint,
    b: GridPoint,
    dist: f32,
) -> Result<()> {
    b2b.append(&DistanceEdge { from: a, to: b, dist })?;
    if a != b {
        b2b.append(&DistanceEdge { from: b, to: a, dist })?;
    }
    Ok(())
}

/// Reusable per-tile search buffers
struct Workspace {
    rim: Vec<(Dim, Dim)>,
    /// Non-null rim cells in `rim[i..]`
    nonnull_suffix: Vec<u64>,
    dist: DistTile,
    pq: PriorityQueue,
    sdist: DistTile,
    spq: PriorityQueue,
}

/// Distances between all rim pairs of one tile; also seeds the tile's sources into
/// `spq`/`sdist` for [`source_tile_dijkstra`]
fn boundary_tile_dijkstra(
    ctx: &PhaseContext<'_>,
    tile: &CostTile,
    ws: &mut Workspace,
    b2b: &mut RecordWriter<DistanceEdge>,
    stats: &mut SubstituteStats,
) -> Result<()> {
    ws.sdist.fill(INF);
    ws.spq.clear();
    for (lr, lc) in tile.sources() {
        ws.sdist.set(lr, lc, 0.0);
        ws.spq.insert(0.0, GridPoint::new(lr, lc))?;
    }

    let n = ws.rim.len();
    ws.nonnull_suffix[n] = 0;
    for i in (0..n).rev() {
        let (lr, lc) = ws.rim[i];
        ws.nonnull_suffix[i] = ws.nonnull_suffix[i + 1] + u64::from(!tile.get(lr, lc).is_null());
    }

    for i in 0..n {
        let start = ws.rim[i];
        let from = tile.to_global(start.0, start.1);
        if tile.get(start.0, start.1).is_null() {
            stats.null_rim_points += 1;
            for &(qr, qc) in &ws.rim[i + 1..] {
                double_write(b2b, from, tile.to_global(qr, qc), NODATA)?;
            }
            continue;
        }

        let expected = ws.nonnull_suffix[i];
        debug_assert_eq!(expected, forward_rim_count(tile, start));
        ws.pq.clear();
        stats.boundary += dijkstra_abs(tile, start, &ctx.trav, &mut ws.pq, &mut ws.dist, expected)?;
        stats.boundary_searches += 1;
        stats.peak_queue = stats.peak_queue.max(ws.pq.stats().peak_len);

        for &(qr, qc) in &ws.rim[i + 1..] {
            let d = ws.dist.get(qr, qc);
            let d = if d == INF || tile.get(qr, qc).is_null() { NODATA } else { d };
            double_write(b2b, from, tile.to_global(qr, qc), d)?;
        }
    }
    Ok(())
}

/// Multi-source search from the sources seeded by [`boundary_tile_dijkstra`]
fn source_tile_dijkstra(
    ctx: &PhaseContext<'_>,
    tile: &CostTile,
    ws: &mut Workspace,
    s2b: &mut RecordWriter<IjCost>,
    stats: &mut SubstituteStats,
) -> Result<()> {
    if ws.spq.is_empty() {
        return Ok(());
    }
    let mut written = 0u64;
    drain(
        tile,
        &ctx.trav,
        &mut ws.spq,
        &mut ws.sdist,
        &mut stats.sources,
        |lr, lc, d| {
            if tile.is_rim(lr, lc) {
                s2b.append(&IjCost::new(tile.to_global(lr, lc), d))?;
                written += 1;
            }
            Ok(Visit::Continue)
        },
    )?;
    stats.s2b_records += written;
    Ok(())
}

pub fn run(ctx: &PhaseContext<'_>) -> Result<SubstituteOutput> {
    let layout = ctx.plan.layout;
    let boundary = BoundaryTileReader::open(
        ctx.index.clone(),
        &ctx.work_dir.join(BOUNDARY_COST),
        ctx.plan.cache_boundary,
    )?;
    let mut factory = TileFactory::open(&layout, &ctx.work_dir.join(INTERIOR_STREAM), boundary)?;
    info!(
        "substitute: {} tiles, {} rim points each, boundary {}",
        layout.tile_count(),
        ctx.index.per_tile(),
        if ctx.plan.cache_boundary { "cached" } else { "streamed" }
    );

    let rim = rim_row_major(layout.tile_rows, layout.tile_cols);
    let mut ws = Workspace {
        nonnull_suffix: vec![0; rim.len() + 1],
        rim,
        dist: DistTile::new(layout.tile_rows, layout.tile_cols, INF),
        pq: ctx.tile_queue(),
        sdist: DistTile::new(layout.tile_rows, layout.tile_cols, INF),
        spq: ctx.tile_queue(),
    };

    let b2b_path = ctx.work_dir.join(B2B_STREAM);
    let mut b2b = RecordWriter::<DistanceEdge>::create(&b2b_path)?;
    let mut s2b = RecordWriter::<IjCost>::create(ctx.work_dir.join(S2B_STREAM))?;

    let mut stats = SubstituteStats::default();
    let mut tile = factory.new_tile();
    let total = layout.tile_count();
    while factory.next_tile(&mut tile)? {
        boundary_tile_dijkstra(ctx, &tile, &mut ws, &mut b2b, &mut stats)?;
        source_tile_dijkstra(ctx, &tile, &mut ws, &mut s2b, &mut stats)?;
        stats.tiles += 1;
        if let Some((tr, tc)) = factory.current_tile() {
            debug!(
                "substitute: tile ({tr}, {tc}) done, {} b2b records so far",
                b2b.len()
            );
        }
        ctx.report(stats.tiles, total);
    }
    stats.peak_queue = stats.peak_queue.max(ws.spq.stats().peak_len);

    b2b.finish()?;
    let s2b = s2b.finish()?;

    let index = ctx.index;
    let b2b = sort_stream(
        &b2b_path,
        &b2b_path,
        ctx.plan.sort_run_records,
        |e: &DistanceEdge| (index.pos(e.from.row, e.from.col), index.pos(e.to.row, e.to.col)),
    )?;
    stats.b2b_records = b2b.records;

    info!(
        "substitute: {} b2b records, {} s2b records, {} searches ({} extracts)",
        stats.b2b_records,
        stats.s2b_records,
        stats.boundary_searches,
        stats.boundary.extracts + stats.sources.extracts
    );
    Ok(SubstituteOutput { stats, b2b, s2b })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rim_row_major() {
        let rim = rim_row_major(3, 4);
        assert_eq!(
            rim,
            vec![
                (0, 0),
                (0, 1),
                (0, 2),
                (0, 3),
                (1, 0),
                (1, 3),
                (2, 0),
                (2, 1),
                (2, 2),
                (2, 3)
            ]
        );
    }

    #[test]
    fn test_double_write_skips_self_edge() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("b2b.stream");
        let mut w = RecordWriter::<DistanceEdge>::create(&path).unwrap();
        let a = GridPoint::new(0, 0);
        double_write(&mut w, a, GridPoint::new(0, 4), 2.0).unwrap();
        double_write(&mut w, a, a, 0.0).unwrap();
        assert_eq!(w.finish().unwrap().records, 3);
    }
}
