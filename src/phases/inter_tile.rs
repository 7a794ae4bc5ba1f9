//! Phase 3: Dijkstra over the substitute graph
//!
//! Nodes are boundary points, the frontier is seeded from s2b, and the edges of a point
//! are the contiguous b2b run starting at `from_index(point)`. Each point is settled once;
//! points never settled are written as NODATA so the final pass sees them as unreachable.

use log::{debug, info, warn};

use super::PhaseContext;
use crate::boundary::{BoundaryStore, BoundaryWriter};
use crate::core::{is_nodata, DistanceEdge, Error, GridPoint, IjCost, Result, NODATA};
use crate::dijkstra::INF;
use crate::formats::stream::{RecordReader, StreamSummary};
use crate::formats::{B2B_STREAM, PHASE2_BOUNDARY, S2B_STREAM};
use crate::pqueue::PriorityQueue;

#[derive(Debug, Default, Clone, Copy)]
pub struct InterTileStats {
    pub s2b_seeds: u64,
    pub settled: u64,
    pub unreachable: u64,
    pub extracts: u64,
    pub relaxations: u64,
    /// Relaxations skipped because the cached tentative distance was already as good
    pub cache_skips: u64,
    pub peak_queue: usize,
}

pub struct InterTileOutput {
    pub stats: InterTileStats,
    pub phase2: StreamSummary,
}

/// Settled flags for all boundary offsets
struct Settled {
    words: Vec<u64>,
}

impl Settled {
    fn new(len: u64) -> Self {
        Self {
            words: vec![0; len.div_ceil(64) as usize],
        }
    }

    fn get(&self, pos: u64) -> bool {
        self.words[(pos / 64) as usize] & (1 << (pos % 64)) != 0
    }

    fn set(&mut self, pos: u64) {
        self.words[(pos / 64) as usize] |= 1 << (pos % 64);
    }
}

/// Resolved boundary distances under construction
///
/// In memory, the store also holds tentative distances (starting at infinity), which lets
/// relaxations that cannot improve be skipped before they reach the queue.
struct Phase2Boundary {
    store: BoundaryWriter<f32>,
}

impl Phase2Boundary {
    fn tentative(&self, point: GridPoint) -> Option<f32> {
        self.store.peek(point)
    }

    /// Queue `point` at `dist` unless the cached tentative value is already as good
    fn offer(
        &mut self,
        pq: &mut PriorityQueue,
        point: GridPoint,
        dist: f32,
        stats: &mut InterTileStats,
    ) -> Result<()> {
        if let Some(current) = self.tentative(point) {
            if current <= dist {
                stats.cache_skips += 1;
                return Ok(());
            }
            self.store.insert(point, dist)?;
        }
        pq.insert(dist, point)
    }
}

pub fn run(ctx: &PhaseContext<'_>) -> Result<InterTileOutput> {
    let index = ctx.index;
    let nb = index.len();

    let b2b_path = ctx.work_dir.join(B2B_STREAM);
    let mut b2b = RecordReader::<DistanceEdge>::open(&b2b_path)?;
    let expected = index.b2b_records_total();
    if b2b.len() != expected {
        return Err(Error::invariant(format!(
            "{} holds {} records, substitute graph needs {expected}",
            b2b_path.display(),
            b2b.len()
        )));
    }

    let fill = if ctx.plan.cache_phase2 { INF } else { NODATA };
    let mut phase2 = Phase2Boundary {
        store: BoundaryWriter::for_budget(
            index.clone(),
            fill,
            ctx.plan.cache_phase2,
            ctx.work_dir,
            ctx.plan.sort_run_records,
        )?,
    };
    info!(
        "inter-tile: {} boundary points, {} b2b edges, resolved boundary {}",
        nb,
        expected,
        if ctx.plan.cache_phase2 { "cached" } else { "streamed" }
    );

    let mut stats = InterTileStats::default();
    let mut pq = PriorityQueue::new(
        (nb as usize / 16).clamp(64, 1 << 20),
        ctx.max_queue_entries,
    );
    for rec in RecordReader::<IjCost>::open(ctx.work_dir.join(S2B_STREAM))? {
        let rec = rec?;
        index.checked_pos(rec.point)?;
        phase2.offer(&mut pq, rec.point, rec.value, &mut stats)?;
        stats.s2b_seeds += 1;
    }
    debug!("inter-tile: {} s2b seeds", stats.s2b_seeds);

    let mut settled = Settled::new(nb);
    let mut edges: Vec<DistanceEdge> = Vec::with_capacity(index.per_tile() * 4);
    while let Some(entry) = pq.extract_min() {
        stats.extracts += 1;
        let point = entry.point;
        let pos = index.pos(point.row, point.col);
        if settled.get(pos) {
            continue;
        }
        settled.set(pos);
        stats.settled += 1;
        let d = entry.priority;
        phase2.store.insert(point, d)?;

        edges.clear();
        b2b.seek(index.from_index(point))?;
        b2b.read_exact_records(index.degree(point), &mut edges)?;
        for edge in &edges {
            if edge.from != point {
                return Err(Error::invariant(format!(
                    "b2b run of {point} contains an edge from {}: record order does not match the boundary index",
                    edge.from
                )));
            }
            if is_nodata(edge.dist) {
                continue;
            }
            if settled.get(index.pos(edge.to.row, edge.to.col)) {
                continue;
            }
            stats.relaxations += 1;
            phase2.offer(&mut pq, edge.to, d + edge.dist, &mut stats)?;
        }

        if stats.settled % 4096 == 0 {
            ctx.report(stats.settled, nb);
        }
    }
    stats.peak_queue = pq.stats().peak_len;

    for pos in 0..nb {
        if !settled.get(pos) {
            phase2.store.insert(index.point(pos), NODATA)?;
            stats.unreachable += 1;
        }
    }
    if stats.unreachable > 0 {
        warn!(
            "inter-tile: {} boundary points are unreachable from every source",
            stats.unreachable
        );
    }
    ctx.report(nb, nb);

    let phase2 = phase2.store.serialize(&ctx.work_dir.join(PHASE2_BOUNDARY))?;
    info!(
        "inter-tile: settled {} of {} boundary points ({} relaxations, {} skipped)",
        stats.settled, nb, stats.relaxations, stats.cache_skips
    );
    Ok(InterTileOutput { stats, phase2 })
}
