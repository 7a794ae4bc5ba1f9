//! Single-tile Dijkstra over the 8-connected cost grid
//!
//! Edge weight between neighbouring cells `u` and `v`:
//!
//! ```text
//! w(u, v) = (cost(u) + cost(v)) * res(dir) / 2
//! ```
//!
//! i.e. the mean of the two terrain costs times the step length, so that path sums
//! approximate the trapezoidal integral of cost over distance. Null cells are never
//! entered. Queue entries carry tile-local coordinates.

use std::ops::AddAssign;

use crate::core::{Dim, Distance, GridPoint, Resolution, Result, NODATA};
use crate::pqueue::PriorityQueue;
use crate::tile::{CostTile, Tile};

/// Distance of a cell not reached yet
pub const INF: Distance = Distance::INFINITY;

/// Per-tile distance buffer
pub type DistTile = Tile<Distance>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    EastWest,
    NorthSouth,
    Diagonal,
}

/// Cardinal and diagonal neighbour offsets
const NEIGHBORS: [(i32, i32, Step); 8] = [
    (-1, 0, Step::NorthSouth),
    (1, 0, Step::NorthSouth),
    (0, -1, Step::EastWest),
    (0, 1, Step::EastWest),
    (-1, -1, Step::Diagonal),
    (-1, 1, Step::Diagonal),
    (1, -1, Step::Diagonal),
    (1, 1, Step::Diagonal),
];

/// Half step lengths per direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravMult {
    pub ew: f32,
    pub ns: f32,
    pub diag: f32,
}

impl TravMult {
    pub fn new(res: &Resolution) -> Self {
        Self {
            ew: (res.ew / 2.0) as f32,
            ns: (res.ns / 2.0) as f32,
            diag: (res.diagonal() / 2.0) as f32,
        }
    }

    #[inline(always)]
    fn factor(&self, step: Step) -> f32 {
        match step {
            Step::EastWest => self.ew,
            Step::NorthSouth => self.ns,
            Step::Diagonal => self.diag,
        }
    }
}

/// Extract/update counters of one or more searches
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SearchStats {
    pub extracts: u64,
    pub updates: u64,
}

impl AddAssign for SearchStats {
    fn add_assign(&mut self, other: Self) {
        self.extracts += other.extracts;
        self.updates += other.updates;
    }
}

/// What to do after a cell is finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Run Dijkstra until the queue is empty or `visit` asks to stop
///
/// `visit` is called once per finalized cell with its local coordinate and distance.
pub fn drain<F>(
    tile: &CostTile,
    trav: &TravMult,
    pq: &mut PriorityQueue,
    dist: &mut DistTile,
    stats: &mut SearchStats,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(Dim, Dim, Distance) -> Result<Visit>,
{
    let (rows, cols) = (tile.rows() as i64, tile.cols() as i64);
    while let Some(entry) = pq.extract_min() {
        stats.extracts += 1;
        let (lr, lc) = (entry.point.row, entry.point.col);
        let d = dist.get(lr, lc);
        // Stale: a shorter path was found after this entry was queued
        if entry.priority > d {
            continue;
        }
        let here = tile.get(lr, lc);
        if here.is_null() {
            continue;
        }
        if visit(lr, lc, d)? == Visit::Stop {
            break;
        }

        for &(dr, dc, step) in &NEIGHBORS {
            let nr = lr as i64 + dr as i64;
            let nc = lc as i64 + dc as i64;
            if nr < 0 || nc < 0 || nr >= rows || nc >= cols {
                continue;
            }
            let (nr, nc) = (nr as Dim, nc as Dim);
            let there = tile.get(nr, nc);
            if there.is_null() {
                continue;
            }
            let nd = d + (here.cost + there.cost) * trav.factor(step);
            if nd < dist.get(nr, nc) {
                dist.set(nr, nc, nd);
                pq.insert(nd, GridPoint::new(nr, nc))?;
                stats.updates += 1;
            }
        }
    }
    Ok(())
}

/// Non-null rim cells of `tile` at or after `start` in row-major order, `start` included
pub fn forward_rim_count(tile: &CostTile, start: (Dim, Dim)) -> u64 {
    let mut n = 0;
    for lr in start.0..tile.rows() {
        let first = if lr == start.0 { start.1 } else { 0 };
        for lc in first..tile.cols() {
            if tile.is_rim(lr, lc) && !tile.get(lr, lc).is_null() {
                n += 1;
            }
        }
    }
    n
}

/// Shortest distances from one cell of a tile, stopping early once `expected` forward rim
/// cells have been finalized
///
/// A null start leaves `dist` and `pq` untouched. Otherwise `dist` is reset to [`INF`]
/// before the search; `pq` must be empty on entry and may be left non-empty by the early
/// exit, so the caller clears it before the next search.
pub fn dijkstra_abs(
    tile: &CostTile,
    start: (Dim, Dim),
    trav: &TravMult,
    pq: &mut PriorityQueue,
    dist: &mut DistTile,
    expected: u64,
) -> Result<SearchStats> {
    let mut stats = SearchStats::default();
    if tile.get(start.0, start.1).is_null() {
        return Ok(stats);
    }
    debug_assert!(pq.is_empty());

    dist.fill(INF);
    dist.set(start.0, start.1, 0.0);
    pq.insert(0.0, GridPoint::new(start.0, start.1))?;

    let mut remaining = expected;
    drain(tile, trav, pq, dist, &mut stats, |lr, lc, _| {
        if tile.is_rim(lr, lc) && (lr, lc) >= start {
            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                return Ok(Visit::Stop);
            }
        }
        Ok(Visit::Continue)
    })?;
    Ok(stats)
}

/// Plain multi-source Dijkstra over a whole grid held as one tile
///
/// Reference solver: null and unreachable cells come back as [`NODATA`].
pub fn grid_dijkstra(
    grid: &CostTile,
    trav: &TravMult,
    max_queue_entries: Option<usize>,
) -> Result<DistTile> {
    let mut dist = DistTile::new(grid.rows(), grid.cols(), INF);
    dist.set_basis(grid.basis());
    let mut pq = PriorityQueue::new(grid.len() / 8 + 1, max_queue_entries);
    for (lr, lc) in grid.sources() {
        dist.set(lr, lc, 0.0);
        pq.insert(0.0, GridPoint::new(lr, lc))?;
    }
    let mut stats = SearchStats::default();
    drain(grid, trav, &mut pq, &mut dist, &mut stats, |_, _, _| Ok(Visit::Continue))?;

    for lr in 0..grid.rows() {
        for lc in 0..grid.cols() {
            if grid.get(lr, lc).is_null() || dist.get(lr, lc) == INF {
                dist.set(lr, lc, NODATA);
            }
        }
    }
    Ok(dist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CostSource;

    fn tile_from(costs: &[&[f32]]) -> CostTile {
        let mut tile = CostTile::new(costs.len() as Dim, costs[0].len() as Dim, CostSource::nodata());
        for (r, row) in costs.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                tile.set(r as Dim, c as Dim, CostSource::new(v, false));
            }
        }
        tile
    }

    /// Bellman-Ford over the same edge model, as an independent check
    fn brute_force(tile: &CostTile, start: (Dim, Dim), trav: &TravMult) -> Vec<f32> {
        let (rows, cols) = (tile.rows() as i64, tile.cols() as i64);
        let mut d = vec![INF; tile.len()];
        d[tile.offset(start.0, start.1)] = 0.0;
        for _ in 0..tile.len() {
            for r in 0..rows {
                for c in 0..cols {
                    let u = tile.get(r as Dim, c as Dim);
                    let du = d[(r * cols + c) as usize];
                    if u.is_null() || du == INF {
                        continue;
                    }
                    for &(dr, dc, step) in &NEIGHBORS {
                        let (nr, nc) = (r + dr as i64, c + dc as i64);
                        if nr < 0 || nc < 0 || nr >= rows || nc >= cols {
                            continue;
                        }
                        let v = tile.get(nr as Dim, nc as Dim);
                        if v.is_null() {
                            continue;
                        }
                        let nd = du + (u.cost + v.cost) * trav.factor(step);
                        let slot = &mut d[(nr * cols + nc) as usize];
                        if nd < *slot {
                            *slot = nd;
                        }
                    }
                }
            }
        }
        d
    }

    #[test]
    fn test_matches_brute_force_on_4x4() {
        let tile = tile_from(&[
            &[1.0, 2.0, 3.0, 1.0],
            &[4.0, 1.0, 9.0, 2.0],
            &[1.0, NODATA, 1.0, 1.0],
            &[2.0, 2.0, 5.0, 0.5],
        ]);
        let trav = TravMult::new(&Resolution::new(10.0, 20.0));
        let mut pq = PriorityQueue::unbounded(16);
        let mut dist = DistTile::new(4, 4, INF);
        for start in [(0, 0), (1, 1), (3, 3), (2, 0)] {
            pq.clear();
            dijkstra_abs(&tile, start, &trav, &mut pq, &mut dist, u64::MAX).unwrap();
            let expected = brute_force(&tile, start, &trav);
            for (i, (&got, &want)) in dist.as_slice().iter().zip(&expected).enumerate() {
                assert!(
                    (got - want).abs() <= 1e-4 * want.max(1.0) || (got == INF && want == INF),
                    "start {start:?} cell {i}: {got} vs {want}"
                );
            }
        }
    }

    #[test]
    fn test_edge_weight_model() {
        let tile = tile_from(&[&[2.0, 4.0], &[6.0, 8.0]]);
        let trav = TravMult::new(&Resolution::new(3.0, 4.0));
        let mut pq = PriorityQueue::unbounded(4);
        let mut dist = DistTile::new(2, 2, INF);
        dijkstra_abs(&tile, (0, 0), &trav, &mut pq, &mut dist, u64::MAX).unwrap();
        assert_eq!(dist.get(0, 1), (2.0 + 4.0) * 1.5);
        assert_eq!(dist.get(1, 0), (2.0 + 6.0) * 2.0);
        assert_eq!(dist.get(1, 1), (2.0 + 8.0) * 2.5);
    }

    #[test]
    fn test_null_start_returns_immediately() {
        let tile = tile_from(&[&[NODATA, 1.0], &[1.0, 1.0]]);
        let trav = TravMult::new(&Resolution::default());
        let mut pq = PriorityQueue::unbounded(4);
        let mut dist = DistTile::new(2, 2, 7.0);
        let stats = dijkstra_abs(&tile, (0, 0), &trav, &mut pq, &mut dist, 3).unwrap();
        assert_eq!(stats, SearchStats::default());
        assert!(pq.is_empty());
        assert!(dist.as_slice().iter().all(|&d| d == 7.0));
    }

    #[test]
    fn test_early_exit_finalizes_forward_rim() {
        // Expensive top rows: everything forward of (2, 4) settles before them
        let tile = tile_from(&[
            &[50.0, 50.0, 50.0, 50.0, 50.0],
            &[50.0, 50.0, 50.0, 50.0, 50.0],
            &[1.0, 1.0, 1.0, 1.0, 1.0],
            &[1.0, 1.0, 1.0, 1.0, 1.0],
            &[1.0, 1.0, 1.0, 1.0, 1.0],
        ]);
        let trav = TravMult::new(&Resolution::default());
        let mut full = DistTile::new(5, 5, INF);
        let mut early = DistTile::new(5, 5, INF);
        let mut pq = PriorityQueue::unbounded(16);
        let start = (2, 4);
        let s_full = dijkstra_abs(&tile, start, &trav, &mut pq, &mut full, u64::MAX).unwrap();
        pq.clear();
        let expected = forward_rim_count(&tile, start);
        assert_eq!(expected, 8);
        let s_early = dijkstra_abs(&tile, start, &trav, &mut pq, &mut early, expected).unwrap();
        assert!(s_early.extracts < s_full.extracts);
        for lr in 0..5 {
            for lc in 0..5 {
                if tile.is_rim(lr, lc) && (lr, lc) >= start {
                    assert_eq!(early.get(lr, lc), full.get(lr, lc), "({lr}, {lc})");
                }
            }
        }
    }

    #[test]
    fn test_grid_dijkstra_marks_unreachable() {
        let mut grid = tile_from(&[
            &[1.0, 1.0, NODATA, 1.0],
            &[1.0, 1.0, NODATA, 1.0],
            &[NODATA, NODATA, NODATA, 1.0],
        ]);
        grid.set(0, 0, CostSource::new(1.0, true));
        let dist = grid_dijkstra(&grid, &TravMult::new(&Resolution::default()), None).unwrap();
        assert_eq!(dist.get(0, 0), 0.0);
        assert!((dist.get(1, 1) - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert_eq!(dist.get(0, 3), NODATA);
        assert_eq!(dist.get(2, 3), NODATA);
        assert_eq!(dist.get(2, 0), NODATA);
    }
}
