//! Memory-budgeted tile sizing
//!
//! The tile size is what keeps a phase inside its memory ceiling: one tile, its two
//! distance arrays and its two priority queues must fit the budget. Boundary structures
//! are held in memory only when they fit next to that working set; otherwise they are
//! streamed from disk one tile rim at a time.

use log::debug;
use std::mem::size_of;

use super::error::{Error, Result};
use super::layout::{padded_extent, GridLayout};
use super::types::{CostSource, Dim, Distance};
use crate::boundary::BoundaryIndex;
use crate::pqueue::QueueEntry;

/// Working-set bytes per tile cell during a Dijkstra phase
pub const TILE_CELL_BYTES: u64 =
    (size_of::<CostSource>() + 2 * size_of::<Distance>() + 2 * size_of::<QueueEntry>()) as u64;

const MIN_SORT_RUN: usize = 1024;
const MAX_SORT_RUN: usize = 1 << 24;

/// How the caller asked for the tile size to be chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSizing {
    Explicit { rows: Dim, cols: Dim },
    /// Roughly this many tiles, spread evenly over both axes
    TileCount(u32),
    /// Largest tile the budget allows, trimmed to reduce padding
    Auto,
}

/// Outcome of tile sizing for one grid
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub layout: GridLayout,
    pub memory_budget: u64,
    /// Working-set bytes of one tile
    pub tile_bytes: u64,
    /// Boundary points in the padded grid
    pub boundary_points: u64,
    /// Keep the cost boundary in memory during sweeps
    pub cache_boundary: bool,
    /// Keep resolved boundary distances in memory during inter-tile relaxation
    pub cache_phase2: bool,
    /// Records per in-memory run of the external sort
    pub sort_run_records: usize,
}

fn isqrt(n: u64) -> u64 {
    let mut r = (n as f64).sqrt() as u64;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r
}

/// Tile extent in `[lo, hi]` minimising padding waste; ties go to the larger tile
fn least_waste_extent(n: Dim, lo: Dim, hi: Dim) -> Dim {
    let mut best = hi;
    let mut best_waste = padded_extent(n, hi) - n;
    for t in (lo..hi).rev() {
        let waste = padded_extent(n, t) - n;
        if waste < best_waste {
            best = t;
            best_waste = waste;
        }
    }
    best
}

fn tile_dims(nrows: Dim, ncols: Dim, sizing: TileSizing, budget: u64) -> Result<(Dim, Dim)> {
    match sizing {
        TileSizing::Explicit { rows, cols } => Ok((rows, cols)),
        TileSizing::TileCount(count) => {
            let per_side = (count as f64).sqrt().ceil().max(1.0) as Dim;
            let rows = ((nrows.saturating_sub(1)).div_ceil(per_side) + 1).max(2);
            let cols = ((ncols.saturating_sub(1)).div_ceil(per_side) + 1).max(2);
            Ok((rows, cols))
        }
        TileSizing::Auto => {
            let side = isqrt(budget / TILE_CELL_BYTES).min(Dim::MAX as u64) as Dim;
            if side < 3 {
                return Err(Error::InvalidConfig(format!(
                    "memory budget of {budget} bytes cannot hold a 3x3 tile ({TILE_CELL_BYTES} bytes per cell)"
                )));
            }
            let fit_rows = nrows.max(2);
            let fit_cols = ncols.max(2);
            let rows = if side >= fit_rows {
                fit_rows
            } else {
                least_waste_extent(nrows, (side / 2).max(3), side)
            };
            let cols = if side >= fit_cols {
                fit_cols
            } else {
                least_waste_extent(ncols, (side / 2).max(3), side)
            };
            Ok((rows, cols))
        }
    }
}

/// Choose the tile size for a grid and check that one phase's working set fits the budget
pub fn initialize_tile_size(
    nrows: Dim,
    ncols: Dim,
    sizing: TileSizing,
    memory_budget: u64,
) -> Result<TilePlan> {
    let (tile_rows, tile_cols) = tile_dims(nrows, ncols, sizing, memory_budget)?;
    let layout = GridLayout::new(nrows, ncols, tile_rows, tile_cols)?;
    let tile_bytes = layout.tile_cells() * TILE_CELL_BYTES;
    if tile_bytes > memory_budget {
        return Err(Error::InvalidConfig(format!(
            "tile {tile_rows}x{tile_cols} needs {tile_bytes} bytes, budget is {memory_budget}"
        )));
    }

    let boundary_points = BoundaryIndex::new(&layout)?.len();
    let cost_boundary_bytes = boundary_points * size_of::<CostSource>() as u64;
    let phase2_bytes = boundary_points * size_of::<Distance>() as u64 + boundary_points / 8 + 1;
    let cache_boundary = tile_bytes + cost_boundary_bytes <= memory_budget;
    let cache_phase2 = phase2_bytes <= memory_budget / 2;

    let sort_run_records =
        ((memory_budget / 64) as usize).clamp(MIN_SORT_RUN, MAX_SORT_RUN);

    debug!(
        "tile plan: {}x{} tiles over {}x{} padded grid, {} boundary points, cache boundary={}, cache phase2={}",
        tile_rows,
        tile_cols,
        layout.nrows_pad,
        layout.ncols_pad,
        boundary_points,
        cache_boundary,
        cache_phase2
    );

    Ok(TilePlan {
        layout,
        memory_budget,
        tile_bytes,
        boundary_points,
        cache_boundary,
        cache_phase2,
        sort_run_records,
    })
}
