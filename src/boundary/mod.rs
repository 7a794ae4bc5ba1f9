//! Boundary point addressing and storage
//!
//! Every point on a tile edge (row a multiple of `tile_rows - 1` or column a multiple of
//! `tile_cols - 1`) gets a dense offset in `[0, NB)`. Offsets run tile row by tile row; within
//! a tile row each tile contributes its left column followed by its top row, the rightmost
//! grid column closes the block, and the bottom grid row comes last:
//!
//! ```text
//!   block tr:  [ L(0) T(0) | L(1) T(1) | ... | L(ntc-1) T(ntc-1) | L(ntc) ]   R entries
//!   last row:  [ c = 0 .. ncols_pad ]
//! ```
//!
//! `L(tc)` holds `tile_rows - 1` points, `T(tc)` holds `tile_cols - 2`. A tile's rim therefore
//! sits in at most three contiguous runs, which is what lets the streaming reader fetch one
//! rim with two seeks.
//!
//! Values keyed by this offset are kept by one of three [`BoundaryStore`] variants:
//! [`CachedBoundary`] (in memory), [`BoundaryWriter`] (build once, serialize) and
//! [`BoundaryTileReader`] (one rim at a time from memory or disk).

pub mod cached;
pub mod reader;
pub mod writer;

pub use cached::CachedBoundary;
pub use reader::BoundaryTileReader;
pub use writer::{BoundaryWriter, Positioned};

use std::path::Path;

use crate::core::{Dim, Error, GridLayout, GridPoint, Result};
use crate::formats::stream::{Record, StreamSummary};

/// Capability set shared by the boundary storage variants
pub trait BoundaryStore<T: Record> {
    fn index(&self) -> &BoundaryIndex;

    fn get(&mut self, point: GridPoint) -> Result<T>;

    fn insert(&mut self, point: GridPoint, value: T) -> Result<()>;

    /// Write all `NB` values, in offset order, as one record stream
    fn serialize(&mut self, path: &Path) -> Result<StreamSummary>;
}

/// Bijection between boundary points and `[0, NB)`
#[derive(Debug, Clone)]
pub struct BoundaryIndex {
    layout: GridLayout,
    /// Tile steps (`tile_rows - 1`, `tile_cols - 1`)
    a: u64,
    b: u64,
    /// Tile rows / tile columns
    ntr: u64,
    ntc: u64,
    /// Offsets per tile within a block (`a + b - 1`)
    tile_stride: u64,
    /// Offsets per block of tile rows
    row_stride: u64,
    len: u64,
}

impl BoundaryIndex {
    pub fn new(layout: &GridLayout) -> Result<Self> {
        layout.check_tileable()?;
        let a = layout.row_step() as u64;
        let b = layout.col_step() as u64;
        let (ntr, ntc) = layout.tile_grid();
        let (ntr, ntc) = (ntr as u64, ntc as u64);
        let tile_stride = a + b - 1;
        let row_stride = ntc * tile_stride + a;
        Ok(Self {
            layout: *layout,
            a,
            b,
            ntr,
            ntc,
            tile_stride,
            row_stride,
            len: ntr * row_stride + ntc * b + 1,
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Number of boundary points, `NB`
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rim points of one tile
    pub fn per_tile(&self) -> usize {
        (2 * (self.a + self.b)) as usize
    }

    /// Offset of a boundary point; the point must be a boundary point of the padded grid
    #[inline]
    pub fn pos(&self, row: Dim, col: Dim) -> u64 {
        debug_assert!(self.layout.in_padded(row, col) && self.layout.is_boundary(row, col));
        let (row, col) = (row as u64, col as u64);
        let tr = row / self.a;
        if tr == self.ntr {
            return self.ntr * self.row_stride + col;
        }
        let lr = row % self.a;
        let tc = col / self.b;
        let lc = col % self.b;
        let base = tr * self.row_stride + tc * self.tile_stride;
        if lc == 0 {
            base + lr
        } else {
            base + self.a + lc - 1
        }
    }

    /// `pos` for points that may come from outside the index's own sweep
    pub fn checked_pos(&self, point: GridPoint) -> Result<u64> {
        if !self.layout.in_padded(point.row, point.col)
            || !self.layout.is_boundary(point.row, point.col)
        {
            return Err(Error::invariant(format!(
                "{point} is not a boundary point of the {}x{} padded grid",
                self.layout.nrows_pad, self.layout.ncols_pad
            )));
        }
        Ok(self.pos(point.row, point.col))
    }

    /// Inverse of [`pos`](Self::pos)
    pub fn point(&self, pos: u64) -> GridPoint {
        debug_assert!(pos < self.len);
        let last_row = self.ntr * self.row_stride;
        if pos >= last_row {
            return GridPoint::new(self.layout.nrows_pad - 1, (pos - last_row) as Dim);
        }
        let tr = pos / self.row_stride;
        let rem = pos % self.row_stride;
        let tc = rem / self.tile_stride;
        let t = rem % self.tile_stride;
        let (row, col) = if tc == self.ntc || t < self.a {
            (tr * self.a + t, tc * self.b)
        } else {
            (tr * self.a, tc * self.b + 1 + t - self.a)
        };
        GridPoint::new(row as Dim, col as Dim)
    }

    /// Round-trip every offset through `point` and `pos`
    pub fn self_check(&self) -> Result<()> {
        for p in 0..self.len {
            let point = self.point(p);
            if !self.layout.in_padded(point.row, point.col)
                || !self.layout.is_boundary(point.row, point.col)
            {
                return Err(Error::invariant(format!(
                    "offset {p} maps to {point}, which is not a boundary point"
                )));
            }
            let back = self.pos(point.row, point.col);
            if back != p {
                return Err(Error::invariant(format!(
                    "boundary addressing round trip failed: {p} -> {point} -> {back}"
                )));
            }
        }
        Ok(())
    }

    /// Offset of the tile's top-left corner; its left column and top row follow contiguously
    pub fn tile_start(&self, tr: Dim, tc: Dim) -> u64 {
        tr as u64 * self.row_stride + tc as u64 * self.tile_stride
    }

    /// Contiguous `(offset, count)` runs covering one tile rim, in rim order
    pub fn rim_runs(&self, tr: Dim, tc: Dim) -> [(u64, u64); 3] {
        let (a, b) = (self.a, self.b);
        let start = self.tile_start(tr, tc);
        let below = tr as u64 + 1;
        if below < self.ntr {
            let row_start = below * self.row_stride + tc as u64 * self.tile_stride;
            [(start, 2 * a + b - 1), (row_start, 1), (row_start + a, b)]
        } else {
            let row_start = self.ntr * self.row_stride + tc as u64 * b;
            [(start, 2 * a + b - 1), (row_start, 1), (row_start + 1, b)]
        }
    }

    /// Rim points of a tile: left column, top row, right column, bottom-left corner, bottom
    /// row, bottom-right corner
    pub fn rim_points(&self, tr: Dim, tc: Dim, out: &mut Vec<GridPoint>) {
        out.clear();
        let origin = self.layout.tile_origin(tr, tc);
        let (a, b) = (self.layout.row_step(), self.layout.col_step());
        let (r0, c0) = (origin.row, origin.col);
        out.extend((0..a).map(|i| GridPoint::new(r0 + i, c0)));
        out.extend((1..b).map(|j| GridPoint::new(r0, c0 + j)));
        out.extend((0..a).map(|i| GridPoint::new(r0 + i, c0 + b)));
        out.push(GridPoint::new(r0 + a, c0));
        out.extend((1..b).map(|j| GridPoint::new(r0 + a, c0 + j)));
        out.push(GridPoint::new(r0 + a, c0 + b));
    }

    /// Substitute-graph edges leaving a point: every tile holding it contributes one edge to
    /// each of its other rim points
    pub fn degree(&self, point: GridPoint) -> u64 {
        self.layout.tiles_containing(point.row, point.col) as u64 * (self.per_tile() as u64 - 1)
    }

    pub fn b2b_records_total(&self) -> u64 {
        let nbt = self.per_tile() as u64;
        self.layout.tile_count() * nbt * (nbt - 1)
    }

    /// Tiles-containing count summed over one block of tile rows
    fn block_weight(&self, top_mult: u64) -> u64 {
        2 * self.ntc * (top_mult + self.a - 1) + self.ntc * top_mult * (self.b - 1)
    }

    /// Index of the first b2b record leaving `point` once b2b is sorted by `pos(from)`
    ///
    /// Records are grouped by source offset, so this is the sum of the degrees of every
    /// point with a smaller offset. Degrees factor as row multiplicity times column
    /// multiplicity, which gives a closed form per block.
    pub fn from_index(&self, point: GridPoint) -> u64 {
        let (a, b, ntc) = (self.a, self.b, self.ntc);
        let row = point.row as u64;
        let col = point.col as u64;
        let tr = row / a;

        let blocks_before = if tr == 0 {
            0
        } else {
            self.block_weight(1) + (tr - 1) * self.block_weight(2)
        };

        let within = if tr == self.ntr {
            if col == 0 {
                0
            } else {
                col + (ntc - 1).min((col - 1) / b)
            }
        } else {
            let top_mult = if tr == 0 { 1 } else { 2 };
            let left_weight = top_mult + a - 1;
            let tc = col / b;
            let col_mult = if tc == 0 || tc == ntc { 1 } else { 2 };
            let segments_before = if tc == 0 {
                0
            } else {
                (2 * tc - 1) * left_weight + tc * top_mult * (b - 1)
            };
            let rem = self.pos(point.row, point.col) - self.tile_start(tr as Dim, tc as Dim);
            let in_segment = if rem < a {
                if rem == 0 {
                    0
                } else {
                    col_mult * (top_mult + rem - 1)
                }
            } else {
                col_mult * left_weight + top_mult * (rem - a)
            };
            segments_before + in_segment
        };

        (self.per_tile() as u64 - 1) * (blocks_before + within)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(nrows: Dim, ncols: Dim, tr: Dim, tc: Dim) -> BoundaryIndex {
        BoundaryIndex::new(&GridLayout::new(nrows, ncols, tr, tc).unwrap()).unwrap()
    }

    fn boundary_count(layout: &GridLayout) -> u64 {
        let mut n = 0;
        for r in 0..layout.nrows_pad {
            for c in 0..layout.ncols_pad {
                if layout.is_boundary(r, c) {
                    n += 1;
                }
            }
        }
        n
    }

    #[test]
    fn test_addressing_round_trip() {
        for (nr, nc, tr, tc) in [(5, 5, 3, 3), (9, 9, 3, 3), (7, 11, 4, 4), (9, 9, 5, 5), (6, 4, 2, 3)]
        {
            let idx = index(nr, nc, tr, tc);
            idx.self_check().unwrap();
            assert_eq!(idx.len(), boundary_count(idx.layout()), "{nr}x{nc} / {tr}x{tc}");
        }
    }

    #[test]
    fn test_pos_is_bijective_onto_range() {
        let idx = index(7, 11, 4, 4);
        let l = *idx.layout();
        let mut seen = vec![false; idx.len() as usize];
        for r in 0..l.nrows_pad {
            for c in 0..l.ncols_pad {
                if l.is_boundary(r, c) {
                    let p = idx.pos(r, c) as usize;
                    assert!(!seen[p], "offset {p} hit twice");
                    seen[p] = true;
                    assert_eq!(idx.point(p as u64), GridPoint::new(r, c));
                }
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_rim_runs_cover_rim_points_in_order() {
        for (nr, nc, tr, tc) in [(9, 9, 3, 3), (7, 11, 4, 4), (9, 9, 5, 5)] {
            let idx = index(nr, nc, tr, tc);
            let (ntr, ntc) = idx.layout().tile_grid();
            let mut rim = Vec::new();
            for r in 0..ntr {
                for c in 0..ntc {
                    idx.rim_points(r, c, &mut rim);
                    assert_eq!(rim.len(), idx.per_tile());
                    let from_runs: Vec<u64> = idx
                        .rim_runs(r, c)
                        .iter()
                        .flat_map(|&(start, n)| start..start + n)
                        .collect();
                    let from_points: Vec<u64> =
                        rim.iter().map(|p| idx.pos(p.row, p.col)).collect();
                    assert_eq!(from_runs, from_points, "tile ({r}, {c})");
                }
            }
        }
    }

    #[test]
    fn test_from_index_matches_degree_prefix_sums() {
        for (nr, nc, tr, tc) in [(5, 5, 3, 3), (9, 9, 3, 3), (7, 11, 4, 4), (9, 13, 5, 4), (3, 3, 2, 2)]
        {
            let idx = index(nr, nc, tr, tc);
            let mut running = 0u64;
            for p in 0..idx.len() {
                let point = idx.point(p);
                assert_eq!(idx.from_index(point), running, "{point} in {nr}x{nc}/{tr}x{tc}");
                running += idx.degree(point);
            }
            assert_eq!(running, idx.b2b_records_total());
        }
    }

    #[test]
    fn test_checked_pos_rejects_interior() {
        let idx = index(9, 9, 5, 5);
        assert!(idx.checked_pos(GridPoint::new(2, 2)).unwrap_err().is_invariant());
        assert!(idx.checked_pos(GridPoint::new(9, 0)).is_err());
        assert_eq!(idx.checked_pos(GridPoint::new(4, 4)).unwrap(), idx.pos(4, 4));
    }
}
