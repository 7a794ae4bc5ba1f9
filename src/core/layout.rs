//! Padded grid layout shared by every component
//!
//! A [`GridLayout`] is immutable once built and is passed by reference into the tile
//! factory, boundary index, and every phase. Tiles overlap by one row/column, so the
//! padded extent satisfies `(nrows_pad - 1) % (tile_rows - 1) == 0` (same for columns).

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::types::{Dim, GridPoint};

/// Where a coordinate sits relative to the tile lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointClass {
    /// Beyond the padded grid
    Outside,
    /// Not on any tile edge
    Interior,
    /// On the grid's outer edge, not a corner
    GridEdge,
    /// One of the four grid corners
    GridCorner,
    /// On a tile row line strictly inside the grid
    TileRowBoundary,
    /// On a tile column line strictly inside the grid
    TileColumnBoundary,
    /// Crossing of an inner tile row line and an inner tile column line
    TileCorner,
}

impl PointClass {
    pub fn is_boundary(self) -> bool {
        !matches!(self, PointClass::Outside | PointClass::Interior)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    /// Original (unpadded) extent
    pub nrows: Dim,
    pub ncols: Dim,
    /// Tile extent, including both rims
    pub tile_rows: Dim,
    pub tile_cols: Dim,
    /// Padded extent
    pub nrows_pad: Dim,
    pub ncols_pad: Dim,
}

/// Smallest `n_pad >= n` with `(n_pad - 1) % (tile - 1) == 0`, covering at least one tile
pub fn padded_extent(n: Dim, tile: Dim) -> Dim {
    let step = tile - 1;
    let spans = if n <= 1 { 1 } else { (n - 1).div_ceil(step) };
    spans.max(1) * step + 1
}

impl GridLayout {
    pub fn new(nrows: Dim, ncols: Dim, tile_rows: Dim, tile_cols: Dim) -> Result<Self> {
        if nrows == 0 || ncols == 0 {
            return Err(Error::InvalidConfig(format!(
                "grid must not be empty ({nrows}x{ncols})"
            )));
        }
        if tile_rows < 2 || tile_cols < 2 {
            return Err(Error::InvalidConfig(format!(
                "tile must be at least 2x2, got {tile_rows}x{tile_cols}"
            )));
        }
        Self::with_padding(
            nrows,
            ncols,
            tile_rows,
            tile_cols,
            padded_extent(nrows, tile_rows),
            padded_extent(ncols, tile_cols),
        )
    }

    /// Rebuild a layout whose padded extent was recorded earlier; fails if it is not tileable
    pub fn with_padding(
        nrows: Dim,
        ncols: Dim,
        tile_rows: Dim,
        tile_cols: Dim,
        nrows_pad: Dim,
        ncols_pad: Dim,
    ) -> Result<Self> {
        let layout = Self {
            nrows,
            ncols,
            tile_rows,
            tile_cols,
            nrows_pad,
            ncols_pad,
        };
        layout.check_tileable()?;
        Ok(layout)
    }

    pub fn check_tileable(&self) -> Result<()> {
        if self.tile_rows < 2 || self.tile_cols < 2 {
            return Err(Error::invariant(format!(
                "tile {}x{} is smaller than 2x2",
                self.tile_rows, self.tile_cols
            )));
        }
        if self.nrows_pad < self.nrows.max(self.tile_rows)
            || self.ncols_pad < self.ncols.max(self.tile_cols)
        {
            return Err(Error::invariant(format!(
                "padded grid {}x{} does not cover grid {}x{} with tile {}x{}",
                self.nrows_pad, self.ncols_pad, self.nrows, self.ncols, self.tile_rows, self.tile_cols
            )));
        }
        if (self.nrows_pad - 1) % (self.tile_rows - 1) != 0
            || (self.ncols_pad - 1) % (self.tile_cols - 1) != 0
        {
            return Err(Error::invariant(format!(
                "padded grid {}x{} not tileable by {}x{}: ({} % {}, {} % {}) must both be 0",
                self.nrows_pad,
                self.ncols_pad,
                self.tile_rows,
                self.tile_cols,
                self.nrows_pad - 1,
                self.tile_rows - 1,
                self.ncols_pad - 1,
                self.tile_cols - 1
            )));
        }
        Ok(())
    }

    /// Row step between tile origins
    #[inline]
    pub fn row_step(&self) -> Dim {
        self.tile_rows - 1
    }

    /// Column step between tile origins
    #[inline]
    pub fn col_step(&self) -> Dim {
        self.tile_cols - 1
    }

    /// Number of tile rows and tile columns
    pub fn tile_grid(&self) -> (Dim, Dim) {
        (
            (self.nrows_pad - 1) / self.row_step(),
            (self.ncols_pad - 1) / self.col_step(),
        )
    }

    pub fn tile_count(&self) -> u64 {
        let (ntr, ntc) = self.tile_grid();
        ntr as u64 * ntc as u64
    }

    pub fn tile_origin(&self, tile_row: Dim, tile_col: Dim) -> GridPoint {
        GridPoint::new(tile_row * self.row_step(), tile_col * self.col_step())
    }

    pub fn tile_cells(&self) -> u64 {
        self.tile_rows as u64 * self.tile_cols as u64
    }

    /// Cells on one tile's rim
    pub fn boundary_per_tile(&self) -> u64 {
        2 * (self.row_step() as u64 + self.col_step() as u64)
    }

    /// Cells strictly inside one tile
    pub fn interior_per_tile(&self) -> u64 {
        (self.tile_rows as u64 - 2) * (self.tile_cols as u64 - 2)
    }

    /// The single boundary predicate used by every component
    #[inline]
    pub fn is_boundary(&self, row: Dim, col: Dim) -> bool {
        row % self.row_step() == 0 || col % self.col_step() == 0
    }

    #[inline]
    pub fn in_original(&self, row: Dim, col: Dim) -> bool {
        row < self.nrows && col < self.ncols
    }

    #[inline]
    pub fn in_padded(&self, row: Dim, col: Dim) -> bool {
        row < self.nrows_pad && col < self.ncols_pad
    }

    pub fn padded_cells(&self) -> u64 {
        self.nrows_pad as u64 * self.ncols_pad as u64
    }

    /// Filler cells added by padding
    pub fn padding_waste(&self) -> u64 {
        self.padded_cells() - self.nrows as u64 * self.ncols as u64
    }

    fn on_row_line(&self, row: Dim) -> bool {
        row % self.row_step() == 0
    }

    fn on_col_line(&self, col: Dim) -> bool {
        col % self.col_step() == 0
    }

    fn outer_row(&self, row: Dim) -> bool {
        row == 0 || row == self.nrows_pad - 1
    }

    fn outer_col(&self, col: Dim) -> bool {
        col == 0 || col == self.ncols_pad - 1
    }

    pub fn classify_point(&self, row: Dim, col: Dim) -> PointClass {
        if !self.in_padded(row, col) {
            return PointClass::Outside;
        }
        if !self.is_boundary(row, col) {
            return PointClass::Interior;
        }
        let (outer_r, outer_c) = (self.outer_row(row), self.outer_col(col));
        if outer_r && outer_c {
            return PointClass::GridCorner;
        }
        if outer_r || outer_c {
            return PointClass::GridEdge;
        }
        match (self.on_row_line(row), self.on_col_line(col)) {
            (true, true) => PointClass::TileCorner,
            (true, false) => PointClass::TileRowBoundary,
            _ => PointClass::TileColumnBoundary,
        }
    }

    /// Number of tile rows whose extent contains `row`
    pub fn row_multiplicity(&self, row: Dim) -> u32 {
        if self.on_row_line(row) && !self.outer_row(row) {
            2
        } else {
            1
        }
    }

    /// Number of tile columns whose extent contains `col`
    pub fn col_multiplicity(&self, col: Dim) -> u32 {
        if self.on_col_line(col) && !self.outer_col(col) {
            2
        } else {
            1
        }
    }

    /// Number of tiles containing a point; fixes its fan-out in the substitute graph
    pub fn tiles_containing(&self, row: Dim, col: Dim) -> u32 {
        match self.classify_point(row, col) {
            PointClass::Outside => 0,
            PointClass::Interior | PointClass::GridCorner => 1,
            PointClass::TileCorner => 4,
            PointClass::TileRowBoundary | PointClass::TileColumnBoundary => 2,
            PointClass::GridEdge => self.row_multiplicity(row) * self.col_multiplicity(col),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_tileable() {
        for n in 1..60 {
            for t in 2..12 {
                let pad = padded_extent(n, t);
                assert!(pad >= n, "n={n} t={t} pad={pad}");
                assert!(pad >= t);
                assert_eq!((pad - 1) % (t - 1), 0, "n={n} t={t} pad={pad}");
                assert!(pad - n < t.max(2), "too much padding n={n} t={t} pad={pad}");
            }
        }
    }

    #[test]
    fn test_exact_fit_needs_no_padding() {
        let layout = GridLayout::new(9, 9, 5, 5).unwrap();
        assert_eq!((layout.nrows_pad, layout.ncols_pad), (9, 9));
        assert_eq!(layout.tile_grid(), (2, 2));
        assert_eq!(layout.padding_waste(), 0);
    }

    #[test]
    fn test_non_square_padding() {
        let layout = GridLayout::new(7, 11, 4, 4).unwrap();
        assert_eq!((layout.nrows_pad, layout.ncols_pad), (7, 13));
        assert_eq!(layout.tile_grid(), (2, 4));
    }

    #[test]
    fn test_rejects_untileable_padding() {
        let err = GridLayout::with_padding(5, 5, 3, 3, 6, 5).unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn test_classify_point() {
        let layout = GridLayout::new(9, 9, 5, 5).unwrap();
        assert_eq!(layout.classify_point(0, 0), PointClass::GridCorner);
        assert_eq!(layout.classify_point(8, 8), PointClass::GridCorner);
        assert_eq!(layout.classify_point(0, 2), PointClass::GridEdge);
        assert_eq!(layout.classify_point(0, 4), PointClass::GridEdge);
        assert_eq!(layout.classify_point(4, 2), PointClass::TileRowBoundary);
        assert_eq!(layout.classify_point(2, 4), PointClass::TileColumnBoundary);
        assert_eq!(layout.classify_point(4, 4), PointClass::TileCorner);
        assert_eq!(layout.classify_point(2, 2), PointClass::Interior);
        assert_eq!(layout.classify_point(9, 0), PointClass::Outside);
    }

    #[test]
    fn test_tiles_containing_matches_brute_force() {
        let layout = GridLayout::new(7, 11, 4, 4).unwrap();
        let (ntr, ntc) = layout.tile_grid();
        for row in 0..layout.nrows_pad {
            for col in 0..layout.ncols_pad {
                let mut count = 0;
                for tr in 0..ntr {
                    for tc in 0..ntc {
                        let o = layout.tile_origin(tr, tc);
                        if row >= o.row
                            && row < o.row + layout.tile_rows
                            && col >= o.col
                            && col < o.col + layout.tile_cols
                        {
                            count += 1;
                        }
                    }
                }
                assert_eq!(layout.tiles_containing(row, col), count, "({row}, {col})");
                assert_eq!(
                    layout.row_multiplicity(row) * layout.col_multiplicity(col),
                    count
                );
            }
        }
    }
}
