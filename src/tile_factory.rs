//! Tile assembly from the interior stream and the boundary store
//!
//! Loading: [`TileLoader`] routes each grid cell either to the interior stream (appended)
//! or to the boundary writer (keyed by boundary offset), pads the grid out to its tileable
//! extent and sorts the interior stream into tile-major order.
//!
//! Sweeping: [`TileFactory`] walks the tiles left to right, top to bottom. Each tile takes
//! exactly `(tile_rows - 2) * (tile_cols - 2)` interior records from the stream, read
//! sequentially, and its rim from a [`BoundaryTileReader`].

use log::debug;
use std::path::{Path, PathBuf};

use crate::boundary::{BoundaryIndex, BoundaryStore, BoundaryTileReader, BoundaryWriter};
use crate::core::{CostSource, Dim, Error, GridLayout, GridPoint, InteriorPoint, PointClass, Result};
use crate::formats::sort::sort_stream;
use crate::formats::stream::{RecordReader, RecordWriter, StreamSummary};
use crate::tile::CostTile;

/// Sort key grouping interior points by tile, then row-major inside the tile
pub fn tile_major_key(layout: &GridLayout) -> impl Fn(&InteriorPoint) -> (Dim, Dim, Dim, Dim) {
    let (a, b) = (layout.row_step(), layout.col_step());
    move |p: &InteriorPoint| (p.point.row / a, p.point.col / b, p.point.row, p.point.col)
}

/// Artifacts committed by [`TileLoader::finish`]
#[derive(Debug, Clone, Copy)]
pub struct LoadedGrid {
    pub interior: StreamSummary,
    pub boundary: StreamSummary,
}

pub struct TileLoader {
    layout: GridLayout,
    interior_path: PathBuf,
    interior: RecordWriter<InteriorPoint>,
    boundary: BoundaryWriter<CostSource>,
    interior_cells: u64,
    boundary_cells: u64,
}

impl TileLoader {
    pub fn new(
        layout: &GridLayout,
        interior_path: &Path,
        boundary: BoundaryWriter<CostSource>,
    ) -> Result<Self> {
        if boundary.index().layout() != layout {
            return Err(Error::invariant(
                "boundary writer was built for a different layout",
            ));
        }
        Ok(Self {
            layout: *layout,
            interior_path: interior_path.to_path_buf(),
            interior: RecordWriter::create(interior_path)?,
            boundary,
            interior_cells: 0,
            boundary_cells: 0,
        })
    }

    pub fn insert(&mut self, point: GridPoint, cell: CostSource) -> Result<()> {
        if !self.layout.in_padded(point.row, point.col) {
            return Err(Error::invariant(format!(
                "{point} lies outside the {}x{} padded grid",
                self.layout.nrows_pad, self.layout.ncols_pad
            )));
        }
        if self.layout.is_boundary(point.row, point.col) {
            self.boundary.insert(point, cell)?;
            self.boundary_cells += 1;
        } else {
            self.interior.append(&InteriorPoint { point, cell })?;
            self.interior_cells += 1;
        }
        Ok(())
    }

    /// Fill every cell beyond the original extent with null, non-source padding
    pub fn pad(&mut self) -> Result<u64> {
        let l = self.layout;
        let mut added = 0;
        for row in 0..l.nrows_pad {
            let first = if row < l.nrows { l.ncols } else { 0 };
            for col in first..l.ncols_pad {
                self.insert(GridPoint::new(row, col), CostSource::nodata())?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn interior_cells(&self) -> u64 {
        self.interior_cells
    }

    pub fn boundary_cells(&self) -> u64 {
        self.boundary_cells
    }

    /// Sort the interior stream tile-major and commit the boundary values
    pub fn finish(mut self, boundary_path: &Path, run_records: usize) -> Result<LoadedGrid> {
        self.interior.finish()?;
        let interior = sort_stream(
            &self.interior_path,
            &self.interior_path,
            run_records,
            tile_major_key(&self.layout),
        )?;
        let expected = self.layout.tile_count() * self.layout.interior_per_tile();
        if interior.records != expected {
            return Err(Error::invariant(format!(
                "interior stream holds {} points, {} tiles need {expected}",
                interior.records,
                self.layout.tile_count()
            )));
        }
        let boundary = self.boundary.serialize(boundary_path)?;
        debug!(
            "loaded {} interior and {} boundary cells",
            self.interior_cells, self.boundary_cells
        );
        Ok(LoadedGrid { interior, boundary })
    }
}

pub struct TileFactory {
    layout: GridLayout,
    interior: RecordReader<InteriorPoint>,
    boundary: BoundaryTileReader<CostSource>,
    /// Next tile to produce
    cursor: (Dim, Dim),
    current: Option<(Dim, Dim)>,
    rim_values: Vec<CostSource>,
}

impl TileFactory {
    pub fn open(
        layout: &GridLayout,
        interior_path: &Path,
        boundary: BoundaryTileReader<CostSource>,
    ) -> Result<Self> {
        let interior = RecordReader::open(interior_path)?;
        let expected = layout.tile_count() * layout.interior_per_tile();
        if interior.len() != expected {
            return Err(Error::invariant(format!(
                "{} holds {} interior points, expected {expected}",
                interior_path.display(),
                interior.len()
            )));
        }
        Ok(Self {
            layout: *layout,
            interior,
            boundary,
            cursor: (0, 0),
            current: None,
            rim_values: Vec::new(),
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn index(&self) -> &BoundaryIndex {
        self.boundary.index()
    }

    /// A tile buffer of the right shape for [`next_tile`](Self::next_tile)
    pub fn new_tile(&self) -> CostTile {
        CostTile::new(self.layout.tile_rows, self.layout.tile_cols, CostSource::nodata())
    }

    /// Restart the sweep at the first tile
    pub fn reset(&mut self) -> Result<()> {
        self.interior.seek(0)?;
        self.cursor = (0, 0);
        self.current = None;
        Ok(())
    }

    /// Tile coordinates of the tile most recently produced
    pub fn current_tile(&self) -> Option<(Dim, Dim)> {
        self.current
    }

    /// Rim points of the current tile in the order the boundary reader produced them
    pub fn rim(&self) -> &[GridPoint] {
        self.boundary.rim()
    }

    /// Fill `tile` with the next tile of the sweep; `false` once the sweep is done
    pub fn next_tile(&mut self, tile: &mut CostTile) -> Result<bool> {
        let (ntr, ntc) = self.layout.tile_grid();
        let (tr, tc) = self.cursor;
        if tr >= ntr {
            return Ok(false);
        }
        if tile.rows() != self.layout.tile_rows || tile.cols() != self.layout.tile_cols {
            return Err(Error::invariant(format!(
                "tile buffer is {}x{}, layout tiles are {}x{}",
                tile.rows(),
                tile.cols(),
                self.layout.tile_rows,
                self.layout.tile_cols
            )));
        }

        let origin = self.layout.tile_origin(tr, tc);
        tile.set_basis(origin);

        let expected = self.layout.interior_per_tile();
        let mut read = 0u64;
        for lr in 1..self.layout.tile_rows - 1 {
            for lc in 1..self.layout.tile_cols - 1 {
                let rec = self.interior.read_next()?.ok_or_else(|| {
                    Error::invariant(format!(
                        "interior stream exhausted at tile ({tr}, {tc}): expected {expected} points, got {read}"
                    ))
                })?;
                let want = tile.to_global(lr, lc);
                if rec.point != want {
                    return Err(Error::invariant(format!(
                        "interior stream out of order at tile ({tr}, {tc}): expected {want}, found {}",
                        rec.point
                    )));
                }
                tile.set(lr, lc, rec.cell);
                read += 1;
            }
        }

        self.boundary.fill_tile(tr, tc, &mut self.rim_values)?;
        for (p, v) in self.boundary.rim().iter().zip(&self.rim_values) {
            tile.set(p.row - origin.row, p.col - origin.col, *v);
        }

        self.current = Some((tr, tc));
        self.cursor = if tc + 1 == ntc { (tr + 1, 0) } else { (tr, tc + 1) };
        Ok(true)
    }

    #[inline]
    pub fn is_boundary(&self, row: Dim, col: Dim) -> bool {
        self.layout.is_boundary(row, col)
    }

    pub fn classify_point(&self, row: Dim, col: Dim) -> PointClass {
        self.layout.classify_point(row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::CachedBoundary;
    use crate::core::NODATA;
    use tempfile::TempDir;

    fn cost_at(row: Dim, col: Dim) -> f32 {
        (row * 100 + col) as f32
    }

    /// Load a grid whose cost encodes its coordinate, inserted in reverse order
    fn load(layout: &GridLayout, dir: &Path, cached: bool) -> TileFactory {
        let index = BoundaryIndex::new(layout).unwrap();
        let writer =
            BoundaryWriter::for_budget(index.clone(), CostSource::nodata(), cached, dir, 8).unwrap();
        let interior = dir.join("interior.stream");
        let mut loader = TileLoader::new(layout, &interior, writer).unwrap();
        for row in (0..layout.nrows).rev() {
            for col in (0..layout.ncols).rev() {
                let cell = CostSource::new(cost_at(row, col), row == 1 && col == 1);
                loader.insert(GridPoint::new(row, col), cell).unwrap();
            }
        }
        loader.pad().unwrap();
        let bnd = dir.join("boundary.cost");
        loader.finish(&bnd, 16).unwrap();
        let reader = BoundaryTileReader::open(index, &bnd, cached).unwrap();
        TileFactory::open(layout, &interior, reader).unwrap()
    }

    #[test]
    fn test_sweep_reassembles_padded_grid() {
        for cached in [true, false] {
            let dir = TempDir::new().unwrap();
            let layout = GridLayout::new(7, 11, 4, 4).unwrap();
            let mut factory = load(&layout, dir.path(), cached);
            let mut tile = factory.new_tile();
            let mut seen = Vec::new();
            while factory.next_tile(&mut tile).unwrap() {
                let (tr, tc) = factory.current_tile().unwrap();
                seen.push((tr, tc));
                assert_eq!(tile.basis(), layout.tile_origin(tr, tc));
                for lr in 0..tile.rows() {
                    for lc in 0..tile.cols() {
                        let g = tile.to_global(lr, lc);
                        let cell = tile.get(lr, lc);
                        if layout.in_original(g.row, g.col) {
                            assert_eq!(cell.cost, cost_at(g.row, g.col), "{g}");
                            assert_eq!(cell.source, g.row == 1 && g.col == 1);
                        } else {
                            assert_eq!(cell.cost, NODATA, "padding at {g}");
                            assert!(!cell.source);
                        }
                    }
                }
            }
            assert_eq!(
                seen,
                vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 0), (1, 1), (1, 2), (1, 3)]
            );
            assert!(!factory.next_tile(&mut tile).unwrap());

            factory.reset().unwrap();
            assert!(factory.next_tile(&mut tile).unwrap());
            assert_eq!(factory.current_tile(), Some((0, 0)));
        }
    }

    #[test]
    fn test_short_interior_stream_is_rejected() {
        let dir = TempDir::new().unwrap();
        let layout = GridLayout::new(9, 9, 5, 5).unwrap();
        let index = BoundaryIndex::new(&layout).unwrap();
        let interior = dir.path().join("interior.stream");
        let mut w = RecordWriter::<InteriorPoint>::create(&interior).unwrap();
        w.append(&InteriorPoint {
            point: GridPoint::new(1, 1),
            cell: CostSource::new(1.0, false),
        })
        .unwrap();
        w.finish().unwrap();
        let reader =
            BoundaryTileReader::from_cached(CachedBoundary::new(index, CostSource::nodata()));
        let err = TileFactory::open(&layout, &interior, reader).err().unwrap();
        assert!(err.is_invariant());
    }

    #[test]
    fn test_loader_rejects_points_outside_grid() {
        let dir = TempDir::new().unwrap();
        let layout = GridLayout::new(5, 5, 3, 3).unwrap();
        let index = BoundaryIndex::new(&layout).unwrap();
        let writer = BoundaryWriter::in_memory(index, CostSource::nodata());
        let mut loader =
            TileLoader::new(&layout, &dir.path().join("interior.stream"), writer).unwrap();
        assert!(loader
            .insert(GridPoint::new(5, 0), CostSource::new(1.0, false))
            .is_err());
    }

    #[test]
    fn test_tile_major_key_groups_tiles() {
        let layout = GridLayout::new(9, 9, 5, 5).unwrap();
        let key = tile_major_key(&layout);
        let p = |r, c| InteriorPoint {
            point: GridPoint::new(r, c),
            cell: CostSource::nodata(),
        };
        // (1, 7) is in tile (0, 1), (3, 1) in tile (0, 0)
        assert!(key(&p(3, 1)) < key(&p(1, 7)));
        assert!(key(&p(1, 7)) < key(&p(5, 1)));
    }
}
