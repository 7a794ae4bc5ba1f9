//! Per-tile boundary reader
//!
//! Hands out one tile's rim at a time, either from an in-memory copy or straight from the
//! serialized stream. The stream path reads the three contiguous runs of the rim (left +
//! top + right, bottom-left corner, bottom + bottom-right corner) with at most two seeks.

use log::trace;
use std::path::Path;

use super::{BoundaryIndex, BoundaryStore, CachedBoundary};
use crate::core::{Dim, Error, GridPoint, Result};
use crate::formats::stream::{Record, RecordReader, StreamSummary};

enum Source<T: Record> {
    Cached(CachedBoundary<T>),
    Stream(RecordReader<T>),
}

pub struct BoundaryTileReader<T: Record> {
    index: BoundaryIndex,
    source: Source<T>,
    rim: Vec<GridPoint>,
}

impl<T: Record> BoundaryTileReader<T> {
    pub fn from_cached(store: CachedBoundary<T>) -> Self {
        Self {
            index: store.index().clone(),
            source: Source::Cached(store),
            rim: Vec::new(),
        }
    }

    pub fn from_stream(index: BoundaryIndex, path: &Path) -> Result<Self> {
        let reader = RecordReader::<T>::open(path)?;
        if reader.len() != index.len() {
            return Err(Error::invariant(format!(
                "{} holds {} boundary values, layout has {}",
                path.display(),
                reader.len(),
                index.len()
            )));
        }
        Ok(Self {
            index,
            source: Source::Stream(reader),
            rim: Vec::new(),
        })
    }

    /// Load the whole stream into memory when `cache` is set, else read rims on demand
    pub fn open(index: BoundaryIndex, path: &Path, cache: bool) -> Result<Self> {
        if cache {
            Ok(Self::from_cached(CachedBoundary::reconstruct(index, path)?))
        } else {
            Self::from_stream(index, path)
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.source, Source::Cached(_))
    }

    /// Rim points of the tile most recently filled, matching `values` of [`fill_tile`](Self::fill_tile)
    pub fn rim(&self) -> &[GridPoint] {
        &self.rim
    }

    /// Read one tile's rim values, in [`BoundaryIndex::rim_points`] order
    pub fn fill_tile(&mut self, tr: Dim, tc: Dim, values: &mut Vec<T>) -> Result<()> {
        self.index.rim_points(tr, tc, &mut self.rim);
        values.clear();
        let expected = self.index.per_tile() as u64;
        match &mut self.source {
            Source::Cached(store) => {
                for p in &self.rim {
                    values.push(store.at(self.index.pos(p.row, p.col)));
                }
            }
            Source::Stream(reader) => {
                for (start, count) in self.index.rim_runs(tr, tc) {
                    reader.seek(start)?;
                    reader.read_exact_records(count, values)?;
                }
                trace!("tile ({tr}, {tc}): read {} rim values from stream", values.len());
            }
        }
        if values.len() as u64 != expected {
            return Err(Error::invariant(format!(
                "tile ({tr}, {tc}) rim: read {} values, expected {expected}",
                values.len()
            )));
        }
        Ok(())
    }
}

impl<T: Record> BoundaryStore<T> for BoundaryTileReader<T> {
    fn index(&self) -> &BoundaryIndex {
        &self.index
    }

    fn get(&mut self, point: GridPoint) -> Result<T> {
        let pos = self.index.checked_pos(point)?;
        match &mut self.source {
            Source::Cached(store) => Ok(store.at(pos)),
            Source::Stream(reader) => {
                reader.seek(pos)?;
                reader.read_next()?.ok_or_else(|| {
                    Error::invariant(format!("boundary stream ended before offset {pos}"))
                })
            }
        }
    }

    fn insert(&mut self, _point: GridPoint, _value: T) -> Result<()> {
        Err(Error::Unsupported("a boundary tile reader"))
    }

    fn serialize(&mut self, path: &Path) -> Result<StreamSummary> {
        match &mut self.source {
            Source::Cached(store) => store.serialize(path),
            Source::Stream(_) => Err(Error::Unsupported("a streaming boundary tile reader")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GridLayout;
    use tempfile::TempDir;

    /// Boundary store whose value at each offset is the offset itself
    fn numbered(layout: &GridLayout, dir: &Path) -> (BoundaryIndex, std::path::PathBuf) {
        let index = BoundaryIndex::new(layout).unwrap();
        let mut store = CachedBoundary::new(index.clone(), 0.0f32);
        for p in 0..index.len() {
            store.set(p, p as f32);
        }
        let path = dir.join("numbered.bnd");
        store.serialize(&path).unwrap();
        (index, path)
    }

    #[test]
    fn test_stream_and_cached_rims_agree_exhaustively() {
        let dir = TempDir::new().unwrap();
        for (nr, nc, tr, tc) in [(5, 5, 3, 3), (9, 9, 3, 3), (7, 11, 4, 4), (9, 9, 5, 5)] {
            let layout = GridLayout::new(nr, nc, tr, tc).unwrap();
            let (index, path) = numbered(&layout, dir.path());
            let mut cached = BoundaryTileReader::<f32>::open(index.clone(), &path, true).unwrap();
            let mut streamed = BoundaryTileReader::<f32>::open(index.clone(), &path, false).unwrap();
            assert!(cached.is_cached() && !streamed.is_cached());

            let (ntr, ntc) = layout.tile_grid();
            let (mut a, mut b) = (Vec::new(), Vec::new());
            for r in 0..ntr {
                for c in 0..ntc {
                    cached.fill_tile(r, c, &mut a).unwrap();
                    streamed.fill_tile(r, c, &mut b).unwrap();
                    assert_eq!(a, b, "tile ({r}, {c}) of {nr}x{nc}/{tr}x{tc}");
                    for (p, v) in streamed.rim().iter().zip(&b) {
                        assert_eq!(index.pos(p.row, p.col) as f32, *v);
                    }
                }
            }
        }
    }

    #[test]
    fn test_streamed_get_seeks() {
        let dir = TempDir::new().unwrap();
        let layout = GridLayout::new(9, 9, 5, 5).unwrap();
        let (index, path) = numbered(&layout, dir.path());
        let mut reader = BoundaryTileReader::<f32>::open(index.clone(), &path, false).unwrap();
        assert_eq!(reader.get(GridPoint::new(8, 3)).unwrap(), index.pos(8, 3) as f32);
        assert_eq!(reader.get(GridPoint::new(0, 0)).unwrap(), 0.0);
        assert!(matches!(
            reader.insert(GridPoint::new(0, 0), 1.0),
            Err(Error::Unsupported(_))
        ));
    }
}
