//! Fully in-memory boundary store

use std::path::Path;

use super::{BoundaryIndex, BoundaryStore};
use crate::core::{Error, GridPoint, Result};
use crate::formats::stream::{Record, RecordReader, RecordWriter, StreamSummary};

/// All `NB` values in one array, addressed by boundary offset
#[derive(Debug, Clone)]
pub struct CachedBoundary<T: Record> {
    index: BoundaryIndex,
    values: Vec<T>,
}

impl<T: Record> CachedBoundary<T> {
    pub fn new(index: BoundaryIndex, fill: T) -> Self {
        let values = vec![fill; index.len() as usize];
        Self { index, values }
    }

    /// Load a stream written by [`BoundaryStore::serialize`]
    pub fn reconstruct(index: BoundaryIndex, path: &Path) -> Result<Self> {
        let mut reader = RecordReader::<T>::open(path)?;
        if reader.len() != index.len() {
            return Err(Error::invariant(format!(
                "{} holds {} boundary values, layout has {}",
                path.display(),
                reader.len(),
                index.len()
            )));
        }
        let mut values = Vec::with_capacity(index.len() as usize);
        reader.read_exact_records(index.len(), &mut values)?;
        Ok(Self { index, values })
    }

    #[inline]
    pub fn at(&self, pos: u64) -> T {
        self.values[pos as usize]
    }

    #[inline]
    pub fn set(&mut self, pos: u64, value: T) {
        self.values[pos as usize] = value;
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn lookup(&self, point: GridPoint) -> T {
        self.values[self.index.pos(point.row, point.col) as usize]
    }
}

impl<T: Record> BoundaryStore<T> for CachedBoundary<T> {
    fn index(&self) -> &BoundaryIndex {
        &self.index
    }

    fn get(&mut self, point: GridPoint) -> Result<T> {
        let pos = self.index.checked_pos(point)?;
        Ok(self.at(pos))
    }

    fn insert(&mut self, point: GridPoint, value: T) -> Result<()> {
        let pos = self.index.checked_pos(point)?;
        self.set(pos, value);
        Ok(())
    }

    fn serialize(&mut self, path: &Path) -> Result<StreamSummary> {
        let mut writer = RecordWriter::<T>::create(path)?;
        for v in &self.values {
            writer.append(v)?;
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CostSource, GridLayout};
    use tempfile::TempDir;

    #[test]
    fn test_serialize_then_reconstruct() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("boundary.cost");
        let index = BoundaryIndex::new(&GridLayout::new(9, 9, 3, 3).unwrap()).unwrap();
        let mut store = CachedBoundary::new(index.clone(), CostSource::nodata());
        store.insert(GridPoint::new(0, 0), CostSource::new(1.5, true)).unwrap();
        store.insert(GridPoint::new(4, 7), CostSource::new(3.0, false)).unwrap();
        let summary = store.serialize(&path).unwrap();
        assert_eq!(summary.records, index.len());

        let mut back = CachedBoundary::<CostSource>::reconstruct(index, &path).unwrap();
        assert_eq!(back.get(GridPoint::new(4, 7)).unwrap(), CostSource::new(3.0, false));
        assert!(back.get(GridPoint::new(8, 8)).unwrap().is_null());
        assert_eq!(back.values(), store.values());
    }

    #[test]
    fn test_reconstruct_rejects_wrong_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("phase2.bnd");
        crate::formats::stream::write_all(&path, &[0.0f32; 3]).unwrap();
        let index = BoundaryIndex::new(&GridLayout::new(5, 5, 3, 3).unwrap()).unwrap();
        let err = CachedBoundary::<f32>::reconstruct(index, &path).unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn test_insert_rejects_interior_point() {
        let index = BoundaryIndex::new(&GridLayout::new(5, 5, 3, 3).unwrap()).unwrap();
        let mut store = CachedBoundary::new(index, 0.0f32);
        assert!(store.insert(GridPoint::new(1, 1), 2.0).is_err());
    }
}
