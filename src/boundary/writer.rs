//! Write-once boundary builder
//!
//! Collects boundary values during one phase and commits them to disk exactly once.
//! When the full array fits the memory budget it is buffered in a [`CachedBoundary`];
//! otherwise inserts are appended to a scratch stream of `(offset, value)` pairs that
//! `serialize` sorts and expands into the flat `NB`-long layout, filling gaps.

use log::debug;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{BoundaryIndex, BoundaryStore, CachedBoundary};
use crate::core::{Error, GridPoint, Result};
use crate::formats::sort::sort_stream;
use crate::formats::stream::{Record, RecordReader, RecordWriter, StreamSummary};

/// A value tagged with its boundary offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Positioned<T: Record> {
    pub pos: u64,
    pub value: T,
}

impl<T: Record> Record for Positioned<T> {
    const SIZE: usize = 8 + T::SIZE;
    const KIND: u16 = 0x100 | T::KIND;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.pos.to_le_bytes());
        self.value.encode(&mut buf[8..]);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut pos = [0u8; 8];
        pos.copy_from_slice(&buf[0..8]);
        Self {
            pos: u64::from_le_bytes(pos),
            value: T::decode(&buf[8..]),
        }
    }
}

struct Spill<T: Record> {
    scratch: NamedTempFile,
    writer: Option<RecordWriter<Positioned<T>>>,
    fill: T,
    run_records: usize,
}

enum Backing<T: Record> {
    Buffered(CachedBoundary<T>),
    Spilled(Spill<T>),
}

pub struct BoundaryWriter<T: Record> {
    index: BoundaryIndex,
    backing: Backing<T>,
    inserts: u64,
}

impl<T: Record> BoundaryWriter<T> {
    pub fn in_memory(index: BoundaryIndex, fill: T) -> Self {
        Self {
            backing: Backing::Buffered(CachedBoundary::new(index.clone(), fill)),
            index,
            inserts: 0,
        }
    }

    /// Spill inserts to a scratch stream inside `scratch_dir`
    pub fn spilling(
        index: BoundaryIndex,
        fill: T,
        scratch_dir: &Path,
        run_records: usize,
    ) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(".tc-bnd-")
            .tempfile_in(scratch_dir)?;
        let writer = RecordWriter::create(scratch.path())?;
        Ok(Self {
            index,
            backing: Backing::Spilled(Spill {
                scratch,
                writer: Some(writer),
                fill,
                run_records,
            }),
            inserts: 0,
        })
    }

    /// Pick the backing from whether `NB` values fit in memory
    pub fn for_budget(
        index: BoundaryIndex,
        fill: T,
        cached: bool,
        scratch_dir: &Path,
        run_records: usize,
    ) -> Result<Self> {
        if cached {
            Ok(Self::in_memory(index, fill))
        } else {
            Self::spilling(index, fill, scratch_dir, run_records)
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.backing, Backing::Buffered(_))
    }

    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    /// Current value when buffered; spilled writers cannot answer reads
    pub fn peek(&self, point: GridPoint) -> Option<T> {
        match &self.backing {
            Backing::Buffered(store) => Some(store.lookup(point)),
            Backing::Spilled(_) => None,
        }
    }

    fn expand(spill: &mut Spill<T>, len: u64, path: &Path) -> Result<StreamSummary> {
        let writer = spill
            .writer
            .take()
            .ok_or(Error::Unsupported("an already serialized boundary writer"))?;
        let written = writer.finish()?;
        let sorted: PathBuf = spill.scratch.path().to_path_buf();
        sort_stream(&sorted, &sorted, spill.run_records, |r: &Positioned<T>| r.pos)?;
        debug!(
            "expanding {} spilled boundary values into {} offsets",
            written.records, len
        );

        let mut reader = RecordReader::<Positioned<T>>::open(&sorted)?;
        let mut out = RecordWriter::<T>::create(path)?;
        let mut pending = reader.read_next()?;
        for pos in 0..len {
            let mut value = spill.fill;
            // Stable sort keeps insertion order, so the last insert for an offset wins
            while let Some(rec) = pending {
                if rec.pos != pos {
                    break;
                }
                value = rec.value;
                pending = reader.read_next()?;
            }
            out.append(&value)?;
        }
        if let Some(rec) = pending {
            return Err(Error::invariant(format!(
                "boundary offset {} out of range (NB = {len})",
                rec.pos
            )));
        }
        out.finish()
    }
}

impl<T: Record> BoundaryStore<T> for BoundaryWriter<T> {
    fn index(&self) -> &BoundaryIndex {
        &self.index
    }

    fn get(&mut self, point: GridPoint) -> Result<T> {
        match &mut self.backing {
            Backing::Buffered(store) => store.get(point),
            Backing::Spilled(_) => Err(Error::Unsupported("a spilling boundary writer")),
        }
    }

    fn insert(&mut self, point: GridPoint, value: T) -> Result<()> {
        let pos = self.index.checked_pos(point)?;
        match &mut self.backing {
            Backing::Buffered(store) => store.set(pos, value),
            Backing::Spilled(spill) => match spill.writer.as_mut() {
                Some(w) => w.append(&Positioned { pos, value })?,
                None => return Err(Error::Unsupported("an already serialized boundary writer")),
            },
        }
        self.inserts += 1;
        Ok(())
    }

    fn serialize(&mut self, path: &Path) -> Result<StreamSummary> {
        let len = self.index.len();
        match &mut self.backing {
            Backing::Buffered(store) => store.serialize(path),
            Backing::Spilled(spill) => Self::expand(spill, len, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GridLayout, NODATA};
    use crate::formats::stream::read_all;
    use tempfile::TempDir;

    fn index() -> BoundaryIndex {
        BoundaryIndex::new(&GridLayout::new(9, 9, 3, 3).unwrap()).unwrap()
    }

    #[test]
    fn test_spilled_and_buffered_serialize_identically() {
        let dir = TempDir::new().unwrap();
        let idx = index();
        let mut buffered = BoundaryWriter::in_memory(idx.clone(), NODATA);
        let mut spilled = BoundaryWriter::spilling(idx.clone(), NODATA, dir.path(), 4).unwrap();
        assert!(!spilled.is_buffered());

        // Reverse offset order with one overwrite
        for p in (0..idx.len()).rev().step_by(3) {
            let point = idx.point(p);
            buffered.insert(point, p as f32).unwrap();
            spilled.insert(point, p as f32).unwrap();
        }
        buffered.insert(GridPoint::new(0, 0), 7.0).unwrap();
        spilled.insert(GridPoint::new(0, 0), 7.0).unwrap();

        let a = dir.path().join("a.bnd");
        let b = dir.path().join("b.bnd");
        buffered.serialize(&a).unwrap();
        spilled.serialize(&b).unwrap();
        let va: Vec<f32> = read_all(&a).unwrap();
        let vb: Vec<f32> = read_all(&b).unwrap();
        assert_eq!(va.len() as u64, idx.len());
        assert_eq!(va, vb);
        assert_eq!(va[0], 7.0);
        assert!(vb.contains(&NODATA));
    }

    #[test]
    fn test_spilled_writer_is_write_only() {
        let dir = TempDir::new().unwrap();
        let mut w = BoundaryWriter::spilling(index(), 0.0f32, dir.path(), 16).unwrap();
        assert!(matches!(
            w.get(GridPoint::new(0, 0)),
            Err(Error::Unsupported(_))
        ));
        assert!(w.peek(GridPoint::new(0, 0)).is_none());
        w.serialize(&dir.path().join("out.bnd")).unwrap();
        assert!(w.insert(GridPoint::new(0, 0), 1.0).is_err());
    }
}
