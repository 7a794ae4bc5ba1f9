//! Raster collaborator contracts
//!
//! The engine reads costs and source flags row by row through [`RasterSource`] and hands
//! finished distance rows to a [`RasterSink`]. Two simple adapters are provided: in-memory
//! grids, and headerless little-endian `f32` files with an optional `u8` source mask.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::core::{Dim, Error, GridPoint, Result};

/// Row-major cost/source input; a NaN cost marks a null cell
pub trait RasterSource {
    fn rows(&self) -> Dim;
    fn cols(&self) -> Dim;
    /// Fill `costs` and `sources` (both `cols()` long) for one row
    fn read_row(&mut self, row: Dim, costs: &mut [f32], sources: &mut [bool]) -> Result<()>;
}

/// Row-major distance output; unreachable and null cells arrive as `NODATA`
pub trait RasterSink {
    fn write_row(&mut self, row: Dim, values: &[f32]) -> Result<()>;
}

fn check_row_buffers(cols: Dim, costs: &[f32], sources: &[bool]) -> Result<()> {
    if costs.len() != cols as usize || sources.len() != cols as usize {
        return Err(Error::invariant(format!(
            "row buffers are {}/{} long, raster has {cols} columns",
            costs.len(),
            sources.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MemoryRaster {
    rows: Dim,
    cols: Dim,
    costs: Vec<f32>,
    sources: Vec<bool>,
}

impl MemoryRaster {
    pub fn new(rows: Dim, cols: Dim, costs: Vec<f32>) -> Result<Self> {
        if costs.len() != rows as usize * cols as usize {
            return Err(Error::InvalidInput(format!(
                "{} costs for a {rows}x{cols} raster",
                costs.len()
            )));
        }
        Ok(Self {
            rows,
            cols,
            sources: vec![false; costs.len()],
            costs,
        })
    }

    pub fn from_fn(rows: Dim, cols: Dim, f: impl Fn(Dim, Dim) -> f32) -> Self {
        let mut costs = Vec::with_capacity(rows as usize * cols as usize);
        for r in 0..rows {
            for c in 0..cols {
                costs.push(f(r, c));
            }
        }
        Self {
            rows,
            cols,
            sources: vec![false; costs.len()],
            costs,
        }
    }

    pub fn set_source(&mut self, row: Dim, col: Dim) {
        let i = row as usize * self.cols as usize + col as usize;
        self.sources[i] = true;
    }

    pub fn with_sources(mut self, points: &[GridPoint]) -> Self {
        for p in points {
            self.set_source(p.row, p.col);
        }
        self
    }

    pub fn set_cost(&mut self, row: Dim, col: Dim, cost: f32) {
        let i = row as usize * self.cols as usize + col as usize;
        self.costs[i] = cost;
    }

    pub fn cost(&self, row: Dim, col: Dim) -> f32 {
        self.costs[row as usize * self.cols as usize + col as usize]
    }

    pub fn is_source(&self, row: Dim, col: Dim) -> bool {
        self.sources[row as usize * self.cols as usize + col as usize]
    }
}

impl RasterSource for MemoryRaster {
    fn rows(&self) -> Dim {
        self.rows
    }

    fn cols(&self) -> Dim {
        self.cols
    }

    fn read_row(&mut self, row: Dim, costs: &mut [f32], sources: &mut [bool]) -> Result<()> {
        check_row_buffers(self.cols, costs, sources)?;
        let start = row as usize * self.cols as usize;
        let end = start + self.cols as usize;
        costs.copy_from_slice(&self.costs[start..end]);
        sources.copy_from_slice(&self.sources[start..end]);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemorySink {
    rows: Dim,
    cols: Dim,
    values: Vec<f32>,
}

impl MemorySink {
    pub fn new(rows: Dim, cols: Dim) -> Self {
        Self {
            rows,
            cols,
            values: vec![crate::core::NODATA; rows as usize * cols as usize],
        }
    }

    pub fn get(&self, row: Dim, col: Dim) -> f32 {
        self.values[row as usize * self.cols as usize + col as usize]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

impl RasterSink for MemorySink {
    fn write_row(&mut self, row: Dim, values: &[f32]) -> Result<()> {
        if row >= self.rows || values.len() != self.cols as usize {
            return Err(Error::invariant(format!(
                "row {row} of {} values does not fit a {}x{} sink",
                values.len(),
                self.rows,
                self.cols
            )));
        }
        let start = row as usize * self.cols as usize;
        self.values[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }
}

/// Headerless little-endian `f32` raster, optionally with a `u8` source mask
pub struct RawRaster {
    rows: Dim,
    cols: Dim,
    costs: BufReader<File>,
    mask: Option<BufReader<File>>,
    /// Extra sources given by coordinate, sorted row-major
    extra_sources: Vec<GridPoint>,
    bytes: Vec<u8>,
}

fn expect_len(path: &Path, file: &File, expected: u64) -> Result<()> {
    let len = file.metadata()?.len();
    if len != expected {
        return Err(Error::format(
            path,
            format!("{len} bytes, expected {expected} for the declared grid"),
        ));
    }
    Ok(())
}

impl RawRaster {
    pub fn open(path: &Path, rows: Dim, cols: Dim, mask: Option<&Path>) -> Result<Self> {
        let cells = rows as u64 * cols as u64;
        let file = File::open(path)?;
        expect_len(path, &file, cells * 4)?;
        let mask = match mask {
            Some(m) => {
                let f = File::open(m)?;
                expect_len(m, &f, cells)?;
                Some(BufReader::new(f))
            }
            None => None,
        };
        Ok(Self {
            rows,
            cols,
            costs: BufReader::new(file),
            mask,
            extra_sources: Vec::new(),
            bytes: vec![0u8; cols as usize * 4],
        })
    }

    pub fn with_sources(mut self, mut points: Vec<GridPoint>) -> Result<Self> {
        if let Some(p) = points.iter().find(|p| p.row >= self.rows || p.col >= self.cols) {
            return Err(Error::InvalidInput(format!(
                "source {p} lies outside the {}x{} raster",
                self.rows, self.cols
            )));
        }
        points.sort();
        points.dedup();
        self.extra_sources = points;
        Ok(self)
    }
}

impl RasterSource for RawRaster {
    fn rows(&self) -> Dim {
        self.rows
    }

    fn cols(&self) -> Dim {
        self.cols
    }

    fn read_row(&mut self, row: Dim, costs: &mut [f32], sources: &mut [bool]) -> Result<()> {
        check_row_buffers(self.cols, costs, sources)?;
        let cols = self.cols as u64;
        self.costs.seek(SeekFrom::Start(row as u64 * cols * 4))?;
        self.costs.read_exact(&mut self.bytes)?;
        for (c, chunk) in self.bytes.chunks_exact(4).enumerate() {
            costs[c] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        match &mut self.mask {
            Some(mask) => {
                mask.seek(SeekFrom::Start(row as u64 * cols))?;
                let flags = &mut self.bytes[..self.cols as usize];
                mask.read_exact(flags)?;
                for (s, &b) in sources.iter_mut().zip(flags.iter()) {
                    *s = b != 0;
                }
            }
            None => sources.fill(false),
        }

        let start = self.extra_sources.partition_point(|p| p.row < row);
        for p in self.extra_sources[start..].iter().take_while(|p| p.row == row) {
            sources[p.col as usize] = true;
        }
        Ok(())
    }
}

/// Sequential writer for headerless little-endian `f32` rasters
pub struct RawRasterWriter {
    out: BufWriter<File>,
    cols: Dim,
    next_row: Dim,
}

impl RawRasterWriter {
    pub fn create(path: &Path, cols: Dim) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            cols,
            next_row: 0,
        })
    }

    pub fn rows_written(&self) -> Dim {
        self.next_row
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl RasterSink for RawRasterWriter {
    fn write_row(&mut self, row: Dim, values: &[f32]) -> Result<()> {
        if row != self.next_row || values.len() != self.cols as usize {
            return Err(Error::invariant(format!(
                "raw raster rows must arrive in order: got row {row} ({} values), expected row {}",
                values.len(),
                self.next_row
            )));
        }
        for v in values {
            self.out.write_all(&v.to_le_bytes())?;
        }
        self.next_row += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NODATA;
    use tempfile::TempDir;

    #[test]
    fn test_memory_raster_rows() {
        let mut raster = MemoryRaster::from_fn(2, 3, |r, c| (r * 3 + c) as f32)
            .with_sources(&[GridPoint::new(1, 2)]);
        let mut costs = vec![0.0; 3];
        let mut sources = vec![false; 3];
        raster.read_row(1, &mut costs, &mut sources).unwrap();
        assert_eq!(costs, vec![3.0, 4.0, 5.0]);
        assert_eq!(sources, vec![false, false, true]);
        assert!(MemoryRaster::new(2, 2, vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_raw_raster_with_mask_and_extra_sources() {
        let dir = TempDir::new().unwrap();
        let costs_path = dir.path().join("costs.f32");
        let mask_path = dir.path().join("sources.u8");
        let values: Vec<f32> = vec![1.0, 2.0, f32::NAN, 4.0, 5.0, 6.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&costs_path, bytes).unwrap();
        std::fs::write(&mask_path, [0u8, 1, 0, 0, 0, 0]).unwrap();

        let mut raster = RawRaster::open(&costs_path, 2, 3, Some(&mask_path))
            .unwrap()
            .with_sources(vec![GridPoint::new(1, 0)])
            .unwrap();
        let mut costs = vec![0.0; 3];
        let mut sources = vec![false; 3];
        raster.read_row(0, &mut costs, &mut sources).unwrap();
        assert_eq!(&costs[..2], &[1.0, 2.0]);
        assert!(costs[2].is_nan());
        assert_eq!(sources, vec![false, true, false]);
        raster.read_row(1, &mut costs, &mut sources).unwrap();
        assert_eq!(costs, vec![4.0, 5.0, 6.0]);
        assert_eq!(sources, vec![true, false, false]);
    }

    #[test]
    fn test_raw_raster_size_check() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.f32");
        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(matches!(
            RawRaster::open(&path, 2, 2, None),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_raw_writer_requires_row_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.f32");
        let mut w = RawRasterWriter::create(&path, 2).unwrap();
        w.write_row(0, &[1.0, NODATA]).unwrap();
        assert!(w.write_row(2, &[0.0, 0.0]).is_err());
        w.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 8);
    }
}
