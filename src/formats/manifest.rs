//! Lock file describing the artifacts in a work directory
//!
//! Each phase appends its outputs here (record count + body CRC-64) once it has fully
//! completed. A later invocation reads the lock file back, checks that the grid layout
//! matches, and refuses to start a phase whose inputs are missing or altered.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::stream::{self, Record, RecordReader, StreamSummary};
use crate::core::{Error, GridLayout, Resolution, Result};
use crate::phases::Phase;

pub const LOCK_FILE: &str = "terracost.lock.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub file: String,
    pub records: u64,
    pub crc64: u64,
    pub written_at_utc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub version: String,
    pub created_at_utc: String,
    pub updated_at_utc: String,
    pub layout: GridLayout,
    pub resolution: Resolution,
    /// Source cells accepted by the load phase
    pub sources: u64,
    pub completed: Vec<Phase>,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

impl LockFile {
    pub fn new(layout: GridLayout, resolution: Resolution) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            version: env!("TERRACOST_VERSION").to_string(),
            created_at_utc: now.clone(),
            updated_at_utc: now,
            layout,
            resolution,
            sources: 0,
            completed: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(LOCK_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let file = File::open(Self::path(dir))?;
        let lock: LockFile = serde_json::from_reader(BufReader::new(file))?;
        lock.layout.check_tileable()?;
        Ok(lock)
    }

    /// Write via a temporary file so a crash never leaves a half-written lock
    pub fn write(&mut self, dir: &Path) -> Result<()> {
        self.updated_at_utc = Utc::now().to_rfc3339();
        let tmp = tempfile::Builder::new()
            .prefix(".tc-lock-")
            .tempfile_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.persist(Self::path(dir)).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn check_layout(&self, layout: &GridLayout) -> Result<()> {
        if self.layout != *layout {
            return Err(Error::InvalidConfig(format!(
                "work directory holds a {}x{} grid tiled {}x{}, this run uses {}x{} tiled {}x{}",
                self.layout.nrows,
                self.layout.ncols,
                self.layout.tile_rows,
                self.layout.tile_cols,
                layout.nrows,
                layout.ncols,
                layout.tile_rows,
                layout.tile_cols
            )));
        }
        Ok(())
    }

    pub fn is_completed(&self, phase: Phase) -> bool {
        self.completed.contains(&phase)
    }

    /// Record a finished phase; anything downstream of it is now stale
    pub fn mark_completed(&mut self, phase: Phase) {
        self.invalidate_from(phase);
        self.completed.push(phase);
    }

    /// Forget `phase` and everything after it, before its outputs are overwritten
    pub fn invalidate_from(&mut self, phase: Phase) {
        self.completed.retain(|p| *p < phase);
    }

    pub fn record_artifact(&mut self, name: &str, summary: StreamSummary) {
        self.artifacts.insert(
            name.to_string(),
            ArtifactEntry {
                file: name.to_string(),
                records: summary.records,
                crc64: summary.crc64,
                written_at_utc: Utc::now().to_rfc3339(),
            },
        );
    }

    pub fn artifact(&self, name: &str) -> Result<&ArtifactEntry> {
        self.artifacts.get(name).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "artifact {name} is not in the lock file; run the phase that produces it first"
            ))
        })
    }

    /// Locate an input artifact and check it against its lock entry
    ///
    /// The header (count and stored CRC) is always compared; `deep` also re-scans the body.
    pub fn require<T: Record>(&self, dir: &Path, name: &str, deep: bool) -> Result<PathBuf> {
        let entry = self.artifact(name)?;
        let path = dir.join(&entry.file);
        let found = if deep {
            stream::verify::<T, _>(&path)?
        } else {
            RecordReader::<T>::open(&path)?.summary()
        };
        if found.records != entry.records || found.crc64 != entry.crc64 {
            return Err(Error::format(
                &path,
                format!(
                    "{} records / crc {:#018x} on disk, lock file says {} / {:#018x}",
                    found.records, found.crc64, entry.records, entry.crc64
                ),
            ));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::stream::write_all;
    use tempfile::TempDir;

    fn lock() -> LockFile {
        LockFile::new(GridLayout::new(9, 9, 5, 5).unwrap(), Resolution::default())
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let mut lock = lock();
        lock.sources = 3;
        lock.mark_completed(Phase::Load);
        lock.write(dir.path()).unwrap();

        let back = LockFile::read(dir.path()).unwrap();
        assert_eq!(back.layout, lock.layout);
        assert_eq!(back.sources, 3);
        assert!(back.is_completed(Phase::Load));
        assert!(!back.is_completed(Phase::Final));
    }

    #[test]
    fn test_rerunning_a_phase_invalidates_later_ones() {
        let mut lock = lock();
        lock.mark_completed(Phase::Load);
        lock.mark_completed(Phase::Substitute);
        lock.mark_completed(Phase::InterTile);
        lock.mark_completed(Phase::Substitute);
        assert_eq!(lock.completed, vec![Phase::Load, Phase::Substitute]);
    }

    #[test]
    fn test_require_detects_replaced_artifact() {
        let dir = TempDir::new().unwrap();
        let mut lock = lock();
        let summary = write_all(dir.path().join("s2b.stream"), &[1.0f32, 2.0]).unwrap();
        lock.record_artifact("s2b.stream", summary);
        assert!(lock.require::<f32>(dir.path(), "s2b.stream", true).is_ok());

        write_all(dir.path().join("s2b.stream"), &[1.0f32, 3.0]).unwrap();
        let err = lock.require::<f32>(dir.path(), "s2b.stream", false).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(matches!(
            lock.require::<f32>(dir.path(), "b2b.stream", false),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_layout_mismatch() {
        let lock = lock();
        let other = GridLayout::new(9, 9, 3, 3).unwrap();
        assert!(lock.check_layout(&other).is_err());
        assert!(lock.check_layout(&lock.layout).is_ok());
    }
}
