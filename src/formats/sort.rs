//! External merge sort over record streams
//!
//! Runs of at most `run_records` records are sorted in memory (stable) and spilled to
//! temporary files next to the output, then merged k-way through a min-heap keyed on
//! `(key, run index)`. Equal keys therefore keep their input order. At most
//! [`MERGE_FANOUT`] runs are open at once; longer run lists are merged in consecutive groups
//! over several passes. The result is written to a temporary file and renamed over
//! `output`, so sorting a stream in place is allowed.

use log::debug;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};

use super::stream::{Record, RecordReader, RecordWriter, StreamSummary};
use crate::core::Result;

/// Most runs merged at once; each open run holds one file descriptor
const MERGE_FANOUT: usize = 256;

fn scratch_file(dir: &Path, prefix: &str) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Sort `input` into `output` by `key`; returns the summary of the sorted stream
pub fn sort_stream<T, K, F>(
    input: &Path,
    output: &Path,
    run_records: usize,
    key: F,
) -> Result<StreamSummary>
where
    T: Record,
    K: Ord + Copy,
    F: Fn(&T) -> K,
{
    let run_records = run_records.max(1);
    let dir = parent_dir(output);
    let mut reader = RecordReader::<T>::open(input)?;
    let total = reader.len();

    let mut runs: Vec<TempPath> = Vec::new();
    let mut buf: Vec<T> = Vec::with_capacity(run_records.min(total as usize));

    // Spill sorted runs; a stream that fits in one run skips the merge entirely
    loop {
        buf.clear();
        while buf.len() < run_records {
            match reader.read_next()? {
                Some(rec) => buf.push(rec),
                None => break,
            }
        }
        if buf.is_empty() {
            break;
        }
        buf.sort_by_key(|r| key(r));
        if runs.is_empty() && reader.position() == total {
            break;
        }
        let run = scratch_file(dir, ".tc-run-")?.into_temp_path();
        let mut writer = RecordWriter::<T>::create(&run)?;
        for rec in &buf {
            writer.append(rec)?;
        }
        writer.finish()?;
        runs.push(run);
        buf.clear();
    }
    drop(reader);

    if runs.len() > MERGE_FANOUT {
        debug!(
            "{} runs exceed the merge fan-out of {}; merging in passes",
            runs.len(),
            MERGE_FANOUT
        );
    }
    // Consecutive groups keep run order, so stability survives every pass
    while runs.len() > MERGE_FANOUT {
        let mut merged = Vec::with_capacity(runs.len().div_ceil(MERGE_FANOUT));
        for group in runs.chunks(MERGE_FANOUT) {
            let run = scratch_file(dir, ".tc-run-")?.into_temp_path();
            let mut writer = RecordWriter::<T>::create(&run)?;
            merge_runs(group, &mut writer, &key)?;
            writer.finish()?;
            merged.push(run);
        }
        runs = merged;
    }

    let out = scratch_file(dir, ".tc-sorted-")?;
    let mut writer = RecordWriter::<T>::create(out.path())?;

    if runs.is_empty() {
        for rec in &buf {
            writer.append(rec)?;
        }
    } else {
        debug!(
            "merging {} runs of up to {} records into {}",
            runs.len(),
            run_records,
            output.display()
        );
        merge_runs(&runs, &mut writer, &key)?;
    }

    let summary = writer.finish()?;
    out.persist(output).map_err(|e| e.error)?;
    Ok(summary)
}

/// k-way merge of sorted runs; ties go to the lower run index
fn merge_runs<T, K, F>(runs: &[TempPath], writer: &mut RecordWriter<T>, key: &F) -> Result<()>
where
    T: Record,
    K: Ord + Copy,
    F: Fn(&T) -> K,
{
    let mut readers = runs
        .iter()
        .map(RecordReader::<T>::open)
        .collect::<Result<Vec<_>>>()?;
    let mut heads: Vec<Option<T>> = Vec::with_capacity(readers.len());
    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (idx, r) in readers.iter_mut().enumerate() {
        let head = r.read_next()?;
        if let Some(rec) = &head {
            heap.push(Reverse((key(rec), idx)));
        }
        heads.push(head);
    }

    while let Some(Reverse((_, idx))) = heap.pop() {
        if let Some(rec) = heads[idx].take() {
            writer.append(&rec)?;
        }
        let next = readers[idx].read_next()?;
        if let Some(rec) = &next {
            heap.push(Reverse((key(rec), idx)));
        }
        heads[idx] = next;
    }
    Ok(())
}
