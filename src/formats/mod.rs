//! On-disk artifacts of the tiled pipeline
//!
//! All intermediate data lives in fixed-size record streams (see [`stream`]) inside the
//! work directory; [`manifest`] tracks which of them are current.

pub mod crc;
pub mod manifest;
pub mod sort;
pub mod stream;

pub use manifest::{ArtifactEntry, LockFile, LOCK_FILE};
pub use sort::sort_stream;
pub use stream::{Record, RecordReader, RecordWriter, StreamSummary};

/// Non-boundary cells, tile-major after sorting
pub const INTERIOR_STREAM: &str = "interior.stream";
/// Cost+source values of every boundary point, indexed by boundary offset
pub const BOUNDARY_COST: &str = "boundary.cost";
/// Boundary-to-boundary substitute graph edges
pub const B2B_STREAM: &str = "b2b.stream";
/// Source-to-boundary distances within each tile
pub const S2B_STREAM: &str = "s2b.stream";
/// Resolved boundary distances, indexed by boundary offset
pub const PHASE2_BOUNDARY: &str = "phase2.bnd";
/// Interior distances in row-major order
pub const FINAL_STREAM: &str = "final.stream";
