//! # Terracost
//!
//! Least-cost distance surfaces over raster grids too large for memory.
//!
//! The grid is cut into tiles that overlap on shared rim rows and columns. Each tile
//! condenses into a small graph between its rim points, those graphs are solved together
//! as one substitute graph, and the results are pushed back into every tile. Only one
//! tile plus the boundary stores are resident at any time; everything else lives as
//! checksummed record streams in a work directory, so a run can stop after any phase
//! and continue later.
//!
//! ```no_run
//! use terracost::{cost_distance, GridPoint, MemoryRaster, TerracostConfig};
//!
//! # fn main() -> terracost::Result<()> {
//! let mut raster = MemoryRaster::from_fn(100, 100, |_, _| 1.0)
//!     .with_sources(&[GridPoint::new(50, 50)]);
//! let config = TerracostConfig {
//!     num_tiles: Some(4),
//!     ..Default::default()
//! };
//! let surface = cost_distance(&mut raster, &config)?;
//! println!("distance to corner: {}", surface.get(0, 0));
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod core;
pub mod dijkstra;
pub mod engine;
pub mod formats;
pub mod phases;
pub mod pqueue;
pub mod raster;
pub mod tile;
pub mod tile_factory;

pub use crate::boundary::{BoundaryIndex, BoundaryStore};
pub use crate::core::{
    initialize_tile_size, is_nodata, Error, GridLayout, GridPoint, Resolution, Result,
    TerracostConfig, TilePlan, TileSizing, NODATA,
};
pub use crate::engine::{reference_distances, Engine, EngineOptions, RunReport};
pub use crate::formats::LockFile;
pub use crate::phases::{Phase, ProgressCallback, RunMode};
pub use crate::raster::{MemoryRaster, MemorySink, RasterSink, RasterSource, RawRaster, RawRasterWriter};

/// Compute the full distance surface of `raster` in one call
///
/// Runs every phase in `config.work_dir` and collects the result in memory.
pub fn cost_distance<S: RasterSource>(raster: &mut S, config: &TerracostConfig) -> Result<MemorySink> {
    let mut engine = Engine::new(
        config.clone(),
        raster.rows(),
        raster.cols(),
        EngineOptions::default(),
    )?;
    let mut sink = MemorySink::new(raster.rows(), raster.cols());
    engine.run(RunMode::ALL, Some(raster), Some(&mut sink))?;
    Ok(sink)
}
