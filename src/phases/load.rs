//! Phase 1: load and validate the cost grid
//!
//! Rejects negative costs before anything else runs, maps NaN and `NODATA` to null,
//! drops sources sitting on null cells, pads the grid and splits it into the tile-major
//! interior stream and the boundary cost store.

use log::{debug, info, warn};

use super::PhaseContext;
use crate::boundary::BoundaryWriter;
use crate::core::{is_nodata, CostSource, Dim, Error, GridPoint, Result, NEAR_OVERFLOW};
use crate::formats::stream::StreamSummary;
use crate::formats::{BOUNDARY_COST, INTERIOR_STREAM};
use crate::raster::RasterSource;
use crate::tile_factory::TileLoader;

/// Individual warnings logged before switching to a summary count
const WARN_LIMIT: u64 = 10;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoadStats {
    pub cells: u64,
    pub null_cells: u64,
    pub sources: u64,
    pub dropped_sources: u64,
    pub near_overflow: u64,
    pub padding_cells: u64,
    pub interior_points: u64,
    pub boundary_points: u64,
}

pub struct LoadOutput {
    pub stats: LoadStats,
    pub interior: StreamSummary,
    pub boundary: StreamSummary,
}

/// Classify one input cell
pub(crate) fn cell_from(
    point: GridPoint,
    cost: f32,
    source: bool,
    stats: &mut LoadStats,
) -> Result<CostSource> {
    if cost.is_nan() || is_nodata(cost) {
        stats.null_cells += 1;
        if source {
            stats.dropped_sources += 1;
            if stats.dropped_sources <= WARN_LIMIT {
                warn!("source at {point} lies on a null cell and is ignored");
            }
        }
        return Ok(CostSource::nodata());
    }
    if cost < 0.0 {
        return Err(Error::InvalidInput(format!(
            "negative cost {cost} at {point}: costs must be non-negative"
        )));
    }
    if cost >= NEAR_OVERFLOW {
        stats.near_overflow += 1;
        if stats.near_overflow <= WARN_LIMIT {
            warn!("cost {cost} at {point} is close to the maximum; path sums may overflow");
        }
    }
    if source {
        stats.sources += 1;
    }
    Ok(CostSource::new(cost, source))
}

pub fn run<S: RasterSource + ?Sized>(ctx: &PhaseContext<'_>, raster: &mut S) -> Result<LoadOutput> {
    let layout = ctx.plan.layout;
    check_dims(raster, layout.nrows, layout.ncols)?;
    info!(
        "load: {}x{} grid, padded to {}x{}, {} tiles of {}x{}",
        layout.nrows,
        layout.ncols,
        layout.nrows_pad,
        layout.ncols_pad,
        layout.tile_count(),
        layout.tile_rows,
        layout.tile_cols
    );

    let boundary = BoundaryWriter::for_budget(
        ctx.index.clone(),
        CostSource::nodata(),
        ctx.plan.cache_boundary,
        ctx.work_dir,
        ctx.plan.sort_run_records,
    )?;
    let interior_path = ctx.work_dir.join(INTERIOR_STREAM);
    let mut loader = TileLoader::new(&layout, &interior_path, boundary)?;

    let mut stats = LoadStats::default();
    let mut costs = vec![0.0f32; layout.ncols as usize];
    let mut sources = vec![false; layout.ncols as usize];
    for row in 0..layout.nrows {
        raster.read_row(row, &mut costs, &mut sources)?;
        for col in 0..layout.ncols {
            let point = GridPoint::new(row, col);
            let c = col as usize;
            let cell = cell_from(point, costs[c], sources[c], &mut stats)?;
            loader.insert(point, cell)?;
            stats.cells += 1;
        }
        ctx.report(row as u64 + 1, layout.nrows as u64);
    }

    if stats.dropped_sources > WARN_LIMIT {
        warn!("{} sources on null cells ignored in total", stats.dropped_sources);
    }
    if stats.near_overflow > WARN_LIMIT {
        warn!("{} near-overflow costs in total", stats.near_overflow);
    }
    if stats.sources == 0 {
        warn!("grid has no usable source cells; every distance will be NODATA");
    }

    stats.padding_cells = loader.pad()?;
    stats.interior_points = loader.interior_cells();
    stats.boundary_points = loader.boundary_cells();

    let loaded = loader.finish(&ctx.work_dir.join(BOUNDARY_COST), ctx.plan.sort_run_records)?;
    debug!(
        "load: {} interior records, {} boundary values, {} padding cells",
        loaded.interior.records, loaded.boundary.records, stats.padding_cells
    );
    info!(
        "load: {} cells, {} null, {} sources",
        stats.cells, stats.null_cells, stats.sources
    );

    Ok(LoadOutput {
        stats,
        interior: loaded.interior,
        boundary: loaded.boundary,
    })
}

pub fn check_dims<S: RasterSource + ?Sized>(raster: &S, nrows: Dim, ncols: Dim) -> Result<()> {
    if raster.rows() != nrows || raster.cols() != ncols {
        return Err(Error::InvalidInput(format!(
            "raster is {}x{}, expected {nrows}x{ncols}",
            raster.rows(),
            raster.cols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NODATA;

    #[test]
    fn test_cell_classification() {
        let mut stats = LoadStats::default();
        let p = GridPoint::new(0, 0);
        assert!(cell_from(p, f32::NAN, false, &mut stats).unwrap().is_null());
        assert!(cell_from(p, NODATA, true, &mut stats).unwrap().is_null());
        assert_eq!(stats.dropped_sources, 1);
        assert_eq!(stats.null_cells, 2);

        let cell = cell_from(p, 0.0, true, &mut stats).unwrap();
        assert!(cell.source && !cell.is_null());
        assert_eq!(stats.sources, 1);

        cell_from(p, f32::MAX, false, &mut stats).unwrap();
        assert_eq!(stats.near_overflow, 1);
    }

    #[test]
    fn test_negative_cost_is_fatal() {
        let mut stats = LoadStats::default();
        let err = cell_from(GridPoint::new(3, 4), -0.5, false, &mut stats).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("(3, 4)"));
    }
}
