//! Core types shared by every terracost component
//!
//! Error handling, grid layout, cell types, run configuration and tile sizing.

pub mod config;
pub mod error;
pub mod layout;
pub mod tiling;
pub mod types;

pub use config::{Resolution, TerracostConfig};
pub use error::{Error, Result};
pub use layout::{GridLayout, PointClass};
pub use tiling::{initialize_tile_size, TilePlan, TileSizing};
pub use types::{
    is_nodata, Cost, CostSource, Dim, Distance, DistanceEdge, GridPoint, IjCost, InteriorPoint,
    NEAR_OVERFLOW, NODATA,
};
