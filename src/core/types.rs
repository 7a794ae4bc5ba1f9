//! Grid addressing and cell value types
//!
//! Costs and distances are `f32`. Null cells and unreachable distances share the
//! [`NODATA`] sentinel, which lies outside the domain of valid (non-negative) values.

use serde::{Deserialize, Serialize};

use crate::formats::stream::Record;

/// Row or column index into the (padded) grid
pub type Dim = u32;

/// Terrain traversal cost of one cell
pub type Cost = f32;

/// Accumulated least-cost distance
pub type Distance = f32;

/// Null cost / unreachable distance marker
pub const NODATA: f32 = -9999.0;

/// Costs at or above this value risk overflowing when summed along a path
pub const NEAR_OVERFLOW: f32 = f32::MAX * 0.999;

#[inline]
pub fn is_nodata(value: f32) -> bool {
    value == NODATA
}

/// Global grid coordinate, ordered row-major (the sweep order used everywhere)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    pub row: Dim,
    pub col: Dim,
}

impl GridPoint {
    pub const UNDEFINED: GridPoint = GridPoint {
        row: Dim::MAX,
        col: Dim::MAX,
    };

    pub const fn new(row: Dim, col: Dim) -> Self {
        Self { row, col }
    }

    pub fn is_defined(&self) -> bool {
        *self != Self::UNDEFINED
    }
}

impl std::fmt::Display for GridPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A cell's terrain cost plus its seed flag
///
/// Sources start at distance 0 but keep their terrain cost for edges through them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSource {
    pub cost: Cost,
    pub source: bool,
}

impl CostSource {
    pub const fn new(cost: Cost, source: bool) -> Self {
        Self { cost, source }
    }

    /// Padding / null cell: never traversed, never a source
    pub const fn nodata() -> Self {
        Self {
            cost: NODATA,
            source: false,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        is_nodata(self.cost)
    }
}

impl Default for CostSource {
    fn default() -> Self {
        Self::nodata()
    }
}

/// A non-boundary cell as stored in the interior stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteriorPoint {
    pub point: GridPoint,
    pub cell: CostSource,
}

/// `(row, col, value)` record: s2b entries, resolved boundary entries, final output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IjCost {
    pub point: GridPoint,
    pub value: f32,
}

impl IjCost {
    pub const fn new(point: GridPoint, value: f32) -> Self {
        Self { point, value }
    }
}

/// Oriented substitute-graph edge between two boundary points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEdge {
    pub from: GridPoint,
    pub to: GridPoint,
    pub dist: Distance,
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_f32(buf: &mut [u8], at: usize, v: f32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn get_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl Record for f32 {
    const SIZE: usize = 4;
    const KIND: u16 = 1;

    fn encode(&self, buf: &mut [u8]) {
        put_f32(buf, 0, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        get_f32(buf, 0)
    }
}

impl Record for CostSource {
    const SIZE: usize = 5;
    const KIND: u16 = 2;

    fn encode(&self, buf: &mut [u8]) {
        put_f32(buf, 0, self.cost);
        buf[4] = self.source as u8;
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            cost: get_f32(buf, 0),
            source: buf[4] != 0,
        }
    }
}

impl Record for InteriorPoint {
    const SIZE: usize = 13;
    const KIND: u16 = 3;

    fn encode(&self, buf: &mut [u8]) {
        put_u32(buf, 0, self.point.row);
        put_u32(buf, 4, self.point.col);
        self.cell.encode(&mut buf[8..13]);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            point: GridPoint::new(get_u32(buf, 0), get_u32(buf, 4)),
            cell: CostSource::decode(&buf[8..13]),
        }
    }
}

impl Record for IjCost {
    const SIZE: usize = 12;
    const KIND: u16 = 4;

    fn encode(&self, buf: &mut [u8]) {
        put_u32(buf, 0, self.point.row);
        put_u32(buf, 4, self.point.col);
        put_f32(buf, 8, self.value);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            point: GridPoint::new(get_u32(buf, 0), get_u32(buf, 4)),
            value: get_f32(buf, 8),
        }
    }
}

impl Record for DistanceEdge {
    const SIZE: usize = 20;
    const KIND: u16 = 5;

    fn encode(&self, buf: &mut [u8]) {
        put_u32(buf, 0, self.from.row);
        put_u32(buf, 4, self.from.col);
        put_u32(buf, 8, self.to.row);
        put_u32(buf, 12, self.to.col);
        put_f32(buf, 16, self.dist);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            from: GridPoint::new(get_u32(buf, 0), get_u32(buf, 4)),
            to: GridPoint::new(get_u32(buf, 8), get_u32(buf, 12)),
            dist: get_f32(buf, 16),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_point_orders_row_major() {
        let mut points = vec![
            GridPoint::new(1, 0),
            GridPoint::new(0, 5),
            GridPoint::new(0, 2),
        ];
        points.sort();
        assert_eq!(
            points,
            vec![GridPoint::new(0, 2), GridPoint::new(0, 5), GridPoint::new(1, 0)]
        );
        assert!(!GridPoint::UNDEFINED.is_defined());
    }

    #[test]
    fn test_nodata_is_outside_valid_costs() {
        assert!(NODATA < 0.0);
        assert!(CostSource::nodata().is_null());
        assert!(!CostSource::new(0.0, true).is_null());
    }

    #[test]
    fn test_distance_edge_encoding_keeps_endpoints() {
        let edge = DistanceEdge {
            from: GridPoint::new(4, 0),
            to: GridPoint::new(0, 4),
            dist: 12.5,
        };
        let mut buf = [0u8; DistanceEdge::SIZE];
        edge.encode(&mut buf);
        assert_eq!(&buf[0..4], &4u32.to_le_bytes());
        assert_eq!(&buf[12..16], &4u32.to_le_bytes());
        assert_eq!(DistanceEdge::decode(&buf), edge);
    }

    #[test]
    fn test_source_flag_survives_encoding() {
        let p = InteriorPoint {
            point: GridPoint::new(7, 9),
            cell: CostSource::new(2.25, true),
        };
        let mut buf = [0u8; InteriorPoint::SIZE];
        p.encode(&mut buf);
        assert_eq!(buf[12], 1);
        assert_eq!(InteriorPoint::decode(&buf), p);
    }
}
