//! Small in-memory 2D arrays mapped onto the global grid
//!
//! A [`Tile`] owns a contiguous row-major buffer plus a basis: the global coordinate of
//! its local `(0, 0)`. The same buffer is refilled for every tile of a sweep.

use crate::core::{CostSource, Dim, GridPoint};

#[derive(Debug, Clone)]
pub struct Tile<T> {
    rows: Dim,
    cols: Dim,
    basis: GridPoint,
    data: Vec<T>,
}

/// Terrain costs and source flags of one tile
pub type CostTile = Tile<CostSource>;

impl<T: Copy> Tile<T> {
    pub fn new(rows: Dim, cols: Dim, fill: T) -> Self {
        Self {
            rows,
            cols,
            basis: GridPoint::new(0, 0),
            data: vec![fill; rows as usize * cols as usize],
        }
    }

    pub fn rows(&self) -> Dim {
        self.rows
    }

    pub fn cols(&self) -> Dim {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn basis(&self) -> GridPoint {
        self.basis
    }

    pub fn set_basis(&mut self, basis: GridPoint) {
        self.basis = basis;
    }

    #[inline]
    pub fn offset(&self, lr: Dim, lc: Dim) -> usize {
        debug_assert!(lr < self.rows && lc < self.cols);
        lr as usize * self.cols as usize + lc as usize
    }

    #[inline]
    pub fn get(&self, lr: Dim, lc: Dim) -> T {
        self.data[self.offset(lr, lc)]
    }

    #[inline]
    pub fn set(&mut self, lr: Dim, lc: Dim, value: T) {
        let i = self.offset(lr, lc);
        self.data[i] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn to_global(&self, lr: Dim, lc: Dim) -> GridPoint {
        GridPoint::new(self.basis.row + lr, self.basis.col + lc)
    }

    /// Local coordinate of a global point, if the tile covers it
    #[inline]
    pub fn to_local(&self, point: GridPoint) -> Option<(Dim, Dim)> {
        let lr = point.row.checked_sub(self.basis.row)?;
        let lc = point.col.checked_sub(self.basis.col)?;
        (lr < self.rows && lc < self.cols).then_some((lr, lc))
    }

    pub fn get_global(&self, point: GridPoint) -> Option<T> {
        self.to_local(point).map(|(lr, lc)| self.get(lr, lc))
    }

    /// True on the first/last local row or column
    #[inline]
    pub fn is_rim(&self, lr: Dim, lc: Dim) -> bool {
        lr == 0 || lc == 0 || lr == self.rows - 1 || lc == self.cols - 1
    }
}

impl CostTile {
    pub fn sources(&self) -> impl Iterator<Item = (Dim, Dim)> + '_ {
        let cols = self.cols;
        self.data
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source && !c.is_null())
            .map(move |(i, _)| ((i / cols as usize) as Dim, (i % cols as usize) as Dim))
    }
}
