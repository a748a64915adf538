//! Row-major cell grids over a spatial extent.
//!
//! Row 0 / col 0 always corresponds to the min-Y / min-X corner of the
//! extent, so cell addressing is comparable across every grid (and every
//! pass) built from the same extent.

use std::ops::{Index, IndexMut};

use crate::geometry::Extent3D;
use crate::quantization::QuantizedExtent3D;

// --------------------------------------------------------------------------
// Grid

/// Dense 2-D array of per-cell values bound to an extent.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    extent: Extent3D,
    data: Vec<T>,
}

impl<T: Clone + Default> Grid<T> {
    pub fn with_dims(rows: usize, cols: usize, extent: Extent3D) -> Self {
        assert!(rows > 0 && cols > 0, "grid must have at least one cell");
        Self {
            rows,
            cols,
            extent,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Builds a grid of roughly `target_cells` square-ish cells. Degenerate
    /// (zero-range) axes are clamped to a single row or column.
    pub fn at_cell_count(target_cells: usize, extent: Extent3D) -> Self {
        let cells = target_cells.max(1);
        let area = extent.area();
        if area <= 0.0 {
            // A line or a point still gets a 1-cell-wide grid.
            let cols = if extent.range_x() > 0.0 { cells } else { 1 };
            let rows = if extent.range_y() > 0.0 { cells } else { 1 };
            return Self::with_dims(rows.min(cells), cols.min(cells), extent);
        }
        let side = (area / cells as f64).sqrt();
        Self::at_cell_size(side, extent)
    }

    /// Builds a grid whose cells are approximately `side` wide.
    pub fn at_cell_size(side: f64, extent: Extent3D) -> Self {
        assert!(side > 0.0, "cell side must be positive");
        let cols = (extent.range_x() / side).ceil() as usize;
        let rows = (extent.range_y() / side).ceil() as usize;
        Self::with_dims(rows.max(1), cols.max(1), extent)
    }

    /// Copies this grid's values into a freshly-sized grid over the same
    /// extent, truncating or defaulting where dimensions differ.
    pub fn resized(&self, rows: usize, cols: usize) -> Self {
        let mut out = Self::with_dims(rows, cols, self.extent);
        for r in 0..rows.min(self.rows) {
            for c in 0..cols.min(self.cols) {
                out[(r, c)] = self[(r, c)].clone();
            }
        }
        out
    }
}

impl<T> Grid<T> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn extent(&self) -> &Extent3D {
        &self.extent
    }

    pub fn values(&self) -> &[T] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Cell coordinates in row-major traversal order.
    pub fn iter_coords(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.cols;
        (0..self.rows).flat_map(move |r| (0..cols).map(move |c| (r, c)))
    }
}

impl<T> Index<(usize, usize)> for Grid<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        debug_assert!(row < self.rows && col < self.cols);
        &self.data[row * self.cols + col]
    }
}

impl<T> IndexMut<(usize, usize)> for Grid<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        debug_assert!(row < self.rows && col < self.cols);
        &mut self.data[row * self.cols + col]
    }
}

// --------------------------------------------------------------------------
// TileLayout

/// Maps quantized (x, y) coordinates onto grid cells.
///
/// One layout value is shared by every pass that needs to agree on cell
/// addressing (density counting, the exact-counting pass and the in-place
/// partition), so a point can never change cells between passes.
#[derive(Debug, Copy, Clone)]
pub struct TileLayout {
    q_extent: QuantizedExtent3D,
    rows: usize,
    cols: usize,
    rows_over_range_y: f64,
    cols_over_range_x: f64,
}

impl TileLayout {
    pub fn new(q_extent: QuantizedExtent3D, rows: usize, cols: usize) -> Self {
        assert!(rows > 0 && cols > 0);
        // A degenerate quantized axis still addresses cell 0 of that axis.
        let range_x = q_extent.range_x().max(1) as f64;
        let range_y = q_extent.range_y().max(1) as f64;
        Self {
            q_extent,
            rows,
            cols,
            rows_over_range_y: rows as f64 / range_y,
            cols_over_range_x: cols as f64 / range_x,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn q_extent(&self) -> &QuantizedExtent3D {
        &self.q_extent
    }

    /// Cell holding a quantized (x, y). Points on the max edge of the
    /// extent land in the last row/col rather than one past it.
    pub fn cell_of(&self, qx: i32, qy: i32) -> (usize, usize) {
        let dx = qx.wrapping_sub(self.q_extent.min_x) as u32 as f64;
        let dy = qy.wrapping_sub(self.q_extent.min_y) as u32 as f64;
        let col = ((dx * self.cols_over_range_x) as usize).min(self.cols - 1);
        let row = ((dy * self.rows_over_range_y) as usize).min(self.rows - 1);
        (row, col)
    }

    /// Row-major flat index of the cell holding a quantized (x, y).
    pub fn cell_index_of(&self, qx: i32, qy: i32) -> usize {
        let (row, col) = self.cell_of(qx, qy);
        row * self.cols + col
    }

    /// A layout over the same quantized extent refined `factor` times per
    /// axis. The two float mappings can disagree by one ulp on a shared
    /// cell boundary, so callers that must agree with this layout clamp
    /// the refined cell into the enclosing cell's sub-range.
    pub fn refined(&self, factor: usize) -> Self {
        Self::new(self.q_extent, self.rows * factor, self.cols * factor)
    }
}
