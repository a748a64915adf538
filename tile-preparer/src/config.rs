use crate::buffer::DEFAULT_BUFFER_SIZE;

/// Tunables of the index build. Passed down explicitly; there is no
/// ambient global configuration.
#[derive(Debug, Clone)]
pub struct TilingConfig {
    /// Mean point count a finished tile should hold.
    pub target_points_per_tile: u64,
    /// Hard cap on the coarse analysis grid's cell count, bounding the
    /// density grid's memory during estimation.
    pub max_analysis_cells: usize,
    /// Size of each pooled I/O buffer; also the working-segment capacity
    /// of the partitioner.
    pub buffer_size_bytes: usize,
    /// Buffers in the process-wide pool.
    pub pool_buffers: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            target_points_per_tile: 40_000,
            max_analysis_cells: 160_000,
            buffer_size_bytes: DEFAULT_BUFFER_SIZE,
            pool_buffers: 2,
        }
    }
}
