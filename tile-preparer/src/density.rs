//! Density estimation: one sequential scan that simultaneously counts
//! points per coarse grid cell, accumulates z statistics, and records
//! which file chunks touch which cells. The coarse grid is a refinement
//! of the final tile grid (cells nest exactly), so grouping coarse cells
//! into [`SparseGridRegion`]s never splits a final tile.

use tracing::{debug, info};

use crate::buffer::BufferLease;
use crate::config::TilingConfig;
use crate::error::{Error, Result};
use crate::grid::{Grid, TileLayout};
use crate::progress::ProgressManager;
use crate::source::{ChunkRun, PointCloudBinarySource};
use crate::statistics::{Statistics, StatisticsAccumulator};
use crate::stream::ChunkReader;

/// Refinement of the coarse analysis grid over the final tile grid,
/// per axis. 4x per axis = 16x the cells, which keeps the chunk lists
/// attached to a region close to the chunks that actually hold its
/// points.
const ANALYSIS_REFINEMENT: usize = 4;

/// A band of final tiles `[tile_start, tile_end)` in row-major order,
/// together with the source chunks that may contain their points.
#[derive(Debug, Clone)]
pub struct SparseGridRegion {
    pub tile_start: usize,
    pub tile_end: usize,
    /// Exact point count of the band, from the density scan.
    pub point_count: u64,
    /// Coalesced, ascending and disjoint.
    pub chunks: Vec<ChunkRun>,
}

impl SparseGridRegion {
    pub fn tile_count(&self) -> usize {
        self.tile_end - self.tile_start
    }

    pub fn contains_tile(&self, flat_index: usize) -> bool {
        flat_index >= self.tile_start && flat_index < self.tile_end
    }
}

/// Aggregate shape of the coarse density grid.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DensitySummary {
    pub min: u32,
    pub max: u32,
    pub mean: f64,
}

impl DensitySummary {
    fn of(density: &Grid<u32>) -> Self {
        let values = density.values();
        let total: u64 = values.iter().map(|&n| n as u64).sum();
        Self {
            min: values.iter().copied().min().unwrap_or(0),
            max: values.iter().copied().max().unwrap_or(0),
            mean: total as f64 / values.len() as f64,
        }
    }
}

#[derive(Debug)]
pub struct AnalysisResult {
    /// Final-resolution tile layout shared with the partitioner.
    pub layout: TileLayout,
    /// Per-coarse-cell point counts.
    pub density: Grid<u32>,
    pub density_summary: DensitySummary,
    /// Coarse cells per final tile, per axis.
    pub refinement: usize,
    pub statistics: Statistics,
    /// Empty if the scan was cancelled.
    pub regions: Vec<SparseGridRegion>,
    /// Chunk unit used for [`SparseGridRegion::chunks`].
    pub points_per_chunk: u64,
}

/// Final tile grid dimensions: square-ish cells sized so the mean tile
/// holds `target_points_per_tile`, degenerate axes clamped to one cell.
pub fn final_tile_dims(source: &PointCloudBinarySource, target_points_per_tile: u64) -> (usize, usize) {
    let tiles = (source.count() / target_points_per_tile.max(1)).max(1) as usize;
    let grid = Grid::<u32>::at_cell_count(tiles, *source.extent());
    (grid.rows(), grid.cols())
}

/// Scans the source once through `buffer`, fanning each chunk out to the
/// density counter and the statistics accumulator.
///
/// On cancellation the returned result carries the partial density grid
/// and no regions; the caller must not start partitioning.
pub fn analyze(
    source: &PointCloudBinarySource,
    config: &TilingConfig,
    buffer: &mut BufferLease,
    progress: &mut ProgressManager,
) -> Result<AnalysisResult> {
    let q_extent = source.quantization().convert_extent(source.extent());
    let (rows, cols) = final_tile_dims(source, config.target_points_per_tile);
    let layout = TileLayout::new(q_extent, rows, cols);

    let mut refinement = ANALYSIS_REFINEMENT;
    while refinement > 1 && rows * cols * refinement * refinement > config.max_analysis_cells {
        refinement /= 2;
    }
    let coarse = layout.refined(refinement);
    debug!(
        rows,
        cols,
        refinement,
        coarse_cells = coarse.rows() * coarse.cols(),
        "analysis grids sized"
    );

    let mut density = Grid::<u32>::with_dims(coarse.rows(), coarse.cols(), *source.extent());
    let mut cell_chunks: Vec<Vec<u32>> = vec![Vec::new(); coarse.rows() * coarse.cols()];
    let mut stats_acc = StatisticsAccumulator::new(q_extent.min_z, q_extent.range_z());

    let point_size = source.point_size_bytes();
    let mut reader = ChunkReader::over_source(source)?;
    let points_per_chunk = (reader.usable_len(buffer.len()) / point_size) as u64;

    {
        let mut process = progress.start_process("EstimateDensity");
        while let Some(chunk) = reader.next_chunk(buffer)? {
            let counts = density.values_mut();
            for record in chunk.data.chunks_exact(point_size) {
                let qx = i32::from_le_bytes(record[0..4].try_into().unwrap());
                let qy = i32::from_le_bytes(record[4..8].try_into().unwrap());
                let qz = i32::from_le_bytes(record[8..12].try_into().unwrap());

                let cell = nested_coarse_cell(&layout, &coarse, refinement, qx, qy);
                counts[cell] += 1;
                let touched = &mut cell_chunks[cell];
                if touched.last() != Some(&chunk.index) {
                    touched.push(chunk.index);
                }
                stats_acc.add(qz);
            }
            if !process.update(chunk.progress) {
                break;
            }
        }
    }

    let statistics = stats_acc.compute(source.extent().min_z(), source.extent().range_z());
    let density_summary = DensitySummary::of(&density);

    if progress.is_canceled() {
        return Ok(AnalysisResult {
            layout,
            density,
            density_summary,
            refinement,
            statistics,
            regions: Vec::new(),
            points_per_chunk,
        });
    }

    let segment_capacity = (buffer.len() / point_size) as u64;
    let regions = build_regions(
        &layout,
        refinement,
        &density,
        &cell_chunks,
        segment_capacity,
    )?;

    info!(
        points = statistics.count,
        regions = regions.len(),
        max_cell_density = density_summary.max,
        mean_cell_density = density_summary.mean,
        mean_z = statistics.mean,
        std_dev_z = statistics.std_dev,
        "density analysis complete"
    );

    Ok(AnalysisResult {
        layout,
        density,
        density_summary,
        refinement,
        statistics,
        regions,
        points_per_chunk,
    })
}

/// Coarse cell of `(qx, qy)`, clamped into the sub-range of the final
/// tile computed by `layout`. The two layouts' float mappings can
/// disagree by one ulp exactly on a shared tile boundary, and the final
/// layout is the one the partitioner addresses by, so it wins.
fn nested_coarse_cell(
    layout: &TileLayout,
    coarse: &TileLayout,
    refinement: usize,
    qx: i32,
    qy: i32,
) -> usize {
    let (row, col) = layout.cell_of(qx, qy);
    let (cr, cc) = coarse.cell_of(qx, qy);
    let cr = cr.clamp(row * refinement, (row + 1) * refinement - 1);
    let cc = cc.clamp(col * refinement, (col + 1) * refinement - 1);
    cr * coarse.cols() + cc
}

/// Packs final tiles, in row-major order, into regions whose point bytes
/// fit the working buffer; each region's chunk set is the union of its
/// coarse cells' touched-chunk lists, coalesced into maximal runs.
fn build_regions(
    layout: &TileLayout,
    refinement: usize,
    density: &Grid<u32>,
    cell_chunks: &[Vec<u32>],
    segment_capacity_points: u64,
) -> Result<Vec<SparseGridRegion>> {
    let mut regions = Vec::new();
    let mut region_start = 0usize;
    let mut region_points = 0u64;
    let mut region_chunks: Vec<u32> = Vec::new();

    let tile_count = layout.rows() * layout.cols();
    for tile in 0..tile_count {
        let (tile_points, tile_chunks) =
            collect_tile(layout, refinement, density, cell_chunks, tile);

        if tile_points > segment_capacity_points {
            return Err(Error::SourceConsistency(format!(
                "tile {tile} holds {tile_points} points, more than the working buffer capacity of {segment_capacity_points}"
            )));
        }

        if region_points > 0 && region_points + tile_points > segment_capacity_points {
            regions.push(finish_region(
                region_start,
                tile,
                region_points,
                &mut region_chunks,
            ));
            region_start = tile;
            region_points = 0;
        }

        region_points += tile_points;
        region_chunks.extend_from_slice(&tile_chunks);
    }

    // The band covering the last tile is always still pending, possibly
    // with zero points.
    regions.push(finish_region(
        region_start,
        tile_count,
        region_points,
        &mut region_chunks,
    ));
    Ok(regions)
}

/// Point count and touched chunks of one final tile, summed over its
/// nested coarse cells.
fn collect_tile(
    layout: &TileLayout,
    refinement: usize,
    density: &Grid<u32>,
    cell_chunks: &[Vec<u32>],
    tile: usize,
) -> (u64, Vec<u32>) {
    let tile_row = tile / layout.cols();
    let tile_col = tile % layout.cols();
    let mut points = 0u64;
    let mut chunks = Vec::new();
    for r in tile_row * refinement..(tile_row + 1) * refinement {
        for c in tile_col * refinement..(tile_col + 1) * refinement {
            points += density[(r, c)] as u64;
            chunks.extend_from_slice(&cell_chunks[r * density.cols() + c]);
        }
    }
    (points, chunks)
}

fn finish_region(
    tile_start: usize,
    tile_end: usize,
    point_count: u64,
    chunk_indices: &mut Vec<u32>,
) -> SparseGridRegion {
    chunk_indices.sort_unstable();
    chunk_indices.dedup();

    let mut runs: Vec<ChunkRun> = Vec::new();
    for &index in chunk_indices.iter() {
        match runs.last_mut() {
            Some(run) if run.start + run.count == index => run.count += 1,
            _ => runs.push(ChunkRun {
                start: index,
                count: 1,
            }),
        }
    }
    chunk_indices.clear();

    SparseGridRegion {
        tile_start,
        tile_end,
        point_count,
        chunks: runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantizedExtent3D;

    fn layout_4x4() -> TileLayout {
        let q = QuantizedExtent3D {
            min_x: 0,
            min_y: 0,
            min_z: 0,
            max_x: 4000,
            max_y: 4000,
            max_z: 100,
        };
        TileLayout::new(q, 4, 4)
    }

    fn extent() -> crate::geometry::Extent3D {
        crate::geometry::Extent3D::new(0.0, 0.0, 0.0, 40.0, 40.0, 1.0)
    }

    #[test]
    fn regions_split_when_buffer_would_overflow() {
        let layout = layout_4x4();
        // Refinement 1: coarse == final, one chunk per cell for simplicity.
        let mut density = Grid::<u32>::with_dims(4, 4, extent());
        for v in density.values_mut() {
            *v = 10;
        }
        let cell_chunks: Vec<Vec<u32>> = (0..16).map(|i| vec![i as u32]).collect();

        let regions = build_regions(&layout, 1, &density, &cell_chunks, 35).unwrap();
        // 10 points per tile, 35-point capacity: 3 tiles per region.
        assert_eq!(regions.len(), 6);
        assert_eq!(regions[0].tile_start, 0);
        assert_eq!(regions[0].tile_end, 3);
        assert_eq!(regions[0].point_count, 30);
        // Bands tile the grid without gaps or overlap.
        for pair in regions.windows(2) {
            assert_eq!(pair[0].tile_end, pair[1].tile_start);
        }
        assert_eq!(regions.last().unwrap().tile_end, 16);
        // Consecutive chunk indices coalesce into one run.
        assert_eq!(regions[0].chunks, vec![ChunkRun { start: 0, count: 3 }]);
    }

    #[test]
    fn oversized_tile_is_rejected() {
        let layout = layout_4x4();
        let mut density = Grid::<u32>::with_dims(4, 4, extent());
        density[(0, 0)] = 100;
        let cell_chunks: Vec<Vec<u32>> = vec![Vec::new(); 16];
        assert!(matches!(
            build_regions(&layout, 1, &density, &cell_chunks, 50),
            Err(Error::SourceConsistency(_))
        ));
    }

    #[test]
    fn scan_cell_always_nests_in_its_final_tile() {
        // Odd ranges and non-dividing cell counts make the tile-boundary
        // coordinates land between integers, where the final and refined
        // float mappings are most likely to disagree.
        let q = QuantizedExtent3D {
            min_x: 0,
            min_y: 0,
            min_z: 0,
            max_x: 2_000_003,
            max_y: 1_000_007,
            max_z: 10,
        };
        let (rows, cols, refinement) = (3usize, 7usize, 4usize);
        let layout = TileLayout::new(q, rows, cols);
        let coarse = layout.refined(refinement);

        let probe_axis = |boundaries: usize, range: u32| {
            (1..boundaries)
                .flat_map(move |k| {
                    let b = (range as u64 * k as u64 / boundaries as u64) as i32;
                    b - 2..=b + 2
                })
                .collect::<Vec<i32>>()
        };
        let xs = probe_axis(cols, q.range_x());
        let ys = probe_axis(rows, q.range_y());

        for &qx in &xs {
            for &qy in &ys {
                let cell = nested_coarse_cell(&layout, &coarse, refinement, qx, qy);
                let (cr, cc) = (cell / coarse.cols(), cell % coarse.cols());
                assert_eq!(
                    (cr / refinement, cc / refinement),
                    layout.cell_of(qx, qy)
                );
            }
        }
    }

    #[test]
    fn density_summary_reflects_the_grid() {
        let mut density = Grid::<u32>::with_dims(2, 2, extent());
        density[(0, 0)] = 4;
        density[(1, 1)] = 8;
        let s = DensitySummary::of(&density);
        assert_eq!(s.min, 0);
        assert_eq!(s.max, 8);
        assert_eq!(s.mean, 3.0);
    }

    #[test]
    fn empty_grid_yields_one_empty_region() {
        let layout = layout_4x4();
        let density = Grid::<u32>::with_dims(4, 4, extent());
        let cell_chunks: Vec<Vec<u32>> = vec![Vec::new(); 16];
        let regions = build_regions(&layout, 1, &density, &cell_chunks, 1000).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].point_count, 0);
        assert_eq!(regions[0].tile_count(), 16);
    }
}
