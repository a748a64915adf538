//! The tile-index builder: streams each sparse region into a bounded
//! working buffer, groups its points by final tile with an in-place
//! bucket partition, and appends the grouped bytes to the output store.
//!
//! The partition swaps whole records inside one owned buffer instead of
//! allocating per-tile staging space; at this data scale the buffer, not
//! memory bandwidth, is the scarce resource.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::buffer::BufferPool;
use crate::config::TilingConfig;
use crate::density::{analyze, SparseGridRegion};
use crate::error::{Error, Result};
use crate::grid::TileLayout;
use crate::progress::{Process, ProgressManager};
use crate::source::PointCloudBinarySource;
use crate::store::TileSource;
use crate::stream::ChunkReader;

pub struct TileIndexBuilder<'a> {
    source: &'a PointCloudBinarySource,
    config: TilingConfig,
}

impl<'a> TileIndexBuilder<'a> {
    pub fn new(source: &'a PointCloudBinarySource, config: TilingConfig) -> Self {
        Self { source, config }
    }

    /// Runs density analysis and then the region-by-region partition,
    /// producing a tile store at `output`. The returned [`TileSource`] is
    /// dirty unless every step completed without cancellation; errors
    /// leave the partially-written store on disk, header marked dirty.
    ///
    /// Leases two buffers from `pool` for the whole build (chunk I/O and
    /// the working segment), so the pool must hold at least two.
    pub fn build(
        &self,
        output: &Path,
        pool: &BufferPool,
        progress: &mut ProgressManager,
    ) -> Result<TileSource> {
        assert!(
            pool.buffer_count() >= 2,
            "index build needs at least two pooled buffers"
        );
        let mut io_buffer = pool.acquire();
        let mut segment_buffer = pool.acquire();

        let analysis = analyze(self.source, &self.config, &mut io_buffer, progress)?;
        let layout = analysis.layout;
        let point_size = self.source.point_size_bytes();

        let mut store = TileSource::new(
            output,
            point_size,
            self.source.count(),
            *self.source.extent(),
            *self.source.quantization(),
            analysis.statistics,
            layout.rows(),
            layout.cols(),
        );

        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)?;
        out.set_len(store.file_size())?;
        // Up-front header carries the dirty flag, so an aborted build is
        // never mistaken for a finished index.
        store.write_header_to(&mut out)?;
        out.seek(SeekFrom::Start(store.point_data_offset()))?;

        for (i, region) in analysis.regions.iter().enumerate() {
            if progress.is_canceled() {
                break;
            }
            if region.point_count == 0 {
                continue;
            }
            debug!(
                segment = i + 1,
                segments = analysis.regions.len(),
                tiles = region.tile_count(),
                points = region.point_count,
                "processing index segment"
            );

            let filled = self.fill_segment(
                region,
                &layout,
                analysis.points_per_chunk,
                &mut io_buffer,
                &mut segment_buffer,
                progress,
            )?;
            if progress.is_canceled() {
                break;
            }
            if filled != region.point_count as usize * point_size {
                return Err(Error::SourceConsistency(format!(
                    "segment {i} produced {filled} bytes but analysis counted {}",
                    region.point_count as usize * point_size
                )));
            }

            let data = &mut segment_buffer[..filled];
            let counts = count_segment(data, point_size, &layout, region);

            {
                let mut process = progress.start_process("PartitionSegment");
                partition_in_place(
                    data,
                    point_size,
                    &layout,
                    region.tile_start,
                    &counts,
                    &mut process,
                );
            }
            if progress.is_canceled() {
                break;
            }

            let mut process = progress.start_process("WriteSegment");
            let mut written = 0usize;
            for (t, &count) in counts.iter().enumerate() {
                let len = count as usize * point_size;
                out.write_all(&data[written..written + len])?;
                written += len;
                store.tile_counts_mut()[region.tile_start + t] += count;
                if !process.update(written as f32 / filled as f32) {
                    break;
                }
            }
        }

        if progress.is_canceled() {
            warn!("index build cancelled; store remains dirty");
        } else {
            store.set_dirty(false);
        }
        store.write_header_to(&mut out)?;

        info!(
            dirty = store.is_dirty(),
            tiles = store.rows() * store.cols(),
            points = store.tile_counts().iter().sum::<u64>(),
            "tile store written"
        );
        Ok(store)
    }

    /// Streams the region's sparse chunks and appends the records that
    /// belong to the region's tiles to the working buffer. Returns the
    /// filled byte length.
    fn fill_segment(
        &self,
        region: &SparseGridRegion,
        layout: &TileLayout,
        points_per_chunk: u64,
        io_buffer: &mut [u8],
        segment_buffer: &mut [u8],
        progress: &mut ProgressManager,
    ) -> Result<usize> {
        let point_size = self.source.point_size_bytes();
        let composite = self.source.sparse_segment(&region.chunks, points_per_chunk)?;
        let mut reader = ChunkReader::over_composite(&composite)?;

        let mut filled = 0usize;
        let mut process = progress.start_process("FillSegment");
        while let Some(chunk) = reader.next_chunk(io_buffer)? {
            for record in chunk.data.chunks_exact(point_size) {
                let qx = i32::from_le_bytes(record[0..4].try_into().unwrap());
                let qy = i32::from_le_bytes(record[4..8].try_into().unwrap());
                if !region.contains_tile(layout.cell_index_of(qx, qy)) {
                    continue;
                }
                if filled + point_size > segment_buffer.len() {
                    return Err(Error::SourceConsistency(
                        "region overflows the working buffer; source changed since analysis"
                            .into(),
                    ));
                }
                segment_buffer[filled..filled + point_size].copy_from_slice(record);
                filled += point_size;
            }
            if !process.update(chunk.progress) {
                break;
            }
        }
        Ok(filled)
    }
}

/// Exact per-tile counts for one region's worth of records. Determines
/// precisely how many bytes each tile contributes to the buffer.
pub(crate) fn count_segment(
    data: &[u8],
    point_size: usize,
    layout: &TileLayout,
    region: &SparseGridRegion,
) -> Vec<u64> {
    let mut counts = vec![0u64; region.tile_count()];
    for record in data.chunks_exact(point_size) {
        let qx = i32::from_le_bytes(record[0..4].try_into().unwrap());
        let qy = i32::from_le_bytes(record[4..8].try_into().unwrap());
        let tile = layout.cell_index_of(qx, qy);
        debug_assert!(region.contains_tile(tile));
        counts[tile - region.tile_start] += 1;
    }
    counts
}

/// In-place bucket partition of `data` keyed by destination tile.
///
/// Tile `t`'s records end up in the byte range starting at the exclusive
/// prefix sum of `counts[..t]`. Tiles are serviced in traversal order;
/// each mismatched record is exchanged with the record at its destination
/// tile's cursor and the freshly-arrived record is re-examined. Every
/// swap advances the destination cursor past a record confirmed to be
/// placed, so the pass performs at most one swap per record and zero on
/// an already-grouped buffer. Returns the number of swaps.
///
/// Cancellation is polled once per serviced tile; an interrupted pass
/// leaves `data` permuted but the caller's store dirty.
pub(crate) fn partition_in_place(
    data: &mut [u8],
    point_size: usize,
    layout: &TileLayout,
    tile_start: usize,
    counts: &[u64],
    process: &mut Process<'_>,
) -> u64 {
    let tiles = counts.len();
    let mut cursor = vec![0usize; tiles];
    let mut end = vec![0usize; tiles];
    let mut offset = 0usize;
    for t in 0..tiles {
        cursor[t] = offset;
        offset += counts[t] as usize * point_size;
        end[t] = offset;
    }
    debug_assert_eq!(offset, data.len());

    let mut swaps = 0u64;
    for t in 0..tiles {
        while cursor[t] < end[t] {
            let at = cursor[t];
            let qx = i32::from_le_bytes(data[at..at + 4].try_into().unwrap());
            let qy = i32::from_le_bytes(data[at + 4..at + 8].try_into().unwrap());
            let dest = layout.cell_index_of(qx, qy) - tile_start;

            if dest == t {
                cursor[t] += point_size;
            } else {
                // A record for `dest` arrives at its cursor; whatever was
                // there lands at `at` and is re-evaluated next iteration.
                swap_records(data, at, cursor[dest], point_size);
                cursor[dest] += point_size;
                swaps += 1;
            }
        }
        if !process.update(end[t] as f32 / data.len().max(1) as f32) {
            break;
        }
    }
    swaps
}

/// Exchanges two non-overlapping record-sized byte ranges of one buffer.
fn swap_records(data: &mut [u8], a: usize, b: usize, len: usize) {
    debug_assert!(a != b);
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    debug_assert!(lo + len <= hi);
    let (first, second) = data.split_at_mut(hi);
    first[lo..lo + len].swap_with_slice(&mut second[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantizedExtent3D;
    use rand::prelude::*;

    const POINT_SIZE: usize = 16;

    fn layout_2x2() -> TileLayout {
        let q = QuantizedExtent3D {
            min_x: 0,
            min_y: 0,
            min_z: 0,
            max_x: 1000,
            max_y: 1000,
            max_z: 100,
        };
        TileLayout::new(q, 2, 2)
    }

    fn whole_grid_region(layout: &TileLayout, point_count: u64) -> SparseGridRegion {
        SparseGridRegion {
            tile_start: 0,
            tile_end: layout.rows() * layout.cols(),
            point_count,
            chunks: Vec::new(),
        }
    }

    /// Builds a record with quantized coordinates and a payload tag.
    fn record(qx: i32, qy: i32, tag: u8) -> [u8; POINT_SIZE] {
        let mut rec = [0u8; POINT_SIZE];
        rec[0..4].copy_from_slice(&qx.to_le_bytes());
        rec[4..8].copy_from_slice(&qy.to_le_bytes());
        rec[8..12].copy_from_slice(&5i32.to_le_bytes());
        rec[12] = tag;
        rec
    }

    fn partition(data: &mut [u8], layout: &TileLayout, region: &SparseGridRegion) -> u64 {
        let counts = count_segment(data, POINT_SIZE, layout, region);
        let mut manager = ProgressManager::sink();
        let mut process = manager.start_process("test");
        partition_in_place(data, POINT_SIZE, layout, region.tile_start, &counts, &mut process)
    }

    fn assert_grouped(data: &[u8], layout: &TileLayout, region: &SparseGridRegion) {
        let counts = count_segment(data, POINT_SIZE, layout, region);
        let mut offset = 0usize;
        for (t, &count) in counts.iter().enumerate() {
            for record in data[offset..offset + count as usize * POINT_SIZE]
                .chunks_exact(POINT_SIZE)
            {
                let qx = i32::from_le_bytes(record[0..4].try_into().unwrap());
                let qy = i32::from_le_bytes(record[4..8].try_into().unwrap());
                assert_eq!(layout.cell_index_of(qx, qy) - region.tile_start, t);
            }
            offset += count as usize * POINT_SIZE;
        }
        assert_eq!(offset, data.len());
    }

    fn sorted_records(data: &[u8]) -> Vec<Vec<u8>> {
        let mut records: Vec<Vec<u8>> = data.chunks_exact(POINT_SIZE).map(<[u8]>::to_vec).collect();
        records.sort();
        records
    }

    #[test]
    fn eight_points_group_into_quadrants() {
        let layout = layout_2x2();
        // Two points per quadrant, interleaved on purpose.
        let points = [
            (100, 100),
            (900, 100),
            (100, 900),
            (900, 900),
            (400, 400),
            (600, 100),
            (100, 600),
            (600, 600),
        ];
        let mut data = Vec::new();
        for (i, &(qx, qy)) in points.iter().enumerate() {
            data.extend_from_slice(&record(qx, qy, i as u8));
        }
        let region = whole_grid_region(&layout, 8);
        let before = sorted_records(&data);

        partition(&mut data, &layout, &region);

        assert_grouped(&data, &layout, &region);
        // Conservation: same multiset of records.
        assert_eq!(sorted_records(&data), before);
        // Tile (0, 0) holds exactly the points with qx < mid and qy < mid.
        let counts = count_segment(&data, POINT_SIZE, &layout, &region);
        assert_eq!(counts, vec![3, 2, 2, 1]);
        for record in data[..3 * POINT_SIZE].chunks_exact(POINT_SIZE) {
            let qx = i32::from_le_bytes(record[0..4].try_into().unwrap());
            let qy = i32::from_le_bytes(record[4..8].try_into().unwrap());
            assert!(qx < 500 && qy < 500);
        }
    }

    #[test]
    fn random_buffers_partition_correctly() {
        let q = QuantizedExtent3D {
            min_x: -4000,
            min_y: -4000,
            min_z: 0,
            max_x: 4000,
            max_y: 4000,
            max_z: 1000,
        };
        let layout = TileLayout::new(q, 7, 5);
        let mut rng = StdRng::seed_from_u64(0x7e11e5);

        for points in [0usize, 1, 17, 500] {
            let mut data = Vec::new();
            for i in 0..points {
                let qx = rng.gen_range(-4000..=4000);
                let qy = rng.gen_range(-4000..=4000);
                data.extend_from_slice(&record(qx, qy, i as u8));
            }
            let region = whole_grid_region(&layout, points as u64);
            let before = sorted_records(&data);

            let swaps = partition(&mut data, &layout, &region);
            assert!(swaps <= points as u64);
            assert_grouped(&data, &layout, &region);
            assert_eq!(sorted_records(&data), before);

            // Idempotence: re-grouping a grouped buffer swaps nothing.
            let second = partition(&mut data, &layout, &region);
            assert_eq!(second, 0);
        }
    }

    #[test]
    fn partial_region_uses_relative_tile_indices() {
        let layout = layout_2x2();
        // Region covering only the top row of the grid (tiles 2 and 3).
        let region = SparseGridRegion {
            tile_start: 2,
            tile_end: 4,
            point_count: 4,
            chunks: Vec::new(),
        };
        let mut data = Vec::new();
        for &(qx, qy) in &[(900, 900), (100, 900), (800, 700), (200, 600)] {
            data.extend_from_slice(&record(qx, qy, 0));
        }
        partition(&mut data, &layout, &region);
        assert_grouped(&data, &layout, &region);
        let counts = count_segment(&data, POINT_SIZE, &layout, &region);
        assert_eq!(counts, vec![2, 2]);
    }
}
