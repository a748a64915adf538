//! The finished tile store: a fixed header plus per-tile point counts,
//! followed by point records grouped contiguously per tile in row-major
//! traversal order.
//!
//! The header is written twice during a build: once up front with the
//! dirty flag set, and again at the end with final counts. The flag is
//! cleared only when the build finished without cancellation or error,
//! so a crashed or cancelled build can never be mistaken for a valid
//! index.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::geometry::Extent3D;
use crate::quantization::{QuantVariant, Quantization};
use crate::statistics::Statistics;

const STORE_MAGIC: &[u8; 4] = b"PCTX";
const STORE_VERSION: u16 = 1;

/// Fixed-size prefix of the header, before the per-tile counts.
const FIXED_HEADER_BYTES: u64 = 160;

/// Handle over a (possibly still building) tile store.
#[derive(Debug, Clone)]
pub struct TileSource {
    path: PathBuf,
    dirty: bool,
    point_size_bytes: usize,
    count: u64,
    extent: Extent3D,
    quantization: Quantization,
    statistics: Statistics,
    rows: usize,
    cols: usize,
    counts: Vec<u64>,
}

impl TileSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: impl Into<PathBuf>,
        point_size_bytes: usize,
        count: u64,
        extent: Extent3D,
        quantization: Quantization,
        statistics: Statistics,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self {
            path: path.into(),
            dirty: true,
            point_size_bytes,
            count,
            extent,
            quantization,
            statistics,
            rows,
            cols,
            counts: vec![0; rows * cols],
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `false` only if the build completed without cancellation or error.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn point_size_bytes(&self) -> usize {
        self.point_size_bytes
    }

    pub fn extent(&self) -> &Extent3D {
        &self.extent
    }

    pub fn quantization(&self) -> &Quantization {
        &self.quantization
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn tile_counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn tile_counts_mut(&mut self) -> &mut [u64] {
        &mut self.counts
    }

    pub fn tile_count(&self, row: usize, col: usize) -> u64 {
        self.counts[row * self.cols + col]
    }

    /// Where point records begin in the file.
    pub fn point_data_offset(&self) -> u64 {
        FIXED_HEADER_BYTES + (self.rows * self.cols * 8) as u64
    }

    pub fn file_size(&self) -> u64 {
        self.point_data_offset() + self.count * self.point_size_bytes as u64
    }

    /// Byte range `[start, end)` of one tile's records in the file.
    pub fn tile_byte_range(&self, row: usize, col: usize) -> (u64, u64) {
        let flat = row * self.cols + col;
        let preceding: u64 = self.counts[..flat].iter().sum();
        let start = self.point_data_offset() + preceding * self.point_size_bytes as u64;
        let end = start + self.counts[flat] * self.point_size_bytes as u64;
        (start, end)
    }

    pub fn write_header(&self) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        self.write_header_to(&mut file)
    }

    pub fn write_header_to(&self, file: &mut File) -> Result<()> {
        let mut header = Vec::with_capacity(self.point_data_offset() as usize);
        header.extend_from_slice(STORE_MAGIC);
        header.extend_from_slice(&STORE_VERSION.to_le_bytes());
        header.push(self.dirty as u8);
        header.push(match self.quantization.variant() {
            QuantVariant::Signed => 0,
            QuantVariant::Unsigned => 1,
        });
        header.extend_from_slice(&(self.point_size_bytes as u16).to_le_bytes());
        header.extend_from_slice(&(self.rows as u32).to_le_bytes());
        header.extend_from_slice(&(self.cols as u32).to_le_bytes());
        header.extend_from_slice(&self.count.to_le_bytes());
        let e = &self.extent;
        for v in [
            e.min_x(),
            e.min_y(),
            e.min_z(),
            e.max_x(),
            e.max_y(),
            e.max_z(),
        ] {
            header.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.quantization.scales() {
            header.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.quantization.offsets() {
            header.extend_from_slice(&v.to_le_bytes());
        }
        header.extend_from_slice(&self.statistics.count.to_le_bytes());
        for v in [
            self.statistics.mean,
            self.statistics.std_dev,
            self.statistics.mode,
        ] {
            header.extend_from_slice(&v.to_le_bytes());
        }
        header.resize(FIXED_HEADER_BYTES as usize, 0);
        for &n in &self.counts {
            header.extend_from_slice(&n.to_le_bytes());
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        Ok(())
    }

    /// Reads a store header written by [`Self::write_header`].
    pub fn read(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let invalid = |reason: &str| Error::InvalidStore {
            path: path.clone(),
            reason: reason.into(),
        };

        let mut fixed = [0u8; FIXED_HEADER_BYTES as usize];
        file.read_exact(&mut fixed)?;
        if &fixed[0..4] != STORE_MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = u16::from_le_bytes(fixed[4..6].try_into().unwrap());
        if version != STORE_VERSION {
            return Err(invalid("unsupported version"));
        }
        let dirty = fixed[6] != 0;
        let variant = match fixed[7] {
            0 => QuantVariant::Signed,
            1 => QuantVariant::Unsigned,
            _ => return Err(invalid("unknown quantization variant")),
        };
        let point_size_bytes = u16::from_le_bytes(fixed[8..10].try_into().unwrap()) as usize;
        let rows = u32::from_le_bytes(fixed[10..14].try_into().unwrap()) as usize;
        let cols = u32::from_le_bytes(fixed[14..18].try_into().unwrap()) as usize;
        if rows == 0 || cols == 0 {
            return Err(invalid("empty tile grid"));
        }
        let count = u64::from_le_bytes(fixed[18..26].try_into().unwrap());

        let mut doubles = [0f64; 12];
        for (i, v) in doubles.iter_mut().enumerate() {
            *v = f64::from_le_bytes(fixed[26 + i * 8..34 + i * 8].try_into().unwrap());
        }
        let extent = Extent3D::new(
            doubles[0], doubles[1], doubles[2], doubles[3], doubles[4], doubles[5],
        );
        let quantization = Quantization::from_parts(
            variant,
            [doubles[6], doubles[7], doubles[8]],
            [doubles[9], doubles[10], doubles[11]],
        );
        let stats_count = u64::from_le_bytes(fixed[122..130].try_into().unwrap());
        let mut stats = [0f64; 3];
        for (i, v) in stats.iter_mut().enumerate() {
            *v = f64::from_le_bytes(fixed[130 + i * 8..138 + i * 8].try_into().unwrap());
        }
        let statistics = Statistics {
            count: stats_count,
            mean: stats[0],
            std_dev: stats[1],
            mode: stats[2],
        };

        let mut counts = vec![0u64; rows * cols];
        let mut raw = vec![0u8; counts.len() * 8];
        file.read_exact(&mut raw)?;
        for (i, n) in counts.iter_mut().enumerate() {
            *n = u64::from_le_bytes(raw[i * 8..(i + 1) * 8].try_into().unwrap());
        }

        Ok(Self {
            path,
            dirty,
            point_size_bytes,
            count,
            extent,
            quantization,
            statistics,
            rows,
            cols,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::QuantVariant;

    fn sample_store(path: &Path) -> TileSource {
        let extent = Extent3D::new(0.0, 0.0, 0.0, 100.0, 100.0, 10.0);
        let quantization = Quantization::create(&extent, QuantVariant::Unsigned).unwrap();
        let statistics = Statistics {
            count: 8,
            mean: 5.0,
            std_dev: 1.25,
            mode: 4.5,
        };
        let mut store =
            TileSource::new(path, 12, 8, extent, quantization, statistics, 2, 2);
        store.tile_counts_mut().copy_from_slice(&[3, 1, 0, 4]);
        store
    }

    #[test]
    fn header_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pctx");
        File::create(&path).unwrap();

        let mut store = sample_store(&path);
        store.set_dirty(false);
        store.write_header().unwrap();

        let back = TileSource::read(&path).unwrap();
        assert!(!back.is_dirty());
        assert_eq!(back.rows(), 2);
        assert_eq!(back.cols(), 2);
        assert_eq!(back.count(), 8);
        assert_eq!(back.tile_counts(), &[3, 1, 0, 4]);
        assert_eq!(back.extent(), store.extent());
        assert_eq!(back.quantization(), store.quantization());
        assert_eq!(back.statistics(), store.statistics());
    }

    #[test]
    fn tile_byte_ranges_are_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.pctx");
        let store = sample_store(&path);

        let offset = store.point_data_offset();
        assert_eq!(store.tile_byte_range(0, 0), (offset, offset + 36));
        assert_eq!(store.tile_byte_range(0, 1), (offset + 36, offset + 48));
        // Empty tile: zero-length range, no gap.
        assert_eq!(store.tile_byte_range(1, 0), (offset + 48, offset + 48));
        assert_eq!(store.tile_byte_range(1, 1), (offset + 48, offset + 96));
        assert_eq!(store.file_size(), offset + 96);
    }

    #[test]
    fn new_store_starts_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let store = sample_store(&dir.path().join("cloud.pctx"));
        assert!(store.is_dirty());
    }
}
