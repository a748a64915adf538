//! Binary point source descriptors.
//!
//! A source is a *view* over a byte range of fixed-size point records in
//! one file; it owns no buffer and no file handle. The first 12 bytes of
//! every record are the little-endian `i32` quantized x, y, z; anything
//! after that is opaque attribute payload carried through unmodified.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::geometry::Extent3D;
use crate::quantization::{QuantVariant, Quantization};

/// Bytes of quantized coordinates at the front of every record.
pub const QUANTIZED_COORD_BYTES: usize = 12;

/// Fixed size of the descriptor header at the front of a `.qpc` file.
pub const SOURCE_HEADER_BYTES: u64 = 128;

const SOURCE_MAGIC: &[u8; 4] = b"QPC1";

// --------------------------------------------------------------------------
// PointCloudBinarySource

#[derive(Debug, Clone)]
pub struct PointCloudBinarySource {
    path: PathBuf,
    count: u64,
    point_size_bytes: usize,
    data_offset: u64,
    extent: Extent3D,
    quantization: Quantization,
}

/// A run of consecutive analysis chunks within one source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkRun {
    pub start: u32,
    pub count: u32,
}

/// Logical concatenation of disjoint segments of one source file.
/// Downstream chunk readers cannot observe the seams.
#[derive(Debug)]
pub struct CompositeSource {
    segments: Vec<PointCloudBinarySource>,
    count: u64,
    point_size_bytes: usize,
}

impl PointCloudBinarySource {
    pub fn new(
        path: impl Into<PathBuf>,
        count: u64,
        point_size_bytes: usize,
        data_offset: u64,
        extent: Extent3D,
        quantization: Quantization,
    ) -> Self {
        assert!(
            point_size_bytes >= QUANTIZED_COORD_BYTES,
            "records must start with quantized x, y, z"
        );
        Self {
            path: path.into(),
            count,
            point_size_bytes,
            data_offset,
            extent,
            quantization,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn point_size_bytes(&self) -> usize {
        self.point_size_bytes
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn data_len(&self) -> u64 {
        self.count * self.point_size_bytes as u64
    }

    pub fn extent(&self) -> &Extent3D {
        &self.extent
    }

    pub fn quantization(&self) -> &Quantization {
        &self.quantization
    }

    /// Contiguous sub-view of `count` points starting at `start_index`.
    pub fn segment(&self, start_index: u64, count: u64) -> Result<Self> {
        let end = start_index
            .checked_add(count)
            .ok_or_else(|| Error::SourceConsistency("segment length overflow".into()))?;
        if end > self.count {
            return Err(Error::SourceConsistency(format!(
                "segment [{start_index}, {end}) exceeds source of {} points",
                self.count
            )));
        }
        let mut segment = self.clone();
        segment.data_offset = self.data_offset + start_index * self.point_size_bytes as u64;
        segment.count = count;
        Ok(segment)
    }

    /// Composite view over disjoint chunk runs, where one chunk spans
    /// `points_per_chunk` points. The final chunk of the file may be
    /// partial; its declared length is truncated to the source end. A run
    /// starting past the end is a consistency error.
    pub fn sparse_segment(
        &self,
        runs: &[ChunkRun],
        points_per_chunk: u64,
    ) -> Result<CompositeSource> {
        let mut segments = Vec::with_capacity(runs.len());
        let mut count = 0;
        for run in runs {
            let start_index = points_per_chunk * run.start as u64;
            let mut point_count = points_per_chunk * run.count as u64;
            if start_index + point_count > self.count {
                let overshoot = start_index + point_count - self.count;
                if overshoot >= points_per_chunk {
                    return Err(Error::SourceConsistency(format!(
                        "chunk run at {} runs {overshoot} points off the end of the source",
                        run.start
                    )));
                }
                point_count -= overshoot;
            }
            count += point_count;
            segments.push(self.segment(start_index, point_count)?);
        }
        Ok(CompositeSource {
            segments,
            count,
            point_size_bytes: self.point_size_bytes,
        })
    }

    /// Writes the `.qpc` descriptor header at the current start of `file`.
    pub fn write_descriptor(&self, file: &mut File) -> Result<()> {
        let mut header = Vec::with_capacity(SOURCE_HEADER_BYTES as usize);
        header.extend_from_slice(SOURCE_MAGIC);
        header.extend_from_slice(&(self.point_size_bytes as u16).to_le_bytes());
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
        header.push(match self.quantization.variant() {
            QuantVariant::Signed => 0,
            QuantVariant::Unsigned => 1,
        });
        for v in self.quantization.scales() {
            header.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.quantization.offsets() {
            header.extend_from_slice(&v.to_le_bytes());
        }
        header.resize(SOURCE_HEADER_BYTES as usize, 0);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        Ok(())
    }

    /// Opens a `.qpc` file written by [`Self::write_descriptor`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let mut header = [0u8; SOURCE_HEADER_BYTES as usize];
        file.read_exact(&mut header)?;
        let invalid = |reason: &str| Error::InvalidStore {
            path: path.clone(),
            reason: reason.into(),
        };
        if &header[0..4] != SOURCE_MAGIC {
            return Err(invalid("bad magic"));
        }
        let point_size_bytes = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;
        if point_size_bytes < QUANTIZED_COORD_BYTES {
            return Err(invalid("point size smaller than coordinate prefix"));
        }
        let count = u64::from_le_bytes(header[6..14].try_into().unwrap());
        let mut doubles = [0f64; 12];
        for (i, v) in doubles[..6].iter_mut().enumerate() {
            *v = f64::from_le_bytes(header[14 + i * 8..22 + i * 8].try_into().unwrap());
        }
        let variant = match header[62] {
            0 => QuantVariant::Signed,
            1 => QuantVariant::Unsigned,
            _ => return Err(invalid("unknown quantization variant")),
        };
        for (i, v) in doubles[6..12].iter_mut().enumerate() {
            *v = f64::from_le_bytes(header[63 + i * 8..71 + i * 8].try_into().unwrap());
        }
        let extent = Extent3D::new(
            doubles[0], doubles[1], doubles[2], doubles[3], doubles[4], doubles[5],
        );
        let quantization = Quantization::from_parts(
            variant,
            [doubles[6], doubles[7], doubles[8]],
            [doubles[9], doubles[10], doubles[11]],
        );
        let expected = SOURCE_HEADER_BYTES + count * point_size_bytes as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(Error::SourceConsistency(format!(
                "{} declares {expected} bytes but holds {actual}",
                path.display()
            )));
        }
        Ok(Self::new(
            path,
            count,
            point_size_bytes,
            SOURCE_HEADER_BYTES,
            extent,
            quantization,
        ))
    }
}

impl CompositeSource {
    pub fn segments(&self) -> &[PointCloudBinarySource] {
        &self.segments
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn point_size_bytes(&self) -> usize {
        self.point_size_bytes
    }

    pub fn data_len(&self) -> u64 {
        self.count * self.point_size_bytes as u64
    }
}
