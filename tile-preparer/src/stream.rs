//! Chunked sequential reading of binary point sources.
//!
//! A [`ChunkReader`] walks a source (or a sparse composite of byte ranges
//! of one file) through a caller-supplied buffer. The usable chunk length
//! is the largest multiple of the record size that fits the buffer, so a
//! chunk never splits a point record; range seams inside a composite are
//! equally invisible -- one chunk may span two adjacent ranges.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::trace;

use crate::error::Result;
use crate::source::{CompositeSource, PointCloudBinarySource};

/// One buffered read's worth of whole point records.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub data: &'a [u8],
    /// Sequential chunk ordinal within this reader.
    pub index: u32,
    pub points: usize,
    /// Bytes consumed so far over the reader's total length.
    pub progress: f32,
}

#[derive(Debug)]
pub struct ChunkReader {
    /// `None` only for an empty composite, which yields no chunks.
    file: Option<File>,
    point_size: usize,
    /// Absolute (offset, byte length) of each range, in read order.
    ranges: Vec<(u64, u64)>,
    range_idx: usize,
    pos_in_range: u64,
    needs_seek: bool,
    total_bytes: u64,
    consumed: u64,
    next_index: u32,
}

impl ChunkReader {
    pub fn over_source(source: &PointCloudBinarySource) -> Result<Self> {
        Self::from_ranges(
            Some(File::open(source.path())?),
            source.point_size_bytes(),
            vec![(source.data_offset(), source.data_len())],
        )
    }

    /// All segments of a composite view onto one file share a single
    /// handle; the reader seeks between ranges as it crosses seams.
    pub fn over_composite(composite: &CompositeSource) -> Result<Self> {
        let ranges = composite
            .segments()
            .iter()
            .map(|s| (s.data_offset(), s.data_len()))
            .collect::<Vec<_>>();
        let file = match composite.segments().first() {
            Some(first) => Some(File::open(first.path())?),
            None => None,
        };
        Self::from_ranges(file, composite.point_size_bytes(), ranges)
    }

    fn from_ranges(file: Option<File>, point_size: usize, ranges: Vec<(u64, u64)>) -> Result<Self> {
        let total_bytes = ranges.iter().map(|&(_, len)| len).sum();
        Ok(Self {
            file,
            point_size,
            ranges,
            range_idx: 0,
            pos_in_range: 0,
            needs_seek: true,
            total_bytes,
            consumed: 0,
            next_index: 0,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Largest whole-record byte count that fits `buffer_len`.
    pub fn usable_len(&self, buffer_len: usize) -> usize {
        (buffer_len / self.point_size) * self.point_size
    }

    /// Reads the next chunk into `buffer`. Returns `None` at the end of
    /// the final range. The returned slice always holds whole records.
    pub fn next_chunk<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Option<Chunk<'a>>> {
        let usable = self.usable_len(buffer.len());
        assert!(usable > 0, "buffer smaller than one point record");

        let mut filled = 0usize;
        while filled < usable && self.range_idx < self.ranges.len() {
            let (offset, len) = self.ranges[self.range_idx];
            let remaining = len - self.pos_in_range;
            if remaining == 0 {
                self.range_idx += 1;
                self.pos_in_range = 0;
                self.needs_seek = true;
                continue;
            }
            let file = self.file.as_mut().expect("non-empty range list has a file");
            if self.needs_seek {
                file.seek(SeekFrom::Start(offset + self.pos_in_range))?;
                self.needs_seek = false;
            }
            let want = remaining.min((usable - filled) as u64) as usize;
            file.read_exact(&mut buffer[filled..filled + want])?;
            filled += want;
            self.pos_in_range += want as u64;
        }

        if filled == 0 {
            return Ok(None);
        }
        debug_assert_eq!(filled % self.point_size, 0);

        self.consumed += filled as u64;
        let chunk = Chunk {
            data: &buffer[..filled],
            index: self.next_index,
            points: filled / self.point_size,
            progress: self.consumed as f32 / self.total_bytes as f32,
        };
        trace!(
            index = chunk.index,
            points = chunk.points,
            progress = chunk.progress,
            "chunk read"
        );
        self.next_index += 1;
        Ok(Some(chunk))
    }
}
