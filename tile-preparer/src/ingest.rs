//! Reference producer of the binary point source contract.
//!
//! Converts a raw binary file of unquantized little-endian f64 (x, y, z)
//! triples into a quantized `.qpc` source: pass one scans for count and
//! extent, pass two quantizes and writes 12-byte records. Format-specific
//! decoders (LAS, LAZ, text) are external collaborators that should
//! produce the same contract.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::warn;

use crate::buffer::BufferPool;
use crate::error::Result;
use crate::geometry::{Extent3D, Point3D};
use crate::progress::ProgressManager;
use crate::quantization::{QuantVariant, Quantization};
use crate::source::{PointCloudBinarySource, QUANTIZED_COORD_BYTES, SOURCE_HEADER_BYTES};

const RAW_POINT_BYTES: usize = 24;

/// Converts `input` (raw f64 xyz triples) into a quantized source at
/// `output`. Unsigned quantization anchors the integer space at the
/// extent minimum. A truncated trailing record is skipped with a warning,
/// not a failure. Cancellation stops the second pass early; the
/// descriptor then declares only the records actually written, so the
/// partial file is still self-consistent.
pub fn convert_raw_xyz(
    input: &Path,
    output: &Path,
    pool: &BufferPool,
    progress: &mut ProgressManager,
) -> Result<PointCloudBinarySource> {
    let mut buffer = pool.acquire();
    let usable = (buffer.len() / RAW_POINT_BYTES) * RAW_POINT_BYTES;

    let mut file = File::open(input)?;
    let total_bytes = file.metadata()?.len();

    // Pass 1: count and extent.
    let mut count = 0u64;
    let mut extent: Option<Extent3D> = None;
    {
        let mut process = progress.start_process("ScanExtent");
        let mut consumed = 0u64;
        loop {
            let read = fill_buf(&mut file, &mut buffer[..usable])?;
            if read == 0 {
                break;
            }
            let whole = (read / RAW_POINT_BYTES) * RAW_POINT_BYTES;
            if whole < read {
                warn!(
                    bytes = read - whole,
                    "skipping truncated trailing record"
                );
            }
            for record in buffer[..whole].chunks_exact(RAW_POINT_BYTES) {
                let p = decode_raw(record);
                match extent.as_mut() {
                    Some(e) => e.expand(&p),
                    None => {
                        extent = Some(Extent3D::new(p.x, p.y, p.z, p.x, p.y, p.z));
                    }
                }
                count += 1;
            }
            consumed += read as u64;
            if !process.update(consumed as f32 / total_bytes.max(1) as f32) {
                break;
            }
        }
    }

    let extent = extent.unwrap_or_else(|| Extent3D::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0));
    let quantization = Quantization::create(&extent, QuantVariant::Unsigned)?;

    // Pass 2: quantize and write. A cancellation during pass 1 leaves the
    // extent incomplete, so no records may be written against it.
    let mut written = 0u64;
    if !progress.is_canceled() {
        let mut out = BufWriter::new(File::create(output)?);
        out.seek(SeekFrom::Start(SOURCE_HEADER_BYTES))?;

        let mut process = progress.start_process("WriteQuantized");
        file.seek(SeekFrom::Start(0))?;
        let mut consumed = 0u64;
        'outer: loop {
            let read = fill_buf(&mut file, &mut buffer[..usable])?;
            if read == 0 {
                break;
            }
            let whole = (read / RAW_POINT_BYTES) * RAW_POINT_BYTES;
            for record in buffer[..whole].chunks_exact(RAW_POINT_BYTES) {
                let q = quantization.quantize(&decode_raw(record));
                out.write_all(&q.x.to_le_bytes())?;
                out.write_all(&q.y.to_le_bytes())?;
                out.write_all(&q.z.to_le_bytes())?;
                written += 1;
            }
            consumed += read as u64;
            if !process.update(consumed as f32 / total_bytes.max(1) as f32) {
                break 'outer;
            }
        }
        out.flush()?;
    }

    let source = PointCloudBinarySource::new(
        output,
        written,
        QUANTIZED_COORD_BYTES,
        SOURCE_HEADER_BYTES,
        extent,
        quantization,
    );
    let mut out = File::options().write(true).open(output)?;
    source.write_descriptor(&mut out)?;
    Ok(source)
}

fn decode_raw(record: &[u8]) -> Point3D {
    Point3D::new(
        f64::from_le_bytes(record[0..8].try_into().unwrap()),
        f64::from_le_bytes(record[8..16].try_into().unwrap()),
        f64::from_le_bytes(record[16..24].try_into().unwrap()),
    )
}

/// Reads until `buf` is full or the stream ends; returns bytes read.
fn fill_buf(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_raw(path: &Path, points: &[(f64, f64, f64)], trailing_garbage: usize) {
        let mut file = File::create(path).unwrap();
        for &(x, y, z) in points {
            file.write_all(&x.to_le_bytes()).unwrap();
            file.write_all(&y.to_le_bytes()).unwrap();
            file.write_all(&z.to_le_bytes()).unwrap();
        }
        file.write_all(&vec![0xAB; trailing_garbage]).unwrap();
    }

    #[test]
    fn converts_and_round_trips_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("points.raw");
        let qpc = dir.path().join("points.qpc");
        let points = [
            (0.0, 0.0, 0.0),
            (100.0, 50.0, 10.0),
            (33.333, 44.444, 5.555),
        ];
        write_raw(&raw, &points, 0);

        let pool = BufferPool::new(4096, 1);
        let mut progress = ProgressManager::sink();
        let source = convert_raw_xyz(&raw, &qpc, &pool, &mut progress).unwrap();
        assert_eq!(source.count(), 3);
        assert_eq!(source.point_size_bytes(), QUANTIZED_COORD_BYTES);

        // Descriptor re-opens to the same view.
        let reopened = PointCloudBinarySource::open(&qpc).unwrap();
        assert_eq!(reopened.count(), 3);
        assert_eq!(reopened.extent(), source.extent());

        // Records dequantize back to the originals within half a scale.
        let mut file = File::open(&qpc).unwrap();
        file.seek(SeekFrom::Start(source.data_offset())).unwrap();
        let mut rec = [0u8; 12];
        let [sx, sy, sz] = source.quantization().scales();
        for &(x, y, z) in &points {
            file.read_exact(&mut rec).unwrap();
            let q = crate::quantization::QuantizedPoint3D {
                x: i32::from_le_bytes(rec[0..4].try_into().unwrap()),
                y: i32::from_le_bytes(rec[4..8].try_into().unwrap()),
                z: i32::from_le_bytes(rec[8..12].try_into().unwrap()),
            };
            let p = source.quantization().dequantize(&q);
            assert!((p.x - x).abs() <= sx);
            assert!((p.y - y).abs() <= sy);
            assert!((p.z - z).abs() <= sz);
        }
    }

    #[test]
    fn truncated_trailing_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("points.raw");
        let qpc = dir.path().join("points.qpc");
        write_raw(&raw, &[(1.0, 2.0, 3.0), (4.0, 5.0, 6.0)], 7);

        let pool = BufferPool::new(4096, 1);
        let mut progress = ProgressManager::sink();
        let source = convert_raw_xyz(&raw, &qpc, &pool, &mut progress).unwrap();
        assert_eq!(source.count(), 2);
    }
}
