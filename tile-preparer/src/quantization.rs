//! Fixed-point encoding of double-precision coordinates.
//!
//! Every coordinate is stored on disk as a little-endian `i32` under a
//! per-axis `(scale, offset)` mapping: `quantized = round((real - offset) / scale)`.
//! Scale factors are powers of ten chosen per axis to use as much of the
//! 32-bit range as the extent allows; all spatial comparisons during
//! partitioning happen in this integer space so repeated conversions can
//! never drift.

use crate::error::{Error, Result};
use crate::geometry::{Extent3D, Point3D};

/// Quantized values must fit a signed 32-bit record field, so the usable
/// magnitude is `i32::MAX` regardless of variant.
const FIT_LIMIT: f64 = i32::MAX as f64;

// --------------------------------------------------------------------------
// Quantization

/// Offset placement. Signed quantization centers the integer range on the
/// extent midpoint; unsigned anchors it at the extent minimum so every
/// quantized value is non-negative.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuantVariant {
    Signed,
    Unsigned,
}

/// Immutable per-axis scale/offset mapping between real and integer space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quantization {
    variant: QuantVariant,
    scale_x: f64,
    scale_y: f64,
    scale_z: f64,
    offset_x: f64,
    offset_y: f64,
    offset_z: f64,
}

/// Integer-space counterpart of [`Point3D`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuantizedPoint3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Integer-space counterpart of [`Extent3D`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuantizedExtent3D {
    pub min_x: i32,
    pub min_y: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub max_z: i32,
}

impl QuantizedExtent3D {
    pub fn range_x(&self) -> u32 {
        self.max_x.wrapping_sub(self.min_x) as u32
    }

    pub fn range_y(&self) -> u32 {
        self.max_y.wrapping_sub(self.min_y) as u32
    }

    pub fn range_z(&self) -> u32 {
        self.max_z.wrapping_sub(self.min_z) as u32
    }
}

impl Quantization {
    /// Chooses the finest power-of-ten scale per axis such that the whole
    /// extent still fits the 32-bit range, anchored per `variant`.
    ///
    /// Fails with [`Error::Precision`] when an axis range is so large that
    /// even a scale of 1.0 overflows -- the dataset must be rejected before
    /// any I/O starts.
    pub fn create(extent: &Extent3D, variant: QuantVariant) -> Result<Self> {
        let scale_x = axis_scale('x', extent.range_x())?;
        let scale_y = axis_scale('y', extent.range_y())?;
        let scale_z = axis_scale('z', extent.range_z())?;

        let (offset_x, offset_y, offset_z) = match variant {
            QuantVariant::Signed => (
                extent.midpoint_x(),
                extent.midpoint_y(),
                extent.midpoint_z(),
            ),
            QuantVariant::Unsigned => (extent.min_x(), extent.min_y(), extent.min_z()),
        };

        Ok(Self {
            variant,
            scale_x,
            scale_y,
            scale_z,
            offset_x,
            offset_y,
            offset_z,
        })
    }

    /// Rebuilds a quantization from serialized fields (tile store headers).
    pub fn from_parts(
        variant: QuantVariant,
        scales: [f64; 3],
        offsets: [f64; 3],
    ) -> Self {
        Self {
            variant,
            scale_x: scales[0],
            scale_y: scales[1],
            scale_z: scales[2],
            offset_x: offsets[0],
            offset_y: offsets[1],
            offset_z: offsets[2],
        }
    }

    pub fn variant(&self) -> QuantVariant {
        self.variant
    }

    pub fn scales(&self) -> [f64; 3] {
        [self.scale_x, self.scale_y, self.scale_z]
    }

    pub fn offsets(&self) -> [f64; 3] {
        [self.offset_x, self.offset_y, self.offset_z]
    }

    pub fn quantize(&self, p: &Point3D) -> QuantizedPoint3D {
        QuantizedPoint3D {
            x: ((p.x - self.offset_x) / self.scale_x).round() as i32,
            y: ((p.y - self.offset_y) / self.scale_y).round() as i32,
            z: ((p.z - self.offset_z) / self.scale_z).round() as i32,
        }
    }

    pub fn dequantize(&self, p: &QuantizedPoint3D) -> Point3D {
        Point3D {
            x: p.x as f64 * self.scale_x + self.offset_x,
            y: p.y as f64 * self.scale_y + self.offset_y,
            z: p.z as f64 * self.scale_z + self.offset_z,
        }
    }

    /// Quantizes the bounding corners of `extent`.
    pub fn convert_extent(&self, extent: &Extent3D) -> QuantizedExtent3D {
        let min = self.quantize(&Point3D::new(extent.min_x(), extent.min_y(), extent.min_z()));
        let max = self.quantize(&Point3D::new(extent.max_x(), extent.max_y(), extent.max_z()));
        QuantizedExtent3D {
            min_x: min.x,
            min_y: min.y,
            min_z: min.z,
            max_x: max.x,
            max_y: max.y,
            max_z: max.z,
        }
    }

    pub fn convert_extent_back(&self, extent: &QuantizedExtent3D) -> Extent3D {
        let min = self.dequantize(&QuantizedPoint3D {
            x: extent.min_x,
            y: extent.min_y,
            z: extent.min_z,
        });
        let max = self.dequantize(&QuantizedPoint3D {
            x: extent.max_x,
            y: extent.max_y,
            z: extent.max_z,
        });
        Extent3D::new(min.x, min.y, min.z, max.x, max.y, max.z)
    }
}

/// Largest integer exponent `p` with `10^p * range <= i32::MAX` yields
/// the finest representable precision; `scale = 10^-p`.
fn axis_scale(axis: char, range: f64) -> Result<f64> {
    // A zero range quantizes every value to the offset; any scale works.
    if range == 0.0 {
        return Ok(1.0);
    }
    let precision = (FIT_LIMIT / range).log10().floor() as i32;
    if precision < 0 {
        return Err(Error::Precision { axis, range });
    }
    Ok(10f64.powi(-precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_extent() -> Extent3D {
        Extent3D::new(430_000.0, 4_560_000.0, -12.5, 434_100.0, 4_563_800.0, 310.0)
    }

    #[test]
    fn round_trip_error_is_within_half_scale() {
        let extent = sample_extent();
        for variant in [QuantVariant::Signed, QuantVariant::Unsigned] {
            let q = Quantization::create(&extent, variant).unwrap();
            let [sx, sy, sz] = q.scales();
            let points = [
                Point3D::new(extent.min_x(), extent.min_y(), extent.min_z()),
                Point3D::new(extent.max_x(), extent.max_y(), extent.max_z()),
                Point3D::new(431_234.567, 4_561_987.321, 45.875),
            ];
            for p in points {
                let back = q.dequantize(&q.quantize(&p));
                assert!((back.x - p.x).abs() <= sx / 2.0 + f64::EPSILON * p.x.abs());
                assert!((back.y - p.y).abs() <= sy / 2.0 + f64::EPSILON * p.y.abs());
                assert!((back.z - p.z).abs() <= sz / 2.0 + f64::EPSILON * p.z.abs());
            }
        }
    }

    #[test]
    fn unsigned_values_are_non_negative() {
        let extent = sample_extent();
        let q = Quantization::create(&extent, QuantVariant::Unsigned).unwrap();
        let qe = q.convert_extent(&extent);
        assert_eq!(qe.min_x, 0);
        assert_eq!(qe.min_y, 0);
        assert_eq!(qe.min_z, 0);
        assert!(qe.max_x > 0 && qe.max_y > 0 && qe.max_z > 0);
    }

    #[test]
    fn scale_never_overflows_32_bits() {
        // Ranges just below each power-of-ten boundary are the worst cases.
        for range in [0.99, 9.99, 99.9, 1e6 - 1.0, 2e9] {
            let extent = Extent3D::new(0.0, 0.0, 0.0, range, range, range);
            let q = Quantization::create(&extent, QuantVariant::Unsigned).unwrap();
            let qe = q.convert_extent(&extent);
            // i32 round cannot have overflowed: max must still order above min.
            assert!(qe.max_x > qe.min_x);
            assert!((qe.range_x() as f64) <= FIT_LIMIT);
        }
    }

    #[test]
    fn exact_power_of_ten_boundary_does_not_saturate() {
        // range * 10^3 would be exactly 2^31, one past i32::MAX, so the
        // scale must step down a decade; the max corner then round-trips
        // within half a scale instead of saturating the i32 cast.
        let range = (1u64 << 31) as f64 / 1000.0;
        let extent = Extent3D::new(0.0, 0.0, 0.0, range, 1.0, 1.0);
        let q = Quantization::create(&extent, QuantVariant::Unsigned).unwrap();
        let [sx, ..] = q.scales();
        assert_eq!(sx, 0.01);
        let p = q.quantize(&Point3D::new(range, 1.0, 1.0));
        let back = q.dequantize(&p);
        assert!((back.x - range).abs() <= sx / 2.0);
    }

    #[test]
    fn oversized_extent_is_a_precision_error() {
        let extent = Extent3D::new(0.0, 0.0, 0.0, 1e12, 1.0, 1.0);
        let err = Quantization::create(&extent, QuantVariant::Signed).unwrap_err();
        assert!(matches!(err, Error::Precision { axis: 'x', .. }));
    }

    #[test]
    fn degenerate_axis_uses_unit_scale() {
        let extent = Extent3D::new(0.0, 0.0, 5.0, 100.0, 100.0, 5.0);
        let q = Quantization::create(&extent, QuantVariant::Unsigned).unwrap();
        assert_eq!(q.scales()[2], 1.0);
        let p = q.quantize(&Point3D::new(50.0, 50.0, 5.0));
        assert_eq!(p.z, 0);
    }

    #[test]
    fn extent_round_trip() {
        let extent = sample_extent();
        let q = Quantization::create(&extent, QuantVariant::Signed).unwrap();
        let back = q.convert_extent_back(&q.convert_extent(&extent));
        let [sx, sy, sz] = q.scales();
        assert!((back.min_x() - extent.min_x()).abs() <= sx);
        assert!((back.max_y() - extent.max_y()).abs() <= sy);
        assert!((back.max_z() - extent.max_z()).abs() <= sz);
    }
}
