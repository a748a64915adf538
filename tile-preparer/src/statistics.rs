//! Bounded-memory running statistics of the vertical axis.
//!
//! Values are binned into a fixed-resolution histogram over the quantized
//! z range during the single analysis scan; mean and standard deviation
//! are then computed from bin centers. Memory is independent of point
//! count and precision is bounded by the bin width.

/// Bins used for the z histogram.
pub const STATISTICS_BINS: usize = 1024;

/// Finished vertical-axis statistics in real (dequantized) units.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Statistics {
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
    /// Center of the most populated histogram bin.
    pub mode: f64,
}

#[derive(Debug)]
pub struct StatisticsAccumulator {
    bins: Vec<u64>,
    q_min: i32,
    /// Quantized units per bin, >= 1.
    bin_width: f64,
}

impl StatisticsAccumulator {
    pub fn new(q_min: i32, q_range: u32) -> Self {
        Self {
            bins: vec![0; STATISTICS_BINS],
            q_min,
            // +1 so the max quantized value maps to the last bin.
            bin_width: (q_range as f64 + 1.0) / STATISTICS_BINS as f64,
        }
    }

    pub fn add(&mut self, qz: i32) {
        let delta = qz.wrapping_sub(self.q_min) as u32 as f64;
        let bin = ((delta / self.bin_width) as usize).min(STATISTICS_BINS - 1);
        self.bins[bin] += 1;
    }

    /// Folds the histogram into real-unit statistics, where the quantized
    /// range `[q_min, q_min + q_range]` spans `[min_z, min_z + range_z]`.
    pub fn compute(&self, min_z: f64, range_z: f64) -> Statistics {
        let count: u64 = self.bins.iter().sum();
        if count == 0 {
            return Statistics {
                count: 0,
                mean: min_z,
                std_dev: 0.0,
                mode: min_z,
            };
        }

        let bin_span = range_z / STATISTICS_BINS as f64;
        let center = |i: usize| min_z + (i as f64 + 0.5) * bin_span;

        let mut sum = 0.0;
        for (i, &n) in self.bins.iter().enumerate() {
            sum += center(i) * n as f64;
        }
        let mean = sum / count as f64;

        let mut variance = 0.0;
        let mut mode_bin = 0;
        for (i, &n) in self.bins.iter().enumerate() {
            let d = center(i) - mean;
            variance += d * d * n as f64;
            if n > self.bins[mode_bin] {
                mode_bin = i;
            }
        }
        variance /= count as f64;

        Statistics {
            count,
            mean,
            std_dev: variance.sqrt(),
            mode: center(mode_bin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_values_have_expected_mean() {
        // z quantized over [0, 1023] mapping to [0.0, 102.3].
        let mut acc = StatisticsAccumulator::new(0, 1023);
        for qz in 0..1024 {
            acc.add(qz);
        }
        let stats = acc.compute(0.0, 102.4);
        assert_eq!(stats.count, 1024);
        assert!((stats.mean - 51.2).abs() < 0.1);
        // Uniform distribution: sigma = range / sqrt(12).
        assert!((stats.std_dev - 102.4 / 12f64.sqrt()).abs() < 0.5);
    }

    #[test]
    fn mode_tracks_the_heaviest_bin() {
        let mut acc = StatisticsAccumulator::new(-512, 1023);
        for _ in 0..100 {
            acc.add(0); // center of the range
        }
        acc.add(-512);
        acc.add(511);
        let stats = acc.compute(-51.2, 102.4);
        assert!((stats.mode - 0.0).abs() < 0.2);
    }

    #[test]
    fn empty_accumulator_is_well_defined() {
        let acc = StatisticsAccumulator::new(0, 100);
        let stats = acc.compute(5.0, 10.0);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn precision_is_bounded_by_bin_width() {
        // A narrow spike lands in one bin; the mean error is < one bin span.
        let mut acc = StatisticsAccumulator::new(0, 1_000_000);
        for _ in 0..1000 {
            acc.add(250_000);
        }
        let stats = acc.compute(0.0, 1000.0);
        let bin_span = 1000.0 / STATISTICS_BINS as f64;
        assert!((stats.mean - 250.0).abs() <= bin_span);
        assert!(stats.std_dev <= bin_span);
    }
}
