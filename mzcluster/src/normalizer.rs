//! Normalizers that map the real-valued m/z and intensity axes onto
//! integers so spectra can be compared bin-by-bin.

/// The fixed scale factor used to integerize precursor m/z values.
pub const MZ_CONSTANT: i32 = 1000;

/// The classical SEQUEST fragment bin width in Thomson.
pub const SEQUEST_BIN_WIDTH: f64 = 1.0005079;

/// The fraction of a bin the SEQUEST binning rule shifts values by.
const SEQUEST_BIN_OFFSET: f64 = 0.4;

/// The default Tide-style fragment bin width in Thomson.
pub const TIDE_BIN_WIDTH: f64 = 0.02;

/// Maps fragment m/z values onto integer bin indices with
/// `bin(mz) = floor((mz - offset) / width)`, ties resolving toward
/// negative infinity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MzBinner {
    width: f64,
    offset: f64,
}

impl MzBinner {
    /// The SEQUEST binning policy: ~1 Th bins shifted by 0.4 of a bin.
    pub fn sequest() -> Self {
        Self {
            width: SEQUEST_BIN_WIDTH,
            offset: -SEQUEST_BIN_OFFSET * SEQUEST_BIN_WIDTH,
        }
    }

    /// The Tide binning policy with the default 0.02 Th width.
    pub fn tide() -> Self {
        Self::tide_with_width(TIDE_BIN_WIDTH)
    }

    pub fn tide_with_width(width: f64) -> Self {
        Self { width, offset: 0.0 }
    }

    #[inline]
    pub fn bin(&self, mz: f64) -> i32 {
        ((mz - self.offset) / self.width).floor() as i32
    }

    /// The m/z at the center of `bin`, the inverse used for reporting.
    /// Round-trips to within half a bin width of the original value.
    #[inline]
    pub fn center(&self, bin: i32) -> f64 {
        (bin as f64 + 0.5) * self.width + self.offset
    }

    pub fn width(&self) -> f64 {
        self.width
    }
}

impl Default for MzBinner {
    fn default() -> Self {
        Self::sequest()
    }
}

/// Maps the precursor m/z onto an integer with a fixed scale factor,
/// `round(mz * scale)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecursorBinner {
    scale: i32,
}

impl PrecursorBinner {
    pub fn new(scale: i32) -> Self {
        Self { scale }
    }

    #[inline]
    pub fn bin(&self, mz: f64) -> i32 {
        (mz * self.scale as f64).round() as i32
    }

    #[inline]
    pub fn unbin(&self, bin: i32) -> f64 {
        bin as f64 / self.scale as f64
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }
}

impl Default for PrecursorBinner {
    fn default() -> Self {
        Self::new(MZ_CONSTANT)
    }
}

/// The default scale all intensity normalizers multiply onto the unit
/// interval before rounding.
pub const DEFAULT_INTENSITY_SCALE: f64 = 100_000.0;

/// The closed set of intensity normalization policies. Every variant maps
/// an ordered list of raw intensities onto an equally long integer vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntensityNormalizer {
    /// `round(I * scale)`, clipped to the `i32` range.
    Basic { scale: f64 },
    /// Divides by the maximum intensity before applying the basic rule.
    MaxPeak { scale: f64 },
    /// `round(log1p(I) * scale)`.
    Log { scale: f64 },
    /// The cumulative distribution rank of each intensity, scaled.
    Cumulative { scale: f64 },
}

impl IntensityNormalizer {
    pub fn basic(scale: f64) -> Self {
        Self::Basic { scale }
    }

    pub fn max_peak(scale: f64) -> Self {
        Self::MaxPeak { scale }
    }

    pub fn log(scale: f64) -> Self {
        Self::Log { scale }
    }

    pub fn cumulative(scale: f64) -> Self {
        Self::Cumulative { scale }
    }

    pub fn normalize(&self, intensities: &[f64]) -> Vec<i32> {
        match *self {
            Self::Basic { scale } => intensities.iter().map(|i| clip(i * scale)).collect(),
            Self::MaxPeak { scale } => {
                if intensities.is_empty() {
                    return Vec::new();
                }
                let max = intensities.iter().cloned().fold(f64::MIN, f64::max);
                if max == 0.0 {
                    return vec![0; intensities.len()];
                }
                intensities.iter().map(|i| clip(i / max * scale)).collect()
            }
            Self::Log { scale } => intensities.iter().map(|i| clip(i.ln_1p() * scale)).collect(),
            Self::Cumulative { scale } => cumulative_rank(intensities, scale),
        }
    }
}

impl Default for IntensityNormalizer {
    fn default() -> Self {
        Self::MaxPeak {
            scale: DEFAULT_INTENSITY_SCALE,
        }
    }
}

#[inline]
fn clip(value: f64) -> i32 {
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Assign each intensity the scaled cumulative share of total signal at or
/// below it, reported in the original peak order.
fn cumulative_rank(intensities: &[f64], scale: f64) -> Vec<i32> {
    let total: f64 = intensities.iter().sum();
    if total == 0.0 {
        return vec![0; intensities.len()];
    }
    let mut order: Vec<usize> = (0..intensities.len()).collect();
    order.sort_by(|&a, &b| intensities[a].total_cmp(&intensities[b]));

    let mut out = vec![0; intensities.len()];
    let mut cumulative = 0.0;
    for idx in order {
        cumulative += intensities[idx];
        out[idx] = clip(cumulative / total * scale);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn variance(values: &[i32]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0)
    }

    #[test]
    fn test_sequest_round_trip() {
        let binner = MzBinner::sequest();
        for mz in [56.04, 175.119, 500.25, 1024.5577, 1999.99] {
            let bin = binner.bin(mz);
            assert!(
                (binner.center(bin) - mz).abs() <= binner.width() / 2.0,
                "round trip failed for {mz}"
            );
        }
    }

    #[test]
    fn test_tide_round_trip() {
        let binner = MzBinner::tide();
        for mz in [56.04, 175.119, 500.25, 1024.5577] {
            let bin = binner.bin(mz);
            assert!((binner.center(bin) - mz).abs() <= binner.width() / 2.0);
        }
    }

    #[test]
    fn test_binner_is_monotone() {
        let binner = MzBinner::sequest();
        assert!(binner.bin(100.0) <= binner.bin(100.2));
        assert!(binner.bin(100.2) <= binner.bin(101.4));
    }

    #[test]
    fn test_precursor_round_trip() {
        let binner = PrecursorBinner::default();
        for mz in [500.25, 977.023, 1234.5678] {
            let bin = binner.bin(mz);
            assert!((binner.unbin(bin) - mz).abs() < 0.5 / MZ_CONSTANT as f64);
        }
        assert_eq!(binner.bin(500.25), 500_250);
    }

    #[test]
    fn test_basic_normalizer() {
        let normalizer = IntensityNormalizer::basic(100.0);
        assert_eq!(normalizer.normalize(&[0.0, 1.5, 2.249]), vec![0, 150, 225]);
    }

    #[test]
    fn test_basic_normalizer_clips() {
        let normalizer = IntensityNormalizer::basic(1.0);
        assert_eq!(normalizer.normalize(&[1e200]), vec![i32::MAX]);
    }

    #[test]
    fn test_max_peak_normalizer_degenerate() {
        let normalizer = IntensityNormalizer::max_peak(100.0);
        assert!(normalizer.normalize(&[]).is_empty());
        assert_eq!(normalizer.normalize(&[0.0, 0.0]), vec![0, 0]);
    }

    #[test]
    fn test_max_peak_normalizer() {
        let normalizer = IntensityNormalizer::max_peak(100.0);
        assert_eq!(normalizer.normalize(&[5.0, 10.0, 2.5]), vec![50, 100, 25]);
    }

    #[test]
    fn test_cumulative_length_matches() {
        let normalizer = IntensityNormalizer::cumulative(DEFAULT_INTENSITY_SCALE);
        let data = [12.0, 1.0, 55.0, 3.2, 3.2, 90.1];
        assert_eq!(normalizer.normalize(&data).len(), data.len());
    }

    #[test]
    fn test_cumulative_is_rank_ordered() {
        let normalizer = IntensityNormalizer::cumulative(100.0);
        let out = normalizer.normalize(&[5.0, 20.0, 10.0]);
        // total = 35: ranks are 5/35, 35/35, 15/35 in input order
        assert_eq!(out, vec![14, 100, 43]);
    }

    #[test]
    fn test_variance_ordering() {
        // cumulative < log < basic on any input with >= 2 distinct intensities
        let data = [3.0, 1500.0, 22.7, 840.0, 19.0, 65000.0, 12.0, 770.5];
        let basic = IntensityNormalizer::basic(DEFAULT_INTENSITY_SCALE).normalize(&data);
        let log = IntensityNormalizer::log(DEFAULT_INTENSITY_SCALE).normalize(&data);
        let cumulative = IntensityNormalizer::cumulative(DEFAULT_INTENSITY_SCALE).normalize(&data);

        assert!(variance(&log) < variance(&basic));
        assert!(variance(&cumulative) < variance(&log));
    }
}
