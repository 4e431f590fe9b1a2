//! The per-bin peak filter applied to integerized spectra.

use crate::spectrum::BinarySpectrum;

/// Collapses an integerized spectrum to its highest peak per m/z window.
///
/// Peaks whose bins fall into the same window of `window` bins are reduced
/// to the single most intense one, intensity ties resolving toward the
/// lower m/z. With the default window of one bin the output m/z vector is
/// strictly increasing.
#[derive(Debug, Clone, Copy)]
pub struct HighestPeakPerBinFunction {
    window: i32,
}

impl HighestPeakPerBinFunction {
    pub fn new() -> Self {
        Self::with_window(1)
    }

    pub fn with_window(window: i32) -> Self {
        Self { window: window.max(1) }
    }

    pub fn window(&self) -> i32 {
        self.window
    }

    pub fn apply(&self, spectrum: BinarySpectrum) -> BinarySpectrum {
        let mzs = spectrum.mzs();
        let intensities = spectrum.intensities();

        let mut out_mz: Vec<i32> = Vec::with_capacity(mzs.len());
        let mut out_intensity: Vec<i32> = Vec::with_capacity(mzs.len());

        for (&mz, &intensity) in mzs.iter().zip(intensities.iter()) {
            let key = mz.div_euclid(self.window);
            match out_mz.last() {
                Some(&last_mz) if last_mz.div_euclid(self.window) == key => {
                    // input is sorted, so a window forms a contiguous run
                    let last = out_intensity.len() - 1;
                    if intensity > out_intensity[last] {
                        out_mz[last] = mz;
                        out_intensity[last] = intensity;
                    }
                }
                _ => {
                    out_mz.push(mz);
                    out_intensity.push(intensity);
                }
            }
        }

        BinarySpectrum::with_uui(
            spectrum.uui().to_string(),
            spectrum.precursor_mz_bin(),
            spectrum.precursor_charge(),
            out_mz,
            out_intensity,
        )
    }
}

impl Default for HighestPeakPerBinFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spectrum(peaks: &[(i32, i32)]) -> BinarySpectrum {
        BinarySpectrum::new(
            500_250,
            2,
            peaks.iter().map(|p| p.0).collect(),
            peaks.iter().map(|p| p.1).collect(),
        )
    }

    #[test]
    fn test_keeps_highest_per_bin() {
        let filtered = HighestPeakPerBinFunction::new()
            .apply(spectrum(&[(100, 5), (100, 9), (100, 2), (101, 1)]));
        assert_eq!(filtered.mzs(), &[100, 101]);
        assert_eq!(filtered.intensities(), &[9, 1]);
    }

    #[test]
    fn test_ties_prefer_low_mz() {
        let filtered =
            HighestPeakPerBinFunction::with_window(10).apply(spectrum(&[(100, 7), (105, 7)]));
        assert_eq!(filtered.mzs(), &[100]);
        assert_eq!(filtered.intensities(), &[7]);
    }

    #[test]
    fn test_window_grouping() {
        let filtered = HighestPeakPerBinFunction::with_window(10)
            .apply(spectrum(&[(100, 1), (104, 8), (110, 3), (119, 2), (120, 4)]));
        assert_eq!(filtered.mzs(), &[104, 110, 120]);
        assert_eq!(filtered.intensities(), &[8, 3, 4]);
    }

    #[test]
    fn test_output_strictly_monotone_and_no_larger() {
        let input = spectrum(&[(100, 1), (100, 4), (101, 2), (101, 9), (250, 3)]);
        let n_in = input.peak_count();
        let filtered = HighestPeakPerBinFunction::new().apply(input);
        assert!(filtered.peak_count() <= n_in);
        assert!(filtered.mzs().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_preserves_identity_and_precursor() {
        let input = spectrum(&[(100, 1)]);
        let uui = input.uui().to_string();
        let filtered = HighestPeakPerBinFunction::new().apply(input);
        assert_eq!(filtered.uui(), uui);
        assert_eq!(filtered.precursor_mz_bin(), 500_250);
        assert_eq!(filtered.precursor_charge(), 2);
    }
}
