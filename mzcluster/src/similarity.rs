//! Similarity scoring between integerized spectra.
//!
//! The primary scorer combines the probability of observing the shared
//! peak count by chance (Fisher exact over the shared fragment bins) with
//! a rank correlation over the shared peaks' intensities.

use statrs::distribution::{Discrete, Hypergeometric};

use crate::spectrum::BinarySpectrum;

/// A pluggable similarity score between two spectra, in `[0, 1]` with
/// higher meaning more similar.
pub trait SimilarityScorer {
    fn similarity(&self, a: &BinarySpectrum, b: &BinarySpectrum) -> f64;
}

/// Pair up the intensities of peaks whose m/z bins match, walking both
/// sorted bin vectors once. Bins match when they differ by at most
/// `tolerance` (0 requires identical bins).
pub fn matched_peak_intensities(
    a: &BinarySpectrum,
    b: &BinarySpectrum,
    tolerance: i32,
) -> Vec<(i32, i32)> {
    let (mzs_a, mzs_b) = (a.mzs(), b.mzs());
    let (ints_a, ints_b) = (a.intensities(), b.intensities());
    let mut matched = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < mzs_a.len() && j < mzs_b.len() {
        let delta = mzs_a[i] - mzs_b[j];
        if delta.abs() <= tolerance {
            matched.push((ints_a[i], ints_b[j]));
            i += 1;
            j += 1;
        } else if delta < 0 {
            i += 1;
        } else {
            j += 1;
        }
    }
    matched
}

/// Kendall's τ-b over pre-paired integer observations.
///
/// This is the tie-aware formulation computed with a swap-counting merge
/// sort, so scoring stays `O(n log n)` over the shared peaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct KendallsCorrelation;

impl KendallsCorrelation {
    /// Compute τ-b, reordering `pairs` in place. Returns `NaN` when one
    /// of the margins carries no untied pair.
    pub fn correlation(&self, pairs: &mut [(i32, i32)]) -> f64 {
        let n = pairs.len();
        if n < 2 {
            return f64::NAN;
        }
        let num_pairs = n as i64 * (n as i64 - 1) / 2;

        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut tied_x = 0i64;
        let mut tied_xy = 0i64;
        let mut run_x = 1i64;
        let mut run_xy = 1i64;
        for i in 1..n {
            if pairs[i].0 == pairs[i - 1].0 {
                run_x += 1;
                if pairs[i].1 == pairs[i - 1].1 {
                    run_xy += 1;
                } else {
                    tied_xy += run_xy * (run_xy - 1) / 2;
                    run_xy = 1;
                }
            } else {
                tied_x += run_x * (run_x - 1) / 2;
                run_x = 1;
                tied_xy += run_xy * (run_xy - 1) / 2;
                run_xy = 1;
            }
        }
        tied_x += run_x * (run_x - 1) / 2;
        tied_xy += run_xy * (run_xy - 1) / 2;

        let mut ys: Vec<i32> = pairs.iter().map(|p| p.1).collect();
        let swaps = merge_sort_counting_swaps(&mut ys) as i64;

        let mut tied_y = 0i64;
        let mut run_y = 1i64;
        for i in 1..n {
            if ys[i] == ys[i - 1] {
                run_y += 1;
            } else {
                tied_y += run_y * (run_y - 1) / 2;
                run_y = 1;
            }
        }
        tied_y += run_y * (run_y - 1) / 2;

        let concordant_minus_discordant = num_pairs - tied_x - tied_y + tied_xy - 2 * swaps;
        let non_tied = (num_pairs - tied_x) as f64 * (num_pairs - tied_y) as f64;
        if non_tied <= 0.0 {
            return f64::NAN;
        }
        concordant_minus_discordant as f64 / non_tied.sqrt()
    }
}

/// Sort `values` ascending, returning the number of strict inversions the
/// sort removed.
fn merge_sort_counting_swaps(values: &mut [i32]) -> u64 {
    let n = values.len();
    let mut buffer = values.to_vec();
    let mut swaps = 0u64;
    let mut width = 1usize;
    while width < n {
        let mut start = 0usize;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if values[j] < values[i] {
                    swaps += (mid - i) as u64;
                    buffer[k] = values[j];
                    j += 1;
                } else {
                    buffer[k] = values[i];
                    i += 1;
                }
                k += 1;
            }
            while i < mid {
                buffer[k] = values[i];
                i += 1;
                k += 1;
            }
            while j < end {
                buffer[k] = values[j];
                j += 1;
                k += 1;
            }
            values[start..end].copy_from_slice(&buffer[start..end]);
            start = end;
        }
        width *= 2;
    }
    swaps
}

/// The hypergeometric probability of two spectra sharing at least
/// `shared` fragment bins by chance, given `peaks_a` and `peaks_b` peaks
/// drawn from a universe of `universe` bins.
pub fn shared_peak_probability(universe: u64, peaks_a: u64, peaks_b: u64, shared: u64) -> f64 {
    if shared == 0 {
        return 1.0;
    }
    let population = universe.max(peaks_a).max(peaks_b);
    let distribution = match Hypergeometric::new(population, peaks_a, peaks_b) {
        Ok(d) => d,
        Err(_) => return 1.0,
    };
    let upper = peaks_a.min(peaks_b);
    if shared > upper {
        return 0.0;
    }
    (shared..=upper)
        .map(|k| distribution.pmf(k))
        .sum::<f64>()
        .min(1.0)
}

/// The combined share-of-peaks / intensity-rank similarity test.
///
/// `score = (1 - P(shared ≥ observed)) * (1 + max(0, τ)) / 2`, clamped to
/// `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct CombinedFisherIntensityTest {
    /// Peak match tolerance in integer bins; `0` requires identical bins.
    pub peak_match_tolerance: i32,
}

impl CombinedFisherIntensityTest {
    pub fn new() -> Self {
        Self::with_tolerance(0)
    }

    pub fn with_tolerance(peak_match_tolerance: i32) -> Self {
        Self {
            peak_match_tolerance,
        }
    }

    pub fn score(&self, a: &BinarySpectrum, b: &BinarySpectrum) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let mut shared = matched_peak_intensities(a, b, self.peak_match_tolerance);
        if shared.is_empty() {
            return 0.0;
        }

        let low = a.mzs()[0].min(b.mzs()[0]) as i64;
        let high = (*a.mzs().last().unwrap()).max(*b.mzs().last().unwrap()) as i64;
        let mut universe = (high - low + 1) as u64;
        if self.peak_match_tolerance > 0 {
            universe = (universe / (2 * self.peak_match_tolerance as u64 + 1)).max(1);
        }

        let p = shared_peak_probability(
            universe,
            a.peak_count() as u64,
            b.peak_count() as u64,
            shared.len() as u64,
        );
        let fisher_term = 1.0 - p;

        let tau = KendallsCorrelation.correlation(&mut shared);
        let tau_term = (1.0 + if tau.is_finite() { tau.max(0.0) } else { 0.0 }) / 2.0;

        (fisher_term * tau_term).clamp(0.0, 1.0)
    }
}

impl Default for CombinedFisherIntensityTest {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityScorer for CombinedFisherIntensityTest {
    fn similarity(&self, a: &BinarySpectrum, b: &BinarySpectrum) -> f64 {
        CombinedFisherIntensityTest::score(self, a, b)
    }
}
