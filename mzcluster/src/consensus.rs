//! The incremental consensus spectrum a cluster maintains over its
//! members.
//!
//! Spectra are folded into per-bin intensity sums so that `add` and
//! `merge` stay cheap, associative, and commutative. The noise filter is
//! only applied when the representative spectrum is read, and the pruned
//! bins stay in the underlying map.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::spectrum::{random_uui, BinarySpectrum};

/// The width, in m/z bins, of the windows the noise filter partitions the
/// consensus peaks into.
pub const NOISE_FILTER_INCREMENT: i32 = 100;

/// Running intensity sum and occurrence count for one m/z bin.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusPeak {
    pub summed_intensity: i64,
    pub count: i32,
}

/// An incrementally built consensus spectrum.
#[derive(Debug, Clone)]
pub struct GreedyConsensusSpectrum {
    uui: String,
    n_spectra: i64,
    sum_precursor_mz: i64,
    sum_precursor_charge: i64,
    peak_map: BTreeMap<i32, ConsensusPeak>,
    noise_filter_increment: i32,
    /// The cached representative; cleared by every mutation.
    representative: Option<BinarySpectrum>,
}

impl GreedyConsensusSpectrum {
    pub fn new() -> Self {
        Self::with_increment(NOISE_FILTER_INCREMENT)
    }

    pub fn with_increment(noise_filter_increment: i32) -> Self {
        Self {
            uui: random_uui(),
            n_spectra: 0,
            sum_precursor_mz: 0,
            sum_precursor_charge: 0,
            peak_map: BTreeMap::new(),
            noise_filter_increment: noise_filter_increment.max(1),
            representative: None,
        }
    }

    pub(crate) fn from_parts(
        uui: String,
        n_spectra: i64,
        sum_precursor_mz: i64,
        sum_precursor_charge: i64,
        noise_filter_increment: i32,
        peaks: impl IntoIterator<Item = (i32, ConsensusPeak)>,
    ) -> Self {
        Self {
            uui,
            n_spectra,
            sum_precursor_mz,
            sum_precursor_charge,
            peak_map: peaks.into_iter().collect(),
            noise_filter_increment: noise_filter_increment.max(1),
            representative: None,
        }
    }

    /// The identifier the representative spectrum carries; stable for the
    /// lifetime of the consensus.
    pub fn uui(&self) -> &str {
        &self.uui
    }

    pub fn spectrum_count(&self) -> i64 {
        self.n_spectra
    }

    pub fn distinct_bin_count(&self) -> usize {
        self.peak_map.len()
    }

    pub fn sum_precursor_mz(&self) -> i64 {
        self.sum_precursor_mz
    }

    pub fn sum_precursor_charge(&self) -> i64 {
        self.sum_precursor_charge
    }

    pub fn noise_filter_increment(&self) -> i32 {
        self.noise_filter_increment
    }

    /// The total occurrence count across bins, which always equals the
    /// summed peak count of the merged members.
    pub fn total_peak_count(&self) -> i64 {
        self.peak_map.values().map(|p| p.count as i64).sum()
    }

    pub fn peaks(&self) -> impl Iterator<Item = (i32, ConsensusPeak)> + '_ {
        self.peak_map.iter().map(|(&bin, &peak)| (bin, peak))
    }

    /// The averaged precursor m/z bin, or -1 while no spectrum has been
    /// added.
    pub fn average_precursor_mz_bin(&self) -> i32 {
        if self.n_spectra == 0 {
            return -1;
        }
        (self.sum_precursor_mz as f64 / self.n_spectra as f64).round() as i32
    }

    /// The averaged precursor charge, or -1 while no spectrum has been
    /// added.
    pub fn average_precursor_charge(&self) -> i32 {
        if self.n_spectra == 0 {
            return -1;
        }
        (self.sum_precursor_charge as f64 / self.n_spectra as f64).round() as i32
    }

    /// Fold one spectrum into the consensus.
    pub fn add(&mut self, spectrum: &BinarySpectrum) {
        for (&bin, &intensity) in spectrum.mzs().iter().zip(spectrum.intensities().iter()) {
            let peak = self.peak_map.entry(bin).or_default();
            peak.summed_intensity += intensity as i64;
            peak.count += 1;
        }
        self.sum_precursor_mz += spectrum.precursor_mz_bin() as i64;
        self.sum_precursor_charge += spectrum.precursor_charge() as i64;
        self.n_spectra += 1;
        self.representative = None;
    }

    /// Fold another consensus into this one, a pointwise sum of the
    /// underlying maps.
    pub fn merge(&mut self, other: &GreedyConsensusSpectrum) {
        for (&bin, other_peak) in &other.peak_map {
            let peak = self.peak_map.entry(bin).or_default();
            peak.summed_intensity += other_peak.summed_intensity;
            peak.count += other_peak.count;
        }
        self.n_spectra += other.n_spectra;
        self.sum_precursor_mz += other.sum_precursor_mz;
        self.sum_precursor_charge += other.sum_precursor_charge;
        self.representative = None;
    }

    /// How many peaks the noise filter retains per window for the current
    /// member count.
    fn retained_per_window(&self) -> usize {
        (5.0 * ((self.n_spectra + 1) as f64).log2()).ceil() as usize
    }

    /// The noise-filtered representative spectrum, recomputed lazily after
    /// mutations. The `uui` is stable across rebuilds.
    pub fn consensus_spectrum(&mut self) -> &BinarySpectrum {
        if self.representative.is_none() {
            self.representative = Some(self.build_representative());
        }
        self.representative.as_ref().unwrap()
    }

    fn build_representative(&self) -> BinarySpectrum {
        let keep = self.retained_per_window();
        let mut retained: Vec<(i32, i64)> = Vec::with_capacity(self.peak_map.len());
        for (_, window) in &self
            .peak_map
            .iter()
            .map(|(&bin, peak)| (bin, peak.summed_intensity))
            .chunk_by(|&(bin, _)| bin.div_euclid(self.noise_filter_increment))
        {
            let mut window: Vec<(i32, i64)> = window.collect();
            if window.len() > keep {
                window.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                window.truncate(keep);
                window.sort_by_key(|&(bin, _)| bin);
            }
            retained.extend(window);
        }

        let mz: Vec<i32> = retained.iter().map(|&(bin, _)| bin).collect();
        let intensity: Vec<i32> = retained
            .iter()
            .map(|&(_, summed)| summed.clamp(0, i32::MAX as i64) as i32)
            .collect();
        BinarySpectrum::with_uui(
            self.uui.clone(),
            self.average_precursor_mz_bin(),
            self.average_precursor_charge(),
            mz,
            intensity,
        )
    }
}

impl Default for GreedyConsensusSpectrum {
    fn default() -> Self {
        Self::new()
    }
}
