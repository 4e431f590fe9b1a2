use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use mzcluster::filter::HighestPeakPerBinFunction;
use mzcluster::normalizer::{IntensityNormalizer, MzBinner, DEFAULT_INTENSITY_SCALE};

/// The default precursor window half-width, in precursor bins.
pub const DEFAULT_PRECURSOR_TOLERANCE_BINS: i32 = 10;

/// The default floor for the comparison-count threshold lookup.
pub const DEFAULT_MIN_COMPARISONS: u64 = 10_000;

/// How many prepared spectra the reader thread may buffer ahead of the
/// engine.
pub const PREPARE_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgMzBinner {
    /// SEQUEST-style ~1 Th fragment bins
    #[default]
    Sequest,
    /// Tide-style 0.02 Th fragment bins
    Tide,
}

impl From<ArgMzBinner> for MzBinner {
    fn from(value: ArgMzBinner) -> Self {
        match value {
            ArgMzBinner::Sequest => MzBinner::sequest(),
            ArgMzBinner::Tide => MzBinner::tide(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgIntensityNormalizer {
    /// Scale to the base peak before integerizing
    #[default]
    MaxPeak,
    /// Integerize the raw intensities directly
    Basic,
    /// Integerize log1p-transformed intensities
    Log,
    /// Integerize the cumulative intensity rank
    Cumulative,
}

impl From<ArgIntensityNormalizer> for IntensityNormalizer {
    fn from(value: ArgIntensityNormalizer) -> Self {
        match value {
            ArgIntensityNormalizer::MaxPeak => IntensityNormalizer::max_peak(DEFAULT_INTENSITY_SCALE),
            ArgIntensityNormalizer::Basic => IntensityNormalizer::basic(DEFAULT_INTENSITY_SCALE),
            ArgIntensityNormalizer::Log => IntensityNormalizer::log(DEFAULT_INTENSITY_SCALE),
            ArgIntensityNormalizer::Cumulative => {
                IntensityNormalizer::cumulative(DEFAULT_INTENSITY_SCALE)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStoreMode {
    /// Block-structured compressed store, no pre-sizing required
    #[default]
    Dynamic,
    /// Pre-allocated slot store, requires the expected cluster count
    Static,
}

/// The clustering tunables, loadable as a partial JSON document through
/// `--config-file`. Explicit command line flags win over the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClusteringConfig {
    pub precursor_tolerance_bins: Option<i32>,
    pub precursor_tolerance_ppm: Option<f64>,
    pub fragment_tolerance: Option<f64>,
    pub min_comparisons: Option<u64>,
    pub n_highest_peaks_raw: Option<usize>,
    pub noise_filter_increment: Option<i32>,
    pub top_peak_share_k: Option<usize>,
    pub cluster_store_mode: Option<ClusterStoreMode>,
    pub expected_cluster_count: Option<usize>,
    pub mz_binner: Option<ArgMzBinner>,
    pub intensity_normalizer: Option<ArgIntensityNormalizer>,
}

/// The fully resolved parameter set the driver runs with.
#[derive(Debug, Clone)]
pub struct ResolvedParams {
    pub precursor_tolerance_bins: i32,
    pub fragment_window_bins: i32,
    pub scorer_tolerance_bins: i32,
    pub min_comparisons: u64,
    pub n_highest_peaks_raw: usize,
    pub noise_filter_increment: i32,
    pub top_peak_share_k: usize,
    pub cluster_store_mode: ClusterStoreMode,
    pub expected_cluster_count: usize,
    pub mz_binner: MzBinner,
    pub intensity_normalizer: IntensityNormalizer,
}

impl ResolvedParams {
    pub fn per_bin_filter(&self) -> HighestPeakPerBinFunction {
        HighestPeakPerBinFunction::with_window(self.fragment_window_bins)
    }
}

/// Turn an optional ppm tolerance into precursor bins. The conversion is
/// anchored at the 1000 Th reference mass, where one ppm equals exactly
/// one precursor bin.
pub fn ppm_to_precursor_bins(ppm: f64) -> i32 {
    ppm.round().max(1.0) as i32
}

/// Turn a fragment tolerance in Thomson into a per-bin filter window.
pub fn fragment_tolerance_to_bins(tolerance: f64, binner: MzBinner) -> i32 {
    ((tolerance / binner.width()).round() as i32).max(1)
}
