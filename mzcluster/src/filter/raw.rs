//! Filters over raw peak lists, applied before binarization while the
//! spectrum still carries real-valued coordinates.

use crate::spectrum::SpectrumRecord;

/// The default number of raw peaks retained per spectrum.
pub const DEFAULT_N_HIGHEST_PEAKS: usize = 40;

/// The mass tolerance added on top of the theoretically highest possible
/// fragment m/z before a peak is considered impossible.
pub const IMPOSSIBLY_HIGH_TOLERANCE: f64 = 1.5;

/// The default half-width of the removed precursor neighborhood.
pub const DEFAULT_PRECURSOR_REMOVAL_WINDOW: f64 = 0.5;

/// A filter over the raw peaks of a [`SpectrumRecord`]. Implementations
/// may inspect the precursor coordinates but only mutate the peak list.
pub trait RawPeakFilter {
    fn apply(&self, record: &mut SpectrumRecord);
}

/// Drops peaks whose m/z exceeds what the precursor mass can produce,
/// `precursor_mz * charge + tolerance`. An unknown charge is treated as 1.
#[derive(Debug, Clone, Copy)]
pub struct RemoveImpossiblyHighPeaks {
    pub tolerance: f64,
}

impl Default for RemoveImpossiblyHighPeaks {
    fn default() -> Self {
        Self {
            tolerance: IMPOSSIBLY_HIGH_TOLERANCE,
        }
    }
}

impl RawPeakFilter for RemoveImpossiblyHighPeaks {
    fn apply(&self, record: &mut SpectrumRecord) {
        let charge = record.precursor_charge.max(1) as f64;
        let limit = record.precursor_mz * charge + self.tolerance;
        record.peaks.retain(|p| p.mz <= limit);
    }
}

/// Drops peaks in the neighborhood of the precursor and its first few
/// isotopes, `precursor_mz ± k / charge` for small `k`.
#[derive(Debug, Clone, Copy)]
pub struct RemovePrecursorPeaks {
    pub window_da: f64,
}

impl RemovePrecursorPeaks {
    const ISOTOPE_STEPS: i32 = 3;

    pub fn new(window_da: f64) -> Self {
        Self { window_da }
    }
}

impl Default for RemovePrecursorPeaks {
    fn default() -> Self {
        Self::new(DEFAULT_PRECURSOR_REMOVAL_WINDOW)
    }
}

impl RawPeakFilter for RemovePrecursorPeaks {
    fn apply(&self, record: &mut SpectrumRecord) {
        let charge = record.precursor_charge.max(1) as f64;
        let precursor_mz = record.precursor_mz;
        let window = self.window_da;
        record.peaks.retain(|p| {
            (-Self::ISOTOPE_STEPS..=Self::ISOTOPE_STEPS)
                .all(|k| (p.mz - (precursor_mz + k as f64 / charge)).abs() > window)
        });
    }
}

/// Retains the `n` most intense peaks, intensity ties breaking toward the
/// lower m/z. The surviving peaks stay sorted by m/z ascending.
#[derive(Debug, Clone, Copy)]
pub struct KeepNHighestRawPeaks {
    pub n: usize,
}

impl KeepNHighestRawPeaks {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Default for KeepNHighestRawPeaks {
    fn default() -> Self {
        Self::new(DEFAULT_N_HIGHEST_PEAKS)
    }
}

impl RawPeakFilter for KeepNHighestRawPeaks {
    fn apply(&self, record: &mut SpectrumRecord) {
        if record.peaks.len() <= self.n {
            return;
        }
        record
            .peaks
            .sort_by(|a, b| b.intensity.total_cmp(&a.intensity).then(a.mz.total_cmp(&b.mz)));
        record.peaks.truncate(self.n);
        record.peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    }
}

/// A left-to-right composition of raw peak filters.
#[derive(Default)]
pub struct RawFilterChain {
    filters: Vec<Box<dyn RawPeakFilter + Send>>,
}

impl RawFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<F: RawPeakFilter + Send + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl RawPeakFilter for RawFilterChain {
    fn apply(&self, record: &mut SpectrumRecord) {
        for filter in &self.filters {
            filter.apply(record);
        }
    }
}

/// The standard loading chain: impossible peaks out, precursor
/// neighborhood out, then the top `n_highest` peaks by intensity.
pub fn default_loading_filter(n_highest: usize) -> RawFilterChain {
    RawFilterChain::new()
        .then(RemoveImpossiblyHighPeaks::default())
        .then(RemovePrecursorPeaks::default())
        .then(KeepNHighestRawPeaks::new(n_highest))
}
