//! Turns raw reader records into engine-ready spectra: raw filtering,
//! binarization, per-bin filtering, and property capture.

use tracing::debug;

use crate::filter::{RawFilterChain, RawPeakFilter};
use crate::filter::HighestPeakPerBinFunction;
use crate::normalizer::{IntensityNormalizer, MzBinner, PrecursorBinner};
use crate::spectrum::{BinarySpectrum, SpectrumRecord};
use crate::storage::{PropertyStorage, StorageError};

/// The property name the record title is stored under.
pub const TITLE_PROPERTY: &str = "Title";

/// The spectrum preparation pipeline. Stateless apart from the counter of
/// spectra dropped for losing all their peaks, so it can run on a worker
/// thread feeding the engine through a bounded channel.
pub struct SpectrumPreparer {
    mz_binner: MzBinner,
    intensity_normalizer: IntensityNormalizer,
    precursor_binner: PrecursorBinner,
    loading_filter: RawFilterChain,
    per_bin_filter: HighestPeakPerBinFunction,
    empty_dropped: u64,
}

impl SpectrumPreparer {
    pub fn new(
        mz_binner: MzBinner,
        intensity_normalizer: IntensityNormalizer,
        precursor_binner: PrecursorBinner,
        loading_filter: RawFilterChain,
        per_bin_filter: HighestPeakPerBinFunction,
    ) -> Self {
        Self {
            mz_binner,
            intensity_normalizer,
            precursor_binner,
            loading_filter,
            per_bin_filter,
            empty_dropped: 0,
        }
    }

    /// How many spectra ended up with no peaks after filtering and were
    /// dropped.
    pub fn empty_dropped(&self) -> u64 {
        self.empty_dropped
    }

    pub fn mz_binner(&self) -> MzBinner {
        self.mz_binner
    }

    /// Prepare one record. Returns `None` for spectra that lose all peaks
    /// to filtering; their properties are not stored.
    pub fn prepare(
        &mut self,
        mut record: SpectrumRecord,
        properties: Option<&mut dyn PropertyStorage>,
    ) -> Result<Option<BinarySpectrum>, StorageError> {
        self.loading_filter.apply(&mut record);
        if record.peaks.is_empty() {
            self.empty_dropped += 1;
            debug!("Dropping spectrum '{}' with no surviving peaks", record.title);
            return Ok(None);
        }

        record.peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        let mz: Vec<i32> = record.peaks.iter().map(|p| self.mz_binner.bin(p.mz)).collect();
        let raw_intensities: Vec<f64> = record.peaks.iter().map(|p| p.intensity).collect();
        let intensity = self.intensity_normalizer.normalize(&raw_intensities);

        let spectrum = BinarySpectrum::new(
            self.precursor_binner.bin(record.precursor_mz),
            record.precursor_charge,
            mz,
            intensity,
        );
        let spectrum = self.per_bin_filter.apply(spectrum);

        if let Some(storage) = properties {
            if !record.title.is_empty() {
                storage.put(spectrum.uui(), TITLE_PROPERTY, &record.title)?;
            }
            for (name, value) in &record.additional {
                storage.put(spectrum.uui(), name, value)?;
            }
        }
        Ok(Some(spectrum))
    }
}

impl Default for SpectrumPreparer {
    fn default() -> Self {
        Self::new(
            MzBinner::default(),
            IntensityNormalizer::default(),
            PrecursorBinner::default(),
            crate::filter::default_loading_filter(crate::filter::raw::DEFAULT_N_HIGHEST_PEAKS),
            HighestPeakPerBinFunction::default(),
        )
    }
}
