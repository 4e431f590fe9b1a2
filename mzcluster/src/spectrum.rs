//! Integerized spectrum representations and the raw records they are built from.

/// A raw peak as read from a peak list file.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

impl Peak {
    pub fn new(mz: f64, intensity: f64) -> Self {
        Self { mz, intensity }
    }
}

/// A spectrum as delivered by a peak list reader, before any binning
/// has taken place.
///
/// The reader contract requires `peaks` to be sorted by m/z ascending and
/// `precursor_charge` to be `0` when the charge state is unknown.
#[derive(Debug, Default, Clone)]
pub struct SpectrumRecord {
    pub precursor_mz: f64,
    pub precursor_charge: i32,
    pub peaks: Vec<Peak>,
    pub title: String,
    pub additional: Vec<(String, String)>,
}

impl SpectrumRecord {
    pub fn new(precursor_mz: f64, precursor_charge: i32, peaks: Vec<Peak>) -> Self {
        Self {
            precursor_mz,
            precursor_charge,
            peaks,
            ..Default::default()
        }
    }
}

/// Create a fresh 128-bit random identifier rendered as fixed-width
/// lowercase hex, the `uui` format used for spectra and clusters alike.
pub fn random_uui() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// An integerized spectrum: parallel sorted `mz`/`intensity` bin vectors
/// plus the binned precursor coordinates. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpectrum {
    uui: String,
    precursor_mz_bin: i32,
    precursor_charge: i32,
    mz: Vec<i32>,
    intensity: Vec<i32>,
}

impl BinarySpectrum {
    /// Build a spectrum with a freshly assigned `uui`.
    pub fn new(
        precursor_mz_bin: i32,
        precursor_charge: i32,
        mz: Vec<i32>,
        intensity: Vec<i32>,
    ) -> Self {
        Self::with_uui(random_uui(), precursor_mz_bin, precursor_charge, mz, intensity)
    }

    /// Build a spectrum under a caller-controlled `uui`, used where the
    /// identifier must remain stable across rebuilds.
    pub fn with_uui(
        uui: String,
        precursor_mz_bin: i32,
        precursor_charge: i32,
        mz: Vec<i32>,
        intensity: Vec<i32>,
    ) -> Self {
        debug_assert_eq!(mz.len(), intensity.len());
        debug_assert!(mz.windows(2).all(|w| w[0] <= w[1]));
        Self {
            uui,
            precursor_mz_bin,
            precursor_charge,
            mz,
            intensity,
        }
    }

    pub fn uui(&self) -> &str {
        &self.uui
    }

    pub fn precursor_mz_bin(&self) -> i32 {
        self.precursor_mz_bin
    }

    pub fn precursor_charge(&self) -> i32 {
        self.precursor_charge
    }

    pub fn mzs(&self) -> &[i32] {
        &self.mz
    }

    pub fn intensities(&self) -> &[i32] {
        &self.intensity
    }

    pub fn peak_count(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// The m/z bins of the `k` most intense peaks, most intense first.
    /// Intensity ties resolve toward the lower m/z bin.
    pub fn highest_intensity_bins(&self, k: usize) -> Vec<i32> {
        let mut order: Vec<usize> = (0..self.mz.len()).collect();
        order.sort_unstable_by(|&a, &b| {
            self.intensity[b]
                .cmp(&self.intensity[a])
                .then(self.mz[a].cmp(&self.mz[b]))
        });
        order.iter().take(k).map(|&i| self.mz[i]).collect()
    }
}
