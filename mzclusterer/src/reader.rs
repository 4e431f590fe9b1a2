//! Adapters from `mzdata` peak list readers to the plain
//! [`SpectrumRecord`] stream the clustering core consumes.

use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use mzdata::io::{
    infer_format,
    mgf::MGFReaderType,
    mzml::MzMLReaderType,
    MassSpectrometryFormat, RestartableGzDecoder, StreamingSpectrumIterator,
};
use mzdata::mzpeaks::{CentroidPeak, DeconvolutedPeak};
use mzdata::prelude::*;
use mzdata::spectrum::MultiLayerSpectrum;
use regex::Regex;
use tracing::{debug, warn};

use mzcluster::spectrum::{Peak, SpectrumRecord};

use crate::driver::MzClustererError;

pub(crate) type SpectrumType = MultiLayerSpectrum<CentroidPeak, DeconvolutedPeak>;

/// Peak list extensions that are recognized but not readable here.
const RECOGNIZED_UNSUPPORTED: [&str; 5] = ["ms2", "apl", "pkl", "dta", "mzxml"];

/// How many leading lines the XML pre-check inspects. A declaration
/// sitting beyond them makes the file look invalid; this mirrors the
/// long-standing reader behavior and is kept deliberately.
const XML_PEEK_LINES: usize = 10;

/// Open a peak list file as a stream of reader records. Spectra without a
/// selected precursor (e.g. MS1 scans in mzML) are skipped.
pub fn open_spectrum_records(
    path: &Path,
) -> Result<Box<dyn Iterator<Item = SpectrumRecord> + Send>, MzClustererError> {
    let (format, compressed) = infer_format(path)?;
    debug!(
        "Detected {format:?} for {} (compressed? {compressed})",
        path.display()
    );
    match format {
        MassSpectrometryFormat::MGF => {
            if compressed {
                let handle =
                    RestartableGzDecoder::new(io::BufReader::new(fs::File::open(path)?));
                let reader = StreamingSpectrumIterator::new(MGFReaderType::new(handle));
                Ok(Box::new(reader.filter_map(convert_spectrum)))
            } else {
                let reader = MGFReaderType::open_path(path)?;
                Ok(Box::new(reader.filter_map(convert_spectrum)))
            }
        }
        MassSpectrometryFormat::MzML => {
            if compressed {
                let handle =
                    RestartableGzDecoder::new(io::BufReader::new(fs::File::open(path)?));
                let reader = StreamingSpectrumIterator::new(MzMLReaderType::new(handle));
                Ok(Box::new(reader.filter_map(convert_spectrum)))
            } else {
                if !is_valid_mzml(path) {
                    return Err(MzClustererError::InputFormat(format!(
                        "{} does not look like an mzML document within its first {XML_PEEK_LINES} lines",
                        path.display()
                    )));
                }
                let reader = MzMLReaderType::open_path(path)?;
                Ok(Box::new(reader.filter_map(convert_spectrum)))
            }
        }
        other => {
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if RECOGNIZED_UNSUPPORTED.contains(&extension.as_str()) {
                Err(MzClustererError::UnsupportedFormat(format!(
                    "{} ({extension} files are not supported)",
                    path.display()
                )))
            } else {
                Err(MzClustererError::UnsupportedFormat(format!(
                    "{} (detected {other:?})",
                    path.display()
                )))
            }
        }
    }
}

fn convert_spectrum(spectrum: SpectrumType) -> Option<SpectrumRecord> {
    let (precursor_mz, precursor_charge) = match spectrum.precursor() {
        Some(precursor) => {
            let ion = precursor.ion();
            (ion.mz, ion.charge.unwrap_or(0))
        }
        None => return None,
    };
    let peaks = match peaks_of(&spectrum) {
        Some(peaks) => peaks,
        None => {
            warn!("Spectrum {} carries no peak data, skipping", spectrum.id());
            return None;
        }
    };
    let mut record = SpectrumRecord::new(precursor_mz, precursor_charge, peaks);
    record.title = spectrum.id().to_string();
    record.additional = mzdata::params::ParamDescribed::params(&spectrum)
        .iter()
        .map(|p| (p.name.clone(), p.value.to_string()))
        .collect();
    Some(record)
}

fn peaks_of(spectrum: &SpectrumType) -> Option<Vec<Peak>> {
    if let Some(peaks) = spectrum.peaks.as_ref() {
        return Some(
            peaks
                .iter()
                .map(|p| Peak::new(p.mz(), p.intensity() as f64))
                .collect(),
        );
    }
    if let Some(arrays) = spectrum.arrays.as_ref() {
        let mzs = arrays.mzs().ok()?;
        let intensities = arrays.intensities().ok()?;
        return Some(
            mzs.iter()
                .zip(intensities.iter())
                .map(|(&mz, &intensity)| Peak::new(mz, intensity as f64))
                .collect(),
        );
    }
    None
}

fn is_valid_mzml(path: &Path) -> bool {
    let pattern = Regex::new(r"<(mzML|indexedmzML)[\s>]").expect("static pattern compiles");
    check_xml_valid_file(path, &pattern)
}

/// Check that one of the first [`XML_PEEK_LINES`] lines matches the
/// expected document pattern.
fn check_xml_valid_file(path: &Path, pattern: &Regex) -> bool {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let content: String = io::BufReader::new(file)
        .lines()
        .take(XML_PEEK_LINES)
        .map_while(Result::ok)
        .collect::<Vec<_>>()
        .join("\n");
    pattern.is_match(&content)
}
