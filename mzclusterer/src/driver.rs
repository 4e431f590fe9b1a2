use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzcluster::cdf::MinNumberComparisonsAssessor;
use mzcluster::engine::{ClusterStream, GreedyClusteringEngine};
use mzcluster::filter::default_loading_filter;
use mzcluster::normalizer::PrecursorBinner;
use mzcluster::predicate::ClusterPredicate;
use mzcluster::prepare::SpectrumPreparer;
use mzcluster::similarity::CombinedFisherIntensityTest;
use mzcluster::spectrum::BinarySpectrum;
use mzcluster::storage::{
    hash64, ClusterStorage, DynamicClusterStorage, OnDiskPropertyStorage, PropertyStorage,
    StaticClusterStorage, StorageError,
};

use crate::args::{
    fragment_tolerance_to_bins, ppm_to_precursor_bins, ArgIntensityNormalizer, ArgMzBinner,
    ClusterStoreMode, ClusteringConfig, ResolvedParams, DEFAULT_MIN_COMPARISONS,
    DEFAULT_PRECURSOR_TOLERANCE_BINS, PREPARE_BUFFER_SIZE,
};
use crate::msp::MspWriter;
use crate::reader::open_spectrum_records;

#[derive(Debug, Error)]
pub enum MzClustererError {
    #[error("an I/O error occurred: {0}")]
    Io(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("invalid peak list input: {0}")]
    InputFormat(String),
    #[error("unsupported input file: {0}")]
    UnsupportedFormat(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cluster storage failed: {0}")]
    Storage(
        #[source]
        #[from]
        StorageError,
    ),
}

impl MzClustererError {
    /// The process exit code this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            MzClustererError::InputFormat(_) | MzClustererError::Config(_) => 2,
            MzClustererError::Io(_) | MzClustererError::Storage(_) => 3,
            MzClustererError::UnsupportedFormat(_) => 4,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RunSummary {
    spectra_read: usize,
    empty_dropped: u64,
    files_read: usize,
    files_failed: usize,
}

/// Greedy clustering of tandem mass spectrometry peak lists.
///
/// Reads one or more MGF or mzML files, groups spectra that plausibly
/// originate from the same peptide ion, and writes the resulting
/// consensus spectra as an MSP library.
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(author, version)]
pub struct MzClusterer {
    /// The peak list files to cluster (MGF or mzML, optionally gzipped)
    #[arg(required = true)]
    pub input_files: Vec<PathBuf>,

    /// The path to write the MSP library to, or '-' for STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// Where to keep the binary clustering result; a reclaimed temp file
    /// when omitted
    #[arg(long = "cls-file")]
    pub cls_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A JSON configuration file supplying any subset of the clustering
    /// parameters; explicit flags win over the file
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The precursor window half-width in precursor bins (thousandths of
    /// a Thomson)
    #[arg(short = 'p', long = "precursor-tolerance-bins")]
    pub precursor_tolerance_bins: Option<i32>,

    /// The precursor window as ppm, anchored at the 1000 Th reference
    /// mass; mutually exclusive with --precursor-tolerance-bins
    #[arg(long = "precursor-tolerance-ppm", conflicts_with = "precursor_tolerance_bins")]
    pub precursor_tolerance_ppm: Option<f64>,

    /// The fragment tolerance in Thomson, mapped onto the per-bin filter
    /// window and the scorer's bin tolerance
    #[arg(short = 'f', long = "fragment-tolerance")]
    pub fragment_tolerance: Option<f64>,

    /// The comparison-count floor for the similarity threshold lookup
    #[arg(short = 'm', long = "min-comparisons")]
    pub min_comparisons: Option<u64>,

    /// How many raw peaks to keep per spectrum while loading
    #[arg(short = 'n', long = "n-highest-peaks")]
    pub n_highest_peaks_raw: Option<usize>,

    /// The consensus noise filter window, in fragment bins
    #[arg(long = "noise-filter-increment")]
    pub noise_filter_increment: Option<i32>,

    /// How many top peaks the pre-filter predicate compares
    #[arg(short = 'k', long = "top-peak-share-k")]
    pub top_peak_share_k: Option<usize>,

    /// Which cluster store backs the run
    #[arg(long = "cluster-store-mode", value_enum)]
    pub cluster_store_mode: Option<ClusterStoreMode>,

    /// The entry count the static cluster store is pre-sized for
    #[arg(long = "expected-cluster-count")]
    pub expected_cluster_count: Option<usize>,

    /// The fragment m/z binning policy
    #[arg(long = "mz-binner", value_enum)]
    pub mz_binner: Option<ArgMzBinner>,

    /// The intensity normalization policy
    #[arg(long = "intensity-normalizer", value_enum)]
    pub intensity_normalizer: Option<ArgIntensityNormalizer>,
}

impl MzClusterer {
    fn load_config(&self) -> Result<ClusteringConfig, MzClustererError> {
        match &self.config_file {
            Some(path) => {
                let handle = fs::File::open(path)?;
                serde_json::from_reader(handle)
                    .map_err(|e| MzClustererError::Config(format!("{}: {e}", path.display())))
            }
            None => Ok(ClusteringConfig::default()),
        }
    }

    fn resolve_params(&self) -> Result<ResolvedParams, MzClustererError> {
        let config = self.load_config()?;

        let precursor_tolerance_bins = self
            .precursor_tolerance_bins
            .or(self.precursor_tolerance_ppm.map(ppm_to_precursor_bins))
            .or(config.precursor_tolerance_bins)
            .or(config.precursor_tolerance_ppm.map(ppm_to_precursor_bins))
            .unwrap_or(DEFAULT_PRECURSOR_TOLERANCE_BINS);
        if precursor_tolerance_bins <= 0 {
            return Err(MzClustererError::Config(
                "the precursor tolerance must be positive".to_string(),
            ));
        }

        let mz_binner: mzcluster::normalizer::MzBinner =
            self.mz_binner.or(config.mz_binner).unwrap_or_default().into();
        let fragment_tolerance = self.fragment_tolerance.or(config.fragment_tolerance);
        let fragment_window_bins = fragment_tolerance
            .map(|tolerance| fragment_tolerance_to_bins(tolerance, mz_binner))
            .unwrap_or(1);

        let cluster_store_mode = self
            .cluster_store_mode
            .or(config.cluster_store_mode)
            .unwrap_or_default();
        let expected_cluster_count = self
            .expected_cluster_count
            .or(config.expected_cluster_count)
            .unwrap_or(0);
        if cluster_store_mode == ClusterStoreMode::Static && expected_cluster_count == 0 {
            return Err(MzClustererError::Config(
                "the static cluster store requires --expected-cluster-count".to_string(),
            ));
        }

        Ok(ResolvedParams {
            precursor_tolerance_bins,
            fragment_window_bins,
            scorer_tolerance_bins: fragment_window_bins / 2,
            min_comparisons: self
                .min_comparisons
                .or(config.min_comparisons)
                .unwrap_or(DEFAULT_MIN_COMPARISONS),
            n_highest_peaks_raw: self
                .n_highest_peaks_raw
                .or(config.n_highest_peaks_raw)
                .unwrap_or(mzcluster::filter::raw::DEFAULT_N_HIGHEST_PEAKS),
            noise_filter_increment: self
                .noise_filter_increment
                .or(config.noise_filter_increment)
                .unwrap_or(mzcluster::consensus::NOISE_FILTER_INCREMENT),
            top_peak_share_k: self
                .top_peak_share_k
                .or(config.top_peak_share_k)
                .unwrap_or(mzcluster::predicate::DEFAULT_SHARED_PEAK_COUNT),
            cluster_store_mode,
            expected_cluster_count,
            mz_binner,
            intensity_normalizer: self
                .intensity_normalizer
                .or(config.intensity_normalizer)
                .unwrap_or_default()
                .into(),
        })
    }

    fn open_cluster_store(
        &self,
        params: &ResolvedParams,
    ) -> Result<Box<dyn ClusterStorage>, MzClustererError> {
        let store: Box<dyn ClusterStorage> = match (params.cluster_store_mode, &self.cls_file) {
            (ClusterStoreMode::Dynamic, Some(path)) => {
                Box::new(DynamicClusterStorage::create_at(path)?)
            }
            (ClusterStoreMode::Dynamic, None) => Box::new(DynamicClusterStorage::create()?),
            (ClusterStoreMode::Static, Some(path)) => Box::new(StaticClusterStorage::create_at(
                path,
                params.expected_cluster_count,
            )?),
            (ClusterStoreMode::Static, None) => {
                Box::new(StaticClusterStorage::create(params.expected_cluster_count)?)
            }
        };
        Ok(store)
    }

    pub fn main(&self) -> Result<(), MzClustererError> {
        info!(
            "mzclusterer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        let params = self.resolve_params()?;
        debug!("Resolved parameters: {params:?}");

        let started = Instant::now();
        let (spectra, properties, summary) = self.read_and_prepare(&params)?;
        info!(
            "Read {} spectra from {} file(s), prepared {} ({} empty dropped, {} file(s) failed)",
            summary.spectra_read,
            summary.files_read,
            spectra.len(),
            summary.empty_dropped,
            summary.files_failed,
        );

        let clusters = self.cluster(&params, spectra, properties)?;
        info!(
            "Wrote {clusters} clusters in {:0.3?}",
            Instant::now() - started
        );
        Ok(())
    }

    /// Stream every input file through the preparation pipeline on a
    /// worker thread, collecting the engine-ready spectra sorted by
    /// precursor bin. File order is not trusted.
    fn read_and_prepare(
        &self,
        params: &ResolvedParams,
    ) -> Result<(Vec<BinarySpectrum>, OnDiskPropertyStorage, RunSummary), MzClustererError> {
        let (sender, receiver) = sync_channel::<BinarySpectrum>(PREPARE_BUFFER_SIZE);

        let mut preparer = SpectrumPreparer::new(
            params.mz_binner,
            params.intensity_normalizer,
            PrecursorBinner::default(),
            default_loading_filter(params.n_highest_peaks_raw),
            params.per_bin_filter(),
        );
        let mut properties = OnDiskPropertyStorage::create()?;
        let input_files = self.input_files.clone();

        type ReaderOutcome =
            Result<(OnDiskPropertyStorage, RunSummary, Vec<MzClustererError>), MzClustererError>;
        let reader_task = thread::spawn(move || -> ReaderOutcome {
            let mut summary = RunSummary::default();
            let mut failures = Vec::new();
            'files: for path in &input_files {
                let records = match open_spectrum_records(path) {
                    Ok(records) => records,
                    Err(error) => {
                        // a bad file is fatal for that file only
                        warn!("Skipping {}: {error}", path.display());
                        summary.files_failed += 1;
                        failures.push(error);
                        continue;
                    }
                };
                summary.files_read += 1;
                for record in records {
                    summary.spectra_read += 1;
                    if let Some(spectrum) = preparer.prepare(record, Some(&mut properties))? {
                        if sender.send(spectrum).is_err() {
                            debug!("Engine side hung up, stopping the reader");
                            break 'files;
                        }
                    }
                }
            }
            summary.empty_dropped = preparer.empty_dropped();
            Ok((properties, summary, failures))
        });

        let mut spectra: Vec<BinarySpectrum> = receiver.iter().collect();
        spectra.sort_by_key(|s| s.precursor_mz_bin());

        let (properties, summary, mut failures) = match reader_task.join() {
            Ok(outcome) => outcome?,
            Err(panic) => {
                return Err(MzClustererError::Io(io::Error::other(format!(
                    "the reader thread panicked: {panic:?}"
                ))))
            }
        };
        if summary.files_read == 0 {
            return Err(failures.pop().unwrap_or_else(|| {
                MzClustererError::InputFormat("no input file could be read".to_string())
            }));
        }
        Ok((spectra, properties, summary))
    }

    /// Run the engine over the prepared spectra, persist every emitted
    /// cluster, and write the MSP library.
    fn cluster(
        &self,
        params: &ResolvedParams,
        spectra: Vec<BinarySpectrum>,
        mut properties: OnDiskPropertyStorage,
    ) -> Result<usize, MzClustererError> {
        let assessor = MinNumberComparisonsAssessor::new(params.min_comparisons);
        let scorer = CombinedFisherIntensityTest::with_tolerance(params.scorer_tolerance_bins);
        let engine = GreedyClusteringEngine::with_scorer(
            params.precursor_tolerance_bins,
            scorer,
            assessor,
            ClusterPredicate::share_highest_peaks(params.top_peak_share_k),
            params.noise_filter_increment,
        );

        let mut store = self.open_cluster_store(params)?;
        let mut keys: Vec<u64> = Vec::new();
        for cluster in ClusterStream::new(engine, spectra.into_iter()) {
            let key = hash64(cluster.id());
            store.put(key, &cluster)?;
            keys.push(key);
        }

        let writer = MspWriter::new(params.mz_binner, PrecursorBinner::default());
        if self.output_file == PathBuf::from("-") {
            let stdout = io::stdout();
            let mut handle = io::BufWriter::new(stdout.lock());
            writer.write_result(&mut handle, &keys, store.as_mut(), &mut properties)?;
            handle.flush()?;
        } else {
            let mut handle = io::BufWriter::new(fs::File::create(&self.output_file)?);
            writer.write_result(&mut handle, &keys, store.as_mut(), &mut properties)?;
            handle.flush()?;
        }

        store.close()?;
        properties.close()?;
        Ok(keys.len())
    }
}
