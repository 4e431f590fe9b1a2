//! The greedy, precursor-m/z-windowed clustering engine.
//!
//! The engine holds a sequence of active clusters ordered by precursor
//! bin. Each incoming spectrum first evicts every cluster that has fallen
//! out of the precursor window, then is scored against the surviving
//! candidates and either joins the best-scoring one or seeds a new
//! cluster. Input must arrive in non-decreasing precursor-bin order for
//! the emission-order guarantee to hold; the reader glue sorts before
//! feeding the engine because file order is not trusted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::cdf::MinNumberComparisonsAssessor;
use crate::cluster::GreedySpectralCluster;
use crate::consensus::NOISE_FILTER_INCREMENT;
use crate::predicate::ClusterPredicate;
use crate::similarity::{CombinedFisherIntensityTest, SimilarityScorer};
use crate::spectrum::BinarySpectrum;

/// A cooperative cancellation token polled between spectra.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct GreedyClusteringEngine<S: SimilarityScorer = CombinedFisherIntensityTest> {
    precursor_tolerance: i32,
    scorer: S,
    assessor: MinNumberComparisonsAssessor,
    cluster_predicate: ClusterPredicate,
    comparison_filter: Option<ClusterPredicate>,
    noise_filter_increment: i32,
    /// Active clusters, sorted by precursor bin ascending.
    active: Vec<GreedySpectralCluster>,
}

impl GreedyClusteringEngine<CombinedFisherIntensityTest> {
    /// An engine with the default scorer and shared-peak pre-filter.
    pub fn new(precursor_tolerance: i32, assessor: MinNumberComparisonsAssessor) -> Self {
        Self::with_scorer(
            precursor_tolerance,
            CombinedFisherIntensityTest::new(),
            assessor,
            ClusterPredicate::default(),
            NOISE_FILTER_INCREMENT,
        )
    }
}

impl<S: SimilarityScorer> GreedyClusteringEngine<S> {
    pub fn with_scorer(
        precursor_tolerance: i32,
        scorer: S,
        assessor: MinNumberComparisonsAssessor,
        cluster_predicate: ClusterPredicate,
        noise_filter_increment: i32,
    ) -> Self {
        Self {
            precursor_tolerance,
            scorer,
            assessor,
            cluster_predicate,
            comparison_filter: None,
            noise_filter_increment,
            active: Vec::new(),
        }
    }

    /// Install a predicate that short-circuits scoring for pairs it
    /// accepts, typically [`ClusterPredicate::ClusterIsKnownComparison`]
    /// in multi-pass runs.
    pub fn with_comparison_filter(mut self, filter: ClusterPredicate) -> Self {
        self.comparison_filter = Some(filter);
        self
    }

    pub fn precursor_tolerance(&self) -> i32 {
        self.precursor_tolerance
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Consume one spectrum, returning every cluster that fell out of the
    /// precursor window and will never change again.
    pub fn process_spectrum(&mut self, spectrum: BinarySpectrum) -> Vec<GreedySpectralCluster> {
        let bin = spectrum.precursor_mz_bin();
        let evicted = self.evict_below(bin - self.precursor_tolerance);

        match self.best_candidate_for_spectrum(&spectrum) {
            Some(idx) => {
                let old_bin = self.active[idx].precursor_mz_bin();
                self.active[idx].add_spectra(std::slice::from_ref(&spectrum));
                self.reposition(idx, old_bin);
            }
            None => {
                let cluster =
                    GreedySpectralCluster::from_spectrum(&spectrum, self.noise_filter_increment);
                self.insert_sorted(cluster);
            }
        }
        evicted
    }

    /// Consume one cluster (merge mode), with the same windowing protocol
    /// as [`Self::process_spectrum`]. Self-comparison is excluded.
    pub fn process_cluster(
        &mut self,
        mut cluster: GreedySpectralCluster,
    ) -> Vec<GreedySpectralCluster> {
        let bin = cluster.precursor_mz_bin();
        let evicted = self.evict_below(bin - self.precursor_tolerance);

        match self.best_candidate_for_cluster(&mut cluster) {
            Some(idx) => {
                let old_bin = self.active[idx].precursor_mz_bin();
                self.active[idx].merge_cluster(&cluster);
                self.reposition(idx, old_bin);
            }
            None => self.insert_sorted(cluster),
        }
        evicted
    }

    /// Flush the remaining active clusters in ascending precursor order.
    pub fn finish(&mut self) -> Vec<GreedySpectralCluster> {
        debug!("Flushing {} active clusters", self.active.len());
        std::mem::take(&mut self.active)
    }

    fn evict_below(&mut self, bin_floor: i32) -> Vec<GreedySpectralCluster> {
        let count = self
            .active
            .partition_point(|c| c.precursor_mz_bin() < bin_floor);
        self.active.drain(..count).collect()
    }

    fn candidate_range(&self, bin: i32) -> (usize, usize) {
        let low = self
            .active
            .partition_point(|c| c.precursor_mz_bin() < bin - self.precursor_tolerance);
        let high = self
            .active
            .partition_point(|c| c.precursor_mz_bin() <= bin + self.precursor_tolerance);
        (low, high)
    }

    fn best_candidate_for_spectrum(&mut self, spectrum: &BinarySpectrum) -> Option<usize> {
        let (low, high) = self.candidate_range(spectrum.precursor_mz_bin());
        let mut best: Option<(usize, f64)> = None;
        for idx in low..high {
            if !charges_compatible(
                self.active[idx].precursor_charge(),
                spectrum.precursor_charge(),
            ) {
                continue;
            }
            if let Some(filter) = &self.comparison_filter {
                if filter.test_spectrum(&mut self.active[idx], spectrum) {
                    continue;
                }
            }
            if !self
                .cluster_predicate
                .test_spectrum(&mut self.active[idx], spectrum)
            {
                continue;
            }
            let similarity = self
                .scorer
                .similarity(self.active[idx].consensus_spectrum(), spectrum);
            self.active[idx].register_comparison();
            self.active[idx].save_comparison_result(spectrum.uui(), similarity as f32);
            let threshold = self.assessor.threshold(self.active[idx].comparison_count());
            if similarity >= threshold {
                best = self.prefer(idx, similarity, best);
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn best_candidate_for_cluster(&mut self, incoming: &mut GreedySpectralCluster) -> Option<usize> {
        let (low, high) = self.candidate_range(incoming.precursor_mz_bin());
        let mut best: Option<(usize, f64)> = None;
        for idx in low..high {
            if self.active[idx].id() == incoming.id() {
                continue;
            }
            if !charges_compatible(
                self.active[idx].precursor_charge(),
                incoming.precursor_charge(),
            ) {
                continue;
            }
            if let Some(filter) = &self.comparison_filter {
                if filter.test_clusters(&mut self.active[idx], incoming) {
                    continue;
                }
            }
            if !self
                .cluster_predicate
                .test_clusters(&mut self.active[idx], incoming)
            {
                continue;
            }
            let similarity = self.scorer.similarity(
                self.active[idx].consensus_spectrum(),
                incoming.consensus_spectrum(),
            );
            self.active[idx].register_comparison();
            self.active[idx].save_comparison_result(incoming.id(), similarity as f32);
            let threshold = self.assessor.threshold(self.active[idx].comparison_count());
            if similarity >= threshold {
                best = self.prefer(idx, similarity, best);
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Keep whichever of `idx` and the current best has the higher score,
    /// applying the tie-break when the scores are exactly equal.
    fn prefer(
        &self,
        idx: usize,
        similarity: f64,
        best: Option<(usize, f64)>,
    ) -> Option<(usize, f64)> {
        match best {
            None => Some((idx, similarity)),
            Some((best_idx, best_similarity)) => {
                if similarity > best_similarity {
                    Some((idx, similarity))
                } else if similarity == best_similarity {
                    Some((self.break_tie(idx, best_idx), best_similarity))
                } else {
                    Some((best_idx, best_similarity))
                }
            }
        }
    }

    /// Resolve an exact similarity tie: the larger cluster wins, then the
    /// lower precursor bin, then the lexicographically smaller id.
    fn break_tie(&self, a: usize, b: usize) -> usize {
        let (ca, cb) = (&self.active[a], &self.active[b]);
        if ca.member_count() != cb.member_count() {
            return if ca.member_count() > cb.member_count() { a } else { b };
        }
        if ca.precursor_mz_bin() != cb.precursor_mz_bin() {
            return if ca.precursor_mz_bin() < cb.precursor_mz_bin() { a } else { b };
        }
        if ca.id() < cb.id() {
            a
        } else {
            b
        }
    }

    fn insert_sorted(&mut self, cluster: GreedySpectralCluster) {
        let bin = cluster.precursor_mz_bin();
        let position = self.active.partition_point(|c| c.precursor_mz_bin() <= bin);
        self.active.insert(position, cluster);
    }

    /// Restore sorted order after a cluster's averaged precursor moved.
    fn reposition(&mut self, idx: usize, old_bin: i32) {
        if self.active[idx].precursor_mz_bin() == old_bin {
            return;
        }
        let cluster = self.active.remove(idx);
        self.insert_sorted(cluster);
    }
}

fn charges_compatible(a: i32, b: i32) -> bool {
    a == 0 || b == 0 || a == b
}

/// Streams spectra through an engine, yielding finished clusters as they
/// are evicted and flushing the remainder when the input is exhausted or
/// the cancel token fires.
pub struct ClusterStream<I, S = CombinedFisherIntensityTest>
where
    I: Iterator<Item = BinarySpectrum>,
    S: SimilarityScorer,
{
    engine: GreedyClusteringEngine<S>,
    input: I,
    pending: VecDeque<GreedySpectralCluster>,
    cancel: CancelToken,
    done: bool,
}

impl<I, S> ClusterStream<I, S>
where
    I: Iterator<Item = BinarySpectrum>,
    S: SimilarityScorer,
{
    pub fn new(engine: GreedyClusteringEngine<S>, input: I) -> Self {
        Self::with_cancel_token(engine, input, CancelToken::new())
    }

    pub fn with_cancel_token(
        engine: GreedyClusteringEngine<S>,
        input: I,
        cancel: CancelToken,
    ) -> Self {
        Self {
            engine,
            input,
            pending: VecDeque::new(),
            cancel,
            done: false,
        }
    }
}

impl<I, S> Iterator for ClusterStream<I, S>
where
    I: Iterator<Item = BinarySpectrum>,
    S: SimilarityScorer,
{
    type Item = GreedySpectralCluster;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cluster) = self.pending.pop_front() {
                return Some(cluster);
            }
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                debug!("Cancellation requested, flushing active clusters");
                self.pending.extend(self.engine.finish());
                self.done = true;
                continue;
            }
            match self.input.next() {
                Some(spectrum) => self
                    .pending
                    .extend(self.engine.process_spectrum(spectrum)),
                None => {
                    self.pending.extend(self.engine.finish());
                    self.done = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cdf::{MinNumberComparisonsAssessor, ThresholdTable};
    use std::collections::HashSet;

    fn assessor() -> MinNumberComparisonsAssessor {
        MinNumberComparisonsAssessor::new(10_000)
    }

    fn spectrum(precursor_bin: i32, charge: i32, peaks: &[(i32, i32)]) -> BinarySpectrum {
        BinarySpectrum::new(
            precursor_bin,
            charge,
            peaks.iter().map(|p| p.0).collect(),
            peaks.iter().map(|p| p.1).collect(),
        )
    }

    fn rich_peaks(seed: i32) -> Vec<(i32, i32)> {
        (0..40).map(|i| (100 + i * 37 + seed, 500 + i * 13)).collect()
    }

    #[test]
    fn test_single_spectrum_single_cluster() {
        let mut engine = GreedyClusteringEngine::new(10, assessor());
        let s = spectrum(500_250, 2, &rich_peaks(0));
        let uui = s.uui().to_string();
        let mzs: Vec<i32> = s.mzs().to_vec();

        assert!(engine.process_spectrum(s).is_empty());
        let mut clusters = engine.finish();
        assert_eq!(clusters.len(), 1);
        let cluster = &mut clusters[0];
        assert_eq!(cluster.member_count(), 1);
        assert!(cluster.member_ids().contains(&uui));
        // a singleton's representative is the filtered input spectrum
        assert_eq!(cluster.consensus_spectrum().mzs(), mzs.as_slice());
    }

    #[test]
    fn test_identical_spectra_cluster_together() {
        let mut engine = GreedyClusteringEngine::new(10, assessor());
        let peaks = rich_peaks(0);
        engine.process_spectrum(spectrum(500_250, 2, &peaks));
        engine.process_spectrum(spectrum(500_250, 2, &peaks));

        let clusters = engine.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count(), 2);
        assert_eq!(clusters[0].precursor_mz_bin(), 500_250);
        assert_eq!(
            clusters[0].member_count() as i64,
            clusters[0].consensus().spectrum_count()
        );
    }

    #[test]
    fn test_distant_precursors_never_compared() {
        let mut engine = GreedyClusteringEngine::new(10, assessor());
        let peaks = rich_peaks(0);
        engine.process_spectrum(spectrum(500_250, 2, &peaks));
        let evicted = engine.process_spectrum(spectrum(900_100, 2, &peaks));

        // the first cluster left the window untouched
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].comparison_count(), 0);
        assert!(evicted[0].comparison_matches().is_empty());

        let clusters = engine.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].comparison_count(), 0);
    }

    #[test]
    fn test_charge_mismatch_blocks_join() {
        let mut engine = GreedyClusteringEngine::new(10, assessor());
        let peaks = rich_peaks(0);
        engine.process_spectrum(spectrum(500_250, 2, &peaks));
        engine.process_spectrum(spectrum(500_250, 3, &peaks));
        assert_eq!(engine.finish().len(), 2);
    }

    #[test]
    fn test_unknown_charge_is_wildcard() {
        let mut engine = GreedyClusteringEngine::new(10, assessor());
        let peaks = rich_peaks(0);
        engine.process_spectrum(spectrum(500_250, 2, &peaks));
        engine.process_spectrum(spectrum(500_250, 0, &peaks));
        assert_eq!(engine.finish().len(), 1);
    }

    #[test]
    fn test_emission_order_and_membership_partition() {
        let mut engine = GreedyClusteringEngine::new(10, assessor());
        let mut spectra = Vec::new();
        for (i, bin) in [400_000, 400_004, 450_000, 450_001, 500_250, 600_000]
            .iter()
            .enumerate()
        {
            spectra.push(spectrum(*bin, 2, &rich_peaks(i as i32 * 991)));
        }
        spectra.sort_by_key(|s| s.precursor_mz_bin());
        let all_uuis: HashSet<String> = spectra.iter().map(|s| s.uui().to_string()).collect();

        let mut clusters: Vec<GreedySpectralCluster> = Vec::new();
        for s in spectra {
            clusters.extend(engine.process_spectrum(s));
        }
        clusters.extend(engine.finish());

        // non-decreasing precursor bins
        assert!(clusters
            .windows(2)
            .all(|w| w[0].precursor_mz_bin() <= w[1].precursor_mz_bin()));

        // each input uui appears in exactly one cluster
        let mut seen: HashSet<String> = HashSet::new();
        for cluster in &clusters {
            assert_eq!(
                cluster.member_count() as i64,
                cluster.consensus().spectrum_count()
            );
            for id in cluster.member_ids() {
                assert!(seen.insert(id.clone()), "uui {id} in two clusters");
            }
        }
        assert_eq!(seen, all_uuis);
    }

    #[test]
    fn test_merge_mode_excludes_self_and_merges_identical() {
        let table = ThresholdTable::from_tsv("1\t0.9\n").unwrap();
        let mut engine = GreedyClusteringEngine::new(
            10,
            MinNumberComparisonsAssessor::with_table(1, table),
        );
        let peaks = rich_peaks(0);
        let c1 = GreedySpectralCluster::from_spectrum(
            &spectrum(500_250, 2, &peaks),
            NOISE_FILTER_INCREMENT,
        );
        let c2 = GreedySpectralCluster::from_spectrum(
            &spectrum(500_251, 2, &peaks),
            NOISE_FILTER_INCREMENT,
        );

        engine.process_cluster(c1);
        engine.process_cluster(c2);
        let clusters = engine.finish();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count(), 2);
    }

    #[test]
    fn test_known_pairs_are_not_rescored() {
        let table = ThresholdTable::from_tsv("1\t0.9\n").unwrap();
        let mut engine = GreedyClusteringEngine::new(
            10,
            MinNumberComparisonsAssessor::with_table(1, table),
        )
        .with_comparison_filter(ClusterPredicate::cluster_is_known_comparison());

        let peaks = rich_peaks(0);
        let c1 = GreedySpectralCluster::from_spectrum(
            &spectrum(500_250, 2, &peaks),
            NOISE_FILTER_INCREMENT,
        );
        let mut c2 = GreedySpectralCluster::from_spectrum(
            &spectrum(500_251, 2, &peaks),
            NOISE_FILTER_INCREMENT,
        );
        // the pair was already evaluated in an earlier pass
        c2.save_comparison_result(c1.id(), 0.2);

        engine.process_cluster(c1);
        engine.process_cluster(c2);
        let clusters = engine.finish();
        // the known pair is skipped, so the clusters never merge
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].comparison_count(), 0);
    }

    #[test]
    fn test_cluster_stream_flushes_on_cancel() {
        let engine = GreedyClusteringEngine::new(10, assessor());
        let cancel = CancelToken::new();
        cancel.cancel();
        let spectra = vec![
            spectrum(400_000, 2, &rich_peaks(0)),
            spectrum(500_000, 2, &rich_peaks(7)),
        ];
        let stream = ClusterStream::with_cancel_token(engine, spectra.into_iter(), cancel);
        // cancelled before the first spectrum: nothing was consumed
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn test_cluster_stream_yields_all_clusters() {
        let engine = GreedyClusteringEngine::new(10, assessor());
        let spectra = vec![
            spectrum(400_000, 2, &rich_peaks(0)),
            spectrum(500_000, 2, &rich_peaks(7)),
            spectrum(600_000, 2, &rich_peaks(13)),
        ];
        let stream = ClusterStream::new(engine, spectra.into_iter());
        let clusters: Vec<_> = stream.collect();
        assert_eq!(clusters.len(), 3);
        assert!(clusters
            .windows(2)
            .all(|w| w[0].precursor_mz_bin() <= w[1].precursor_mz_bin()));
    }
}
