//! The greedy cluster model: member ids, a consensus spectrum, and a
//! bounded record of the best comparisons seen so far. Member peak lists
//! are never stored.

use std::collections::{BTreeSet, HashSet};

use tracing::warn;

use crate::consensus::GreedyConsensusSpectrum;
use crate::spectrum::BinarySpectrum;

/// How many of the highest-scoring comparison matches a cluster remembers.
pub const SAVED_COMPARISON_MATCHES: usize = 30;

/// One remembered comparison, ordered by similarity ascending with a
/// stable tie-break on insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonMatch {
    pub other_id: String,
    pub similarity: f32,
}

impl ComparisonMatch {
    pub fn new(other_id: String, similarity: f32) -> Self {
        Self {
            other_id,
            similarity,
        }
    }
}

/// A cluster of spectra built by greedy assignment.
#[derive(Debug, Clone)]
pub struct GreedySpectralCluster {
    id: String,
    member_ids: BTreeSet<String>,
    consensus: GreedyConsensusSpectrum,
    best_matches: Vec<ComparisonMatch>,
    min_best_similarity: f32,
    /// Lazily rebuilt view of the ids in `best_matches`.
    best_match_id_index: Option<HashSet<String>>,
    comparison_count: u64,
}

impl GreedySpectralCluster {
    /// Wrap a consensus builder into an empty cluster. The cluster id is
    /// the consensus spectrum's stable `uui`.
    pub fn new(consensus: GreedyConsensusSpectrum) -> Self {
        Self {
            id: consensus.uui().to_string(),
            member_ids: BTreeSet::new(),
            consensus,
            best_matches: Vec::with_capacity(SAVED_COMPARISON_MATCHES),
            min_best_similarity: 0.0,
            best_match_id_index: None,
            comparison_count: 0,
        }
    }

    /// Seed a fresh single-member cluster from one spectrum.
    pub fn from_spectrum(spectrum: &BinarySpectrum, noise_filter_increment: i32) -> Self {
        let mut cluster = Self::new(GreedyConsensusSpectrum::with_increment(
            noise_filter_increment,
        ));
        cluster.add_spectra(std::slice::from_ref(spectrum));
        cluster
    }

    pub(crate) fn from_parts(
        id: String,
        member_ids: BTreeSet<String>,
        consensus: GreedyConsensusSpectrum,
        best_matches: Vec<ComparisonMatch>,
        comparison_count: u64,
    ) -> Self {
        let min_best_similarity = best_matches.first().map(|m| m.similarity).unwrap_or(0.0);
        Self {
            id,
            member_ids,
            consensus,
            best_matches,
            min_best_similarity,
            best_match_id_index: None,
            comparison_count,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn member_ids(&self) -> &BTreeSet<String> {
        &self.member_ids
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn consensus(&self) -> &GreedyConsensusSpectrum {
        &self.consensus
    }

    pub fn precursor_mz_bin(&self) -> i32 {
        self.consensus.average_precursor_mz_bin()
    }

    pub fn precursor_charge(&self) -> i32 {
        self.consensus.average_precursor_charge()
    }

    /// The cluster's current representative spectrum, rebuilt lazily.
    pub fn consensus_spectrum(&mut self) -> &BinarySpectrum {
        self.consensus.consensus_spectrum()
    }

    /// How often this cluster has been scored against another spectrum or
    /// cluster.
    pub fn comparison_count(&self) -> u64 {
        self.comparison_count
    }

    pub fn register_comparison(&mut self) {
        self.comparison_count += 1;
    }

    /// Add spectra to the cluster, silently skipping ids that are already
    /// members.
    pub fn add_spectra(&mut self, spectra: &[BinarySpectrum]) {
        for spectrum in spectra {
            if self.member_ids.contains(spectrum.uui()) {
                warn!(
                    "Skipping duplicate spectrum {} already in cluster {}",
                    spectrum.uui(),
                    self.id
                );
                continue;
            }
            self.consensus.add(spectrum);
            self.member_ids.insert(spectrum.uui().to_string());
        }
    }

    /// Fold another cluster into this one. The id of the larger side
    /// survives so the consensus identifier stays meaningful.
    pub fn merge_cluster(&mut self, other: &GreedySpectralCluster) {
        if other.member_ids.iter().any(|id| self.member_ids.contains(id)) {
            warn!(
                "Merging cluster {} into {} with overlapping members",
                other.id, self.id
            );
        }

        self.consensus.merge(&other.consensus);

        if other.member_count() > self.member_ids.len() {
            self.id = other.id.clone();
        }

        self.member_ids
            .extend(other.member_ids.iter().cloned());

        self.best_matches.extend(other.best_matches.iter().cloned());
        self.comparison_count += other.comparison_count;
        self.resort_matches();
    }

    /// Remember a comparison result if it ranks among the best seen.
    pub fn save_comparison_result(&mut self, other_id: &str, similarity: f32) {
        if self.best_matches.len() >= SAVED_COMPARISON_MATCHES
            && similarity <= self.min_best_similarity
        {
            return;
        }
        self.best_matches
            .push(ComparisonMatch::new(other_id.to_string(), similarity));
        self.resort_matches();
    }

    fn resort_matches(&mut self) {
        self.best_matches
            .sort_by(|a, b| a.similarity.total_cmp(&b.similarity));
        if self.best_matches.len() > SAVED_COMPARISON_MATCHES {
            let excess = self.best_matches.len() - SAVED_COMPARISON_MATCHES;
            self.best_matches.drain(..excess);
        }
        self.min_best_similarity = self
            .best_matches
            .first()
            .map(|m| m.similarity)
            .unwrap_or(0.0);
        self.best_match_id_index = None;
    }

    /// Whether `id` ranks among the best comparison results; O(1) after
    /// the lazy index is rebuilt.
    pub fn is_in_best_comparison_results(&mut self, id: &str) -> bool {
        if self.best_match_id_index.is_none() {
            self.best_match_id_index = Some(
                self.best_matches
                    .iter()
                    .map(|m| m.other_id.clone())
                    .collect(),
            );
        }
        self.best_match_id_index
            .as_ref()
            .map(|index| index.contains(id))
            .unwrap_or(false)
    }

    pub fn comparison_matches(&self) -> &[ComparisonMatch] {
        &self.best_matches
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consensus::NOISE_FILTER_INCREMENT;
    use crate::spectrum::BinarySpectrum;

    fn spectrum(precursor_bin: i32, peaks: &[(i32, i32)]) -> BinarySpectrum {
        BinarySpectrum::new(
            precursor_bin,
            2,
            peaks.iter().map(|p| p.0).collect(),
            peaks.iter().map(|p| p.1).collect(),
        )
    }

    #[test]
    fn test_id_is_consensus_uui() {
        let consensus = GreedyConsensusSpectrum::new();
        let uui = consensus.uui().to_string();
        let cluster = GreedySpectralCluster::new(consensus);
        assert_eq!(cluster.id(), uui);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let s = spectrum(500_250, &[(100, 1), (200, 2)]);
        let mut cluster = GreedySpectralCluster::from_spectrum(&s, NOISE_FILTER_INCREMENT);
        cluster.add_spectra(std::slice::from_ref(&s));
        assert_eq!(cluster.member_count(), 1);
        assert_eq!(cluster.consensus().spectrum_count(), 1);
    }

    #[test]
    fn test_member_count_tracks_consensus() {
        let mut cluster = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        cluster.add_spectra(&[
            spectrum(500_250, &[(100, 1)]),
            spectrum(500_252, &[(100, 2)]),
        ]);
        assert_eq!(
            cluster.member_count() as i64,
            cluster.consensus().spectrum_count()
        );
    }

    #[test]
    fn test_save_comparison_result_bounded_and_sorted() {
        let mut cluster = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        for i in 0..40 {
            cluster.save_comparison_result(&format!("other-{i}"), i as f32 / 40.0);
        }
        let matches = cluster.comparison_matches();
        assert_eq!(matches.len(), SAVED_COMPARISON_MATCHES);
        assert!(matches
            .windows(2)
            .all(|w| w[0].similarity <= w[1].similarity));
        // the ten lowest-scoring comparisons were shed
        assert_eq!(matches[0].other_id, "other-10");
    }

    #[test]
    fn test_low_scores_are_dropped_once_full() {
        let mut cluster = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        for i in 0..SAVED_COMPARISON_MATCHES {
            cluster.save_comparison_result(&format!("other-{i}"), 0.5 + i as f32 / 100.0);
        }
        cluster.save_comparison_result("too-low", 0.1);
        assert!(!cluster.is_in_best_comparison_results("too-low"));
        cluster.save_comparison_result("high", 0.99);
        assert!(cluster.is_in_best_comparison_results("high"));
        assert_eq!(cluster.comparison_matches().len(), SAVED_COMPARISON_MATCHES);
    }

    #[test]
    fn test_best_match_index_invalidated() {
        let mut cluster = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        cluster.save_comparison_result("a", 0.5);
        assert!(cluster.is_in_best_comparison_results("a"));
        cluster.save_comparison_result("b", 0.7);
        assert!(cluster.is_in_best_comparison_results("a"));
        assert!(cluster.is_in_best_comparison_results("b"));
    }

    #[test]
    fn test_merge_relabels_to_larger_cluster() {
        let s1 = spectrum(500_250, &[(100, 1)]);
        let s2 = spectrum(500_251, &[(110, 1)]);
        let s3 = spectrum(500_252, &[(120, 1)]);

        let mut small = GreedySpectralCluster::from_spectrum(&s1, NOISE_FILTER_INCREMENT);
        let mut large = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        large.add_spectra(&[s2, s3]);
        let large_id = large.id().to_string();

        small.merge_cluster(&large);
        assert_eq!(small.id(), large_id);
        assert_eq!(small.member_count(), 3);
        assert_eq!(small.consensus().spectrum_count(), 3);
    }

    #[test]
    fn test_merge_concatenates_matches() {
        let mut a = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        let mut b = GreedySpectralCluster::new(GreedyConsensusSpectrum::new());
        a.save_comparison_result("x", 0.4);
        b.save_comparison_result("y", 0.8);
        a.merge_cluster(&b);
        assert!(a.is_in_best_comparison_results("x"));
        assert!(a.is_in_best_comparison_results("y"));
        let sims: Vec<f32> = a.comparison_matches().iter().map(|m| m.similarity).collect();
        assert_eq!(sims, vec![0.4, 0.8]);
    }
}
