//! Cheap accept/reject predicates applied before similarity scoring.

use crate::cluster::GreedySpectralCluster;
use crate::spectrum::BinarySpectrum;

/// The default number of top peaks compared by the shared-peak predicate.
pub const DEFAULT_SHARED_PEAK_COUNT: usize = 5;

/// The closed set of pre-scoring predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPredicate {
    /// Accept when the two sides share at least one of their `k` most
    /// intense peaks. Commutative.
    ShareHighestPeaks { k: usize },
    /// Accept when either side already lists the other among its best
    /// comparison results; used to skip re-scoring known pairs in
    /// multi-pass clustering.
    ClusterIsKnownComparison,
}

impl ClusterPredicate {
    pub fn share_highest_peaks(k: usize) -> Self {
        Self::ShareHighestPeaks { k }
    }

    pub fn cluster_is_known_comparison() -> Self {
        Self::ClusterIsKnownComparison
    }

    /// Evaluate against a cluster and an incoming single spectrum.
    pub fn test_spectrum(&self, cluster: &mut GreedySpectralCluster, spectrum: &BinarySpectrum) -> bool {
        match *self {
            Self::ShareHighestPeaks { k } => {
                share_any_top_peak(cluster.consensus_spectrum(), spectrum, k)
            }
            Self::ClusterIsKnownComparison => {
                cluster.is_in_best_comparison_results(spectrum.uui())
            }
        }
    }

    /// Evaluate against two clusters. Symmetric for every variant.
    pub fn test_clusters(
        &self,
        a: &mut GreedySpectralCluster,
        b: &mut GreedySpectralCluster,
    ) -> bool {
        match *self {
            Self::ShareHighestPeaks { k } => {
                let top_a = a.consensus_spectrum().highest_intensity_bins(k);
                let top_b = b.consensus_spectrum().highest_intensity_bins(k);
                top_a.iter().any(|bin| top_b.contains(bin))
            }
            Self::ClusterIsKnownComparison => {
                let b_id = b.id().to_string();
                a.is_in_best_comparison_results(&b_id)
                    || b.is_in_best_comparison_results(a.id())
            }
        }
    }
}

impl Default for ClusterPredicate {
    fn default() -> Self {
        Self::ShareHighestPeaks {
            k: DEFAULT_SHARED_PEAK_COUNT,
        }
    }
}

fn share_any_top_peak(a: &BinarySpectrum, b: &BinarySpectrum, k: usize) -> bool {
    let top_a = a.highest_intensity_bins(k);
    let top_b = b.highest_intensity_bins(k);
    top_a.iter().any(|bin| top_b.contains(bin))
}
