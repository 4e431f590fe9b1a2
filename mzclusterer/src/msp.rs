//! Writes clusters as an MSP consensus spectrum library: one block per
//! cluster with the most frequent member sequence as the entry name.

use std::collections::HashMap;
use std::io::Write;

use itertools::Itertools;
use tracing::warn;

use mzcluster::cluster::GreedySpectralCluster;
use mzcluster::normalizer::{MzBinner, PrecursorBinner};
use mzcluster::storage::{ClusterStorage, PropertyStorage};

use crate::driver::MzClustererError;

/// Property names a member sequence may be stored under, in lookup order.
pub const SEQUENCE_PROPERTIES: [&str; 4] = ["SEQ", "seq", "Sequence", "sequence"];

/// Known modification masses and their names.
const KNOWN_MODS: [(f64, &str); 5] = [
    (42.011, "Acetyl"),
    (57.021, "Carbamidomethyl"),
    (15.995, "Oxidation"),
    (79.966, "Phospho"),
    (0.984, "Deamidated"),
];

const MOD_MASS_TOLERANCE: f64 = 0.01;

/// A modification extracted from a `+mass`-annotated sequence string.
#[derive(Debug, Clone, PartialEq)]
pub struct MspMod {
    /// The number of residues preceding the modification site.
    pub position: usize,
    /// The modified residue, `[` for the N-terminus and `]` for the
    /// C-terminus.
    pub amino_acid: String,
    pub name: String,
}

/// Extract all `+mass` / `-mass` annotations from a sequence string.
pub fn extract_mods_from_sequence(sequence: &str) -> Vec<MspMod> {
    let mut mods = Vec::new();
    let chars: Vec<char> = sequence.chars().collect();
    let mut residues_seen = 0usize;
    let mut last_residue = None;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '+' || c == '-' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let mass: f64 = chars[start..i].iter().collect::<String>().parse().unwrap_or(0.0);
            let amino_acid = if residues_seen == 0 {
                "[".to_string()
            } else if i >= chars.len() {
                "]".to_string()
            } else {
                last_residue.map(|r: char| r.to_string()).unwrap_or_default()
            };
            mods.push(MspMod {
                position: residues_seen,
                amino_acid,
                name: mod_name(mass),
            });
        } else {
            if c.is_ascii_alphabetic() {
                residues_seen += 1;
                last_residue = Some(c);
            }
            i += 1;
        }
    }
    mods
}

/// Render the modification summary, e.g. `3(0,[,Acetyl)(7,T,Acetyl)(19,],Acetyl)`.
pub fn get_mod_string(sequence: &str) -> String {
    let mods = extract_mods_from_sequence(sequence);
    let rendered = mods
        .iter()
        .map(|m| format!("({},{},{})", m.position, m.amino_acid, m.name))
        .join("");
    format!("{}{}", mods.len(), rendered)
}

fn mod_name(mass: f64) -> String {
    for (known, name) in KNOWN_MODS {
        if (mass.abs() - known).abs() <= MOD_MASS_TOLERANCE {
            return name.to_string();
        }
    }
    format!("{mass:+.3}")
}

/// Writes clusters fetched from a cluster store as MSP blocks.
pub struct MspWriter {
    mz_binner: MzBinner,
    precursor_binner: PrecursorBinner,
}

impl MspWriter {
    pub fn new(mz_binner: MzBinner, precursor_binner: PrecursorBinner) -> Self {
        Self {
            mz_binner,
            precursor_binner,
        }
    }

    /// Write one block per stored key, skipping keys that are missing
    /// from the store.
    pub fn write_result<W: Write>(
        &self,
        writer: &mut W,
        keys: &[u64],
        clusters: &mut dyn ClusterStorage,
        properties: &mut dyn PropertyStorage,
    ) -> Result<(), MzClustererError> {
        for &key in keys {
            match clusters.get(key)? {
                Some(mut cluster) => self.write_cluster(writer, &mut cluster, properties)?,
                None => warn!("Cluster {key:#x} disappeared from the result store"),
            }
        }
        Ok(())
    }

    fn write_cluster<W: Write>(
        &self,
        writer: &mut W,
        cluster: &mut GreedySpectralCluster,
        properties: &mut dyn PropertyStorage,
    ) -> Result<(), MzClustererError> {
        let n_reps = cluster.member_count();
        let (sequence, sequence_count) = self.representative_sequence(cluster, properties)?;
        let max_ratio = if n_reps > 0 {
            sequence_count as f64 / n_reps as f64
        } else {
            0.0
        };
        let charge = cluster.precursor_charge();
        let parent = self.precursor_binner.unbin(cluster.precursor_mz_bin());

        writeln!(writer, "Name: {sequence}/{charge}")?;
        writeln!(
            writer,
            "Comment: Spec=Consensus Parent={parent:.4} Mods={} Nreps={n_reps} Naa={} MaxRatio={max_ratio:.3}",
            get_mod_string(&sequence),
            sequence.chars().count(),
        )?;

        let representative = cluster.consensus_spectrum();
        writeln!(writer, "Num peaks: {}", representative.peak_count())?;
        for (&bin, &intensity) in representative
            .mzs()
            .iter()
            .zip(representative.intensities().iter())
        {
            writeln!(writer, "{:.4}\t{intensity}", self.mz_binner.center(bin))?;
        }
        writeln!(writer)?;
        Ok(())
    }

    /// The most frequent member sequence and its multiplicity; frequency
    /// ties resolve to the lexicographically smaller sequence.
    fn representative_sequence(
        &self,
        cluster: &GreedySpectralCluster,
        properties: &mut dyn PropertyStorage,
    ) -> Result<(String, usize), MzClustererError> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for member in cluster.member_ids() {
            for property in SEQUENCE_PROPERTIES {
                if let Some(sequence) = properties.get(member, property)? {
                    *counts.entry(sequence).or_default() += 1;
                    break;
                }
            }
        }
        Ok(counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .unwrap_or_else(|| ("Unknown".to_string(), 0)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mzcluster::consensus::NOISE_FILTER_INCREMENT;
    use mzcluster::spectrum::BinarySpectrum;
    use mzcluster::storage::InMemoryPropertyStorage;

    #[test]
    fn test_extract_mods() {
        let mods = extract_mods_from_sequence("+42.011EVQLVET+42.011GGGLIQPGGSLR+42.011");
        assert_eq!(mods.len(), 3);

        assert_eq!(mods[0].position, 0);
        assert_eq!(mods[0].amino_acid, "[");
        assert_eq!(mods[0].name, "Acetyl");

        assert_eq!(mods[1].position, 7);
        assert_eq!(mods[1].amino_acid, "T");
        assert_eq!(mods[1].name, "Acetyl");

        assert_eq!(mods[2].position, 19);
        assert_eq!(mods[2].amino_acid, "]");
        assert_eq!(mods[2].name, "Acetyl");
    }

    #[test]
    fn test_get_mod_string() {
        assert_eq!(
            get_mod_string("+42.011EVQLVET+42.011GGGLIQPGGSLR+42.011"),
            "3(0,[,Acetyl)(7,T,Acetyl)(19,],Acetyl)"
        );
        assert_eq!(get_mod_string("PEPTIDER"), "0");
        assert_eq!(
            get_mod_string("PEP+15.995TIDER"),
            "1(3,P,Oxidation)"
        );
    }

    #[test]
    fn test_msp_block_header() {
        // one 50-peak spectrum at precursor 977.023, charge 2
        let peaks: Vec<i32> = (0..50).map(|i| 100_000 + i * 100).collect();
        let intensities: Vec<i32> = (0..50).map(|i| 1000 + i).collect();
        let spectrum = BinarySpectrum::new(977_023, 2, peaks, intensities);
        let uui = spectrum.uui().to_string();
        let mut cluster =
            GreedySpectralCluster::from_spectrum(&spectrum, NOISE_FILTER_INCREMENT);

        let mut properties = InMemoryPropertyStorage::new();
        properties
            .put(&uui, "SEQ", "+42.011EVQLVETGGGLIQPGGSLR")
            .unwrap();

        let writer = MspWriter::new(MzBinner::tide(), PrecursorBinner::default());
        let mut out = Vec::new();
        writer
            .write_cluster(&mut out, &mut cluster, &mut properties)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Name: +42.011EVQLVETGGGLIQPGGSLR/2");
        assert_eq!(
            lines[1],
            "Comment: Spec=Consensus Parent=977.0230 Mods=1(0,[,Acetyl) Nreps=1 Naa=26 MaxRatio=1.000"
        );
        assert_eq!(lines[2], "Num peaks: 50");
        // peak lines are m/z sorted ascending
        assert_eq!(lines.len(), 3 + 50);
    }

    #[test]
    fn test_most_frequent_sequence_wins() {
        let s1 = BinarySpectrum::new(500_250, 2, vec![100], vec![1]);
        let s2 = BinarySpectrum::new(500_250, 2, vec![100], vec![1]);
        let s3 = BinarySpectrum::new(500_250, 2, vec![100], vec![1]);
        let mut cluster = GreedySpectralCluster::from_spectrum(&s1, NOISE_FILTER_INCREMENT);
        cluster.add_spectra(&[s2.clone(), s3.clone()]);

        let mut properties = InMemoryPropertyStorage::new();
        properties.put(s1.uui(), "SEQ", "PEPTIDEK").unwrap();
        properties.put(s2.uui(), "SEQ", "PEPTIDER").unwrap();
        properties.put(s3.uui(), "SEQ", "PEPTIDER").unwrap();

        let writer = MspWriter::new(MzBinner::tide(), PrecursorBinner::default());
        let (sequence, count) = writer
            .representative_sequence(&cluster, &mut properties)
            .unwrap();
        assert_eq!(sequence, "PEPTIDER");
        assert_eq!(count, 2);
    }
}
