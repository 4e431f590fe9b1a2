//! The versioned binary encoding clusters are persisted in.
//!
//! Every record is `{magic: u32, version: u16, payload_len: u32}` followed
//! by `payload_len` bytes, all little-endian. Readers parse the fields
//! they know and skip anything trailing inside the payload, so newer
//! writers can append fields without breaking older readers.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::cluster::{ComparisonMatch, GreedySpectralCluster};
use crate::consensus::{ConsensusPeak, GreedyConsensusSpectrum};
use crate::storage::StorageError;

pub const CLUSTER_MAGIC: u32 = 0x4C43_5A4D; // "MZCL"
pub const CLUSTER_FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 10;

/// Serialize a cluster into a fresh record buffer.
pub fn encode_cluster(cluster: &GreedySpectralCluster) -> Result<Vec<u8>, StorageError> {
    let mut payload: Vec<u8> = Vec::with_capacity(256);

    write_string(&mut payload, cluster.id())?;

    payload.write_u32::<LittleEndian>(cluster.member_ids().len() as u32)?;
    for member in cluster.member_ids() {
        write_string(&mut payload, member)?;
    }

    let consensus = cluster.consensus();
    write_string(&mut payload, consensus.uui())?;
    payload.write_i64::<LittleEndian>(consensus.spectrum_count())?;
    payload.write_i64::<LittleEndian>(consensus.sum_precursor_mz())?;
    payload.write_i64::<LittleEndian>(consensus.sum_precursor_charge())?;
    payload.write_i32::<LittleEndian>(consensus.noise_filter_increment())?;
    payload.write_u32::<LittleEndian>(consensus.distinct_bin_count() as u32)?;
    for (bin, peak) in consensus.peaks() {
        payload.write_i32::<LittleEndian>(bin)?;
        payload.write_i64::<LittleEndian>(peak.summed_intensity)?;
        payload.write_i32::<LittleEndian>(peak.count)?;
    }

    payload.write_u32::<LittleEndian>(cluster.comparison_matches().len() as u32)?;
    for m in cluster.comparison_matches() {
        write_string(&mut payload, &m.other_id)?;
        payload.write_f32::<LittleEndian>(m.similarity)?;
    }

    payload.write_u64::<LittleEndian>(cluster.comparison_count())?;

    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.write_u32::<LittleEndian>(CLUSTER_MAGIC)?;
    record.write_u16::<LittleEndian>(CLUSTER_FORMAT_VERSION)?;
    record.write_u32::<LittleEndian>(payload.len() as u32)?;
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Deserialize a cluster record produced by [`encode_cluster`]. A header
/// mismatch surfaces as an integrity error with no recovery attempt.
pub fn decode_cluster(bytes: &[u8]) -> Result<GreedySpectralCluster, StorageError> {
    if bytes.len() < HEADER_LEN {
        return Err(StorageError::Integrity(format!(
            "record of {} bytes is shorter than the header",
            bytes.len()
        )));
    }
    let mut header = Cursor::new(&bytes[..HEADER_LEN]);
    let magic = header.read_u32::<LittleEndian>()?;
    if magic != CLUSTER_MAGIC {
        return Err(StorageError::Integrity(format!(
            "bad magic number {magic:#010x}"
        )));
    }
    let version = header.read_u16::<LittleEndian>()?;
    if version != CLUSTER_FORMAT_VERSION {
        return Err(StorageError::Integrity(format!(
            "unsupported format version {version}"
        )));
    }
    let payload_len = header.read_u32::<LittleEndian>()? as usize;
    if bytes.len() < HEADER_LEN + payload_len {
        return Err(StorageError::Integrity(format!(
            "payload truncated: expected {payload_len} bytes, found {}",
            bytes.len() - HEADER_LEN
        )));
    }

    let mut payload = Cursor::new(&bytes[HEADER_LEN..HEADER_LEN + payload_len]);

    let id = read_string(&mut payload)?;

    let member_count = payload.read_u32::<LittleEndian>()?;
    let mut member_ids = std::collections::BTreeSet::new();
    for _ in 0..member_count {
        member_ids.insert(read_string(&mut payload)?);
    }

    let consensus_uui = read_string(&mut payload)?;
    let n_spectra = payload.read_i64::<LittleEndian>()?;
    let sum_precursor_mz = payload.read_i64::<LittleEndian>()?;
    let sum_precursor_charge = payload.read_i64::<LittleEndian>()?;
    let noise_filter_increment = payload.read_i32::<LittleEndian>()?;
    let bin_count = payload.read_u32::<LittleEndian>()?;
    let mut peaks = Vec::with_capacity(bin_count as usize);
    for _ in 0..bin_count {
        let bin = payload.read_i32::<LittleEndian>()?;
        let summed_intensity = payload.read_i64::<LittleEndian>()?;
        let count = payload.read_i32::<LittleEndian>()?;
        peaks.push((
            bin,
            ConsensusPeak {
                summed_intensity,
                count,
            },
        ));
    }
    let consensus = GreedyConsensusSpectrum::from_parts(
        consensus_uui,
        n_spectra,
        sum_precursor_mz,
        sum_precursor_charge,
        noise_filter_increment,
        peaks,
    );

    let match_count = payload.read_u32::<LittleEndian>()?;
    let mut best_matches = Vec::with_capacity(match_count as usize);
    for _ in 0..match_count {
        let other_id = read_string(&mut payload)?;
        let similarity = payload.read_f32::<LittleEndian>()?;
        best_matches.push(ComparisonMatch::new(other_id, similarity));
    }

    let comparison_count = payload.read_u64::<LittleEndian>()?;

    // anything left in the payload belongs to a newer writer; skip it

    Ok(GreedySpectralCluster::from_parts(
        id,
        member_ids,
        consensus,
        best_matches,
        comparison_count,
    ))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), StorageError> {
    let bytes = value.as_bytes();
    writer.write_u16::<LittleEndian>(bytes.len() as u16)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, StorageError> {
    let len = reader.read_u16::<LittleEndian>()? as usize;
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| StorageError::Integrity(format!("non-UTF8 string field: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consensus::NOISE_FILTER_INCREMENT;
    use crate::spectrum::BinarySpectrum;

    fn sample_cluster() -> GreedySpectralCluster {
        let s1 = BinarySpectrum::new(500_250, 2, vec![100, 200, 300], vec![10, 20, 30]);
        let s2 = BinarySpectrum::new(500_252, 2, vec![100, 250], vec![4, 9]);
        let mut cluster = GreedySpectralCluster::from_spectrum(&s1, NOISE_FILTER_INCREMENT);
        cluster.add_spectra(std::slice::from_ref(&s2));
        cluster.save_comparison_result("other-cluster", 0.75);
        cluster.register_comparison();
        cluster
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let cluster = sample_cluster();
        let encoded = encode_cluster(&cluster).unwrap();
        let decoded = decode_cluster(&encoded).unwrap();
        let re_encoded = encode_cluster(&decoded).unwrap();
        assert_eq!(encoded, re_encoded);

        assert_eq!(decoded.id(), cluster.id());
        assert_eq!(decoded.member_ids(), cluster.member_ids());
        assert_eq!(decoded.comparison_count(), cluster.comparison_count());
        assert_eq!(decoded.comparison_matches(), cluster.comparison_matches());
        assert_eq!(
            decoded.consensus().spectrum_count(),
            cluster.consensus().spectrum_count()
        );
    }

    #[test]
    fn test_unknown_trailing_fields_are_tolerated() {
        let cluster = sample_cluster();
        let mut encoded = encode_cluster(&cluster).unwrap();
        // splice four unknown bytes into the payload and patch the length
        encoded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let new_len = (encoded.len() - 10) as u32;
        encoded[6..10].copy_from_slice(&new_len.to_le_bytes());

        let decoded = decode_cluster(&encoded).unwrap();
        assert_eq!(decoded.id(), cluster.id());
    }

    #[test]
    fn test_bad_magic_is_an_integrity_error() {
        let mut encoded = encode_cluster(&sample_cluster()).unwrap();
        encoded[0] ^= 0xff;
        assert!(matches!(
            decode_cluster(&encoded),
            Err(StorageError::Integrity(_))
        ));
    }

    #[test]
    fn test_bad_version_is_an_integrity_error() {
        let mut encoded = encode_cluster(&sample_cluster()).unwrap();
        encoded[4] = 0xff;
        assert!(matches!(
            decode_cluster(&encoded),
            Err(StorageError::Integrity(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_an_integrity_error() {
        let encoded = encode_cluster(&sample_cluster()).unwrap();
        assert!(matches!(
            decode_cluster(&encoded[..encoded.len() - 3]),
            Err(StorageError::Integrity(_))
        ));
    }
}
