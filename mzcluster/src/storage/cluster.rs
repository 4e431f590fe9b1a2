//! Cluster stores behind one key→value contract: an in-memory map, a
//! pre-sized slot file for when the cluster count is known up front, and
//! a compressed append-log for when it is not.
//!
//! All variants assume at most one active writer. Reads may run
//! concurrently with reads only.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use crate::cluster::GreedySpectralCluster;
use crate::storage::codec::{decode_cluster, encode_cluster};
use crate::storage::StorageError;

/// The default slot size of the static store, generous enough for a
/// cluster with a full comparison list and a few hundred consensus bins.
pub const DEFAULT_SLOT_SIZE: usize = 16 * 1024;

/// How much decoded data the dynamic store keeps in its read cache.
pub const DYNAMIC_CACHE_BUDGET: usize = 100 * 1024 * 1024;

/// The key→value contract every cluster store satisfies.
pub trait ClusterStorage {
    fn put(&mut self, key: u64, cluster: &GreedySpectralCluster) -> Result<(), StorageError>;

    fn get(&mut self, key: u64) -> Result<Option<GreedySpectralCluster>, StorageError>;

    /// Remove `key`, reporting whether it was present.
    fn delete(&mut self, key: u64) -> Result<bool, StorageError>;

    /// Remove a batch of keys. Deletion is commutative, but the write
    /// path is single-writer, so the batch runs serially.
    fn delete_all(&mut self, keys: &[u64]) -> Result<(), StorageError> {
        for &key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and release the backing resources. Idempotent.
    fn close(&mut self) -> Result<(), StorageError>;
}

/// A plain in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryClusterStorage {
    clusters: HashMap<u64, GreedySpectralCluster>,
}

impl InMemoryClusterStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterStorage for InMemoryClusterStorage {
    fn put(&mut self, key: u64, cluster: &GreedySpectralCluster) -> Result<(), StorageError> {
        self.clusters.insert(key, cluster.clone());
        Ok(())
    }

    fn get(&mut self, key: u64) -> Result<Option<GreedySpectralCluster>, StorageError> {
        Ok(self.clusters.get(&key).cloned())
    }

    fn delete(&mut self, key: u64) -> Result<bool, StorageError> {
        Ok(self.clusters.remove(&key).is_some())
    }

    fn len(&self) -> usize {
        self.clusters.len()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.clusters.clear();
        Ok(())
    }
}

enum Backing {
    /// An anonymous temp file the OS reclaims on drop, even on abnormal
    /// termination.
    Temp(File),
    /// A caller-visible file that survives close.
    Persistent(File, PathBuf),
    Closed,
}

impl Backing {
    fn file(&mut self) -> Result<&mut File, StorageError> {
        match self {
            Backing::Temp(f) | Backing::Persistent(f, _) => Ok(f),
            Backing::Closed => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "storage already closed",
            ))),
        }
    }

    fn close(&mut self) -> Result<(), StorageError> {
        match std::mem::replace(self, Backing::Closed) {
            Backing::Temp(_) => Ok(()),
            Backing::Persistent(file, path) => {
                file.sync_all()?;
                debug!("Retained cluster store at {}", path.display());
                Ok(())
            }
            Backing::Closed => Ok(()),
        }
    }
}

/// A pre-allocated slot-file store sized for a known number of entries.
///
/// Each slot holds `{key: u64, len: u32, bytes}`. Slots are assigned on
/// first insert and overwritten in place afterwards; the key→slot index
/// lives in memory. Values longer than the slot size are refused.
pub struct StaticClusterStorage {
    backing: Backing,
    capacity: usize,
    slot_size: usize,
    index: HashMap<u64, u32>,
    free_slots: Vec<u32>,
    next_slot: u32,
}

impl StaticClusterStorage {
    const SLOT_HEADER: usize = 12;

    /// A temp-backed store with room for `capacity` clusters.
    pub fn create(capacity: usize) -> Result<Self, StorageError> {
        Self::with_file(Backing::Temp(tempfile_anonymous()?), capacity, DEFAULT_SLOT_SIZE)
    }

    /// A store persisted at `path`, left behind on close.
    pub fn create_at<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Self::with_file(
            Backing::Persistent(file, path.as_ref().to_path_buf()),
            capacity,
            DEFAULT_SLOT_SIZE,
        )
    }

    fn with_file(
        mut backing: Backing,
        capacity: usize,
        slot_size: usize,
    ) -> Result<Self, StorageError> {
        let total = (capacity as u64) * (slot_size + Self::SLOT_HEADER) as u64;
        backing.file()?.set_len(total)?;
        Ok(Self {
            backing,
            capacity,
            slot_size,
            index: HashMap::with_capacity(capacity),
            free_slots: Vec::new(),
            next_slot: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot_offset(&self, slot: u32) -> u64 {
        slot as u64 * (self.slot_size + Self::SLOT_HEADER) as u64
    }
}

impl ClusterStorage for StaticClusterStorage {
    fn put(&mut self, key: u64, cluster: &GreedySpectralCluster) -> Result<(), StorageError> {
        let record = encode_cluster(cluster)?;
        if record.len() > self.slot_size {
            return Err(StorageError::SlotOverflow {
                len: record.len(),
                slot: self.slot_size,
            });
        }
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = match self.free_slots.pop() {
                    Some(slot) => slot,
                    None => {
                        if (self.next_slot as usize) >= self.capacity {
                            return Err(StorageError::CapacityExceeded {
                                capacity: self.capacity,
                            });
                        }
                        let slot = self.next_slot;
                        self.next_slot += 1;
                        slot
                    }
                };
                self.index.insert(key, slot);
                slot
            }
        };
        let offset = self.slot_offset(slot);
        let file = self.backing.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&key.to_le_bytes())?;
        file.write_all(&(record.len() as u32).to_le_bytes())?;
        file.write_all(&record)?;
        Ok(())
    }

    fn get(&mut self, key: u64) -> Result<Option<GreedySpectralCluster>, StorageError> {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => return Ok(None),
        };
        let offset = self.slot_offset(slot);
        let file = self.backing.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; Self::SLOT_HEADER];
        file.read_exact(&mut header)?;
        let stored_key = u64::from_le_bytes(header[..8].try_into().unwrap());
        if stored_key != key {
            return Err(StorageError::Integrity(format!(
                "slot {slot} holds key {stored_key:#x}, expected {key:#x}"
            )));
        }
        let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        let mut record = vec![0u8; len];
        file.read_exact(&mut record)?;
        decode_cluster(&record).map(Some)
    }

    fn delete(&mut self, key: u64) -> Result<bool, StorageError> {
        match self.index.remove(&key) {
            Some(slot) => {
                self.free_slots.push(slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.index.clear();
        self.backing.close()
    }
}

/// A block-structured append-log store with compressed records and a
/// bounded read cache. Needs no pre-sizing.
pub struct DynamicClusterStorage {
    backing: Backing,
    index: HashMap<u64, (u64, u32)>,
    end_offset: u64,
    cache: HashMap<u64, GreedySpectralCluster>,
    cache_order: VecDeque<(u64, usize)>,
    cache_bytes: usize,
    cache_budget: usize,
}

impl DynamicClusterStorage {
    pub fn create() -> Result<Self, StorageError> {
        Ok(Self::with_backing(Backing::Temp(tempfile_anonymous()?)))
    }

    pub fn create_at<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self::with_backing(Backing::Persistent(
            file,
            path.as_ref().to_path_buf(),
        )))
    }

    fn with_backing(backing: Backing) -> Self {
        Self {
            backing,
            index: HashMap::new(),
            end_offset: 0,
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
            cache_bytes: 0,
            cache_budget: DYNAMIC_CACHE_BUDGET,
        }
    }

    fn cache_insert(&mut self, key: u64, cluster: GreedySpectralCluster, weight: usize) {
        if self.cache.insert(key, cluster).is_none() {
            self.cache_bytes += weight;
            self.cache_order.push_back((key, weight));
        }
        while self.cache_bytes > self.cache_budget {
            match self.cache_order.pop_front() {
                Some((old_key, old_weight)) => {
                    if self.cache.remove(&old_key).is_some() {
                        self.cache_bytes -= old_weight;
                    }
                }
                None => break,
            }
        }
    }
}

impl ClusterStorage for DynamicClusterStorage {
    fn put(&mut self, key: u64, cluster: &GreedySpectralCluster) -> Result<(), StorageError> {
        let record = encode_cluster(cluster)?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&record)?;
        let compressed = encoder.finish()?;

        let file = self.backing.file()?;
        file.seek(SeekFrom::Start(self.end_offset))?;
        file.write_all(&compressed)?;
        self.index
            .insert(key, (self.end_offset, compressed.len() as u32));
        self.end_offset += compressed.len() as u64;

        self.cache_insert(key, cluster.clone(), record.len());
        Ok(())
    }

    fn get(&mut self, key: u64) -> Result<Option<GreedySpectralCluster>, StorageError> {
        if let Some(cluster) = self.cache.get(&key) {
            return Ok(Some(cluster.clone()));
        }
        let (offset, len) = match self.index.get(&key) {
            Some(&entry) => entry,
            None => return Ok(None),
        };
        let file = self.backing.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut compressed = vec![0u8; len as usize];
        file.read_exact(&mut compressed)?;
        let mut record = Vec::new();
        DeflateDecoder::new(&compressed[..]).read_to_end(&mut record)?;
        let cluster = decode_cluster(&record)?;
        self.cache_insert(key, cluster.clone(), record.len());
        Ok(Some(cluster))
    }

    fn delete(&mut self, key: u64) -> Result<bool, StorageError> {
        self.cache.remove(&key);
        Ok(self.index.remove(&key).is_some())
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.index.clear();
        self.cache.clear();
        self.cache_order.clear();
        self.cache_bytes = 0;
        self.backing.close()
    }
}

fn tempfile_anonymous() -> Result<File, StorageError> {
    Ok(tempfile::tempfile()?)
}
