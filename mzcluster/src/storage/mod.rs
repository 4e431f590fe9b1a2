//! Key→value stores for clusters and spectrum properties, each with an
//! in-memory and a persistent variant. The persistent variants own their
//! backing files: temp-backed stores release them on drop, path-backed
//! stores leave the file behind as the opaque `.cls` result.

use std::io;

use thiserror::Error;

pub mod cluster;
pub mod codec;
pub mod property;

pub use cluster::{
    ClusterStorage, DynamicClusterStorage, InMemoryClusterStorage, StaticClusterStorage,
};
pub use property::{InMemoryPropertyStorage, OnDiskPropertyStorage, PropertyStorage};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failure: {0}")]
    Io(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("corrupt record: {0}")]
    Integrity(String),
    #[error("static storage is full, capacity of {capacity} entries reached")]
    CapacityExceeded { capacity: usize },
    #[error("serialized value of {len} bytes exceeds the static slot size of {slot} bytes")]
    SlotOverflow { len: usize, slot: usize },
}

/// The stable 64-bit key a cluster id is stored under (FNV-1a, so keys
/// are reproducible across runs and machines).
pub fn hash64(id: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    id.bytes()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}
