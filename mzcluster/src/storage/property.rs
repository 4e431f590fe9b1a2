//! Per-spectrum property stores: `(spectrum uui, property name) → value`
//! with idempotent overwrite and no cross-key ordering guarantees.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::storage::StorageError;

/// The key→value contract for spectrum properties.
pub trait PropertyStorage {
    fn put(&mut self, spectrum_uui: &str, name: &str, value: &str) -> Result<(), StorageError>;

    fn get(&mut self, spectrum_uui: &str, name: &str) -> Result<Option<String>, StorageError>;

    /// Every property name stored so far.
    fn available_property_names(&self) -> BTreeSet<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&mut self) -> Result<(), StorageError>;
}

/// A plain in-memory property store.
#[derive(Debug, Default)]
pub struct InMemoryPropertyStorage {
    values: HashMap<(String, String), String>,
    names: BTreeSet<String>,
}

impl InMemoryPropertyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertyStorage for InMemoryPropertyStorage {
    fn put(&mut self, spectrum_uui: &str, name: &str, value: &str) -> Result<(), StorageError> {
        self.names.insert(name.to_string());
        self.values.insert(
            (spectrum_uui.to_string(), name.to_string()),
            value.to_string(),
        );
        Ok(())
    }

    fn get(&mut self, spectrum_uui: &str, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .values
            .get(&(spectrum_uui.to_string(), name.to_string()))
            .cloned())
    }

    fn available_property_names(&self) -> BTreeSet<String> {
        self.names.clone()
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.values.clear();
        Ok(())
    }
}

/// A property store whose values live in an append-only temp file, with
/// only the key index held in memory. The file is reclaimed when the
/// store drops, including on abnormal termination.
pub struct OnDiskPropertyStorage {
    file: Option<File>,
    index: HashMap<(String, String), (u64, u32)>,
    names: BTreeSet<String>,
    end_offset: u64,
}

impl OnDiskPropertyStorage {
    pub fn create() -> Result<Self, StorageError> {
        Ok(Self {
            file: Some(tempfile::tempfile()?),
            index: HashMap::new(),
            names: BTreeSet::new(),
            end_offset: 0,
        })
    }

    fn file(&mut self) -> Result<&mut File, StorageError> {
        self.file.as_mut().ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "property storage already closed",
            ))
        })
    }
}

impl PropertyStorage for OnDiskPropertyStorage {
    fn put(&mut self, spectrum_uui: &str, name: &str, value: &str) -> Result<(), StorageError> {
        let offset = self.end_offset;
        let bytes = value.as_bytes();
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_u32::<LittleEndian>(bytes.len() as u32)?;
        file.write_all(bytes)?;
        self.end_offset += 4 + bytes.len() as u64;
        self.names.insert(name.to_string());
        self.index.insert(
            (spectrum_uui.to_string(), name.to_string()),
            (offset, bytes.len() as u32),
        );
        Ok(())
    }

    fn get(&mut self, spectrum_uui: &str, name: &str) -> Result<Option<String>, StorageError> {
        let (offset, len) = match self
            .index
            .get(&(spectrum_uui.to_string(), name.to_string()))
        {
            Some(&entry) => entry,
            None => return Ok(None),
        };
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let stored_len = file.read_u32::<LittleEndian>()?;
        if stored_len != len {
            return Err(StorageError::Integrity(format!(
                "property record length mismatch: {stored_len} != {len}"
            )));
        }
        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer)?;
        String::from_utf8(buffer)
            .map(Some)
            .map_err(|e| StorageError::Integrity(format!("non-UTF8 property value: {e}")))
    }

    fn available_property_names(&self) -> BTreeSet<String> {
        self.names.clone()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.index.clear();
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exercise_store(store: &mut dyn PropertyStorage) {
        for i in 0..200 {
            store
                .put(&i.to_string(), "RT", &(i * 37).to_string())
                .unwrap();
        }
        assert_eq!(store.available_property_names().len(), 1);
        assert_eq!(store.len(), 200);
        assert_eq!(store.get("13", "RT").unwrap().unwrap(), "481");
        assert!(store.get("13", "Sequence").unwrap().is_none());
        assert!(store.get("900", "RT").unwrap().is_none());

        // overwrite is idempotent on size
        store.put("13", "RT", "replaced").unwrap();
        assert_eq!(store.len(), 200);
        assert_eq!(store.get("13", "RT").unwrap().unwrap(), "replaced");

        store.put("13", "Sequence", "PEPTIDER").unwrap();
        assert_eq!(store.len(), 201);
        assert_eq!(
            store.available_property_names(),
            ["RT", "Sequence"].iter().map(|s| s.to_string()).collect()
        );

        store.close().unwrap();
    }

    #[test]
    fn test_in_memory_property_store() {
        exercise_store(&mut InMemoryPropertyStorage::new());
    }

    #[test]
    fn test_on_disk_property_store() {
        exercise_store(&mut OnDiskPropertyStorage::create().unwrap());
    }
}
