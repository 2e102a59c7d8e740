// ========================================================================================
//
//                          KEYED BYTE STORES AND THE MASK LAYER
//
// ========================================================================================
//
// Masks are written once per ingested variant and read many times. The byte-level contract
// is deliberately small (get, put, keys, complete); the typed wrappers at the bottom of
// this file own the wire format.

use crate::codec::VariantMasks;
use crate::error::{MaskError, Result};
use crate::types::{BucketId, PatientId, VariantSpec};
use ahash::AHashMap;
use log::{debug, info};
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

const FILE_STORE_BUFFER_SIZE: usize = 1 << 20;

/// A string-keyed byte store. After `complete()` the store is read-only.
pub trait KeyedByteStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>>;
    fn complete(&self) -> Result<()>;
    fn is_complete(&self) -> bool;
}

fn poisoned<T>(_: T) -> MaskError {
    MaskError::store("store lock poisoned by a panicking writer")
}

// ========================================================================================
//                                    In memory
// ========================================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    complete: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyedByteStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.is_complete() {
            return Err(MaskError::StoreComplete(key.to_string()));
        }
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.keys().cloned().collect())
    }

    fn complete(&self) -> Result<()> {
        self.complete.store(true, Ordering::Release);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

// ========================================================================================
//                                 Append-only file
// ========================================================================================

/// `(offset, length)` of one value inside the data file.
type Extent = (u64, u64);

#[derive(Serialize, Deserialize)]
struct FileIndex {
    extents: BTreeMap<String, Extent>,
}

struct SpoolState {
    writer: BufWriter<File>,
    offsets: AHashMap<String, Extent>,
    cursor: u64,
}

enum FileState {
    Writing(SpoolState),
    Complete {
        offsets: AHashMap<String, Extent>,
        data: Mmap,
    },
}

/// Values are appended to one data file; an index of extents is written next to it on
/// `complete()`, after which the data file is memory-mapped for reads.
///
/// Rewriting a key appends a new value and points the index at it.
pub struct FileStore {
    data_path: PathBuf,
    index_path: PathBuf,
    state: RwLock<FileState>,
}

fn index_path_for(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_owned();
    name.push(".index.json");
    PathBuf::from(name)
}

fn map_data_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        // Zero-length file mappings are rejected on some platforms.
        let anon = MmapOptions::new().len(1).map_anon()?;
        return Ok(anon.make_read_only()?);
    }
    // SAFETY: the data file is append-only and never written again once complete.
    Ok(unsafe { Mmap::map(&file) }?)
}

fn slice_extent(data: &Mmap, key: &str, (offset, len): Extent) -> Result<Vec<u8>> {
    let start = usize::try_from(offset).map_err(|e| MaskError::store(e.to_string()))?;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .ok_or_else(|| {
            MaskError::store(format!(
                "extent for key '{key}' ({offset} + {len}) overflows the address space"
            ))
        })?;
    if len == 0 {
        return Ok(Vec::new());
    }
    data.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
        MaskError::store(format!(
            "value for key '{key}' lies outside the data file ({start}..{end})"
        ))
    })
}

impl FileStore {
    /// Creates (truncating) a writable store at `data_path`.
    pub fn create(data_path: impl Into<PathBuf>) -> Result<Self> {
        let data_path = data_path.into();
        if let Some(parent) = data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&data_path)?;
        debug!("Created file store at {}", data_path.display());
        Ok(Self {
            index_path: index_path_for(&data_path),
            data_path,
            state: RwLock::new(FileState::Writing(SpoolState {
                writer: BufWriter::with_capacity(FILE_STORE_BUFFER_SIZE, file),
                offsets: AHashMap::new(),
                cursor: 0,
            })),
        })
    }

    /// Opens a store previously sealed with `complete()`. The result is read-only.
    pub fn open(data_path: impl Into<PathBuf>) -> Result<Self> {
        let data_path = data_path.into();
        let index_path = index_path_for(&data_path);
        let reader = BufReader::new(File::open(&index_path)?);
        let index: FileIndex = serde_json::from_reader(reader)?;
        let data = map_data_file(&data_path)?;
        info!(
            "Opened file store {} with {} keys",
            data_path.display(),
            index.extents.len()
        );
        Ok(Self {
            data_path,
            index_path,
            state: RwLock::new(FileState::Complete {
                offsets: index.extents.into_iter().collect(),
                data,
            }),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

impl KeyedByteStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let state = self.state.read().map_err(poisoned)?;
            if let FileState::Complete { offsets, data } = &*state {
                return offsets
                    .get(key)
                    .map(|&extent| slice_extent(data, key, extent))
                    .transpose();
            }
        }

        // Still writing: buffered bytes must reach the file before they can be read back.
        let mut state = self.state.write().map_err(poisoned)?;
        match &mut *state {
            FileState::Complete { offsets, data } => offsets
                .get(key)
                .map(|&extent| slice_extent(data, key, extent))
                .transpose(),
            FileState::Writing(spool) => {
                let Some(&(offset, len)) = spool.offsets.get(key) else {
                    return Ok(None);
                };
                spool.writer.flush()?;
                let mut file = File::open(&self.data_path)?;
                file.seek(SeekFrom::Start(offset))?;
                let mut buf =
                    vec![0u8; usize::try_from(len).map_err(|e| MaskError::store(e.to_string()))?];
                file.read_exact(&mut buf)?;
                Ok(Some(buf))
            }
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        match &mut *state {
            FileState::Complete { .. } => Err(MaskError::StoreComplete(key.to_string())),
            FileState::Writing(spool) => {
                spool.writer.write_all(value)?;
                let len = value.len() as u64;
                spool.offsets.insert(key.to_string(), (spool.cursor, len));
                spool.cursor += len;
                Ok(())
            }
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.read().map_err(poisoned)?;
        let offsets = match &*state {
            FileState::Writing(spool) => &spool.offsets,
            FileState::Complete { offsets, .. } => offsets,
        };
        let mut keys: Vec<String> = offsets.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn complete(&self) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let FileState::Writing(spool) = &mut *state else {
            return Ok(());
        };
        spool.writer.flush()?;
        let offsets = std::mem::take(&mut spool.offsets);

        let index = FileIndex {
            extents: offsets.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };
        let mut index_writer = BufWriter::new(File::create(&self.index_path)?);
        serde_json::to_writer(&mut index_writer, &index)?;
        index_writer.flush()?;

        let data = map_data_file(&self.data_path)?;
        info!(
            "Sealed file store {} ({} keys, {} bytes)",
            self.data_path.display(),
            offsets.len(),
            spool.cursor
        );
        *state = FileState::Complete { offsets, data };
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.state
            .read()
            .map(|state| matches!(&*state, FileState::Complete { .. }))
            .unwrap_or(false)
    }
}

// ========================================================================================
//                                   Typed layers
// ========================================================================================

/// Stores one [`VariantMasks`] record per variant, keyed by the variant's canonical text.
#[derive(Clone)]
pub struct MaskStore {
    inner: Arc<dyn KeyedByteStore>,
}

impl MaskStore {
    pub fn new(inner: Arc<dyn KeyedByteStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn put_masks(&self, spec: &VariantSpec, masks: &VariantMasks) -> Result<()> {
        let bytes = serde_json::to_vec(masks)?;
        self.inner.put(&spec.key(), &bytes)
    }

    pub fn get_masks(&self, spec: &VariantSpec) -> Result<Option<VariantMasks>> {
        self.get_masks_by_key(&spec.key())
    }

    pub fn get_masks_by_key(&self, key: &str) -> Result<Option<VariantMasks>> {
        match self.inner.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored variant, in key order.
    pub fn variant_specs(&self) -> Result<Vec<VariantSpec>> {
        self.inner.keys()?.iter().map(|key| key.parse()).collect()
    }

    pub fn complete(&self) -> Result<()> {
        self.inner.complete()
    }
}

/// Stores one bucket set per patient, keyed by the decimal patient id.
#[derive(Clone)]
pub struct BucketSetStore {
    inner: Arc<dyn KeyedByteStore>,
}

impl BucketSetStore {
    pub fn new(inner: Arc<dyn KeyedByteStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn put_bucket_set(&self, patient: PatientId, buckets: &BTreeSet<BucketId>) -> Result<()> {
        let bytes = serde_json::to_vec(buckets)?;
        self.inner.put(&patient.to_string(), &bytes)
    }

    pub fn get_bucket_set(&self, patient: PatientId) -> Result<Option<BTreeSet<BucketId>>> {
        match self.inner.get(&patient.to_string())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn patient_count(&self) -> Result<usize> {
        Ok(self.inner.keys()?.len())
    }

    pub fn complete(&self) -> Result<()> {
        self.inner.complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient_mask::PatientMask;
    use tempfile::tempdir;

    #[test]
    fn memory_store_refuses_writes_after_complete() {
        let store = MemoryStore::new();
        store.put("b", b"2").unwrap();
        store.put("a", b"1").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        store.complete().unwrap();
        assert!(store.is_complete());
        let err = store.put("c", b"3").unwrap_err();
        assert!(matches!(err, MaskError::StoreComplete(key) if key == "c"));
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("zzz").unwrap(), None);
    }

    #[test]
    fn file_store_reads_back_before_and_after_sealing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("masks.dat");
        let store = FileStore::create(&path).unwrap();
        store.put("first", b"hello").unwrap();
        store.put("second", b"").unwrap();
        store.put("first", b"replaced").unwrap();
        assert_eq!(store.get("first").unwrap(), Some(b"replaced".to_vec()));

        store.complete().unwrap();
        assert!(store.is_complete());
        assert_eq!(store.get("second").unwrap(), Some(Vec::new()));
        assert!(matches!(
            store.put("third", b"x"),
            Err(MaskError::StoreComplete(_))
        ));

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["first", "second"]);
        assert_eq!(reopened.get("first").unwrap(), Some(b"replaced".to_vec()));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn empty_file_store_can_be_sealed_and_opened() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("empty.dat");
        FileStore::create(&path).unwrap().complete().unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.keys().unwrap().is_empty());
    }

    #[test]
    fn corrupt_extents_are_store_errors() {
        let dir = tempdir().unwrap();
        let store = FileStore::create(dir.path().join("masks.dat")).unwrap();
        store.put("ok", b"abc").unwrap();
        store.complete().unwrap();

        let index = FileIndex {
            extents: BTreeMap::from([
                ("ok".to_string(), (0, 3)),
                ("wraps".to_string(), (u64::MAX, 10)),
                ("past_end".to_string(), (2, 100)),
            ]),
        };
        fs::write(
            index_path_for(store.data_path()),
            serde_json::to_vec(&index).unwrap(),
        )
        .unwrap();

        let reopened = FileStore::open(store.data_path()).unwrap();
        assert_eq!(reopened.get("ok").unwrap(), Some(b"abc".to_vec()));
        assert!(matches!(reopened.get("wraps"), Err(MaskError::Store(_))));
        assert!(matches!(reopened.get("past_end"), Err(MaskError::Store(_))));
    }

    #[test]
    fn mask_store_preserves_representations() {
        let store = MaskStore::in_memory();
        let spec = VariantSpec::new("4", 9_856_624, "CAAAAA", "C", "USP17L22", "intron_variant");
        let masks = VariantMasks {
            heterozygous: Some("11011011".parse().unwrap()),
            homozygous: Some(PatientMask::from_positions(4, [3], 5)),
            ..VariantMasks::default()
        };
        store.put_masks(&spec, &masks).unwrap();

        let back = store.get_masks(&spec).unwrap().unwrap();
        assert_eq!(back, masks);
        assert!(back.heterozygous.unwrap().is_dense());
        assert!(!back.homozygous.unwrap().is_dense());
        assert_eq!(store.variant_specs().unwrap(), vec![spec]);
    }

    #[test]
    fn bucket_sets_are_keyed_by_patient() {
        let store = BucketSetStore::in_memory();
        let buckets: BTreeSet<BucketId> = [BucketId(1_000_001), BucketId(23_000_000)].into();
        store.put_bucket_set(42, &buckets).unwrap();
        assert_eq!(store.get_bucket_set(42).unwrap(), Some(buckets));
        assert_eq!(store.get_bucket_set(7).unwrap(), None);
        assert_eq!(store.patient_count().unwrap(), 1);
    }
}
