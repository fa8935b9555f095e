//! Keyed dense-array store for histograms and run attributes.
//!
//! The sampler persists everything as named dense arrays plus a handful of
//! scalar attributes. [`ArrayStore`] is the seam; two implementations ship:
//!
//! - [`MemoryStore`]: ordered in-memory maps (tests, staging).
//! - [`FileStore`]: a `MemoryStore` snapshotted to a single checksummed file.
//!
//! ## File format
//!
//! ```text
//! [magic: u32][version: u32][len: u64][crc32: u32][payload: [u8; len]]
//! ```
//!
//! The payload is the bincode encoding of the whole store. `flush()` writes a
//! sibling `*.tmp` file and renames it over the target, so a crash mid-write
//! leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

const MAGIC: u32 = 0x4650_4853; // "FPHS"
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// Hard cap on the payload size read back from disk (4 GiB).
const MAX_PAYLOAD_LEN: u64 = 4 * 1024 * 1024 * 1024;

// ─────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no array named `{0}`")]
    MissingArray(String),

    #[error("no attribute named `{0}`")]
    MissingAttr(String),

    #[error("`{name}` holds {found} data, expected {expected}")]
    TypeMismatch { name: String, expected: &'static str, found: &'static str },

    #[error("`{name}` has extents {found:?}, expected {expected:?}")]
    ShapeMismatch { name: String, expected: Vec<usize>, found: Vec<usize> },

    #[error("corrupt store file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// ─────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────

/// A scalar attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    UInt(u64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Typed payload of a stored array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    F64(Vec<f64>),
    U64(Vec<u64>),
    I32(Vec<i32>),
}

impl ArrayData {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::F64(_) => "f64",
            Self::U64(_) => "u64",
            Self::I32(_) => "i32",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named dense array: row-major data plus its extents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArray {
    pub extents: Vec<usize>,
    pub data: ArrayData,
}

/// Element types that can live in a [`StoredArray`].
pub trait Element: Copy + Default + PartialEq + std::fmt::Debug {
    const TYPE_NAME: &'static str;

    fn into_data(values: Vec<Self>) -> ArrayData;

    fn from_data(data: ArrayData) -> Option<Vec<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl Element for $ty {
            const TYPE_NAME: &'static str = $name;

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn from_data(data: ArrayData) -> Option<Vec<Self>> {
                match data {
                    ArrayData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f64, F64, "f64");
impl_element!(u64, U64, "u64");
impl_element!(i32, I32, "i32");

// ─────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────

/// Keyed storage of dense arrays and scalar attributes.
///
/// Writing a name that already exists replaces it.
pub trait ArrayStore {
    fn write_array(&mut self, name: &str, array: StoredArray) -> Result<(), StoreError>;

    fn read_array(&self, name: &str) -> Result<StoredArray, StoreError>;

    fn write_attr(&mut self, name: &str, value: AttrValue) -> Result<(), StoreError>;

    fn read_attr(&self, name: &str) -> Result<AttrValue, StoreError>;

    fn has_array(&self, name: &str) -> bool {
        self.read_array(name).is_ok()
    }
}

// ─────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    attrs: BTreeMap<String, AttrValue>,
    arrays: BTreeMap<String, StoredArray>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArrayStore for MemoryStore {
    fn write_array(&mut self, name: &str, array: StoredArray) -> Result<(), StoreError> {
        self.arrays.insert(name.to_string(), array);
        Ok(())
    }

    fn read_array(&self, name: &str) -> Result<StoredArray, StoreError> {
        self.arrays
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::MissingArray(name.to_string()))
    }

    fn write_attr(&mut self, name: &str, value: AttrValue) -> Result<(), StoreError> {
        self.attrs.insert(name.to_string(), value);
        Ok(())
    }

    fn read_attr(&self, name: &str) -> Result<AttrValue, StoreError> {
        self.attrs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::MissingAttr(name.to_string()))
    }

    fn has_array(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }
}

// ─────────────────────────────────────────────
// FileStore
// ─────────────────────────────────────────────

/// A [`MemoryStore`] backed by one snapshot file.
///
/// Reads and writes only touch memory; call [`FileStore::flush`] to persist.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Start an empty store that will be written to `path`, replacing any
    /// existing file on the first flush.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), inner: MemoryStore::new() }
    }

    /// Load an existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let inner = read_snapshot(&path)?;
        debug!(path = %path.display(), "store snapshot loaded");
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current contents to disk atomically (temp file + rename).
    pub fn flush(&self) -> Result<(), StoreError> {
        let payload = bincode::serialize(&self.inner)?;
        let crc = crc32fast::hash(&payload);

        let tmp = tmp_path(&self.path);
        let io_err = |source| StoreError::Io { path: tmp.clone(), source };

        let file = File::create(&tmp).map_err(io_err)?;
        let mut w = BufWriter::new(file);
        w.write_all(&MAGIC.to_le_bytes()).map_err(io_err)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes()).map_err(io_err)?;
        w.write_all(&(payload.len() as u64).to_le_bytes()).map_err(io_err)?;
        w.write_all(&crc.to_le_bytes()).map_err(io_err)?;
        w.write_all(&payload).map_err(io_err)?;
        w.flush().map_err(io_err)?;
        w.get_ref().sync_data().map_err(io_err)?;
        drop(w);

        fs::rename(&tmp, &self.path)
            .map_err(|source| StoreError::Io { path: self.path.clone(), source })?;

        debug!(path = %self.path.display(), bytes = payload.len(), "store snapshot flushed");
        Ok(())
    }
}

impl ArrayStore for FileStore {
    fn write_array(&mut self, name: &str, array: StoredArray) -> Result<(), StoreError> {
        self.inner.write_array(name, array)
    }

    fn read_array(&self, name: &str) -> Result<StoredArray, StoreError> {
        self.inner.read_array(name)
    }

    fn write_attr(&mut self, name: &str, value: AttrValue) -> Result<(), StoreError> {
        self.inner.write_attr(name, value)
    }

    fn read_attr(&self, name: &str) -> Result<AttrValue, StoreError> {
        self.inner.read_attr(name)
    }

    fn has_array(&self, name: &str) -> bool {
        self.inner.has_array(name)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_snapshot(path: &Path) -> Result<MemoryStore, StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt { path: path.to_path_buf(), reason: reason.to_string() };

    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;

    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {version}")));
    }
    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(&header[8..16]);
    let len = u64::from_le_bytes(len_buf);
    if len > MAX_PAYLOAD_LEN || len != payload.len() as u64 {
        return Err(corrupt("payload length mismatch"));
    }
    let stored_crc = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
    if crc32fast::hash(payload) != stored_crc {
        return Err(corrupt("checksum mismatch"));
    }

    Ok(bincode::deserialize(payload)?)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_store() -> MemoryStore {
        let mut s = MemoryStore::new();
        s.write_attr("N", AttrValue::UInt(12)).unwrap();
        s.write_attr("mu", AttrValue::Float(4.15)).unwrap();
        s.write_attr("TITLE", AttrValue::Text("flatperm".into())).unwrap();
        s.write_array("sW", StoredArray { extents: vec![2, 3], data: ArrayData::F64(vec![1.0, 0.5, 0.0, 2.0, 0.0, 0.25]) })
            .unwrap();
        s.write_array("Sn", StoredArray { extents: vec![6], data: ArrayData::U64(vec![1, 2, 3, 4, 5, 6]) }).unwrap();
        s
    }

    #[test]
    fn memory_store_reads_back_what_was_written() {
        let s = sample_store();
        assert_eq!(s.read_attr("N").unwrap().as_u64(), Some(12));
        assert_eq!(s.read_attr("TITLE").unwrap().as_str(), Some("flatperm"));
        let sn = s.read_array("Sn").unwrap();
        assert_eq!(sn.extents, vec![6]);
        assert_eq!(sn.data, ArrayData::U64(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn missing_keys_are_reported_by_name() {
        let s = MemoryStore::new();
        assert!(matches!(s.read_array("Pru"), Err(StoreError::MissingArray(n)) if n == "Pru"));
        assert!(matches!(s.read_attr("mu"), Err(StoreError::MissingAttr(n)) if n == "mu"));
        assert!(!s.has_array("Pru"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.fps");

        let mut store = FileStore::create(&path);
        store.write_attr("N", AttrValue::UInt(8)).unwrap();
        store.write_attr("mu", AttrValue::Float(1.5)).unwrap();
        store.write_array("Enr", StoredArray { extents: vec![3], data: ArrayData::U64(vec![0, 7, 1]) }).unwrap();
        store.flush().unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.read_attr("N").unwrap(), AttrValue::UInt(8));
        assert_eq!(reopened.read_array("Enr").unwrap().data, ArrayData::U64(vec![0, 7, 1]));
        assert!(!tmp_path(&path).exists(), "temp file must be renamed away");
    }

    #[test]
    fn flush_replaces_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.fps");

        let mut store = FileStore::create(&path);
        store.write_attr("N", AttrValue::UInt(1)).unwrap();
        store.flush().unwrap();
        store.write_attr("N", AttrValue::UInt(2)).unwrap();
        store.flush().unwrap();

        assert_eq!(FileStore::open(&path).unwrap().read_attr("N").unwrap(), AttrValue::UInt(2));
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.fps");
        let mut store = FileStore::create(&path);
        store.write_array("sW", sample_store().read_array("sW").unwrap()).unwrap();
        store.flush().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        match FileStore::open(&path) {
            Err(StoreError::Corrupt { reason, .. }) => assert!(reason.contains("checksum")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-store");
        fs::write(&path, b"this is definitely not a flatperm store file").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn opening_a_missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(FileStore::open(dir.path().join("nope")), Err(StoreError::Io { .. })));
    }
}
