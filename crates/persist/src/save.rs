//! Save-slot persistence behind a small key/bytes interface.
//!
//! File layout inside the store directory:
//! ```text
//! store.meta.json          - metadata and schema version
//! saves/
//!   <key>.bin              - encoded dataset bytes
//! integrity/
//!   manifest.json          - sha256 per save slot
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const STORE_SCHEMA_VERSION: u32 = 1;

/// Errors from save-slot operations.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {key:?}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("invalid save key {0:?}")]
    InvalidKey(String),
}

/// Opaque byte storage keyed by slot name.
pub trait SaveStore {
    /// `Ok(None)` when nothing was saved under `key`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SaveError>;

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), SaveError>;
}

/// In-memory store for tests and headless simulation.
#[derive(Debug, Default, Clone)]
pub struct MemorySaveStore {
    slots: BTreeMap<String, Vec<u8>>,
    writes: usize,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Overwrite raw bytes without counting a write; used to simulate corruption.
    pub fn put_raw(&mut self, key: &str, bytes: Vec<u8>) {
        self.slots.insert(key.to_string(), bytes);
    }
}

impl SaveStore for MemorySaveStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SaveError> {
        validate_key(key)?;
        Ok(self.slots.get(key).cloned())
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), SaveError> {
        validate_key(key)?;
        self.slots.insert(key.to_string(), bytes.to_vec());
        self.writes += 1;
        Ok(())
    }
}

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub saves_written: u64,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

/// File-backed save store with schema versioning and integrity checking.
pub struct FileSaveStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
}

impl FileSaveStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SaveError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("saves"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != STORE_SCHEMA_VERSION {
                return Err(SaveError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                schema_version: STORE_SCHEMA_VERSION,
                saves_written: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        tracing::debug!(root = %root.display(), slots = manifest.entries.len(), "save store opened");
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    /// Re-hash every slot against the manifest.
    pub fn verify_integrity(&self) -> Result<(), SaveError> {
        for (key, entry) in &self.manifest.entries {
            let data = std::fs::read(self.root.join("saves").join(&entry.filename))?;
            check_hash(key, entry, &data)?;
        }
        Ok(())
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.root.join("saves").join(slot_filename(key))
    }

    fn save_meta(&self) -> Result<(), SaveError> {
        let path = self.root.join("store.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), SaveError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

impl SaveStore for FileSaveStore {
    /// Fails closed when the file does not match its manifest hash.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SaveError> {
        validate_key(key)?;
        let path = self.slot_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        if let Some(entry) = self.manifest.entries.get(key) {
            check_hash(key, entry, &data)?;
        }
        Ok(Some(data))
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), SaveError> {
        validate_key(key)?;
        let filename = slot_filename(key);
        let path = self.root.join("saves").join(&filename);

        // Rename over the old slot so readers never see a half-written file.
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;

        self.manifest.entries.insert(
            key.to_string(),
            ManifestEntry {
                filename,
                sha256: sha256_hex(bytes),
                size: bytes.len() as u64,
            },
        );
        self.meta.saves_written += 1;
        self.save_meta()?;
        self.save_manifest()?;
        tracing::debug!(key, bytes = bytes.len(), "save slot written");
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), SaveError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(SaveError::InvalidKey(key.to_string()))
    }
}

fn slot_filename(key: &str) -> String {
    format!("{key}.bin")
}

fn check_hash(key: &str, entry: &ManifestEntry, data: &[u8]) -> Result<(), SaveError> {
    let actual = sha256_hex(data);
    if actual != entry.sha256 {
        return Err(SaveError::IntegrityMismatch {
            key: key.to_string(),
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
