//! Content-addressed cache of source tables.
//!
//! Each stored table is kept as `vhdb_<first 12 hex>.tsv` under the cache root and indexed in
//! `registry.json` by its full SHA-256. Entries are never removed, so a hash recorded in a
//! catalog's metadata keeps resolving to the exact bytes it was built from. Reads re-hash the
//! file and refuse bytes that no longer match their registry key.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{HashPrefix, Sha256Hex};
use crate::download::{DownloadProvenance, DownloadedSource, read_provenance};
use crate::error::VirotaxaError;
use crate::fs_util::{
    copy_file_atomic, read_json, sha256_file, write_bytes_atomic, write_json_atomic,
};

pub const REGISTRY_FILE: &str = "registry.json";
const REGISTRY_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryIndex {
    #[serde(rename = "_version")]
    version: String,
    entries: BTreeMap<Sha256Hex, RegistryRecord>,
}

impl Default for RegistryIndex {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryRecord {
    filename: String,
    cached_at: String,
    file_size_bytes: u64,
    #[serde(default)]
    download_metadata: Option<DownloadProvenance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub hash: Sha256Hex,
    pub short_hash: String,
    pub path: String,
    pub cached_at: String,
    pub size_bytes: u64,
    pub download: Option<DownloadProvenance>,
}

impl CacheEntry {
    pub fn file(&self) -> &Utf8Path {
        Utf8Path::new(&self.path)
    }

    fn check(&self, actual: Sha256Hex) -> Result<(), VirotaxaError> {
        if actual == self.hash {
            return Ok(());
        }
        Err(VirotaxaError::CacheCorrupted {
            expected: self.hash.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeMode {
    Copy,
    /// Symlink to the cached file; falls back to a copy where symlinks are unavailable.
    Link,
}

#[derive(Debug, Clone)]
pub struct CacheRegistry {
    root: Utf8PathBuf,
}

impl CacheRegistry {
    /// Opens (creating if needed) the cache rooted at `root`.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, VirotaxaError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("create cache {root}: {err}")))?;
        Ok(Self { root })
    }

    /// `$HOME/.virotaxa/cache/vhdb`.
    pub fn default_root() -> Result<Utf8PathBuf, VirotaxaError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".virotaxa").join("cache").join("vhdb"),
                )
                .ok()
            })
            .ok_or_else(|| VirotaxaError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn registry_path(&self) -> Utf8PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn store(&self, bytes: &[u8]) -> Result<Sha256Hex, VirotaxaError> {
        self.insert(bytes, None, Utc::now())
    }

    /// Stores a local file, carrying over download provenance found next to it.
    pub fn store_file(&self, path: &Utf8Path) -> Result<Sha256Hex, VirotaxaError> {
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("read {path}: {err}")))?;
        let provenance = read_provenance(path)?;
        self.insert(&bytes, provenance, Utc::now())
    }

    pub fn store_download(&self, source: &DownloadedSource) -> Result<Sha256Hex, VirotaxaError> {
        self.insert(&source.bytes, Some(source.provenance.clone()), Utc::now())
    }

    fn insert(
        &self,
        bytes: &[u8],
        download: Option<DownloadProvenance>,
        cached_at: DateTime<Utc>,
    ) -> Result<Sha256Hex, VirotaxaError> {
        let hash = Sha256Hex::compute(bytes);
        let mut index = self.load_index()?;

        if let Some(existing) = index.entries.get(&hash) {
            let path = self.root.join(&existing.filename);
            if path.as_std_path().exists() && sha256_file(&path)? == hash {
                debug!(hash = %hash, "source already cached");
                return Ok(hash);
            }
            write_bytes_atomic(&path, bytes)?;
            info!(hash = %hash, path = %path, "restored cache file");
            return Ok(hash);
        }

        let filename = self.filename_for(&hash, &index);
        let path = self.root.join(&filename);
        write_bytes_atomic(&path, bytes)?;
        index.entries.insert(
            hash.clone(),
            RegistryRecord {
                filename,
                cached_at: cached_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                file_size_bytes: bytes.len() as u64,
                download_metadata: download,
            },
        );
        self.save_index(&index)?;
        info!(hash = %hash, path = %path, bytes = bytes.len(), "cached source");
        Ok(hash)
    }

    // Short names collide only across distinct full hashes; fall back to the full digest.
    fn filename_for(&self, hash: &Sha256Hex, index: &RegistryIndex) -> String {
        let short = format!("vhdb_{}.tsv", hash.short());
        if index.entries.values().any(|record| record.filename == short) {
            format!("vhdb_{hash}.tsv")
        } else {
            short
        }
    }

    /// Resolves a hash prefix to exactly one cached entry.
    pub fn resolve(&self, prefix: &HashPrefix) -> Result<CacheEntry, VirotaxaError> {
        let mut matches: Vec<CacheEntry> = self
            .entries()?
            .into_iter()
            .filter(|entry| entry.hash.starts_with(prefix))
            .collect();
        match matches.len() {
            0 => Err(VirotaxaError::HashNotFound(prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(VirotaxaError::AmbiguousHash {
                prefix: prefix.to_string(),
                matches: matches.into_iter().map(|entry| entry.short_hash).collect(),
            }),
        }
    }

    pub fn retrieve(&self, prefix: &HashPrefix) -> Result<Utf8PathBuf, VirotaxaError> {
        self.resolve(prefix).map(|entry| entry.file().to_path_buf())
    }

    /// Resolves `prefix` and reads the cached bytes, failing if they no longer hash to the entry.
    pub fn load(&self, prefix: &HashPrefix) -> Result<(CacheEntry, Vec<u8>), VirotaxaError> {
        let entry = self.resolve(prefix)?;
        let bytes = fs::read(entry.file().as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("read {}: {err}", entry.path)))?;
        entry.check(Sha256Hex::compute(&bytes))?;
        Ok((entry, bytes))
    }

    pub fn read(&self, prefix: &HashPrefix) -> Result<Vec<u8>, VirotaxaError> {
        self.load(prefix).map(|(_, bytes)| bytes)
    }

    /// Entries whose files are present, newest first; ties by hash.
    pub fn list(&self) -> Result<Vec<CacheEntry>, VirotaxaError> {
        let mut entries = self.entries()?;
        entries.sort_by(|a, b| {
            b.cached_at
                .cmp(&a.cached_at)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        Ok(entries)
    }

    /// Places the cached file at `dest`, replacing whatever is there.
    pub fn materialize(
        &self,
        prefix: &HashPrefix,
        dest: &Utf8Path,
        mode: MaterializeMode,
    ) -> Result<CacheEntry, VirotaxaError> {
        let entry = self.resolve(prefix)?;
        entry.check(sha256_file(entry.file())?)?;
        match mode {
            MaterializeMode::Copy => copy_file_atomic(entry.file(), dest)?,
            MaterializeMode::Link => link_file(entry.file(), dest)?,
        }
        info!(hash = %entry.hash, dest = %dest, ?mode, "materialized cached source");
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<CacheEntry>, VirotaxaError> {
        let index = self.load_index()?;
        Ok(index
            .entries
            .into_iter()
            .filter_map(|(hash, record)| {
                let path = self.root.join(&record.filename);
                if !path.as_std_path().exists() {
                    debug!(hash = %hash, "registry entry without file");
                    return None;
                }
                Some(CacheEntry {
                    short_hash: hash.short().to_string(),
                    hash,
                    path: path.into_string(),
                    cached_at: record.cached_at,
                    size_bytes: record.file_size_bytes,
                    download: record.download_metadata,
                })
            })
            .collect())
    }

    fn load_index(&self) -> Result<RegistryIndex, VirotaxaError> {
        let path = self.registry_path();
        if !path.as_std_path().exists() {
            return Ok(RegistryIndex::default());
        }
        read_json(&path)
    }

    fn save_index(&self, index: &RegistryIndex) -> Result<(), VirotaxaError> {
        write_json_atomic(&self.registry_path(), index)
    }
}

#[cfg(unix)]
fn link_file(source: &Utf8Path, dest: &Utf8Path) -> Result<(), VirotaxaError> {
    crate::fs_util::ensure_parent(dest)?;
    if dest.as_std_path().symlink_metadata().is_ok() {
        fs::remove_file(dest.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("remove {dest}: {err}")))?;
    }
    let source = fs::canonicalize(source.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("resolve {source}: {err}")))?;
    std::os::unix::fs::symlink(&source, dest.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("link {dest}: {err}")))
}

#[cfg(not(unix))]
fn link_file(source: &Utf8Path, dest: &Utf8Path) -> Result<(), VirotaxaError> {
    copy_file_atomic(source, dest)
}
