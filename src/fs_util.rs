use std::fs;
use std::io::{self, Read, Write};

use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::domain::Sha256Hex;
use crate::error::VirotaxaError;

pub fn ensure_parent(path: &Utf8Path) -> Result<(), VirotaxaError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("create {parent}: {err}")))?;
    }
    Ok(())
}

/// Writes through a sibling temp file and renames it over `path`.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), VirotaxaError> {
    ensure_parent(path)?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".virotaxa-write")
        .tempfile_in(dir.as_std_path())
        .map_err(VirotaxaError::fs)?;
    temp.write_all(content).map_err(VirotaxaError::fs)?;
    temp.flush().map_err(VirotaxaError::fs)?;
    temp.persist(path.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("write {path}: {err}")))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), VirotaxaError> {
    let mut content = serde_json::to_vec_pretty(value).map_err(VirotaxaError::fs)?;
    content.push(b'\n');
    write_bytes_atomic(path, &content)
}

pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, VirotaxaError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content).map_err(|err| VirotaxaError::parse(path.as_str(), err))
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), VirotaxaError> {
    ensure_parent(dest)?;
    let dir = dest
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".virotaxa-copy")
        .tempfile_in(dir.as_std_path())
        .map_err(VirotaxaError::fs)?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| VirotaxaError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("write {dest}: {err}")))?;
    Ok(())
}

/// Streams a file through SHA-256 without loading it whole.
pub fn sha256_file(path: &Utf8Path) -> Result<Sha256Hex, VirotaxaError> {
    let mut file = fs::File::open(path.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("open {path}: {err}")))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(VirotaxaError::Filesystem(format!("read {path}: {err}"))),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(Sha256Hex::from_hasher(hasher))
}
