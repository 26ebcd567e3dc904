use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use reqwest::blocking::Client;
use reqwest::header::{
    CONTENT_LENGTH, DATE, ETAG, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED, USER_AGENT,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::Sha256Hex;
use crate::error::VirotaxaError;
use crate::fs_util::{read_json, write_bytes_atomic, write_json_atomic};

pub const VHDB_URL: &str = "https://www.genome.jp/ftp/db/virushostdb/virushostdb.tsv";

/// Server headers that identify which release of the source was served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeaders {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub content_length: Option<String>,
    pub date: Option<String>,
}

impl HttpHeaders {
    fn from_map(headers: &HeaderMap) -> Self {
        let get = |name: HeaderName| {
            headers
                .get(&name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            last_modified: get(LAST_MODIFIED),
            etag: get(ETAG),
            content_length: get(CONTENT_LENGTH),
            date: get(DATE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProvenance {
    pub url: String,
    pub download_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub file_size_bytes: u64,
    pub sha256: Sha256Hex,
    #[serde(default)]
    pub http_headers: HttpHeaders,
}

#[derive(Debug, Clone)]
pub struct DownloadedSource {
    pub bytes: Vec<u8>,
    pub provenance: DownloadProvenance,
}

impl DownloadedSource {
    /// Wraps bytes obtained from `url`, stamping them with the current time and digest.
    pub fn new(url: &str, bytes: Vec<u8>, http_headers: HttpHeaders) -> Self {
        let provenance = DownloadProvenance {
            url: url.to_string(),
            download_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            file_path: None,
            file_size_bytes: bytes.len() as u64,
            sha256: Sha256Hex::compute(&bytes),
            http_headers,
        };
        Self { bytes, provenance }
    }
}

pub trait SourceClient: Send + Sync {
    fn download(&self, url: &str) -> Result<DownloadedSource, VirotaxaError>;
}

#[derive(Clone)]
pub struct VhdbHttpClient {
    client: Client,
}

impl VhdbHttpClient {
    pub fn new() -> Result<Self, VirotaxaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("virotaxa/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VirotaxaError::SourceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| VirotaxaError::SourceHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl SourceClient for VhdbHttpClient {
    fn download(&self, url: &str) -> Result<DownloadedSource, VirotaxaError> {
        info!(url, "downloading virus-host database");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| VirotaxaError::SourceHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "source request failed".to_string());
            return Err(VirotaxaError::SourceStatus { status, message });
        }
        let headers = HttpHeaders::from_map(response.headers());
        let bytes = response
            .bytes()
            .map_err(|err| VirotaxaError::SourceHttp(err.to_string()))?
            .to_vec();
        let source = DownloadedSource::new(url, bytes, headers);
        info!(
            bytes = source.provenance.file_size_bytes,
            hash = %source.provenance.sha256,
            "download complete"
        );
        Ok(source)
    }
}

/// `vhdb.tsv` -> `vhdb.metadata.json`.
pub fn provenance_path_for(path: &Utf8Path) -> Utf8PathBuf {
    path.with_extension("metadata.json")
}

/// Writes the downloaded table to `output` with its provenance alongside.
pub fn save_download(
    source: &DownloadedSource,
    output: &Utf8Path,
) -> Result<DownloadProvenance, VirotaxaError> {
    write_bytes_atomic(output, &source.bytes)?;
    let mut provenance = source.provenance.clone();
    provenance.file_path = Some(output.to_string());
    write_json_atomic(&provenance_path_for(output), &provenance)?;
    info!(path = %output, "saved source and provenance");
    Ok(provenance)
}

/// Provenance recorded next to a previously downloaded table, if any.
pub fn read_provenance(path: &Utf8Path) -> Result<Option<DownloadProvenance>, VirotaxaError> {
    let metadata_path = provenance_path_for(path);
    if !metadata_path.as_std_path().exists() {
        return Ok(None);
    }
    read_json(&metadata_path).map(Some)
}
