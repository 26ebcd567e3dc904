//! Reference genome retrieval for a finished catalog via NCBI E-utilities.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::domain::{Sha256Hex, TaxId};
use crate::error::VirotaxaError;
use crate::fs_util::{sha256_file, write_bytes_atomic, write_json_atomic};

pub const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DELAY_WITHOUT_KEY: Duration = Duration::from_millis(400);
pub const DELAY_WITH_KEY: Duration = Duration::from_millis(100);
pub const GENOME_METADATA_FILE: &str = "genomes.metadata.json";

pub trait GenomeClient: Send + Sync {
    /// Returns FASTA text for the given nucleotide accessions.
    fn fetch_fasta(&self, accessions: &[String]) -> Result<String, VirotaxaError>;

    fn has_api_key(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct NcbiEfetchClient {
    client: Client,
    base_url: String,
    email: String,
    api_key: Option<String>,
}

impl NcbiEfetchClient {
    pub fn new(email: impl Into<String>, api_key: Option<String>) -> Result<Self, VirotaxaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("virotaxa/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VirotaxaError::NcbiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| VirotaxaError::NcbiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: EFETCH_URL.to_string(),
            email: email.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, VirotaxaError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(VirotaxaError::NcbiHttp(err.to_string()));
                }
            }
        }
    }
}

impl GenomeClient for NcbiEfetchClient {
    fn fetch_fasta(&self, accessions: &[String]) -> Result<String, VirotaxaError> {
        let ids = accessions.join(",");
        let mut form = vec![
            ("db", "nucleotide"),
            ("rettype", "fasta"),
            ("retmode", "text"),
            ("tool", "virotaxa"),
            ("email", self.email.as_str()),
            ("id", ids.as_str()),
        ];
        if let Some(key) = &self.api_key {
            form.push(("api_key", key.as_str()));
        }
        let response = self.send_with_retries(|| self.client.post(&self.base_url).form(&form))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "efetch request failed".to_string());
            return Err(VirotaxaError::NcbiStatus { status, message });
        }
        response
            .text()
            .map_err(|err| VirotaxaError::NcbiHttp(err.to_string()))
    }

    fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub header: String,
    pub sequence: String,
}

impl FastaRecord {
    /// First word of the header, e.g. `NC_001802.1`.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }

    fn to_fasta(&self) -> String {
        format!(">{}\n{}\n", self.header, self.sequence)
    }
}

pub fn parse_fasta(text: &str) -> Vec<FastaRecord> {
    let mut records = Vec::new();
    let mut current: Option<FastaRecord> = None;
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            records.extend(current.take());
            current = Some(FastaRecord {
                header: header.trim().to_string(),
                sequence: String::new(),
            });
        } else if let Some(record) = current.as_mut() {
            record.sequence.push_str(line.trim());
        }
    }
    records.extend(current);
    records
}

/// Accession without its `.version` suffix.
pub fn accession_base(accession: &str) -> &str {
    accession.split('.').next().unwrap_or(accession)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomeFile {
    pub file: String,
    pub sequences: usize,
    pub bases: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenomeFetchResult {
    pub total_taxa: usize,
    pub total_sequences: usize,
    pub successful: usize,
    pub failed: Vec<String>,
    pub output_dir: String,
    pub files: BTreeMap<TaxId, GenomeFile>,
}

impl GenomeFetchResult {
    pub fn total_bases(&self) -> usize {
        self.files.values().map(|file| file.bases).sum()
    }
}

pub struct GenomeFetcher<'a, G: GenomeClient + ?Sized> {
    client: &'a G,
    batch_size: usize,
    delay: Duration,
}

impl<'a, G: GenomeClient + ?Sized> GenomeFetcher<'a, G> {
    pub fn new(client: &'a G) -> Self {
        let delay = if client.has_api_key() {
            DELAY_WITH_KEY
        } else {
            DELAY_WITHOUT_KEY
        };
        Self {
            client,
            batch_size: DEFAULT_BATCH_SIZE,
            delay,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetches every accession in `catalog` and writes one `<taxid>.fasta` per taxon that got
    /// at least one sequence. A failed batch marks its accessions failed and fetching
    /// continues.
    pub fn fetch(
        &self,
        catalog: &Catalog,
        output_dir: &Utf8Path,
    ) -> Result<GenomeFetchResult, VirotaxaError> {
        std::fs::create_dir_all(output_dir.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("create {output_dir}: {err}")))?;

        let mut owners: BTreeMap<String, TaxId> = BTreeMap::new();
        let mut accessions = Vec::new();
        for entry in catalog.entries() {
            for accession in &entry.refseq_ids {
                if owners
                    .insert(accession_base(accession).to_string(), entry.taxid)
                    .is_none()
                {
                    accessions.push(accession.clone());
                }
            }
        }

        let total_batches = accessions.len().div_ceil(self.batch_size);
        let mut sequences: BTreeMap<TaxId, Vec<FastaRecord>> = BTreeMap::new();
        let mut successful = 0usize;
        let mut failed = Vec::new();

        for (idx, batch) in accessions.chunks(self.batch_size).enumerate() {
            if idx > 0 {
                thread::sleep(self.delay);
            }
            info!(batch = idx + 1, total_batches, size = batch.len(), "fetching genomes");
            let fasta = match self.client.fetch_fasta(batch) {
                Ok(fasta) => fasta,
                Err(err) => {
                    warn!("batch {} failed: {err}", idx + 1);
                    failed.extend(batch.iter().cloned());
                    continue;
                }
            };

            let wanted: BTreeSet<&str> = batch.iter().map(|acc| accession_base(acc)).collect();
            let mut fetched = BTreeSet::new();
            for record in parse_fasta(&fasta) {
                let base = accession_base(record.id()).to_string();
                match owners.get(&base) {
                    Some(taxid) if wanted.contains(base.as_str()) => {
                        fetched.insert(base);
                        sequences.entry(*taxid).or_default().push(record);
                        successful += 1;
                    }
                    _ => warn!(id = record.id(), "sequence does not match the requested batch"),
                }
            }
            for accession in batch {
                if !fetched.contains(accession_base(accession)) {
                    warn!(accession = %accession, "no sequence returned");
                    failed.push(accession.clone());
                }
            }
        }

        let mut files = BTreeMap::new();
        for (taxid, records) in &sequences {
            let file = format!("{taxid}.fasta");
            let content: String = records.iter().map(FastaRecord::to_fasta).collect();
            write_bytes_atomic(&output_dir.join(&file), content.as_bytes())?;
            let bases = records.iter().map(|record| record.sequence.len()).sum();
            files.insert(
                *taxid,
                GenomeFile {
                    file,
                    sequences: records.len(),
                    bases,
                },
            );
        }

        info!(
            successful,
            requested = accessions.len(),
            failed = failed.len(),
            "genome fetch complete"
        );
        Ok(GenomeFetchResult {
            total_taxa: catalog.len(),
            total_sequences: accessions.len(),
            successful,
            failed,
            output_dir: output_dir.to_string(),
            files,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeFetchMetadata {
    #[serde(rename = "_version")]
    pub version: String,
    pub fetch: FetchInfo,
    pub source: CatalogSource,
    pub statistics: FetchStatistics,
    pub failed_accessions: Vec<String>,
    pub files: BTreeMap<TaxId, GenomeFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchInfo {
    pub timestamp: String,
    pub tool_version: String,
    pub ncbi_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSource {
    pub catalog_path: String,
    pub catalog_sha256: Option<Sha256Hex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchStatistics {
    pub total_taxa: usize,
    pub total_refseq_ids: usize,
    pub successful_fetches: usize,
    pub failed_fetches: usize,
    pub total_bases: usize,
}

impl GenomeFetchMetadata {
    pub fn new(
        result: &GenomeFetchResult,
        catalog_path: &Utf8Path,
        email: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, VirotaxaError> {
        let catalog_sha256 = if catalog_path.as_std_path().exists() {
            Some(sha256_file(catalog_path)?)
        } else {
            None
        };
        Ok(Self {
            version: "1.0".to_string(),
            fetch: FetchInfo {
                timestamp: fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                ncbi_email: email.to_string(),
            },
            source: CatalogSource {
                catalog_path: catalog_path.to_string(),
                catalog_sha256,
            },
            statistics: FetchStatistics {
                total_taxa: result.total_taxa,
                total_refseq_ids: result.total_sequences,
                successful_fetches: result.successful,
                failed_fetches: result.failed.len(),
                total_bases: result.total_bases(),
            },
            failed_accessions: result.failed.clone(),
            files: result.files.clone(),
        })
    }

    /// Writes `genomes.metadata.json` into the result's output directory.
    pub fn save(&self, output_dir: &Utf8Path) -> Result<Utf8PathBuf, VirotaxaError> {
        let path = output_dir.join(GENOME_METADATA_FILE);
        write_json_atomic(&path, self)?;
        Ok(path)
    }
}
