use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord};
use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{CatalogMode, EvidenceType, TaxId};
use crate::error::VirotaxaError;
use crate::filters::HostFilter;
use crate::taxonomy::{HostRef, Lineage, TaxonomyResolver, ViralTaxonomy};

/// Positional column layout of `virushostdb.tsv`.
pub const VHDB_COLUMNS: [&str; 14] = [
    "virus_tax_id",
    "virus_name",
    "virus_lineage",
    "refseq_id",
    "KEGG_GENOME",
    "KEGG_DISEASE",
    "DISEASE",
    "host_tax_id",
    "host_name",
    "host_lineage",
    "pmid",
    "evidence",
    "sample_type",
    "source_organism",
];

const COL_VIRUS_TAXID: usize = 0;
const COL_VIRUS_NAME: usize = 1;
const COL_VIRUS_LINEAGE: usize = 2;
const COL_REFSEQ: usize = 3;
const COL_DISEASE: usize = 6;
const COL_HOST_TAXID: usize = 7;
const COL_HOST_NAME: usize = 8;
const COL_HOST_LINEAGE: usize = 9;
const COL_PMID: usize = 10;
const COL_EVIDENCE: usize = 11;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One virus-host relationship row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirusHostRecord {
    pub virus_taxid: TaxId,
    pub virus_name: String,
    pub virus_lineage: Lineage,
    pub host_taxid: Option<TaxId>,
    pub host_name: String,
    pub host_lineage: Lineage,
    pub evidence: EvidenceType,
    pub refseq_ids: Vec<String>,
    pub pmid: Option<String>,
    pub disease: Option<String>,
}

impl VirusHostRecord {
    pub fn host(&self) -> HostRef<'_> {
        HostRef {
            taxid: self.host_taxid,
            lineage: &self.host_lineage,
        }
    }

    pub fn taxonomy(&self) -> ViralTaxonomy {
        ViralTaxonomy::from_lineage(&self.virus_lineage)
    }

    pub fn has_refseq(&self) -> bool {
        !self.refseq_ids.is_empty()
    }

    /// Parses one data row. `row` is the 1-based line number used in error reports.
    pub fn from_row(record: &StringRecord, row: usize) -> Result<Self, VirotaxaError> {
        let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
        let malformed = |reason: String| VirotaxaError::MalformedRecord { row, reason };

        let raw_taxid = field(COL_VIRUS_TAXID);
        if raw_taxid.is_empty() {
            return Err(malformed("missing virus_tax_id".to_string()));
        }
        let virus_taxid = raw_taxid
            .parse::<TaxId>()
            .map_err(|_| malformed(format!("virus_tax_id is not an integer: {raw_taxid}")))?;

        let virus_name = field(COL_VIRUS_NAME);
        if virus_name.is_empty() {
            return Err(malformed("missing virus_name".to_string()));
        }

        let raw_host = field(COL_HOST_TAXID);
        let host_taxid = if raw_host.is_empty() {
            None
        } else {
            Some(
                raw_host
                    .parse::<TaxId>()
                    .map_err(|_| malformed(format!("host_tax_id is not an integer: {raw_host}")))?,
            )
        };

        Ok(Self {
            virus_taxid,
            virus_name: virus_name.to_string(),
            virus_lineage: Lineage::parse_viral(field(COL_VIRUS_LINEAGE)),
            host_taxid,
            host_name: field(COL_HOST_NAME).to_string(),
            host_lineage: Lineage::parse_host(field(COL_HOST_LINEAGE)),
            evidence: EvidenceType::from(field(COL_EVIDENCE)),
            refseq_ids: parse_refseq_ids(field(COL_REFSEQ)),
            pmid: non_empty(field(COL_PMID)),
            disease: non_empty(field(COL_DISEASE)),
        })
    }
}

/// Splits a RefSeq field on `,` or `;`, dropping blanks and repeats.
pub fn parse_refseq_ids(value: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|acc| !acc.is_empty())
        .filter(|acc| seen.insert(acc.to_string()))
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parsed view of a Virus-Host DB source file.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<VirusHostRecord>,
    malformed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub total_relationships: usize,
    pub unique_viruses: usize,
    pub unique_hosts: usize,
    pub malformed_records: usize,
    pub evidence_distribution: BTreeMap<String, usize>,
}

impl RecordStore {
    pub fn from_records(records: Vec<VirusHostRecord>) -> Self {
        Self {
            records,
            malformed: 0,
        }
    }

    /// Parses raw source bytes; gzip input is detected by magic number.
    pub fn parse(bytes: &[u8]) -> Result<Self, VirotaxaError> {
        if bytes.starts_with(&GZIP_MAGIC) {
            debug!("source is gzip-compressed");
            Self::from_reader(GzDecoder::new(bytes))
        } else {
            Self::from_reader(bytes)
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, VirotaxaError> {
        let bytes = std::fs::read(path.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("read {path}: {err}")))?;
        let store = Self::parse(&bytes)?;
        info!(
            path = %path,
            records = store.len(),
            malformed = store.malformed(),
            "loaded virus-host relationships"
        );
        Ok(store)
    }

    /// Rows with bad fields or invalid UTF-8 are skipped and counted; a failing stream
    /// (I/O or gzip decode) aborts the parse.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, VirotaxaError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut records = Vec::new();
        let mut malformed = 0usize;
        for (idx, row) in reader.records().enumerate() {
            let line = idx + 2;
            let parsed = match row {
                Ok(row) => VirusHostRecord::from_row(&row, line),
                Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(VirotaxaError::parse(
                        "source table",
                        format!("stream failed near row {line}: {err}"),
                    ));
                }
                Err(err) => Err(VirotaxaError::MalformedRecord {
                    row: line,
                    reason: err.to_string(),
                }),
            };
            match parsed {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!("skipping row: {err}");
                    malformed += 1;
                }
            }
        }

        Ok(Self { records, malformed })
    }

    pub fn records(&self) -> &[VirusHostRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<VirusHostRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows skipped because a required field was missing or unparsable.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn summary(&self) -> RecordSummary {
        let unique_viruses = self
            .records
            .iter()
            .map(|record| record.virus_taxid)
            .collect::<BTreeSet<_>>()
            .len();
        let unique_hosts = self
            .records
            .iter()
            .filter_map(|record| record.host_taxid)
            .collect::<BTreeSet<_>>()
            .len();
        let mut evidence_distribution = BTreeMap::new();
        for record in &self.records {
            *evidence_distribution
                .entry(record.evidence.to_string())
                .or_insert(0) += 1;
        }
        RecordSummary {
            total_relationships: self.records.len(),
            unique_viruses,
            unique_hosts,
            malformed_records: self.malformed,
            evidence_distribution,
        }
    }

    /// Viral families among the records whose hosts pass `mode`.
    pub fn family_counts(&self, resolver: &TaxonomyResolver, mode: CatalogMode) -> Vec<(String, usize)> {
        let hosts = HostFilter::new(resolver).apply(self.records.clone(), mode);
        family_counts(&hosts.records)
    }
}

/// Counts relationships per viral family, largest first, ties broken by name.
pub fn family_counts(records: &[VirusHostRecord]) -> Vec<(String, usize)> {
    let mut counts = BTreeMap::<String, usize>::new();
    for record in records {
        if let Some(family) = record.taxonomy().family {
            *counts.entry(family).or_insert(0) += 1;
        }
    }
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}
