use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{AssembledCatalog, BuildParameters, StageCounts};
use crate::domain::{CatalogMode, PrimateHomologMode, Sha256Hex, TaxId};
use crate::download::DownloadProvenance;
use crate::error::VirotaxaError;
use crate::filters::EvidencePriority;
use crate::fs_util::{read_json, write_json_atomic};
use crate::taxonomy::HUMAN_TAXID;

pub const METADATA_VERSION: &str = "1.0";
pub const TOP_FAMILIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    #[serde(rename = "_version")]
    pub version: String,
    pub generation: GenerationInfo,
    pub environment: EnvironmentInfo,
    pub source: SourceInfo,
    pub parameters: ParameterInfo,
    pub filters_applied: FiltersApplied,
    pub statistics: Statistics,
    pub reproducibility: Reproducibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub timestamp: String,
    pub tool_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub tool: String,
}

impl EnvironmentInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool: format!("virotaxa {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Identity of the table a catalog was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub sha256: Sha256Hex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Set when the source was taken from the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hash: Option<Sha256Hex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadProvenance>,
}

impl SourceInfo {
    pub fn new(sha256: Sha256Hex) -> Self {
        Self {
            sha256,
            file_path: None,
            cache_hash: None,
            download: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    #[serde(flatten)]
    pub build: BuildParameters,
    pub mode_description: String,
    pub human_taxid: TaxId,
    pub bacteriophage_families_excluded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiltersApplied {
    pub host_filter: String,
    pub requires_refseq: bool,
    pub evidence_priority: Vec<String>,
    pub stage_counts: StageCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyCount {
    pub family: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_taxa: usize,
    pub unique_families: usize,
    pub total_refseq_entries: usize,
    pub evidence_distribution: BTreeMap<String, usize>,
    pub top_families: Vec<FamilyCount>,
    pub malformed_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reproducibility {
    pub commands: Vec<String>,
    pub verification: String,
}

/// `catalog.tsv` -> `catalog.metadata.json`.
pub fn metadata_path_for(catalog_path: &Utf8Path) -> Utf8PathBuf {
    catalog_path.with_extension("metadata.json")
}

pub struct MetadataGenerator<'a> {
    priority: &'a EvidencePriority,
    phage_families: usize,
}

impl<'a> MetadataGenerator<'a> {
    pub fn new(priority: &'a EvidencePriority, phage_families: usize) -> Self {
        Self {
            priority,
            phage_families,
        }
    }

    /// Describes `assembled` without touching the filesystem. `catalog_path` only feeds the
    /// reproducibility commands.
    pub fn generate(
        &self,
        assembled: &AssembledCatalog,
        source: SourceInfo,
        params: &BuildParameters,
        generated_at: DateTime<Utc>,
        catalog_path: Option<&Utf8Path>,
    ) -> CatalogMetadata {
        let catalog = &assembled.catalog;
        let statistics = Statistics {
            total_taxa: catalog.len(),
            unique_families: catalog.unique_families(),
            total_refseq_entries: catalog.total_refseq_entries(),
            evidence_distribution: catalog.evidence_distribution(),
            top_families: catalog
                .top_families(TOP_FAMILIES)
                .into_iter()
                .map(|(family, count)| FamilyCount { family, count })
                .collect(),
            malformed_records: assembled.counts.malformed_records,
        };
        let output = catalog_path.map_or("<output.tsv>".to_string(), |path| path.to_string());

        CatalogMetadata {
            version: METADATA_VERSION.to_string(),
            generation: GenerationInfo {
                timestamp: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            environment: EnvironmentInfo::current(),
            parameters: ParameterInfo {
                build: params.clone(),
                mode_description: params.mode.description().to_string(),
                human_taxid: HUMAN_TAXID,
                bacteriophage_families_excluded: if params.exclude_bacteriophages {
                    self.phage_families
                } else {
                    0
                },
            },
            filters_applied: FiltersApplied {
                host_filter: match params.mode {
                    CatalogMode::Clinical => "human_only".to_string(),
                    other => other.to_string(),
                },
                requires_refseq: true,
                evidence_priority: self.priority.labels(),
                stage_counts: assembled.counts.clone(),
            },
            statistics,
            reproducibility: Reproducibility {
                commands: reproduce_commands(&source, params, &output),
                verification: format!("virotaxa catalog validate {output}"),
            },
            source,
        }
    }
}

fn reproduce_commands(source: &SourceInfo, params: &BuildParameters, output: &str) -> Vec<String> {
    let mut build = String::from("virotaxa catalog build");
    let mut commands = Vec::new();
    match (&source.cache_hash, &source.file_path) {
        (Some(hash), _) => build.push_str(&format!(" --from-cache {}", hash.short())),
        (None, Some(path)) => {
            commands.push(format!("virotaxa download -o {path}"));
            build.push_str(&format!(" {path}"));
        }
        (None, None) => build.push_str(" <vhdb.tsv>"),
    }
    build.push_str(&format!(" --mode {}", params.mode));
    if !params.exclude_bacteriophages {
        build.push_str(" --include-bacteriophages");
    }
    if params.primate_homologs != PrimateHomologMode::None {
        build.push_str(&format!(" --primate-homologs {}", params.primate_homologs));
    }
    if let Some(families) = &params.primate_families {
        let joined = families.iter().cloned().collect::<Vec<_>>().join(",");
        build.push_str(&format!(" --primate-families {joined}"));
    }
    build.push_str(&format!(" -o {output}"));
    commands.push(build);
    commands
}

pub fn write_metadata(path: &Utf8Path, metadata: &CatalogMetadata) -> Result<(), VirotaxaError> {
    write_json_atomic(path, metadata)
}

pub fn read_metadata(path: &Utf8Path) -> Result<CatalogMetadata, VirotaxaError> {
    if !path.as_std_path().exists() {
        return Err(VirotaxaError::Filesystem(format!(
            "metadata file not found: {path}"
        )));
    }
    read_json(path)
}
