use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::domain::Sha256Hex;
use crate::error::VirotaxaError;
use crate::fs_util::sha256_file;
use crate::metadata::{CatalogMetadata, metadata_path_for, read_metadata};

/// A named disagreement between a catalog, its metadata and its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    TaxaCount { catalog: usize, metadata: usize },
    FamilyCount { catalog: usize, metadata: usize },
    SourceHash { recorded: Sha256Hex, actual: Sha256Hex },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::TaxaCount { catalog, metadata } => write!(
                f,
                "taxa count mismatch: catalog has {catalog}, metadata says {metadata}"
            ),
            Discrepancy::FamilyCount { catalog, metadata } => write!(
                f,
                "family count mismatch: catalog has {catalog}, metadata says {metadata}"
            ),
            Discrepancy::SourceHash { recorded, actual } => write!(
                f,
                "source changed since generation: recorded {}, found {}",
                recorded.short(),
                actual.short()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub discrepancies: Vec<Discrepancy>,
    pub warnings: Vec<String>,
    pub info: BTreeMap<String, String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn into_result(self) -> Result<Self, VirotaxaError> {
        if self.is_valid() {
            return Ok(self);
        }
        Err(VirotaxaError::ValidationMismatch(
            self.discrepancies.iter().map(ToString::to_string).collect(),
        ))
    }
}

pub struct Validator;

impl Validator {
    /// Compares recorded statistics and source hash against what is actually on hand.
    /// A missing `source` only produces a warning.
    pub fn validate(
        catalog: &Catalog,
        metadata: &CatalogMetadata,
        source: Option<&Utf8Path>,
    ) -> Result<ValidationReport, VirotaxaError> {
        let mut report = ValidationReport::default();
        report
            .info
            .insert("catalog_rows".to_string(), catalog.len().to_string());
        report
            .info
            .insert("metadata_version".to_string(), metadata.version.clone());
        report.info.insert(
            "generated_at".to_string(),
            metadata.generation.timestamp.clone(),
        );
        report.info.insert(
            "tool_version".to_string(),
            metadata.generation.tool_version.clone(),
        );
        report.info.insert(
            "mode".to_string(),
            metadata.parameters.build.mode.to_string(),
        );

        let stats = &metadata.statistics;
        if catalog.len() != stats.total_taxa {
            report.discrepancies.push(Discrepancy::TaxaCount {
                catalog: catalog.len(),
                metadata: stats.total_taxa,
            });
        } else {
            report.info.insert("taxa_count_verified".to_string(), "yes".to_string());
        }

        let families = catalog.unique_families();
        if families != stats.unique_families {
            report.discrepancies.push(Discrepancy::FamilyCount {
                catalog: families,
                metadata: stats.unique_families,
            });
        } else {
            report.info.insert("family_count_verified".to_string(), "yes".to_string());
        }

        match source {
            Some(path) if path.as_std_path().exists() => {
                let actual = sha256_file(path)?;
                if actual != metadata.source.sha256 {
                    report.discrepancies.push(Discrepancy::SourceHash {
                        recorded: metadata.source.sha256.clone(),
                        actual,
                    });
                } else {
                    report.info.insert("source_hash_verified".to_string(), "yes".to_string());
                }
            }
            Some(path) => {
                report.warnings.push(format!("source not found: {path}"));
                report.info.insert(
                    "recorded_source_hash".to_string(),
                    metadata.source.sha256.short().to_string(),
                );
            }
            None => {
                report
                    .warnings
                    .push("no source path recorded; source hash not checked".to_string());
            }
        }

        for warning in &report.warnings {
            warn!("{warning}");
        }
        info!(
            discrepancies = report.discrepancies.len(),
            warnings = report.warnings.len(),
            "validated catalog"
        );
        Ok(report)
    }
}

/// Loads `catalog_path` and its sibling metadata and validates them. The source is
/// `source_override` when given, else the path recorded in the metadata.
pub fn validate_catalog_file(
    catalog_path: &Utf8Path,
    source_override: Option<&Utf8Path>,
) -> Result<ValidationReport, VirotaxaError> {
    if !catalog_path.as_std_path().exists() {
        return Err(VirotaxaError::Filesystem(format!(
            "catalog file not found: {catalog_path}"
        )));
    }
    let metadata = read_metadata(&metadata_path_for(catalog_path))?;
    let catalog = Catalog::load(catalog_path)?;
    let recorded = metadata.source.file_path.as_deref().map(Utf8PathBuf::from);
    let source = source_override.or(recorded.as_deref());
    Validator::validate(&catalog, &metadata, source)
}
