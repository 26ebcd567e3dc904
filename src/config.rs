use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::catalog::BuildParameters;
use crate::error::VirotaxaError;
use crate::primate::HIGH_DIVERSITY_FAMILIES;

pub const DEFAULT_CONFIG_FILE: &str = "virotaxa.json";
const HIGH_DIVERSITY_PRESET: &str = "high-diversity";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BuildSection {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub exclude_bacteriophages: Option<bool>,
    #[serde(default)]
    pub primate_homologs: Option<String>,
    #[serde(default)]
    pub primate_families: Option<FamilyList>,
}

/// Either the `"high-diversity"` preset or an explicit list of family names.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FamilyList {
    Preset(String),
    Explicit(Vec<String>),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub build: BuildParameters,
    pub cache_dir: Option<Utf8PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            build: BuildParameters::default(),
            cache_dir: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `virotaxa.json` in the working directory when no path is given.
    /// Only an explicitly named file is required to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, VirotaxaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| VirotaxaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| VirotaxaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, VirotaxaError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let defaults = BuildParameters::default();
        let section = config.build;

        let build = BuildParameters {
            mode: match section.mode {
                Some(mode) => mode.parse()?,
                None => defaults.mode,
            },
            exclude_bacteriophages: section
                .exclude_bacteriophages
                .unwrap_or(defaults.exclude_bacteriophages),
            primate_homologs: match section.primate_homologs {
                Some(mode) => mode.parse()?,
                None => defaults.primate_homologs,
            },
            primate_families: section.primate_families.map(resolve_families).transpose()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            build,
            cache_dir: config.cache.dir.map(Utf8PathBuf::from),
        })
    }
}

pub fn resolve_families(list: FamilyList) -> Result<BTreeSet<String>, VirotaxaError> {
    match list {
        FamilyList::Preset(name) if name.eq_ignore_ascii_case(HIGH_DIVERSITY_PRESET) => Ok(
            HIGH_DIVERSITY_FAMILIES
                .iter()
                .map(|family| family.to_string())
                .collect(),
        ),
        FamilyList::Preset(name) => Err(VirotaxaError::Configuration(format!(
            "unknown family preset: {name}"
        ))),
        FamilyList::Explicit(families) => Ok(families
            .into_iter()
            .map(|family| family.trim().to_string())
            .filter(|family| !family.is_empty())
            .collect()),
    }
}
