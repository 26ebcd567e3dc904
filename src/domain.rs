use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::VirotaxaError;

/// NCBI taxonomy identifier.
pub type TaxId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    /// Human hosts only.
    Clinical,
    /// Any vertebrate host.
    Pandemic,
    /// Mammalian hosts only.
    Mammal,
}

impl CatalogMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogMode::Clinical => "clinical",
            CatalogMode::Pandemic => "pandemic",
            CatalogMode::Mammal => "mammal",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CatalogMode::Clinical => "Human hosts only (clinical diagnostics)",
            CatalogMode::Pandemic => "All vertebrate hosts (pandemic preparedness)",
            CatalogMode::Mammal => "Mammalian hosts only (zoonotic focus)",
        }
    }
}

impl fmt::Display for CatalogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogMode {
    type Err = VirotaxaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clinical" => Ok(CatalogMode::Clinical),
            "pandemic" => Ok(CatalogMode::Pandemic),
            "mammal" => Ok(CatalogMode::Mammal),
            _ => Err(VirotaxaError::Configuration(format!(
                "invalid mode: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrimateHomologMode {
    #[default]
    None,
    /// Chimpanzee and bonobo hosts.
    Strict,
    /// Any non-human primate host.
    Extended,
}

impl PrimateHomologMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimateHomologMode::None => "none",
            PrimateHomologMode::Strict => "strict",
            PrimateHomologMode::Extended => "extended",
        }
    }
}

impl fmt::Display for PrimateHomologMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimateHomologMode {
    type Err = VirotaxaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(PrimateHomologMode::None),
            "strict" => Ok(PrimateHomologMode::Strict),
            "extended" => Ok(PrimateHomologMode::Extended),
            _ => Err(VirotaxaError::Configuration(format!(
                "invalid primate homolog mode: {value}"
            ))),
        }
    }
}

/// Provenance class of a virus-host association.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EvidenceType {
    Literature,
    RefSeq,
    UniProt,
    Other(String),
}

impl EvidenceType {
    pub fn as_str(&self) -> &str {
        match self {
            EvidenceType::Literature => "Literature",
            EvidenceType::RefSeq => "RefSeq",
            EvidenceType::UniProt => "UniProt",
            EvidenceType::Other(value) => value,
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EvidenceType {
    fn from(value: &str) -> Self {
        match value.trim() {
            "Literature" => EvidenceType::Literature,
            "RefSeq" => EvidenceType::RefSeq,
            "UniProt" => EvidenceType::UniProt,
            other => EvidenceType::Other(other.to_string()),
        }
    }
}

impl From<String> for EvidenceType {
    fn from(value: String) -> Self {
        EvidenceType::from(value.as_str())
    }
}

impl From<EvidenceType> for String {
    fn from(value: EvidenceType) -> Self {
        value.as_str().to_string()
    }
}

/// Lowercase hex SHA-256 digest of a byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hex(String);

impl Sha256Hex {
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    pub fn starts_with(&self, prefix: &HashPrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl fmt::Display for Sha256Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Sha256Hex {
    type Err = VirotaxaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let bytes = hex::decode(&normalized).map_err(|err| VirotaxaError::parse("sha256", err))?;
        if bytes.len() != 32 {
            return Err(VirotaxaError::parse(
                "sha256",
                format!("expected 32 bytes, got {}", bytes.len()),
            ));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Sha256Hex {
    type Error = VirotaxaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Sha256Hex> for String {
    fn from(value: Sha256Hex) -> Self {
        value.0
    }
}

/// A leading fragment of a [`Sha256Hex`], at least 8 hex characters long.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashPrefix(String);

impl HashPrefix {
    pub const MIN_LEN: usize = 8;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HashPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HashPrefix {
    type Err = VirotaxaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let is_valid = normalized.len() >= Self::MIN_LEN
            && normalized.len() <= 64
            && normalized.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(VirotaxaError::InvalidHashPrefix(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl From<&Sha256Hex> for HashPrefix {
    fn from(value: &Sha256Hex) -> Self {
        Self(value.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn hash_deserialization_validates() {
        let upper = "AB".repeat(32);
        let hash: Sha256Hex = serde_json::from_str(&format!("\"{upper}\"")).unwrap();
        assert_eq!(hash.as_str(), "ab".repeat(32));
        assert_eq!(serde_json::to_string(&hash).unwrap(), format!("\"{}\"", "ab".repeat(32)));

        let non_ascii = format!("\"é{}\"", "a".repeat(62));
        assert!(serde_json::from_str::<Sha256Hex>(&non_ascii).is_err());
        assert!(serde_json::from_str::<Sha256Hex>("\"abcdef\"").is_err());
    }

    #[test]
    fn parse_mode_case_insensitive() {
        let mode: CatalogMode = " Pandemic ".parse().unwrap();
        assert_eq!(mode, CatalogMode::Pandemic);
    }

    #[test]
    fn parse_mode_invalid() {
        let err = "reptile".parse::<CatalogMode>().unwrap_err();
        assert_matches!(err, VirotaxaError::Configuration(_));
    }

    #[test]
    fn evidence_unknown_is_other() {
        assert_eq!(
            EvidenceType::from("Metagenome"),
            EvidenceType::Other("Metagenome".to_string())
        );
        assert_eq!(EvidenceType::from("RefSeq"), EvidenceType::RefSeq);
    }

    #[test]
    fn sha256_of_empty_input() {
        let digest = Sha256Hex::compute(b"");
        assert_eq!(
            digest.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(digest.short(), "e3b0c44298fc");
    }

    #[test]
    fn hash_prefix_requires_eight_hex_chars() {
        assert_matches!(
            "abc".parse::<HashPrefix>(),
            Err(VirotaxaError::InvalidHashPrefix(_))
        );
        assert_matches!(
            "zzzzzzzz".parse::<HashPrefix>(),
            Err(VirotaxaError::InvalidHashPrefix(_))
        );
        let prefix: HashPrefix = "E3B0C442".parse().unwrap();
        assert!(Sha256Hex::compute(b"").starts_with(&prefix));
    }
}
