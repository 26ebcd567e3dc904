use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum VirotaxaError {
    #[error("invalid configuration: {0}")]
    #[diagnostic(help("valid modes are clinical|pandemic|mammal, primate homologs none|strict|extended"))]
    Configuration(String),

    #[error("malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },

    #[error("filter chain produced an empty catalog (mode={mode})")]
    #[diagnostic(help("an empty catalog is almost always a configuration mistake; check the mode and source file"))]
    EmptyCatalog { mode: String },

    #[error("ambiguous hash prefix '{prefix}' matches: {}", .matches.join(", "))]
    AmbiguousHash { prefix: String, matches: Vec<String> },

    #[error("no cached source matches hash prefix: {0}")]
    #[diagnostic(help("run `virotaxa cache list` to see available versions"))]
    HashNotFound(String),

    #[error("cached source {expected} is corrupted: its contents hash to {actual}")]
    #[diagnostic(help("store the original table again with `virotaxa cache add` to repair it"))]
    CacheCorrupted { expected: String, actual: String },

    #[error("invalid hash prefix '{0}': expected at least 8 hex characters")]
    InvalidHashPrefix(String),

    #[error("catalog does not match its metadata: {}", .0.join("; "))]
    ValidationMismatch(Vec<String>),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("source download failed: {0}")]
    SourceHttp(String),

    #[error("source server returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },
}

impl VirotaxaError {
    pub(crate) fn fs(err: impl std::fmt::Display) -> Self {
        VirotaxaError::Filesystem(err.to_string())
    }

    pub(crate) fn parse(what: &str, err: impl std::fmt::Display) -> Self {
        VirotaxaError::Parse {
            what: what.to_string(),
            message: err.to_string(),
        }
    }
}
