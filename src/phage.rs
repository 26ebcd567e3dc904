use std::collections::BTreeSet;

use regex::Regex;
use tracing::{debug, info};

use crate::error::VirotaxaError;
use crate::filters::StageOutput;
use crate::records::VirusHostRecord;
use crate::taxonomy::Rank;

/// Families whose members infect bacteria or archaea. These show up as "human-associated"
/// in Virus-Host DB because they are detected in human microbiome samples.
pub const BACTERIOPHAGE_FAMILIES: [&str; 30] = [
    "Siphoviridae",
    "Myoviridae",
    "Podoviridae",
    "Ackermannviridae",
    "Autographiviridae",
    "Chaseviridae",
    "Demerecviridae",
    "Drexlerviridae",
    "Guelinviridae",
    "Herelleviridae",
    "Rountreeviridae",
    "Salasmaviridae",
    "Schitoviridae",
    "Straboviridae",
    "Zobellviridae",
    "Microviridae",
    "Inoviridae",
    "Leviviridae",
    "Cystoviridae",
    "Fiersviridae",
    "Tectiviridae",
    "Corticoviridae",
    "Plasmaviridae",
    "Sphaerolipoviridae",
    "Finnlakeviridae",
    "Haloferuviridae",
    "Intestiviridae",
    "Crevaviridae",
    "Steigviridae",
    "Suoliviridae",
];

/// Name/lineage terms that catch phages lacking a formal family. Broader than the family
/// list and allowed to over-match: "Mycobacteriophage" and "Cyanomyovirus" are caught by
/// substring.
pub const BACTERIOPHAGE_KEYWORDS: [&str; 10] = [
    "bacteriophage",
    "bacterial virus",
    "phage",
    "gokushovirus",
    "chlamydiamicrovirus",
    "crassphage",
    "crass-like",
    "siphovirus",
    "myovirus",
    "podovirus",
];

/// Keywords that only match as a whole word, so "macrophage" is not a phage.
pub const WORD_BOUNDED_KEYWORDS: [&str; 1] = ["phage"];

#[derive(Debug, Clone)]
pub struct PhagePolicy {
    families: BTreeSet<String>,
    keywords: Regex,
}

impl PhagePolicy {
    /// Keywords match case-insensitively anywhere in the name or lineage, except those in
    /// [`WORD_BOUNDED_KEYWORDS`].
    pub fn new<F, K>(families: F, keywords: K) -> Result<Self, VirotaxaError>
    where
        F: IntoIterator,
        F::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let families = families
            .into_iter()
            .map(|family| family.as_ref().to_ascii_lowercase())
            .collect();
        let alternatives = keywords
            .into_iter()
            .map(|keyword| {
                let keyword = keyword.as_ref();
                let escaped = regex::escape(keyword);
                if WORD_BOUNDED_KEYWORDS
                    .iter()
                    .any(|bounded| bounded.eq_ignore_ascii_case(keyword))
                {
                    format!(r"\b{escaped}\b")
                } else {
                    escaped
                }
            })
            .collect::<Vec<_>>()
            .join("|");
        let keywords = Regex::new(&format!("(?i)(?:{alternatives})"))
            .map_err(|err| VirotaxaError::Configuration(format!("phage keywords: {err}")))?;
        Ok(Self { families, keywords })
    }

    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    pub fn is_phage_family(&self, family: &str) -> bool {
        self.families.contains(&family.to_ascii_lowercase())
    }

    pub fn is_bacteriophage(&self, record: &VirusHostRecord) -> bool {
        if record
            .virus_lineage
            .names_of(Rank::Family)
            .any(|family| self.is_phage_family(family))
        {
            return true;
        }
        let lineage = record.virus_lineage.to_string();
        self.keywords.is_match(&record.virus_name) || self.keywords.is_match(&lineage)
    }
}

impl Default for PhagePolicy {
    fn default() -> Self {
        // built-in keywords are escaped literals
        Self::new(BACTERIOPHAGE_FAMILIES, BACTERIOPHAGE_KEYWORDS)
            .expect("built-in phage keywords compile")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhageSelection {
    Exclude,
    /// Keep only phages, for inspecting what the exclusion removes.
    Only,
}

#[derive(Debug, Clone, Default)]
pub struct PhageExcluder {
    policy: PhagePolicy,
}

impl PhageExcluder {
    pub fn new(policy: PhagePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PhagePolicy {
        &self.policy
    }

    pub fn apply(&self, records: Vec<VirusHostRecord>, selection: PhageSelection) -> StageOutput {
        let before = records.len();
        let kept: Vec<_> = records
            .into_iter()
            .filter(|record| {
                let phage = self.policy.is_bacteriophage(record);
                if phage {
                    debug!(taxid = record.virus_taxid, name = %record.virus_name, "bacteriophage");
                }
                match selection {
                    PhageSelection::Exclude => !phage,
                    PhageSelection::Only => phage,
                }
            })
            .collect();
        let dropped = before - kept.len();
        info!(
            stage = "exclude_phages",
            kept = kept.len(),
            dropped,
            "bacteriophage filter applied"
        );
        StageOutput {
            records: kept,
            dropped,
        }
    }
}
