use std::collections::BTreeSet;

use tracing::info;

use crate::domain::{PrimateHomologMode, TaxId};
use crate::filters::{EvidenceDeduplicator, RefSeqRequirement, StageOutput};
use crate::phage::{PhageExcluder, PhageSelection};
use crate::records::VirusHostRecord;
use crate::taxonomy::{Clade, Rank, TaxonomyResolver};

/// Families with high intra-species strain diversity, where primate homologs add the most
/// probe-design value. Offered as a ready-made allow-list.
pub const HIGH_DIVERSITY_FAMILIES: [&str; 6] = [
    "Herpesviridae",
    "Orthoherpesviridae",
    "Papillomaviridae",
    "Retroviridae",
    "Polyomaviridae",
    "Adenoviridae",
];

/// Reintroduces taxa seen only in non-human primate hosts.
pub struct PrimateHomologAugmenter<'a> {
    resolver: &'a TaxonomyResolver,
    deduplicator: &'a EvidenceDeduplicator,
    phages: Option<&'a PhageExcluder>,
}

impl<'a> PrimateHomologAugmenter<'a> {
    /// `phages` is `None` when bacteriophage exclusion is disabled for the build.
    pub fn new(
        resolver: &'a TaxonomyResolver,
        deduplicator: &'a EvidenceDeduplicator,
        phages: Option<&'a PhageExcluder>,
    ) -> Self {
        Self {
            resolver,
            deduplicator,
            phages,
        }
    }

    pub fn host_clade(mode: PrimateHomologMode) -> Option<Clade> {
        match mode {
            PrimateHomologMode::None => None,
            PrimateHomologMode::Strict => Some(Clade::GreatApe),
            PrimateHomologMode::Extended => Some(Clade::NonHumanPrimate),
        }
    }

    /// Selects additions from the unfiltered `records`. The returned records carry taxids
    /// absent from `existing` and at most one record per taxid; `dropped` counts candidate
    /// host records that did not make it.
    pub fn augment(
        &self,
        records: &[VirusHostRecord],
        existing: &BTreeSet<TaxId>,
        mode: PrimateHomologMode,
        families: Option<&BTreeSet<String>>,
    ) -> StageOutput {
        let Some(clade) = Self::host_clade(mode) else {
            return StageOutput::default();
        };

        let candidates: Vec<VirusHostRecord> = records
            .iter()
            .filter(|record| self.resolver.is_member(record.host(), clade))
            .cloned()
            .collect();
        let candidate_count = candidates.len();

        let mut selected = RefSeqRequirement::apply(candidates).records;
        if let Some(families) = families {
            selected.retain(|record| in_families(record, families));
        }
        if let Some(phages) = self.phages {
            selected = phages.apply(selected, PhageSelection::Exclude).records;
        }
        selected.retain(|record| !existing.contains(&record.virus_taxid));
        let added = self.deduplicator.apply(selected).records;

        info!(
            stage = "primate_homologs",
            mode = %mode,
            candidates = candidate_count,
            added = added.len(),
            "primate homolog augmentation"
        );
        StageOutput {
            dropped: candidate_count - added.len(),
            records: added,
        }
    }
}

fn in_families(record: &VirusHostRecord, families: &BTreeSet<String>) -> bool {
    record
        .virus_lineage
        .names_of(Rank::Family)
        .any(|family| families.iter().any(|allowed| allowed.eq_ignore_ascii_case(family)))
}
