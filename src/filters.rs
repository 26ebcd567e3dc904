//! Record-level filter stages. Each stage consumes a record sequence and returns the
//! survivors together with how many records it dropped.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::info;

use crate::domain::{CatalogMode, EvidenceType};
use crate::records::VirusHostRecord;
use crate::taxonomy::{Clade, TaxonomyResolver};

#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub records: Vec<VirusHostRecord>,
    pub dropped: usize,
}

impl StageOutput {
    fn new(before: usize, records: Vec<VirusHostRecord>) -> Self {
        let dropped = before - records.len();
        Self { records, dropped }
    }
}

pub struct HostFilter<'a> {
    resolver: &'a TaxonomyResolver,
}

impl<'a> HostFilter<'a> {
    pub fn new(resolver: &'a TaxonomyResolver) -> Self {
        Self { resolver }
    }

    pub fn clade_for(mode: CatalogMode) -> Clade {
        match mode {
            CatalogMode::Clinical => Clade::Human,
            CatalogMode::Pandemic => Clade::Vertebrata,
            CatalogMode::Mammal => Clade::Mammalia,
        }
    }

    pub fn apply(&self, records: Vec<VirusHostRecord>, mode: CatalogMode) -> StageOutput {
        let before = records.len();
        let clade = Self::clade_for(mode);
        let kept: Vec<_> = records
            .into_iter()
            .filter(|record| self.resolver.is_member(record.host(), clade))
            .collect();
        let output = StageOutput::new(before, kept);
        info!(
            stage = "host_filter",
            mode = %mode,
            kept = output.records.len(),
            dropped = output.dropped,
            "filtered by host"
        );
        output
    }
}

/// Evidence ranking used by deduplication; lower rank wins, unlisted types rank last.
#[derive(Debug, Clone)]
pub struct EvidencePriority {
    order: Vec<EvidenceType>,
}

impl Default for EvidencePriority {
    fn default() -> Self {
        Self {
            order: vec![
                EvidenceType::Literature,
                EvidenceType::RefSeq,
                EvidenceType::UniProt,
            ],
        }
    }
}

impl EvidencePriority {
    pub fn new(order: Vec<EvidenceType>) -> Self {
        Self { order }
    }

    pub fn rank(&self, evidence: &EvidenceType) -> usize {
        self.order
            .iter()
            .position(|candidate| candidate == evidence)
            .unwrap_or(self.order.len())
    }

    pub fn labels(&self) -> Vec<String> {
        self.order.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceDeduplicator {
    priority: EvidencePriority,
}

impl EvidenceDeduplicator {
    pub fn new(priority: EvidencePriority) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> &EvidencePriority {
        &self.priority
    }

    /// Keeps one record per viral taxon: best evidence, then any RefSeq accession, then the
    /// smallest accession. Survivors are ordered by taxid.
    pub fn apply(&self, records: Vec<VirusHostRecord>) -> StageOutput {
        let before = records.len();
        let mut best: BTreeMap<u64, VirusHostRecord> = BTreeMap::new();
        for record in records {
            match best.get(&record.virus_taxid) {
                Some(current) if self.compare(&record, current) != Ordering::Less => {}
                _ => {
                    best.insert(record.virus_taxid, record);
                }
            }
        }
        let output = StageOutput::new(before, best.into_values().collect());
        info!(
            stage = "deduplicate",
            kept = output.records.len(),
            dropped = output.dropped,
            "deduplicated by evidence"
        );
        output
    }

    /// `Less` means `a` is preferred over `b`.
    pub fn compare(&self, a: &VirusHostRecord, b: &VirusHostRecord) -> Ordering {
        self.priority
            .rank(&a.evidence)
            .cmp(&self.priority.rank(&b.evidence))
            .then_with(|| b.has_refseq().cmp(&a.has_refseq()))
            .then_with(|| smallest_accession(a).cmp(&smallest_accession(b)))
    }
}

fn smallest_accession(record: &VirusHostRecord) -> Option<&str> {
    record.refseq_ids.iter().map(String::as_str).min()
}

pub struct RefSeqRequirement;

impl RefSeqRequirement {
    pub fn apply(records: Vec<VirusHostRecord>) -> StageOutput {
        let before = records.len();
        let kept: Vec<_> = records
            .into_iter()
            .filter(VirusHostRecord::has_refseq)
            .collect();
        let output = StageOutput::new(before, kept);
        info!(
            stage = "require_refseq",
            kept = output.records.len(),
            dropped = output.dropped,
            "filtered to records with RefSeq accessions"
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Lineage;

    fn record(taxid: u64, host: Option<u64>, host_lineage: &str, evidence: &str, refseq: &[&str]) -> VirusHostRecord {
        VirusHostRecord {
            virus_taxid: taxid,
            virus_name: format!("virus {taxid}"),
            virus_lineage: Lineage::parse_viral("Viruses; Herpesviridae"),
            host_taxid: host,
            host_name: String::new(),
            host_lineage: Lineage::parse_host(host_lineage),
            evidence: EvidenceType::from(evidence),
            refseq_ids: refseq.iter().map(|s| s.to_string()).collect(),
            pmid: None,
            disease: None,
        }
    }

    #[test]
    fn clinical_keeps_human_only() {
        let resolver = TaxonomyResolver::default();
        let records = vec![
            record(1, Some(9606), "Vertebrata; Mammalia; Homo", "Literature", &["NC_1"]),
            record(2, Some(10090), "Vertebrata; Mammalia; Mus", "Literature", &["NC_2"]),
            record(3, Some(9606), "Vertebrata; Mammalia; Homo", "RefSeq", &["NC_3"]),
        ];
        let output = HostFilter::new(&resolver).apply(records, CatalogMode::Clinical);
        let ids: Vec<_> = output.records.iter().map(|r| r.virus_taxid).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(output.dropped, 1);
    }

    #[test]
    fn mammal_mode_excludes_birds() {
        let resolver = TaxonomyResolver::default();
        let records = vec![
            record(1, Some(9606), "Vertebrata; Mammalia; Homo", "Literature", &["NC_1"]),
            record(2, Some(9031), "Vertebrata; Aves; Gallus", "Literature", &["NC_2"]),
            record(3, Some(7227), "Arthropoda; Insecta; Drosophila", "Literature", &["NC_3"]),
        ];
        let mammal = HostFilter::new(&resolver).apply(records.clone(), CatalogMode::Mammal);
        assert_eq!(mammal.records.len(), 1);
        let pandemic = HostFilter::new(&resolver).apply(records, CatalogMode::Pandemic);
        assert_eq!(pandemic.records.len(), 2);
    }

    #[test]
    fn literature_beats_uniprot() {
        let records = vec![
            record(1, Some(9606), "", "UniProt", &["NC_A"]),
            record(1, Some(9606), "", "Literature", &["NC_B"]),
        ];
        let output = EvidenceDeduplicator::default().apply(records);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].evidence, EvidenceType::Literature);
        assert_eq!(output.dropped, 1);
    }

    #[test]
    fn unknown_evidence_ranks_last() {
        let records = vec![
            record(1, None, "", "Metagenome", &["NC_A"]),
            record(1, None, "", "UniProt", &["NC_B"]),
        ];
        let output = EvidenceDeduplicator::default().apply(records);
        assert_eq!(output.records[0].evidence, EvidenceType::UniProt);
    }

    #[test]
    fn tie_prefers_refseq_then_smallest_accession() {
        let records = vec![
            record(1, None, "", "RefSeq", &[]),
            record(1, None, "", "RefSeq", &["NC_9"]),
            record(1, None, "", "RefSeq", &["NC_7", "NC_8"]),
        ];
        let output = EvidenceDeduplicator::default().apply(records.clone());
        assert_eq!(output.records[0].refseq_ids, vec!["NC_7", "NC_8"]);

        let mut reversed = records;
        reversed.reverse();
        let again = EvidenceDeduplicator::default().apply(reversed);
        assert_eq!(again.records, output.records);
    }

    #[test]
    fn refseq_requirement_drops_empty() {
        let records = vec![
            record(1, None, "", "RefSeq", &["NC_1"]),
            record(2, None, "", "RefSeq", &[]),
        ];
        let output = RefSeqRequirement::apply(records);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.dropped, 1);
    }
}
