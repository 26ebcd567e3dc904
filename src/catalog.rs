use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use camino::Utf8Path;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{CatalogMode, EvidenceType, PrimateHomologMode, TaxId};
use crate::error::VirotaxaError;
use crate::filters::{EvidenceDeduplicator, HostFilter, RefSeqRequirement};
use crate::fs_util::write_bytes_atomic;
use crate::phage::{PhageExcluder, PhageSelection};
use crate::primate::PrimateHomologAugmenter;
use crate::records::{RecordStore, VirusHostRecord, parse_refseq_ids};
use crate::taxonomy::TaxonomyResolver;

pub const CATALOG_COLUMNS: [&str; 6] = ["taxid", "name", "family", "order", "refseq_ids", "evidence"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub taxid: TaxId,
    pub name: String,
    pub family: Option<String>,
    pub order: Option<String>,
    pub refseq_ids: Vec<String>,
    pub evidence: EvidenceType,
}

impl CatalogEntry {
    pub fn from_record(record: &VirusHostRecord) -> Self {
        let taxonomy = record.taxonomy();
        Self {
            taxid: record.virus_taxid,
            name: record.virus_name.clone(),
            family: taxonomy.family,
            order: taxonomy.order,
            refseq_ids: record.refseq_ids.clone(),
            evidence: record.evidence.clone(),
        }
    }
}

/// Catalog rows keyed by taxid; iteration is ascending by taxid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<TaxId, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and leaves the catalog untouched when the taxid is already present.
    pub fn insert(&mut self, entry: CatalogEntry) -> bool {
        if self.entries.contains_key(&entry.taxid) {
            return false;
        }
        self.entries.insert(entry.taxid, entry);
        true
    }

    pub fn get(&self, taxid: TaxId) -> Option<&CatalogEntry> {
        self.entries.get(&taxid)
    }

    pub fn contains(&self, taxid: TaxId) -> bool {
        self.entries.contains_key(&taxid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn taxids(&self) -> BTreeSet<TaxId> {
        self.entries.keys().copied().collect()
    }

    /// Distinct non-empty family names.
    pub fn unique_families(&self) -> usize {
        self.entries
            .values()
            .filter_map(|entry| entry.family.as_deref())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn total_refseq_entries(&self) -> usize {
        self.entries.values().map(|entry| entry.refseq_ids.len()).sum()
    }

    pub fn evidence_distribution(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.evidence.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// The `limit` most populous families, largest first, ties by name.
    pub fn top_families(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts = BTreeMap::<&str, usize>::new();
        for family in self.entries.values().filter_map(|entry| entry.family.as_deref()) {
            *counts.entry(family).or_insert(0) += 1;
        }
        let mut sorted: Vec<_> = counts
            .into_iter()
            .map(|(family, count)| (family.to_string(), count))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit);
        sorted
    }

    pub fn write_tsv<W: Write>(&self, writer: W) -> Result<(), VirotaxaError> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);
        writer.write_record(CATALOG_COLUMNS).map_err(VirotaxaError::fs)?;
        for entry in self.entries.values() {
            let taxid = entry.taxid.to_string();
            let refseq = entry.refseq_ids.join(",");
            writer
                .write_record([
                    taxid.as_str(),
                    entry.name.as_str(),
                    entry.family.as_deref().unwrap_or(""),
                    entry.order.as_deref().unwrap_or(""),
                    refseq.as_str(),
                    entry.evidence.as_str(),
                ])
                .map_err(VirotaxaError::fs)?;
        }
        writer.flush().map_err(VirotaxaError::fs)?;
        Ok(())
    }

    pub fn to_tsv_bytes(&self) -> Result<Vec<u8>, VirotaxaError> {
        let mut buffer = Vec::new();
        self.write_tsv(&mut buffer)?;
        Ok(buffer)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), VirotaxaError> {
        let bytes = self.to_tsv_bytes()?;
        write_bytes_atomic(path, &bytes)?;
        info!(path = %path, taxa = self.len(), "saved catalog");
        Ok(())
    }

    /// Reads a catalog TSV; a repeated taxid is an error rather than a silent merge.
    pub fn read_tsv<R: Read>(reader: R) -> Result<Self, VirotaxaError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|err| VirotaxaError::parse("catalog header", err))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or_else(|| VirotaxaError::parse("catalog header", format!("missing column {name}")))
        };
        let col_taxid = column("taxid")?;
        let col_name = column("name")?;
        let col_family = column("family")?;
        let col_order = column("order")?;
        let col_refseq = column("refseq_ids")?;
        let col_evidence = column("evidence")?;

        let mut catalog = Catalog::new();
        for (idx, row) in reader.records().enumerate() {
            let row = row.map_err(|err| VirotaxaError::parse("catalog row", err))?;
            let field = |col: usize| row.get(col).map(str::trim).unwrap_or("");
            let line = idx + 2;
            let taxid = field(col_taxid).parse::<TaxId>().map_err(|_| {
                VirotaxaError::parse("catalog row", format!("line {line}: invalid taxid"))
            })?;
            let entry = CatalogEntry {
                taxid,
                name: field(col_name).to_string(),
                family: non_empty(field(col_family)),
                order: non_empty(field(col_order)),
                refseq_ids: parse_refseq_ids(field(col_refseq)),
                evidence: EvidenceType::from(field(col_evidence)),
            };
            if !catalog.insert(entry) {
                return Err(VirotaxaError::parse(
                    "catalog row",
                    format!("line {line}: duplicate taxid {taxid}"),
                ));
            }
        }
        Ok(catalog)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, VirotaxaError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| VirotaxaError::Filesystem(format!("open {path}: {err}")))?;
        Self::read_tsv(file)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parameters that fully determine a catalog build from a given source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParameters {
    pub mode: CatalogMode,
    pub exclude_bacteriophages: bool,
    pub primate_homologs: PrimateHomologMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primate_families: Option<BTreeSet<String>>,
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self {
            mode: CatalogMode::Clinical,
            exclude_bacteriophages: true,
            primate_homologs: PrimateHomologMode::None,
            primate_families: None,
        }
    }
}

/// Records dropped (or added) at each stage of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub input_records: usize,
    pub malformed_records: usize,
    pub host_filter_dropped: usize,
    pub deduplicate_dropped: usize,
    pub refseq_dropped: usize,
    pub phage_dropped: usize,
    pub primate_homologs_added: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledCatalog {
    pub catalog: Catalog,
    pub counts: StageCounts,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogAssembler {
    resolver: TaxonomyResolver,
    deduplicator: EvidenceDeduplicator,
    phages: PhageExcluder,
}

impl CatalogAssembler {
    pub fn new(
        resolver: TaxonomyResolver,
        deduplicator: EvidenceDeduplicator,
        phages: PhageExcluder,
    ) -> Self {
        Self {
            resolver,
            deduplicator,
            phages,
        }
    }

    pub fn deduplicator(&self) -> &EvidenceDeduplicator {
        &self.deduplicator
    }

    pub fn phages(&self) -> &PhageExcluder {
        &self.phages
    }

    /// Runs host filter, deduplication, RefSeq requirement, phage exclusion and primate
    /// augmentation, in that order.
    pub fn assemble(
        &self,
        store: &RecordStore,
        params: &BuildParameters,
    ) -> Result<AssembledCatalog, VirotaxaError> {
        let mut counts = StageCounts {
            input_records: store.len(),
            malformed_records: store.malformed(),
            ..StageCounts::default()
        };

        let hosts = HostFilter::new(&self.resolver).apply(store.records().to_vec(), params.mode);
        counts.host_filter_dropped = hosts.dropped;

        let unique = self.deduplicator.apply(hosts.records);
        counts.deduplicate_dropped = unique.dropped;

        let with_refseq = RefSeqRequirement::apply(unique.records);
        counts.refseq_dropped = with_refseq.dropped;

        let mut base = with_refseq.records;
        if params.exclude_bacteriophages {
            let clean = self.phages.apply(base, PhageSelection::Exclude);
            counts.phage_dropped = clean.dropped;
            base = clean.records;
        }

        let mut catalog = Catalog::new();
        for record in &base {
            catalog.insert(CatalogEntry::from_record(record));
        }

        let phages = params.exclude_bacteriophages.then_some(&self.phages);
        let augmenter = PrimateHomologAugmenter::new(&self.resolver, &self.deduplicator, phages);
        let additions = augmenter.augment(
            store.records(),
            &catalog.taxids(),
            params.primate_homologs,
            params.primate_families.as_ref(),
        );
        for record in &additions.records {
            if catalog.insert(CatalogEntry::from_record(record)) {
                counts.primate_homologs_added += 1;
            }
        }

        if catalog.is_empty() {
            return Err(VirotaxaError::EmptyCatalog {
                mode: params.mode.to_string(),
            });
        }

        info!(
            taxa = catalog.len(),
            families = catalog.unique_families(),
            refseq_entries = catalog.total_refseq_entries(),
            "built catalog"
        );
        Ok(AssembledCatalog { catalog, counts })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn entry(taxid: TaxId, family: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            taxid,
            name: format!("Virus {taxid}"),
            family: family.map(str::to_string),
            order: None,
            refseq_ids: vec![format!("NC_{taxid:06}.1"), "NC_999999.1".to_string()],
            evidence: EvidenceType::Literature,
        }
    }

    #[test]
    fn insert_rejects_duplicate_taxid() {
        let mut catalog = Catalog::new();
        assert!(catalog.insert(entry(1, Some("Retroviridae"))));
        assert!(!catalog.insert(entry(1, Some("Flaviviridae"))));
        assert_eq!(catalog.get(1).unwrap().family.as_deref(), Some("Retroviridae"));
    }

    #[test]
    fn tsv_uses_comma_joined_refseq_and_taxid_order() {
        let mut catalog = Catalog::new();
        catalog.insert(entry(20, None));
        catalog.insert(entry(3, Some("Retroviridae")));
        let text = String::from_utf8(catalog.to_tsv_bytes().unwrap()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "taxid\tname\tfamily\torder\trefseq_ids\tevidence");
        assert_eq!(
            lines[1],
            "3\tVirus 3\tRetroviridae\t\tNC_000003.1,NC_999999.1\tLiterature"
        );
        assert!(lines[2].starts_with("20\t"));

        let reread = Catalog::read_tsv(text.as_bytes()).unwrap();
        assert_eq!(reread, catalog);
    }

    #[test]
    fn read_rejects_duplicate_rows() {
        let text = "taxid\tname\tfamily\torder\trefseq_ids\tevidence\n1\tA\t\t\tNC_1\tRefSeq\n1\tB\t\t\tNC_2\tRefSeq\n";
        assert_matches!(
            Catalog::read_tsv(text.as_bytes()),
            Err(VirotaxaError::Parse { .. })
        );
    }

    #[test]
    fn unique_families_ignores_missing() {
        let mut catalog = Catalog::new();
        catalog.insert(entry(1, Some("Retroviridae")));
        catalog.insert(entry(2, Some("Retroviridae")));
        catalog.insert(entry(3, None));
        catalog.insert(entry(4, Some("Flaviviridae")));
        assert_eq!(catalog.unique_families(), 2);
        assert_eq!(
            catalog.top_families(1),
            vec![("Retroviridae".to_string(), 2)]
        );
        assert_eq!(catalog.total_refseq_entries(), 8);
    }
}
