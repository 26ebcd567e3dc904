use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use virotaxa::app::{App, BuildSource, GenomeFetchOptions};
use virotaxa::cache::{CacheRegistry, MaterializeMode};
use virotaxa::catalog::BuildParameters;
use virotaxa::domain::{CatalogMode, HashPrefix, Sha256Hex};
use virotaxa::download::{DownloadedSource, HttpHeaders, SourceClient, provenance_path_for};
use virotaxa::error::VirotaxaError;
use virotaxa::genome::{GENOME_METADATA_FILE, GenomeClient};
use virotaxa::metadata::{metadata_path_for, read_metadata};
use virotaxa::output::JsonOutput;
use virotaxa::validate::Discrepancy;

const TABLE: &str = "virus_tax_id\tvirus_name\tvirus_lineage\trefseq_id\tKEGG_GENOME\tKEGG_DISEASE\tDISEASE\thost_tax_id\thost_name\thost_lineage\tpmid\tevidence\tsample_type\tsource_organism
11676\tHuman immunodeficiency virus 1\tViruses; Riboviria; Pararnavirae; Artverviricota; Revtraviricetes; Ortervirales; Retroviridae; Orthoretrovirinae; Lentivirus\tNC_001802.1\t\t\tAIDS\t9606\tHomo sapiens\tEukaryota; Metazoa; Chordata; Vertebrata; Mammalia; Primates; Hominidae; Homo\t\tLiterature\t\t
11320\tInfluenza A virus\tViruses; Riboviria; Orthornavirae; Negarnaviricota; Polyploviricotina; Insthoviricetes; Articulavirales; Orthomyxoviridae\tNC_002016.1\t\t\t\t9606\tHomo sapiens\tEukaryota; Metazoa; Chordata; Vertebrata; Mammalia; Primates; Hominidae; Homo\t\tRefSeq\t\t
1518022\tSiphovirus contig89\tViruses; Duplodnaviria; Caudoviricetes; unclassified Caudoviricetes\tNC_999999.1\t\t\t\t9606\tHomo sapiens\tEukaryota; Metazoa; Chordata; Vertebrata; Mammalia; Primates; Hominidae; Homo\t\tRefSeq\t\t
12637\tZika virus\tViruses; Riboviria; Orthornavirae; Kitrinoviricota; Flasuviricetes; Amarillovirales; Flaviviridae; Flavivirus\tNC_012532.1\t\t\t\t9606\tHomo sapiens\tEukaryota; Metazoa; Chordata; Vertebrata; Mammalia; Primates; Hominidae; Homo\t\tLiterature\t\t
999999\tBat coronavirus HKU9\tViruses; Riboviria; Orthornavirae; Pisuviricota; Pisoniviricetes; Nidovirales; Coronaviridae; Betacoronavirus\tNC_009021.1\t\t\t\t9397\tPteropus\tEukaryota; Metazoa; Chordata; Vertebrata; Mammalia; Chiroptera; Pteropodidae; Pteropus\t\tRefSeq\t\t
";

#[derive(Default)]
struct MockSource {
    urls: Mutex<Vec<String>>,
}

impl SourceClient for MockSource {
    fn download(&self, url: &str) -> Result<DownloadedSource, VirotaxaError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(DownloadedSource::new(
            url,
            TABLE.as_bytes().to_vec(),
            HttpHeaders {
                last_modified: Some("Tue, 01 Sep 2026 00:00:00 GMT".to_string()),
                ..HttpHeaders::default()
            },
        ))
    }
}

struct FailingSource;

impl SourceClient for FailingSource {
    fn download(&self, _url: &str) -> Result<DownloadedSource, VirotaxaError> {
        Err(VirotaxaError::SourceStatus {
            status: 503,
            message: "unavailable".to_string(),
        })
    }
}

#[derive(Default)]
struct MockGenome {
    batches: Mutex<Vec<Vec<String>>>,
}

impl GenomeClient for MockGenome {
    fn fetch_fasta(&self, accessions: &[String]) -> Result<String, VirotaxaError> {
        self.batches.lock().unwrap().push(accessions.to_vec());
        Ok(accessions
            .iter()
            .map(|acc| format!(">{acc} mock genome\nACGTACGT\n"))
            .collect())
    }
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

fn app(root: &Utf8PathBuf) -> App<MockSource> {
    let cache = CacheRegistry::open(root.join("cache")).unwrap();
    App::new(cache, MockSource::default())
}

#[test]
fn download_writes_table_and_provenance() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let output = root.join("vhdb.tsv");

    let result = app.download(&output, &JsonOutput).unwrap();
    assert_eq!(result.sha256, Sha256Hex::compute(TABLE.as_bytes()));
    assert_eq!(fs::read_to_string(&output).unwrap(), TABLE);

    let provenance: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(provenance_path_for(&output)).unwrap()).unwrap();
    assert_eq!(provenance["sha256"], result.sha256.as_str());
    assert_eq!(provenance["file_path"], output.as_str());
    assert_eq!(
        provenance["http_headers"]["last_modified"],
        "Tue, 01 Sep 2026 00:00:00 GMT"
    );
}

#[test]
fn failed_download_writes_nothing() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(root.join("cache")).unwrap();
    let app = App::new(cache, FailingSource);
    let output = root.join("vhdb.tsv");
    assert_matches!(
        app.download(&output, &JsonOutput),
        Err(VirotaxaError::SourceStatus { status: 503, .. })
    );
    assert!(!output.as_std_path().exists());
    assert!(app.cache().list().unwrap().is_empty());
}

#[test]
fn build_from_cache_then_validate() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let stored = app.cache_download(&JsonOutput).unwrap();
    let prefix: HashPrefix = stored.short_hash.parse().unwrap();

    let catalog_path = root.join("out").join("catalog.tsv");
    let built = app
        .build(
            &BuildSource::Cache(prefix),
            &BuildParameters::default(),
            &catalog_path,
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(built.total_taxa, 3);
    assert_eq!(built.unique_families, 3);
    assert_eq!(built.source_sha256, stored.hash);

    let metadata = read_metadata(&metadata_path_for(&catalog_path)).unwrap();
    assert_eq!(metadata.source.cache_hash.as_ref(), Some(&stored.hash));
    assert!(metadata.source.download.is_some());
    assert!(
        metadata
            .reproducibility
            .commands
            .iter()
            .any(|command| command.contains(&format!("--from-cache {}", stored.short_hash)))
    );

    let report = app.validate(&catalog_path, None, &JsonOutput).unwrap();
    assert!(report.is_valid(), "{:?}", report.discrepancies);
    assert!(report.warnings.is_empty());
}

#[test]
fn changed_source_is_a_discrepancy() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let source = root.join("vhdb.tsv");
    fs::write(&source, TABLE).unwrap();
    let catalog_path = root.join("catalog.tsv");
    let params = BuildParameters {
        mode: CatalogMode::Mammal,
        ..BuildParameters::default()
    };
    let built = app
        .build(&BuildSource::Path(source.clone()), &params, &catalog_path, &JsonOutput)
        .unwrap();
    assert_eq!(built.total_taxa, 4);
    assert!(app.validate(&catalog_path, None, &JsonOutput).unwrap().is_valid());

    fs::write(&source, format!("{TABLE}# edited\n")).unwrap();
    let report = app.validate(&catalog_path, None, &JsonOutput).unwrap();
    assert_matches!(report.discrepancies.as_slice(), [Discrepancy::SourceHash { .. }]);
    assert_matches!(report.into_result(), Err(VirotaxaError::ValidationMismatch(_)));
}

#[test]
fn edited_catalog_fails_validation() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let source = root.join("vhdb.tsv");
    fs::write(&source, TABLE).unwrap();
    let catalog_path = root.join("catalog.tsv");
    app.build(
        &BuildSource::Path(source),
        &BuildParameters::default(),
        &catalog_path,
        &JsonOutput,
    )
    .unwrap();

    let content = fs::read_to_string(&catalog_path).unwrap();
    let mut lines: Vec<&str> = content.lines().collect();
    lines.pop();
    fs::write(&catalog_path, format!("{}\n", lines.join("\n"))).unwrap();

    let report = app.validate(&catalog_path, None, &JsonOutput).unwrap();
    assert!(report.discrepancies.contains(&Discrepancy::TaxaCount {
        catalog: 2,
        metadata: 3
    }));
}

#[test]
fn missing_source_is_only_a_warning() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let source = root.join("vhdb.tsv");
    fs::write(&source, TABLE).unwrap();
    let catalog_path = root.join("catalog.tsv");
    app.build(
        &BuildSource::Path(source.clone()),
        &BuildParameters::default(),
        &catalog_path,
        &JsonOutput,
    )
    .unwrap();
    fs::remove_file(&source).unwrap();

    let report = app.validate(&catalog_path, None, &JsonOutput).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn missing_metadata_is_an_error() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let catalog_path = root.join("catalog.tsv");
    fs::write(&catalog_path, "taxid\tname\tfamily\torder\trefseq_ids\tevidence\n").unwrap();
    assert_matches!(
        app.validate(&catalog_path, None, &JsonOutput),
        Err(VirotaxaError::Filesystem(_))
    );
}

#[test]
fn build_from_unknown_hash_fails() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let prefix: HashPrefix = "deadbeef".parse().unwrap();
    assert_matches!(
        app.build(
            &BuildSource::Cache(prefix),
            &BuildParameters::default(),
            &root.join("catalog.tsv"),
            &JsonOutput,
        ),
        Err(VirotaxaError::HashNotFound(_))
    );
}

#[test]
fn build_from_altered_cache_file_fails() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let stored = app.cache_download(&JsonOutput).unwrap();
    fs::write(&stored.path, TABLE.replace("Zika virus", "Zika")).unwrap();

    let prefix: HashPrefix = stored.short_hash.parse().unwrap();
    let catalog_path = root.join("catalog.tsv");
    assert_matches!(
        app.build(
            &BuildSource::Cache(prefix),
            &BuildParameters::default(),
            &catalog_path,
            &JsonOutput,
        ),
        Err(VirotaxaError::CacheCorrupted { expected, .. }) if expected == stored.hash.to_string()
    );
    assert!(!catalog_path.as_std_path().exists());
}

#[test]
fn info_and_families_summarize_source() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let source = root.join("vhdb.tsv");
    fs::write(&source, TABLE).unwrap();

    let info = app.info(&source, &JsonOutput).unwrap();
    assert_eq!(info.summary.total_relationships, 5);
    assert_eq!(info.summary.unique_hosts, 2);
    assert_eq!(info.summary.evidence_distribution["RefSeq"], 3);

    let clinical = app.families(&source, CatalogMode::Clinical, &JsonOutput).unwrap();
    let names: Vec<_> = clinical.families.iter().map(|f| f.family.as_str()).collect();
    assert_eq!(names, vec!["Flaviviridae", "Orthomyxoviridae", "Retroviridae"]);

    let mammal = app.families(&source, CatalogMode::Mammal, &JsonOutput).unwrap();
    assert!(mammal.families.iter().any(|f| f.family == "Coronaviridae"));
}

#[test]
fn cache_add_use_and_list() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let source = root.join("vhdb.tsv");
    fs::write(&source, TABLE).unwrap();

    let stored = app.cache_add(&source, &JsonOutput).unwrap();
    let listed = app.cache_list(&JsonOutput).unwrap();
    assert_eq!(listed.entries.len(), 1);
    assert_eq!(listed.entries[0].hash, stored.hash);

    let dest = root.join("work").join("vhdb.tsv");
    let prefix: HashPrefix = stored.short_hash.parse().unwrap();
    let used = app
        .cache_use(&prefix, &dest, MaterializeMode::Copy, &JsonOutput)
        .unwrap();
    assert!(!used.linked);
    assert_eq!(fs::read_to_string(&dest).unwrap(), TABLE);
}

#[test]
fn genome_fetch_writes_fasta_and_metadata() {
    let (_dir, root) = temp_root();
    let app = app(&root);
    let source = root.join("vhdb.tsv");
    fs::write(&source, TABLE).unwrap();
    let catalog_path = root.join("catalog.tsv");
    app.build(
        &BuildSource::Path(source),
        &BuildParameters::default(),
        &catalog_path,
        &JsonOutput,
    )
    .unwrap();

    let genome = MockGenome::default();
    let options = GenomeFetchOptions {
        email: "lab@example.org".to_string(),
        batch_size: Some(2),
        delay: Some(Duration::ZERO),
    };
    let genomes = root.join("genomes");
    let outcome = app
        .genome_fetch(&genome, &catalog_path, &genomes, &options, &JsonOutput)
        .unwrap();

    assert_eq!(outcome.result.total_sequences, 3);
    assert_eq!(outcome.result.successful, 3);
    assert!(outcome.result.failed.is_empty());
    assert_eq!(genome.batches.lock().unwrap().len(), 2);
    assert!(genomes.join("11676.fasta").as_std_path().exists());

    let metadata: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(genomes.join(GENOME_METADATA_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(metadata["fetch"]["ncbi_email"], "lab@example.org");
    assert_eq!(metadata["statistics"]["total_bases"], 24);
}
