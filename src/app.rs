use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;

use crate::cache::{CacheEntry, CacheRegistry, MaterializeMode};
use crate::catalog::{BuildParameters, Catalog, CatalogAssembler, StageCounts};
use crate::domain::{CatalogMode, HashPrefix, Sha256Hex};
use crate::download::{SourceClient, VHDB_URL, provenance_path_for, read_provenance, save_download};
use crate::error::VirotaxaError;
use crate::genome::{GenomeClient, GenomeFetchMetadata, GenomeFetchResult, GenomeFetcher};
use crate::metadata::{
    FamilyCount, MetadataGenerator, SourceInfo, metadata_path_for, write_metadata,
};
use crate::records::{RecordStore, RecordSummary};
use crate::taxonomy::TaxonomyResolver;
use crate::validate::{ValidationReport, validate_catalog_file};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Where a build reads its source table from.
#[derive(Debug, Clone)]
pub enum BuildSource {
    Path(Utf8PathBuf),
    Cache(HashPrefix),
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub path: String,
    pub metadata_path: String,
    pub sha256: Sha256Hex,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStoreResult {
    pub hash: Sha256Hex,
    pub short_hash: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheListResult {
    pub cache_dir: String,
    pub entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheUseResult {
    pub hash: Sha256Hex,
    pub source: String,
    pub path: String,
    pub linked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub source: String,
    pub sha256: Sha256Hex,
    #[serde(flatten)]
    pub summary: RecordSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamiliesResult {
    pub mode: CatalogMode,
    pub families: Vec<FamilyCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub catalog_path: String,
    pub metadata_path: String,
    pub source_sha256: Sha256Hex,
    pub total_taxa: usize,
    pub unique_families: usize,
    pub total_refseq_entries: usize,
    pub stage_counts: StageCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenomeFetchOutcome {
    #[serde(flatten)]
    pub result: GenomeFetchResult,
    pub metadata_path: String,
}

#[derive(Debug, Clone)]
pub struct GenomeFetchOptions {
    pub email: String,
    pub batch_size: Option<usize>,
    pub delay: Option<Duration>,
}

pub struct App<S: SourceClient> {
    cache: CacheRegistry,
    source: S,
    assembler: CatalogAssembler,
}

impl<S: SourceClient> App<S> {
    pub fn new(cache: CacheRegistry, source: S) -> Self {
        Self {
            cache,
            source,
            assembler: CatalogAssembler::default(),
        }
    }

    pub fn with_assembler(mut self, assembler: CatalogAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn cache(&self) -> &CacheRegistry {
        &self.cache
    }

    pub fn download(
        &self,
        output: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, VirotaxaError> {
        let started = Instant::now();
        progress(sink, format!("phase=Download; fetching {VHDB_URL}"), None);
        let source = self.source.download(VHDB_URL)?;
        let provenance = save_download(&source, output)?;
        progress(
            sink,
            format!("phase=Done; wrote {output}"),
            Some(started.elapsed()),
        );
        Ok(DownloadResult {
            path: output.to_string(),
            metadata_path: provenance_path_for(output).to_string(),
            sha256: provenance.sha256,
            size_bytes: provenance.file_size_bytes,
        })
    }

    pub fn cache_download(&self, sink: &dyn ProgressSink) -> Result<CacheStoreResult, VirotaxaError> {
        let started = Instant::now();
        progress(sink, format!("phase=Download; fetching {VHDB_URL}"), None);
        let source = self.source.download(VHDB_URL)?;
        let hash = self.cache.store_download(&source)?;
        let result = self.store_result(hash)?;
        progress(
            sink,
            format!("phase=Done; cached as {}", result.short_hash),
            Some(started.elapsed()),
        );
        Ok(result)
    }

    pub fn cache_add(
        &self,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<CacheStoreResult, VirotaxaError> {
        progress(sink, format!("phase=Cache; adding {path}"), None);
        let hash = self.cache.store_file(path)?;
        self.store_result(hash)
    }

    fn store_result(&self, hash: Sha256Hex) -> Result<CacheStoreResult, VirotaxaError> {
        let path = self.cache.retrieve(&HashPrefix::from(&hash))?;
        Ok(CacheStoreResult {
            short_hash: hash.short().to_string(),
            hash,
            path: path.to_string(),
        })
    }

    pub fn cache_list(&self, sink: &dyn ProgressSink) -> Result<CacheListResult, VirotaxaError> {
        progress(sink, "phase=Resolve; reading registry".to_string(), None);
        Ok(CacheListResult {
            cache_dir: self.cache.root().to_string(),
            entries: self.cache.list()?,
        })
    }

    pub fn cache_use(
        &self,
        prefix: &HashPrefix,
        dest: &Utf8Path,
        mode: MaterializeMode,
        sink: &dyn ProgressSink,
    ) -> Result<CacheUseResult, VirotaxaError> {
        progress(sink, format!("phase=Resolve; looking up {prefix}"), None);
        let entry = self.cache.materialize(prefix, dest, mode)?;
        Ok(CacheUseResult {
            hash: entry.hash,
            source: entry.path,
            path: dest.to_string(),
            linked: mode == MaterializeMode::Link,
        })
    }

    pub fn info(&self, path: &Utf8Path, sink: &dyn ProgressSink) -> Result<InfoResult, VirotaxaError> {
        progress(sink, format!("phase=Load; parsing {path}"), None);
        let bytes = read_source(path)?;
        let store = RecordStore::parse(&bytes)?;
        Ok(InfoResult {
            source: path.to_string(),
            sha256: Sha256Hex::compute(&bytes),
            summary: store.summary(),
        })
    }

    pub fn families(
        &self,
        path: &Utf8Path,
        mode: CatalogMode,
        sink: &dyn ProgressSink,
    ) -> Result<FamiliesResult, VirotaxaError> {
        progress(sink, format!("phase=Load; parsing {path}"), None);
        let store = RecordStore::load(path)?;
        let families = store
            .family_counts(&TaxonomyResolver::default(), mode)
            .into_iter()
            .map(|(family, count)| FamilyCount { family, count })
            .collect();
        Ok(FamiliesResult { mode, families })
    }

    /// Builds a catalog from `source` and writes it to `output` with its metadata alongside.
    pub fn build(
        &self,
        source: &BuildSource,
        params: &BuildParameters,
        output: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<BuildResult, VirotaxaError> {
        let started = Instant::now();
        let (bytes, source_info) = self.load_source(source)?;
        progress(
            sink,
            format!("phase=Parse; source {}", source_info.sha256.short()),
            Some(started.elapsed()),
        );
        let store = RecordStore::parse(&bytes)?;

        progress(
            sink,
            format!("phase=Filter; mode={} records={}", params.mode, store.len()),
            Some(started.elapsed()),
        );
        let assembled = self.assembler.assemble(&store, params)?;

        let generator = MetadataGenerator::new(
            self.assembler.deduplicator().priority(),
            self.assembler.phages().policy().family_count(),
        );
        let metadata =
            generator.generate(&assembled, source_info, params, Utc::now(), Some(output));
        let metadata_path = metadata_path_for(output);
        assembled.catalog.save(output)?;
        write_metadata(&metadata_path, &metadata)?;

        progress(
            sink,
            format!("phase=Done; {} taxa", assembled.catalog.len()),
            Some(started.elapsed()),
        );
        Ok(BuildResult {
            catalog_path: output.to_string(),
            metadata_path: metadata_path.to_string(),
            source_sha256: metadata.source.sha256,
            total_taxa: metadata.statistics.total_taxa,
            unique_families: metadata.statistics.unique_families,
            total_refseq_entries: metadata.statistics.total_refseq_entries,
            stage_counts: assembled.counts,
        })
    }

    fn load_source(&self, source: &BuildSource) -> Result<(Vec<u8>, SourceInfo), VirotaxaError> {
        match source {
            BuildSource::Path(path) => {
                let bytes = read_source(path)?;
                let mut info = SourceInfo::new(Sha256Hex::compute(&bytes));
                info.file_path = Some(path.to_string());
                info.download = read_provenance(path)?;
                Ok((bytes, info))
            }
            BuildSource::Cache(prefix) => {
                let (entry, bytes) = self.cache.load(prefix)?;
                let mut info = SourceInfo::new(entry.hash.clone());
                info.file_path = Some(entry.path);
                info.cache_hash = Some(entry.hash);
                info.download = entry.download;
                Ok((bytes, info))
            }
        }
    }

    pub fn validate(
        &self,
        catalog_path: &Utf8Path,
        source_override: Option<&Utf8Path>,
        sink: &dyn ProgressSink,
    ) -> Result<ValidationReport, VirotaxaError> {
        progress(sink, format!("phase=Validate; {catalog_path}"), None);
        validate_catalog_file(catalog_path, source_override)
    }

    pub fn genome_fetch<G: GenomeClient + ?Sized>(
        &self,
        client: &G,
        catalog_path: &Utf8Path,
        output_dir: &Utf8Path,
        options: &GenomeFetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<GenomeFetchOutcome, VirotaxaError> {
        let started = Instant::now();
        let catalog = Catalog::load(catalog_path)?;
        progress(
            sink,
            format!("phase=Fetch; {} taxa from {catalog_path}", catalog.len()),
            None,
        );

        let mut fetcher = GenomeFetcher::new(client);
        if let Some(batch_size) = options.batch_size {
            fetcher = fetcher.with_batch_size(batch_size);
        }
        if let Some(delay) = options.delay {
            fetcher = fetcher.with_delay(delay);
        }
        let result = fetcher.fetch(&catalog, output_dir)?;
        let metadata =
            GenomeFetchMetadata::new(&result, catalog_path, &options.email, Utc::now())?;
        let metadata_path = metadata.save(output_dir)?;

        progress(
            sink,
            format!(
                "phase=Done; {}/{} sequences",
                result.successful, result.total_sequences
            ),
            Some(started.elapsed()),
        );
        Ok(GenomeFetchOutcome {
            result,
            metadata_path: metadata_path.to_string(),
        })
    }
}

fn read_source(path: &Utf8Path) -> Result<Vec<u8>, VirotaxaError> {
    fs::read(path.as_std_path())
        .map_err(|err| VirotaxaError::Filesystem(format!("read {path}: {err}")))
}

fn progress(sink: &dyn ProgressSink, message: String, elapsed: Option<Duration>) {
    sink.event(ProgressEvent { message, elapsed });
}
