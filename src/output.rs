use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    BuildResult, CacheListResult, CacheStoreResult, CacheUseResult, DownloadResult,
    FamiliesResult, GenomeFetchOutcome, InfoResult, ProgressEvent, ProgressSink,
};
use crate::validate::ValidationReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

/// Machine-readable output: one pretty JSON document on stdout, progress suppressed.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable output: progress on stderr, summaries on stdout.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

impl ConsoleOutput {
    pub fn print_download(result: &DownloadResult) {
        println!("Downloaded {} ({} bytes)", result.path, result.size_bytes);
        println!("SHA256: {}", result.sha256);
        println!("Metadata: {}", result.metadata_path);
    }

    pub fn print_cache_store(result: &CacheStoreResult) {
        println!("Cached {} as {}", result.short_hash, result.path);
        println!("Use with: virotaxa catalog build --from-cache {}", result.short_hash);
    }

    pub fn print_cache_list(result: &CacheListResult) {
        if result.entries.is_empty() {
            println!("No cached sources in {}", result.cache_dir);
            println!("Run `virotaxa cache download` to add one.");
            return;
        }
        println!("{:<14} {:<22} {:>8}", "HASH", "CACHED", "SIZE MB");
        for entry in &result.entries {
            println!(
                "{:<14} {:<22} {:>8.1}",
                entry.short_hash,
                entry.cached_at,
                entry.size_bytes as f64 / 1024.0 / 1024.0
            );
        }
    }

    pub fn print_cache_use(result: &CacheUseResult) {
        let verb = if result.linked { "Linked" } else { "Copied" };
        println!("{verb} {} -> {}", result.hash.short(), result.path);
    }

    pub fn print_info(result: &InfoResult) {
        let summary = &result.summary;
        println!("Source: {}", result.source);
        println!("SHA256: {}", result.sha256);
        println!("Relationships: {}", summary.total_relationships);
        println!("Unique viruses: {}", summary.unique_viruses);
        println!("Unique hosts: {}", summary.unique_hosts);
        println!("Malformed rows skipped: {}", summary.malformed_records);
        println!("Evidence:");
        for (evidence, count) in &summary.evidence_distribution {
            println!("  {evidence}: {count}");
        }
    }

    pub fn print_families(result: &FamiliesResult) {
        println!("Families ({} mode): {}", result.mode, result.families.len());
        for family in &result.families {
            println!("  {:<32} {:>6}", family.family, family.count);
        }
    }

    pub fn print_build(result: &BuildResult) {
        let counts = &result.stage_counts;
        println!("Catalog: {}", result.catalog_path);
        println!("Metadata: {}", result.metadata_path);
        println!(
            "Taxa: {}  Families: {}  RefSeq entries: {}",
            result.total_taxa, result.unique_families, result.total_refseq_entries
        );
        println!(
            "Dropped: host={} duplicate={} no_refseq={} phage={}  Primate homologs added: {}",
            counts.host_filter_dropped,
            counts.deduplicate_dropped,
            counts.refseq_dropped,
            counts.phage_dropped,
            counts.primate_homologs_added
        );
        if counts.malformed_records > 0 {
            println!("Malformed rows skipped: {}", counts.malformed_records);
        }
    }

    pub fn print_validation(report: &ValidationReport) {
        if report.is_valid() {
            println!("Catalog is valid");
        } else {
            println!("Catalog has {} discrepancies", report.discrepancies.len());
        }
        for discrepancy in &report.discrepancies {
            println!("  error: {discrepancy}");
        }
        for warning in &report.warnings {
            println!("  warning: {warning}");
        }
        for (key, value) in &report.info {
            println!("  {key}: {value}");
        }
    }

    pub fn print_genome_fetch(outcome: &GenomeFetchOutcome) {
        let result = &outcome.result;
        println!(
            "Fetched {}/{} sequences for {} taxa into {}",
            result.successful,
            result.total_sequences,
            result.files.len(),
            result.output_dir
        );
        println!("Total bases: {}", result.total_bases());
        if !result.failed.is_empty() {
            println!("Failed accessions: {}", result.failed.join(", "));
        }
        println!("Metadata: {}", outcome.metadata_path);
    }
}
