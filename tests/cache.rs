use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use virotaxa::cache::{CacheRegistry, MaterializeMode, REGISTRY_FILE};
use virotaxa::domain::{HashPrefix, Sha256Hex};
use virotaxa::download::{DownloadedSource, HttpHeaders, save_download};
use virotaxa::error::VirotaxaError;

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

#[test]
fn store_and_read_back_by_prefix() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(root.join("cache")).unwrap();
    let bytes = b"virus_tax_id\tvirus_name\n11676\tHIV-1\n";

    let hash = cache.store(bytes).unwrap();
    assert_eq!(hash, Sha256Hex::compute(bytes));

    let prefix: HashPrefix = hash.short().parse().unwrap();
    assert_eq!(cache.read(&prefix).unwrap(), bytes);
    let path = cache.retrieve(&prefix).unwrap();
    assert_eq!(path.file_name(), Some(format!("vhdb_{}.tsv", hash.short()).as_str()));
}

#[test]
fn storing_twice_keeps_one_entry() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(&root).unwrap();
    let first = cache.store(b"same bytes").unwrap();
    let second = cache.store(b"same bytes").unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.list().unwrap().len(), 1);
}

#[test]
fn unknown_prefix_is_not_found() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(&root).unwrap();
    cache.store(b"something").unwrap();
    let prefix: HashPrefix = "00000000".parse().unwrap();
    assert_matches!(cache.resolve(&prefix), Err(VirotaxaError::HashNotFound(_)));
}

#[test]
fn short_prefix_is_rejected() {
    assert_matches!(
        "abc123".parse::<HashPrefix>(),
        Err(VirotaxaError::InvalidHashPrefix(_))
    );
    assert_matches!(
        "not-a-hash".parse::<HashPrefix>(),
        Err(VirotaxaError::InvalidHashPrefix(_))
    );
}

#[test]
fn shared_prefix_is_ambiguous() {
    let (_dir, root) = temp_root();
    let first = format!("abcdef01{}", "1".repeat(56));
    let second = format!("abcdef01{}", "2".repeat(56));
    fs::write(root.join("a.tsv"), b"a").unwrap();
    fs::write(root.join("b.tsv"), b"b").unwrap();
    let registry = format!(
        r#"{{
            "_version": "1.0",
            "entries": {{
                "{first}": {{"filename": "a.tsv", "cached_at": "2026-01-01T00:00:00Z", "file_size_bytes": 1}},
                "{second}": {{"filename": "b.tsv", "cached_at": "2026-01-02T00:00:00Z", "file_size_bytes": 1}}
            }}
        }}"#
    );
    fs::write(root.join(REGISTRY_FILE), registry).unwrap();

    let cache = CacheRegistry::open(&root).unwrap();
    let prefix: HashPrefix = "abcdef01".parse().unwrap();
    assert_matches!(
        cache.resolve(&prefix),
        Err(VirotaxaError::AmbiguousHash { matches, .. }) if matches.len() == 2
    );

    let longer: HashPrefix = "abcdef011".parse().unwrap();
    assert_eq!(cache.resolve(&longer).unwrap().file(), root.join("a.tsv").as_path());

    let listed: Vec<_> = cache
        .list()
        .unwrap()
        .into_iter()
        .map(|entry| entry.hash.to_string())
        .collect();
    assert_eq!(listed, vec![second, first]);
}

#[test]
fn deleted_file_is_restored_on_store() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(&root).unwrap();
    let hash = cache.store(b"restore me").unwrap();
    let prefix = HashPrefix::from(&hash);
    let path = cache.retrieve(&prefix).unwrap();

    fs::remove_file(&path).unwrap();
    assert_matches!(cache.resolve(&prefix), Err(VirotaxaError::HashNotFound(_)));

    cache.store(b"restore me").unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"restore me");
}

#[test]
fn overwritten_file_is_restored_on_store() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(&root).unwrap();
    let hash = cache.store(b"virus_tax_id\n11676\n").unwrap();
    let prefix = HashPrefix::from(&hash);
    let path = cache.retrieve(&prefix).unwrap();

    fs::write(&path, b"virus_tax_id\n99999\n").unwrap();
    assert_matches!(
        cache.read(&prefix),
        Err(VirotaxaError::CacheCorrupted { actual, .. })
            if actual == Sha256Hex::compute(b"virus_tax_id\n99999\n").to_string()
    );

    cache.store(b"virus_tax_id\n11676\n").unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"virus_tax_id\n11676\n");
    assert_eq!(cache.read(&prefix).unwrap(), b"virus_tax_id\n11676\n");
}

#[test]
fn store_file_keeps_download_provenance() {
    let (_dir, root) = temp_root();
    let source = DownloadedSource::new(
        "https://example.org/virushostdb.tsv",
        b"table".to_vec(),
        HttpHeaders {
            etag: Some("\"abc\"".to_string()),
            ..HttpHeaders::default()
        },
    );
    let local = root.join("downloads").join("vhdb.tsv");
    save_download(&source, &local).unwrap();

    let cache = CacheRegistry::open(root.join("cache")).unwrap();
    let hash = cache.store_file(&local).unwrap();
    let entry = cache.resolve(&HashPrefix::from(&hash)).unwrap();
    let download = entry.download.unwrap();
    assert_eq!(download.url, "https://example.org/virushostdb.tsv");
    assert_eq!(download.http_headers.etag.as_deref(), Some("\"abc\""));
}

#[test]
fn materialize_copies_and_links() {
    let (_dir, root) = temp_root();
    let cache = CacheRegistry::open(root.join("cache")).unwrap();
    let hash = cache.store(b"payload").unwrap();
    let prefix = HashPrefix::from(&hash);

    let copied = root.join("work").join("copy.tsv");
    cache.materialize(&prefix, &copied, MaterializeMode::Copy).unwrap();
    assert_eq!(fs::read(&copied).unwrap(), b"payload");

    let linked = root.join("work").join("link.tsv");
    cache.materialize(&prefix, &linked, MaterializeMode::Link).unwrap();
    assert_eq!(fs::read(&linked).unwrap(), b"payload");

    // a second materialization replaces the first
    cache.materialize(&prefix, &linked, MaterializeMode::Link).unwrap();
    assert_eq!(fs::read(&linked).unwrap(), b"payload");
}
