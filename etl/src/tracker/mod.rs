//! Processed-file log shared by successive runs of an incremental stage.
//!
//! A run loads the log once, lists the source prefix for keys the log does
//! not contain yet, processes them, and writes the log back once at the
//! end. Keys are treated as immutable: a key in the log is never offered
//! again even if the object behind it changes.

use crate::storage::{ObjectStorage, WriteCondition};
use common::{Error, Result};
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};

/// How `commit` writes the log back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Plain overwrite. Two runs racing on the same log both succeed and
    /// the later write wins; the union it writes still contains everything
    /// it loaded, but files may have been processed twice.
    #[default]
    Overwrite,
    /// Compare-and-swap against the version seen at load time. A run that
    /// lost the race gets `Error::Conflict` and writes nothing.
    Conditional,
}

/// Where a `ProcessedSet` came from, for conditional commits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum LogOrigin {
    #[default]
    Missing,
    Stored { version: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct ProcessedSet {
    ids: BTreeSet<String>,
    origin: LogOrigin,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the log text: one identifier per line, surrounding whitespace
    /// trimmed, blank lines ignored.
    pub fn parse(text: &str) -> Self {
        let ids = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            ids,
            origin: LogOrigin::Missing,
        }
    }

    fn with_origin(mut self, origin: LogOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// ETag of the log object when it was loaded.
    pub fn version(&self) -> Option<&str> {
        match &self.origin {
            LogOrigin::Stored { version } => version.as_deref(),
            LogOrigin::Missing => None,
        }
    }

    /// Sorted, newline-separated, no trailing newline.
    pub fn to_log_text(&self) -> String {
        self.ids.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

impl<S: Into<String>> FromIterator<S> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
            origin: LogOrigin::Missing,
        }
    }
}

/// A source object that is not in the processed log yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub key: String,
}

impl CandidateFile {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub async fn fetch(&self, storage: &dyn ObjectStorage) -> Result<Vec<u8>> {
        storage.get_object(&self.key).await
    }
}

/// Reads the processed log at `key`. A missing log is the first run and
/// yields an empty set; every other failure is returned.
pub async fn load_processed_set(storage: &dyn ObjectStorage, key: &str) -> Result<ProcessedSet> {
    info!(bucket = storage.bucket(), key, "Reading processed log");

    let object = match storage.get_object_versioned(key).await {
        Ok(object) => object,
        Err(e) if e.is_not_found() => {
            warn!(
                bucket = storage.bucket(),
                key, "Processed log not found, assuming no files processed yet"
            );
            return Ok(ProcessedSet::new());
        }
        Err(e) => return Err(e),
    };

    let text = String::from_utf8(object.data)?;
    let processed = ProcessedSet::parse(&text).with_origin(LogOrigin::Stored {
        version: object.version,
    });

    info!(entries = processed.len(), "Processed log read");
    Ok(processed)
}

/// Lists `prefix` and keeps keys ending in `suffix` that are not in
/// `processed`, in listing order, each key at most once.
pub async fn discover_new_files(
    storage: &dyn ObjectStorage,
    prefix: &str,
    processed: &ProcessedSet,
    suffix: &str,
) -> Result<Vec<CandidateFile>> {
    let listed = storage.list_objects(prefix).await?;
    let listed_count = listed.len();

    let mut seen = HashSet::new();
    let candidates: Vec<CandidateFile> = listed
        .into_iter()
        .filter(|key| key.ends_with(suffix) && !processed.contains(key))
        .filter(|key| seen.insert(key.clone()))
        .map(CandidateFile::new)
        .collect();

    info!(
        bucket = storage.bucket(),
        prefix,
        suffix,
        listed = listed_count,
        candidates = candidates.len(),
        "Discovered new files"
    );
    Ok(candidates)
}

/// Writes `processed ∪ newly_ingested` to `key` and returns the union.
pub async fn commit(
    storage: &dyn ObjectStorage,
    key: &str,
    processed: &ProcessedSet,
    newly_ingested: &BTreeSet<String>,
    mode: CommitMode,
) -> Result<ProcessedSet> {
    if let Some(bad) = newly_ingested
        .iter()
        .find(|id| id.is_empty() || id.contains(['\n', '\r']))
    {
        return Err(Error::InvalidInput(format!(
            "identifier {:?} cannot be stored in the processed log",
            bad
        )));
    }

    let mut updated = processed.clone();
    updated.ids.extend(newly_ingested.iter().cloned());
    let body = updated.to_log_text();

    info!(
        bucket = storage.bucket(),
        key,
        entries = updated.len(),
        added = updated.len() - processed.len(),
        ?mode,
        "Updating processed log"
    );

    match mode {
        CommitMode::Overwrite => storage.put_object(key, body.as_bytes()).await?,
        CommitMode::Conditional => {
            let condition = match &processed.origin {
                LogOrigin::Missing => WriteCondition::NotExists,
                LogOrigin::Stored {
                    version: Some(version),
                } => WriteCondition::Matches(version.clone()),
                LogOrigin::Stored { version: None } => {
                    return Err(Error::Storage(format!(
                        "no version token for {}; conditional commit unavailable",
                        key
                    )));
                }
            };
            storage.put_object_if(key, body.as_bytes(), condition).await?;
        }
    }

    info!("Processed log updated successfully");
    Ok(updated.with_origin(LogOrigin::Stored { version: None }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreStorage;

    const LOG: &str = "logs/processed_files.txt";

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded(keys: &[&str]) -> ObjectStoreStorage {
        let storage = ObjectStoreStorage::in_memory("bronze");
        for key in keys {
            storage.put_object(key, b"payload").await.unwrap();
        }
        storage
    }

    #[test]
    fn parse_ignores_blank_lines_and_carriage_returns() {
        let set = ProcessedSet::parse("a.csv\r\n\n   \nb.csv\n\n");
        assert_eq!(set.ids(), &ids(&["a.csv", "b.csv"]));
        assert!(ProcessedSet::parse("").is_empty());
        assert!(ProcessedSet::parse("\n").is_empty());
    }

    #[test]
    fn parse_trims_hand_edited_entries() {
        let set = ProcessedSet::parse("a.csv \n  b.csv\t\n");
        assert_eq!(set.ids(), &ids(&["a.csv", "b.csv"]));
        assert!(set.contains("b.csv"));
    }

    #[test]
    fn log_text_is_sorted_and_deterministic() {
        let set: ProcessedSet = ["c.csv", "a.csv", "b.csv", "a.csv"].into_iter().collect();
        assert_eq!(set.to_log_text(), "a.csv\nb.csv\nc.csv");
    }

    #[tokio::test]
    async fn missing_log_is_empty_set() {
        let storage = ObjectStoreStorage::in_memory("silver");
        let set = load_processed_set(&storage, LOG).await.unwrap();
        assert!(set.is_empty());
        assert!(set.version().is_none());
    }

    #[tokio::test]
    async fn non_utf8_log_is_fatal() {
        let storage = ObjectStoreStorage::in_memory("silver");
        storage.put_object(LOG, &[0xff, 0xfe, 0x00]).await.unwrap();
        let err = load_processed_set(&storage, LOG).await.unwrap_err();
        assert!(matches!(err, Error::Utf8(_)));
    }

    #[tokio::test]
    async fn discovery_filters_by_suffix_and_log() {
        let storage = seeded(&["a.csv", "b.csv", "c.txt"]).await;
        let processed: ProcessedSet = ["a.csv"].into_iter().collect();

        let found = discover_new_files(&storage, "", &processed, ".csv").await.unwrap();
        assert_eq!(found, vec![CandidateFile::new("b.csv")]);
    }

    #[tokio::test]
    async fn discovery_suffix_is_case_sensitive() {
        let storage = seeded(&["in/a.CSV", "in/b.csv"]).await;
        let found = discover_new_files(&storage, "in", &ProcessedSet::new(), ".csv")
            .await
            .unwrap();
        assert_eq!(found, vec![CandidateFile::new("in/b.csv")]);
    }

    #[tokio::test]
    async fn discovery_is_exact_complement_and_idempotent() {
        let keys = ["in/1.csv", "in/2.csv", "in/3.csv", "in/4.json", "in/5.csv"];
        let storage = seeded(&keys).await;
        let processed: ProcessedSet = ["in/2.csv", "in/5.csv", "elsewhere/9.csv"]
            .into_iter()
            .collect();

        let first = discover_new_files(&storage, "in", &processed, ".csv").await.unwrap();
        let second = discover_new_files(&storage, "in", &processed, ".csv").await.unwrap();
        assert_eq!(first, second);

        let found: BTreeSet<String> = first.iter().map(|c| c.key.clone()).collect();
        assert_eq!(found, ids(&["in/1.csv", "in/3.csv"]));
        assert_eq!(found.len(), first.len());
        assert!(found.iter().all(|k| !processed.contains(k)));
    }

    #[tokio::test]
    async fn commit_round_trips_union() {
        let storage = ObjectStoreStorage::in_memory("silver");
        let before: ProcessedSet = ["a.csv", "b.csv"].into_iter().collect();
        let new = ids(&["b.csv", "c.csv"]);

        let committed = commit(&storage, LOG, &before, &new, CommitMode::Overwrite)
            .await
            .unwrap();
        let reloaded = load_processed_set(&storage, LOG).await.unwrap();

        assert_eq!(reloaded.ids(), &ids(&["a.csv", "b.csv", "c.csv"]));
        assert_eq!(committed.ids(), reloaded.ids());
        assert!(before.ids().is_subset(reloaded.ids()));
    }

    #[tokio::test]
    async fn commit_with_nothing_new_keeps_entries() {
        let storage = ObjectStoreStorage::in_memory("silver");
        let before: ProcessedSet = ["a.csv"].into_iter().collect();
        commit(&storage, LOG, &before, &BTreeSet::new(), CommitMode::Overwrite)
            .await
            .unwrap();
        let reloaded = load_processed_set(&storage, LOG).await.unwrap();
        assert_eq!(reloaded.ids(), before.ids());
    }

    #[tokio::test]
    async fn commit_rejects_identifiers_with_line_breaks() {
        let storage = ObjectStoreStorage::in_memory("silver");
        let err = commit(
            &storage,
            LOG,
            &ProcessedSet::new(),
            &ids(&["bad\nkey.csv"]),
            CommitMode::Overwrite,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!storage.check_file_exists(LOG).await.unwrap());
    }

    #[tokio::test]
    async fn conditional_commit_detects_concurrent_run() {
        let storage = ObjectStoreStorage::in_memory("silver");
        storage.put_object(LOG, b"a.csv").await.unwrap();

        let run_one = load_processed_set(&storage, LOG).await.unwrap();
        let run_two = load_processed_set(&storage, LOG).await.unwrap();

        commit(&storage, LOG, &run_one, &ids(&["b.csv"]), CommitMode::Conditional)
            .await
            .unwrap();
        let err = commit(&storage, LOG, &run_two, &ids(&["b.csv"]), CommitMode::Conditional)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = load_processed_set(&storage, LOG).await.unwrap();
        assert_eq!(stored.ids(), &ids(&["a.csv", "b.csv"]));
    }

    #[tokio::test]
    async fn conditional_commit_on_first_run_creates_log_once() {
        let storage = ObjectStoreStorage::in_memory("silver");
        let run_one = load_processed_set(&storage, LOG).await.unwrap();
        let run_two = load_processed_set(&storage, LOG).await.unwrap();

        commit(&storage, LOG, &run_one, &ids(&["a.csv"]), CommitMode::Conditional)
            .await
            .unwrap();
        let err = commit(&storage, LOG, &run_two, &ids(&["b.csv"]), CommitMode::Conditional)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
