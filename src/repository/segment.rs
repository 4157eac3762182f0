use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{dedupe, Repository};
use crate::bloom::IdentifierFilter;
use crate::config::RepositoryKind;
use crate::error::{CatalogError, Result};
use crate::model::{Record, SearchQuery, SearchResults};
use crate::query;
use crate::storage::{Segment, SegmentEntry};

const FILTER_CAPACITY: usize = 1_000_000;
const FILTER_FP_RATE: f64 = 0.01;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub moved: usize,
    pub dropped: usize,
}

/// Embedded backend over an append-only segment log.
///
/// Every insert appends a new version; the offset index points at all versions
/// of an identifier and reads use the last one. Compaction rewrites the log
/// with only the latest versions.
pub struct SegmentRepository {
    active_segment: Mutex<Segment>,
    index: RwLock<BTreeMap<String, Vec<u64>>>,
    identifiers: RwLock<IdentifierFilter>,
    strict_durability: bool,
}

impl fmt::Debug for SegmentRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = self.index.read().map(|idx| idx.len()).unwrap_or(0);
        f.debug_struct("SegmentRepository")
            .field("records", &records)
            .finish()
    }
}

impl SegmentRepository {
    /// Open the log at `path`, replaying it to rebuild the offset index.
    pub fn open(path: &Path, strict_durability: bool) -> Result<Self> {
        let mut segment = Segment::open(path, strict_durability).map_err(|e| {
            CatalogError::backend_unavailable(format!("cannot open segment {}", path.display()))
                .with_source(e)
        })?;

        let entries = segment.recover()?;
        let mut index: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut identifiers = IdentifierFilter::new(FILTER_CAPACITY, FILTER_FP_RATE);
        for (offset, entry) in &entries {
            identifiers.insert(&entry.identifier);
            index.entry(entry.identifier.clone()).or_default().push(*offset);
        }

        info!(
            path = %path.display(),
            versions = entries.len(),
            records = index.len(),
            "segment replayed"
        );

        Ok(Self {
            active_segment: Mutex::new(segment),
            index: RwLock::new(index),
            identifiers: RwLock::new(identifiers),
            strict_durability,
        })
    }

    fn read_record(&self, offset: u64) -> Result<Record> {
        let entry = {
            let segment = self.active_segment.lock().map_err(|_| CatalogError::poisoned())?;
            segment.read(offset)?
        };
        Ok(serde_json::from_slice(&entry.payload)?)
    }

    fn might_contain(&self, identifier: &str) -> Result<bool> {
        let filter = self.identifiers.read().map_err(|_| CatalogError::poisoned())?;
        Ok(filter.might_contain(identifier))
    }

    /// Rewrite the log keeping only the latest version of each record.
    ///
    /// Takes the index and segment locks for the whole pass.
    pub fn compact(&self) -> Result<CompactionStats> {
        info!("segment compaction starting");

        let mut index_lock = self.index.write().map_err(|_| CatalogError::poisoned())?;
        let mut segment_lock = self
            .active_segment
            .lock()
            .map_err(|_| CatalogError::poisoned())?;

        let old_path = segment_lock.file_path.clone();
        let new_path = old_path.with_extension("compacted");
        if new_path.exists() {
            fs::remove_file(&new_path)?;
        }
        let mut new_segment = Segment::open(&new_path, self.strict_durability)?;

        let mut new_index: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut stats = CompactionStats::default();

        for (identifier, offsets) in index_lock.iter() {
            let Some(&latest) = offsets.last() else {
                continue;
            };
            stats.dropped += offsets.len() - 1;

            match segment_lock.read(latest) {
                Ok(entry) => {
                    let offset = new_segment.append(&entry)?;
                    new_index.insert(identifier.clone(), vec![offset]);
                    stats.moved += 1;
                }
                Err(e) => {
                    warn!(identifier = %identifier, error = %e, "dropping unreadable record");
                    stats.dropped += 1;
                }
            }
        }
        new_segment.sync()?;
        drop(new_segment);

        fs::rename(&new_path, &old_path)?;
        *segment_lock = Segment::open(&old_path, self.strict_durability)?;
        *index_lock = new_index;

        let mut filter = self
            .identifiers
            .write()
            .map_err(|_| CatalogError::poisoned())?;
        filter.clear();
        for identifier in index_lock.keys() {
            filter.insert(identifier);
        }

        info!(moved = stats.moved, dropped = stats.dropped, "segment compaction complete");
        Ok(stats)
    }
}

#[async_trait]
impl Repository for SegmentRepository {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Segment
    }

    async fn insert(&self, mut record: Record) -> Result<()> {
        record.stamp(Utc::now());
        let entry = SegmentEntry {
            identifier: record.identifier.clone(),
            payload: serde_json::to_vec(&record)?,
        };

        // Lock order: index, segment, filter. Same as compaction.
        let mut index = self.index.write().map_err(|_| CatalogError::poisoned())?;
        let offset = {
            let mut segment = self.active_segment.lock().map_err(|_| CatalogError::poisoned())?;
            segment.append(&entry)?
        };
        {
            let mut filter = self.identifiers.write().map_err(|_| CatalogError::poisoned())?;
            filter.insert(&entry.identifier);
        }
        index.entry(entry.identifier).or_default().push(offset);
        drop(index);

        debug!(offset, "segment insert");
        Ok(())
    }

    async fn get(&self, identifiers: &[String]) -> Result<SearchResults> {
        let mut found = Vec::new();
        // Offsets stay valid only while the index lock is held.
        let index = self.index.read().map_err(|_| CatalogError::poisoned())?;
        for identifier in dedupe(identifiers) {
            if !self.might_contain(identifier)? {
                continue;
            }
            let Some(&offset) = index.get(identifier).and_then(|offsets| offsets.last()) else {
                continue;
            };
            match self.read_record(offset) {
                Ok(record) => found.push(record),
                Err(e) => warn!(identifier, error = %e, "skipping undecodable record"),
            }
        }
        Ok(SearchResults::lookup(found))
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let index = self.index.read().map_err(|_| CatalogError::poisoned())?;
        let mut records = Vec::with_capacity(index.len());
        for offsets in index.values() {
            let Some(&offset) = offsets.last() else {
                continue;
            };
            match self.read_record(offset) {
                Ok(record) => records.push(record),
                Err(e) => warn!(offset, error = %e, "skipping undecodable record"),
            }
        }
        drop(index);

        Ok(query::select(records.iter(), query))
    }

    async fn count(&self) -> Result<usize> {
        let index = self.index.read().map_err(|_| CatalogError::poisoned())?;
        Ok(index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.seg");

        {
            let repo = SegmentRepository::open(&path, true).unwrap();
            repo.insert(Record::new("a", "First").with_collection("landsat8"))
                .await
                .unwrap();
            repo.insert(Record::new("b", "Other")).await.unwrap();
            repo.insert(Record::new("a", "Second").with_collection("landsat8"))
                .await
                .unwrap();
        }

        let repo = SegmentRepository::open(&path, true).unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);

        let results = repo.get(&ids(&["a"])).await.unwrap();
        assert_eq!(results.records[0].properties.title, "Second");

        let page = repo
            .search(&SearchQuery::new().with_collections(["landsat8"]))
            .await
            .unwrap();
        assert_eq!(page.matches, 1);
    }

    #[tokio::test]
    async fn test_compaction_keeps_latest_versions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.seg");
        let repo = SegmentRepository::open(&path, false).unwrap();

        for i in 0..3 {
            repo.insert(Record::new("a", format!("v{}", i))).await.unwrap();
        }
        repo.insert(Record::new("b", "only")).await.unwrap();
        let before = fs::metadata(&path).unwrap().len();

        let stats = repo.compact().unwrap();
        assert_eq!(stats, CompactionStats { moved: 2, dropped: 2 });
        assert!(fs::metadata(&path).unwrap().len() < before);
        assert!(!path.with_extension("compacted").exists());

        let results = repo.get(&ids(&["a", "b"])).await.unwrap();
        assert_eq!(results.records[0].properties.title, "v2");
        assert_eq!(results.records[1].properties.title, "only");

        // Appends after compaction land in the rewritten file.
        repo.insert(Record::new("c", "after")).await.unwrap();
        drop(repo);
        let reopened = SegmentRepository::open(&path, false).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_search_pages_in_identifier_order() {
        let dir = tempdir().unwrap();
        let repo = SegmentRepository::open(&dir.path().join("catalog.seg"), false).unwrap();
        for i in (0..25).rev() {
            repo.insert(Record::new(format!("rec-{:02}", i), "")).await.unwrap();
        }

        let page = repo.search(&SearchQuery::new().with_page(20, 10)).await.unwrap();
        assert_eq!(page.matches, 25);
        assert_eq!(page.returned, 5);
        assert_eq!(page.next_offset, 0);
        assert_eq!(page.records[0].identifier, "rec-20");
    }

    #[tokio::test]
    async fn test_get_unknown_identifier() {
        let dir = tempdir().unwrap();
        let repo = SegmentRepository::open(&dir.path().join("catalog.seg"), false).unwrap();
        repo.insert(Record::new("a", "")).await.unwrap();

        let results = repo.get(&ids(&["zzz"])).await.unwrap();
        assert_eq!(results.matches, 0);
        assert!(results.records.is_empty());
    }
}
