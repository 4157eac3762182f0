use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{dedupe, Repository};
use crate::config::RepositoryKind;
use crate::error::{CatalogError, ErrorKind, Result};
use crate::ingest;
use crate::model::{Record, SearchQuery, SearchResults};
use crate::query;

/// Reference backend: every search is a scan through [`query::select`].
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload from the JSON file named by `url` (`file://` prefix optional).
    ///
    /// An empty url or `memory://` starts empty. An unreadable file is logged
    /// and also starts empty; a file that is not records is an error.
    pub fn open(url: &str) -> Result<Self> {
        let repository = Self::new();
        if url.is_empty() || url == "memory://" {
            return Ok(repository);
        }

        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        let loaded = match ingest::load_records(path) {
            Ok(records) => records,
            Err(e) if e.kind == ErrorKind::Io => {
                warn!(path = %path.display(), error = %e, "cannot load records, starting empty");
                return Ok(repository);
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        {
            let mut records = repository
                .records
                .write()
                .map_err(|_| CatalogError::poisoned())?;
            for mut record in loaded {
                record.stamp(now);
                records.insert(record.identifier.clone(), record);
            }
            info!(records = records.len(), path = %path.display(), "memory repository loaded");
        }
        Ok(repository)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Memory
    }

    async fn insert(&self, mut record: Record) -> Result<()> {
        record.stamp(Utc::now());
        debug!(identifier = %record.identifier, "memory insert");

        let mut records = self.records.write().map_err(|_| CatalogError::poisoned())?;
        records.insert(record.identifier.clone(), record);
        Ok(())
    }

    async fn get(&self, identifiers: &[String]) -> Result<SearchResults> {
        let records = self.records.read().map_err(|_| CatalogError::poisoned())?;
        let found = dedupe(identifiers)
            .into_iter()
            .filter_map(|id| records.get(id).cloned())
            .collect();
        Ok(SearchResults::lookup(found))
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let records = self.records.read().map_err(|_| CatalogError::poisoned())?;
        Ok(query::select(records.values(), query))
    }

    async fn count(&self) -> Result<usize> {
        let records = self.records.read().map_err(|_| CatalogError::poisoned())?;
        Ok(records.len())
    }
}
