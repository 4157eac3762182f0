pub mod bloom;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod manager;
pub mod model;
pub mod parser;
pub mod query;
pub mod repository;
pub mod server;
pub mod storage;
pub mod web;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::config::Config;
use crate::error::{CatalogError, Result};
use crate::model::{Record, SearchQuery, SearchResults};
use crate::repository::Repository;

/// Configuration plus the backend it selected.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Catalog {
    config: Arc<Config>,
    repository: Arc<dyn Repository>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("repository", &self.repository.kind())
            .finish()
    }
}

impl Catalog {
    /// Build the configured backend with fsync-on-append durability.
    pub fn open(config: Config) -> Result<Self> {
        let repository = repository::open(&config.repository, true)?;
        Ok(Self::with_repository(config, repository))
    }

    pub fn with_repository(config: Config, repository: Arc<dyn Repository>) -> Self {
        Self {
            config: Arc::new(config),
            repository,
        }
    }

    /// Prepare backend storage (createindex).
    pub async fn create(config: &Config) -> Result<()> {
        repository::create(&config.repository).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Upsert one record. Failures are logged and returned.
    pub async fn index(&self, record: Record) -> Result<()> {
        if record.identifier.is_empty() {
            let err = CatalogError::caller_input("record identifier must not be empty");
            error!(error = %err, "index rejected");
            return Err(err);
        }

        let identifier = record.identifier.clone();
        match self.repository.insert(record).await {
            Ok(()) => {
                debug!(identifier = %identifier, "indexed");
                Ok(())
            }
            Err(err) => {
                error!(identifier = %identifier, error = %err, "index failed");
                Err(err)
            }
        }
    }

    /// Search, degrading to empty results on backend failure.
    pub async fn search(&self, query: &SearchQuery) -> SearchResults {
        self.try_search(query).await.unwrap_or_else(|err| {
            error!(error = %err, "search failed");
            SearchResults::empty()
        })
    }

    /// Identifier lookup, degrading to empty results on backend failure.
    pub async fn get(&self, identifiers: &[String]) -> SearchResults {
        self.try_get(identifiers).await.unwrap_or_else(|err| {
            error!(error = %err, "get failed");
            SearchResults::empty()
        })
    }

    pub async fn try_search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let started = Instant::now();
        let results = self.repository.search(query).await?;
        Ok(timed(results, started))
    }

    pub async fn try_get(&self, identifiers: &[String]) -> Result<SearchResults> {
        let started = Instant::now();
        let results = self.repository.get(identifiers).await?;
        Ok(timed(results, started))
    }
}

fn timed(mut results: SearchResults, started: Instant) -> SearchResults {
    if results.elapsed_time_ms.is_none() {
        results.elapsed_time_ms = Some(started.elapsed().as_millis() as u64);
    }
    results
}
