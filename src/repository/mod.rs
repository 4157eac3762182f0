//! Storage backends behind one query contract.

pub mod elasticsearch;
pub mod memory;
pub mod segment;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{RepositoryConfig, RepositoryKind};
use crate::error::{CatalogError, Result};
use crate::model::{Record, SearchQuery, SearchResults};

pub use elasticsearch::ElasticsearchRepository;
pub use memory::MemoryRepository;
pub use segment::SegmentRepository;

/// Segment file used when `repository.url` is empty.
pub const DEFAULT_SEGMENT_PATH: &str = "geocatalog.seg";

/// Query contract every backend honours.
///
/// `search` must be observably equivalent to [`crate::query::select`] over the
/// backend's records: same predicates, identifier order and windowing.
#[async_trait]
pub trait Repository: Send + Sync {
    fn kind(&self) -> RepositoryKind;

    /// Upsert by identifier. Refreshes `provenance.inserted` and the derived bbox.
    async fn insert(&self, record: Record) -> Result<()>;

    /// Exact identifier lookup in request order. Unknown identifiers are omitted.
    async fn get(&self, identifiers: &[String]) -> Result<SearchResults>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults>;

    async fn update(&self, _record: Record) -> Result<()> {
        Err(CatalogError::not_implemented("update"))
    }

    async fn delete(&self, _identifier: &str) -> Result<()> {
        Err(CatalogError::not_implemented("delete"))
    }

    /// Number of records held.
    async fn count(&self) -> Result<usize>;
}

/// Build the configured backend.
pub fn open(config: &RepositoryConfig, strict_durability: bool) -> Result<Arc<dyn Repository>> {
    info!(kind = %config.kind, "opening repository");
    let repository: Arc<dyn Repository> = match config.kind {
        RepositoryKind::Memory => Arc::new(MemoryRepository::open(&config.url)?),
        RepositoryKind::Segment => Arc::new(SegmentRepository::open(
            segment_path(config),
            strict_durability,
        )?),
        RepositoryKind::Elasticsearch => Arc::new(ElasticsearchRepository::new(config)?),
    };
    Ok(repository)
}

/// Prepare backend storage (index creation for the delegating backend).
pub async fn create(config: &RepositoryConfig) -> Result<()> {
    match config.kind {
        RepositoryKind::Memory => Ok(()),
        RepositoryKind::Segment => {
            SegmentRepository::open(segment_path(config), true)?;
            Ok(())
        }
        RepositoryKind::Elasticsearch => ElasticsearchRepository::new(config)?.create().await,
    }
}

pub fn segment_path(config: &RepositoryConfig) -> &Path {
    if config.url.is_empty() {
        Path::new(DEFAULT_SEGMENT_PATH)
    } else {
        Path::new(&config.url)
    }
}

/// Request order, first occurrence wins.
pub(crate) fn dedupe(identifiers: &[String]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(identifiers.len());
    identifiers
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}
