//! Delegating backend: translates queries into Elasticsearch request bodies.
//!
//! The translation functions are pure so they can be checked without a
//! running engine. Hits are mapped back with [`record_from_source`], field by
//! field, using the configured field names.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{dedupe, Repository};
use crate::config::{RepositoryConfig, RepositoryKind};
use crate::error::{CatalogError, ErrorKind, Result};
use crate::model::{Geometry, Record, SearchQuery, SearchResults, TimeFilter};
use crate::query::{self, NEAR_MATCH_HOURS};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend field names, overridable through `repository.mappings`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    pub identifier: String,
    pub title: String,
    pub abstract_text: String,
    pub collection: String,
    pub datetime: String,
    pub geometry: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            identifier: "identifier".to_string(),
            title: "properties.title".to_string(),
            abstract_text: "properties.abstract".to_string(),
            collection: "properties.collection".to_string(),
            datetime: "properties.datetime".to_string(),
            geometry: "geometry".to_string(),
        }
    }
}

impl FieldMap {
    pub fn from_config(config: &RepositoryConfig) -> Self {
        let defaults = Self::default();
        Self {
            identifier: config.field("identifier", &defaults.identifier).to_string(),
            title: config.field("title", &defaults.title).to_string(),
            abstract_text: config.field("abstract", &defaults.abstract_text).to_string(),
            collection: config.field("collection", &defaults.collection).to_string(),
            datetime: config.field("datetime", &defaults.datetime).to_string(),
            geometry: config.field("geometry", &defaults.geometry).to_string(),
        }
    }

    // Keyword sub-field used for substring matching on analysed text.
    fn raw(field: &str) -> String {
        format!("{}.raw", field)
    }
}

pub struct ElasticsearchRepository {
    client: Client,
    index_url: Url,
    fields: FieldMap,
}

impl ElasticsearchRepository {
    /// `config.url` is the index URL, e.g. `http://localhost:9200/geocatalog`.
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let index_url = Url::parse(&config.url).map_err(|e| {
            CatalogError::config(format!("invalid repository url '{}': {}", config.url, e))
        })?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            index_url,
            fields: FieldMap::from_config(config),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.index_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CatalogError::config(format!("repository url {} cannot be a base", self.index_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Create the index with the geo_shape/date/keyword mappings. An existing index is left alone.
    pub async fn create(&self) -> Result<()> {
        let response = self
            .client
            .put(self.index_url.clone())
            .json(&index_body(&self.fields))
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                info!(index = %self.index_url, "index already exists");
                return Ok(());
            }
            return Err(status_error("create", StatusCode::BAD_REQUEST, &body, ErrorKind::Config));
        }

        expect_success(response, "create", ErrorKind::Config).await?;
        info!(index = %self.index_url, "index created");
        Ok(())
    }

    async fn run_search(&self, body: &Value) -> Result<SearchResponse> {
        let response = self
            .client
            .post(self.endpoint(&["_search"])?)
            .json(body)
            .send()
            .await?;
        decode(expect_success(response, "search", ErrorKind::Query).await?).await
    }
}

#[async_trait]
impl Repository for ElasticsearchRepository {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Elasticsearch
    }

    async fn insert(&self, mut record: Record) -> Result<()> {
        record.stamp(Utc::now());
        let document = document_from_record(&record, &self.fields)?;

        let mut url = self.endpoint(&["_doc", &record.identifier])?;
        url.set_query(Some("refresh=true"));

        let response = self.client.put(url).json(&document).send().await?;
        expect_success(response, "insert", ErrorKind::Serialization).await?;
        debug!(identifier = %record.identifier, "elasticsearch insert");
        Ok(())
    }

    async fn get(&self, identifiers: &[String]) -> Result<SearchResults> {
        let wanted = dedupe(identifiers);
        if wanted.is_empty() {
            return Ok(SearchResults::empty());
        }

        let response = self.run_search(&ids_body(&wanted)).await?;
        let mut by_id: HashMap<String, Record> = response
            .hits
            .hits
            .iter()
            .map(|hit| record_from_source(&hit.source, &self.fields))
            .map(|record| (record.identifier.clone(), record))
            .collect();

        let found = wanted.into_iter().filter_map(|id| by_id.remove(id)).collect();
        Ok(SearchResults::lookup(found))
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let body = search_body(query, &self.fields);
        debug!(body = %body, "elasticsearch search");

        let response = self.run_search(&body).await?;
        let records: Vec<Record> = response
            .hits
            .hits
            .iter()
            .map(|hit| record_from_source(&hit.source, &self.fields))
            .collect();

        let matches = response
            .hits
            .total
            .map(|total| total.value())
            .unwrap_or(records.len());
        let page = query::window(matches, query.offset, query.limit);

        Ok(SearchResults {
            matches,
            returned: records.len(),
            next_offset: page.next_offset,
            elapsed_time_ms: response.took,
            records,
        })
    }

    async fn count(&self) -> Result<usize> {
        let response = self.client.get(self.endpoint(&["_count"])?).send().await?;
        let count: CountResponse =
            decode(expect_success(response, "count", ErrorKind::Query).await?).await?;
        Ok(count.count)
    }
}

// --- RESPONSE SHAPES ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: Option<u64>,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<Total>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `{"value": n, "relation": "eq"}` on 7.x, a bare number on older engines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Total {
    Object { value: usize },
    Count(usize),
}

impl Total {
    fn value(&self) -> usize {
        match self {
            Total::Object { value } => *value,
            Total::Count(value) => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Value,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

async fn expect_success(response: Response, operation: &str, client_kind: ErrorKind) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(operation, status, &body, client_kind))
}

/// 5xx means the engine is unavailable; 4xx is attributed to the request.
fn status_error(operation: &str, status: StatusCode, body: &str, client_kind: ErrorKind) -> CatalogError {
    let kind = if status.is_server_error() {
        ErrorKind::BackendUnavailable
    } else {
        client_kind
    };
    CatalogError::new(kind, format!("elasticsearch {} failed ({}): {}", operation, status, body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        CatalogError::query(format!("unexpected elasticsearch response: {}", e)).with_source(e)
    })
}

// --- REQUEST TRANSLATION ---

fn keyed(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Escape the wildcard metacharacters in a user term.
fn escape_wildcard(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn term_clause(term: &str, fields: &FieldMap) -> Value {
    if term.is_empty() {
        return json!({ "match_all": {} });
    }

    let pattern = format!("*{}*", escape_wildcard(&term.to_lowercase()));
    let wildcard = |field: String| {
        json!({ "wildcard": keyed(&field, json!({ "value": pattern, "case_insensitive": true })) })
    };

    json!({
        "bool": {
            "should": [
                { "simple_query_string": {
                    "query": term,
                    "fields": [fields.title, fields.abstract_text, fields.identifier],
                    "lenient": true
                } },
                wildcard(FieldMap::raw(&fields.title)),
                wildcard(FieldMap::raw(&fields.abstract_text)),
                wildcard(fields.identifier.clone()),
            ],
            "minimum_should_match": 1
        }
    })
}

fn time_clause(filter: &TimeFilter, fields: &FieldMap) -> Value {
    let (start, end) = match *filter {
        TimeFilter::Near(instant) => {
            let tolerance = TimeDelta::hours(NEAR_MATCH_HOURS);
            (instant - tolerance, instant + tolerance)
        }
        TimeFilter::Range(start, end) => (start, end),
    };
    json!({
        "range": keyed(&fields.datetime, json!({
            "gte": start.to_rfc3339(),
            "lte": end.to_rfc3339(),
        }))
    })
}

/// Full search body: predicates as filters, paging, total hits and identifier order.
pub fn search_body(query: &SearchQuery, fields: &FieldMap) -> Value {
    let mut filters = Vec::new();

    if !query.collections.is_empty() {
        filters.push(json!({ "terms": keyed(&fields.collection, json!(query.collections)) }));
    }

    if let Some([minx, miny, maxx, maxy]) = query.bbox {
        filters.push(json!({
            "geo_shape": keyed(&fields.geometry, json!({
                "shape": {
                    "type": "envelope",
                    "coordinates": [[minx, maxy], [maxx, miny]]
                },
                "relation": "intersects"
            }))
        }));
    }

    if let Some(time) = &query.time {
        filters.push(time_clause(time, fields));
    }

    json!({
        "query": {
            "bool": {
                "must": [term_clause(&query.term, fields)],
                "filter": filters
            }
        },
        "from": query.offset,
        "size": query.limit,
        "track_total_hits": true,
        "sort": [keyed(&fields.identifier, json!("asc"))]
    })
}

pub fn ids_body(identifiers: &[&str]) -> Value {
    json!({
        "query": { "ids": { "values": identifiers } },
        "size": identifiers.len()
    })
}

fn put_mapping(root: &mut Map<String, Value>, path: &str, definition: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(leaf) = parts.pop() else {
        return;
    };

    let mut cursor = root;
    for part in parts {
        let entry = cursor
            .entry(part)
            .or_insert_with(|| json!({ "properties": {} }));
        cursor = match entry.get_mut("properties").and_then(Value::as_object_mut) {
            Some(properties) => properties,
            None => return,
        };
    }
    cursor.insert(leaf.to_string(), definition);
}

/// Index creation body with nested object mappings for dotted field names.
pub fn index_body(fields: &FieldMap) -> Value {
    let text = json!({ "type": "text", "fields": { "raw": { "type": "keyword" } } });

    let mut properties = Map::new();
    put_mapping(&mut properties, &fields.identifier, json!({ "type": "keyword" }));
    put_mapping(&mut properties, &fields.title, text.clone());
    put_mapping(&mut properties, &fields.abstract_text, text);
    put_mapping(&mut properties, &fields.collection, json!({ "type": "keyword" }));
    put_mapping(&mut properties, &fields.datetime, json!({ "type": "date" }));
    put_mapping(&mut properties, &fields.geometry, json!({ "type": "geo_shape" }));

    json!({ "mappings": { "properties": properties } })
}

// --- DOCUMENT MAPPING ---

fn get_path<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(source, |value, part| value.get(part))
}

fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut cursor = target;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        cursor = map
            .entry(part)
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn text_at(source: &Value, path: &str) -> String {
    get_path(source, path)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decode_at<T: DeserializeOwned + Default>(source: &Value, path: &str) -> T {
    match get_path(source, path) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(field = path, error = %e, "ignoring malformed field");
            T::default()
        }),
    }
}

/// Engine document for a record, with the mapped fields at their configured paths.
pub fn document_from_record(record: &Record, fields: &FieldMap) -> Result<Value> {
    let mut document = json!({
        "type": record.record_type,
        "bbox": serde_json::to_value(record.bbox)?,
        "links": serde_json::to_value(&record.links)?,
        "assets": serde_json::to_value(&record.assets)?,
        "properties": {
            "keywords": record.properties.keywords,
            "language": record.properties.language,
            "provenance": serde_json::to_value(&record.properties.provenance)?,
        }
    });

    set_path(&mut document, &fields.identifier, json!(record.identifier));
    set_path(&mut document, &fields.title, json!(record.properties.title));
    set_path(&mut document, &fields.abstract_text, json!(record.properties.abstract_text));
    set_path(&mut document, &fields.collection, json!(record.properties.collection));
    set_path(
        &mut document,
        &fields.datetime,
        record
            .properties
            .datetime
            .map(|dt| json!(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
    );
    set_path(&mut document, &fields.geometry, serde_json::to_value(&record.geometry)?);

    Ok(document)
}

/// Inverse of [`document_from_record`]. Malformed fields fall back to empty values.
pub fn record_from_source(source: &Value, fields: &FieldMap) -> Record {
    let mut record = Record::new(text_at(source, &fields.identifier), text_at(source, &fields.title));

    if let Some(record_type) = source.get("type").and_then(Value::as_str) {
        record.record_type = record_type.to_string();
    }
    record.properties.abstract_text = text_at(source, &fields.abstract_text);
    record.properties.collection = text_at(source, &fields.collection);
    record.properties.datetime = match get_path(source, &fields.datetime).and_then(Value::as_str) {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                warn!(identifier = %record.identifier, value = raw, error = %e, "unparsable datetime");
                None
            }
        },
        None => None,
    };
    record.properties.keywords = decode_at(source, "properties.keywords");
    record.properties.language = decode_at(source, "properties.language");
    record.properties.provenance = decode_at(source, "properties.provenance");

    record.geometry = decode_at::<Option<Geometry>>(source, &fields.geometry).unwrap_or_default();
    record.bbox = decode_at(source, "bbox");
    if record.bbox.is_none() {
        record.bbox = record.geometry.bounds();
    }
    record.links = decode_at(source, "links");
    record.assets = decode_at(source, "assets");

    record
}
