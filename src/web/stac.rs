//! STAC dialect (API 0.6.2): catalog definition, OpenAPI document, item search
//! and single-item lookup, answered as `ItemCollection`s.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::params::Params;
use super::{settle, Exception, Response};
use crate::config::Config;
use crate::model::{BBox, Geometry, Properties, Record, SearchQuery, SearchResults};
use crate::Catalog;

pub const STAC_VERSION: &str = "0.6.2";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Link {
    fn new(rel: &str, href: String) -> Self {
        Self {
            rel: rel.to_string(),
            href,
            media_type: None,
            title: None,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Item {
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    pub geometry: Geometry,
    pub properties: Properties,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub collection: String,
    pub links: Vec<Link>,
    pub assets: BTreeMap<String, Asset>,
}

impl Item {
    pub fn from_record(record: Record, base_url: &str) -> Self {
        let mut links = vec![Link::new(
            "self",
            format!("{}/items/{}", base_url.trim_end_matches('/'), record.identifier),
        )];
        links.extend(record.links.into_iter().map(|link| Link {
            rel: if link.name.is_empty() {
                "alternate".to_string()
            } else {
                link.name
            },
            href: link.url,
            media_type: link.protocol,
            title: (!link.description.is_empty()).then_some(link.description),
        }));

        let assets = record
            .assets
            .into_iter()
            .map(|asset| {
                (
                    asset.name,
                    Asset {
                        href: asset.href,
                        media_type: asset.media_type,
                        title: asset.title,
                    },
                )
            })
            .collect();

        Self {
            item_type: "Feature",
            bbox: record.bbox.or_else(|| record.geometry.bounds()),
            collection: record.properties.collection.clone(),
            id: record.identifier,
            geometry: record.geometry,
            properties: record.properties,
            links,
            assets,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Context {
    pub matched: usize,
    pub returned: usize,
    pub limit: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ItemCollection {
    #[serde(rename = "type")]
    pub collection_type: &'static str,
    /// Absent on the last page
    #[serde(rename = "nextPageToken", skip_serializing_if = "is_zero")]
    pub next_page_token: usize,
    pub context: Context,
    pub items: Vec<Item>,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl ItemCollection {
    pub fn from_results(results: SearchResults, limit: usize, base_url: &str) -> Self {
        Self {
            collection_type: "ItemCollection",
            next_page_token: results.next_offset,
            context: Context {
                matched: results.matches,
                returned: results.returned,
                limit,
            },
            items: results
                .records
                .into_iter()
                .map(|record| Item::from_record(record, base_url))
                .collect(),
        }
    }
}

/// Landing document for `GET /`.
pub fn catalog_definition(config: &Config) -> Value {
    let base = config.server.url.trim_end_matches('/');
    let identification = &config.metadata.identification;
    json!({
        "stac_version": STAC_VERSION,
        "id": "geocatalog",
        "title": identification.title,
        "description": identification.abstract_text,
        "links": [
            Link::new("self", format!("{}/", base)),
            Link::new("search", format!("{}/stac/search", base)),
            Link::new("service-desc", format!("{}/api", base)),
        ]
    })
}

/// OpenAPI 3 description for `GET /api`, built from the identification metadata.
pub fn openapi_document(config: &Config) -> Value {
    let metadata = &config.metadata;
    let item_collection = json!({
        "description": "Items matching the request",
        "content": { "application/json": { "schema": { "type": "object" } } }
    });
    let search_parameters = json!([
        { "name": "bbox", "in": "query", "schema": { "type": "string" },
          "description": "minx,miny,maxx,maxy" },
        { "name": "time", "in": "query", "schema": { "type": "string" },
          "description": "RFC3339 instant, or start,end" },
        { "name": "filter", "in": "query", "schema": { "type": "string" } },
        { "name": "collections", "in": "query", "schema": { "type": "string" } },
        { "name": "limit", "in": "query", "schema": { "type": "integer", "minimum": 0 } },
        { "name": "next", "in": "query", "schema": { "type": "integer", "minimum": 0 } }
    ]);

    json!({
        "openapi": "3.0.0",
        "info": {
            "title": metadata.identification.title,
            "description": metadata.identification.abstract_text,
            "version": env!("CARGO_PKG_VERSION"),
            "contact": {
                "name": metadata.contact.name,
                "email": metadata.contact.email,
                "url": metadata.contact.url,
            },
            "license": { "name": "MIT", "url": "https://opensource.org/licenses/MIT" }
        },
        "servers": [{ "url": config.server.url }],
        "paths": {
            "/": {
                "get": {
                    "summary": "Catalog definition",
                    "responses": { "200": { "description": "STAC catalog" } }
                }
            },
            "/api": {
                "get": {
                    "summary": "This document",
                    "responses": { "200": { "description": "OpenAPI document" } }
                }
            },
            "/stac/search": {
                "get": {
                    "summary": "Search items",
                    "parameters": search_parameters,
                    "responses": { "200": item_collection, "400": { "description": "Invalid parameter" } }
                },
                "post": {
                    "summary": "Search items",
                    "requestBody": { "content": { "application/json": { "schema": { "type": "object" } } } },
                    "responses": { "200": item_collection, "400": { "description": "Invalid parameter" } }
                }
            },
            "/items/{id}": {
                "get": {
                    "summary": "Item by identifier",
                    "parameters": [
                        { "name": "id", "in": "path", "required": true, "schema": { "type": "string" } }
                    ],
                    "responses": { "200": item_collection }
                }
            }
        }
    })
}

/// Validate search parameters into a query. Nothing here touches the backend.
pub fn search_query(params: &Params, default_limit: usize) -> Result<SearchQuery, Exception> {
    let bbox = params.bbox()?;
    let time = params.time(&["time", "datetime"])?;
    let limit = params.count(&["limit"], default_limit)?;
    let next = params.count(&["next"], 0)?;

    let mut query = SearchQuery::new()
        .with_term(params.text(&["filter", "q"]))
        .with_collections(params.list(&["collections"]))
        .with_page(next, limit);
    query.bbox = bbox;
    query.time = time;
    Ok(query)
}

pub async fn search(catalog: &Catalog, params: &Params) -> Response {
    let query = match search_query(params, catalog.config().server.limit) {
        Ok(query) => query,
        Err(exception) => {
            debug!(code = exception.code, description = %exception.description, "stac search rejected");
            return Response::exception(exception);
        }
    };

    match settle(catalog.try_search(&query).await) {
        Ok(results) => Response::ok(&ItemCollection::from_results(
            results,
            query.limit,
            &catalog.config().server.url,
        )),
        Err(response) => response,
    }
}

pub async fn item(catalog: &Catalog, identifier: &str) -> Response {
    match settle(catalog.try_get(&[identifier.to_string()]).await) {
        Ok(results) => {
            let limit = results.returned;
            Response::ok(&ItemCollection::from_results(
                results,
                limit,
                &catalog.config().server.url,
            ))
        }
        Err(response) => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset as RecordAsset, Link as RecordLink};

    fn record() -> Record {
        Record::new("LC08_042034", "Landsat scene")
            .with_collection("landsat8")
            .with_bounds(-120.0, 35.0, -118.0, 37.0)
            .with_link(RecordLink {
                name: "".to_string(),
                url: "https://example.org/metadata.xml".to_string(),
                ..Default::default()
            })
            .with_link(RecordLink {
                name: "thumbnail".to_string(),
                url: "https://example.org/thumb.jpg".to_string(),
                ..Default::default()
            })
            .with_asset(RecordAsset {
                name: "B1".to_string(),
                href: "https://example.org/B1.TIF".to_string(),
                media_type: Some("image/tiff".to_string()),
                title: None,
            })
    }

    #[test]
    fn test_item_shape() {
        let item = Item::from_record(record(), "http://catalog.example.org/");
        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["type"], "Feature");
        assert_eq!(value["id"], "LC08_042034");
        assert_eq!(value["bbox"], json!([-120.0, 35.0, -118.0, 37.0]));
        assert_eq!(value["collection"], "landsat8");
        assert_eq!(value["links"][0]["rel"], "self");
        assert_eq!(
            value["links"][0]["href"],
            "http://catalog.example.org/items/LC08_042034"
        );
        assert_eq!(value["links"][1]["rel"], "alternate");
        assert_eq!(value["links"][2]["rel"], "thumbnail");
        assert_eq!(value["assets"]["B1"]["href"], "https://example.org/B1.TIF");
        assert_eq!(value["assets"]["B1"]["type"], "image/tiff");
    }

    #[test]
    fn test_next_page_token_omitted_on_last_page() {
        let last = SearchResults {
            matches: 25,
            returned: 5,
            next_offset: 0,
            elapsed_time_ms: None,
            records: vec![],
        };
        let value = serde_json::to_value(ItemCollection::from_results(last, 10, "")).unwrap();
        assert_eq!(value["type"], "ItemCollection");
        assert!(value.get("nextPageToken").is_none());
        assert_eq!(value["context"]["matched"], 25);
        assert_eq!(value["items"], json!([]));

        let first = SearchResults {
            matches: 25,
            returned: 10,
            next_offset: 10,
            ..Default::default()
        };
        let value = serde_json::to_value(ItemCollection::from_results(first, 10, "")).unwrap();
        assert_eq!(value["nextPageToken"], 10);
    }

    #[test]
    fn test_search_query_aliases() {
        let params = Params::from_pairs(vec![
            ("datetime", "2018-01-01T00:00:00Z,2018-02-01T00:00:00Z"),
            ("q", "landsat"),
            ("next", "10"),
        ]);
        let query = search_query(&params, 10).unwrap();

        assert!(query.time.is_some());
        assert_eq!(query.term, "landsat");
        assert_eq!(query.offset, 10);
        assert_eq!(query.limit, 10);
    }

    #[test]
    fn test_search_query_rejects_bad_time() {
        let params = Params::from_pairs(vec![("time", "2018-01-01")]);
        let err = search_query(&params, 10).unwrap_err();
        assert_eq!(err.code, crate::web::INVALID_PARAMETER);
        assert_eq!(err.description, crate::parser::TIME_FORMAT_ERROR);
    }

    #[test]
    fn test_catalog_definition() {
        let mut config = Config::default();
        config.metadata.identification.title = "Landsat on AWS".to_string();
        let value = catalog_definition(&config);

        assert_eq!(value["stac_version"], STAC_VERSION);
        assert_eq!(value["title"], "Landsat on AWS");
        assert_eq!(value["links"][1]["href"], "http://localhost:8000/stac/search");
    }

    #[test]
    fn test_openapi_document_uses_metadata() {
        let mut config = Config::default();
        config.metadata.identification.title = "Landsat on AWS".to_string();
        let value = openapi_document(&config);

        assert_eq!(value["openapi"], "3.0.0");
        assert_eq!(value["info"]["title"], "Landsat on AWS");
        assert!(value["paths"]["/stac/search"]["post"].is_object());
    }
}
