use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use warp::hyper::body::Bytes;
use tracing::info;
use warp::filters::BoxedFilter;
use warp::http::header::{HeaderValue, CONTENT_TYPE};
use warp::{Filter, Reply};

use crate::error::{CatalogError, ErrorKind, Result};
use crate::web::params::Params;
use crate::web::{opensearch, stac, Exception, Response, INVALID_PARAMETER};
use crate::Catalog;

/// Which protocol dialect `serve` exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ApiKind {
    #[value(name = "opensearch")]
    OpenSearch,
    Stac,
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKind::OpenSearch => write!(f, "opensearch"),
            ApiKind::Stac => write!(f, "stac"),
        }
    }
}

pub fn routes(catalog: Catalog, api: ApiKind) -> BoxedFilter<(warp::reply::Response,)> {
    match api {
        ApiKind::OpenSearch => opensearch_routes(catalog),
        ApiKind::Stac => stac_routes(catalog),
    }
}

/// Serve until ctrl-c.
pub async fn serve(catalog: Catalog, api: ApiKind, port: u16) -> Result<()> {
    let (addr, server) = warp::serve(routes(catalog, api))
        .try_bind_with_graceful_shutdown(SocketAddr::from(([0, 0, 0, 0], port)), async {
            tokio::signal::ctrl_c().await.ok();
        })
        .map_err(|e| CatalogError::new(ErrorKind::Io, format!("cannot bind port {}", port)).with_source(e))?;

    info!(%addr, %api, "catalog listening");
    server.await;
    info!("shutting down");
    Ok(())
}

fn opensearch_routes(catalog: Catalog) -> BoxedFilter<(warp::reply::Response,)> {
    warp::get()
        .and(warp::path::end())
        .and(warp::query::<Vec<(String, String)>>())
        .and(with_catalog(catalog))
        .and_then(|pairs: Vec<(String, String)>, catalog: Catalog| async move {
            let response = opensearch::handle(&catalog, &Params::from_pairs(pairs)).await;
            Ok::<_, warp::Rejection>(render(&catalog, response))
        })
        .boxed()
}

fn stac_routes(catalog: Catalog) -> BoxedFilter<(warp::reply::Response,)> {
    // 1. GET / (catalog definition)
    let definition = warp::get()
        .and(warp::path::end())
        .and(with_catalog(catalog.clone()))
        .map(|catalog: Catalog| {
            let body = stac::catalog_definition(catalog.config());
            render(&catalog, Response::ok(&body))
        });

    // 2. GET /api (OpenAPI document)
    let api = warp::get()
        .and(warp::path("api"))
        .and(warp::path::end())
        .and(with_catalog(catalog.clone()))
        .map(|catalog: Catalog| {
            let body = stac::openapi_document(catalog.config());
            render(&catalog, Response::ok(&body))
        });

    // 3. GET /stac/search
    let search_get = warp::get()
        .and(warp::path!("stac" / "search"))
        .and(warp::query::<Vec<(String, String)>>())
        .and(with_catalog(catalog.clone()))
        .and_then(|pairs: Vec<(String, String)>, catalog: Catalog| async move {
            let response = stac::search(&catalog, &Params::from_pairs(pairs)).await;
            Ok::<_, warp::Rejection>(render(&catalog, response))
        });

    // 4. POST /stac/search (query string and/or JSON body)
    let search_post = warp::post()
        .and(warp::path!("stac" / "search"))
        .and(warp::query::<Vec<(String, String)>>())
        .and(warp::body::bytes())
        .and(with_catalog(catalog.clone()))
        .and_then(|pairs: Vec<(String, String)>, body: Bytes, catalog: Catalog| async move {
            let response = match body_params(&body) {
                Ok(from_body) => {
                    let params = Params::from_pairs(pairs).merge(from_body);
                    stac::search(&catalog, &params).await
                }
                Err(exception) => Response::exception(exception),
            };
            Ok::<_, warp::Rejection>(render(&catalog, response))
        });

    // 5. GET /items/{id}
    let item = warp::get()
        .and(warp::path!("items" / String))
        .and(with_catalog(catalog))
        .and_then(|segment: String, catalog: Catalog| async move {
            let response = match urlencoding::decode(&segment) {
                Ok(identifier) => stac::item(&catalog, &identifier).await,
                Err(_) => Response::exception(Exception::new(
                    INVALID_PARAMETER,
                    "item identifier is not valid UTF-8",
                )),
            };
            Ok::<_, warp::Rejection>(render(&catalog, response))
        });

    definition
        .or(api)
        .unify()
        .or(search_get)
        .unify()
        .or(search_post)
        .unify()
        .or(item)
        .unify()
        .boxed()
}

fn body_params(body: &[u8]) -> std::result::Result<Params, Exception> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Params::default());
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .map(|value| Params::from_json(&value))
        .map_err(|e| Exception::new(INVALID_PARAMETER, format!("request body is not valid JSON: {}", e)))
}

fn with_catalog(catalog: Catalog) -> impl Filter<Extract = (Catalog,), Error = Infallible> + Clone {
    warp::any().map(move || catalog.clone())
}

/// Encode with the configured pretty printing and mime type.
fn render(catalog: &Catalog, response: Response) -> warp::reply::Response {
    let server = &catalog.config().server;
    let body = if server.pretty_print {
        serde_json::to_string_pretty(&response.body)
    } else {
        serde_json::to_string(&response.body)
    }
    .unwrap_or_default();

    let mut reply = warp::reply::with_status(body, response.status).into_response();
    let mimetype = HeaderValue::from_str(&server.mimetype)
        .unwrap_or_else(|_| HeaderValue::from_static("application/json"));
    reply.headers_mut().insert(CONTENT_TYPE, mimetype);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Record;
    use serde_json::Value;
    use warp::http::StatusCode;

    async fn catalog() -> Catalog {
        let catalog = Catalog::open(Config::default()).unwrap();
        for i in 0..3 {
            catalog
                .index(
                    Record::new(format!("scene-{}", i), format!("Landsat scene {}", i))
                        .with_collection("landsat8")
                        .with_bounds(0.0, 0.0, 1.0, 1.0),
                )
                .await
                .unwrap();
        }
        catalog
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    // --- OPENSEARCH ---

    #[tokio::test]
    async fn test_opensearch_search() {
        let routes = routes(catalog().await, ApiKind::OpenSearch);
        let res = warp::test::request()
            .method("GET")
            .path("/?q=landsat&maxrecords=2")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[CONTENT_TYPE],
            "application/json; charset=UTF-8"
        );
        let body = json(res.body());
        assert_eq!(body["matches"], 3);
        assert_eq!(body["returned"], 2);
        assert_eq!(body["nextOffset"], 2);
    }

    #[tokio::test]
    async fn test_opensearch_exceptions() {
        let routes = routes(catalog().await, ApiKind::OpenSearch);

        let res = warp::test::request().path("/").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res.body())["code"], 20001);

        let res = warp::test::request()
            .path("/?q=landsat&recordids=scene-1")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res.body())["code"], 20002);
    }

    #[tokio::test]
    async fn test_opensearch_lookup() {
        let routes = routes(catalog().await, ApiKind::OpenSearch);
        let res = warp::test::request()
            .path("/?RecordIds=scene-2,missing,scene-0")
            .reply(&routes)
            .await;

        let body = json(res.body());
        assert_eq!(body["matches"], 2);
        assert_eq!(body["records"][0]["identifier"], "scene-2");
        assert_eq!(body["records"][1]["identifier"], "scene-0");
    }

    // --- STAC ---

    #[tokio::test]
    async fn test_stac_definition_and_api() {
        let routes = routes(catalog().await, ApiKind::Stac);

        let res = warp::test::request().path("/").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res.body())["stac_version"], "0.6.2");

        let res = warp::test::request().path("/api").reply(&routes).await;
        assert_eq!(json(res.body())["openapi"], "3.0.0");
    }

    #[tokio::test]
    async fn test_stac_search_get_and_post() {
        let routes = routes(catalog().await, ApiKind::Stac);

        let res = warp::test::request()
            .path("/stac/search?bbox=0.5,0.5,2,2&limit=2")
            .reply(&routes)
            .await;
        let body = json(res.body());
        assert_eq!(body["type"], "ItemCollection");
        assert_eq!(body["context"]["matched"], 3);
        assert_eq!(body["nextPageToken"], 2);
        assert_eq!(body["items"].as_array().unwrap().len(), 2);

        let res = warp::test::request()
            .method("POST")
            .path("/stac/search")
            .body(r#"{"collections": ["landsat8"], "limit": 10, "next": 2}"#)
            .reply(&routes)
            .await;
        let body = json(res.body());
        assert_eq!(body["context"]["returned"], 1);
        assert!(body.get("nextPageToken").is_none());
        assert_eq!(body["items"][0]["id"], "scene-2");

        let res = warp::test::request()
            .method("POST")
            .path("/stac/search?limit=1")
            .reply(&routes)
            .await;
        assert_eq!(json(res.body())["context"]["returned"], 1);
    }

    #[tokio::test]
    async fn test_stac_rejects_bad_parameters() {
        let routes = routes(catalog().await, ApiKind::Stac);

        let res = warp::test::request()
            .path("/stac/search?bbox=1,2,3")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json(res.body())["description"],
            "bbox format error (should be minx,miny,maxx,maxy)"
        );

        let res = warp::test::request()
            .method("POST")
            .path("/stac/search")
            .body("{not json")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res.body())["code"], 20002);
    }

    #[tokio::test]
    async fn test_stac_item() {
        let routes = routes(catalog().await, ApiKind::Stac);

        let res = warp::test::request().path("/items/scene-1").reply(&routes).await;
        let body = json(res.body());
        assert_eq!(body["items"][0]["id"], "scene-1");
        assert_eq!(body["items"][0]["links"][0]["href"], "http://localhost:8000/items/scene-1");

        let res = warp::test::request().path("/items/unknown").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res.body())["items"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_stac_item_with_encoded_identifier() {
        let catalog = catalog().await;
        catalog.index(Record::new("a b/c", "Spaced scene")).await.unwrap();
        let routes = routes(catalog, ApiKind::Stac);

        let res = warp::test::request().path("/items/a%20b%2Fc").reply(&routes).await;
        let body = json(res.body());
        assert_eq!(body["context"]["matched"], 1);
        assert_eq!(body["items"][0]["id"], "a b/c");

        let res = warp::test::request().path("/items/%FF%FE").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(res.body())["code"], 20002);
    }

    #[tokio::test]
    async fn test_pretty_print() {
        let mut config = Config::default();
        config.server.pretty_print = true;
        let routes = routes(Catalog::open(config).unwrap(), ApiKind::Stac);

        let res = warp::test::request().path("/").reply(&routes).await;
        assert!(std::str::from_utf8(res.body()).unwrap().contains("\n  \"id\""));
    }
}
