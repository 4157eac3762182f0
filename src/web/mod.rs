//! Protocol handlers. Each produces a [`Response`]; `server` turns it into HTTP.

pub mod opensearch;
pub mod params;
pub mod stac;

use serde::Serialize;
use serde_json::Value;
use tracing::error;
use warp::http::StatusCode;

use crate::error::{CatalogError, ErrorKind, Result};
use crate::model::SearchResults;

/// A required parameter is missing.
pub const MISSING_PARAMETER: u32 = 20001;
/// A parameter is malformed or conflicts with another.
pub const INVALID_PARAMETER: u32 = 20002;

/// Machine-readable error body returned to clients.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Exception {
    pub code: u32,
    pub description: String,
}

impl Exception {
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl From<CatalogError> for Exception {
    fn from(err: CatalogError) -> Self {
        Exception::new(INVALID_PARAMETER, err.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Value,
}

impl Response {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => {
                error!(error = %e, "cannot encode response");
                Self::failure(StatusCode::INTERNAL_SERVER_ERROR, "response encoding failed")
            }
        }
    }

    pub fn exception(exception: Exception) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: serde_json::json!(exception),
        }
    }

    fn failure(status: StatusCode, description: &str) -> Self {
        Self {
            status,
            body: serde_json::json!(Exception::new(u32::from(status.as_u16()), description)),
        }
    }
}

/// Unavailable backends surface as 503; other backend failures degrade to empty results.
pub(crate) fn settle(result: Result<SearchResults>) -> std::result::Result<SearchResults, Response> {
    match result {
        Ok(results) => Ok(results),
        Err(err) if err.kind == ErrorKind::BackendUnavailable => {
            error!(error = %err, "repository unavailable");
            Err(Response::failure(StatusCode::SERVICE_UNAVAILABLE, "repository unavailable"))
        }
        Err(err) => {
            error!(error = %err, "query failed");
            Ok(SearchResults::empty())
        }
    }
}
