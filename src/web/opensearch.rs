//! OpenSearch dialect: `q` free-text search or `recordids` lookup, answered with
//! the plain results envelope.

use tracing::debug;

use super::params::Params;
use super::{settle, Exception, Response, INVALID_PARAMETER, MISSING_PARAMETER};
use crate::model::SearchQuery;
use crate::Catalog;

/// What a validated OpenSearch request asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Lookup(Vec<String>),
    Search(SearchQuery),
}

impl Request {
    /// Validate parameters. Nothing here touches the backend.
    pub fn from_params(params: &Params, default_limit: usize) -> Result<Self, Exception> {
        let term = params.text(&["q"]);
        let identifiers = params.list(&["recordids", "ids"]);

        if term.is_empty() && identifiers.is_empty() {
            return Err(Exception::new(MISSING_PARAMETER, "one of q or recordids are required"));
        }
        if !term.is_empty() && !identifiers.is_empty() {
            return Err(Exception::new(INVALID_PARAMETER, "q and recordids are mutually exclusive"));
        }

        let bbox = params.bbox()?;
        let time = params.time(&["time"])?;
        let offset = params.count(&["startposition"], 0)?;
        let limit = params.count(&["maxrecords"], default_limit)?;

        if !identifiers.is_empty() {
            return Ok(Request::Lookup(identifiers));
        }

        let mut query = SearchQuery::new()
            .with_term(term)
            .with_collections(params.list(&["collections"]))
            .with_page(offset, limit);
        query.bbox = bbox;
        query.time = time;
        Ok(Request::Search(query))
    }
}

pub async fn handle(catalog: &Catalog, params: &Params) -> Response {
    let request = match Request::from_params(params, catalog.config().server.limit) {
        Ok(request) => request,
        Err(exception) => {
            debug!(code = exception.code, description = %exception.description, "opensearch request rejected");
            return Response::exception(exception);
        }
    };

    let result = match &request {
        Request::Lookup(identifiers) => catalog.try_get(identifiers).await,
        Request::Search(query) => catalog.try_search(query).await,
    };

    match settle(result) {
        Ok(results) => Response::ok(&results),
        Err(response) => response,
    }
}
