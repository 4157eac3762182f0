use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_LIMIT: usize = 10;

/// Axis-aligned extent: minx, miny, maxx, maxy
pub type BBox = [f64; 4];

/// Polygon footprint. `coordinates[0]` is the exterior ring.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub geometry_type: String,
    #[serde(default)]
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            geometry_type: "Polygon".to_string(),
            coordinates: Vec::new(),
        }
    }
}

impl Geometry {
    /// Build the closed 5-point ring every ingestion path uses:
    /// lower-left, upper-left, upper-right, lower-right, lower-left.
    pub fn from_bounds(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            geometry_type: "Polygon".to_string(),
            coordinates: vec![vec![
                [minx, miny],
                [minx, maxy],
                [maxx, maxy],
                [maxx, miny],
                [minx, miny],
            ]],
        }
    }

    /// Positional bounds of the exterior ring: (ring[0].x, ring[0].y, ring[2].x, ring[2].y).
    ///
    /// This is a convention, not an envelope computation. Only rings of exactly
    /// five points in `from_bounds` order yield a value; anything else is `None`.
    pub fn bounds(&self) -> Option<BBox> {
        let ring = self.coordinates.first()?;
        if ring.len() != 5 {
            return None;
        }
        Some([ring[0][0], ring[0][1], ring[2][0], ring[2][1]])
    }
}

/// Where a record came from and when the backend accepted it
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    /// Set by the backend on every insert. Caller values are overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub typename: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Properties {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub collection: String,
    /// Acquisition / observation time
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default)]
    pub provenance: Provenance,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Link {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Asset {
    pub name: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A catalog entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    /// Primary key, unique per backend
    pub identifier: String,

    #[serde(rename = "type", default = "default_record_type")]
    pub record_type: String,

    /// Derived from `geometry` by the backend at insert time
    #[serde(default)]
    pub bbox: Option<BBox>,

    #[serde(default)]
    pub geometry: Geometry,

    #[serde(default)]
    pub properties: Properties,

    #[serde(default)]
    pub links: Vec<Link>,

    #[serde(default)]
    pub assets: Vec<Asset>,
}

fn default_record_type() -> String {
    "Feature".to_string()
}

impl Record {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            record_type: default_record_type(),
            bbox: None,
            geometry: Geometry::default(),
            properties: Properties {
                title: title.into(),
                ..Default::default()
            },
            links: Vec::new(),
            assets: Vec::new(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.properties.collection = collection.into();
        self
    }

    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.properties.abstract_text = text.into();
        self
    }

    pub fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.properties.datetime = Some(datetime);
        self
    }

    pub fn with_bounds(mut self, minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        self.geometry = Geometry::from_bounds(minx, miny, maxx, maxy);
        self.bbox = self.geometry.bounds();
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn bounds(&self) -> Option<BBox> {
        self.geometry.bounds()
    }

    /// Refresh the backend-owned fields: derived bbox and insertion time.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.bbox = self.geometry.bounds();
        self.properties.provenance.inserted = Some(now);
    }
}

/// Temporal predicate. One instant is a ±24h near match, two are an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    Near(DateTime<Utc>),
    Range(DateTime<Utc>, DateTime<Utc>),
}

/// Filtered, paginated search request shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub collections: Vec<String>,
    pub term: String,
    pub bbox: Option<BBox>,
    pub time: Option<TimeFilter>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            term: String::new(),
            bbox: None,
            time: None,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_time(mut self, time: TimeFilter) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// Paginated response envelope for search and lookup
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    /// Records satisfying the filter, regardless of paging
    pub matches: usize,
    /// Records in this response
    pub returned: usize,
    /// Offset of the next page; 0 when there is none
    pub next_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time_ms: Option<u64>,
    pub records: Vec<Record>,
}

impl SearchResults {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Unpaginated identifier lookup result.
    pub fn lookup(records: Vec<Record>) -> Self {
        Self {
            matches: records.len(),
            returned: records.len(),
            next_offset: 0,
            elapsed_time_ms: None,
            records,
        }
    }
}
