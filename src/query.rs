//! Reference predicates and pagination.
//!
//! Every backend must be observably equivalent to [`select`]: the in-process
//! backends call it directly, the delegating backend translates the same
//! predicates and reuses [`window`] for its paging arithmetic.

use chrono::Duration;

use crate::model::{BBox, Record, SearchQuery, SearchResults, TimeFilter};

/// Half-width of the single-instant time match.
pub const NEAR_MATCH_HOURS: i64 = 24;

/// Conjunction of all active predicates.
pub fn matches(record: &Record, query: &SearchQuery) -> bool {
    matches_collection(record, &query.collections)
        && matches_term(record, &query.term)
        && query.bbox.map_or(true, |bbox| matches_bbox(record, &bbox))
        && query.time.map_or(true, |time| matches_time(record, &time))
}

pub fn matches_collection(record: &Record, collections: &[String]) -> bool {
    collections.is_empty()
        || collections
            .iter()
            .any(|c| *c == record.properties.collection)
}

/// Case-insensitive substring over title, abstract and identifier.
pub fn matches_term(record: &Record, term: &str) -> bool {
    if term.is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    record.properties.title.to_lowercase().contains(&needle)
        || record.properties.abstract_text.to_lowercase().contains(&needle)
        || record.identifier.to_lowercase().contains(&needle)
}

/// Rectangle overlap (touching edges count), not containment.
pub fn overlaps(query: &BBox, record: &BBox) -> bool {
    !(query[2] < record[0] || query[0] > record[2] || query[3] < record[1] || query[1] > record[3])
}

pub fn matches_bbox(record: &Record, query: &BBox) -> bool {
    match record.bounds() {
        Some(bounds) => overlaps(query, &bounds),
        None => false,
    }
}

/// Records without a datetime never match an active time filter.
pub fn matches_time(record: &Record, filter: &TimeFilter) -> bool {
    let Some(datetime) = record.properties.datetime else {
        return false;
    };
    match filter {
        TimeFilter::Near(instant) => {
            let tolerance = Duration::hours(NEAR_MATCH_HOURS);
            let diff = datetime.signed_duration_since(*instant);
            diff >= -tolerance && diff <= tolerance
        }
        TimeFilter::Range(start, end) => *start <= datetime && datetime <= *end,
    }
}

/// Slice of the match set covered by one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub next_offset: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

pub fn window(matches: usize, offset: usize, limit: usize) -> Window {
    if offset >= matches {
        return Window { start: matches, end: matches, next_offset: 0 };
    }
    let end = offset.saturating_add(limit).min(matches);
    Window {
        start: offset,
        end,
        next_offset: if end < matches { end } else { 0 },
    }
}

/// Filter, order by identifier, then window.
pub fn select<'a, I>(records: I, query: &SearchQuery) -> SearchResults
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut hits: Vec<&Record> = records.into_iter().filter(|r| matches(r, query)).collect();
    hits.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    let page = window(hits.len(), query.offset, query.limit);
    let records: Vec<Record> = hits[page.start..page.end].iter().map(|r| (*r).clone()).collect();

    SearchResults {
        matches: hits.len(),
        returned: records.len(),
        next_offset: page.next_offset,
        elapsed_time_ms: None,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap()
    }

    fn corpus(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("rec-{:03}", i), format!("Scene {}", i)))
            .collect()
    }

    // --- WINDOWING ---

    #[test]
    fn test_window_last_partial_page() {
        let page = window(25, 20, 10);
        assert_eq!(page.len(), 5);
        assert_eq!(page.next_offset, 0);
    }

    #[test]
    fn test_window_first_page() {
        let page = window(25, 0, 10);
        assert_eq!(page.len(), 10);
        assert_eq!(page.next_offset, 10);
    }

    #[test]
    fn test_window_exact_end() {
        let page = window(20, 10, 10);
        assert_eq!(page.len(), 10);
        assert_eq!(page.next_offset, 0);
    }

    #[test]
    fn test_window_offset_past_end() {
        let page = window(5, 5, 10);
        assert!(page.is_empty());
        assert_eq!(page.next_offset, 0);

        let page = window(0, 0, 10);
        assert!(page.is_empty());
    }

    #[test]
    fn test_window_does_not_overflow() {
        let page = window(3, 1, usize::MAX);
        assert_eq!(page.len(), 2);
        assert_eq!(page.next_offset, 0);
    }

    #[test]
    fn test_select_pages_through_in_identifier_order() {
        let records = corpus(25);
        let mut reversed: Vec<&Record> = records.iter().collect();
        reversed.reverse();

        let first = select(reversed.iter().copied(), &SearchQuery::new().with_page(0, 10));
        assert_eq!(first.matches, 25);
        assert_eq!(first.returned, 10);
        assert_eq!(first.next_offset, 10);
        assert_eq!(first.records[0].identifier, "rec-000");

        let last = select(records.iter(), &SearchQuery::new().with_page(20, 10));
        assert_eq!(last.returned, 5);
        assert_eq!(last.records.len(), 5);
        assert_eq!(last.next_offset, 0);
        assert_eq!(last.records[4].identifier, "rec-024");
    }

    // --- PREDICATES ---

    #[test]
    fn test_bbox_overlap_not_containment() {
        let query = [0.0, 0.0, 10.0, 10.0];
        let overlapping = Record::new("o", "").with_bounds(5.0, 5.0, 15.0, 15.0);
        let disjoint = Record::new("d", "").with_bounds(20.0, 20.0, 30.0, 30.0);
        let touching = Record::new("t", "").with_bounds(10.0, 10.0, 12.0, 12.0);

        assert!(matches_bbox(&overlapping, &query));
        assert!(!matches_bbox(&disjoint, &query));
        assert!(matches_bbox(&touching, &query));
    }

    #[test]
    fn test_bbox_without_geometry_never_matches() {
        let record = Record::new("n", "no footprint");
        assert!(!matches_bbox(&record, &[-180.0, -90.0, 180.0, 90.0]));
    }

    #[test]
    fn test_near_match_boundary() {
        let record = Record::new("a", "").with_datetime(t0());

        let inside = t0() + Duration::hours(23) + Duration::minutes(59);
        let outside = t0() + Duration::hours(24) + Duration::minutes(1);
        let before = t0() - Duration::hours(23);

        assert!(matches_time(&record, &TimeFilter::Near(inside)));
        assert!(!matches_time(&record, &TimeFilter::Near(outside)));
        assert!(matches_time(&record, &TimeFilter::Near(before)));
        assert!(matches_time(&record, &TimeFilter::Near(t0() + Duration::hours(24))));
    }

    #[test]
    fn test_range_is_inclusive() {
        let record = Record::new("a", "").with_datetime(t0());

        assert!(matches_time(&record, &TimeFilter::Range(t0(), t0())));
        assert!(matches_time(
            &record,
            &TimeFilter::Range(t0() - Duration::days(1), t0() + Duration::days(1))
        ));
        assert!(!matches_time(
            &record,
            &TimeFilter::Range(t0() + Duration::seconds(1), t0() + Duration::days(1))
        ));
    }

    #[test]
    fn test_time_filter_needs_datetime() {
        let record = Record::new("a", "");
        let wide = TimeFilter::Range(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
        assert!(!matches_time(&record, &wide));
    }

    #[test]
    fn test_term_is_case_insensitive_substring() {
        let record = Record::new("LC08_L1TP_042034", "Landsat Scene")
            .with_abstract("Cloud-free acquisition over Nevada");

        assert!(matches_term(&record, "landsat"));
        assert!(matches_term(&record, "NEVADA"));
        assert!(matches_term(&record, "l1tp"));
        assert!(!matches_term(&record, "sentinel"));
        assert!(matches_term(&record, ""));
    }

    #[test]
    fn test_collection_is_exact_and_case_sensitive() {
        let record = Record::new("a", "").with_collection("landsat8");

        assert!(matches_collection(&record, &[]));
        assert!(matches_collection(
            &record,
            &["sentinel2".to_string(), "landsat8".to_string()]
        ));
        assert!(!matches_collection(&record, &["Landsat8".to_string()]));
        assert!(!matches_collection(&record, &["landsat".to_string()]));
    }

    #[test]
    fn test_predicates_are_conjunctive() {
        let record = Record::new("a", "Scene A")
            .with_collection("landsat8")
            .with_bounds(0.0, 0.0, 1.0, 1.0)
            .with_datetime(t0());

        let query = SearchQuery::new()
            .with_collections(["landsat8"])
            .with_term("scene")
            .with_bbox([0.5, 0.5, 2.0, 2.0])
            .with_time(TimeFilter::Near(t0()));
        assert!(matches(&record, &query));

        assert!(!matches(&record, &query.clone().with_term("other")));
        assert!(!matches(&record, &query.clone().with_bbox([5.0, 5.0, 6.0, 6.0])));
    }
}
