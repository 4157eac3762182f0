//! Grammar for request parameters: bbox, time, comma lists and paging counts.

use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{all_consuming, map_res},
    multi::separated_list1,
    number::complete::double,
    sequence::delimited,
    IResult,
};

use crate::error::{CatalogError, Result};
use crate::model::{BBox, TimeFilter};

pub const BBOX_FORMAT_ERROR: &str = "bbox format error (should be minx,miny,maxx,maxy)";
pub const TIME_FORMAT_ERROR: &str = "time format error (should be ISO 8601/RFC3339)";

// --- HELPERS ---

fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_floats(input: &str) -> IResult<&str, Vec<f64>> {
    separated_list1(char(','), ws(double))(input)
}

fn parse_timestamp(input: &str) -> IResult<&str, DateTime<Utc>> {
    map_res(
        ws(take_while1(|c: char| c != ',' && c != '/' && !c.is_whitespace())),
        |token: &str| DateTime::parse_from_rfc3339(token).map(|dt| dt.with_timezone(&Utc)),
    )(input)
}

fn parse_timestamps(input: &str) -> IResult<&str, Vec<DateTime<Utc>>> {
    separated_list1(one_of(",/"), parse_timestamp)(input)
}

// --- PARAMETERS ---

/// Exactly four finite numbers: minx,miny,maxx,maxy.
pub fn parse_bbox(input: &str) -> Result<BBox> {
    let (_, values) = all_consuming(parse_floats)(input)
        .map_err(|_| CatalogError::caller_input(BBOX_FORMAT_ERROR))?;

    match values.as_slice() {
        [minx, miny, maxx, maxy] if values.iter().all(|v| v.is_finite()) => {
            Ok([*minx, *miny, *maxx, *maxy])
        }
        _ => Err(CatalogError::caller_input(BBOX_FORMAT_ERROR)),
    }
}

/// One RFC3339 instant (near match) or two (inclusive range, `,` or `/` separated).
pub fn parse_time(input: &str) -> Result<TimeFilter> {
    let (_, instants) = all_consuming(parse_timestamps)(input)
        .map_err(|_| CatalogError::caller_input(TIME_FORMAT_ERROR))?;

    match instants.as_slice() {
        [instant] => Ok(TimeFilter::Near(*instant)),
        [start, end] if start <= end => Ok(TimeFilter::Range(*start, *end)),
        [_, _] => Err(CatalogError::caller_input(format!(
            "{}: range start is after its end",
            TIME_FORMAT_ERROR
        ))),
        _ => Err(CatalogError::caller_input(TIME_FORMAT_ERROR)),
    }
}

/// Comma-separated values, trimmed, empties dropped.
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Non-negative integer paging parameter.
pub fn parse_count(name: &str, input: &str) -> Result<usize> {
    all_consuming(ws(map_res(digit1, |s: &str| s.parse::<usize>())))(input)
        .map(|(_, value)| value)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| {
            CatalogError::caller_input(format!("{} must be a non-negative integer", name))
        })
}
