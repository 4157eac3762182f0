use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;
use crate::model::{BBox, TimeFilter};
use crate::parser;

/// Request parameters with case-insensitive names. The first occurrence of a name wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut values = HashMap::new();
        for (name, value) in pairs {
            values
                .entry(name.as_ref().to_lowercase())
                .or_insert_with(|| value.into());
        }
        Self { values }
    }

    /// Flatten a JSON search body: arrays become comma lists, scalars their text.
    pub fn from_json(body: &Value) -> Self {
        let Some(object) = body.as_object() else {
            return Self::default();
        };
        Self::from_pairs(
            object
                .iter()
                .filter_map(|(name, value)| flatten(value).map(|text| (name.as_str(), text))),
        )
    }

    /// Fill in names missing here from `other`.
    pub fn merge(mut self, other: Params) -> Self {
        for (name, value) in other.values {
            self.values.entry(name).or_insert(value);
        }
        self
    }

    /// Value of the first listed name that is present and non-empty.
    pub fn get(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.values.get(*name))
            .map(|value| value.as_str())
            .find(|value| !value.trim().is_empty())
    }

    pub fn text(&self, names: &[&str]) -> String {
        self.get(names).map(|v| v.trim().to_string()).unwrap_or_default()
    }

    pub fn list(&self, names: &[&str]) -> Vec<String> {
        self.get(names).map(parser::parse_list).unwrap_or_default()
    }

    pub fn bbox(&self) -> Result<Option<BBox>> {
        self.get(&["bbox"]).map(parser::parse_bbox).transpose()
    }

    pub fn time(&self, names: &[&str]) -> Result<Option<TimeFilter>> {
        self.get(names).map(parser::parse_time).transpose()
    }

    pub fn count(&self, names: &[&str], default: usize) -> Result<usize> {
        match self.get(names) {
            Some(value) => parser::parse_count(names.first().copied().unwrap_or("count"), value),
            None => Ok(default),
        }
    }
}

fn flatten(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(flatten)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}
