//! NIP-01 subscription filters.

use super::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A subscription filter.
///
/// Every populated constraint must match. Tag constraints are keyed by the
/// single-letter tag name and serialize as `"#p": [...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFilter", into = "RawFilter")]
pub struct Filter {
    /// Accepted record ids.
    pub ids: Option<Vec<String>>,
    /// Accepted authors.
    pub authors: Option<Vec<String>>,
    /// Accepted kinds.
    pub kinds: Option<Vec<u16>>,
    /// Tag constraints, tag name to accepted values.
    pub tags: BTreeMap<char, Vec<String>>,
    /// Oldest accepted `created_at`.
    pub since: Option<i64>,
    /// Newest accepted `created_at`.
    pub until: Option<i64>,
    /// Maximum number of stored records to return.
    pub limit: Option<usize>,
}

impl Filter {
    /// An empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to these ids.
    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to these authors.
    #[must_use]
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to these kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Require a `name` tag with one of `values`.
    #[must_use]
    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Cap the number of stored records returned.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the filter has any tag constraints.
    #[must_use]
    pub fn has_tag_constraints(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Whether `record` satisfies every constraint (ignores `limit`).
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &record.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &record.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&record.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at > until) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            let mut buf = [0u8; 4];
            let name = name.encode_utf8(&mut buf);
            // Bound first: the iterator borrows `buf` and must drop before it.
            let matched = record
                .tag_values(name)
                .any(|v| values.iter().any(|accepted| accepted == v));
            matched
        })
    }
}

/// Wire form of [`Filter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kinds: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

impl From<RawFilter> for Filter {
    fn from(raw: RawFilter) -> Self {
        let tags = raw
            .rest
            .into_iter()
            .filter_map(|(key, value)| {
                let mut chars = key.chars();
                let (Some('#'), Some(name), None) = (chars.next(), chars.next(), chars.next())
                else {
                    return None;
                };
                let values = value
                    .as_array()?
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                Some((name, values))
            })
            .collect();
        Self {
            ids: raw.ids,
            authors: raw.authors,
            kinds: raw.kinds,
            tags,
            since: raw.since,
            until: raw.until,
            limit: raw.limit,
        }
    }
}

impl From<Filter> for RawFilter {
    fn from(filter: Filter) -> Self {
        let rest = filter
            .tags
            .into_iter()
            .map(|(name, values)| {
                let values = values.into_iter().map(Value::String).collect();
                (format!("#{name}"), Value::Array(values))
            })
            .collect();
        Self {
            ids: filter.ids,
            authors: filter.authors,
            kinds: filter.kinds,
            since: filter.since,
            until: filter.until,
            limit: filter.limit,
            rest,
        }
    }
}
