//! NIP-01 subscription filters.
//!
//! A filter is a conjunction of constraints; a list of filters is a
//! disjunction. An empty `ids`/`authors`/`kinds`/tag-value list leaves that
//! field unconstrained and is omitted from the wire form, so a store can be
//! declared before the values it needs (the logged-in pubkey, say) are known.

use crate::nip01::Event;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// NIP-01 Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(default)]
    pub ids: Vec<String>,

    /// Authors
    #[serde(default)]
    pub authors: Vec<String>,

    /// Event kinds
    #[serde(default)]
    pub kinds: Vec<u16>,

    /// Events since timestamp (inclusive)
    #[serde(default)]
    pub since: Option<u64>,

    /// Events until timestamp (inclusive)
    #[serde(default)]
    pub until: Option<u64>,

    /// Maximum number of stored events to return
    #[serde(default)]
    pub limit: Option<u64>,

    /// Tag queries keyed with the `#` prefix (`#e`, `#p`, `#a`, ...)
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.ids.is_empty() {
            map.serialize_entry("ids", &self.ids)?;
        }
        if !self.authors.is_empty() {
            map.serialize_entry("authors", &self.authors)?;
        }
        if !self.kinds.is_empty() {
            map.serialize_entry("kinds", &self.kinds)?;
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        for (key, values) in &self.tags {
            if !values.is_empty() {
                map.serialize_entry(key, values)?;
            }
        }
        map.end()
    }
}

fn tag_key(tag_name: &str) -> String {
    if tag_name.starts_with('#') {
        tag_name.to_string()
    } else {
        format!("#{}", tag_name)
    }
}

impl Filter {
    /// Create a new empty filter (matches all events).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter; `tag_name` may be given with or without `#`.
    pub fn tag(
        mut self,
        tag_name: &str,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.tags
            .insert(tag_key(tag_name), values.into_iter().map(Into::into).collect());
        self
    }

    /// Values constraining `tag_name`, if any.
    pub fn tag_values(&self, tag_name: &str) -> Option<&[String]> {
        self.tags.get(&tag_key(tag_name)).map(Vec::as_slice)
    }

    /// Replace the values of one tag constraint in place.
    pub fn set_tag_values(&mut self, tag_name: &str, values: Vec<String>) {
        self.tags.insert(tag_key(tag_name), values);
    }

    /// Check if an event matches this filter (exact, case-sensitive values).
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| *id == event.id) {
            return false;
        }

        if !self.authors.is_empty() && !self.authors.iter().any(|a| *a == event.pubkey) {
            return false;
        }

        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }

        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }

        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }

        for (key, values) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            if values.is_empty() {
                continue;
            }

            let has_match = event.tags_named(name).any(|tag| {
                tag.get(1)
                    .is_some_and(|value| values.iter().any(|v| v == value))
            });

            if !has_match {
                return false;
            }
        }

        true
    }

    /// Sorted, de-duplicated copy used to compare filter lists structurally.
    pub fn canonical(&self) -> Self {
        fn norm<T: Ord + Clone>(values: &[T]) -> Vec<T> {
            let mut values = values.to_vec();
            values.sort();
            values.dedup();
            values
        }

        Self {
            ids: norm(&self.ids),
            authors: norm(&self.authors),
            kinds: norm(&self.kinds),
            since: self.since,
            until: self.until,
            limit: self.limit,
            tags: self
                .tags
                .iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(key, values)| (key.clone(), norm(values)))
                .collect(),
        }
    }
}

/// OR across a filter list. An empty list matches nothing.
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| filter.matches(event))
}

/// Order-insensitive key identifying a filter list.
pub fn canonical_key(filters: &[Filter]) -> String {
    let mut parts: Vec<String> = filters
        .iter()
        .map(|f| serde_json::to_string(&f.canonical()).unwrap_or_default())
        .collect();
    parts.sort();
    parts.dedup();
    parts.join("|")
}
