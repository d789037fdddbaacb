//! Curated per-label content: short texts, images and video links.
//!
//! The table is plain data loaded once at startup. Keys are either label
//! names or `@<n>` placeholders that are bound to the n-th vocabulary label
//! after the model is loaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::video::thumbnail_url;

/// Items surfaced per category, regardless of how many are configured.
pub const MAX_ITEMS_PER_CATEGORY: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentEntry {
    pub texts: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

impl ContentEntry {
    /// Builds an entry from loosely typed JSON. Malformed slots degrade to
    /// empty categories instead of failing the whole table.
    fn from_value(key: &str, value: Value) -> Self {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                tracing::warn!(key = %key, value = %other, "Content entry is not an object, ignoring");
                return Self::default();
            }
        };

        Self {
            texts: category(key, "texts", fields.remove("texts")),
            images: category(key, "images", fields.remove("images")),
            videos: category(key, "videos", fields.remove("videos")),
        }
    }
}

/// Keeps the string items of a category array and drops the rest.
fn category(key: &str, name: &str, value: Option<Value>) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(other) => {
            tracing::warn!(
                key = %key,
                category = name,
                value = %other,
                "Content category is not an array, treating it as empty"
            );
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, Value>")]
pub struct ContentTable {
    entries: HashMap<String, ContentEntry>,
}

impl From<HashMap<String, Value>> for ContentTable {
    fn from(raw: HashMap<String, Value>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(key, value)| {
                let entry = ContentEntry::from_value(&key, value);
                (key, entry)
            })
            .collect();
        Self { entries }
    }
}

impl ContentTable {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
        let table = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), labels = table.entries.len(), "Loaded content table");
        Ok(table)
    }

    /// Replaces `@<n>` keys with the n-th vocabulary label.
    ///
    /// A positional key never overrides an entry already configured under the
    /// label's own name. Keys pointing past the vocabulary are dropped.
    pub fn bind_vocabulary(self, labels: &[String]) -> Self {
        let mut named = HashMap::with_capacity(self.entries.len());
        let mut positional = Vec::new();

        for (key, entry) in self.entries {
            match key.strip_prefix('@').map(str::parse::<usize>) {
                Some(Ok(index)) => positional.push((key, index, entry)),
                _ => {
                    named.insert(key, entry);
                }
            }
        }

        for (key, index, entry) in positional {
            match labels.get(index) {
                Some(label) => {
                    named.entry(label.clone()).or_insert(entry);
                }
                None => {
                    tracing::warn!(
                        key = %key,
                        vocabulary_size = labels.len(),
                        "Content key points past the label vocabulary, ignoring"
                    );
                }
            }
        }

        Self { entries: named }
    }

    pub fn get(&self, label: &str) -> Option<&ContentEntry> {
        self.entries.get(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedContent {
    pub texts: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

impl ResolvedContent {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty() && self.videos.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoLink {
    pub url: String,
    pub thumbnail: Option<String>,
}

/// Resolved content ready for rendering, with thumbnails derived for videos.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayContent {
    pub label: String,
    pub texts: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<VideoLink>,
    pub is_empty: bool,
}

pub struct ContentResolver {
    table: ContentTable,
}

impl ContentResolver {
    pub fn new(table: ContentTable) -> Self {
        Self { table }
    }

    pub fn resolve(&self, label: &str) -> ResolvedContent {
        match self.table.get(label) {
            Some(entry) => ResolvedContent {
                texts: first_items(&entry.texts),
                images: first_items(&entry.images),
                videos: first_items(&entry.videos),
            },
            None => ResolvedContent::default(),
        }
    }

    pub fn resolve_display(&self, label: &str) -> DisplayContent {
        let resolved = self.resolve(label);
        let is_empty = resolved.is_empty();
        DisplayContent {
            label: label.to_string(),
            texts: resolved.texts,
            images: resolved.images,
            videos: resolved
                .videos
                .into_iter()
                .map(|url| VideoLink {
                    thumbnail: thumbnail_url(&url),
                    url,
                })
                .collect(),
            is_empty,
        }
    }
}

fn first_items(items: &[String]) -> Vec<String> {
    items
        .iter()
        .filter(|item| !item.trim().is_empty())
        .take(MAX_ITEMS_PER_CATEGORY)
        .cloned()
        .collect()
}
