//! Per-key progress records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Items completed under one progress key.
///
/// Presence of an item means it was fully processed at the recorded time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ProgressRecord {
    /// Item identifier -> completion timestamp
    #[serde(default)]
    pub items: BTreeMap<String, DateTime<Utc>>,
    /// Last time an item was recorded
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Record `item` as processed now. Returns `false` if it already was.
    pub fn mark(&mut self, item: impl Into<String>) -> bool {
        let item = item.into();
        if self.items.contains_key(&item) {
            return false;
        }
        let now = Utc::now();
        self.items.insert(item, now);
        self.updated_at = Some(now);
        true
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
