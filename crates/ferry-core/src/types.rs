//! Core types for the transfer engine.
//!
//! Wire records are open JSON objects; rather than closing them into
//! structs, this module provides helpers over `serde_json::Value` for the
//! handful of fields the engine itself cares about (`source_record_key`,
//! `target_record_key`, `uuid`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One pass over the structure tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Index,
    Fetch,
    Push,
}

impl Stage {
    /// Stages in their mandatory execution order.
    pub const ALL: [Stage; 3] = [Stage::Index, Stage::Fetch, Stage::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Fetch => "fetch",
            Self::Push => "push",
        }
    }

    /// Metadata key recording when this stage began.
    pub fn started_key(&self) -> &'static str {
        match self {
            Self::Index => "index_started",
            Self::Fetch => "fetch_started",
            Self::Push => "push_started",
        }
    }

    /// Metadata key recording when this stage completed.
    pub fn finished_key(&self) -> &'static str {
        match self {
            Self::Index => "index_finished",
            Self::Fetch => "fetch_finished",
            Self::Push => "push_finished",
        }
    }

    /// The stage that must have finished before this one may run.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Self::Index => None,
            Self::Fetch => Some(Stage::Index),
            Self::Push => Some(Stage::Fetch),
        }
    }

    /// Present-tense verb for progress messages.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Index => "Indexing",
            Self::Fetch => "Fetching",
            Self::Push => "Pushing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which record key feeds URL primary-key segments.
///
/// INDEX and FETCH address the source server by source keys; PUSH addresses
/// the target server by the keys it assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkKind {
    Source,
    Target,
}

/// Ordered chain of ancestor records guiding path and URL construction.
///
/// Immutable per recursion level; `child` clones and extends, so sibling
/// subtrees never observe each other's ancestors.
#[derive(Debug, Clone, Default)]
pub struct Parents(Vec<(String, Value)>);

impl Parents {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A new chain with `record` appended under `resource`.
    pub fn child(&self, resource: &str, record: Value) -> Self {
        let mut entries = self.0.clone();
        entries.push((resource.to_string(), record));
        Self(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, record)| (name.as_str(), record))
    }

    pub fn get(&self, resource: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(name, _)| name == resource)
            .map(|(_, record)| record)
    }

    /// The most recently appended record, i.e. the immediate parent.
    pub fn last(&self) -> Option<(&str, &Value)> {
        self.0
            .last()
            .map(|(name, record)| (name.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The record's stable identifier on the origin server (`"<type>:<pk>"`).
pub fn source_record_key(record: &Value) -> Option<&str> {
    record.get("source_record_key").and_then(Value::as_str)
}

/// The key assigned by the destination server after a successful push.
pub fn target_record_key(record: &Value) -> Option<&str> {
    record.get("target_record_key").and_then(Value::as_str)
}

/// The record's workspace uuid, assigned by the identity service.
pub fn record_uuid(record: &Value) -> Option<&str> {
    record.get("uuid").and_then(Value::as_str)
}

/// Last segment of `source_record_key`, the primary key on the source.
pub fn source_pk(record: &Value) -> Option<&str> {
    source_record_key(record).and_then(last_key_segment)
}

/// Last segment of `target_record_key`, the primary key on the target.
pub fn target_pk(record: &Value) -> Option<&str> {
    target_record_key(record).and_then(last_key_segment)
}

fn last_key_segment(key: &str) -> Option<&str> {
    key.rsplit(':').next()
}

/// Human-readable label for a record, preferring the structure's `name_key`
/// field and falling back to the source key.
pub fn record_label<'a>(record: &'a Value, name_key: Option<&str>) -> &'a str {
    name_key
        .and_then(|key| record.get(key))
        .and_then(Value::as_str)
        .or_else(|| source_record_key(record))
        .unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_order_and_keys() {
        assert_eq!(Stage::Index.prerequisite(), None);
        assert_eq!(Stage::Fetch.prerequisite(), Some(Stage::Index));
        assert_eq!(Stage::Push.prerequisite(), Some(Stage::Fetch));
        assert_eq!(Stage::Push.started_key(), "push_started");
        assert_eq!(Stage::Push.finished_key(), "push_finished");
    }

    #[test]
    fn pk_extraction_takes_last_segment() {
        let record = json!({ "source_record_key": "articles:42" });
        assert_eq!(source_pk(&record), Some("42"));
        assert_eq!(target_pk(&record), None);

        let pushed = json!({ "target_record_key": "articles:7" });
        assert_eq!(target_pk(&pushed), Some("7"));
    }

    #[test]
    fn parents_child_does_not_mutate_original() {
        let root = Parents::new();
        let journal = json!({ "uuid": "u-1", "source_record_key": "journals:1" });
        let extended = root.child("journals", journal);

        assert!(root.is_empty());
        assert_eq!(extended.len(), 1);
        assert_eq!(
            extended.get("journals").and_then(source_record_key),
            Some("journals:1")
        );
        assert_eq!(extended.last().map(|(name, _)| name), Some("journals"));
    }

    #[test]
    fn record_label_prefers_name_key() {
        let record = json!({ "source_record_key": "journals:1", "title": "A Journal" });
        assert_eq!(record_label(&record, Some("title")), "A Journal");
        assert_eq!(record_label(&record, None), "journals:1");
        assert_eq!(record_label(&record, Some("missing")), "journals:1");
    }
}
