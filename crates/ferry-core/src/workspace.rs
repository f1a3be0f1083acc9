//! On-disk workspace mirroring the resource tree.
//!
//! Layout under `<data_dir>/current/`:
//! - `index.json` at the root holds the run metadata ([`TransferMeta`]),
//! - `<parents…>/<type>/index.json` holds the ordered list of stubs,
//! - `<parents…>/<type>/<uuid>/<singular(type)>.json` holds one detail,
//! - binary attachments sit next to their `file.json` metadata.
//!
//! The workspace doubles as the resume journal: a stage skips any item
//! whose artifact already satisfies its idempotency rule, so every write
//! here goes through whole-file replacement (write-then-rename) to avoid
//! leaving half-written JSON behind a crash.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::TransferError;
use crate::types::{record_uuid, source_pk, source_record_key, target_pk, Parents, PkKind, Stage};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected content at {path}: {message}")]
    Format { path: PathBuf, message: String },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Singular form of a resource-type name, used for detail filenames
/// (`articles` -> `article.json`). The transfer vocabulary pluralizes with
/// a plain trailing `s`, including compounds like `review_form_elements`.
pub fn singular(resource: &str) -> &str {
    resource.strip_suffix('s').unwrap_or(resource)
}

/// Filename of the detail file for a resource type.
pub fn detail_filename(resource: &str) -> String {
    format!("{}.json", singular(resource))
}

/// Run metadata persisted at `<root>/index.json`.
///
/// Unknown keys are preserved across rewrites via `extra`, so metadata
/// written by other versions of the tool survives a resumed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMeta {
    pub application: String,
    pub version: String,
    pub transaction_id: Uuid,
    pub initiated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_finished: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_finished: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_finished: Option<DateTime<Utc>>,
    /// Optional finer-grained resume point; recompute-from-files is the
    /// normative mechanism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TransferMeta {
    fn new(application: &str, version: &str) -> Self {
        Self {
            application: application.to_string(),
            version: version.to_string(),
            transaction_id: Uuid::now_v7(),
            initiated: Utc::now(),
            index_started: None,
            index_finished: None,
            fetch_started: None,
            fetch_finished: None,
            push_started: None,
            push_finished: None,
            cursor: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn started(&self, stage: Stage) -> Option<DateTime<Utc>> {
        match stage {
            Stage::Index => self.index_started,
            Stage::Fetch => self.fetch_started,
            Stage::Push => self.push_started,
        }
    }

    pub fn finished(&self, stage: Stage) -> Option<DateTime<Utc>> {
        match stage {
            Stage::Index => self.index_finished,
            Stage::Fetch => self.fetch_finished,
            Stage::Push => self.push_finished,
        }
    }

    pub fn set_started(&mut self, stage: Stage, at: DateTime<Utc>) {
        match stage {
            Stage::Index => self.index_started = Some(at),
            Stage::Fetch => self.fetch_started = Some(at),
            Stage::Push => self.push_started = Some(at),
        }
    }

    pub fn set_finished(&mut self, stage: Stage, at: DateTime<Utc>) {
        match stage {
            Stage::Index => self.index_finished = Some(at),
            Stage::Fetch => self.fetch_finished = Some(at),
            Stage::Push => self.push_finished = Some(at),
        }
    }

    /// The single stage with `*_started` set and `*_finished` unset, if any.
    pub fn current_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| self.started(*stage).is_some() && self.finished(*stage).is_none())
    }
}

/// Handle on the active run directory (`<data_dir>/current/`).
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Points at `<data_dir>/current/`. The directory itself is created by
    /// the preparation step; [`Workspace::initialize`] creates the
    /// metadata file.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into().join("current"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Parse the metadata file if present, else mint a fresh run (new
    /// transaction namespace) and persist it. Re-opening an existing
    /// workspace therefore reuses the persisted namespace, keeping uuids
    /// stable across resumed runs.
    pub fn initialize(&self, application: &str, version: &str) -> Result<TransferMeta, WorkspaceError> {
        let path = self.meta_path();
        if path.exists() && !file_is_empty(&path) {
            return self.load_meta();
        }

        self.ensure_dir(&self.root)?;
        let meta = TransferMeta::new(application, version);
        self.write_meta(&meta)?;
        Ok(meta)
    }

    pub fn load_meta(&self) -> Result<TransferMeta, WorkspaceError> {
        let path = self.meta_path();
        let raw = self.load_json(&path)?;
        let mut meta: TransferMeta =
            serde_json::from_value(raw).map_err(|e| WorkspaceError::json(&path, e))?;

        // An older writer spelled the key `pushfinished`; honor it on read.
        if meta.push_finished.is_none() {
            if let Some(legacy) = meta.extra.get("pushfinished").cloned() {
                meta.push_finished = serde_json::from_value(legacy).ok();
            }
        }
        Ok(meta)
    }

    pub fn write_meta(&self, meta: &TransferMeta) -> Result<(), WorkspaceError> {
        let value = serde_json::to_value(meta)
            .map_err(|e| WorkspaceError::json(&self.meta_path(), e))?;
        self.replace_json(&self.meta_path(), &value)
    }

    /// Load-mutate-replace on the metadata file. Returns the new state.
    pub fn update_meta(
        &self,
        mutate: impl FnOnce(&mut TransferMeta),
    ) -> Result<TransferMeta, WorkspaceError> {
        let mut meta = self.load_meta()?;
        mutate(&mut meta);
        self.write_meta(&meta)?;
        Ok(meta)
    }

    /// `<root>/<parent type>/<parent uuid>/…/<type>[/<stub uuid>]`.
    pub fn path_for(
        &self,
        parents: &Parents,
        resource: &str,
        stub: Option<&Value>,
    ) -> Result<PathBuf, TransferError> {
        let mut path = self.root.clone();
        for (name, record) in parents.iter() {
            let uuid = record_uuid(record)
                .ok_or_else(|| TransferError::missing_field("uuid", describe(record)))?;
            path = path.join(name).join(uuid);
        }
        path = path.join(resource);
        if let Some(stub) = stub {
            let uuid = record_uuid(stub)
                .ok_or_else(|| TransferError::missing_field("uuid", describe(stub)))?;
            path = path.join(uuid);
        }
        Ok(path)
    }

    /// Same concatenation as [`Workspace::path_for`], but with primary keys
    /// instead of uuids: a relative URL path for the connector.
    pub fn url_for(
        &self,
        parents: &Parents,
        resource: &str,
        stub: Option<&Value>,
        pk_kind: PkKind,
    ) -> Result<String, TransferError> {
        let mut segments = Vec::new();
        for (name, record) in parents.iter() {
            segments.push(name.to_string());
            segments.push(pk_segment(record, pk_kind)?);
        }
        segments.push(resource.to_string());
        if let Some(stub) = stub {
            segments.push(pk_segment(stub, pk_kind)?);
        }
        Ok(segments.join("/"))
    }

    /// Idempotent directory creation.
    pub fn ensure_dir(&self, path: &Path) -> Result<(), WorkspaceError> {
        fs::create_dir_all(path).map_err(|e| WorkspaceError::io(path, e))
    }

    pub fn load_json(&self, path: &Path) -> Result<Value, WorkspaceError> {
        let bytes = fs::read(path).map_err(|e| WorkspaceError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| WorkspaceError::json(path, e))
    }

    /// `Ok(None)` when the file is absent or empty; malformed JSON in a
    /// non-empty file is still surfaced as an error, never swallowed.
    pub fn try_load_json(&self, path: &Path) -> Result<Option<Value>, WorkspaceError> {
        match fs::read(path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| WorkspaceError::json(path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkspaceError::io(path, e)),
        }
    }

    /// Whole-file replacement: write a sibling temp file, then rename over
    /// the destination.
    pub fn replace_json(&self, path: &Path, value: &Value) -> Result<(), WorkspaceError> {
        let data = serde_json::to_vec_pretty(value).map_err(|e| WorkspaceError::json(path, e))?;
        self.replace_bytes(path, &data)
    }

    pub fn replace_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| WorkspaceError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| WorkspaceError::io(path, e))
    }
}

fn pk_segment(record: &Value, pk_kind: PkKind) -> Result<String, TransferError> {
    let (pk, field) = match pk_kind {
        PkKind::Source => (source_pk(record), "source_record_key"),
        PkKind::Target => (target_pk(record), "target_record_key"),
    };
    pk.map(str::to_string)
        .ok_or_else(|| TransferError::missing_field(field, describe(record)))
}

fn describe(record: &Value) -> &str {
    source_record_key(record).unwrap_or("<unkeyed record>")
}

fn file_is_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.ensure_dir(ws.root()).unwrap();
        (dir, ws)
    }

    #[test]
    fn singular_strips_trailing_s() {
        assert_eq!(singular("journals"), "journal");
        assert_eq!(singular("review_form_elements"), "review_form_element");
        assert_eq!(detail_filename("articles"), "article.json");
    }

    #[test]
    fn initialize_persists_and_reuses_namespace() {
        let (_dir, ws) = workspace();
        let first = ws.initialize("Journal Ferry", "0.2.0").unwrap();
        let second = ws.initialize("Journal Ferry", "0.2.0").unwrap();
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(second.application, "Journal Ferry");
    }

    #[test]
    fn update_meta_preserves_unknown_keys() {
        let (_dir, ws) = workspace();
        ws.initialize("Journal Ferry", "0.2.0").unwrap();

        // Simulate a foreign writer adding a key this version doesn't know.
        let mut raw = ws.load_json(&ws.meta_path()).unwrap();
        raw["operator_note"] = json!("keep me");
        ws.replace_json(&ws.meta_path(), &raw).unwrap();

        ws.update_meta(|meta| meta.set_started(Stage::Index, Utc::now()))
            .unwrap();
        let raw = ws.load_json(&ws.meta_path()).unwrap();
        assert_eq!(raw["operator_note"], json!("keep me"));
        assert!(raw.get("index_started").is_some());
    }

    #[test]
    fn legacy_pushfinished_key_is_honored() {
        let (_dir, ws) = workspace();
        ws.initialize("Journal Ferry", "0.2.0").unwrap();

        let mut raw = ws.load_json(&ws.meta_path()).unwrap();
        raw["pushfinished"] = json!("2024-01-01T00:00:00Z");
        ws.replace_json(&ws.meta_path(), &raw).unwrap();

        let meta = ws.load_meta().unwrap();
        assert!(meta.push_finished.is_some());
    }

    #[test]
    fn current_stage_is_the_started_unfinished_one() {
        let mut meta = TransferMeta::new("Journal Ferry", "0.2.0");
        assert_eq!(meta.current_stage(), None);

        meta.set_started(Stage::Index, Utc::now());
        assert_eq!(meta.current_stage(), Some(Stage::Index));

        meta.set_finished(Stage::Index, Utc::now());
        meta.set_started(Stage::Fetch, Utc::now());
        assert_eq!(meta.current_stage(), Some(Stage::Fetch));
    }

    #[test]
    fn path_and_url_concatenate_parent_segments() {
        let (_dir, ws) = workspace();
        let journal = json!({
            "uuid": "aaaa", "source_record_key": "journals:3", "target_record_key": "journals:9"
        });
        let parents = Parents::new().child("journals", journal);
        let stub = json!({
            "uuid": "bbbb", "source_record_key": "articles:5", "target_record_key": "articles:12"
        });

        let path = ws.path_for(&parents, "articles", Some(&stub)).unwrap();
        assert!(path.ends_with("current/journals/aaaa/articles/bbbb"));

        let url = ws
            .url_for(&parents, "articles", Some(&stub), PkKind::Source)
            .unwrap();
        assert_eq!(url, "journals/3/articles/5");

        let url = ws
            .url_for(&parents, "articles", None, PkKind::Target)
            .unwrap();
        assert_eq!(url, "journals/9/articles");
    }

    #[test]
    fn url_for_without_target_key_is_a_missing_field() {
        let (_dir, ws) = workspace();
        let parents = Parents::new().child("journals", json!({ "uuid": "aaaa", "source_record_key": "journals:3" }));
        let err = ws
            .url_for(&parents, "articles", None, PkKind::Target)
            .unwrap_err();
        assert!(err.recoverable());
    }

    #[test]
    fn try_load_json_distinguishes_missing_empty_and_malformed() {
        let (_dir, ws) = workspace();
        let path = ws.root().join("probe.json");

        assert!(ws.try_load_json(&path).unwrap().is_none());

        fs::write(&path, b"").unwrap();
        assert!(ws.try_load_json(&path).unwrap().is_none());

        fs::write(&path, b"{not json").unwrap();
        assert!(ws.try_load_json(&path).is_err());

        ws.replace_json(&path, &json!({ "ok": true })).unwrap();
        assert_eq!(ws.try_load_json(&path).unwrap().unwrap()["ok"], json!(true));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
