//! FETCH stage: fill every indexed stub with its full detail.
//!
//! The default handler GETs `<url>/<source_pk>/` and writes the detail to
//! `<path>/<uuid>/<singular>.json`. The default postprocessor then pulls
//! down whatever the detail links to: `*_file` attachments next to the
//! detail, and users referenced through foreign keys into the root users
//! directory. Every step skips work whose artifact already exists, so a
//! crashed run resumes where it stopped.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::connector::GetOptions;
use crate::error::{Result, TransferError};
use crate::progress::UpdateLevel;
use crate::structure::{HandlerId, Hooks, StructureNode};
use crate::types::{record_uuid, source_pk, source_record_key, Parents, PkKind, Stage};
use crate::walker::{StageContext, StageDriver};
use crate::workspace::detail_filename;

use super::{filter_top_level, load_index, merge_user_stubs, source_get_binary, source_get_json};

#[derive(Debug, Default)]
pub(crate) struct FetchDriver;

impl StageDriver for FetchDriver {
    fn stage(&self) -> Stage {
        Stage::Fetch
    }

    fn items(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        _node: &StructureNode,
        hooks: &Hooks,
        parents: &Parents,
    ) -> Result<Vec<Value>> {
        if hooks.singleton {
            // Exactly one handler call, no per-instance iteration.
            return Ok(vec![Value::Null]);
        }
        let path = ctx.workspace.path_for(parents, name, None)?;
        let stubs = load_index(ctx, &path)?;
        Ok(filter_top_level(ctx, parents, stubs))
    }

    fn item(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        node: &StructureNode,
        hooks: &Hooks,
        parents: &Parents,
        stub: &Value,
    ) -> Result<Option<Value>> {
        let (dir, url) = if stub.is_null() {
            (
                ctx.workspace.path_for(parents, name, None)?,
                ctx.workspace.url_for(parents, name, None, PkKind::Source)?,
            )
        } else {
            (
                ctx.workspace.path_for(parents, name, Some(stub))?,
                ctx.workspace
                    .url_for(parents, name, Some(stub), PkKind::Source)?,
            )
        };
        let file = dir.join(detail_filename(name));

        let mut detail = match hooks.handler {
            None => fetch_detail(ctx, &file, &url)?,
            Some(HandlerId::ExtractFromIndex) => extract_from_index(ctx, &file, stub)?,
            Some(HandlerId::BinaryFetch) => fetch_binary(ctx, &dir, &file, &url, stub)?,
            Some(other) => {
                return Err(TransferError::Structure(format!(
                    "{name}: {other:?} is not a fetch handler"
                )))
            }
        };

        // Default postprocessor; no named alternatives exist for FETCH.
        fetch_linked_files(ctx, &dir, &file, &mut detail)?;
        ensure_foreign_users(ctx, node, &detail)?;

        Ok(Some(detail))
    }
}

/// Default fetch handler. An existing non-empty detail file is reused
/// without a network call.
fn fetch_detail(ctx: &mut StageContext<'_>, file: &Path, url: &str) -> Result<Value> {
    if let Some(existing) = ctx.workspace.try_load_json(file)? {
        ctx.observer.debug(
            &format!("reusing detail {}", file.display()),
            UpdateLevel::Debug,
        );
        return Ok(existing);
    }
    let mut detail = source_get_json(ctx, url, &GetOptions::default())?;
    ctx.identity.assign(&mut detail);
    ctx.workspace.replace_json(file, &detail)?;
    Ok(detail)
}

/// The stub already is the detail; persist it verbatim.
fn extract_from_index(ctx: &mut StageContext<'_>, file: &Path, stub: &Value) -> Result<Value> {
    if let Some(existing) = ctx.workspace.try_load_json(file)? {
        return Ok(existing);
    }
    ctx.workspace.replace_json(file, stub)?;
    Ok(stub.clone())
}

/// `files` handler: stub metadata as `file.json` plus the binary itself,
/// named from Content-Disposition.
fn fetch_binary(
    ctx: &mut StageContext<'_>,
    dir: &Path,
    file: &Path,
    url: &str,
    stub: &Value,
) -> Result<Value> {
    if let Some(existing) = ctx.workspace.try_load_json(file)? {
        if sibling_binary(dir).is_some() {
            return Ok(existing);
        }
    }

    ctx.workspace.replace_json(file, stub)?;
    let response = source_get_binary(ctx, url, false)?;
    let filename = response
        .attachment_filename()
        .unwrap_or_else(|| "unknown_attachment".to_string());
    ctx.workspace
        .replace_bytes(&dir.join(filename), response.content())?;
    Ok(stub.clone())
}

/// Default postprocessor, part one: download every `*_file` object that
/// carries a `url`, store it next to the detail, and record the filename
/// under `<field>_filename`.
fn fetch_linked_files(
    ctx: &mut StageContext<'_>,
    dir: &Path,
    file: &Path,
    detail: &mut Value,
) -> Result<()> {
    let Some(map) = detail.as_object() else {
        return Ok(());
    };
    let linked: Vec<(String, String)> = map
        .iter()
        .filter_map(|(field, value)| {
            if !field.ends_with("_file") {
                return None;
            }
            value
                .get("url")
                .and_then(Value::as_str)
                .map(|url| (field.clone(), url.to_string()))
        })
        .collect();

    let mut changed = false;
    for (field, url) in linked {
        let filename_key = format!("{field}_filename");
        if let Some(existing) = detail.get(&filename_key).and_then(Value::as_str) {
            if dir.join(existing).exists() {
                continue;
            }
        }

        let response = source_get_binary(ctx, &url, true)?;
        let filename = response
            .attachment_filename()
            .or_else(|| basename(&url))
            .unwrap_or_else(|| "unknown_attachment".to_string());
        ctx.workspace
            .replace_bytes(&dir.join(&filename), response.content())?;
        detail[&filename_key] = json!(filename);
        changed = true;
    }

    if changed {
        ctx.workspace.replace_json(file, detail)?;
    }
    Ok(())
}

/// Default postprocessor, part two: any foreign key pointing at a user
/// whose workspace directory does not exist yet triggers a standalone
/// fetch. The index entry is appended before the detail is written.
fn ensure_foreign_users(
    ctx: &mut StageContext<'_>,
    node: &StructureNode,
    detail: &Value,
) -> Result<()> {
    for foreign_key in &node.foreign_keys {
        if foreign_key.resource != "users" {
            continue;
        }
        match detail.get(&foreign_key.field) {
            Some(reference @ Value::Object(_)) => ensure_user(ctx, reference)?,
            Some(Value::Array(items)) => {
                for reference in items {
                    ensure_user(ctx, reference)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn ensure_user(ctx: &mut StageContext<'_>, reference: &Value) -> Result<()> {
    let Some(key) = source_record_key(reference).map(str::to_string) else {
        return Ok(());
    };
    let Some(uuid) = record_uuid(reference).map(str::to_string) else {
        return Ok(());
    };
    let file: PathBuf = ctx
        .workspace
        .root()
        .join("users")
        .join(&uuid)
        .join("user.json");
    if ctx.workspace.try_load_json(&file)?.is_some() {
        return Ok(());
    }

    merge_user_stubs(ctx, &[reference.clone()])?;

    let pk = source_pk(reference)
        .map(str::to_string)
        .ok_or_else(|| TransferError::missing_field("source_record_key", &key))?;
    let mut user = source_get_json(ctx, &format!("users/{pk}"), &GetOptions::default())?;
    ctx.identity.assign(&mut user);
    ctx.workspace.replace_json(&file, &user)?;
    Ok(())
}

fn sibling_binary(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name()?.to_string_lossy().into_owned();
        if name.ends_with(".json") || name.ends_with(".tmp") {
            continue;
        }
        return Some(path);
    }
    None
}

fn basename(url: &str) -> Option<String> {
    url.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
