//! PUSH stage: replay the workspace onto the target server.
//!
//! Foreign keys are rewritten first — the resolver walks the local tree to
//! find the related record's detail and copies its `target_record_key`
//! into the reference — then the detail is POSTed, as JSON or as multipart
//! when binaries sit next to it. A 2xx response carrying
//! `source_record_key` names the record on the target; it is written back
//! into the detail as `target_record_key`, which is also the resume
//! marker: a detail that already has one is skipped without network.

use std::path::Path;

use serde_json::{json, Value};

use crate::connector::{FilePart, PostBody};
use crate::error::{Result, TransferError};
use crate::progress::UpdateLevel;
use crate::resolver::locate_related;
use crate::structure::{HandlerId, Hooks, StructureNode};
use crate::types::{record_uuid, source_record_key, target_record_key, Parents, PkKind, Stage};
use crate::walker::{StageContext, StageDriver};
use crate::workspace::{detail_filename, WorkspaceError};

use super::{filter_top_level, load_index, response_assigned_key, target_post};

#[derive(Debug, Default)]
pub(crate) struct PushDriver;

impl StageDriver for PushDriver {
    fn stage(&self) -> Stage {
        Stage::Push
    }

    fn items(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        _node: &StructureNode,
        _hooks: &Hooks,
        parents: &Parents,
    ) -> Result<Vec<Value>> {
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
        let dir = ctx.workspace.path_for(parents, name, Some(stub))?;
        let file = dir.join(detail_filename(name));
        let mut detail = ctx.workspace.load_json(&file)?;

        if target_record_key(&detail).is_some() {
            ctx.observer.debug(
                &format!("already pushed {}", file.display()),
                UpdateLevel::Debug,
            );
            return Ok(Some(detail));
        }

        match hooks.preprocessor {
            None => {
                if !node.foreign_keys.is_empty() {
                    resolve_foreign_keys(ctx, node, parents, &file, &mut detail)?;
                }
            }
            Some(HandlerId::ResponseFormChain) => {
                resolve_through_form_chain(ctx, node, parents, &file, &mut detail)?;
            }
            Some(other) => {
                return Err(TransferError::Structure(format!(
                    "{name}: {other:?} is not a push preprocessor"
                )))
            }
        }

        let url = ctx
            .workspace
            .url_for(parents, name, None, PkKind::Target)?;

        let detail = match hooks.handler {
            None => push_detail(ctx, &dir, &file, &url, detail)?,
            Some(HandlerId::RolesPush) => push_role(ctx, &file, &url, detail)?,
            Some(HandlerId::BinaryPush) => push_binary(ctx, &dir, &file, &url, detail)?,
            Some(other) => {
                return Err(TransferError::Structure(format!(
                    "{name}: {other:?} is not a push handler"
                )))
            }
        };

        Ok(Some(detail))
    }
}

/// Default preprocessor: copy `target_record_key` into every declared
/// foreign reference the resolver can find on disk. Unresolvable
/// references are left untouched rather than aborting the transfer.
fn resolve_foreign_keys(
    ctx: &mut StageContext<'_>,
    node: &StructureNode,
    parents: &Parents,
    file: &Path,
    detail: &mut Value,
) -> Result<()> {
    let mut changed = false;
    for foreign_key in &node.foreign_keys {
        let Some(value) = detail.get_mut(&foreign_key.field) else {
            continue;
        };
        match value {
            Value::Object(_) => {
                changed |= resolve_reference(ctx, parents, &foreign_key.resource, value)?;
            }
            Value::Array(items) => {
                for item in items {
                    changed |= resolve_reference(ctx, parents, &foreign_key.resource, item)?;
                }
            }
            _ => {}
        }
    }
    if changed {
        ctx.workspace.replace_json(file, detail)?;
    }
    Ok(())
}

/// `responses` preprocessor: review-form elements live under their form,
/// which the natural article chain cannot reach. Rebuild a synthetic
/// `{journals, review_forms}` chain from the parent review's `review_form`
/// reference and resolve through that.
fn resolve_through_form_chain(
    ctx: &mut StageContext<'_>,
    node: &StructureNode,
    parents: &Parents,
    file: &Path,
    detail: &mut Value,
) -> Result<()> {
    let journal = parents.get("journals").cloned();
    let form = parents
        .get("reviews")
        .and_then(|review| review.get("review_form"))
        .cloned();
    let (Some(journal), Some(form)) = (journal, form) else {
        ctx.observer.debug(
            "cannot rebuild review form chain; leaving references unresolved",
            UpdateLevel::Debug,
        );
        return Ok(());
    };

    let synthetic = Parents::new()
        .child("journals", journal)
        .child("review_forms", form);

    let mut changed = false;
    for foreign_key in &node.foreign_keys {
        let Some(value) = detail.get_mut(&foreign_key.field) else {
            continue;
        };
        match value {
            Value::Object(_) => {
                changed |= resolve_reference(ctx, &synthetic, &foreign_key.resource, value)?;
            }
            Value::Array(items) => {
                for item in items {
                    changed |= resolve_reference(ctx, &synthetic, &foreign_key.resource, item)?;
                }
            }
            _ => {}
        }
    }
    if changed {
        ctx.workspace.replace_json(file, detail)?;
    }
    Ok(())
}

fn resolve_reference(
    ctx: &mut StageContext<'_>,
    parents: &Parents,
    resource: &str,
    reference: &mut Value,
) -> Result<bool> {
    let Some(uuid) = record_uuid(reference).map(str::to_string) else {
        return Ok(false);
    };
    let Some(path) = locate_related(ctx.workspace.root(), parents, resource, &uuid) else {
        ctx.observer.debug(
            &format!("no {resource} directory reachable for {uuid}"),
            UpdateLevel::Debug,
        );
        return Ok(false);
    };
    let Some(related) = ctx.workspace.try_load_json(&path)? else {
        ctx.observer.debug(
            &format!("unresolved {resource} reference {uuid}"),
            UpdateLevel::Debug,
        );
        return Ok(false);
    };
    let Some(key) = target_record_key(&related).map(str::to_string) else {
        ctx.observer.debug(
            &format!("{resource} {uuid} has no target key yet"),
            UpdateLevel::Debug,
        );
        return Ok(false);
    };
    reference["target_record_key"] = json!(key);
    Ok(true)
}

/// Default push handler: JSON POST, or multipart when the detail has
/// sibling binaries (each keyed by the `*_file` field that produced it).
fn push_detail(
    ctx: &mut StageContext<'_>,
    dir: &Path,
    file: &Path,
    url: &str,
    mut detail: Value,
) -> Result<Value> {
    let files = collect_sibling_files(&detail, dir)?;
    let body = if files.is_empty() {
        PostBody::Json(detail.clone())
    } else {
        PostBody::Multipart {
            fields: detail.as_object().cloned().unwrap_or_default(),
            files,
        }
    };

    let response = target_post(ctx, url, &body)?;
    if let Some(key) = response_assigned_key(&response) {
        detail["target_record_key"] = json!(key);
        ctx.workspace.replace_json(file, &detail)?;
    }
    Ok(detail)
}

/// `roles` handler: the target cannot hold a role without its user, so
/// the referenced user is pushed first (gaining its own target key), the
/// role's user reference is rewritten, and only then is the role POSTed.
fn push_role(
    ctx: &mut StageContext<'_>,
    file: &Path,
    url: &str,
    mut role: Value,
) -> Result<Value> {
    if let Some(uuid) = role.get("user").and_then(record_uuid).map(str::to_string) {
        let user_file = ctx
            .workspace
            .root()
            .join("users")
            .join(&uuid)
            .join("user.json");
        if let Some(mut user) = ctx.workspace.try_load_json(&user_file)? {
            if target_record_key(&user).is_none() {
                let response = target_post(ctx, "users", &PostBody::Json(user.clone()))?;
                if let Some(key) = response_assigned_key(&response) {
                    user["target_record_key"] = json!(key);
                    ctx.workspace.replace_json(&user_file, &user)?;
                }
            }
            if let Some(key) = target_record_key(&user).map(str::to_string) {
                role["user"]["target_record_key"] = json!(key);
                ctx.workspace.replace_json(file, &role)?;
            }
        }
    }

    let response = target_post(ctx, url, &PostBody::Json(role.clone()))?;
    if let Some(key) = response_assigned_key(&response) {
        role["target_record_key"] = json!(key);
        ctx.workspace.replace_json(file, &role)?;
    }
    Ok(role)
}

/// `files` handler: the single sibling binary goes up as the `file` part,
/// merged with the `file.json` metadata. The parent file's target key is
/// resolved from the sibling directory named by the parent's uuid.
fn push_binary(
    ctx: &mut StageContext<'_>,
    dir: &Path,
    file: &Path,
    url: &str,
    mut metadata: Value,
) -> Result<Value> {
    if let Some(parent_key) = metadata
        .get("parent_source_record_key")
        .and_then(Value::as_str)
        .map(str::to_string)
    {
        let parent_uuid = ctx.identity.of(&parent_key).to_string();
        if let Some(files_dir) = dir.parent() {
            let parent_file = files_dir.join(parent_uuid).join("file.json");
            if let Some(parent_meta) = ctx.workspace.try_load_json(&parent_file)? {
                if let Some(key) = target_record_key(&parent_meta).map(str::to_string) {
                    metadata["parent_target_record_key"] = json!(key);
                    ctx.workspace.replace_json(file, &metadata)?;
                }
            }
        }
    }

    let binary = sibling_binaries(dir)?.into_iter().next().ok_or_else(|| {
        TransferError::missing_field(
            "binary attachment",
            source_record_key(&metadata).unwrap_or("<unkeyed file>"),
        )
    })?;
    let body = PostBody::Multipart {
        fields: metadata.as_object().cloned().unwrap_or_default(),
        files: vec![FilePart {
            name: "file".to_string(),
            filename: binary.0,
            bytes: binary.1,
        }],
    };

    let response = target_post(ctx, url, &body)?;
    if let Some(key) = response_assigned_key(&response) {
        metadata["target_record_key"] = json!(key);
        ctx.workspace.replace_json(file, &metadata)?;
    }
    Ok(metadata)
}

/// Binaries next to a detail become multipart parts. A file recorded by
/// the fetch postprocessor is keyed by its owning `*_file` field; anything
/// else falls back to `<filename>_file`.
fn collect_sibling_files(detail: &Value, dir: &Path) -> Result<Vec<FilePart>> {
    let mut parts = Vec::new();
    for (filename, bytes) in sibling_binaries(dir)? {
        let field = field_for_filename(detail, &filename)
            .unwrap_or_else(|| format!("{filename}_file"));
        parts.push(FilePart {
            name: field,
            filename,
            bytes,
        });
    }
    Ok(parts)
}

fn field_for_filename(detail: &Value, filename: &str) -> Option<String> {
    let map = detail.as_object()?;
    map.iter().find_map(|(key, value)| {
        let field = key.strip_suffix("_filename")?;
        (value.as_str() == Some(filename)).then(|| field.to_string())
    })
}

/// All non-JSON regular files in a directory, sorted by name for
/// deterministic request bodies.
fn sibling_binaries(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut binaries = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| WorkspaceError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| WorkspaceError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.ends_with(".json") || name.ends_with(".tmp") || name.is_empty() {
            continue;
        }
        let bytes = std::fs::read(&path).map_err(|e| WorkspaceError::Io { path, source: e })?;
        binaries.push((name, bytes));
    }
    binaries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(binaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filenames_map_back_to_their_file_field() {
        let detail = json!({
            "cover_file": { "url": "https://host/x.png" },
            "cover_file_filename": "x.png",
            "title": "A"
        });
        assert_eq!(
            field_for_filename(&detail, "x.png"),
            Some("cover_file".to_string())
        );
        assert_eq!(field_for_filename(&detail, "y.png"), None);
    }

    #[test]
    fn sibling_binaries_skip_json_and_temp_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("article.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("article.json.tmp"), b"{}").unwrap();
        std::fs::write(dir.path().join("b.png"), b"png").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"pdf").unwrap();

        let binaries = sibling_binaries(dir.path()).unwrap();
        let names: Vec<&str> = binaries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.png"]);
    }
}
