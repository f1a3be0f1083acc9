//! INDEX stage: materialize the list stubs for every resource type.
//!
//! For each enabled node the index is fetched from the source, uuids are
//! assigned, and the result is written sorted to `<path>/index.json`. A
//! node with children also gets one `<uuid>/` directory per stub, and the
//! walker recurses with the stub appended to the parent chain.

use serde_json::Value;

use crate::connector::GetOptions;
use crate::error::{Result, TransferError};
use crate::progress::UpdateLevel;
use crate::structure::{HandlerId, Hooks, StructureNode};
use crate::types::{Parents, Stage};
use crate::walker::{StageContext, StageDriver};

use super::{merge_user_stubs, sort_by_source_key, source_get_json, unexpected_response};

#[derive(Debug, Default)]
pub(crate) struct IndexDriver;

impl StageDriver for IndexDriver {
    fn stage(&self) -> Stage {
        Stage::Index
    }

    fn items(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        _node: &StructureNode,
        hooks: &Hooks,
        parents: &Parents,
    ) -> Result<Vec<Value>> {
        let path = ctx.workspace.path_for(parents, name, None)?;
        let url = ctx
            .workspace
            .url_for(parents, name, None, self.pk_kind())?;

        match hooks.handler {
            None => fetch_index(ctx, &path, &url, &GetOptions::default()),
            Some(HandlerId::JournalsIndex) => {
                let mut options = GetOptions::default();
                if !ctx.filters.is_empty() {
                    options = options.with_param("paths", &ctx.filters.join(","));
                }
                fetch_index(ctx, &path, &url, &options)
            }
            Some(HandlerId::RolesIndex) => {
                let stubs = fetch_index(ctx, &path, &url, &GetOptions::default())?;
                // Users nested in role stubs seed the root users index so
                // their details have somewhere to land during FETCH.
                let users: Vec<Value> = stubs
                    .iter()
                    .filter_map(|stub| stub.get("user").cloned())
                    .collect();
                merge_user_stubs(ctx, &users)?;
                Ok(stubs)
            }
            Some(other) => Err(TransferError::Structure(format!(
                "{name}: {other:?} is not an index handler"
            ))),
        }
    }

    fn item(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        node: &StructureNode,
        _hooks: &Hooks,
        parents: &Parents,
        stub: &Value,
    ) -> Result<Option<Value>> {
        if node.children.is_empty() {
            return Ok(None);
        }
        let dir = ctx.workspace.path_for(parents, name, Some(stub))?;
        ctx.workspace.ensure_dir(&dir)?;
        Ok(Some(stub.clone()))
    }
}

/// Default index handler: GET, assign uuids, sort, persist. When a
/// non-empty index already exists the GET is skipped and the persisted
/// content is reused, which is what makes a re-run resumable.
fn fetch_index(
    ctx: &mut StageContext<'_>,
    path: &std::path::Path,
    url: &str,
    options: &GetOptions,
) -> Result<Vec<Value>> {
    let file = path.join("index.json");
    if let Some(Value::Array(existing)) = ctx.workspace.try_load_json(&file)? {
        if !existing.is_empty() {
            ctx.observer.debug(
                &format!("reusing index {}", file.display()),
                UpdateLevel::Debug,
            );
            return Ok(existing);
        }
    }

    let mut data = source_get_json(ctx, url, options)?;
    ctx.identity.assign(&mut data);
    let Value::Array(mut items) = data else {
        return Err(unexpected_response(url, "expected a JSON array of stubs").into());
    };
    sort_by_source_key(&mut items);
    ctx.workspace
        .replace_json(&file, &Value::Array(items.clone()))?;
    Ok(items)
}
