//! The three stages: INDEX, FETCH, PUSH.
//!
//! Each stage is a [`StageDriver`](crate::walker::StageDriver) plugged into
//! the shared walker. This module holds the request/response helpers and
//! index bookkeeping the drivers have in common.

pub(crate) mod fetch;
pub(crate) mod index;
pub(crate) mod push;

pub(crate) use fetch::FetchDriver;
pub(crate) use index::IndexDriver;
pub(crate) use push::PushDriver;

use std::path::Path;

use serde_json::{json, Value};

use crate::connector::{ConnectorError, GetOptions, PostBody, Response};
use crate::error::Result;
use crate::progress::UpdateLevel;
use crate::types::{source_record_key, Parents};
use crate::walker::StageContext;
use crate::workspace::WorkspaceError;

/// Resource URLs end with a slash on both protocols (`journals/`,
/// `journals/3/articles/`).
fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// GET a JSON document from the source server.
pub(crate) fn source_get_json(
    ctx: &mut StageContext<'_>,
    url: &str,
    options: &GetOptions,
) -> Result<Value> {
    let path = with_trailing_slash(url);
    ctx.observer
        .debug(&format!("GET {path}"), UpdateLevel::Debug);
    let response = ctx.source()?.get(&path, options)?;
    Ok(response.ensure_ok()?.json()?)
}

/// GET a binary attachment, either relative to the source host or from an
/// absolute URL found inside a record.
pub(crate) fn source_get_binary(
    ctx: &mut StageContext<'_>,
    url: &str,
    absolute: bool,
) -> Result<Response> {
    let path = if absolute {
        url.to_string()
    } else {
        with_trailing_slash(url)
    };
    ctx.observer
        .debug(&format!("GET {path} (binary)"), UpdateLevel::Debug);
    let options = if absolute {
        GetOptions::absolute()
    } else {
        GetOptions::default()
    };
    let response = ctx.source()?.get(&path, &options)?;
    Ok(response.ensure_ok()?)
}

/// POST to the target server. All non-2xx responses surface as server
/// response errors for the observer.
pub(crate) fn target_post(
    ctx: &mut StageContext<'_>,
    url: &str,
    body: &PostBody,
) -> Result<Response> {
    let path = with_trailing_slash(url);
    ctx.observer
        .debug(&format!("POST {path}"), UpdateLevel::Debug);
    let response = ctx.target()?.post(&path, body)?;
    Ok(response.ensure_ok()?)
}

/// The key the target assigned to a pushed record, if the response body
/// carries one. A 2xx response without it is a target-side no-op.
pub(crate) fn response_assigned_key(response: &Response) -> Option<String> {
    response
        .json()
        .ok()
        .as_ref()
        .and_then(source_record_key)
        .map(str::to_string)
}

/// Load `<path>/index.json` as a worklist. Absent or empty aborts the
/// subtree quietly; present-but-not-an-array is corrupt workspace data.
pub(crate) fn load_index(ctx: &mut StageContext<'_>, path: &Path) -> Result<Vec<Value>> {
    let file = path.join("index.json");
    match ctx.workspace.try_load_json(&file)? {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(WorkspaceError::Format {
            path: file,
            message: "index is not a JSON array".to_string(),
        }
        .into()),
    }
}

/// Sort stubs for deterministic persistence and iteration.
pub(crate) fn sort_by_source_key(items: &mut [Value]) {
    items.sort_by(|a, b| {
        source_record_key(a)
            .unwrap_or("")
            .cmp(source_record_key(b).unwrap_or(""))
    });
}

/// Apply the journal filter to a top-level worklist. Stubs carrying
/// neither a `path` nor a `code` field are kept; the filter only ever
/// narrows what it can identify.
pub(crate) fn filter_top_level(
    ctx: &StageContext<'_>,
    parents: &Parents,
    stubs: Vec<Value>,
) -> Vec<Value> {
    if !parents.is_empty() || ctx.filters.is_empty() {
        return stubs;
    }
    stubs
        .into_iter()
        .filter(|stub| {
            let identifier = ["path", "code"]
                .iter()
                .find_map(|field| stub.get(*field).and_then(Value::as_str));
            match identifier {
                Some(value) => ctx.filters.iter().any(|f| f == value),
                None => true,
            }
        })
        .collect()
}

/// Merge user stubs into `<root>/users/index.json`, preserving prior
/// entries, deduplicated by source key, sorted. Users live in one
/// directory at the root to prevent duplication across journals.
pub(crate) fn merge_user_stubs(ctx: &mut StageContext<'_>, users: &[Value]) -> Result<()> {
    if users.is_empty() {
        return Ok(());
    }
    let file = ctx.workspace.root().join("users").join("index.json");
    let mut entries = match ctx.workspace.try_load_json(&file)? {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    for user in users {
        let Some(key) = source_record_key(user) else {
            continue;
        };
        if entries.iter().any(|e| source_record_key(e) == Some(key)) {
            continue;
        }
        entries.push(json!({
            "source_record_key": key,
            "uuid": user.get("uuid").cloned().unwrap_or(Value::Null),
        }));
    }
    sort_by_source_key(&mut entries);
    ctx.workspace.replace_json(&file, &Value::Array(entries))?;
    Ok(())
}

pub(crate) fn unexpected_response(url: &str, message: &str) -> ConnectorError {
    ConnectorError::Decode {
        url: url.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorting_is_by_source_key() {
        let mut items = vec![
            json!({ "source_record_key": "articles:9" }),
            json!({ "source_record_key": "articles:10" }),
            json!({ "source_record_key": "articles:1" }),
        ];
        sort_by_source_key(&mut items);
        let keys: Vec<&str> = items
            .iter()
            .map(|i| i["source_record_key"].as_str().unwrap())
            .collect();
        // Lexicographic over the full key string.
        assert_eq!(keys, vec!["articles:1", "articles:10", "articles:9"]);
    }

    #[test]
    fn trailing_slash_is_added_once() {
        assert_eq!(with_trailing_slash("journals"), "journals/");
        assert_eq!(with_trailing_slash("journals/"), "journals/");
    }
}
