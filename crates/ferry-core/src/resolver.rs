//! Foreign-key resolution over the local workspace.
//!
//! A foreign reference carries the related record's uuid but not its
//! location. Related records live either as a sibling of the current
//! subtree (sections next to articles, under the journal) or higher up
//! (users at the root, review-form elements under their form), so the
//! search starts at the workspace root and consumes the parent chain one
//! ancestor at a time until a directory named for the related type shows
//! up.

use std::path::{Path, PathBuf};

use crate::types::{record_uuid, Parents};
use crate::workspace::detail_filename;

/// Candidate path of the detail file for a `resource`-type record with
/// uuid `uuid`, given the parent chain of the referring record.
///
/// The path is not existence-checked; a caller finding nothing there
/// leaves the foreign key unresolved rather than aborting the transfer.
pub fn locate_related(
    root: &Path,
    parents: &Parents,
    resource: &str,
    uuid: &str,
) -> Option<PathBuf> {
    let mut base = root.to_path_buf();
    let mut chain = parents.iter();

    loop {
        let candidate = base.join(resource);
        if candidate.is_dir() {
            return Some(candidate.join(uuid).join(detail_filename(resource)));
        }
        let (ancestor, record) = chain.next()?;
        base = base.join(ancestor).join(record_uuid(record)?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    /// Lay out a workspace with users at the root, sections under a
    /// journal, and review-form elements under their form.
    fn seed() -> (TempDir, Parents) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("users/u-user/")).unwrap();
        fs::create_dir_all(root.join("journals/u-journal/sections/u-section")).unwrap();
        fs::create_dir_all(
            root.join("journals/u-journal/review_forms/u-form/review_form_elements/u-element"),
        )
        .unwrap();

        let parents = Parents::new()
            .child("journals", json!({ "uuid": "u-journal" }))
            .child("articles", json!({ "uuid": "u-article" }));
        (dir, parents)
    }

    #[test]
    fn users_resolve_at_the_root() {
        let (dir, parents) = seed();
        let path = locate_related(dir.path(), &parents, "users", "u-user").unwrap();
        assert_eq!(path, dir.path().join("users/u-user/user.json"));
    }

    #[test]
    fn siblings_resolve_at_the_journal_level() {
        let (dir, parents) = seed();
        let path = locate_related(dir.path(), &parents, "sections", "u-section").unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("journals/u-journal/sections/u-section/section.json")
        );
    }

    #[test]
    fn form_elements_need_the_form_in_the_chain() {
        let (dir, _) = seed();

        // The natural article chain cannot reach inside review_forms.
        let article_chain = Parents::new()
            .child("journals", json!({ "uuid": "u-journal" }))
            .child("articles", json!({ "uuid": "u-article" }));
        assert_eq!(
            locate_related(
                dir.path(),
                &article_chain,
                "review_form_elements",
                "u-element"
            ),
            None
        );

        // A synthetic {journals, review_forms} chain does.
        let form_chain = Parents::new()
            .child("journals", json!({ "uuid": "u-journal" }))
            .child("review_forms", json!({ "uuid": "u-form" }));
        let path = locate_related(
            dir.path(),
            &form_chain,
            "review_form_elements",
            "u-element",
        )
        .unwrap();
        assert!(path.ends_with(
            "review_forms/u-form/review_form_elements/u-element/review_form_element.json"
        ));
    }

    #[test]
    fn unknown_type_exhausts_the_chain() {
        let (dir, parents) = seed();
        assert_eq!(
            locate_related(dir.path(), &parents, "galleys", "u-x"),
            None
        );
    }
}
