//! Declarative description of the resource tree.
//!
//! The tree is plain data: each node names its per-stage configuration,
//! foreign keys, and children. Children are ordered, and the order is
//! semantic — dependencies are declared before dependents so that by the
//! time a record is pushed, everything it references already has a target
//! key (`sections` before `issues`, `issues` before `articles`).
//!
//! Named hooks are symbolic [`HandlerId`]s resolved by the stage drivers
//! with a match, so a dangling reference cannot be expressed; what remains
//! checkable is that an id sits in a hook slot of the right stage, which
//! [`Structure::validate`] verifies once at startup.

use crate::error::TransferError;
use crate::types::Stage;

/// Symbolic names for the non-default stage hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerId {
    /// INDEX `journals`: forwards the journal-path filter as `paths=<csv>`.
    JournalsIndex,
    /// INDEX `roles`: merges users nested in role stubs into the root
    /// users index.
    RolesIndex,
    /// FETCH: the stub is the detail; write it verbatim, no network call.
    ExtractFromIndex,
    /// FETCH `files`: stub metadata plus a sibling binary download.
    BinaryFetch,
    /// PUSH `roles`: pushes the referenced user first, then the role.
    RolesPush,
    /// PUSH `files`: multipart upload of the single sibling binary.
    BinaryPush,
    /// PUSH `responses` preprocessor: resolves review-form elements through
    /// a synthetic `{journals, review_forms}` chain.
    ResponseFormChain,
}

/// Which hook position an id may occupy, and for which stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSlot {
    Handler,
    Preprocessor,
    Postprocessor,
}

impl HandlerId {
    pub fn slot(&self) -> (Stage, HookSlot) {
        match self {
            Self::JournalsIndex | Self::RolesIndex => (Stage::Index, HookSlot::Handler),
            Self::ExtractFromIndex | Self::BinaryFetch => (Stage::Fetch, HookSlot::Handler),
            Self::RolesPush | Self::BinaryPush => (Stage::Push, HookSlot::Handler),
            Self::ResponseFormChain => (Stage::Push, HookSlot::Preprocessor),
        }
    }
}

/// Hook overrides for one stage of one node. `None` means the stage
/// default applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    pub handler: Option<HandlerId>,
    pub preprocessor: Option<HandlerId>,
    pub postprocessor: Option<HandlerId>,
    /// No per-instance iteration at FETCH; the handler runs exactly once.
    pub singleton: bool,
}

impl Hooks {
    pub fn handler(id: HandlerId) -> Self {
        Self {
            handler: Some(id),
            ..Self::default()
        }
    }

    pub fn preprocessor(id: HandlerId) -> Self {
        Self {
            preprocessor: Some(id),
            ..Self::default()
        }
    }
}

/// Per-stage configuration: disabled (the walker skips the whole subtree
/// for that stage), or enabled with optional hook overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRule {
    Disabled,
    Enabled(Hooks),
}

impl Default for StageRule {
    fn default() -> Self {
        Self::Enabled(Hooks::default())
    }
}

impl StageRule {
    pub fn hooks(&self) -> Option<&Hooks> {
        match self {
            Self::Disabled => None,
            Self::Enabled(hooks) => Some(hooks),
        }
    }
}

/// A foreign-key field on a resource: `field` holds a reference (object or
/// list of objects) to records of type `resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub field: String,
    pub resource: String,
}

/// One resource type in the tree.
#[derive(Debug, Clone, Default)]
pub struct StructureNode {
    pub index: StageRule,
    pub fetch: StageRule,
    pub push: StageRule,
    pub foreign_keys: Vec<ForeignKey>,
    /// Ordered; declaration order is processing order.
    pub children: Vec<(String, StructureNode)>,
    /// Record field used in progress messages.
    pub name_key: Option<String>,
    pub progress_weight: u32,
}

impl StructureNode {
    pub fn new() -> Self {
        Self {
            progress_weight: 1,
            ..Self::default()
        }
    }

    pub fn rule(&self, stage: Stage) -> &StageRule {
        match stage {
            Stage::Index => &self.index,
            Stage::Fetch => &self.fetch,
            Stage::Push => &self.push,
        }
    }

    pub fn index(mut self, rule: StageRule) -> Self {
        self.index = rule;
        self
    }

    pub fn fetch(mut self, rule: StageRule) -> Self {
        self.fetch = rule;
        self
    }

    pub fn push(mut self, rule: StageRule) -> Self {
        self.push = rule;
        self
    }

    /// Disable every stage; the node exists only as a directory other
    /// handlers populate (users).
    pub fn dormant(mut self) -> Self {
        self.index = StageRule::Disabled;
        self.fetch = StageRule::Disabled;
        self.push = StageRule::Disabled;
        self
    }

    pub fn name_key(mut self, key: &str) -> Self {
        self.name_key = Some(key.to_string());
        self
    }

    pub fn foreign_key(mut self, field: &str, resource: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            field: field.to_string(),
            resource: resource.to_string(),
        });
        self
    }

    pub fn child(mut self, name: &str, node: StructureNode) -> Self {
        self.children.push((name.to_string(), node));
        self
    }

    /// Number of nodes in this subtree, used for minor progress lengths.
    pub fn nested_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|(_, child)| child.nested_count())
            .sum::<usize>()
    }

    fn validate(&self, name: &str) -> Result<(), TransferError> {
        for (stage, rule) in [
            (Stage::Index, &self.index),
            (Stage::Fetch, &self.fetch),
            (Stage::Push, &self.push),
        ] {
            let Some(hooks) = rule.hooks() else { continue };
            for (id, slot) in [
                (hooks.handler, HookSlot::Handler),
                (hooks.preprocessor, HookSlot::Preprocessor),
                (hooks.postprocessor, HookSlot::Postprocessor),
            ] {
                let Some(id) = id else { continue };
                if id.slot() != (stage, slot) {
                    return Err(TransferError::Structure(format!(
                        "{name}: {id:?} cannot serve as the {stage} {slot:?}"
                    )));
                }
            }
        }
        for (child_name, child) in &self.children {
            child.validate(child_name)?;
        }
        Ok(())
    }
}

/// The whole declarative tree, in document order.
#[derive(Debug, Clone, Default)]
pub struct Structure {
    pub roots: Vec<(String, StructureNode)>,
}

impl Structure {
    pub fn new(roots: Vec<(String, StructureNode)>) -> Self {
        Self { roots }
    }

    /// Check every referenced hook sits in a legal slot. Run once at
    /// coordinator construction.
    pub fn validate(&self) -> Result<(), TransferError> {
        for (name, node) in &self.roots {
            node.validate(name)?;
        }
        Ok(())
    }

    /// The journal-content tree this tool exists for.
    pub fn journal() -> Self {
        let articles = StructureNode::new()
            .name_key("title")
            .foreign_key("issue", "issues")
            .foreign_key("section", "sections")
            .child(
                "authors",
                StructureNode::new().fetch(StageRule::Enabled(Hooks::handler(
                    HandlerId::ExtractFromIndex,
                ))),
            )
            .child(
                "files",
                StructureNode::new()
                    .fetch(StageRule::Enabled(Hooks::handler(HandlerId::BinaryFetch)))
                    .push(StageRule::Enabled(Hooks::handler(HandlerId::BinaryPush))),
            )
            .child(
                "reviews",
                StructureNode::new()
                    .foreign_key("reviewer", "users")
                    .child(
                        "responses",
                        StructureNode::new()
                            .foreign_key("review_form_element", "review_form_elements")
                            .push(StageRule::Enabled(Hooks::preprocessor(
                                HandlerId::ResponseFormChain,
                            ))),
                    ),
            );

        let journals = StructureNode::new()
            .name_key("title")
            .index(StageRule::Enabled(Hooks::handler(HandlerId::JournalsIndex)))
            .child(
                "roles",
                StructureNode::new()
                    .foreign_key("user", "users")
                    .index(StageRule::Enabled(Hooks::handler(HandlerId::RolesIndex)))
                    .fetch(StageRule::Enabled(Hooks::handler(
                        HandlerId::ExtractFromIndex,
                    )))
                    .push(StageRule::Enabled(Hooks::handler(HandlerId::RolesPush))),
            )
            .child(
                "review_forms",
                StructureNode::new().child("review_form_elements", StructureNode::new()),
            )
            .child("sections", StructureNode::new())
            .child("issues", StructureNode::new())
            .child("articles", articles);

        Self::new(vec![
            ("users".to_string(), StructureNode::new().dormant()),
            ("journals".to_string(), journals),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_tree_orders_dependencies_first() {
        let structure = Structure::journal();
        structure.validate().unwrap();

        let (_, journals) = structure
            .roots
            .iter()
            .find(|(name, _)| name == "journals")
            .unwrap();
        let order: Vec<&str> = journals
            .children
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(
            order,
            vec!["roles", "review_forms", "sections", "issues", "articles"]
        );

        let sections = order.iter().position(|n| *n == "sections").unwrap();
        let issues = order.iter().position(|n| *n == "issues").unwrap();
        let articles = order.iter().position(|n| *n == "articles").unwrap();
        assert!(sections < issues && issues < articles);
    }

    #[test]
    fn users_root_is_fully_dormant() {
        let structure = Structure::journal();
        let (_, users) = structure
            .roots
            .iter()
            .find(|(name, _)| name == "users")
            .unwrap();
        assert_eq!(users.index, StageRule::Disabled);
        assert_eq!(users.fetch, StageRule::Disabled);
        assert_eq!(users.push, StageRule::Disabled);
    }

    #[test]
    fn validate_rejects_a_hook_in_the_wrong_slot() {
        let bad = Structure::new(vec![(
            "articles".to_string(),
            StructureNode::new().push(StageRule::Enabled(Hooks::handler(HandlerId::BinaryFetch))),
        )]);
        assert!(matches!(
            bad.validate(),
            Err(TransferError::Structure(_))
        ));
    }

    #[test]
    fn nested_count_covers_the_subtree() {
        let structure = Structure::journal();
        let (_, journals) = structure
            .roots
            .iter()
            .find(|(name, _)| name == "journals")
            .unwrap();
        // journals + roles + review_forms + review_form_elements + sections
        // + issues + articles + authors + files + reviews + responses
        assert_eq!(journals.nested_count(), 11);
    }
}
