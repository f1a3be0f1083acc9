//! Generic traversal over the structure tree.
//!
//! One walker serves all three stages. It owns the parts that must behave
//! identically everywhere: declared-order iteration, skip-whole-subtree on
//! a disabled stage rule, parent-chain extension, progress reporting, and
//! the per-item error protocol (package context, ask the observer,
//! continue or unwind). What differs per stage — where the worklist comes
//! from and what handling an item means — is behind [`StageDriver`].

use serde_json::Value;

use crate::connector::Connector;
use crate::error::{ErrorContext, Result, TransferError};
use crate::identity::Identity;
use crate::progress::{Disposition, ProgressObserver};
use crate::structure::{Hooks, Structure, StructureNode};
use crate::types::{record_label, source_record_key, Parents, PkKind, Stage};
use crate::workspace::{singular, Workspace};

/// Everything a stage needs while walking: the workspace, identity,
/// connectors, the observer, and the journal filter list.
pub(crate) struct StageContext<'a> {
    pub workspace: &'a Workspace,
    pub identity: &'a Identity,
    pub source: Option<&'a dyn Connector>,
    pub target: Option<&'a dyn Connector>,
    pub observer: &'a mut dyn ProgressObserver,
    pub filters: &'a [String],
}

impl StageContext<'_> {
    pub fn source(&self) -> Result<&dyn Connector> {
        self.source.ok_or(TransferError::NoServer { role: "source" })
    }

    pub fn target(&self) -> Result<&dyn Connector> {
        self.target.ok_or(TransferError::NoServer { role: "target" })
    }
}

/// Stage-specific behavior plugged into the walker.
pub(crate) trait StageDriver {
    fn stage(&self) -> Stage;

    /// Which record key feeds URL primary-key segments for this stage.
    fn pk_kind(&self) -> PkKind {
        match self.stage() {
            Stage::Index | Stage::Fetch => PkKind::Source,
            Stage::Push => PkKind::Target,
        }
    }

    /// Produce the node's worklist: fetched stubs at INDEX, the persisted
    /// index at FETCH/PUSH. An empty list aborts the subtree quietly.
    fn items(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        node: &StructureNode,
        hooks: &Hooks,
        parents: &Parents,
    ) -> Result<Vec<Value>>;

    /// Handle one item. Returns the record that extends the parent chain
    /// for recursion into children, or `None` to skip the subtree.
    fn item(
        &self,
        ctx: &mut StageContext<'_>,
        name: &str,
        node: &StructureNode,
        hooks: &Hooks,
        parents: &Parents,
        stub: &Value,
    ) -> Result<Option<Value>>;
}

pub(crate) struct Walker<'d> {
    driver: &'d dyn StageDriver,
    minor_count: usize,
    detail_count: usize,
}

impl<'d> Walker<'d> {
    pub fn new(driver: &'d dyn StageDriver) -> Self {
        Self {
            driver,
            minor_count: 0,
            detail_count: 0,
        }
    }

    pub fn run(&mut self, ctx: &mut StageContext<'_>, structure: &Structure) -> Result<()> {
        let parents = Parents::new();
        self.walk(ctx, &structure.roots, &parents)
    }

    fn walk(
        &mut self,
        ctx: &mut StageContext<'_>,
        nodes: &[(String, StructureNode)],
        parents: &Parents,
    ) -> Result<()> {
        for (name, node) in nodes {
            self.visit(ctx, name, node, parents)?;
        }
        Ok(())
    }

    fn visit(
        &mut self,
        ctx: &mut StageContext<'_>,
        name: &str,
        node: &StructureNode,
        parents: &Parents,
    ) -> Result<()> {
        let stage = self.driver.stage();
        // Disabled means the whole subtree is skipped for this stage.
        let Some(hooks) = node.rule(stage).hooks() else {
            return Ok(());
        };

        self.report_node(ctx, name, node, parents);

        let mut context = ErrorContext {
            stage: Some(stage),
            resource: Some(name.to_string()),
            ..ErrorContext::default()
        };
        if let Ok(path) = ctx.workspace.path_for(parents, name, None) {
            context.destination = Some(path);
        }
        if let Ok(url) = ctx
            .workspace
            .url_for(parents, name, None, self.driver.pk_kind())
        {
            context.url = Some(url);
        }

        let items = match self.driver.items(ctx, name, node, hooks, parents) {
            Ok(items) => items,
            // A failed worklist skips this subtree for this parent, if the
            // observer allows it.
            Err(error) => return self.recover(ctx, error, context),
        };

        for stub in &items {
            let mut item_context = context.clone();
            item_context.source_record_key = source_record_key(stub).map(str::to_string);

            match self.driver.item(ctx, name, node, hooks, parents, stub) {
                Ok(Some(record)) => {
                    self.report_item(ctx, stage, name, node, &record);
                    if !node.children.is_empty() {
                        let extended = parents.child(name, record);
                        self.walk(ctx, &node.children, &extended)?;
                    }
                }
                Ok(None) => {
                    self.report_item(ctx, stage, name, node, stub);
                }
                Err(error) => self.recover(ctx, error, item_context)?,
            }
        }
        Ok(())
    }

    /// Recoverable errors go to the observer; everything else unwinds.
    fn recover(
        &mut self,
        ctx: &mut StageContext<'_>,
        error: TransferError,
        context: ErrorContext,
    ) -> Result<()> {
        if !error.recoverable() {
            return Err(error);
        }
        match ctx.observer.report_error(&error, &context) {
            Disposition::Continue => Ok(()),
            Disposition::Abort => Err(TransferError::Aborted),
        }
    }

    fn report_node(
        &mut self,
        ctx: &mut StageContext<'_>,
        name: &str,
        node: &StructureNode,
        parents: &Parents,
    ) {
        let verb = self.driver.stage().verb();
        let mut message = format!("{verb} {name}");
        for (parent_name, record) in parents.iter() {
            message.push_str(&format!(
                " for {} {}",
                singular(parent_name),
                record_label(record, Some("title"))
            ));
        }

        match parents.len() {
            0 => {
                self.minor_count = 0;
                ctx.observer.major(&message, node.children.len() + 1);
            }
            1 => {
                self.minor_count += 1;
                self.detail_count = 0;
                ctx.observer
                    .minor(self.minor_count, &message, node.nested_count());
            }
            _ => {
                self.detail_count += 1;
                ctx.observer.detail(self.detail_count, Some(&message));
            }
        }
    }

    fn report_item(
        &mut self,
        ctx: &mut StageContext<'_>,
        stage: Stage,
        name: &str,
        node: &StructureNode,
        record: &Value,
    ) {
        self.detail_count += 1;
        let label = record_label(record, node.name_key.as_deref());
        let message = format!("{} {} {label}", stage.verb(), singular(name));
        ctx.observer.detail(self.detail_count, Some(&message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::UpdateLevel;
    use crate::structure::StageRule;
    use serde_json::json;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Driver that records visits and yields two canned stubs per node.
    struct ScriptedDriver {
        visited: RefCell<Vec<String>>,
        fail_on: Option<String>,
    }

    impl ScriptedDriver {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                visited: RefCell::new(Vec::new()),
                fail_on: fail_on.map(str::to_string),
            }
        }
    }

    impl StageDriver for ScriptedDriver {
        fn stage(&self) -> Stage {
            Stage::Fetch
        }

        fn items(
            &self,
            _ctx: &mut StageContext<'_>,
            name: &str,
            _node: &StructureNode,
            _hooks: &Hooks,
            _parents: &Parents,
        ) -> Result<Vec<Value>> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(TransferError::missing_field("uuid", name));
            }
            Ok(vec![
                json!({ "source_record_key": format!("{name}:1"), "uuid": "u1" }),
                json!({ "source_record_key": format!("{name}:2"), "uuid": "u2" }),
            ])
        }

        fn item(
            &self,
            _ctx: &mut StageContext<'_>,
            name: &str,
            _node: &StructureNode,
            _hooks: &Hooks,
            _parents: &Parents,
            stub: &Value,
        ) -> Result<Option<Value>> {
            self.visited
                .borrow_mut()
                .push(source_record_key(stub).unwrap_or(name).to_string());
            Ok(Some(stub.clone()))
        }
    }

    struct CountingObserver {
        majors: usize,
        minors: usize,
        errors: usize,
        disposition: Disposition,
    }

    impl CountingObserver {
        fn new(disposition: Disposition) -> Self {
            Self {
                majors: 0,
                minors: 0,
                errors: 0,
                disposition,
            }
        }
    }

    impl ProgressObserver for CountingObserver {
        fn major(&mut self, _message: &str, _length: usize) {
            self.majors += 1;
        }

        fn minor(&mut self, _current: usize, _message: &str, _length: usize) {
            self.minors += 1;
        }

        fn detail(&mut self, _current: usize, _message: Option<&str>) {}

        fn debug(&mut self, _message: &str, _level: UpdateLevel) {}

        fn report_error(
            &mut self,
            _error: &TransferError,
            _context: &ErrorContext,
        ) -> Disposition {
            self.errors += 1;
            self.disposition
        }
    }

    fn run_walker(
        structure: &Structure,
        driver: &ScriptedDriver,
        observer: &mut CountingObserver,
    ) -> Result<()> {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path());
        let identity = Identity::generate();
        let filters: Vec<String> = Vec::new();
        let mut ctx = StageContext {
            workspace: &workspace,
            identity: &identity,
            source: None,
            target: None,
            observer,
            filters: &filters,
        };
        Walker::new(driver).run(&mut ctx, structure)
    }

    fn two_level_structure() -> Structure {
        Structure::new(vec![
            (
                "journals".to_string(),
                StructureNode::new().child("sections", StructureNode::new()),
            ),
            ("orphans".to_string(), StructureNode::new()),
        ])
    }

    #[test]
    fn visits_in_declared_order_with_interleaved_recursion() {
        let driver = ScriptedDriver::new(None);
        let mut observer = CountingObserver::new(Disposition::Abort);
        run_walker(&two_level_structure(), &driver, &mut observer).unwrap();

        // Each journal's sections are walked before the next journal.
        assert_eq!(
            *driver.visited.borrow(),
            vec![
                "journals:1",
                "sections:1",
                "sections:2",
                "journals:2",
                "sections:1",
                "sections:2",
                "orphans:1",
                "orphans:2",
            ]
        );
        assert_eq!(observer.majors, 2);
        // One minor per (journal instance, child node) visit.
        assert_eq!(observer.minors, 2);
    }

    #[test]
    fn disabled_rule_skips_the_whole_subtree() {
        let structure = Structure::new(vec![(
            "journals".to_string(),
            StructureNode::new()
                .fetch(StageRule::Disabled)
                .child("sections", StructureNode::new()),
        )]);
        let driver = ScriptedDriver::new(None);
        let mut observer = CountingObserver::new(Disposition::Abort);
        run_walker(&structure, &driver, &mut observer).unwrap();
        assert!(driver.visited.borrow().is_empty());
    }

    #[test]
    fn observer_continue_skips_only_the_failed_subtree() {
        let driver = ScriptedDriver::new(Some("journals"));
        let mut observer = CountingObserver::new(Disposition::Continue);
        run_walker(&two_level_structure(), &driver, &mut observer).unwrap();

        assert_eq!(observer.errors, 1);
        assert_eq!(*driver.visited.borrow(), vec!["orphans:1", "orphans:2"]);
    }

    #[test]
    fn observer_abort_unwinds_the_stage() {
        let driver = ScriptedDriver::new(Some("journals"));
        let mut observer = CountingObserver::new(Disposition::Abort);
        let result = run_walker(&two_level_structure(), &driver, &mut observer);
        assert!(matches!(result, Err(TransferError::Aborted)));
        assert!(driver.visited.borrow().is_empty());
    }
}
