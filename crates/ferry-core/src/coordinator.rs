//! Top-level orchestration of a transfer run.
//!
//! The coordinator owns the workspace, the identity namespace, the
//! structure tree, and the two connectors, and exposes the three stage
//! operations. Stages are strictly sequenced INDEX -> FETCH -> PUSH;
//! running one before its predecessor finished is a precondition error,
//! not something the engine tries to repair.

use std::path::PathBuf;

use chrono::Utc;

use crate::connector::{self, Connector, ServerDefinition};
use crate::error::{Result, TransferError};
use crate::identity::Identity;
use crate::progress::ProgressObserver;
use crate::stages::{FetchDriver, IndexDriver, PushDriver};
use crate::structure::Structure;
use crate::types::Stage;
use crate::walker::{StageContext, Walker};
use crate::workspace::{TransferMeta, Workspace};

/// Application name recorded in run metadata.
pub const APPLICATION: &str = "Journal Ferry";

#[derive(Debug)]
pub struct TransferCoordinator {
    workspace: Workspace,
    identity: Identity,
    structure: Structure,
    source: Option<Box<dyn Connector>>,
    target: Option<Box<dyn Connector>>,
}

impl TransferCoordinator {
    /// Open (or initialize) the workspace under `data_dir` and build
    /// connectors from the server definitions. Either server may be
    /// absent, which disables the stages that need it.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        source: Option<&ServerDefinition>,
        target: Option<&ServerDefinition>,
    ) -> Result<Self> {
        let source = source.map(connector::build).transpose()?;
        let target = target.map(connector::build).transpose()?;
        Self::with_connectors(data_dir, source, target, Structure::journal())
    }

    /// Assemble a coordinator from already-built connectors and an
    /// explicit structure tree. The tree is validated once, here.
    pub fn with_connectors(
        data_dir: impl Into<PathBuf>,
        source: Option<Box<dyn Connector>>,
        target: Option<Box<dyn Connector>>,
        structure: Structure,
    ) -> Result<Self> {
        structure.validate()?;
        let workspace = Workspace::new(data_dir);
        let meta = workspace.initialize(APPLICATION, env!("CARGO_PKG_VERSION"))?;
        let identity = Identity::new(meta.transaction_id);
        Ok(Self {
            workspace,
            identity,
            structure,
            source,
            target,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn meta(&self) -> Result<TransferMeta> {
        Ok(self.workspace.load_meta()?)
    }

    /// Stage INDEX: materialize list stubs for the whole tree.
    /// `filters` narrows the journals index by journal path/code.
    pub fn fetch_indexes(
        &self,
        filters: &[String],
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        self.run_stage(Stage::Index, filters, observer)
    }

    /// Stage FETCH: fill every indexed stub with its detail.
    pub fn fetch_data(
        &self,
        filters: &[String],
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        self.run_stage(Stage::Fetch, filters, observer)
    }

    /// Stage PUSH: replay the workspace onto the target.
    pub fn push_data(
        &self,
        filters: &[String],
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        self.run_stage(Stage::Push, filters, observer)
    }

    fn run_stage(
        &self,
        stage: Stage,
        filters: &[String],
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        self.check_gate(stage)?;
        self.workspace
            .update_meta(|meta| meta.set_started(stage, Utc::now()))?;

        let mut ctx = StageContext {
            workspace: &self.workspace,
            identity: &self.identity,
            source: self.source.as_deref(),
            target: self.target.as_deref(),
            observer,
            filters,
        };
        match stage {
            Stage::Index => Walker::new(&IndexDriver).run(&mut ctx, &self.structure),
            Stage::Fetch => Walker::new(&FetchDriver).run(&mut ctx, &self.structure),
            Stage::Push => Walker::new(&PushDriver).run(&mut ctx, &self.structure),
        }?;

        // A failed stage leaves `started` without `finished`, which is
        // exactly the state a re-run resumes from.
        self.workspace
            .update_meta(|meta| meta.set_finished(stage, Utc::now()))?;
        Ok(())
    }

    fn check_gate(&self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Index | Stage::Fetch if self.source.is_none() => {
                return Err(TransferError::NoServer { role: "source" });
            }
            Stage::Push if self.target.is_none() => {
                return Err(TransferError::NoServer { role: "target" });
            }
            _ => {}
        }
        if let Some(previous) = stage.prerequisite() {
            let meta = self.workspace.load_meta()?;
            if meta.finished(previous).is_none() {
                return Err(TransferError::StageGate {
                    requested: stage,
                    requirement: previous.finished_key().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorError, GetOptions, PostBody, Response};
    use crate::progress::NullObserver;
    use tempfile::TempDir;

    type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

    /// Connector whose every index is empty; enough to exercise gating
    /// and metadata bracketing.
    #[derive(Debug)]
    struct EmptyConnector;

    impl Connector for EmptyConnector {
        fn get(&self, path: &str, _options: &GetOptions) -> ConnectorResult<Response> {
            Ok(Response::new(200, path.to_string(), Vec::new(), b"[]".to_vec()))
        }

        fn post(&self, path: &str, _body: &PostBody) -> ConnectorResult<Response> {
            Ok(Response::new(200, path.to_string(), Vec::new(), b"{}".to_vec()))
        }
    }

    fn coordinator(dir: &TempDir, source: bool, target: bool) -> TransferCoordinator {
        TransferCoordinator::with_connectors(
            dir.path(),
            source.then(|| Box::new(EmptyConnector) as Box<dyn Connector>),
            target.then(|| Box::new(EmptyConnector) as Box<dyn Connector>),
            Structure::journal(),
        )
        .unwrap()
    }

    #[test]
    fn stages_bracket_metadata_timestamps() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, true, true);

        coordinator.fetch_indexes(&[], &mut NullObserver).unwrap();
        let meta = coordinator.meta().unwrap();
        assert!(meta.index_started.is_some());
        assert!(meta.index_finished.is_some());
        assert!(meta.index_started.unwrap() <= meta.index_finished.unwrap());

        coordinator.fetch_data(&[], &mut NullObserver).unwrap();
        let meta = coordinator.meta().unwrap();
        assert!(meta.fetch_finished.is_some());
    }

    #[test]
    fn fetch_is_gated_on_index_finished() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, true, true);
        let result = coordinator.fetch_data(&[], &mut NullObserver);
        assert!(matches!(
            result,
            Err(TransferError::StageGate {
                requested: Stage::Fetch,
                ..
            })
        ));
    }

    #[test]
    fn push_is_gated_on_fetch_finished() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, true, true);
        coordinator.fetch_indexes(&[], &mut NullObserver).unwrap();
        let result = coordinator.push_data(&[], &mut NullObserver);
        assert!(matches!(
            result,
            Err(TransferError::StageGate {
                requested: Stage::Push,
                ..
            })
        ));
    }

    #[test]
    fn missing_servers_disable_their_stages() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, false, false);
        assert!(matches!(
            coordinator.fetch_indexes(&[], &mut NullObserver),
            Err(TransferError::NoServer { role: "source" })
        ));
        assert!(matches!(
            coordinator.push_data(&[], &mut NullObserver),
            Err(TransferError::NoServer { role: "target" })
        ));
    }

    #[test]
    fn reopened_workspace_reuses_the_namespace() {
        let dir = TempDir::new().unwrap();
        let first = coordinator(&dir, true, true);
        let namespace = first.identity().namespace();
        drop(first);

        let second = coordinator(&dir, true, true);
        assert_eq!(second.identity().namespace(), namespace);
    }
}
