//! Transfer engine for moving journal content between publishing servers.
//!
//! A three-stage, resumable, tree-driven pipeline: INDEX materializes list
//! stubs for a declarative resource tree, FETCH fills them with details
//! and attachments on a local workspace, PUSH replays the workspace onto
//! the target while rewriting cross-record references. Identity is
//! deterministic (UUID v5 over a persisted per-run namespace), so a
//! crashed run resumes from whatever its workspace already holds.

pub mod connector;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod progress;
pub mod resolver;
pub mod structure;
pub mod types;
pub mod workspace;

mod stages;
mod walker;

pub use connector::{
    Connector, ConnectorError, FilePart, GetOptions, HttpConnector, PostBody, Response,
    ServerDefinition, ServerKind,
};
pub use coordinator::{TransferCoordinator, APPLICATION};
pub use error::{ErrorContext, TransferError};
pub use identity::Identity;
pub use progress::{Disposition, LogObserver, NullObserver, ProgressObserver, UpdateLevel};
pub use structure::{ForeignKey, HandlerId, Hooks, StageRule, Structure, StructureNode};
pub use types::{Parents, PkKind, Stage};
pub use workspace::{detail_filename, singular, TransferMeta, Workspace, WorkspaceError};
