//! Error taxonomy for the transfer engine.
//!
//! Connector failures (transport, non-2xx, malformed JSON) and missing
//! record fields are recoverable per item: the walker packages them with an
//! [`ErrorContext`] and lets the progress observer decide whether to
//! continue with the next sibling or abort the stage. Workspace I/O and
//! precondition violations are fatal; the workspace is the run's single
//! source of truth and must not be silently partial.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::connector::ConnectorError;
use crate::types::Stage;
use crate::workspace::WorkspaceError;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("missing field `{field}` on record {record}")]
    MissingField { field: String, record: String },

    #[error("stage {requested} requires {requirement}")]
    StageGate {
        requested: Stage,
        requirement: String,
    },

    #[error("no {role} server configured")]
    NoServer { role: &'static str },

    #[error("invalid structure: {0}")]
    Structure(String),

    #[error("transfer aborted by observer")]
    Aborted,
}

impl TransferError {
    /// Whether the walker may offer the observer a continue/abort choice.
    ///
    /// Everything else unwinds the stage immediately.
    pub fn recoverable(&self) -> bool {
        matches!(self, Self::Connector(_) | Self::MissingField { .. })
    }

    pub(crate) fn missing_field(field: &str, record: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
            record: record.to_string(),
        }
    }
}

/// Context threaded from the point of failure to the progress observer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub stage: Option<Stage>,
    /// Resource type being processed when the error occurred.
    pub resource: Option<String>,
    pub url: Option<String>,
    /// Workspace file or directory the failed operation targeted.
    pub destination: Option<PathBuf>,
    /// `source_record_key` of the item being processed, when known.
    pub source_record_key: Option<String>,
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(stage) = self.stage {
            parts.push(format!("stage={stage}"));
        }
        if let Some(ref resource) = self.resource {
            parts.push(format!("resource={resource}"));
        }
        if let Some(ref key) = self.source_record_key {
            parts.push(format!("record={key}"));
        }
        if let Some(ref url) = self.url {
            parts.push(format!("url={url}"));
        }
        if let Some(ref destination) = self.destination {
            parts.push(format!("destination={}", destination.display()));
        }
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        let gate = TransferError::StageGate {
            requested: Stage::Push,
            requirement: "fetch_finished".to_string(),
        };
        assert!(!gate.recoverable());
        assert!(!TransferError::Aborted.recoverable());
        assert!(TransferError::missing_field("uuid", "articles:1").recoverable());
    }

    #[test]
    fn context_display_is_compact() {
        let context = ErrorContext {
            stage: Some(Stage::Fetch),
            resource: Some("articles".to_string()),
            source_record_key: Some("articles:3".to_string()),
            ..ErrorContext::default()
        };
        assert_eq!(
            context.to_string(),
            "stage=fetch resource=articles record=articles:3"
        );
    }
}
