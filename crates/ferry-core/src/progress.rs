//! Progress observer contract.
//!
//! The walker reports three levels of progress — one `major` per top-level
//! resource type, one `minor` per instance within a type, `detail` for
//! deeper work — plus free-form debug lines and error reports. Rendering is
//! the embedder's business; the engine only depends on this trait.

use crate::error::{ErrorContext, TransferError};

/// Granularity of a debug message, mirroring the three progress levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdateLevel {
    Major,
    Minor,
    Detail,
    Debug,
}

/// Observer's verdict on a recoverable per-item error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Skip the item (and its subtree) and proceed with the next sibling.
    Continue,
    /// Unwind the stage.
    Abort,
}

pub trait ProgressObserver {
    /// A new top-level operation begins; `length` is its unit count.
    fn major(&mut self, message: &str, length: usize);

    /// Progress within the current major operation.
    fn minor(&mut self, current: usize, message: &str, length: usize);

    /// Fine-grained progress below the minor level.
    fn detail(&mut self, current: usize, message: Option<&str>);

    fn debug(&mut self, message: &str, level: UpdateLevel);

    /// Decide whether a recoverable error stops the stage. Implementations
    /// for unattended runs should abort: continuing silently hides holes
    /// in the transferred data.
    fn report_error(&mut self, error: &TransferError, context: &ErrorContext) -> Disposition;
}

/// Silent observer for non-interactive runs. Aborts on the first error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn major(&mut self, _message: &str, _length: usize) {}

    fn minor(&mut self, _current: usize, _message: &str, _length: usize) {}

    fn detail(&mut self, _current: usize, _message: Option<&str>) {}

    fn debug(&mut self, _message: &str, _level: UpdateLevel) {}

    fn report_error(&mut self, _error: &TransferError, _context: &ErrorContext) -> Disposition {
        Disposition::Abort
    }
}

/// Routes progress into `tracing`; useful for headless runs where the log
/// is the only surface. Aborts on the first error, like [`NullObserver`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn major(&mut self, message: &str, length: usize) {
        tracing::info!(length, "{message}");
    }

    fn minor(&mut self, current: usize, message: &str, length: usize) {
        tracing::info!(current, length, "{message}");
    }

    fn detail(&mut self, current: usize, message: Option<&str>) {
        if let Some(message) = message {
            tracing::debug!(current, "{message}");
        }
    }

    fn debug(&mut self, message: &str, level: UpdateLevel) {
        match level {
            UpdateLevel::Major | UpdateLevel::Minor => tracing::info!("{message}"),
            UpdateLevel::Detail => tracing::debug!("{message}"),
            UpdateLevel::Debug => tracing::trace!("{message}"),
        }
    }

    fn report_error(&mut self, error: &TransferError, context: &ErrorContext) -> Disposition {
        tracing::error!(%context, "{error}");
        Disposition::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_observer_aborts_on_error() {
        let mut observer = NullObserver;
        let error = TransferError::Aborted;
        let context = ErrorContext::default();
        assert_eq!(
            observer.report_error(&error, &context),
            Disposition::Abort
        );
    }
}
