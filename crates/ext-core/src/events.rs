//! Lifecycle notifications.

use crate::error::ErrorCode;
use crate::identifier::ExtensionIdentifier;
use crate::model::{InstallResult, InstallSource};

/// Capacity of the event channel. Slow subscribers see
/// `RecvError::Lagged` rather than blocking the manager.
pub(crate) const EVENT_CAPACITY: usize = 256;

/// Events broadcast by the manager, see
/// [`subscribe`](crate::ExtensionManagementService::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionEvent {
    /// An install was requested and passed its precheck.
    InstallRequested {
        identifier: ExtensionIdentifier,
        source: InstallSource,
    },
    /// A batch settled. On failure every entry has no local extension and
    /// carries the batch error code.
    BatchInstallCompleted(Vec<InstallResult>),
    /// Removal of an extension is about to start.
    UninstallRequested(ExtensionIdentifier),
    /// Removal finished, with the error code on failure.
    UninstallCompleted {
        identifier: ExtensionIdentifier,
        error: Option<ErrorCode>,
    },
}
