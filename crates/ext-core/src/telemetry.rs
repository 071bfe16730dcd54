//! Structured outcome events, emitted as `tracing` events with target
//! `telemetry` so a subscriber can route them separately from logs.

use std::time::Instant;

use tracing::info;

use crate::error::Error;
use crate::identifier::ExtensionIdentifier;
use crate::model::InstallOperation;

pub(crate) fn install_outcome(
    operation: InstallOperation,
    identifier: &ExtensionIdentifier,
    started: Instant,
    error: Option<&Error>,
) {
    let event = match operation {
        InstallOperation::Update => "update",
        _ => "install",
    };
    record(event, identifier, started, error);
}

pub(crate) fn uninstall_outcome(identifier: &ExtensionIdentifier, started: Instant, error: Option<&Error>) {
    record("uninstall", identifier, started, error);
}

/// A catalog precheck rejected the extension before any task ran.
pub(crate) fn precheck_failed(identifier: &ExtensionIdentifier, error: &Error) {
    record("install", identifier, Instant::now(), Some(error));
}

fn record(event: &str, identifier: &ExtensionIdentifier, started: Instant, error: Option<&Error>) {
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        target: "telemetry",
        event,
        extension = %identifier,
        success = error.is_none(),
        duration_ms,
        error_code = error.map(|e| e.code().as_str()).unwrap_or(""),
    );
}
