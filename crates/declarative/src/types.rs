//! Core types for transaction results

use crate::diff::PropertyChange;
use crate::error::{ErrorCategory, ResourceError, SyncPhase};
use crate::resource::ResourceRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Outcome of visiting one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Already in sync, or out of sync under noop
    Unchanged,
    /// At least one property was changed
    Changed,
    /// Selection, validation, read, sync or refresh failed
    Failed,
    /// Not visited because a dependency failed or was skipped, or the run stopped
    Skipped,
}

impl Status {
    pub fn is_change(self) -> bool {
        self == Self::Changed
    }

    /// Whether dependents of a resource with this status must be skipped
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// Error detail recorded against a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SyncPhase>,
    pub message: String,
}

impl From<&ResourceError> for Failure {
    fn from(err: &ResourceError) -> Self {
        Self {
            category: err.category(),
            phase: match err {
                ResourceError::Sync { phase, .. } => Some(*phase),
                _ => None,
            },
            message: err.to_string(),
        }
    }
}

/// Final status of one resource, immutable once the resource is done
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub resource: ResourceRef,
    pub status: Status,
    /// Provider chosen for the resource, once selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<&'static str>,
    /// Properties found out of sync
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub out_of_sync: Vec<PropertyChange>,
    /// Changes were found but not applied because noop was in effect
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub noop: bool,
    /// Number of out-of-sync properties actually applied
    pub applied: usize,
    /// A refresh was performed
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ResourceStatus {
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource,
            status: Status::Unchanged,
            provider: None,
            out_of_sync: Vec::new(),
            noop: false,
            applied: 0,
            refreshed: false,
            error: None,
            skip_reason: None,
        }
    }

    pub fn skipped(resource: ResourceRef, reason: impl Into<String>) -> Self {
        Self {
            status: Status::Skipped,
            skip_reason: Some(reason.into()),
            ..Self::new(resource)
        }
    }

    /// Record a failure
    pub fn fail(&mut self, err: &ResourceError) {
        self.status = Status::Failed;
        self.error = Some(Failure::from(err));
    }

    /// Changes that were found but deliberately not applied
    pub fn pending(&self) -> usize {
        if self.noop { self.out_of_sync.len() } else { 0 }
    }
}

/// Aggregate outcome of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Out-of-sync properties left alone under noop
    pub pending: usize,
    pub refreshed: usize,
    /// A stop request cut the run short
    pub stopped: bool,
    /// Per-resource statuses in application order
    pub resources: Vec<ResourceStatus>,
}

impl RunSummary {
    /// Add a finished resource to the summary
    pub fn record(&mut self, status: ResourceStatus) {
        match status.status {
            Status::Unchanged => self.unchanged += 1,
            Status::Changed => self.changed += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
        }
        self.pending += status.pending();
        if status.refreshed {
            self.refreshed += 1;
        }
        self.resources.push(status);
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.unchanged + self.changed + self.failed + self.skipped
    }

    pub fn get(&self, resource: &ResourceRef) -> Option<&ResourceStatus> {
        self.resources.iter().find(|s| &s.resource == resource)
    }

    /// Check if the run fully converged (no failures, nothing skipped)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn exit_status(&self) -> ExitStatus {
        let changed = self.changed > 0 || self.refreshed > 0;
        match (changed, self.is_success()) {
            (false, true) => ExitStatus::Clean,
            (true, true) => ExitStatus::Changed,
            (false, false) => ExitStatus::Failed,
            (true, false) => ExitStatus::ChangedWithFailures,
        }
    }
}

/// Classification of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Nothing to do
    Clean,
    /// Converged with changes
    Changed,
    /// Did not fully converge
    Failed,
    /// Some changes applied, but did not fully converge
    ChangedWithFailures,
}

impl ExitStatus {
    /// Process exit code
    ///
    /// With `detailed` set the changes bit is 2 and the failure bit is 4;
    /// otherwise any failure maps to 1 and everything else to 0.
    pub fn code(self, detailed: bool) -> i32 {
        match (self, detailed) {
            (Self::Clean, _) => 0,
            (Self::Changed, true) => 2,
            (Self::Changed, false) => 0,
            (Self::Failed, true) => 4,
            (Self::ChangedWithFailures, true) => 6,
            (Self::Failed | Self::ChangedWithFailures, false) => 1,
        }
    }
}

/// Options for a transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Report what would change without calling mutating provider methods
    pub noop: bool,
}

/// An external command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as it would be typed
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of an external command, stdout and stderr combined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Get the combined output as a string
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Kind of a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A property was changed
    Change,
    /// A property would have changed
    Noop,
    /// A refresh was performed, or would have been
    Refresh,
    /// A change or refresh failed
    Failure,
}

/// One entry of the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub resource: ResourceRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
    pub message: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(resource: ResourceRef, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            resource,
            property: None,
            old: None,
            new: None,
            message: message.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Event describing a property change
    pub fn property(resource: ResourceRef, kind: EventKind, change: &PropertyChange) -> Self {
        let message = match kind {
            EventKind::Noop => format!("{} (noop)", change.message()),
            _ => change.message(),
        };
        Self {
            property: Some(change.property.clone()),
            old: change.current.as_ref().map(ToString::to_string),
            new: Some(change.desired.to_string()),
            ..Self::new(resource, kind, message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(title: &str, status: Status) -> ResourceStatus {
        ResourceStatus {
            status,
            ..ResourceStatus::new(ResourceRef::new("file", title))
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(status("a", Status::Changed));
        summary.record(status("b", Status::Unchanged));
        summary.record(status("c", Status::Failed));
        summary.record(ResourceStatus::skipped(ResourceRef::new("file", "d"), "dependency failed"));

        assert_eq!(summary.total(), 4);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_success());
        assert_eq!(summary.exit_status(), ExitStatus::ChangedWithFailures);
    }

    #[test]
    fn test_pending_counts_noop_changes_only() {
        let mut noop = status("a", Status::Unchanged);
        noop.noop = true;
        noop.out_of_sync.push(PropertyChange::new("ensure", None, "present".into()));
        let mut summary = RunSummary::default();
        summary.record(noop);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.exit_status(), ExitStatus::Clean);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Clean.code(true), 0);
        assert_eq!(ExitStatus::Changed.code(true), 2);
        assert_eq!(ExitStatus::Failed.code(true), 4);
        assert_eq!(ExitStatus::ChangedWithFailures.code(true), 6);

        assert_eq!(ExitStatus::Changed.code(false), 0);
        assert_eq!(ExitStatus::Failed.code(false), 1);
        assert_eq!(ExitStatus::ChangedWithFailures.code(false), 1);
    }

    #[test]
    fn test_invocation_command_line() {
        let inv = Invocation::new("useradd").args(["-m", "bob"]).env("LANG", "C");
        assert_eq!(inv.command_line(), "useradd -m bob");
        assert_eq!(inv.env, vec![("LANG".to_string(), "C".to_string())]);
    }

    #[test]
    fn test_property_event_carries_values() {
        let change = PropertyChange::new("mode", Some("0644".into()), "0600".into());
        let event = ChangeEvent::property(ResourceRef::new("file", "/etc/x"), EventKind::Change, &change);
        assert_eq!(event.property.as_deref(), Some("mode"));
        assert_eq!(event.old.as_deref(), Some("0644"));
        assert_eq!(event.new.as_deref(), Some("0600"));
        assert_eq!(event.message, "mode changed '0644' to '0600'");
    }
}
