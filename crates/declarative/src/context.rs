//! Apply context and event sinks
//!
//! Providers receive an [`ApplyContext`] instead of reaching for process
//! state directly: commands go through the privilege context, file metadata
//! through the file source. Run progress is reported through an
//! [`EventSink`], so the engine does not depend on any particular UI.

use crate::content::FileSource;
use crate::facts::HostFacts;
use crate::privilege::{IdentityTarget, PrivilegeContext};
use crate::resource::ResourceRef;
use crate::types::{ChangeEvent, CommandOutput, EventKind, Invocation, ResourceStatus};
use anyhow::Result;

/// Context passed to provider operations
#[derive(Clone, Copy)]
pub struct ApplyContext<'a> {
    /// Whether this is a dry run; providers are only called to read
    pub noop: bool,
    pub privilege: &'a PrivilegeContext,
    pub files: &'a dyn FileSource,
    pub facts: &'a HostFacts,
    /// Identity commands are spawned as, for types that run as a user
    pub identity: Option<&'a IdentityTarget>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(
        privilege: &'a PrivilegeContext,
        files: &'a dyn FileSource,
        facts: &'a HostFacts,
    ) -> Self {
        Self {
            noop: false,
            privilege,
            files,
            facts,
            identity: None,
        }
    }

    pub fn with_noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    pub fn with_identity(mut self, identity: Option<&'a IdentityTarget>) -> Self {
        self.identity = identity;
        self
    }

    /// Run a command, capturing combined output; a non-zero exit is not an error
    pub fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        Ok(self.privilege.run_and_capture(invocation, self.identity)?)
    }

    /// Run a command and fail unless it exits successfully
    pub fn run_checked(&self, invocation: &Invocation) -> Result<String> {
        let output = self.run(invocation)?;
        if !output.success {
            let code = output
                .code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            anyhow::bail!(
                "'{}' failed ({code}): {}",
                invocation.command_line(),
                output.output_str().trim()
            );
        }
        Ok(output.output_str())
    }
}

/// Receiver of run progress and change events
pub trait EventSink {
    /// Called before a resource is visited
    fn on_resource_start(&mut self, resource: &ResourceRef) {
        let _ = resource;
    }

    /// Called for every change, pending change, refresh and failure
    fn on_event(&mut self, event: &ChangeEvent);

    /// Called once a resource's status is final
    fn on_resource_complete(&mut self, status: &ResourceStatus) {
        let _ = status;
    }
}

/// Discards all events
pub struct NoEvents;

impl EventSink for NoEvents {
    fn on_event(&mut self, _event: &ChangeEvent) {}
}

/// Writes events to the log
pub struct LogEvents;

impl EventSink for LogEvents {
    fn on_event(&mut self, event: &ChangeEvent) {
        match event.kind {
            EventKind::Failure => log::warn!("{}: {}", event.resource, event.message),
            _ => log::info!("{}: {}", event.resource, event.message),
        }
    }
}

/// Keeps every event, for reports
#[derive(Debug, Default)]
pub struct CollectEvents {
    pub events: Vec<ChangeEvent>,
}

impl CollectEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one resource
    pub fn for_resource<'s>(
        &'s self,
        resource: &ResourceRef,
    ) -> impl Iterator<Item = &'s ChangeEvent> + use<'s> {
        let resource = resource.clone();
        self.events.iter().filter(move |e| e.resource == resource)
    }
}

impl EventSink for CollectEvents {
    fn on_event(&mut self, event: &ChangeEvent) {
        self.events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::LocalFileSource;
    use crate::facts::OsFamily;
    use crate::testing::MockBackend;

    #[test]
    fn test_collect_events_filters_by_resource() {
        let a = ResourceRef::new("file", "/a");
        let b = ResourceRef::new("file", "/b");
        let mut sink = CollectEvents::new();
        sink.on_event(&ChangeEvent::new(a.clone(), EventKind::Change, "created"));
        sink.on_event(&ChangeEvent::new(b, EventKind::Change, "created"));
        sink.on_event(&ChangeEvent::new(a.clone(), EventKind::Refresh, "refreshed"));

        assert_eq!(sink.for_resource(&a).count(), 2);

        // The filter does not borrow the reference it was given
        let refreshes = sink.for_resource(&ResourceRef::new("file", "/a"));
        assert_eq!(refreshes.filter(|e| e.kind == EventKind::Refresh).count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_checked_reports_output() {
        let privilege = PrivilegeContext::with_backend(Box::new(MockBackend::unprivileged(1000)));
        let facts = HostFacts::new("linux", "x86_64", OsFamily::Debian);
        let ctx = ApplyContext::new(&privilege, &LocalFileSource, &facts);

        let ok = ctx
            .run_checked(&Invocation::new("/bin/sh").args(["-c", "echo hi"]))
            .unwrap();
        assert_eq!(ok.trim(), "hi");

        let err = ctx
            .run_checked(&Invocation::new("/bin/sh").args(["-c", "echo nope >&2; exit 4"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "'/bin/sh -c echo nope >&2; exit 4' failed (4): nope");
    }
}
