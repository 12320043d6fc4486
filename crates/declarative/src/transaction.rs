//! Transaction engine - applies a resource graph in dependency order
//!
//! Resources are visited one at a time in the graph's topological order.
//! A resource whose dependency failed or was skipped is skipped itself and
//! its provider is never called. Failures are contained to the resource
//! they happen in; unrelated branches of the graph still converge.

use crate::content::FileSource;
use crate::context::{ApplyContext, EventSink};
use crate::diff::{PropertyChange, compute_changes};
use crate::error::{IdentityError, ResourceError, SyncPhase};
use crate::facts::HostFacts;
use crate::graph::{EdgeKind, ResourceGraph};
use crate::privilege::{IdentityTarget, PrivilegeContext};
use crate::provider::{Feature, Provider, ProviderEntry, SyncMode};
use crate::registry::{Registry, RunAsMode};
use crate::resource::Resource;
use crate::types::{ChangeEvent, EventKind, ResourceStatus, RunSummary, Status, TransactionOptions};
use crate::value::PropertyMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One run of a resource graph
pub struct Transaction<'a> {
    graph: &'a ResourceGraph,
    registry: &'a Registry,
    facts: &'a HostFacts,
    privilege: &'a PrivilegeContext,
    files: &'a dyn FileSource,
    options: TransactionOptions,
    stop: Option<&'a AtomicBool>,
}

/// Mutable state of a run, indexed like the graph
struct RunState {
    statuses: Vec<Option<Status>>,
    /// Number of refresh events received per resource
    refresh_events: Vec<usize>,
    /// Refresh events from changes left pending under noop
    noop_events: Vec<usize>,
    /// Set when the process identity could not be restored
    halted: Option<String>,
}

/// How a resource's mutating calls are run
enum Wrap<'t> {
    Direct,
    AsUser(&'t IdentityTarget),
}

impl<'a> Transaction<'a> {
    pub fn new(
        graph: &'a ResourceGraph,
        registry: &'a Registry,
        facts: &'a HostFacts,
        privilege: &'a PrivilegeContext,
        files: &'a dyn FileSource,
    ) -> Self {
        Self {
            graph,
            registry,
            facts,
            privilege,
            files,
            options: TransactionOptions::default(),
            stop: None,
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Flag checked between resources; once set the rest are skipped
    pub fn with_stop(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_some_and(|s| s.load(Ordering::SeqCst))
    }

    /// Apply every resource and summarise the outcome
    ///
    /// Never fails: resource errors are recorded in the summary.
    pub fn run<S: EventSink>(&self, sink: &mut S) -> RunSummary {
        let n = self.graph.len();
        let mut state = RunState {
            statuses: vec![None; n],
            refresh_events: vec![0; n],
            noop_events: vec![0; n],
            halted: None,
        };
        let mut summary = RunSummary::default();

        for &index in self.graph.order() {
            let resource = self.graph.resource(index);
            sink.on_resource_start(resource.reference());

            let status = if let Some(reason) = self.skip_reason(index, &state) {
                log::warn!("{}: skipped: {reason}", resource.reference());
                ResourceStatus::skipped(resource.reference().clone(), reason)
            } else {
                self.apply_resource(index, &mut state, sink)
            };

            let pending = status.pending() > 0;
            if status.status.is_change() || pending {
                for edge in self.graph.successors(index) {
                    if edge.kind != EdgeKind::Notify {
                        continue;
                    }
                    if pending {
                        state.noop_events[edge.to] += 1;
                    } else {
                        state.refresh_events[edge.to] += 1;
                    }
                }
            }

            state.statuses[index] = Some(status.status);
            sink.on_resource_complete(&status);
            summary.record(status);
        }

        summary.stopped = self.stop_requested();
        log::debug!(
            "run finished: {} changed, {} failed, {} skipped, {} unchanged",
            summary.changed,
            summary.failed,
            summary.skipped,
            summary.unchanged
        );
        summary
    }

    fn skip_reason(&self, index: usize, state: &RunState) -> Option<String> {
        if self.stop_requested() {
            return Some("run stopped".to_string());
        }
        if let Some(reason) = &state.halted {
            return Some(reason.clone());
        }
        self.graph.predecessors(index).find_map(|edge| {
            let status = state.statuses[edge.from]?;
            status.blocks_dependents().then(|| {
                let word = if status == Status::Failed {
                    "failed"
                } else {
                    "was skipped"
                };
                format!(
                    "dependency {} {word}",
                    self.graph.resource(edge.from).reference()
                )
            })
        })
    }

    fn apply_resource<S: EventSink>(
        &self,
        index: usize,
        state: &mut RunState,
        sink: &mut S,
    ) -> ResourceStatus {
        let resource = self.graph.resource(index);
        let reference = resource.reference();
        let mut status = ResourceStatus::new(reference.clone());
        let noop = resource.meta().noop.unwrap_or(self.options.noop);

        let (ty, entry) = match self.registry.resolve(resource, self.facts) {
            Ok(found) => found,
            Err(e) => {
                self.fail(&mut status, &e, sink);
                return status;
            }
        };
        status.provider = Some(entry.name);
        log::debug!("{reference}: using provider {}", entry.name);

        let run_as = ty.run_as.and_then(|r| r.target(resource).map(|t| (r.mode, t)));
        if let Some((_, target)) = &run_as
            && self.privilege.is_privileged()
            && let Err(e) = self.privilege.resolve(target)
        {
            self.fail(&mut status, &ResourceError::Identity(e), sink);
            return status;
        }
        let (wrap, spawn_as) = match &run_as {
            Some((RunAsMode::Scoped, target)) => (Wrap::AsUser(target), None),
            Some((RunAsMode::Spawn, target)) => (Wrap::Direct, Some(target)),
            None => (Wrap::Direct, None),
        };

        let ctx = ApplyContext::new(self.privilege, self.files, self.facts)
            .with_noop(noop)
            .with_identity(spawn_as);
        let provider = entry.provider();

        let current: PropertyMap = match provider.read(resource, &ctx) {
            Ok(current) => current,
            Err(e) => {
                self.fail(&mut status, &ResourceError::sync(SyncPhase::Read, &e), sink);
                return status;
            }
        };

        let changes = compute_changes(ty, resource, &current, provider);
        if !changes.is_empty() {
            status.out_of_sync.clone_from(&changes);
            if noop {
                status.noop = true;
                for change in &changes {
                    log::info!("{reference}: {} (noop)", change.message());
                    sink.on_event(&ChangeEvent::property(
                        reference.clone(),
                        EventKind::Noop,
                        change,
                    ));
                }
            } else {
                self.sync(entry, resource, &changes, &wrap, &ctx, &mut status, state, sink);
            }
        }

        let events = state.refresh_events[index];
        let noop_events = state.noop_events[index];
        if status.status != Status::Failed {
            if events > 0 && !noop {
                self.refresh(entry, resource, events, &wrap, &ctx, &mut status, state, sink);
            } else if events + noop_events > 0 {
                sink.on_event(&ChangeEvent::new(
                    reference.clone(),
                    EventKind::Noop,
                    format!(
                        "would have triggered 'refresh' from {} events",
                        events + noop_events
                    ),
                ));
            }
        }

        status
    }

    #[allow(clippy::too_many_arguments)]
    fn sync<S: EventSink>(
        &self,
        entry: &ProviderEntry,
        resource: &Resource,
        changes: &[PropertyChange],
        wrap: &Wrap<'_>,
        ctx: &ApplyContext<'_>,
        status: &mut ResourceStatus,
        state: &mut RunState,
        sink: &mut S,
    ) {
        let provider = entry.provider();
        let reference = resource.reference();

        let result = match entry.sync_mode {
            SyncMode::PerProperty => {
                let mut result = Ok(());
                for change in changes {
                    result = self.call(wrap, SyncPhase::Sync, state, || {
                        provider.set(resource, change, ctx)
                    });
                    if result.is_err() {
                        break;
                    }
                    status.applied += 1;
                    sink.on_event(&ChangeEvent::property(
                        reference.clone(),
                        EventKind::Change,
                        change,
                    ));
                }
                result
            }
            SyncMode::Whole => {
                let result = self.call(wrap, SyncPhase::Sync, state, || {
                    provider.sync(resource, changes, ctx)
                });
                if result.is_ok() {
                    status.applied = changes.len();
                    for change in changes {
                        sink.on_event(&ChangeEvent::property(
                            reference.clone(),
                            EventKind::Change,
                            change,
                        ));
                    }
                }
                result
            }
        };

        match result {
            Ok(()) => status.status = Status::Changed,
            Err(e) => self.fail(status, &e, sink),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn refresh<S: EventSink>(
        &self,
        entry: &ProviderEntry,
        resource: &Resource,
        events: usize,
        wrap: &Wrap<'_>,
        ctx: &ApplyContext<'_>,
        status: &mut ResourceStatus,
        state: &mut RunState,
        sink: &mut S,
    ) {
        let reference = resource.reference();
        if !entry.has_feature(Feature::Refreshable) {
            log::debug!("{reference}: received {events} refresh events, provider ignores them");
            return;
        }

        let provider: &dyn Provider = entry.provider();
        match self.call(wrap, SyncPhase::Refresh, state, || provider.refresh(resource, ctx)) {
            Ok(()) => {
                status.refreshed = true;
                sink.on_event(&ChangeEvent::new(
                    reference.clone(),
                    EventKind::Refresh,
                    format!("triggered 'refresh' from {events} events"),
                ));
            }
            Err(e) => self.fail(status, &e, sink),
        }
    }

    /// Run a mutating provider call, as the target identity when scoped
    fn call(
        &self,
        wrap: &Wrap<'_>,
        phase: SyncPhase,
        state: &mut RunState,
        action: impl FnOnce() -> anyhow::Result<()>,
    ) -> Result<(), ResourceError> {
        match wrap {
            Wrap::Direct => action().map_err(|e| ResourceError::sync(phase, &e)),
            Wrap::AsUser(target) => match self.privilege.as_user(target, action) {
                Ok(result) => result.map_err(|e| ResourceError::sync(phase, &e)),
                Err(e) => {
                    if matches!(e, IdentityError::Restore { .. }) {
                        state.halted = Some(format!("process identity is unsafe: {e}"));
                    }
                    Err(ResourceError::Identity(e))
                }
            },
        }
    }

    /// Record a failure and emit its event
    fn fail<S: EventSink>(&self, status: &mut ResourceStatus, err: &ResourceError, sink: &mut S) {
        log::warn!("{}: {err}", status.resource);
        status.fail(err);
        sink.on_event(&ChangeEvent::new(
            status.resource.clone(),
            EventKind::Failure,
            err.to_string(),
        ));
    }
}

/// Read the current state of a single resource without changing anything
///
/// Returns the selected provider's name with what it read.
pub fn inspect(
    resource: &Resource,
    registry: &Registry,
    facts: &HostFacts,
    privilege: &PrivilegeContext,
    files: &dyn FileSource,
) -> Result<(&'static str, PropertyMap), ResourceError> {
    let (_, entry) = registry.resolve(resource, facts)?;
    let ctx = ApplyContext::new(privilege, files, facts).with_noop(true);
    let current = entry
        .provider()
        .read(resource, &ctx)
        .map_err(|e| ResourceError::sync(SyncPhase::Read, &e))?;
    Ok((entry.name, current))
}
