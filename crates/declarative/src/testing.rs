//! Test doubles: a recording identity backend and a recording provider

use crate::context::ApplyContext;
use crate::diff::{ABSENT, ENSURE, PropertyChange};
use crate::privilege::{Account, IdSpec, Identity, IdentityBackend};
use crate::provider::{Feature, Provider, ProviderEntry, SyncMode};
use crate::registry::{PropertySpec, ResourceType, RunAs, RunAsMode};
use crate::resource::{Resource, ResourceRef};
use crate::types::{CommandOutput, Invocation};
use crate::value::{PropertyMap, Value};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

const USERS: &[(&str, u32, u32)] = &[("root", 0, 0), ("bob", 1001, 1001), ("alice", 1002, 1002)];
const GROUPS: &[(&str, u32)] = &[("root", 0), ("staff", 50), ("bob", 1001), ("alice", 1002)];

#[derive(Debug)]
struct MockState {
    real_uid: u32,
    euid: u32,
    egid: u32,
    groups: Vec<u32>,
    calls: Vec<String>,
    fail_on: Option<String>,
}

/// Identity backend over an in-memory account database
///
/// Records every identity-changing call and spawn. Clones share state, so
/// a test keeps one clone to inspect after handing the other to a context.
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    fn with_uid(uid: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                real_uid: uid,
                euid: uid,
                egid: uid,
                groups: vec![uid],
                calls: Vec::new(),
                fail_on: None,
            })),
        }
    }

    pub fn root() -> Self {
        Self::with_uid(0)
    }

    pub fn unprivileged(uid: u32) -> Self {
        Self::with_uid(uid)
    }

    /// Make the call with exactly this description fail
    pub fn fail_on(self, call: &str) -> Self {
        self.lock().fail_on = Some(call.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Current effective uid and gid
    pub fn current(&self) -> (u32, u32) {
        let state = self.lock();
        (state.euid, state.egid)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, call: String, apply: impl FnOnce(&mut MockState)) -> io::Result<()> {
        let mut state = self.lock();
        let fails = state.fail_on.as_deref() == Some(call.as_str());
        state.calls.push(call);
        if fails {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        apply(&mut state);
        Ok(())
    }
}

impl IdentityBackend for MockBackend {
    fn supports_switching(&self) -> bool {
        true
    }

    fn real_uid(&self) -> u32 {
        self.lock().real_uid
    }

    fn effective_uid(&self) -> u32 {
        self.lock().euid
    }

    fn effective_gid(&self) -> u32 {
        self.lock().egid
    }

    fn supplementary_groups(&self) -> io::Result<Vec<u32>> {
        Ok(self.lock().groups.clone())
    }

    fn set_effective_uid(&self, uid: u32) -> io::Result<()> {
        self.record(format!("seteuid {uid}"), |s| s.euid = uid)
    }

    fn set_effective_gid(&self, gid: u32) -> io::Result<()> {
        self.record(format!("setegid {gid}"), |s| s.egid = gid)
    }

    fn set_supplementary_groups(&self, groups: &[u32]) -> io::Result<()> {
        let list: Vec<String> = groups.iter().map(ToString::to_string).collect();
        self.record(format!("setgroups {}", list.join(",")), |s| {
            s.groups = groups.to_vec();
        })
    }

    fn init_groups(&self, user: &str, gid: u32) -> io::Result<()> {
        self.record(format!("initgroups {user} {gid}"), |s| s.groups = vec![gid])
    }

    fn lookup_user(&self, spec: &IdSpec) -> io::Result<Option<Account>> {
        Ok(USERS
            .iter()
            .find(|(name, uid, _)| match spec {
                IdSpec::Name(n) => n == name,
                IdSpec::Id(id) => id == uid,
            })
            .map(|&(name, uid, gid)| Account {
                name: name.to_string(),
                id: uid,
                primary_gid: Some(gid),
            }))
    }

    fn lookup_group(&self, spec: &IdSpec) -> io::Result<Option<Account>> {
        Ok(GROUPS
            .iter()
            .find(|(name, gid)| match spec {
                IdSpec::Name(n) => n == name,
                IdSpec::Id(id) => id == gid,
            })
            .map(|&(name, gid)| Account {
                name: name.to_string(),
                id: gid,
                primary_gid: None,
            }))
    }

    /// Runs the command for real as the current user; a missing program
    /// exits 127 like a shell would report it
    fn spawn(
        &self,
        invocation: &Invocation,
        identity: Option<&Identity>,
    ) -> io::Result<CommandOutput> {
        let call = match identity {
            Some(id) => format!("spawn {} as {}:{}", invocation.program, id.uid, id.gid),
            None => format!("spawn {}", invocation.program),
        };
        self.record(call, |_| {})?;
        match crate::privilege::capture_combined(crate::privilege::command_for(invocation)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(CommandOutput {
                output: Vec::new(),
                code: Some(127),
                success: false,
            }),
            other => other,
        }
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    calls: Vec<String>,
    state: HashMap<ResourceRef, PropertyMap>,
    failing: HashSet<(&'static str, ResourceRef)>,
    /// Effective uid observed by each mutating call
    observed_uid: Vec<(String, u32)>,
}

/// Shared call log and in-memory system state for [`RecordingProvider`]
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<RecorderState>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every provider call, e.g. `read Stub[a]` or `set Stub[a] ensure`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls that would modify the system
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("read "))
            .collect()
    }

    /// Number of calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Make `operation` (`read`, `set`, `sync` or `refresh`) fail for `resource`
    pub fn fail(&self, operation: &'static str, resource: ResourceRef) {
        self.lock().failing.insert((operation, resource));
    }

    /// Pretend `resource` already exists with these properties
    pub fn seed(&self, resource: ResourceRef, properties: PropertyMap) {
        self.lock().state.insert(resource, properties);
    }

    pub fn state_of(&self, resource: &ResourceRef) -> Option<PropertyMap> {
        self.lock().state.get(resource).cloned()
    }

    pub fn observed_uids(&self) -> Vec<(String, u32)> {
        self.lock().observed_uid.clone()
    }

    fn call(&self, operation: &'static str, call: String, resource: &ResourceRef) -> anyhow::Result<()> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(&(operation, resource.clone())) {
            anyhow::bail!("{operation} of {resource} failed");
        }
        Ok(())
    }
}

/// Provider keeping its state in a [`Recorder`]
///
/// Idempotent: a change that is already in effect leaves the state as is.
#[derive(Debug, Clone)]
pub struct RecordingProvider {
    recorder: Recorder,
    /// Backend whose effective uid is noted on each mutating call
    observe: Option<MockBackend>,
}

impl RecordingProvider {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            observe: None,
        }
    }

    pub fn observing(mut self, backend: MockBackend) -> Self {
        self.observe = Some(backend);
        self
    }

    fn observe(&self, call: &str) {
        if let Some(backend) = &self.observe {
            let uid = backend.effective_uid();
            self.recorder
                .lock()
                .observed_uid
                .push((call.to_string(), uid));
        }
    }

    fn apply(&self, resource: &Resource, change: &PropertyChange) {
        let mut state = self.recorder.lock();
        let reference = resource.reference().clone();
        if change.is_removal() {
            state.state.remove(&reference);
        } else if change.is_creation() {
            let mut props = resource.properties().clone();
            props.insert(ENSURE.to_string(), change.desired.clone());
            state.state.insert(reference, props);
        } else {
            state
                .state
                .entry(reference)
                .or_default()
                .insert(change.property.clone(), change.desired.clone());
        }
    }
}

impl Provider for RecordingProvider {
    fn read(&self, resource: &Resource, _ctx: &ApplyContext<'_>) -> anyhow::Result<PropertyMap> {
        let r = resource.reference();
        self.recorder.call("read", format!("read {r}"), r)?;
        Ok(self.recorder.state_of(r).unwrap_or_else(|| {
            PropertyMap::from([(ENSURE.to_string(), Value::from(ABSENT))])
        }))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        _ctx: &ApplyContext<'_>,
    ) -> anyhow::Result<()> {
        let r = resource.reference();
        let call = format!("set {r} {}", change.property);
        self.observe(&call);
        self.recorder.call("set", call, r)?;
        self.apply(resource, change);
        Ok(())
    }

    fn sync(
        &self,
        resource: &Resource,
        changes: &[PropertyChange],
        _ctx: &ApplyContext<'_>,
    ) -> anyhow::Result<()> {
        let r = resource.reference();
        let call = format!("sync {r} {}", changes.len());
        self.observe(&call);
        self.recorder.call("sync", call, r)?;
        for change in changes {
            self.apply(resource, change);
        }
        Ok(())
    }

    fn refresh(&self, resource: &Resource, _ctx: &ApplyContext<'_>) -> anyhow::Result<()> {
        let r = resource.reference();
        let call = format!("refresh {r}");
        self.observe(&call);
        self.recorder.call("refresh", call, r)
    }
}

/// A type named `name` served only by a recording provider
///
/// Properties: `ensure`, `value` and the list `members`. The provider
/// responds to refresh.
pub fn stub_type(name: &'static str, provider: RecordingProvider) -> ResourceType {
    ResourceType::new(name, "name")
        .property(PropertySpec::property("ensure").values(&["present", "absent"]))
        .property(PropertySpec::property("value"))
        .property(PropertySpec::property("members").list())
        .property(PropertySpec::parameter("user"))
        .provider(ProviderEntry::new("recording", provider).feature(Feature::Refreshable))
}

/// Like [`stub_type`] but applied as the user named by its `user` parameter
pub fn scoped_stub_type(name: &'static str, provider: RecordingProvider) -> ResourceType {
    stub_type(name, provider).run_as(RunAs {
        user_param: "user",
        group_param: "group",
        mode: RunAsMode::Scoped,
    })
}

/// Like [`stub_type`] but synced in one call
pub fn whole_stub_type(name: &'static str, provider: RecordingProvider) -> ResourceType {
    let mut ty = stub_type(name, provider);
    for entry in &mut ty.providers {
        entry.sync_mode = SyncMode::Whole;
    }
    ty
}
