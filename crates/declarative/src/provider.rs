//! Provider protocol
//!
//! A provider is a platform-specific implementation of a resource type:
//! it reads the current state of a resource and converges it towards the
//! desired state. Each type registers a fixed set of providers, each guarded
//! by [`Confine`] predicates over [`HostFacts`].

use crate::context::ApplyContext;
use crate::diff::PropertyChange;
use crate::facts::{HostFacts, OsFamily};
use crate::resource::Resource;
use crate::value::{PropertyMap, Value};
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Optional provider capabilities
///
/// Properties may require a feature; declaring such a property for a
/// resource whose provider lacks the feature is a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Can create and remove home directories
    ManagesHomedir,
    /// Can set the member list of a group
    ManagesMembers,
    /// Can enable/disable start at boot
    Enableable,
    /// Responds to refresh events (restart, re-run)
    Refreshable,
    /// Can install a specific version
    Versionable,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ManagesHomedir => "manages_homedir",
            Self::ManagesMembers => "manages_members",
            Self::Enableable => "enableable",
            Self::Refreshable => "refreshable",
            Self::Versionable => "versionable",
        })
    }
}

/// A suitability predicate over host facts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confine {
    /// Host is one of these families
    Family(&'static [OsFamily]),
    /// Host is none of these families
    NotFamily(&'static [OsFamily]),
    /// Command is available in `PATH`
    Command(&'static str),
}

impl Confine {
    pub fn matches(&self, facts: &HostFacts) -> bool {
        match self {
            Self::Family(families) => families.contains(&facts.family),
            Self::NotFamily(families) => !families.contains(&facts.family),
            Self::Command(command) => facts.has_command(command),
        }
    }

    /// Explain why the predicate does not hold
    pub fn describe(&self) -> String {
        match self {
            Self::Family(families) => format!("requires OS family {}", join(families)),
            Self::NotFamily(families) => format!("not supported on {}", join(families)),
            Self::Command(command) => format!("command '{command}' not found"),
        }
    }
}

fn join(families: &[OsFamily]) -> String {
    families
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// How the engine hands out-of-sync properties to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One [`Provider::set`] call per out-of-sync property
    PerProperty,
    /// A single [`Provider::sync`] call with all changes
    Whole,
}

/// Platform-specific implementation of a resource type
///
/// Implementations must be idempotent: calling `set` with a change that is
/// already in effect must leave the system as it is. The engine reads each
/// resource once per run and never re-reads after syncing.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Read the current state
    ///
    /// Returns current values for the properties the provider manages. A
    /// missing resource is reported as `ensure => absent`.
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap>;

    /// Apply a single property change
    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let _ = (resource, ctx);
        anyhow::bail!("cannot update '{}' property by property", change.property)
    }

    /// Apply all changes at once
    ///
    /// Default implementation applies each change with [`Provider::set`].
    fn sync(
        &self,
        resource: &Resource,
        changes: &[PropertyChange],
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        for change in changes {
            self.set(resource, change, ctx)?;
        }
        Ok(())
    }

    /// Respond to a refresh event (restart a service, re-run a command)
    ///
    /// Only called when the provider advertises [`Feature::Refreshable`].
    fn refresh(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<()> {
        let _ = (resource, ctx);
        Ok(())
    }

    /// Whether the current value satisfies the desired value
    ///
    /// Default: exact match for scalars, set equality for lists.
    fn is_in_sync(&self, property: &str, current: Option<&Value>, desired: &Value) -> bool {
        let _ = property;
        match current {
            Some(current) if desired.is_list() || current.is_list() => current.same_set(desired),
            Some(current) => current == desired,
            None => false,
        }
    }
}

/// A registered provider with its suitability rules
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub name: &'static str,
    /// All must hold for the provider to be suitable
    pub confines: Vec<Confine>,
    /// Families where this provider is the preferred choice
    pub default_for: Vec<OsFamily>,
    pub features: Vec<Feature>,
    pub sync_mode: SyncMode,
    provider: Arc<dyn Provider>,
}

impl ProviderEntry {
    pub fn new(name: &'static str, provider: impl Provider + 'static) -> Self {
        Self::shared(name, Arc::new(provider))
    }

    /// Register an already-shared provider instance
    pub fn shared(name: &'static str, provider: Arc<dyn Provider>) -> Self {
        Self {
            name,
            confines: Vec::new(),
            default_for: Vec::new(),
            features: Vec::new(),
            sync_mode: SyncMode::PerProperty,
            provider,
        }
    }

    pub fn confine(mut self, confine: Confine) -> Self {
        self.confines.push(confine);
        self
    }

    pub fn default_for(mut self, families: &[OsFamily]) -> Self {
        self.default_for.extend_from_slice(families);
        self
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Whether every confine holds on this host
    pub fn is_suitable(&self, facts: &HostFacts) -> bool {
        self.confines.iter().all(|c| c.matches(facts))
    }

    /// Reasons the provider is unsuitable; empty when suitable
    pub fn unmet(&self, facts: &HostFacts) -> Vec<String> {
        self.confines
            .iter()
            .filter(|c| !c.matches(facts))
            .map(Confine::describe)
            .collect()
    }

    /// Ranking among suitable providers: default-for match, then confine count
    pub fn specificity(&self, facts: &HostFacts) -> (bool, usize) {
        (
            self.default_for.contains(&facts.family),
            self.confines.len(),
        )
    }
}
