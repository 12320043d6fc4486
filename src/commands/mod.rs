//! Command implementations

pub mod apply;
pub mod graph;
pub mod providers;
pub mod resource;

use anyhow::{Context as _, Result};
use declarative::{HostFacts, PrivilegeContext, Registry};

use crate::Context;
use crate::provider;

/// Built-in types and the facts of this host, after config overrides
pub fn host(ctx: &Context) -> (Registry, HostFacts) {
    let registry = provider::registry();
    let facts = ctx
        .config
        .apply_facts(HostFacts::detect(&registry.confined_commands()));
    (registry, facts)
}

/// Take ownership of the process identity for the rest of the command
pub fn claim_privilege() -> Result<PrivilegeContext> {
    PrivilegeContext::system().context("Failed to claim the process identity")
}
