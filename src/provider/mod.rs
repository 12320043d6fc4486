//! Built-in resource types
//!
//! Each submodule declares one type's schema and the providers that can
//! manage it. Providers shell out to the platform tools through the apply
//! context, so they run under whatever identity the engine arranged.

mod exec;
mod file;
mod group;
mod nameservice;
mod package;
mod service;
mod user;

pub use nameservice::NameService;

use declarative::Registry;

/// Registry of every built-in type, reading accounts from the system files
pub fn registry() -> Registry {
    registry_with(&NameService::default())
}

/// Registry of every built-in type over a given account database
pub fn registry_with(accounts: &NameService) -> Registry {
    Registry::new()
        .with(file::resource_type())
        .with(group::resource_type(accounts))
        .with(user::resource_type(accounts))
        .with(package::resource_type())
        .with(service::resource_type())
        .with(exec::resource_type())
}

#[cfg(test)]
pub(crate) fn test_context<'a>(
    privilege: &'a declarative::PrivilegeContext,
    facts: &'a declarative::HostFacts,
) -> declarative::ApplyContext<'a> {
    declarative::ApplyContext::new(privilege, &declarative::LocalFileSource, facts)
}
