//! # Declarative
//!
//! A catalog transaction engine for declarative system configuration.
//!
//! Given a catalog of desired-state resource declarations, this crate
//! orders them by their dependencies, picks a platform provider for each,
//! and drives every resource from its current state to the declared state,
//! idempotently.
//!
//! ## Core Concepts
//!
//! - **Resource**: a unit of desired state, identified by type and title
//! - **Provider**: a platform implementation of a resource type, chosen by
//!   suitability predicates over host facts
//! - **ResourceGraph**: resources plus ordering and refresh edges, checked
//!   for cycles and ordered deterministically
//! - **Transaction**: applies the graph, isolating failures and firing
//!   refreshes
//! - **PrivilegeContext**: runs individual actions as another identity
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     Catalog, HostFacts, LocalFileSource, LogEvents, PrivilegeContext,
//!     Registry, ResourceGraph, Transaction,
//! };
//!
//! let registry: Registry = my_types();
//! let facts = HostFacts::detect(&registry.confined_commands());
//! let catalog = Catalog::load("site.toml".as_ref())?;
//!
//! let graph = ResourceGraph::build(catalog, &registry)?;
//! let privilege = PrivilegeContext::system()?;
//! let summary = Transaction::new(&graph, &registry, &facts, &privilege, &LocalFileSource)
//!     .run(&mut LogEvents);
//!
//! std::process::exit(summary.exit_status().code(true));
//! ```
//!
//! ## Extension Traits
//!
//! - [`Provider`]: reads and converges one resource type on one platform
//! - [`IdentityBackend`]: process identity and account database access
//! - [`FileSource`]: file metadata and content
//! - [`EventSink`]: receives progress and change events

pub mod autorequire;
pub mod catalog;
pub mod content;
pub mod context;
pub mod diff;
pub mod error;
pub mod facts;
pub mod graph;
pub mod privilege;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod transaction;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use autorequire::AutoRequire;
pub use catalog::Catalog;
pub use content::{FileKind, FileSource, FileStat, Links, LocalFileSource};
pub use context::{ApplyContext, CollectEvents, EventSink, LogEvents, NoEvents};
pub use diff::{PropertyChange, compute_changes};
pub use error::{
    CatalogError, ErrorCategory, GraphError, IdentityError, ResourceError, SelectionError,
    SyncPhase, ValidationError,
};
pub use facts::{HostFacts, OsFamily};
pub use graph::{Edge, EdgeKind, EdgeOrigin, ResourceGraph};
pub use privilege::{
    IdSpec, Identity, IdentityBackend, IdentityTarget, PrivilegeContext, SystemBackend,
};
pub use provider::{Confine, Feature, Provider, ProviderEntry, SyncMode};
pub use registry::{PropertySpec, Registry, ResourceType, RunAs, RunAsMode, ValueKind};
pub use resource::{Metaparams, Resource, ResourceRef};
pub use transaction::{Transaction, inspect};
pub use types::{
    ChangeEvent, CommandOutput, EventKind, ExitStatus, Invocation, ResourceStatus, RunSummary,
    Status, TransactionOptions,
};
pub use value::{PropertyMap, Value};
