//! Error types for catalog transactions.
//!
//! Errors split along the blast radius of a failure:
//! - [`GraphError`] and [`CatalogError`] abort the whole run before any
//!   resource is touched.
//! - [`ResourceError`] fails a single resource; its dependents are skipped
//!   and unrelated resources proceed.
//! - [`IdentityError`] comes from the privilege context and surfaces as a
//!   [`ResourceError`] when it happens while applying a resource.

use crate::facts::OsFamily;
use crate::provider::Feature;
use crate::resource::ResourceRef;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of resource failures, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No suitable provider, or the explicit provider is unusable
    ProviderSelection,
    /// A property is unknown, malformed or needs a missing provider feature
    Validation,
    /// The provider failed while reading, syncing or refreshing
    Sync,
    /// A target user or group does not resolve to a system account
    IdentityResolution,
}

impl ErrorCategory {
    pub fn description(&self) -> &'static str {
        match self {
            Self::ProviderSelection => "provider selection failed",
            Self::Validation => "invalid resource",
            Self::Sync => "provider failed",
            Self::IdentityResolution => "unknown identity",
        }
    }
}

/// Errors that make the catalog unusable as a whole.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A relationship names a resource that is not in the catalog
    #[error("{source_ref} has '{metaparam}' relationship to {target}, which is not in the catalog")]
    MissingReference {
        source_ref: ResourceRef,
        metaparam: &'static str,
        target: ResourceRef,
    },

    /// Two resources of one type manage the same object under different titles
    #[error("{second} manages the same {type_name} '{name}' as {first}")]
    DuplicateName {
        type_name: String,
        name: String,
        first: ResourceRef,
        second: ResourceRef,
    },

    /// The relationships form a cycle
    #[error("found dependency cycle: {}", CycleDisplay(.cycle))]
    Cycle {
        /// Resources on the cycle in edge order; the first one closes it
        cycle: Vec<ResourceRef>,
    },
}

struct CycleDisplay<'a>(&'a [ResourceRef]);

impl fmt::Display for CycleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for r in self.0 {
            write!(f, "{r} => ")?;
        }
        match self.0.first() {
            Some(first) => write!(f, "{first})"),
            None => write!(f, ")"),
        }
    }
}

/// Errors building a catalog from its serialized form.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Two declarations share a type and title
    #[error("duplicate declaration: {0} is already declared")]
    Duplicate(ResourceRef),

    /// A declaration is missing its type or title
    #[error("invalid declaration #{index}: {message}")]
    Invalid { index: usize, message: String },

    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML catalog: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON catalog: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why no provider could be chosen for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("unknown resource type '{0}'")]
    UnknownType(String),

    #[error("no suitable provider for '{type_name}' on {family} (tried: {})", .tried.join(", "))]
    NoSuitable {
        type_name: String,
        family: OsFamily,
        tried: Vec<&'static str>,
    },

    #[error("'{type_name}' has no provider named '{name}'")]
    UnknownProvider { type_name: String, name: String },

    #[error("provider '{name}' is not suitable on this host: {reason}")]
    Unsuitable { name: String, reason: String },
}

/// Why a resource's declared properties are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown property '{property}'")]
    UnknownProperty { property: String },

    #[error("'{property}' requires feature '{feature}', which provider '{provider}' lacks")]
    UnsupportedFeature {
        property: String,
        feature: Feature,
        provider: &'static str,
    },

    #[error("invalid value '{value}' for '{property}': {reason}")]
    InvalidValue {
        property: String,
        value: String,
        reason: String,
    },
}

/// Provider call phase that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Read,
    Sync,
    Refresh,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Sync => "sync",
            Self::Refresh => "refresh",
        })
    }
}

/// Errors scoped to a single resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("provider selection failed: {0}")]
    ProviderSelection(#[from] SelectionError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{phase} failed: {message}")]
    Sync { phase: SyncPhase, message: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ResourceError {
    /// Wrap a provider error raised during `phase`
    pub fn sync(phase: SyncPhase, err: &anyhow::Error) -> Self {
        Self::Sync {
            phase,
            message: format!("{err:#}"),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProviderSelection(_) => ErrorCategory::ProviderSelection,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Sync { .. } => ErrorCategory::Sync,
            Self::Identity(e) if e.is_resolution() => ErrorCategory::IdentityResolution,
            Self::Identity(_) => ErrorCategory::Sync,
        }
    }
}

/// Errors from the privilege context.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("failed to look up '{name}': {source}")]
    Lookup {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to switch effective identity to {uid}:{gid}: {source}")]
    Switch {
        uid: u32,
        gid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restore effective identity {uid}:{gid}: {source}")]
    Restore {
        uid: u32,
        gid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("an identity switch is already active in this process")]
    SwitchInProgress,

    #[error("the process identity is already owned by another privilege context")]
    AlreadyClaimed,

    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl IdentityError {
    /// Whether the target identity failed to resolve (no switch was attempted)
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::UnknownUser(_) | Self::UnknownGroup(_) | Self::Lookup { .. }
        )
    }
}
