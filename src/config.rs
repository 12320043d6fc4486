use anyhow::{Context, Result};
use declarative::{Catalog, HostFacts, OsFamily, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("converge"))
}

// ============================================================================
// Converge Config
// ============================================================================

/// `config.toml`: defaults for every run
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Never change anything unless a run says otherwise
    pub noop: bool,
    pub detailed_exitcodes: bool,
    /// Default provider per resource type
    pub providers: BTreeMap<String, String>,
    pub facts: FactOverrides,
}

/// Host facts that override detection
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactOverrides {
    pub os_family: Option<OsFamily>,
    pub user_private_groups: Option<bool>,
}

impl Config {
    /// Load the config file; a missing default file means defaults
    ///
    /// An explicitly given path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = config_dir()?.join("config.toml");
                if !path.exists() {
                    log::debug!("no config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply fact overrides to detected facts
    pub fn apply_facts(&self, mut facts: HostFacts) -> HostFacts {
        if let Some(family) = self.facts.os_family {
            facts.family = family;
            facts.user_private_groups = family.uses_private_groups();
        }
        if let Some(private) = self.facts.user_private_groups {
            facts.user_private_groups = private;
        }
        facts
    }

    /// Give resources without an explicit provider the configured default
    pub fn apply_providers(&self, catalog: Catalog) -> Result<Catalog> {
        if self.providers.is_empty() {
            return Ok(catalog);
        }
        let resources = catalog.into_resources().into_iter().map(|r| self.with_provider(r));
        Ok(Catalog::from_resources(resources)?)
    }

    pub fn with_provider(&self, resource: Resource) -> Resource {
        if resource.meta().provider.is_some() {
            return resource;
        }
        match self.providers.get(resource.type_name()) {
            Some(provider) => resource.with_provider(provider.as_str()),
            None => resource,
        }
    }
}
