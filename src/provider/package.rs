//! Packages

use anyhow::{Context, Result, bail};
use declarative::diff::{ABSENT, ENSURE};
use declarative::{
    ApplyContext, Confine, Feature, Invocation, OsFamily, PropertyChange, PropertyMap,
    PropertySpec, Provider, ProviderEntry, Resource, ResourceType, Value,
};
use serde::Deserialize;

const PRESENT: &str = "present";

pub fn resource_type() -> ResourceType {
    ResourceType::new("package", "name")
        .property(
            PropertySpec::property("ensure")
                .values(&[PRESENT, ABSENT])
                .otherwise_requires(Feature::Versionable),
        )
        .provider(
            ProviderEntry::new("apt", Apt)
                .confine(Confine::Command("apt-get"))
                .confine(Confine::Command("dpkg-query"))
                .default_for(&[OsFamily::Debian])
                .feature(Feature::Versionable),
        )
        .provider(
            ProviderEntry::new("brew", Brew)
                .confine(Confine::Command("brew"))
                .default_for(&[OsFamily::Darwin]),
        )
}

/// Installed version, or `absent`
fn installed(version: Option<String>) -> PropertyMap {
    let value = version.map_or_else(|| Value::from(ABSENT), Value::from);
    PropertyMap::from([(ENSURE.to_string(), value)])
}

/// `present` accepts any installed version; anything else must match exactly
fn ensure_in_sync(current: Option<&Value>, desired: &Value) -> bool {
    let current = current.and_then(Value::as_str);
    match desired.as_str() {
        Some(PRESENT) => current.is_some_and(|c| c != ABSENT),
        other => current == other,
    }
}

/// Debian packages through dpkg and apt
#[derive(Debug, Clone, Copy)]
pub struct Apt;

impl Apt {
    pub fn query(name: &str) -> Invocation {
        Invocation::new("dpkg-query").args(["-W", "-f", "${Status}\t${Version}", name])
    }

    /// Version from `dpkg-query` output, if the package is installed
    pub fn parse_query(output: &str) -> Option<String> {
        let (status, version) = output.trim().split_once('\t')?;
        status
            .ends_with(" installed")
            .then(|| version.to_string())
    }

    pub fn command(resource: &Resource, ensure: &str) -> Invocation {
        let name = resource.name_value("name");
        let inv = Invocation::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["-q", "-y"]);
        match ensure {
            ABSENT => inv.args(["remove", name]),
            PRESENT => inv.args(["install", name]),
            version => inv.args(["install".to_string(), format!("{name}={version}")]),
        }
    }
}

impl Provider for Apt {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let output = ctx.run(&Self::query(resource.name_value("name")))?;
        let version = if output.success {
            Self::parse_query(&output.output_str())
        } else {
            None
        };
        Ok(installed(version))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let Some(ensure) = change.desired.as_str() else {
            bail!("package ensure must be a single value");
        };
        ctx.run_checked(&Self::command(resource, ensure))?;
        Ok(())
    }

    fn is_in_sync(&self, _property: &str, current: Option<&Value>, desired: &Value) -> bool {
        ensure_in_sync(current, desired)
    }
}

/// Homebrew formulae
#[derive(Debug, Clone, Copy)]
pub struct Brew;

#[derive(Deserialize)]
struct BrewInfo {
    formulae: Vec<BrewFormula>,
}

#[derive(Deserialize)]
struct BrewFormula {
    installed: Vec<BrewInstalled>,
}

#[derive(Deserialize)]
struct BrewInstalled {
    version: String,
}

impl Brew {
    /// Installed version from `brew info --json=v2` output
    pub fn parse_info(json: &str) -> Result<Option<String>> {
        let info: BrewInfo = serde_json::from_str(json).context("Failed to parse brew info")?;
        Ok(info
            .formulae
            .into_iter()
            .next()
            .and_then(|f| f.installed.into_iter().next())
            .map(|i| i.version))
    }
}

impl Provider for Brew {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let name = resource.name_value("name");
        let output = ctx.run(
            &Invocation::new("brew").args(["info", "--json=v2", "--formula", name]),
        )?;
        // Unknown formulae make `brew info` fail
        if !output.success {
            return Ok(installed(None));
        }
        Ok(installed(Self::parse_info(&output.output_str())?))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let name = resource.name_value("name");
        let action = if change.is_removal() {
            "uninstall"
        } else {
            "install"
        };
        ctx.run_checked(&Invocation::new("brew").args([action, "--formula", name]))
            .with_context(|| format!("brew {action} {name} failed"))?;
        Ok(())
    }

    fn is_in_sync(&self, _property: &str, current: Option<&Value>, desired: &Value) -> bool {
        ensure_in_sync(current, desired)
    }
}
