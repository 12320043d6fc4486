//! Commands run for their side effects
//!
//! An `exec` is "in sync" when it does not need to run: it only runs on
//! refresh (`refreshonly`), or the file named by `creates` already exists.
//! Otherwise its `returns` property reads as `notrun` and syncing it runs
//! the command. Commands run through `/bin/sh -c`, spawned as the `user` and
//! `group` parameters when given.

use anyhow::{Result, bail};
use declarative::{
    ApplyContext, Confine, Feature, Invocation, Links, OsFamily, PropertyChange, PropertyMap,
    PropertySpec, Provider, ProviderEntry, Resource, ResourceType, RunAs, RunAsMode, Value,
};
use std::path::Path;

const NOTRUN: &str = "notrun";

pub fn resource_type() -> ResourceType {
    ResourceType::new("exec", "command")
        .property(PropertySpec::property("returns").default_value("0"))
        .property(PropertySpec::parameter("creates"))
        .property(PropertySpec::parameter("refreshonly").values(&["true", "false"]))
        .property(PropertySpec::parameter("cwd"))
        .property(PropertySpec::parameter("environment").list())
        .property(PropertySpec::parameter("user"))
        .property(PropertySpec::parameter("group"))
        .run_as(RunAs {
            user_param: "user",
            group_param: "group",
            mode: RunAsMode::Spawn,
        })
        .provider(
            ProviderEntry::new("posix", Posix)
                .confine(Confine::NotFamily(&[OsFamily::Windows]))
                .feature(Feature::Refreshable),
        )
}

/// Shell commands
#[derive(Debug, Clone, Copy)]
pub struct Posix;

impl Posix {
    pub fn invocation(resource: &Resource) -> Invocation {
        let mut inv = Invocation::new("/bin/sh")
            .arg("-c")
            .arg(resource.name_value("command"));
        if let Some(cwd) = resource.get_str("cwd") {
            inv = inv.cwd(cwd);
        }
        if let Some(environment) = resource.get("environment") {
            for pair in environment.items() {
                if let Some((key, value)) = pair.split_once('=') {
                    inv = inv.env(key, value);
                }
            }
        }
        inv
    }

    /// Whether `creates` names an existing path
    fn already_created(resource: &Resource, ctx: &ApplyContext<'_>) -> Result<bool> {
        match resource.get_str("creates") {
            Some(path) => Ok(ctx.files.stat(Path::new(path), Links::Follow)?.exists),
            None => Ok(false),
        }
    }

    fn execute(resource: &Resource, ctx: &ApplyContext<'_>) -> Result<()> {
        let returns = resource.get_str("returns").unwrap_or("0");
        let expected: Vec<&str> = returns.split(',').map(str::trim).collect();

        let invocation = Self::invocation(resource);
        let output = ctx.run(&invocation)?;
        let code = output
            .code
            .map_or_else(|| "a signal".to_string(), |c| c.to_string());
        if !expected.contains(&code.as_str()) {
            bail!(
                "'{}' returned {code} instead of one of [{returns}]: {}",
                resource.name_value("command"),
                output.output_str().trim()
            );
        }
        log::debug!(
            "'{}' output: {}",
            invocation.command_line(),
            output.output_str().trim()
        );
        Ok(())
    }
}

impl Provider for Posix {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let returns = resource.get_str("returns").unwrap_or("0");
        let runs = !resource.flag("refreshonly") && !Self::already_created(resource, ctx)?;
        let current = if runs { NOTRUN } else { returns };
        Ok(PropertyMap::from([(
            "returns".to_string(),
            Value::from(current),
        )]))
    }

    fn set(
        &self,
        resource: &Resource,
        _change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        Self::execute(resource, ctx)
    }

    fn refresh(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<()> {
        if Self::already_created(resource, ctx)? {
            log::debug!("{}: creates path exists, not running", resource.reference());
            return Ok(());
        }
        Self::execute(resource, ctx)
    }
}
