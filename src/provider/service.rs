//! System services

use anyhow::{Result, bail};
use declarative::diff::ENSURE;
use declarative::{
    ApplyContext, Confine, Feature, Invocation, Links, OsFamily, PropertyChange, PropertyMap,
    PropertySpec, Provider, ProviderEntry, Resource, ResourceType, Value,
};
use std::path::PathBuf;

const RUNNING: &str = "running";
const STOPPED: &str = "stopped";

pub fn resource_type() -> ResourceType {
    ResourceType::new("service", "name")
        .property(PropertySpec::property("ensure").values(&[RUNNING, STOPPED]))
        .property(
            PropertySpec::property("enable")
                .values(&["true", "false"])
                .requires(Feature::Enableable),
        )
        .provider(
            ProviderEntry::new("systemd", Systemd)
                .confine(Confine::Command("systemctl"))
                .default_for(OsFamily::LINUX)
                .feature(Feature::Enableable)
                .feature(Feature::Refreshable),
        )
        .provider(
            ProviderEntry::new("init", InitScript::new("/etc/init.d"))
                .confine(Confine::Family(OsFamily::LINUX))
                .feature(Feature::Refreshable),
        )
}

/// Current state shared by both providers
fn state(running: bool) -> (String, Value) {
    (
        ENSURE.to_string(),
        Value::from(if running { RUNNING } else { STOPPED }),
    )
}

/// A refresh restarts the service unless it is stopped or meant to be
fn should_restart(resource: &Resource, running: bool) -> bool {
    running && resource.get_str(ENSURE) != Some(STOPPED)
}

/// Services managed by systemd
#[derive(Debug, Clone, Copy)]
pub struct Systemd;

impl Systemd {
    pub fn command(action: &str, name: &str) -> Invocation {
        Invocation::new("systemctl").args([action, name])
    }

    fn is_running(name: &str, ctx: &ApplyContext<'_>) -> Result<bool> {
        Ok(ctx.run(&Self::command("is-active", name))?.success)
    }
}

impl Provider for Systemd {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let name = resource.name_value("name");
        let running = Self::is_running(name, ctx)?;
        let enabled = ctx.run(&Self::command("is-enabled", name))?;
        // `is-enabled` prints e.g. "enabled", "static" or "disabled"
        let enabled = enabled.output_str().trim() == "enabled";
        Ok(PropertyMap::from([
            state(running),
            ("enable".to_string(), Value::from(enabled)),
        ]))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let name = resource.name_value("name");
        let action = match (change.property.as_str(), change.desired.as_str()) {
            (ENSURE, Some(RUNNING)) => "start",
            (ENSURE, Some(STOPPED)) => "stop",
            ("enable", Some("true")) => "enable",
            ("enable", Some("false")) => "disable",
            (property, _) => bail!("cannot set service {property} to '{}'", change.desired),
        };
        ctx.run_checked(&Self::command(action, name))?;
        Ok(())
    }

    fn refresh(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<()> {
        let name = resource.name_value("name");
        if should_restart(resource, Self::is_running(name, ctx)?) {
            ctx.run_checked(&Self::command("restart", name))?;
        } else {
            log::debug!("service {name} is not running, not restarting");
        }
        Ok(())
    }

    fn is_in_sync(&self, property: &str, current: Option<&Value>, desired: &Value) -> bool {
        match property {
            "enable" => current.and_then(Value::as_bool) == desired.as_bool(),
            _ => current == Some(desired),
        }
    }
}

/// Services with a script under an init directory
#[derive(Debug, Clone)]
pub struct InitScript {
    dir: PathBuf,
}

impl InitScript {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn command(&self, action: &str, name: &str) -> Invocation {
        Invocation::new(self.dir.join(name).to_string_lossy()).arg(action)
    }

    fn is_running(&self, name: &str, ctx: &ApplyContext<'_>) -> Result<bool> {
        Ok(ctx.run(&self.command("status", name))?.success)
    }
}

impl Provider for InitScript {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let name = resource.name_value("name");
        if !ctx.files.stat(&self.dir.join(name), Links::Follow)?.exists {
            bail!("no init script for service '{name}' in {}", self.dir.display());
        }
        Ok(PropertyMap::from([state(self.is_running(name, ctx)?)]))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let action = match change.desired.as_str() {
            Some(RUNNING) if change.property == ENSURE => "start",
            Some(STOPPED) if change.property == ENSURE => "stop",
            _ => bail!("cannot set service {} to '{}'", change.property, change.desired),
        };
        ctx.run_checked(&self.command(action, resource.name_value("name")))?;
        Ok(())
    }

    fn refresh(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<()> {
        let name = resource.name_value("name");
        if should_restart(resource, self.is_running(name, ctx)?) {
            ctx.run_checked(&self.command("restart", name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_context;
    use declarative::{HostFacts, PrivilegeContext, SystemBackend};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// An init directory with a script that records its argument
    fn init_dir(running: bool) -> (TempDir, InitScript) {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("actions");
        let script = format!(
            "#!/bin/sh\necho \"$1\" >> {}\n[ \"$1\" = status ] && exit {}\nexit 0\n",
            log.display(),
            if running { 0 } else { 3 }
        );
        let path = temp.path().join("web");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let provider = InitScript::new(temp.path());
        (temp, provider)
    }

    fn actions(temp: &TempDir) -> String {
        std::fs::read_to_string(temp.path().join("actions")).unwrap_or_default()
    }

    #[test]
    fn test_systemd_commands() {
        assert_eq!(
            Systemd::command("is-active", "nginx").command_line(),
            "systemctl is-active nginx"
        );
    }

    #[test]
    fn test_enable_compared_as_boolean() {
        assert!(Systemd.is_in_sync("enable", Some(&Value::from(true)), &Value::from("yes")));
        assert!(!Systemd.is_in_sync("enable", Some(&Value::from(false)), &Value::from("true")));
    }

    #[test]
    fn test_init_script_read_and_restart() {
        let (temp, provider) = init_dir(true);
        let privilege = PrivilegeContext::with_backend(Box::new(SystemBackend));
        let facts = HostFacts::new("linux", "x86_64", OsFamily::Linux);
        let ctx = test_context(&privilege, &facts);

        let web = Resource::new("service", "web").with("ensure", "running");
        let current = provider.read(&web, &ctx).unwrap();
        assert_eq!(current["ensure"], Value::from("running"));

        provider.refresh(&web, &ctx).unwrap();
        assert_eq!(actions(&temp), "status\nstatus\nrestart\n");
    }

    #[test]
    fn test_stopped_service_is_not_restarted() {
        let (temp, provider) = init_dir(false);
        let privilege = PrivilegeContext::with_backend(Box::new(SystemBackend));
        let facts = HostFacts::new("linux", "x86_64", OsFamily::Linux);
        let ctx = test_context(&privilege, &facts);

        provider
            .refresh(&Resource::new("service", "web"), &ctx)
            .unwrap();
        assert_eq!(actions(&temp), "status\n");
    }

    #[test]
    fn test_missing_init_script_fails_read() {
        let temp = TempDir::new().unwrap();
        let provider = InitScript::new(temp.path());
        let privilege = PrivilegeContext::with_backend(Box::new(SystemBackend));
        let facts = HostFacts::new("linux", "x86_64", OsFamily::Linux);
        let ctx = test_context(&privilege, &facts);

        let err = provider
            .read(&Resource::new("service", "web"), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("no init script"));
    }
}
