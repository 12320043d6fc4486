//! User accounts

use anyhow::{Result, bail};
use declarative::diff::{ABSENT, ENSURE};
use declarative::{
    ApplyContext, AutoRequire, Confine, Feature, Invocation, OsFamily, PropertyChange,
    PropertyMap, PropertySpec, Provider, ProviderEntry, Resource, ResourceType, Value,
};

use super::nameservice::{GroupEntry, NameService};

/// Which account tool family a provider drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// shadow-utils: `useradd`, `usermod`, `userdel`
    Shadow,
    /// FreeBSD `pw`
    Pw,
}

#[derive(Debug, Clone)]
pub struct UserProvider {
    tool: Tool,
    db: NameService,
}

pub fn resource_type(db: &NameService) -> ResourceType {
    ResourceType::new("user", "name")
        .property(PropertySpec::property("ensure").values(&["present", "absent"]))
        .property(PropertySpec::property("uid"))
        .property(PropertySpec::property("gid"))
        .property(PropertySpec::property("groups").list())
        .property(PropertySpec::property("comment"))
        .property(PropertySpec::property("home"))
        .property(PropertySpec::property("shell"))
        .property(PropertySpec::parameter("managehome").requires(Feature::ManagesHomedir))
        .autorequire(AutoRequire::property("gid", "group"))
        .autorequire(AutoRequire::property("groups", "group"))
        .provider(
            ProviderEntry::new(
                "useradd",
                UserProvider {
                    tool: Tool::Shadow,
                    db: db.clone(),
                },
            )
            .confine(Confine::Command("useradd"))
            .default_for(OsFamily::LINUX)
            .feature(Feature::ManagesHomedir),
        )
        .provider(
            ProviderEntry::new(
                "pw",
                UserProvider {
                    tool: Tool::Pw,
                    db: db.clone(),
                },
            )
            .confine(Confine::Command("pw"))
            .default_for(&[OsFamily::FreeBsd])
            .feature(Feature::ManagesHomedir),
        )
}

/// Flags shared by account creation and modification
fn attribute_args(resource: &Resource, properties: &[&str]) -> Vec<String> {
    let mut args = Vec::new();
    for &property in properties {
        let Some(value) = resource.get(property) else {
            continue;
        };
        let flag = match property {
            "uid" => "-u",
            "gid" => "-g",
            "groups" => "-G",
            "comment" => "-c",
            "home" => "-d",
            "shell" => "-s",
            _ => continue,
        };
        args.push(flag.to_string());
        args.push(value.items().join(","));
    }
    args
}

const ATTRIBUTES: &[&str] = &["uid", "gid", "groups", "comment", "home", "shell"];

/// Command creating the account with every declared attribute
pub fn create_command(tool: Tool, resource: &Resource, private_groups: bool) -> Invocation {
    let name = resource.name_value("name");
    let managehome = resource.flag("managehome");
    match tool {
        Tool::Shadow => {
            let mut inv = Invocation::new("useradd").args(attribute_args(resource, ATTRIBUTES));
            if resource.get("gid").is_none() && private_groups {
                inv = inv.arg("-U");
            }
            if managehome {
                inv = inv.arg("-m");
            }
            inv.arg(name)
        }
        Tool::Pw => {
            let mut inv = Invocation::new("pw")
                .args(["useradd", name])
                .args(attribute_args(resource, ATTRIBUTES));
            if managehome {
                inv = inv.arg("-m");
            }
            inv
        }
    }
}

/// Command changing one attribute of an existing account
pub fn modify_command(tool: Tool, resource: &Resource, property: &str) -> Invocation {
    let name = resource.name_value("name");
    let mut args = attribute_args(resource, &[property]);
    if property == "home" && resource.flag("managehome") {
        args.push("-m".to_string());
    }
    match tool {
        Tool::Shadow => Invocation::new("usermod").args(args).arg(name),
        Tool::Pw => Invocation::new("pw").args(["usermod", name]).args(args),
    }
}

pub fn delete_command(tool: Tool, resource: &Resource) -> Invocation {
    let name = resource.name_value("name");
    let managehome = resource.flag("managehome");
    match tool {
        Tool::Shadow => {
            let inv = Invocation::new("userdel");
            let inv = if managehome { inv.arg("-r") } else { inv };
            inv.arg(name)
        }
        Tool::Pw => {
            let inv = Invocation::new("pw").args(["userdel", name]);
            if managehome { inv.arg("-r") } else { inv }
        }
    }
}

/// Report a gid the way the catalog spells it: a name if a name was declared
fn gid_value(resource: &Resource, gid: u32, groups: &[GroupEntry]) -> Value {
    let declared_name = resource
        .get_str("gid")
        .is_some_and(|g| g.parse::<u32>().is_err());
    if declared_name && let Some(group) = groups.iter().find(|g| g.gid == gid) {
        return Value::from(group.name.as_str());
    }
    Value::from(gid)
}

impl Provider for UserProvider {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let name = resource.name_value("name");
        let Some(entry) = self.db.user(ctx.files, name)? else {
            return Ok(PropertyMap::from([(ENSURE.to_string(), Value::from(ABSENT))]));
        };
        let groups = self.db.groups(ctx.files)?;
        let member_of = self.db.groups_of(ctx.files, name)?;

        Ok(PropertyMap::from([
            (ENSURE.to_string(), Value::from("present")),
            ("uid".to_string(), Value::from(entry.uid)),
            ("gid".to_string(), gid_value(resource, entry.gid, &groups)),
            ("groups".to_string(), Value::List(member_of)),
            ("comment".to_string(), Value::from(entry.comment)),
            ("home".to_string(), Value::from(entry.home)),
            ("shell".to_string(), Value::from(entry.shell)),
        ]))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let invocation = if change.is_creation() {
            create_command(self.tool, resource, ctx.facts.user_private_groups)
        } else if change.is_removal() {
            delete_command(self.tool, resource)
        } else if ATTRIBUTES.contains(&change.property.as_str()) {
            modify_command(self.tool, resource, &change.property)
        } else {
            bail!("cannot manage user property '{}'", change.property);
        };
        ctx.run_checked(&invocation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::nameservice::tests::fixture;
    use crate::provider::test_context;
    use declarative::{HostFacts, PrivilegeContext, SystemBackend};

    fn bob() -> Resource {
        Resource::new("user", "bob")
            .with("ensure", "present")
            .with("uid", "1001")
            .with("groups", Value::list(["admins", "staff"]))
            .with("shell", "/bin/zsh")
    }

    #[test]
    fn test_useradd_with_private_group() {
        let inv = create_command(Tool::Shadow, &bob(), true);
        assert_eq!(
            inv.command_line(),
            "useradd -u 1001 -G admins,staff -s /bin/zsh -U bob"
        );

        let inv = create_command(Tool::Shadow, &bob().with("gid", "staff"), true);
        assert!(!inv.args.contains(&"-U".to_string()));
    }

    #[test]
    fn test_pw_puts_name_first() {
        let inv = create_command(Tool::Pw, &bob().with("managehome", true), false);
        assert_eq!(
            inv.command_line(),
            "pw useradd bob -u 1001 -G admins,staff -s /bin/zsh -m"
        );
        assert_eq!(
            delete_command(Tool::Pw, &bob()).command_line(),
            "pw userdel bob"
        );
    }

    #[test]
    fn test_modify_single_attribute() {
        let resource = bob().with("home", "/srv/bob").with("managehome", true);
        assert_eq!(
            modify_command(Tool::Shadow, &resource, "home").command_line(),
            "usermod -d /srv/bob -m bob"
        );
        assert_eq!(
            modify_command(Tool::Shadow, &resource, "groups").command_line(),
            "usermod -G admins,staff bob"
        );
        assert_eq!(
            delete_command(Tool::Shadow, &resource).command_line(),
            "userdel -r bob"
        );
    }

    #[test]
    fn test_read_existing_user() {
        let (_temp, db) = fixture();
        let provider = UserProvider {
            tool: Tool::Shadow,
            db,
        };
        let privilege = PrivilegeContext::with_backend(Box::new(SystemBackend));
        let facts = HostFacts::new("linux", "x86_64", OsFamily::Debian);
        let ctx = test_context(&privilege, &facts);

        let current = provider
            .read(&Resource::new("user", "bob").with("gid", "bob"), &ctx)
            .unwrap();
        assert_eq!(current["ensure"], Value::from("present"));
        assert_eq!(current["gid"], Value::from("bob"));
        assert_eq!(current["groups"], Value::list(["admins", "staff"]));

        let numeric = provider.read(&Resource::new("user", "bob"), &ctx).unwrap();
        assert_eq!(numeric["gid"], Value::from("1001"));

        let missing = provider.read(&Resource::new("user", "carol"), &ctx).unwrap();
        assert_eq!(missing["ensure"], Value::from("absent"));
    }
}
