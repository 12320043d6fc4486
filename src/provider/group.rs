//! Groups

use anyhow::{Result, bail};
use declarative::diff::{ABSENT, ENSURE};
use declarative::{
    ApplyContext, Confine, Feature, Invocation, OsFamily, PropertyChange, PropertyMap,
    PropertySpec, Provider, ProviderEntry, Resource, ResourceType, Value,
};

use super::nameservice::NameService;
use super::user::Tool;

#[derive(Debug, Clone)]
pub struct GroupProvider {
    tool: Tool,
    db: NameService,
}

pub fn resource_type(db: &NameService) -> ResourceType {
    ResourceType::new("group", "name")
        .property(PropertySpec::property("ensure").values(&["present", "absent"]))
        .property(PropertySpec::property("gid"))
        .property(
            PropertySpec::property("members")
                .list()
                .requires(Feature::ManagesMembers),
        )
        .provider(
            ProviderEntry::new(
                "groupadd",
                GroupProvider {
                    tool: Tool::Shadow,
                    db: db.clone(),
                },
            )
            .confine(Confine::Command("groupadd"))
            .default_for(OsFamily::LINUX)
            .feature(Feature::ManagesMembers),
        )
        .provider(
            ProviderEntry::new(
                "pw",
                GroupProvider {
                    tool: Tool::Pw,
                    db: db.clone(),
                },
            )
            .confine(Confine::Command("pw"))
            .default_for(&[OsFamily::FreeBsd])
            .feature(Feature::ManagesMembers),
        )
}

pub fn create_command(tool: Tool, resource: &Resource) -> Invocation {
    let name = resource.name_value("name");
    let gid = resource.get_str("gid");
    match tool {
        Tool::Shadow => {
            let mut inv = Invocation::new("groupadd");
            if let Some(gid) = gid {
                inv = inv.args(["-g", gid]);
            }
            inv.arg(name)
        }
        Tool::Pw => {
            let mut inv = Invocation::new("pw").args(["groupadd", name]);
            if let Some(gid) = gid {
                inv = inv.args(["-g", gid]);
            }
            inv
        }
    }
}

pub fn set_gid_command(tool: Tool, name: &str, gid: &str) -> Invocation {
    match tool {
        Tool::Shadow => Invocation::new("groupmod").args(["-g", gid, name]),
        Tool::Pw => Invocation::new("pw").args(["groupmod", name, "-g", gid]),
    }
}

/// Replace the member list
pub fn set_members_command(tool: Tool, name: &str, members: &Value) -> Invocation {
    let list = members.items().join(",");
    match tool {
        Tool::Shadow => Invocation::new("gpasswd").args(["-M", list.as_str(), name]),
        Tool::Pw => Invocation::new("pw").args(["groupmod", name, "-M", list.as_str()]),
    }
}

pub fn delete_command(tool: Tool, name: &str) -> Invocation {
    match tool {
        Tool::Shadow => Invocation::new("groupdel").arg(name),
        Tool::Pw => Invocation::new("pw").args(["groupdel", name]),
    }
}

impl Provider for GroupProvider {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let Some(entry) = self.db.group(ctx.files, resource.name_value("name"))? else {
            return Ok(PropertyMap::from([(ENSURE.to_string(), Value::from(ABSENT))]));
        };
        Ok(PropertyMap::from([
            (ENSURE.to_string(), Value::from("present")),
            ("gid".to_string(), Value::from(entry.gid)),
            ("members".to_string(), Value::List(entry.members)),
        ]))
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let name = resource.name_value("name");
        if change.is_creation() {
            ctx.run_checked(&create_command(self.tool, resource))?;
            if let Some(members) = resource.get("members") {
                ctx.run_checked(&set_members_command(self.tool, name, members))?;
            }
            return Ok(());
        }

        let invocation = match change.property.as_str() {
            _ if change.is_removal() => delete_command(self.tool, name),
            "gid" => set_gid_command(self.tool, name, &change.desired.to_string()),
            "members" => set_members_command(self.tool, name, &change.desired),
            other => bail!("cannot manage group property '{other}'"),
        };
        ctx.run_checked(&invocation)?;
        Ok(())
    }
}
