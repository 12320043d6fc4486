//! Files and directories
//!
//! State is read through the file source: the entry kind, a content
//! checksum, permission bits and ownership. Declared `content` and `source`
//! are compared by checksum, so a file is only rewritten when it differs.
//! Paths must be fully qualified. Symlinks are managed as links unless the
//! `links` parameter says to follow them.

use anyhow::{Context, Result, bail};
use declarative::content::checksum_bytes;
use declarative::diff::{ABSENT, ENSURE};
use declarative::{
    ApplyContext, AutoRequire, Confine, FileKind, IdSpec, IdentityTarget, Links, OsFamily,
    PropertyChange, PropertyMap, PropertySpec, Provider, ProviderEntry, Resource, ResourceType,
    Value,
};
use std::fs;
use std::io;
use std::path::Path;

pub fn resource_type() -> ResourceType {
    ResourceType::new("file", "path")
        .check_name(fully_qualified)
        .property(
            PropertySpec::property("ensure").values(&["present", "file", "directory", ABSENT]),
        )
        .property(PropertySpec::property("content"))
        .property(PropertySpec::property("source").check(fully_qualified))
        .property(PropertySpec::property("mode"))
        .property(PropertySpec::property("owner"))
        .property(PropertySpec::property("group"))
        .property(PropertySpec::parameter("force").values(&["true", "false"]))
        .property(
            PropertySpec::parameter("links")
                .values(&["manage", "follow", "ignore"])
                .default_value("manage"),
        )
        .autorequire(AutoRequire::parent_paths("file"))
        .autorequire(AutoRequire::property("owner", "user"))
        .autorequire(AutoRequire::property("group", "group"))
        .provider(
            ProviderEntry::new("posix", Posix).confine(Confine::NotFamily(&[OsFamily::Windows])),
        )
}

fn fully_qualified(path: &str) -> Result<(), String> {
    if Path::new(path).is_absolute() {
        Ok(())
    } else {
        Err("file paths must be fully qualified".to_string())
    }
}

/// How the resource treats symlinks
fn links(resource: &Resource) -> Links {
    resource
        .get_str("links")
        .and_then(Links::parse)
        .unwrap_or_default()
}

/// Parse an octal mode such as `0644` or `755`
pub fn parse_mode(mode: &str) -> Option<u32> {
    u32::from_str_radix(mode.trim_start_matches("0o"), 8)
        .ok()
        .filter(|m| *m <= 0o7777)
}

/// Report an owning id the way the catalog spells it
///
/// A declared name that resolves to the current id reads back as that name;
/// anything else reads as the numeric id.
fn id_value(
    ctx: &ApplyContext<'_>,
    declared: Option<&str>,
    current: u32,
    target: impl Fn(&str) -> IdentityTarget,
    pick: impl Fn(&declarative::Identity) -> u32,
) -> Value {
    if let Some(name) = declared
        && name.parse::<u32>().is_err()
        && let Ok(identity) = ctx.privilege.resolve(&target(name))
        && pick(&identity) == current
    {
        return Value::from(name);
    }
    Value::from(current)
}

fn group_target(name: &str) -> IdentityTarget {
    IdentityTarget {
        user: None,
        group: Some(IdSpec::parse(name)),
    }
}

fn resolve_uid(ctx: &ApplyContext<'_>, owner: &str) -> Result<u32> {
    Ok(ctx.privilege.resolve(&IdentityTarget::user(owner))?.uid)
}

fn resolve_gid(ctx: &ApplyContext<'_>, group: &str) -> Result<u32> {
    Ok(ctx.privilege.resolve(&group_target(group))?.gid)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(unix)]
fn set_owner(path: &Path, links: Links, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    match links {
        Links::Manage => std::os::unix::fs::lchown(path, uid, gid),
        Links::Follow => std::os::unix::fs::chown(path, uid, gid),
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "file modes need a unix host"))
}

#[cfg(not(unix))]
fn set_owner(
    _path: &Path,
    _links: Links,
    _uid: Option<u32>,
    _gid: Option<u32>,
) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "file ownership needs a unix host"))
}

/// POSIX filesystem provider
#[derive(Debug, Clone, Copy)]
pub struct Posix;

impl Posix {
    fn write_content(resource: &Resource, path: &Path, ctx: &ApplyContext<'_>) -> Result<()> {
        if let Some(content) = resource.get_str("content") {
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        } else if let Some(source) = resource.get_str("source") {
            let mut reader = ctx
                .files
                .read(Path::new(source))
                .with_context(|| format!("Failed to open source {source}"))?;
            let mut file = fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            io::copy(&mut reader, &mut file)
                .with_context(|| format!("Failed to copy {source} to {}", path.display()))?;
        } else {
            fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }
        Ok(())
    }

    /// Remove whatever is at `path`; non-empty directories need `force`
    ///
    /// A link is removed itself, whatever `links` says.
    fn remove(resource: &Resource, path: &Path, ctx: &ApplyContext<'_>) -> Result<()> {
        let stat = ctx.files.stat(path, Links::Manage)?;
        let result = match stat.kind {
            None => return Ok(()),
            Some(FileKind::Directory) if resource.flag("force") => fs::remove_dir_all(path),
            Some(FileKind::Directory) => fs::remove_dir(path),
            Some(_) => fs::remove_file(path),
        };
        result.with_context(|| format!("Failed to remove {}", path.display()))
    }

    /// Bring the entry to the declared kind, then apply declared attributes
    fn ensure(
        resource: &Resource,
        path: &Path,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        if !change.is_creation() {
            if !resource.flag("force") {
                bail!(
                    "{} exists as {}, set force to replace it",
                    path.display(),
                    change.current.as_ref().map_or_else(String::new, ToString::to_string)
                );
            }
            Self::remove(resource, path, ctx)?;
        }

        match change.desired.as_str() {
            Some("directory") => fs::create_dir(path)
                .with_context(|| format!("Failed to create directory {}", path.display()))?,
            _ => Self::write_content(resource, path, ctx)?,
        }

        if let Some(mode) = resource.get_str("mode") {
            Self::apply_mode(path, mode)?;
        }
        if resource.get("owner").is_some() || resource.get("group").is_some() {
            Self::apply_owner(resource, path, ctx)?;
        }
        Ok(())
    }

    fn apply_mode(path: &Path, mode: &str) -> Result<()> {
        let Some(bits) = parse_mode(mode) else {
            bail!("invalid file mode '{mode}'");
        };
        set_mode(path, bits).with_context(|| format!("Failed to chmod {}", path.display()))
    }

    fn apply_owner(resource: &Resource, path: &Path, ctx: &ApplyContext<'_>) -> Result<()> {
        let uid = resource
            .get_str("owner")
            .map(|o| resolve_uid(ctx, o))
            .transpose()?;
        let gid = resource
            .get_str("group")
            .map(|g| resolve_gid(ctx, g))
            .transpose()?;
        set_owner(path, links(resource), uid, gid)
            .with_context(|| format!("Failed to chown {}", path.display()))
    }
}

impl Provider for Posix {
    fn read(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Result<PropertyMap> {
        let path = Path::new(resource.name_value("path"));
        let links = links(resource);
        let stat = ctx.files.stat(path, links)?;
        if !stat.exists {
            return Ok(PropertyMap::from([(ENSURE.to_string(), Value::from(ABSENT))]));
        }

        let mut current = PropertyMap::new();
        let kind = stat.kind.map_or("present", FileKind::as_ensure);
        current.insert(ENSURE.to_string(), Value::from(kind));

        if let Some(checksum) = &stat.checksum {
            if let Some(content) = resource.get_str("content") {
                let value = if checksum_bytes(content.as_bytes()) == *checksum {
                    content
                } else {
                    checksum.as_str()
                };
                current.insert("content".to_string(), Value::from(value));
            }
            if let Some(source) = resource.get_str("source") {
                let source_stat = ctx.files.stat(Path::new(source), links)?;
                if !source_stat.exists {
                    bail!("source {source} does not exist");
                }
                let value = if source_stat.checksum.as_ref() == Some(checksum) {
                    source
                } else {
                    checksum.as_str()
                };
                current.insert("source".to_string(), Value::from(value));
            }
        }

        if let Some(mode) = stat.mode {
            current.insert("mode".to_string(), Value::from(format!("{mode:04o}")));
        }
        if let Some(uid) = stat.owner {
            let value = id_value(
                ctx,
                resource.get_str("owner"),
                uid,
                IdentityTarget::user,
                |i| i.uid,
            );
            current.insert("owner".to_string(), value);
        }
        if let Some(gid) = stat.group {
            let value = id_value(ctx, resource.get_str("group"), gid, group_target, |i| i.gid);
            current.insert("group".to_string(), value);
        }
        Ok(current)
    }

    fn set(
        &self,
        resource: &Resource,
        change: &PropertyChange,
        ctx: &ApplyContext<'_>,
    ) -> Result<()> {
        let path = Path::new(resource.name_value("path"));
        match change.property.as_str() {
            _ if change.is_removal() => Self::remove(resource, path, ctx),
            ENSURE => Self::ensure(resource, path, change, ctx),
            "content" | "source" => Self::write_content(resource, path, ctx),
            "mode" => Self::apply_mode(path, &change.desired.to_string()),
            "owner" | "group" => Self::apply_owner(resource, path, ctx),
            other => bail!("cannot manage file property '{other}'"),
        }
    }

    fn is_in_sync(&self, property: &str, current: Option<&Value>, desired: &Value) -> bool {
        let current_str = current.and_then(Value::as_str);
        match (property, desired.as_str()) {
            (ENSURE, Some("present")) => current_str.is_some_and(|c| c != ABSENT),
            ("mode", Some(mode)) => {
                parse_mode(mode).is_some() && current_str.and_then(parse_mode) == parse_mode(mode)
            }
            _ => current == Some(desired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_context;
    use declarative::{HostFacts, PrivilegeContext, SystemBackend};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        privilege: PrivilegeContext,
        facts: HostFacts,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                privilege: PrivilegeContext::with_backend(Box::new(SystemBackend)),
                facts: HostFacts::new("linux", "x86_64", OsFamily::Linux),
            }
        }

        fn path(&self, name: &str) -> String {
            self.temp.path().join(name).to_string_lossy().into_owned()
        }

        /// Read then apply every out-of-sync property, as a run would
        fn converge(&self, resource: &Resource) -> Vec<String> {
            let ctx = test_context(&self.privilege, &self.facts);
            let registry = crate::provider::registry();
            let ty = registry.get("file").unwrap();
            let current = Posix.read(resource, &ctx).unwrap();
            let changes = declarative::compute_changes(ty, resource, &current, &Posix);
            for change in &changes {
                Posix.set(resource, change, &ctx).unwrap();
            }
            changes.iter().map(PropertyChange::message).collect()
        }
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0644"), Some(0o644));
        assert_eq!(parse_mode("755"), Some(0o755));
        assert_eq!(parse_mode("9"), None);
        assert_eq!(parse_mode("17777"), None);
    }

    #[test]
    fn test_mode_in_sync_ignores_leading_zero() {
        assert!(Posix.is_in_sync("mode", Some(&Value::from("0644")), &Value::from("644")));
        assert!(!Posix.is_in_sync("mode", Some(&Value::from("0644")), &Value::from("0600")));
        assert!(Posix.is_in_sync("ensure", Some(&Value::from("file")), &Value::from("present")));
    }

    #[test]
    fn test_create_file_with_content_and_mode() {
        let f = Fixture::new();
        let motd = Resource::new("file", f.path("motd"))
            .with("ensure", "file")
            .with("content", "hello\n")
            .with("mode", "0600");

        assert_eq!(f.converge(&motd), vec!["created as file"]);
        assert_eq!(fs::read_to_string(f.path("motd")).unwrap(), "hello\n");
        assert!(f.converge(&motd).is_empty());

        let changed = motd.clone().with("content", "bye\n");
        let messages = f.converge(&changed);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("content changed 'blake3:"));
        assert_eq!(fs::read_to_string(f.path("motd")).unwrap(), "bye\n");
    }

    #[test]
    fn test_copy_from_source() {
        let f = Fixture::new();
        fs::write(f.path("template"), "v1").unwrap();
        let copy = Resource::new("file", f.path("copy"))
            .with("ensure", "file")
            .with("source", f.path("template"));

        f.converge(&copy);
        assert_eq!(fs::read_to_string(f.path("copy")).unwrap(), "v1");
        assert!(f.converge(&copy).is_empty());

        fs::write(f.path("template"), "v2").unwrap();
        assert_eq!(f.converge(&copy).len(), 1);
        assert_eq!(fs::read_to_string(f.path("copy")).unwrap(), "v2");
    }

    #[test]
    fn test_replace_kind_requires_force() {
        let f = Fixture::new();
        fs::write(f.path("data"), "x").unwrap();
        let ctx = test_context(&f.privilege, &f.facts);
        let dir = Resource::new("file", f.path("data")).with("ensure", "directory");
        let change = PropertyChange::new(
            "ensure",
            Some(Value::from("file")),
            Value::from("directory"),
        );

        let err = Posix.set(&dir, &change, &ctx).unwrap_err();
        assert!(err.to_string().contains("set force to replace it"));

        Posix.set(&dir.with("force", true), &change, &ctx).unwrap();
        assert!(Path::new(&f.path("data")).is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_links_parameter_decides_what_is_read() {
        let f = Fixture::new();
        fs::write(f.path("target"), "x").unwrap();
        std::os::unix::fs::symlink(f.path("target"), f.path("link")).unwrap();
        let ctx = test_context(&f.privilege, &f.facts);
        let link = Resource::new("file", f.path("link"))
            .with("ensure", "file")
            .with("content", "x");

        let managed = Posix.read(&link, &ctx).unwrap();
        assert_eq!(managed.get(ENSURE), Some(&Value::from("link")));
        assert_eq!(managed.get("content"), None);

        let ignored = Posix.read(&link.clone().with("links", "ignore"), &ctx).unwrap();
        assert_eq!(ignored, managed);

        let followed = link.with("links", "follow");
        let current = Posix.read(&followed, &ctx).unwrap();
        assert_eq!(current.get(ENSURE), Some(&Value::from("file")));
        assert_eq!(current.get("content"), Some(&Value::from("x")));
        assert!(f.converge(&followed).is_empty());
    }

    #[test]
    fn test_relative_paths_are_rejected() {
        let f = Fixture::new();
        let registry = crate::provider::registry();
        let ty = registry.get("file").unwrap();
        let posix = &ty.providers[0];

        let relative = Resource::new("file", "etc/motd").with("ensure", "file");
        assert!(matches!(
            ty.validate(&relative, posix),
            Err(declarative::ValidationError::InvalidValue { ref property, .. }) if property == "path"
        ));

        let source = Resource::new("file", f.path("motd")).with("source", "motd.in");
        assert!(matches!(
            ty.validate(&source, posix),
            Err(declarative::ValidationError::InvalidValue { ref property, .. }) if property == "source"
        ));

        let links = Resource::new("file", f.path("motd")).with("links", "copy");
        assert!(ty.validate(&links, posix).is_err());
        assert!(ty.validate(&links.with("links", "follow"), posix).is_ok());
    }

    #[test]
    fn test_remove_directory() {
        let f = Fixture::new();
        fs::create_dir_all(f.path("tree/leaf")).unwrap();
        let gone = Resource::new("file", f.path("tree")).with("ensure", "absent");

        let ctx = test_context(&f.privilege, &f.facts);
        let change = PropertyChange::new(
            "ensure",
            Some(Value::from("directory")),
            Value::from("absent"),
        );
        assert!(Posix.set(&gone, &change, &ctx).is_err());

        assert_eq!(f.converge(&gone.with("force", true)), vec!["removed"]);
        assert!(!Path::new(&f.path("tree")).exists());
    }
}
