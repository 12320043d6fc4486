//! Account database files (`/etc/passwd`, `/etc/group`)
//!
//! The user and group providers read accounts from these files through the
//! file source and change them only through the platform tools.

use anyhow::{Context, Result};
use declarative::FileSource;
use std::io::Read;
use std::path::PathBuf;

/// One line of the passwd file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub comment: String,
    pub home: String,
    pub shell: String,
}

/// One line of the group file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Parse passwd content, skipping comments and malformed lines
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                name: fields[0].to_string(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                comment: fields[4].to_string(),
                home: fields[5].to_string(),
                shell: fields[6].to_string(),
            })
        })
        .collect()
}

/// Parse group content, skipping comments and malformed lines
pub fn parse_group(content: &str) -> Vec<GroupEntry> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 {
                return None;
            }
            Some(GroupEntry {
                name: fields[0].to_string(),
                gid: fields[2].parse().ok()?,
                members: fields[3]
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Location of the account database
#[derive(Debug, Clone)]
pub struct NameService {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for NameService {
    fn default() -> Self {
        Self::new("/etc/passwd", "/etc/group")
    }
}

impl NameService {
    pub fn new(passwd: impl Into<PathBuf>, group: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    pub fn users(&self, files: &dyn FileSource) -> Result<Vec<PasswdEntry>> {
        Ok(parse_passwd(&read(files, &self.passwd)?))
    }

    pub fn groups(&self, files: &dyn FileSource) -> Result<Vec<GroupEntry>> {
        Ok(parse_group(&read(files, &self.group)?))
    }

    pub fn user(&self, files: &dyn FileSource, name: &str) -> Result<Option<PasswdEntry>> {
        Ok(self.users(files)?.into_iter().find(|u| u.name == name))
    }

    pub fn group(&self, files: &dyn FileSource, name: &str) -> Result<Option<GroupEntry>> {
        Ok(self.groups(files)?.into_iter().find(|g| g.name == name))
    }

    /// Supplementary groups listing `user` as a member, sorted
    pub fn groups_of(&self, files: &dyn FileSource, user: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .groups(files)?
            .into_iter()
            .filter(|g| g.members.iter().any(|m| m == user))
            .map(|g| g.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

fn read(files: &dyn FileSource, path: &std::path::Path) -> Result<String> {
    let mut content = String::new();
    files
        .read(path)
        .and_then(|mut reader| reader.read_to_string(&mut content))
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use declarative::LocalFileSource;
    use tempfile::TempDir;

    pub const PASSWD: &str = "\
# system accounts
root:x:0:0:root:/root:/bin/bash
bob:x:1001:1001:Bob:/home/bob:/bin/sh
broken line
";

    pub const GROUP: &str = "\
root:x:0:
staff:x:50:bob,alice
admins:x:1100:bob
bob:x:1001:
";

    /// A name service over temporary copies of [`PASSWD`] and [`GROUP`]
    pub fn fixture() -> (TempDir, NameService) {
        let temp = TempDir::new().unwrap();
        let passwd = temp.path().join("passwd");
        let group = temp.path().join("group");
        std::fs::write(&passwd, PASSWD).unwrap();
        std::fs::write(&group, GROUP).unwrap();
        (temp, NameService::new(passwd, group))
    }

    #[test]
    fn test_parse_passwd_skips_malformed() {
        let users = parse_passwd(PASSWD);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name, "bob");
        assert_eq!(users[1].uid, 1001);
        assert_eq!(users[1].home, "/home/bob");
    }

    #[test]
    fn test_parse_group_members() {
        let groups = parse_group(GROUP);
        assert_eq!(groups[1].members, vec!["bob", "alice"]);
        assert!(groups[0].members.is_empty());
    }

    #[test]
    fn test_lookup_through_file_source() {
        let (_temp, db) = fixture();
        let bob = db.user(&LocalFileSource, "bob").unwrap().unwrap();
        assert_eq!(bob.gid, 1001);
        assert!(db.user(&LocalFileSource, "carol").unwrap().is_none());
        assert_eq!(
            db.groups_of(&LocalFileSource, "bob").unwrap(),
            vec!["admins", "staff"]
        );
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let db = NameService::new("/nonexistent/passwd", "/nonexistent/group");
        assert!(db.users(&LocalFileSource).is_err());
    }
}
