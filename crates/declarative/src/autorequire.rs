//! Implicit dependencies between resource types
//!
//! A type may declare rules that make its resources depend on other
//! resources in the catalog without the catalog saying so: a file on its
//! parent directory, a user on the groups it is a member of. Rules only
//! ever produce ordering edges, and only towards resources that exist.

use crate::resource::Resource;
use std::path::Path;

/// An autorequire rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRequire {
    /// The nearest ancestor directory of the resource's name that is
    /// managed as a resource of `target_type`
    ParentPaths { target_type: &'static str },
    /// Each item of `property` names a resource of `target_type`
    PropertyValues {
        property: &'static str,
        target_type: &'static str,
    },
}

impl AutoRequire {
    pub fn parent_paths(target_type: &'static str) -> Self {
        Self::ParentPaths { target_type }
    }

    pub fn property(property: &'static str, target_type: &'static str) -> Self {
        Self::PropertyValues {
            property,
            target_type,
        }
    }

    /// Resolve the rule against a catalog
    ///
    /// `lookup` finds a resource by type and name. Unresolved names are
    /// ignored: an implicit dependency only applies when both ends are
    /// managed.
    pub fn targets<F>(&self, resource: &Resource, namevar: &str, lookup: F) -> Vec<usize>
    where
        F: Fn(&str, &str) -> Option<usize>,
    {
        match *self {
            Self::ParentPaths { target_type } => {
                let name = resource.name_value(namevar);
                Path::new(name)
                    .ancestors()
                    .skip(1)
                    .filter_map(|dir| dir.to_str())
                    .filter(|dir| !dir.is_empty())
                    .find_map(|dir| lookup(target_type, dir))
                    .into_iter()
                    .collect()
            }
            Self::PropertyValues {
                property,
                target_type,
            } => resource
                .get(property)
                .map(|value| {
                    value
                        .items()
                        .into_iter()
                        .filter_map(|name| lookup(target_type, name))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn lookup(type_name: &str, name: &str) -> Option<usize> {
        match (type_name, name) {
            ("file", "/etc") => Some(0),
            ("file", "/etc/ssh") => Some(1),
            ("group", "wheel") => Some(2),
            ("group", "adm") => Some(3),
            _ => None,
        }
    }

    #[test]
    fn test_parent_paths_nearest_only() {
        let rule = AutoRequire::parent_paths("file");
        let res = Resource::new("file", "sshd").with("path", "/etc/ssh/sshd_config");
        assert_eq!(rule.targets(&res, "path", lookup), vec![1]);

        let res = Resource::new("file", "/etc/hosts");
        assert_eq!(rule.targets(&res, "path", lookup), vec![0]);

        let res = Resource::new("file", "/var/log/x");
        assert!(rule.targets(&res, "path", lookup).is_empty());
    }

    #[test]
    fn test_property_values() {
        let rule = AutoRequire::property("groups", "group");
        let res = Resource::new("user", "bob").with("groups", Value::list(["wheel", "staff", "adm"]));
        assert_eq!(rule.targets(&res, "name", lookup), vec![2, 3]);

        let res = Resource::new("user", "bob");
        assert!(rule.targets(&res, "name", lookup).is_empty());
    }
}
