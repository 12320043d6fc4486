//! Catalogs: ordered, uniquely-identified resource declarations
//!
//! Catalog files are TOML or JSON. Each declaration carries its `type`,
//! `title`, metaparameters and properties side by side:
//!
//! ```toml
//! [[resource]]
//! type = "group"
//! title = "admins"
//! ensure = "present"
//!
//! [[resource]]
//! type = "user"
//! title = "bob"
//! ensure = "present"
//! groups = ["admins"]
//! require = "Group[admins]"
//! ```

use crate::error::CatalogError;
use crate::resource::{Metaparams, Resource, ResourceRef};
use crate::value::{PropertyMap, Value};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Keys of a declaration that are metaparameters, not properties
const METAPARAMS: &[&str] = &["before", "require", "notify", "subscribe", "noop", "provider"];

/// Resources in declaration order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    resources: Vec<Resource>,
    index: HashMap<ResourceRef, usize>,
}

#[derive(Deserialize)]
struct RawCatalog {
    #[serde(default, alias = "resources")]
    resource: Vec<BTreeMap<String, serde_json::Value>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; a second declaration of the same type and title is rejected
    pub fn add(&mut self, resource: Resource) -> Result<(), CatalogError> {
        let reference = resource.reference().clone();
        if self.index.contains_key(&reference) {
            return Err(CatalogError::Duplicate(reference));
        }
        self.index.insert(reference, self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    pub fn from_resources(
        resources: impl IntoIterator<Item = Resource>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for resource in resources {
            catalog.add(resource)?;
        }
        Ok(catalog)
    }

    /// Load a catalog file; `.json` files are JSON, anything else TOML
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        log::debug!(
            "loaded {} resources from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = toml::from_str(content)?;
        Self::from_raw(raw)
    }

    pub fn from_json_str(content: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_str(content)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawCatalog) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for (index, entry) in raw.resource.into_iter().enumerate() {
            catalog.add(parse_declaration(index, entry)?)?;
        }
        Ok(catalog)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }

    pub fn get(&self, reference: &ResourceRef) -> Option<&Resource> {
        self.index.get(reference).map(|&i| &self.resources[i])
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn parse_declaration(
    index: usize,
    mut entry: BTreeMap<String, serde_json::Value>,
) -> Result<Resource, CatalogError> {
    let invalid = |message: String| CatalogError::Invalid { index, message };

    let mut required = |key: &str| match entry.remove(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(invalid(format!("'{key}' must be a non-empty string"))),
        None => Err(invalid(format!("missing '{key}'"))),
    };
    let type_name = required("type")?;
    let title = required("title")?;

    let mut meta = serde_json::Map::new();
    let mut properties = PropertyMap::new();
    for (key, value) in entry {
        if METAPARAMS.contains(&key.as_str()) {
            meta.insert(key, value);
        } else {
            let value: Value = serde_json::from_value(value)
                .map_err(|e| invalid(format!("property '{key}': {e}")))?;
            properties.insert(key, value);
        }
    }
    let meta: Metaparams = serde_json::from_value(serde_json::Value::Object(meta))
        .map_err(|e| invalid(e.to_string()))?;

    Ok(Resource::from_parts(
        ResourceRef::new(type_name, title),
        properties,
        meta,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CATALOG: &str = r#"
[[resource]]
type = "group"
title = "admins"
ensure = "present"

[[resource]]
type = "User"
title = "bob"
ensure = "present"
uid = 1001
groups = ["admins"]
require = "Group[admins]"
noop = true
"#;

    #[test]
    fn test_parse_toml() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);

        let bob = catalog.get(&ResourceRef::new("user", "bob")).unwrap();
        assert_eq!(bob.get_str("uid"), Some("1001"));
        assert_eq!(bob.get("groups"), Some(&Value::list(["admins"])));
        assert_eq!(bob.meta().require, vec![ResourceRef::new("group", "admins")]);
        assert_eq!(bob.meta().noop, Some(true));
        assert!(bob.get("require").is_none());
    }

    #[test]
    fn test_parse_json_resources_key() {
        let catalog = Catalog::from_json_str(
            r#"{"resources": [
                {"type": "file", "title": "/tmp/x", "ensure": "directory"},
                {"type": "exec", "title": "touch", "subscribe": ["File[/tmp/x]"]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(catalog.resources()[0].title(), "/tmp/x");
        assert_eq!(catalog.resources()[1].meta().subscribe.len(), 1);
    }

    #[test]
    fn test_duplicate_declaration() {
        let err = Catalog::from_resources([
            Resource::new("user", "bob"),
            Resource::new("User", "bob"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate(r) if r == ResourceRef::new("user", "bob")));
    }

    #[test]
    fn test_invalid_declarations() {
        let err = Catalog::from_toml_str("[[resource]]\ntitle = \"x\"\n").unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { index: 0, .. }));

        let err = Catalog::from_toml_str(
            "[[resource]]\ntype = \"user\"\ntitle = \"x\"\nrequire = \"bogus\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid resource reference"));
    }

    #[test]
    fn test_load_by_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("site.toml");
        std::fs::write(&path, CATALOG).unwrap();
        assert_eq!(Catalog::load(&path).unwrap().len(), 2);

        let missing = Catalog::load(&temp.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, CatalogError::Io { .. }));
    }
}
