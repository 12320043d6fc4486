//! Resource declarations
//!
//! A [`Resource`] is one unit of desired state, identified by its type and
//! title. Its desired properties are fixed once declared; the engine only
//! ever reads them.

use crate::value::{PropertyMap, Value};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Reference to a resource: `type[title]`
///
/// Type names are case-insensitive and stored lowercase, so `File[/tmp/x]`
/// and `file[/tmp/x]` name the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub type_name: String,
    pub title: String,
}

impl ResourceRef {
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into().to_ascii_lowercase(),
            title: title.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = self.type_name.chars();
        match chars.next() {
            Some(first) => write!(
                f,
                "{}{}[{}]",
                first.to_ascii_uppercase(),
                chars.as_str(),
                self.title
            ),
            None => write!(f, "[{}]", self.title),
        }
    }
}

/// Error parsing a `type[title]` reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource reference '{0}', expected Type[title]")]
pub struct InvalidReference(pub String);

impl FromStr for ResourceRef {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let open = s.find('[').ok_or_else(|| InvalidReference(s.to_string()))?;
        let title = s[open + 1..]
            .strip_suffix(']')
            .ok_or_else(|| InvalidReference(s.to_string()))?;
        let type_name = &s[..open];

        if type_name.is_empty() || title.is_empty() {
            return Err(InvalidReference(s.to_string()));
        }

        Ok(Self::new(type_name, title))
    }
}

impl Serialize for ResourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Metaparameters: relationships and per-resource engine overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metaparams {
    /// Resources this one must be applied before
    #[serde(default, deserialize_with = "one_or_many")]
    pub before: Vec<ResourceRef>,
    /// Resources that must be applied before this one
    #[serde(default, deserialize_with = "one_or_many")]
    pub require: Vec<ResourceRef>,
    /// Resources applied after this one and refreshed when it changes
    #[serde(default, deserialize_with = "one_or_many")]
    pub notify: Vec<ResourceRef>,
    /// Resources applied before this one; a change in any refreshes this one
    #[serde(default, deserialize_with = "one_or_many")]
    pub subscribe: Vec<ResourceRef>,
    /// Override of the run-wide noop setting
    #[serde(default)]
    pub noop: Option<bool>,
    /// Explicit provider name, bypassing suitability-based selection
    #[serde(default)]
    pub provider: Option<String>,
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ResourceRef>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let refs = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    };
    refs.iter()
        .map(|s| s.parse().map_err(de::Error::custom))
        .collect()
}

/// A declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    reference: ResourceRef,
    properties: PropertyMap,
    meta: Metaparams,
}

impl Resource {
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            reference: ResourceRef::new(type_name, title),
            properties: PropertyMap::new(),
            meta: Metaparams::default(),
        }
    }

    /// Build from already-parsed parts
    pub fn from_parts(reference: ResourceRef, properties: PropertyMap, meta: Metaparams) -> Self {
        Self {
            reference,
            properties,
            meta,
        }
    }

    /// Set a desired property
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_require(mut self, target: ResourceRef) -> Self {
        self.meta.require.push(target);
        self
    }

    pub fn with_before(mut self, target: ResourceRef) -> Self {
        self.meta.before.push(target);
        self
    }

    pub fn with_notify(mut self, target: ResourceRef) -> Self {
        self.meta.notify.push(target);
        self
    }

    pub fn with_subscribe(mut self, target: ResourceRef) -> Self {
        self.meta.subscribe.push(target);
        self
    }

    pub fn with_noop(mut self, noop: bool) -> Self {
        self.meta.noop = Some(noop);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.meta.provider = Some(provider.into());
        self
    }

    pub fn reference(&self) -> &ResourceRef {
        &self.reference
    }

    pub fn type_name(&self) -> &str {
        &self.reference.type_name
    }

    pub fn title(&self) -> &str {
        &self.reference.title
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn meta(&self) -> &Metaparams {
        &self.meta
    }

    /// Desired value of a property
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Desired scalar value of a property
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Desired boolean parameter, `false` when unset
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// The resource's name: the namevar property when set, else the title
    pub fn name_value(&self, namevar: &str) -> &str {
        self.get_str(namevar).unwrap_or(&self.reference.title)
    }
}
