//! Property values
//!
//! A desired or current property value is either a single scalar or an
//! ordered set of scalars (e.g. the supplementary groups of a user). Catalog
//! files may spell scalars as strings, integers or booleans; they are all
//! normalised to strings here so that comparison is uniform.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Property name → value
pub type PropertyMap = BTreeMap<String, Value>;

/// A property value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    /// Build a list value
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// The scalar string, if this is a scalar
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::List(_) => None,
        }
    }

    /// All items; a scalar is a one-item list
    pub fn items(&self) -> Vec<&str> {
        match self {
            Self::Scalar(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Interpret the value as a boolean (`true`/`yes`/`1`)
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_str()?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    /// Convert a scalar into a list by splitting on commas
    ///
    /// Used for command-line input where `groups=wheel,adm` names a list.
    pub fn into_list(self) -> Self {
        match self {
            Self::Scalar(s) if s.is_empty() => Self::List(Vec::new()),
            Self::Scalar(s) => Self::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            list => list,
        }
    }

    /// Compare two values treating lists as unordered sets
    pub fn same_set(&self, other: &Self) -> bool {
        let mut left = self.items();
        let mut right = other.items();
        left.sort_unstable();
        left.dedup();
        right.sort_unstable();
        right.dedup();
        left == right
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Scalar(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Scalar(b.to_string())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Scalar(n.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(s) => serializer.serialize_str(s),
            Self::List(items) => items.serialize(serializer),
        }
    }
}

/// Loosely-typed scalar as it appears in TOML or JSON
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawScalar {
    fn into_string(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Scalar(RawScalar),
    List(Vec<RawScalar>),
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawValue::deserialize(deserializer) {
            Ok(RawValue::Scalar(s)) => Ok(Self::Scalar(s.into_string())),
            Ok(RawValue::List(items)) => Ok(Self::List(
                items.into_iter().map(RawScalar::into_string).collect(),
            )),
            Err(_) => Err(de::Error::custom(
                "expected a string, number, boolean or a list of those",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_list_splits_commas() {
        let value = Value::from("wheel, adm,,staff").into_list();
        assert_eq!(value, Value::list(["wheel", "adm", "staff"]));
        assert_eq!(Value::from("").into_list(), Value::List(Vec::new()));
    }

    #[test]
    fn test_same_set_ignores_order_and_duplicates() {
        let a = Value::list(["adm", "wheel"]);
        let b = Value::list(["wheel", "adm", "adm"]);
        assert!(a.same_set(&b));
        assert!(!a.same_set(&Value::list(["adm"])));
        assert!(Value::from("adm").same_set(&Value::list(["adm"])));
    }

    #[test]
    fn test_deserialize_mixed_scalars() {
        let map: PropertyMap = toml::from_str(
            r#"
uid = 1001
managehome = true
groups = ["wheel", 10]
shell = "/bin/sh"
"#,
        )
        .unwrap();
        assert_eq!(map["uid"], Value::from("1001"));
        assert_eq!(map["managehome"].as_bool(), Some(true));
        assert_eq!(map["groups"], Value::list(["wheel", "10"]));
        assert_eq!(map["shell"].as_str(), Some("/bin/sh"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("present").to_string(), "present");
        assert_eq!(Value::list(["a", "b"]).to_string(), "[a, b]");
    }
}
