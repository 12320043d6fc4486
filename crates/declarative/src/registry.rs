//! Resource types and provider selection
//!
//! The registry maps each resource type to its schema (namevar, properties,
//! autorequire rules, identity parameters) and its candidate providers.
//! Selection is a pure function of the resource, the registered providers
//! and the host facts.

use crate::autorequire::AutoRequire;
use crate::error::{ResourceError, SelectionError, ValidationError};
use crate::facts::HostFacts;
use crate::privilege::{IdSpec, IdentityTarget};
use crate::provider::{Feature, ProviderEntry};
use crate::resource::Resource;
use crate::value::Value;

/// Shape of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    List,
}

/// Schema of one property or parameter
///
/// Properties are compared against current state and synced; parameters
/// only influence how the provider works (e.g. `managehome`).
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: ValueKind,
    pub is_parameter: bool,
    /// Provider feature needed to manage this property at all
    pub feature: Option<Feature>,
    /// Accepted values; `None` accepts anything
    pub values: Option<&'static [&'static str]>,
    /// Values outside `values` are accepted when the provider has this feature
    pub otherwise_requires: Option<Feature>,
    /// Desired value when the resource does not declare one
    pub default: Option<&'static str>,
    /// Rejects malformed values with a reason
    pub check: Option<fn(&str) -> Result<(), String>>,
}

impl PropertySpec {
    pub fn property(name: &'static str) -> Self {
        Self {
            name,
            kind: ValueKind::Scalar,
            is_parameter: false,
            feature: None,
            values: None,
            otherwise_requires: None,
            default: None,
            check: None,
        }
    }

    pub fn parameter(name: &'static str) -> Self {
        Self {
            is_parameter: true,
            ..Self::property(name)
        }
    }

    pub fn list(mut self) -> Self {
        self.kind = ValueKind::List;
        self
    }

    pub fn requires(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn values(mut self, values: &'static [&'static str]) -> Self {
        self.values = Some(values);
        self
    }

    pub fn otherwise_requires(mut self, feature: Feature) -> Self {
        self.otherwise_requires = Some(feature);
        self
    }

    pub fn default_value(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    pub fn check(mut self, check: fn(&str) -> Result<(), String>) -> Self {
        self.check = Some(check);
        self
    }

    fn check_value(&self, value: &str) -> Result<(), ValidationError> {
        match self.check.map(|check| check(value)) {
            Some(Err(reason)) => Err(ValidationError::InvalidValue {
                property: self.name.to_string(),
                value: value.to_string(),
                reason,
            }),
            _ => Ok(()),
        }
    }
}

/// How a type's target identity is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAsMode {
    /// The engine wraps mutating provider calls in a scoped identity switch
    Scoped,
    /// The identity is handed to the provider; commands it spawns run as it
    Spawn,
}

/// Parameters naming the identity a resource is applied as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAs {
    pub user_param: &'static str,
    pub group_param: &'static str,
    pub mode: RunAsMode,
}

impl RunAs {
    /// The target identity declared by `resource`, if any
    pub fn target(&self, resource: &Resource) -> Option<IdentityTarget> {
        let user = resource.get_str(self.user_param).map(IdSpec::parse);
        let group = resource.get_str(self.group_param).map(IdSpec::parse);
        if user.is_none() && group.is_none() {
            return None;
        }
        Some(IdentityTarget { user, group })
    }
}

/// A resource type: schema plus candidate providers
#[derive(Debug, Clone)]
pub struct ResourceType {
    pub name: &'static str,
    /// Property naming the managed object; defaults to the title
    pub namevar: &'static str,
    pub properties: Vec<PropertySpec>,
    pub autorequire: Vec<AutoRequire>,
    pub run_as: Option<RunAs>,
    /// Candidates in registration order
    pub providers: Vec<ProviderEntry>,
}

impl ResourceType {
    pub fn new(name: &'static str, namevar: &'static str) -> Self {
        Self {
            name,
            namevar,
            properties: vec![PropertySpec::parameter(namevar)],
            autorequire: Vec::new(),
            run_as: None,
            providers: Vec::new(),
        }
    }

    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    /// Check the namevar, whether it comes from the title or is declared
    pub fn check_name(mut self, check: fn(&str) -> Result<(), String>) -> Self {
        let namevar = self.namevar;
        if let Some(spec) = self.properties.iter_mut().find(|p| p.name == namevar) {
            spec.check = Some(check);
        }
        self
    }

    pub fn autorequire(mut self, rule: AutoRequire) -> Self {
        self.autorequire.push(rule);
        self
    }

    pub fn run_as(mut self, run_as: RunAs) -> Self {
        self.run_as = Some(run_as);
        self
    }

    pub fn provider(mut self, entry: ProviderEntry) -> Self {
        self.providers.push(entry);
        self
    }

    pub fn spec(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Properties compared against current state, in schema order
    pub fn managed_properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter().filter(|p| !p.is_parameter)
    }

    /// Desired value of `spec` for `resource`, falling back to its default
    pub fn desired(&self, resource: &Resource, spec: &PropertySpec) -> Option<Value> {
        resource
            .get(spec.name)
            .cloned()
            .or_else(|| spec.default.map(Value::from))
    }

    /// Coerce a raw command-line value to the property's kind
    pub fn coerce(&self, property: &str, value: Value) -> Value {
        match self.spec(property) {
            Some(spec) if spec.kind == ValueKind::List => value.into_list(),
            _ => value,
        }
    }

    /// Choose the provider for this type
    ///
    /// An explicit name must match a registered provider that is suitable on
    /// this host. Otherwise the suitable providers are ranked by
    /// [`ProviderEntry::specificity`]; ties go to the earliest registered.
    pub fn select_provider(
        &self,
        facts: &HostFacts,
        explicit: Option<&str>,
    ) -> Result<&ProviderEntry, SelectionError> {
        if let Some(name) = explicit {
            let entry = self
                .providers
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| SelectionError::UnknownProvider {
                    type_name: self.name.to_string(),
                    name: name.to_string(),
                })?;
            let unmet = entry.unmet(facts);
            if !unmet.is_empty() {
                return Err(SelectionError::Unsuitable {
                    name: name.to_string(),
                    reason: unmet.join("; "),
                });
            }
            return Ok(entry);
        }

        let mut best: Option<&ProviderEntry> = None;
        for entry in self.providers.iter().filter(|p| p.is_suitable(facts)) {
            match best {
                Some(current) if entry.specificity(facts) <= current.specificity(facts) => {}
                _ => best = Some(entry),
            }
        }

        best.ok_or_else(|| SelectionError::NoSuitable {
            type_name: self.name.to_string(),
            family: facts.family,
            tried: self.providers.iter().map(|p| p.name).collect(),
        })
    }

    /// Check declared properties against the schema and provider features
    pub fn validate(
        &self,
        resource: &Resource,
        entry: &ProviderEntry,
    ) -> Result<(), ValidationError> {
        if let Some(spec) = self.spec(self.namevar) {
            spec.check_value(resource.name_value(self.namevar))?;
        }

        for (name, value) in resource.properties() {
            let spec = self
                .spec(name)
                .ok_or_else(|| ValidationError::UnknownProperty {
                    property: name.clone(),
                })?;

            if spec.name != self.namevar {
                for item in value.items() {
                    spec.check_value(item)?;
                }
            }

            if spec.kind == ValueKind::Scalar && value.is_list() {
                return Err(ValidationError::InvalidValue {
                    property: name.clone(),
                    value: value.to_string(),
                    reason: "expected a single value".to_string(),
                });
            }

            if let Some(feature) = spec.feature
                && !entry.has_feature(feature)
            {
                return Err(ValidationError::UnsupportedFeature {
                    property: name.clone(),
                    feature,
                    provider: entry.name,
                });
            }

            if let Some(allowed) = spec.values {
                for item in value.items() {
                    if allowed.contains(&item) {
                        continue;
                    }
                    match spec.otherwise_requires {
                        Some(feature) if entry.has_feature(feature) => {}
                        Some(feature) => {
                            return Err(ValidationError::UnsupportedFeature {
                                property: format!("{name} => {item}"),
                                feature,
                                provider: entry.name,
                            });
                        }
                        None => {
                            return Err(ValidationError::InvalidValue {
                                property: name.clone(),
                                value: item.to_string(),
                                reason: format!("expected one of {}", allowed.join(", ")),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// All known resource types
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: Vec<ResourceType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any type of the same name
    pub fn register(&mut self, ty: ResourceType) {
        self.types.retain(|t| t.name != ty.name);
        self.types.push(ty);
    }

    pub fn with(mut self, ty: ResourceType) -> Self {
        self.register(ty);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ResourceType> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn types(&self) -> &[ResourceType] {
        &self.types
    }

    /// Look up the resource's type, choose its provider and validate it
    pub fn resolve(
        &self,
        resource: &Resource,
        facts: &HostFacts,
    ) -> Result<(&ResourceType, &ProviderEntry), ResourceError> {
        let ty = self
            .get(resource.type_name())
            .ok_or_else(|| SelectionError::UnknownType(resource.type_name().to_string()))?;
        let entry = ty.select_provider(facts, resource.meta().provider.as_deref())?;
        ty.validate(resource, entry)?;
        Ok((ty, entry))
    }

    /// Every command named in a provider confine, for fact detection
    pub fn confined_commands(&self) -> Vec<&'static str> {
        let mut commands: Vec<&'static str> = self
            .types
            .iter()
            .flat_map(|t| t.providers.iter())
            .flat_map(|p| p.confines.iter())
            .filter_map(|c| match c {
                crate::provider::Confine::Command(command) => Some(*command),
                _ => None,
            })
            .collect();
        commands.sort_unstable();
        commands.dedup();
        commands
    }
}
