//! Per-property diff between current and desired state

use crate::provider::Provider;
use crate::registry::ResourceType;
use crate::resource::Resource;
use crate::value::{PropertyMap, Value};
use serde::Serialize;

/// The property that controls existence
pub const ENSURE: &str = "ensure";

/// The `ensure` value of a missing resource
pub const ABSENT: &str = "absent";

/// One out-of-sync property
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyChange {
    pub property: String,
    /// `None` when the provider reported no value
    pub current: Option<Value>,
    pub desired: Value,
}

impl PropertyChange {
    pub fn new(property: impl Into<String>, current: Option<Value>, desired: Value) -> Self {
        Self {
            property: property.into(),
            current,
            desired,
        }
    }

    /// Whether this change creates the resource
    pub fn is_creation(&self) -> bool {
        self.property == ENSURE && is_absent(self.current.as_ref())
    }

    /// Whether this change removes the resource
    pub fn is_removal(&self) -> bool {
        self.property == ENSURE && self.desired.as_str() == Some(ABSENT)
    }

    /// Human-readable description of the change
    pub fn message(&self) -> String {
        if self.is_removal() {
            return "removed".to_string();
        }
        if self.is_creation() {
            return match self.desired.as_str() {
                Some("present") | None => "created".to_string(),
                Some(kind) => format!("created as {kind}"),
            };
        }
        match &self.current {
            Some(current) => format!(
                "{} changed '{}' to '{}'",
                self.property, current, self.desired
            ),
            None => format!("defined '{}' as '{}'", self.property, self.desired),
        }
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    value.and_then(Value::as_str) == Some(ABSENT)
}

/// Compute the out-of-sync properties of a resource
///
/// Properties are visited in schema order. When the resource must be
/// created or removed, only the `ensure` change is returned: the provider
/// creates the resource with all declared properties, and nothing else can
/// be compared on a resource that is about to go.
pub fn compute_changes(
    ty: &ResourceType,
    resource: &Resource,
    current: &PropertyMap,
    provider: &dyn Provider,
) -> Vec<PropertyChange> {
    let current_ensure = current.get(ENSURE);
    let desired_ensure = ty
        .spec(ENSURE)
        .and_then(|spec| ty.desired(resource, spec));

    if is_absent(current_ensure) {
        return match desired_ensure {
            Some(desired) if desired.as_str() != Some(ABSENT) => {
                vec![PropertyChange::new(ENSURE, current_ensure.cloned(), desired)]
            }
            _ => {
                log::debug!(
                    "{}: absent and not ensured present, nothing to manage",
                    resource.reference()
                );
                Vec::new()
            }
        };
    }

    if let Some(desired) = &desired_ensure
        && desired.as_str() == Some(ABSENT)
    {
        return vec![PropertyChange::new(
            ENSURE,
            current_ensure.cloned(),
            desired.clone(),
        )];
    }

    let mut changes = Vec::new();
    for spec in ty.managed_properties() {
        let Some(desired) = ty.desired(resource, spec) else {
            continue;
        };
        let current_value = current.get(spec.name);
        if !provider.is_in_sync(spec.name, current_value, &desired) {
            changes.push(PropertyChange::new(
                spec.name,
                current_value.cloned(),
                desired,
            ));
        }
    }
    changes
}
