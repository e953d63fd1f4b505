// Event subscription selectors: `type:resource.name`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text that does not describe a valid selector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The subscription selector format is invalid: {input:?} (expected `type:resource.name`)")]
pub struct SelectorParseError {
    input: String,
}

impl SelectorParseError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_owned(),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }
}

/// Identifies which events a subscription receives.
///
/// The wire form is `<resource_type>:<resource>.<name>`, e.g.
/// `device:0f6a2c1e-....characteristic_change`. Any component may be the
/// wildcard `*`. The resource type ends at the last `:` and the resource at
/// the first `.` after it, so names may themselves contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventSelector {
    resource_type: String,
    resource: String,
    name: String,
}

impl EventSelector {
    /// Every event for every resource.
    pub fn all() -> Self {
        Self {
            resource_type: "*".into(),
            resource: "*".into(),
            name: "*".into(),
        }
    }

    /// Build a selector from its components, trimming each one.
    pub fn new(
        resource_type: impl AsRef<str>,
        resource: impl AsRef<str>,
        name: impl AsRef<str>,
    ) -> Result<Self, SelectorParseError> {
        let resource_type = resource_type.as_ref().trim();
        let resource = resource.as_ref().trim();
        let name = name.as_ref().trim();

        let fits = !resource_type.is_empty()
            && !resource.is_empty()
            && !name.is_empty()
            && !resource.contains([':', '.'])
            && !name.contains(':');
        if !fits {
            return Err(SelectorParseError::new(&format!(
                "{resource_type}:{resource}.{name}"
            )));
        }

        Ok(Self {
            resource_type: resource_type.to_owned(),
            resource: resource.to_owned(),
            name: name.to_owned(),
        })
    }

    /// Every event of the given resource type.
    pub fn for_type(resource_type: impl AsRef<str>) -> Result<Self, SelectorParseError> {
        Self::new(resource_type, "*", "*")
    }

    /// Every event of one resource.
    pub fn for_resource(
        resource_type: impl AsRef<str>,
        resource: impl AsRef<str>,
    ) -> Result<Self, SelectorParseError> {
        Self::new(resource_type, resource, "*")
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for EventSelector {
    type Err = SelectorParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (resource_type, rest) = input
            .rsplit_once(':')
            .ok_or_else(|| SelectorParseError::new(input))?;
        let (resource, name) = rest
            .split_once('.')
            .ok_or_else(|| SelectorParseError::new(input))?;

        let (resource_type, resource, name) = (resource_type.trim(), resource.trim(), name.trim());
        if resource_type.is_empty() || resource.is_empty() || name.is_empty() {
            return Err(SelectorParseError::new(input));
        }

        Ok(Self {
            resource_type: resource_type.to_owned(),
            resource: resource.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl TryFrom<&str> for EventSelector {
    type Error = SelectorParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for EventSelector {
    type Error = SelectorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventSelector> for String {
    fn from(selector: EventSelector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for EventSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.resource_type, self.resource, self.name)
    }
}
