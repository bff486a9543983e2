use serde::{Deserialize, Serialize};

/// Identifies an upstream capability as `<resourceType>:<provider>`.
///
/// Both segments are non-empty and contain no further colons. The string form is
/// what permission rows, secrets, and plugin ids are keyed by, so parsing is strict:
/// anything that does not round-trip is rejected at the write site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    resource_type: String,
    provider: String,
}

impl ResourceId {
    pub fn new(resource_type: &str, provider: &str) -> Result<Self, ResourceIdParseError> {
        if resource_type.is_empty() || provider.is_empty() {
            return Err(ResourceIdParseError::EmptySegment);
        }
        if resource_type.contains(':') || provider.contains(':') {
            return Err(ResourceIdParseError::Malformed);
        }
        Ok(ResourceId {
            resource_type: resource_type.to_string(),
            provider: provider.to_string(),
        })
    }

    /// The resource type segment (e.g. `llm`).
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The provider segment (e.g. `groq`).
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceIdParseError {
    /// The id has no colon, or more than one.
    #[error("invalid resource id, expected <resourceType>:<provider>")]
    Malformed,
    /// One of the two segments is empty.
    #[error("resource id segments must be non-empty")]
    EmptySegment,
}

impl std::str::FromStr for ResourceId {
    type Err = ResourceIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ty), Some(provider), None) => ResourceId::new(ty, provider),
            _ => Err(ResourceIdParseError::Malformed),
        }
    }
}

impl core::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.provider)
    }
}

impl Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
