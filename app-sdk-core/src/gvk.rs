//! Type information structs for runtime-registered resource kinds.
use std::str::FromStr;

use crate::metadata::TypeMeta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to parse group version: {0}")]
/// Failed to parse group version
pub struct ParseGroupVersionError(pub String);

/// Core identity of an API resource family.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    /// API group
    #[serde(default)]
    pub group: String,
    /// Version
    pub version: String,
    /// Kind
    pub kind: String,
}

impl GroupVersionKind {
    /// Construct from explicit group, version, and kind
    pub fn gvk(group_: &str, version_: &str, kind_: &str) -> Self {
        Self {
            group: group_.to_string(),
            version: version_.to_string(),
            kind: kind_.to_string(),
        }
    }

    /// Generate the apiVersion string used in a kind's wire form
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Project down to the group/version pair
    pub fn group_version(&self) -> GroupVersion {
        GroupVersion {
            group: self.group.clone(),
            version: self.version.clone(),
        }
    }
}

impl TryFrom<&TypeMeta> for GroupVersionKind {
    type Error = ParseGroupVersionError;

    fn try_from(tm: &TypeMeta) -> Result<Self, Self::Error> {
        Ok(GroupVersion::from_str(&tm.api_version)?.with_kind(&tm.kind))
    }
}

/// Core information about a family of API resources
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    /// API group
    #[serde(default)]
    pub group: String,
    /// Version
    pub version: String,
}

impl GroupVersion {
    /// Construct from explicit group and version
    pub fn gv(group_: &str, version_: &str) -> Self {
        Self {
            group: group_.to_string(),
            version: version_.to_string(),
        }
    }

    /// Upgrade a GroupVersion to a GroupVersionKind
    pub fn with_kind(self, kind: &str) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group,
            version: self.version,
            kind: kind.into(),
        }
    }

    /// Generate the apiVersion string used in a kind's wire form
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl FromStr for GroupVersion {
    type Err = ParseGroupVersionError;

    fn from_str(gv: &str) -> Result<Self, Self::Err> {
        let gvsplit = gv.splitn(2, '/').collect::<Vec<_>>();
        let (group, version) = match *gvsplit.as_slice() {
            [g, v] => (g.to_string(), v.to_string()), // standard case
            [v] => ("".to_string(), v.to_string()),   // core v1 case
            _ => return Err(ParseGroupVersionError(gv.into())),
        };
        Ok(Self { group, version })
    }
}

/// Represents a type-erased resource with its URL-path form.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    /// API group
    #[serde(default)]
    pub group: String,
    /// Version
    pub version: String,
    /// Resource (plural name)
    pub resource: String,
}

impl GroupVersionResource {
    /// Set the api group, version, and the plural resource name.
    pub fn gvr(group_: &str, version_: &str, resource_: &str) -> Self {
        Self {
            group: group_.to_string(),
            version: version_.to_string(),
            resource: resource_.to_string(),
        }
    }

    /// Generate the apiVersion string used in a kind's wire form
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_from_type_meta() {
        let tm = TypeMeta {
            api_version: "dashboards.grafana.com/v1".into(),
            kind: "Dashboard".into(),
        };
        let gvk = GroupVersionKind::try_from(&tm).unwrap();
        assert_eq!(gvk.group, "dashboards.grafana.com");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Dashboard");
        assert_eq!(gvk.api_version(), "dashboards.grafana.com/v1");
    }

    #[test]
    fn core_group_api_version() {
        let gv = GroupVersion::from_str("v1").unwrap();
        assert_eq!(gv.group, "");
        assert_eq!(gv.api_version(), "v1");
    }
}
