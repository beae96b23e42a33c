//! The SDK metadata model and its mapping onto Kubernetes `ObjectMeta`.
//!
//! Kubernetes object metadata only persists a fixed set of fields. The SDK
//! carries a richer view ([`CommonMetadata`] plus free-form custom metadata),
//! and the extra fields are stored in annotations under a reserved prefix so
//! they survive a round-trip through the API server unchanged.
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, ObjectMeta, OwnerReference, Time};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::Error, gvk::GroupVersionKind};

/// The empty-string namespace sentinel selecting all namespaces on list/watch
/// calls, and the required namespace for cluster-scoped operations.
pub const NAMESPACE_ALL: &str = "";

/// The annotation prefix under which all SDK-managed metadata is stored.
///
/// Every key below this prefix is owned by the SDK and may be rewritten by
/// the metadata translation and the opinionated admission layer.
pub const RESERVED_ANNOTATION_PREFIX: &str = "grafana.com/";

/// Annotation key holding the username that created the object
pub const ANNOTATION_CREATED_BY: &str = "grafana.com/createdBy";
/// Annotation key holding the username that last updated the object
pub const ANNOTATION_UPDATED_BY: &str = "grafana.com/updatedBy";
/// Annotation key holding the RFC 3339 timestamp of the last update
pub const ANNOTATION_UPDATE_TIMESTAMP: &str = "grafana.com/updateTimestamp";

/// The reserved label stamped on every object written through the typed
/// client and the opinionated mutating admission layer, recording the kind
/// version the object was last written as. Last writer wins.
pub const VERSION_LABEL: &str = "grafana-app-sdk-resource-version";

/// Key in [`CommonMetadata::extra_fields`] carrying the surviving
/// (non-reserved) Kubernetes annotations map.
pub const EXTRA_FIELD_ANNOTATIONS: &str = "annotations";
/// Key in [`CommonMetadata::extra_fields`] carrying Kubernetes ownerReferences.
pub const EXTRA_FIELD_OWNER_REFERENCES: &str = "ownerReferences";
/// Key in [`CommonMetadata::extra_fields`] carrying Kubernetes managedFields.
pub const EXTRA_FIELD_MANAGED_FIELDS: &str = "managedFields";
/// Key in [`CommonMetadata::extra_fields`] carrying `metadata.generateName`.
pub const EXTRA_FIELD_GENERATE_NAME: &str = "generateName";
/// Key in [`CommonMetadata::extra_fields`] carrying
/// `metadata.deletionGracePeriodSeconds`.
pub const EXTRA_FIELD_DELETION_GRACE_PERIOD: &str = "deletionGracePeriodSeconds";

/// Type information that is flattened into every wire object
#[derive(Deserialize, Serialize, Clone, Default, Debug, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// The version of the API
    pub api_version: String,

    /// The name of the API
    pub kind: String,
}

/// The `(namespace, name)` pair identifying an object within its kind.
///
/// For cluster-scoped kinds the namespace must be [`NAMESPACE_ALL`].
#[derive(Deserialize, Serialize, Clone, Default, Debug, Eq, PartialEq, Hash)]
pub struct ObjectIdentifier {
    /// Namespace, empty for cluster-scoped objects
    #[serde(default)]
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectIdentifier {
    /// Identifier for a namespaced object
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Identifier for a cluster-scoped object
    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: NAMESPACE_ALL.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// An [`ObjectIdentifier`] carrying full kind information, used by the
/// schemaless client where no `Kind` descriptor is available.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FullIdentifier {
    /// Namespace and name
    pub identifier: ObjectIdentifier,
    /// Group, version and kind of the target object
    pub gvk: GroupVersionKind,
    /// URL-path (plural) form of the kind, may be empty when the caller
    /// wants it discovered
    pub plural: String,
}

/// Object identity: group/version/kind plus namespace and name.
///
/// Mutable only during construction and wire translation.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct StaticMetadata {
    /// API group
    #[serde(default)]
    pub group: String,
    /// Version within the group
    pub version: String,
    /// Kind name
    pub kind: String,
    /// Namespace, empty for cluster-scoped objects
    #[serde(default)]
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl StaticMetadata {
    /// The `(namespace, name)` identifier of the object
    pub fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// The group/version/kind of the object
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// The apiVersion string of the object's wire form
    pub fn api_version(&self) -> String {
        self.gvk().api_version()
    }
}

/// The SDK's canonical metadata view of an object: a superset of what
/// Kubernetes `ObjectMeta` natively stores.
///
/// `created_by`, `updated_by` and `update_timestamp` are persisted in
/// reserved annotations; everything Kubernetes stores natively but the SDK
/// does not model as a first-class field lands in [`extra_fields`](Self::extra_fields).
#[derive(Clone, Default, Debug, PartialEq)]
pub struct CommonMetadata {
    /// Server-assigned unique id
    pub uid: String,
    /// Server-assigned resource version for optimistic concurrency
    pub resource_version: String,
    /// Spec generation, incremented by the server on spec changes
    pub generation: i64,
    /// Object labels
    pub labels: BTreeMap<String, String>,
    /// Finalizer names blocking physical deletion
    pub finalizers: Vec<String>,
    /// Server-assigned creation time
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set when the object is pending deletion
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// SDK-managed last-update time (reserved annotation)
    pub update_timestamp: Option<DateTime<Utc>>,
    /// SDK-managed creator identity (reserved annotation)
    pub created_by: String,
    /// SDK-managed last-updater identity (reserved annotation)
    pub updated_by: String,
    /// Kubernetes metadata without a first-class SDK field:
    /// surviving annotations, ownerReferences, managedFields.
    pub extra_fields: BTreeMap<String, Value>,
}

/// Metadata-only view of an object, as returned by metadata requests.
#[derive(Deserialize, Serialize, Clone, Default, Debug)]
pub struct PartialObjectMetadata {
    /// Type information (`meta.k8s.io/v1 PartialObjectMetadata` on the wire)
    #[serde(flatten, default)]
    pub types: TypeMeta,
    /// The object's Kubernetes metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
}

/// Formats a timestamp the way the reserved annotations store it:
/// RFC 3339 with nanoseconds where present, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::MalformedObject(format!("invalid timestamp annotation {raw:?}: {e}")))
}

/// Extracts the SDK metadata view from a Kubernetes `ObjectMeta`.
///
/// Returns the common metadata and the custom metadata entries found under
/// the reserved annotation prefix. Inverse of [`build_object_meta`].
pub fn common_metadata_from_object_meta(
    meta: &ObjectMeta,
) -> Result<(CommonMetadata, BTreeMap<String, Value>), Error> {
    let mut common = CommonMetadata {
        uid: meta.uid.clone().unwrap_or_default(),
        resource_version: meta.resource_version.clone().unwrap_or_default(),
        generation: meta.generation.unwrap_or(0),
        labels: meta.labels.clone().unwrap_or_default(),
        finalizers: meta.finalizers.clone().unwrap_or_default(),
        creation_timestamp: meta.creation_timestamp.as_ref().map(|t| t.0),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(|t| t.0),
        ..CommonMetadata::default()
    };

    let mut custom = BTreeMap::new();
    let mut surviving = BTreeMap::new();
    if let Some(annotations) = &meta.annotations {
        for (key, value) in annotations {
            match key.strip_prefix(RESERVED_ANNOTATION_PREFIX) {
                Some("createdBy") => common.created_by = value.clone(),
                Some("updatedBy") => common.updated_by = value.clone(),
                Some("updateTimestamp") => {
                    if !value.is_empty() {
                        common.update_timestamp = Some(parse_timestamp(value)?);
                    }
                }
                Some(custom_key) => {
                    custom.insert(custom_key.to_string(), Value::String(value.clone()));
                }
                None => {
                    surviving.insert(key.clone(), value.clone());
                }
            }
        }
    }
    if !surviving.is_empty() {
        common.extra_fields.insert(
            EXTRA_FIELD_ANNOTATIONS.into(),
            serde_json::to_value(surviving)?,
        );
    }
    if let Some(refs) = &meta.owner_references {
        if !refs.is_empty() {
            common
                .extra_fields
                .insert(EXTRA_FIELD_OWNER_REFERENCES.into(), serde_json::to_value(refs)?);
        }
    }
    if let Some(fields) = &meta.managed_fields {
        if !fields.is_empty() {
            common
                .extra_fields
                .insert(EXTRA_FIELD_MANAGED_FIELDS.into(), serde_json::to_value(fields)?);
        }
    }
    if let Some(generate_name) = &meta.generate_name {
        common.extra_fields.insert(
            EXTRA_FIELD_GENERATE_NAME.into(),
            Value::String(generate_name.clone()),
        );
    }
    if let Some(grace) = meta.deletion_grace_period_seconds {
        common
            .extra_fields
            .insert(EXTRA_FIELD_DELETION_GRACE_PERIOD.into(), grace.into());
    }
    Ok((common, custom))
}

/// Builds the Kubernetes `ObjectMeta` for an object from its SDK metadata.
///
/// The annotations map is rebuilt from the surviving user annotations
/// stashed in `extra_fields`, the reserved entries for `createdBy`,
/// `updatedBy` and a non-zero `updateTimestamp`, and one entry per custom
/// metadata key. With `custom_is_any_type` set, non-string custom values are
/// stringified (primitives directly, composites as JSON); without it they
/// are rejected.
pub fn build_object_meta(
    static_md: &StaticMetadata,
    common: &CommonMetadata,
    custom: &BTreeMap<String, Value>,
    custom_is_any_type: bool,
) -> Result<ObjectMeta, Error> {
    let mut annotations: BTreeMap<String, String> =
        match common.extra_fields.get(EXTRA_FIELD_ANNOTATIONS) {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                Error::MalformedObject(format!("extraFields annotations is not a string map: {e}"))
            })?,
            None => BTreeMap::new(),
        };
    annotations.insert(ANNOTATION_CREATED_BY.into(), common.created_by.clone());
    annotations.insert(ANNOTATION_UPDATED_BY.into(), common.updated_by.clone());
    if let Some(ts) = &common.update_timestamp {
        annotations.insert(ANNOTATION_UPDATE_TIMESTAMP.into(), format_timestamp(ts));
    }
    for (key, value) in custom {
        annotations.insert(
            format!("{RESERVED_ANNOTATION_PREFIX}{key}"),
            stringify_custom_value(key, value, custom_is_any_type)?,
        );
    }

    let owner_references = match common.extra_fields.get(EXTRA_FIELD_OWNER_REFERENCES) {
        Some(v) => Some(
            serde_json::from_value::<Vec<OwnerReference>>(v.clone()).map_err(|e| {
                Error::MalformedObject(format!("extraFields ownerReferences is malformed: {e}"))
            })?,
        ),
        None => None,
    };
    let managed_fields = match common.extra_fields.get(EXTRA_FIELD_MANAGED_FIELDS) {
        Some(v) => Some(
            serde_json::from_value::<Vec<ManagedFieldsEntry>>(v.clone()).map_err(|e| {
                Error::MalformedObject(format!("extraFields managedFields is malformed: {e}"))
            })?,
        ),
        None => None,
    };

    let generate_name = common
        .extra_fields
        .get(EXTRA_FIELD_GENERATE_NAME)
        .and_then(Value::as_str)
        .map(str::to_string);
    let deletion_grace_period_seconds = common
        .extra_fields
        .get(EXTRA_FIELD_DELETION_GRACE_PERIOD)
        .and_then(Value::as_i64);

    Ok(ObjectMeta {
        name: Some(static_md.name.clone()),
        namespace: (!static_md.namespace.is_empty()).then(|| static_md.namespace.clone()),
        uid: (!common.uid.is_empty()).then(|| common.uid.clone()),
        resource_version: (!common.resource_version.is_empty()).then(|| common.resource_version.clone()),
        generation: (common.generation != 0).then_some(common.generation),
        labels: (!common.labels.is_empty()).then(|| common.labels.clone()),
        finalizers: (!common.finalizers.is_empty()).then(|| common.finalizers.clone()),
        creation_timestamp: common.creation_timestamp.map(Time),
        deletion_timestamp: common.deletion_timestamp.map(Time),
        annotations: Some(annotations),
        owner_references,
        managed_fields,
        generate_name,
        deletion_grace_period_seconds,
        ..ObjectMeta::default()
    })
}

fn stringify_custom_value(key: &str, value: &Value, any_type: bool) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ if !any_type => Err(Error::Validation(format!(
            "custom metadata field {key:?} must be a string"
        ))),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        composite => Ok(serde_json::to_string(composite)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_static() -> StaticMetadata {
        StaticMetadata {
            group: "dashboards.grafana.com".into(),
            version: "v1".into(),
            kind: "Dashboard".into(),
            namespace: "ns".into(),
            name: "dash".into(),
        }
    }

    #[test]
    fn object_meta_round_trips_common_metadata() {
        let ts = DateTime::parse_from_rfc3339("2023-07-06T20:49:10Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut common = CommonMetadata {
            uid: "abc-123".into(),
            resource_version: "42".into(),
            generation: 3,
            created_by: "alice".into(),
            updated_by: "bob".into(),
            update_timestamp: Some(ts),
            creation_timestamp: Some(ts),
            ..CommonMetadata::default()
        };
        common.labels.insert("app".into(), "blog".into());
        common.finalizers.push("grafana.com/cleanup".into());
        common.extra_fields.insert(
            EXTRA_FIELD_ANNOTATIONS.into(),
            json!({"kubectl.kubernetes.io/last-applied-configuration": "{}"}),
        );

        let mut custom = BTreeMap::new();
        custom.insert("sourceRepo".into(), Value::String("infra".into()));

        let meta = build_object_meta(&sample_static(), &common, &custom, true).unwrap();
        let annotations = meta.annotations.as_ref().unwrap();
        assert_eq!(annotations[ANNOTATION_CREATED_BY], "alice");
        assert_eq!(annotations[ANNOTATION_UPDATE_TIMESTAMP], "2023-07-06T20:49:10Z");
        assert_eq!(annotations["grafana.com/sourceRepo"], "infra");

        let (decoded, decoded_custom) = common_metadata_from_object_meta(&meta).unwrap();
        assert_eq!(decoded, common);
        assert_eq!(decoded_custom, custom);
    }

    #[test]
    fn reserved_identity_annotations_always_written() {
        let meta = build_object_meta(
            &sample_static(),
            &CommonMetadata::default(),
            &BTreeMap::new(),
            true,
        )
        .unwrap();
        let annotations = meta.annotations.unwrap();
        assert_eq!(annotations[ANNOTATION_CREATED_BY], "");
        assert_eq!(annotations[ANNOTATION_UPDATED_BY], "");
        assert!(!annotations.contains_key(ANNOTATION_UPDATE_TIMESTAMP));
    }

    #[test]
    fn custom_values_stringified_when_any_type() {
        let mut custom = BTreeMap::new();
        custom.insert("replicas".into(), json!(4));
        custom.insert("flags".into(), json!({"a": true}));
        let meta = build_object_meta(&sample_static(), &CommonMetadata::default(), &custom, true).unwrap();
        let annotations = meta.annotations.unwrap();
        assert_eq!(annotations["grafana.com/replicas"], "4");
        assert_eq!(annotations["grafana.com/flags"], r#"{"a":true}"#);
    }

    #[test]
    fn custom_values_rejected_without_any_type() {
        let mut custom = BTreeMap::new();
        custom.insert("replicas".into(), json!(4));
        let err = build_object_meta(&sample_static(), &CommonMetadata::default(), &custom, false)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn owner_references_stashed_in_extra_fields() {
        let meta = ObjectMeta {
            name: Some("dash".into()),
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".into(),
                kind: "Folder".into(),
                name: "parent".into(),
                uid: "u-1".into(),
                ..OwnerReference::default()
            }]),
            ..ObjectMeta::default()
        };
        let (common, _) = common_metadata_from_object_meta(&meta).unwrap();
        let refs = common.extra_fields.get(EXTRA_FIELD_OWNER_REFERENCES).unwrap();
        assert_eq!(refs[0]["name"], "parent");
    }
}
