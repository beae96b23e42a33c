//! The object contract all domain objects satisfy, and generic implementations.
//!
//! Concrete types are selected at runtime by [`Kind`](crate::kind::Kind)
//! zero-value factories, so the contract is a dyn-capable capability trait
//! rather than an open inheritance hierarchy. Compile-time-known kinds use
//! [`TypedObject`]; schemaless consumers use [`UntypedObject`].
use std::{any::Any, collections::BTreeMap};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Error,
    metadata::{CommonMetadata, StaticMetadata},
};

/// The capability interface of a domain object.
///
/// Exposes the three metadata layers (static identity, common, custom), the
/// spec payload as JSON, and named subresources. All of wire translation,
/// the typed client, the informer and the admission pipeline operate on
/// `dyn Object`.
pub trait Object: Any + Send + Sync {
    /// Object identity (group/version/kind + namespace/name)
    fn static_metadata(&self) -> &StaticMetadata;
    /// Overwrite the identity; only during construction and translation
    fn set_static_metadata(&mut self, metadata: StaticMetadata);
    /// The SDK metadata view of the object
    fn common_metadata(&self) -> &CommonMetadata;
    /// Mutable access to the SDK metadata view
    fn common_metadata_mut(&mut self) -> &mut CommonMetadata;
    /// User-defined, kind-specific metadata fields
    fn custom_metadata(&self) -> BTreeMap<String, Value>;
    /// Set a single custom metadata field
    fn set_custom_metadata_field(&mut self, key: &str, value: Value);
    /// The spec payload as a JSON value
    fn spec(&self) -> Result<Value, Error>;
    /// Replace the spec payload from a JSON value
    fn set_spec(&mut self, spec: Value) -> Result<(), Error>;
    /// Names of the subresources currently present on the object
    fn subresource_names(&self) -> Vec<String>;
    /// A subresource by name, if present
    fn subresource(&self, name: &str) -> Option<Value>;
    /// Set a subresource by name
    fn set_subresource(&mut self, name: &str, value: Value) -> Result<(), Error>;
    /// Clone into a new boxed object of the same concrete type
    fn clone_object(&self) -> Box<dyn Object>;
    /// Upcast for concrete-type recovery
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for concrete-type recovery
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn Object> {
    fn clone(&self) -> Self {
        self.clone_object()
    }
}

impl std::fmt::Debug for dyn Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let md = self.static_metadata();
        write!(f, "Object({}/{}, {})", md.api_version(), md.kind, md.identifier())
    }
}

/// Empty struct for when a status subresource does not exist
///
/// Not using `()` because serde's `Deserialize` impl for it is too strict.
#[derive(Clone, Deserialize, Serialize, Default, Debug, PartialEq)]
pub struct NotUsed {}

/// A domain object for a kind whose spec (and optional status subresource)
/// types are known at compile time.
#[derive(Clone, Debug, Default)]
pub struct TypedObject<S, U = NotUsed> {
    static_metadata: StaticMetadata,
    common_metadata: CommonMetadata,
    custom_metadata: BTreeMap<String, Value>,
    /// The desired-state payload of the object
    pub spec: S,
    /// The status subresource, if the object carries one
    pub status: Option<U>,
}

impl<S, U> TypedObject<S, U> {
    /// A new object with the given spec and default metadata
    pub fn new(spec: S) -> Self {
        Self {
            static_metadata: StaticMetadata::default(),
            common_metadata: CommonMetadata::default(),
            custom_metadata: BTreeMap::new(),
            spec,
            status: None,
        }
    }

    /// Replace the full custom metadata map
    pub fn with_custom_metadata(mut self, custom: BTreeMap<String, Value>) -> Self {
        self.custom_metadata = custom;
        self
    }
}

const STATUS_SUBRESOURCE: &str = "status";

impl<S, U> Object for TypedObject<S, U>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    U: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn static_metadata(&self) -> &StaticMetadata {
        &self.static_metadata
    }

    fn set_static_metadata(&mut self, metadata: StaticMetadata) {
        self.static_metadata = metadata;
    }

    fn common_metadata(&self) -> &CommonMetadata {
        &self.common_metadata
    }

    fn common_metadata_mut(&mut self) -> &mut CommonMetadata {
        &mut self.common_metadata
    }

    fn custom_metadata(&self) -> BTreeMap<String, Value> {
        self.custom_metadata.clone()
    }

    fn set_custom_metadata_field(&mut self, key: &str, value: Value) {
        self.custom_metadata.insert(key.to_string(), value);
    }

    fn spec(&self) -> Result<Value, Error> {
        Ok(serde_json::to_value(&self.spec)?)
    }

    fn set_spec(&mut self, spec: Value) -> Result<(), Error> {
        self.spec = serde_json::from_value(spec)?;
        Ok(())
    }

    fn subresource_names(&self) -> Vec<String> {
        if self.status.is_some() {
            vec![STATUS_SUBRESOURCE.to_string()]
        } else {
            Vec::new()
        }
    }

    fn subresource(&self, name: &str) -> Option<Value> {
        if name != STATUS_SUBRESOURCE {
            return None;
        }
        self.status
            .as_ref()
            .and_then(|status| serde_json::to_value(status).ok())
    }

    fn set_subresource(&mut self, name: &str, value: Value) -> Result<(), Error> {
        if name != STATUS_SUBRESOURCE {
            return Err(Error::MalformedObject(format!(
                "unknown subresource {name:?} for typed object"
            )));
        }
        self.status = Some(serde_json::from_value(value)?);
        Ok(())
    }

    fn clone_object(&self) -> Box<dyn Object> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A domain object whose spec and subresources are raw JSON values.
///
/// This is the generic fallback the admission pipeline and the schemaless
/// client use when no concrete type is registered for a kind.
#[derive(Clone, Debug, Default)]
pub struct UntypedObject {
    static_metadata: StaticMetadata,
    common_metadata: CommonMetadata,
    custom_metadata: BTreeMap<String, Value>,
    /// The raw spec payload
    pub spec: Value,
    /// All subresources by name
    pub subresources: BTreeMap<String, Value>,
}

impl Object for UntypedObject {
    fn static_metadata(&self) -> &StaticMetadata {
        &self.static_metadata
    }

    fn set_static_metadata(&mut self, metadata: StaticMetadata) {
        self.static_metadata = metadata;
    }

    fn common_metadata(&self) -> &CommonMetadata {
        &self.common_metadata
    }

    fn common_metadata_mut(&mut self) -> &mut CommonMetadata {
        &mut self.common_metadata
    }

    fn custom_metadata(&self) -> BTreeMap<String, Value> {
        self.custom_metadata.clone()
    }

    fn set_custom_metadata_field(&mut self, key: &str, value: Value) {
        self.custom_metadata.insert(key.to_string(), value);
    }

    fn spec(&self) -> Result<Value, Error> {
        Ok(self.spec.clone())
    }

    fn set_spec(&mut self, spec: Value) -> Result<(), Error> {
        self.spec = spec;
        Ok(())
    }

    fn subresource_names(&self) -> Vec<String> {
        self.subresources.keys().cloned().collect()
    }

    fn subresource(&self, name: &str) -> Option<Value> {
        self.subresources.get(name).cloned()
    }

    fn set_subresource(&mut self, name: &str, value: Value) -> Result<(), Error> {
        self.subresources.insert(name.to_string(), value);
        Ok(())
    }

    fn clone_object(&self) -> Box<dyn Object> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// List envelope metadata: resume/pagination state of a list response.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListMetadata {
    /// Resource version at which the list was served
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Opaque token resuming a paginated list, absent on the last page
    #[serde(default, rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    /// Items not returned in this page, when the server knows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<i64>,
}

/// The contract of a list container for a kind.
pub trait ListObject: Send + Sync {
    /// Pagination/resume metadata of the list
    fn list_metadata(&self) -> &ListMetadata;
    /// Replace the list metadata
    fn set_list_metadata(&mut self, metadata: ListMetadata);
    /// The decoded items, in server order
    fn items(&self) -> &[Box<dyn Object>];
    /// Mutable access to the items
    fn items_mut(&mut self) -> &mut Vec<Box<dyn Object>>;
}

impl std::fmt::Debug for dyn ListObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListObject").field("items", &self.items()).finish()
    }
}

/// The generic list container produced by kind list factories.
#[derive(Default, Debug)]
pub struct UntypedList {
    metadata: ListMetadata,
    items: Vec<Box<dyn Object>>,
}

impl ListObject for UntypedList {
    fn list_metadata(&self) -> &ListMetadata {
        &self.metadata
    }

    fn set_list_metadata(&mut self, metadata: ListMetadata) {
        self.metadata = metadata;
    }

    fn items(&self) -> &[Box<dyn Object>] {
        &self.items
    }

    fn items_mut(&mut self) -> &mut Vec<Box<dyn Object>> {
        &mut self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
    struct DashboardSpec {
        title: String,
        panels: u32,
    }

    #[test]
    fn typed_object_spec_round_trip() {
        let mut obj = TypedObject::<DashboardSpec>::new(DashboardSpec {
            title: "latency".into(),
            panels: 4,
        });
        let spec = obj.spec().unwrap();
        assert_eq!(spec["title"], "latency");
        obj.set_spec(json!({"title": "errors", "panels": 2})).unwrap();
        assert_eq!(obj.spec.title, "errors");
    }

    #[test]
    fn typed_object_rejects_unknown_subresource() {
        let mut obj = TypedObject::<DashboardSpec>::new(DashboardSpec::default());
        let err = obj.set_subresource("scale", json!({})).unwrap_err();
        assert!(matches!(err, Error::MalformedObject(_)));
    }

    #[test]
    fn untyped_object_keeps_arbitrary_subresources() {
        let mut obj = UntypedObject::default();
        obj.set_subresource("scale", json!({"replicas": 3})).unwrap();
        obj.set_subresource("status", json!({"ready": true})).unwrap();
        let mut names = obj.subresource_names();
        names.sort();
        assert_eq!(names, ["scale", "status"]);
        assert_eq!(obj.subresource("scale").unwrap()["replicas"], 3);
    }

    #[test]
    fn boxed_object_clone_preserves_concrete_type() {
        let mut obj = TypedObject::<DashboardSpec>::new(DashboardSpec::default());
        obj.set_custom_metadata_field("team", json!("o11y"));
        let cloned: Box<dyn Object> = obj.clone_object();
        let concrete = cloned
            .as_any()
            .downcast_ref::<TypedObject<DashboardSpec>>()
            .unwrap();
        assert_eq!(concrete.custom_metadata()["team"], "o11y");
    }
}
