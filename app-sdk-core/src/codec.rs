//! Wire encodings and per-kind codecs.
//!
//! A codec pairs `read` and `write` for one wire encoding of one kind; on
//! valid input the two form an isomorphism. The wire envelope is the usual
//! `apiVersion`/`kind`/`metadata`/`spec`/`<subresources>` shape; metadata
//! translation (reserved annotations, extraFields) happens here on the way
//! in and out.
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::{
    error::Error,
    gvk::GroupVersion,
    metadata::{build_object_meta, common_metadata_from_object_meta, StaticMetadata},
    object::Object,
};

/// A wire encoding a kind can be read from and written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `application/json`
    Json,
    /// `application/yaml`
    Yaml,
}

impl Encoding {
    /// The canonical media type of the encoding
    pub fn media_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Yaml => "application/yaml",
        }
    }

    /// Short name used in errors and registries
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Yaml => "yaml",
        }
    }

    /// Negotiate an encoding from a media type, ignoring parameters
    /// (`application/json;as=...` still selects JSON).
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or_default().trim();
        match essence {
            "application/json" => Some(Encoding::Json),
            "application/yaml" | "text/yaml" => Some(Encoding::Yaml),
            _ => None,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode/encode pair for a specific wire encoding.
///
/// `read_into` fills a caller-supplied zero value, which is how the response
/// paths avoid guessing concrete types: the kind's factory allocates, the
/// codec populates.
pub trait Codec: Send + Sync {
    /// Decode wire bytes into the given object
    fn read_into(&self, data: &[u8], into: &mut dyn Object) -> Result<(), Error>;
    /// Encode the object into wire bytes
    fn write(&self, obj: &dyn Object) -> Result<Vec<u8>, Error>;
}

/// The JSON wire codec. Required for any kind used with a typed client.
#[derive(Clone, Debug)]
pub struct JsonCodec {
    /// Permit non-string custom metadata values, stringifying on encode
    pub custom_metadata_is_any_type: bool,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self {
            custom_metadata_is_any_type: true,
        }
    }
}

impl Codec for JsonCodec {
    fn read_into(&self, data: &[u8], into: &mut dyn Object) -> Result<(), Error> {
        let value: Value = serde_json::from_slice(data)?;
        decode_value_into(value, into)
    }

    fn write(&self, obj: &dyn Object) -> Result<Vec<u8>, Error> {
        let value = encode_object_value(obj, self.custom_metadata_is_any_type)?;
        Ok(serde_json::to_vec(&value)?)
    }
}

/// The YAML wire codec.
#[derive(Clone, Debug)]
pub struct YamlCodec {
    /// Permit non-string custom metadata values, stringifying on encode
    pub custom_metadata_is_any_type: bool,
}

impl Default for YamlCodec {
    fn default() -> Self {
        Self {
            custom_metadata_is_any_type: true,
        }
    }
}

impl Codec for YamlCodec {
    fn read_into(&self, data: &[u8], into: &mut dyn Object) -> Result<(), Error> {
        let value: Value = serde_yaml::from_slice(data)?;
        decode_value_into(value, into)
    }

    fn write(&self, obj: &dyn Object) -> Result<Vec<u8>, Error> {
        let value = encode_object_value(obj, self.custom_metadata_is_any_type)?;
        Ok(serde_yaml::to_string(&value)?.into_bytes())
    }
}

const ENVELOPE_KEYS: [&str; 4] = ["apiVersion", "kind", "metadata", "spec"];

/// Populates an object from its parsed wire envelope.
///
/// Static metadata comes from `TypeMeta` + `metadata.{namespace,name}`,
/// common and custom metadata from `ObjectMeta` and the reserved
/// annotations, the spec from `spec`, and every other top-level key is
/// treated as a subresource.
pub fn decode_value_into(value: Value, into: &mut dyn Object) -> Result<(), Error> {
    let Value::Object(map) = value else {
        return Err(Error::MalformedObject("wire object is not a JSON object".into()));
    };
    let api_version = map
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedObject("missing apiVersion".into()))?;
    let kind = map
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedObject("missing kind".into()))?;
    let gv = GroupVersion::from_str(api_version)
        .map_err(|e| Error::MalformedObject(e.to_string()))?;

    let meta: ObjectMeta = match map.get("metadata") {
        Some(m) => serde_json::from_value(m.clone())?,
        None => ObjectMeta::default(),
    };
    let (common, custom) = common_metadata_from_object_meta(&meta)?;

    into.set_static_metadata(StaticMetadata {
        group: gv.group,
        version: gv.version,
        kind: kind.to_string(),
        namespace: meta.namespace.unwrap_or_default(),
        name: meta.name.unwrap_or_default(),
    });
    *into.common_metadata_mut() = common;
    for (key, value) in custom {
        into.set_custom_metadata_field(&key, value);
    }
    if let Some(spec) = map.get("spec") {
        into.set_spec(spec.clone())?;
    }
    for (key, value) in &map {
        if ENVELOPE_KEYS.contains(&key.as_str()) || value.is_null() {
            continue;
        }
        into.set_subresource(key, value.clone())?;
    }
    Ok(())
}

/// Builds the wire envelope for an object. Inverse of [`decode_value_into`].
pub fn encode_object_value(obj: &dyn Object, custom_is_any_type: bool) -> Result<Value, Error> {
    let static_md = obj.static_metadata();
    let meta = build_object_meta(
        static_md,
        obj.common_metadata(),
        &obj.custom_metadata(),
        custom_is_any_type,
    )?;
    let mut map = serde_json::Map::new();
    map.insert("apiVersion".into(), Value::String(static_md.api_version()));
    map.insert("kind".into(), Value::String(static_md.kind.clone()));
    map.insert("metadata".into(), serde_json::to_value(meta)?);
    map.insert("spec".into(), obj.spec()?);
    for name in obj.subresource_names() {
        if let Some(value) = obj.subresource(&name) {
            map.insert(name, value);
        }
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{ANNOTATION_CREATED_BY, ANNOTATION_UPDATE_TIMESTAMP},
        object::{TypedObject, UntypedObject},
    };
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
    struct PlaylistSpec {
        interval: String,
    }

    const WIRE: &str = r#"{
        "apiVersion": "playlists.grafana.com/v1alpha1",
        "kind": "Playlist",
        "metadata": {
            "name": "weekly",
            "namespace": "default",
            "uid": "u-1",
            "resourceVersion": "7",
            "generation": 2,
            "labels": {"team": "viz"},
            "annotations": {
                "grafana.com/createdBy": "alice",
                "grafana.com/updatedBy": "",
                "grafana.com/updateTimestamp": "2023-07-06T20:49:10Z",
                "grafana.com/sourceRepo": "infra",
                "example.com/unrelated": "kept"
            }
        },
        "spec": {"interval": "5m"},
        "status": {"state": "active"}
    }"#;

    #[test]
    fn json_decode_fills_all_layers() {
        let codec = JsonCodec::default();
        let mut obj = UntypedObject::default();
        codec.read_into(WIRE.as_bytes(), &mut obj).unwrap();

        assert_eq!(obj.static_metadata().group, "playlists.grafana.com");
        assert_eq!(obj.static_metadata().name, "weekly");
        assert_eq!(obj.common_metadata().created_by, "alice");
        assert_eq!(obj.common_metadata().resource_version, "7");
        assert_eq!(
            obj.common_metadata().extra_fields["annotations"]["example.com/unrelated"],
            "kept"
        );
        assert_eq!(obj.custom_metadata()["sourceRepo"], "infra");
        assert_eq!(obj.spec().unwrap()["interval"], "5m");
        assert_eq!(obj.subresource("status").unwrap()["state"], "active");
    }

    #[test]
    fn json_round_trip_is_identity() {
        let codec = JsonCodec::default();
        let mut obj = UntypedObject::default();
        codec.read_into(WIRE.as_bytes(), &mut obj).unwrap();

        let encoded = codec.write(&obj).unwrap();
        let mut again = UntypedObject::default();
        codec.read_into(&encoded, &mut again).unwrap();

        assert_eq!(obj.static_metadata(), again.static_metadata());
        assert_eq!(obj.common_metadata(), again.common_metadata());
        assert_eq!(obj.custom_metadata(), again.custom_metadata());
        assert_eq!(obj.spec().unwrap(), again.spec().unwrap());
        assert_eq!(obj.subresource("status"), again.subresource("status"));
    }

    #[test]
    fn encoded_envelope_carries_reserved_annotations() {
        let codec = JsonCodec::default();
        let mut obj = TypedObject::<PlaylistSpec>::new(PlaylistSpec {
            interval: "10m".into(),
        });
        obj.set_static_metadata(StaticMetadata {
            group: "playlists.grafana.com".into(),
            version: "v1alpha1".into(),
            kind: "Playlist".into(),
            namespace: "default".into(),
            name: "daily".into(),
        });
        obj.common_metadata_mut().created_by = "bob".into();

        let value: Value = serde_json::from_slice(&codec.write(&obj).unwrap()).unwrap();
        assert_eq!(value["apiVersion"], "playlists.grafana.com/v1alpha1");
        assert_eq!(value["metadata"]["annotations"][ANNOTATION_CREATED_BY], "bob");
        assert!(value["metadata"]["annotations"]
            .get(ANNOTATION_UPDATE_TIMESTAMP)
            .is_none());
        assert_eq!(value["spec"]["interval"], "10m");
    }

    #[test]
    fn yaml_codec_round_trips_through_json_value() {
        let codec = YamlCodec::default();
        let mut obj = UntypedObject::default();
        let json_codec = JsonCodec::default();
        json_codec.read_into(WIRE.as_bytes(), &mut obj).unwrap();

        let yaml = codec.write(&obj).unwrap();
        let mut decoded = UntypedObject::default();
        codec.read_into(&yaml, &mut decoded).unwrap();
        assert_eq!(obj.common_metadata(), decoded.common_metadata());
        assert_eq!(obj.spec().unwrap(), decoded.spec().unwrap());
    }

    #[test]
    fn media_type_negotiation_ignores_parameters() {
        assert_eq!(
            Encoding::from_media_type("application/json;as=PartialObjectMetadata;g=meta.k8s.io"),
            Some(Encoding::Json)
        );
        assert_eq!(Encoding::from_media_type("application/yaml"), Some(Encoding::Yaml));
        assert_eq!(Encoding::from_media_type("application/protobuf"), None);
    }

    #[test]
    fn typed_decode_parses_spec_and_status() {
        #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
        struct PlaylistStatus {
            state: String,
        }
        let codec = JsonCodec::default();
        let mut obj = TypedObject::<PlaylistSpec, PlaylistStatus>::new(PlaylistSpec::default());
        codec.read_into(WIRE.as_bytes(), &mut obj).unwrap();
        assert_eq!(obj.spec.interval, "5m");
        assert_eq!(obj.status.as_ref().unwrap().state, "active");
        assert_eq!(json!(obj.custom_metadata()), json!({"sourceRepo": "infra"}));
    }
}
