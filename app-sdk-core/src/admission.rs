//! Admission review types: the Kubernetes wire envelope and the SDK-level
//! request handed to kind controllers.
//!
//! See <https://kubernetes.io/docs/reference/access-authn-authz/extensible-admission-controllers/>
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use k8s_openapi::api::authentication::v1::UserInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    error::{Error, Status},
    gvk::{GroupVersionKind, GroupVersionResource},
    metadata::TypeMeta,
    object::Object,
    patch::PatchRequest,
};

/// The `kind` field of the review envelope
pub const REVIEW_KIND: &str = "AdmissionReview";
/// The `apiVersion` field of the v1 review envelope
pub const REVIEW_API_VERSION_V1: &str = "admission.k8s.io/v1";

/// Machine-readable reason used when the opinionated layer rejects writes to
/// SDK-reserved metadata fields.
pub const REASON_FIELD_NOT_ALLOWED: &str = "field_not_allowed";

/// The top-level envelope received from and returned to the API server on
/// the admission endpoints.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// Envelope type information
    #[serde(flatten)]
    pub types: TypeMeta,
    /// The attributes of the admission request, set on input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<WireAdmissionRequest>,
    /// The verdict, set on output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response in a v1 review envelope
    pub fn from_response(response: AdmissionResponse) -> Self {
        Self {
            types: TypeMeta {
                api_version: REVIEW_API_VERSION_V1.into(),
                kind: REVIEW_KIND.into(),
            },
            request: None,
            response: Some(response),
        }
    }
}

/// The raw admission request as the API server sends it; object payloads
/// are undecoded JSON until a kind codec hydrates them.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireAdmissionRequest {
    /// Correlates this request/response round-trip
    pub uid: String,
    /// The fully-qualified type of the object being submitted
    pub kind: GroupVersionKind,
    /// The fully-qualified resource being requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<GroupVersionResource>,
    /// The operation being performed
    pub operation: AdmissionAction,
    /// The authenticated user making the request
    pub user_info: UserInfo,
    /// Object name as presented in the request; empty when the server will
    /// generate one
    #[serde(default)]
    pub name: String,
    /// Namespace associated with the request, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The incoming object; absent for delete operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    /// The existing object; populated for update and delete operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    /// Set when modifications will definitely not be persisted
    #[serde(default)]
    pub dry_run: bool,
}

/// The operation of an admission request
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionAction {
    /// The request creates an object
    Create,
    /// The request updates an object
    Update,
    /// The request deletes an object
    Delete,
    /// The request connects to an object
    Connect,
}

/// The verdict returned inside the review envelope.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Copied from the corresponding request
    pub uid: String,
    /// Whether the request is permitted
    pub allowed: bool,
    /// Details consulted only when the request is denied
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
    /// Base64-encoded JSON-Patch mutating the request object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Type of [`patch`](Self::patch); always JSONPatch when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionResponse {
    /// An allowing response for a request uid
    pub fn allowed(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: true,
            result: None,
            patch: None,
            patch_type: None,
        }
    }

    /// A denying response carrying the error's code and reason
    pub fn denied(uid: &str, err: &AdmissionError) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: false,
            result: Some(Status::from(err)),
            patch: None,
            patch_type: None,
        }
    }

    /// Attach a JSON-Patch, base64-encoded per the envelope contract
    pub fn with_patch(mut self, patch: &PatchRequest) -> Result<Self, Error> {
        self.patch = Some(BASE64.encode(serde_json::to_vec(patch)?));
        self.patch_type = Some(PatchType::JsonPatch);
        Ok(self)
    }
}

/// The type of patch returned in an [`AdmissionResponse`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchType {
    /// RFC 6902 JSON Patch
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// An admission request with its payloads decoded into SDK objects.
///
/// For delete operations `object` holds the object being deleted (the wire
/// envelope only carries it in `oldObject`).
pub struct AdmissionRequest {
    /// The operation being performed
    pub action: AdmissionAction,
    /// API group of the target kind
    pub group: String,
    /// Version of the target kind
    pub version: String,
    /// Kind name of the target
    pub kind: String,
    /// The authenticated user making the request
    pub user_info: UserInfo,
    /// The decoded request object
    pub object: Box<dyn Object>,
    /// The decoded prior state; absent for create operations
    pub old_object: Option<Box<dyn Object>>,
}

impl AdmissionRequest {
    /// The requesting username, empty when unauthenticated
    pub fn username(&self) -> &str {
        self.user_info.username.as_deref().unwrap_or_default()
    }
}

/// What a mutating controller did to the request object.
///
/// An updated object and a pre-computed patch are mutually exclusive by
/// construction; the pipeline derives the wire patch from an updated object
/// itself.
pub enum MutatingResponse {
    /// The controller made no changes
    Unchanged,
    /// The controller returns a rewritten object; the pipeline diffs it
    /// against the original wire bytes
    Object(Box<dyn Object>),
    /// The controller returns a ready-made JSON-Patch
    Patch(PatchRequest),
}

/// A controller rejection, carrying the HTTP code and machine-readable
/// reason propagated into the review verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("admission denied ({code} {reason}): {message}")]
pub struct AdmissionError {
    /// Suggested HTTP status code
    pub code: u16,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl AdmissionError {
    /// A new admission error
    pub fn new(code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    /// The rejection the opinionated layer uses for writes to SDK-reserved
    /// metadata: HTTP 400 with reason `field_not_allowed`.
    pub fn field_not_allowed(message: impl Into<String>) -> Self {
        Self::new(400, REASON_FIELD_NOT_ALLOWED, message)
    }
}

impl From<&AdmissionError> for Status {
    fn from(err: &AdmissionError) -> Self {
        Status::failure(&err.message, &err.reason).with_code(err.code)
    }
}
