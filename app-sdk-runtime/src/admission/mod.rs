//! The admission webhook server.
//!
//! An HTTPS endpoint exposing `POST /validate` and `POST /mutate`, demuxing
//! incoming `AdmissionReview`s to kind controllers by `(group, kind)`,
//! hydrating request payloads through the kind's codec, and shaping review
//! verdicts. A processed request always answers 200 with a review envelope;
//! non-200 is reserved for transport-level failures (bad method, body that
//! does not parse, no controller for the kind).
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use app_sdk_core::{
    admission::{
        AdmissionAction, AdmissionError, AdmissionRequest, AdmissionResponse, AdmissionReview,
        MutatingResponse, WireAdmissionRequest,
    },
    codec::{decode_value_into, encode_object_value, Codec, JsonCodec},
    kind::Kind,
    object::{Object, UntypedObject},
    patch::PatchRequest,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod opinionated;

/// A controller approving or rejecting admission requests for a kind.
pub trait ValidatingAdmissionController: Send + Sync {
    /// Approve (`Ok`) or reject the request
    fn validate<'a>(
        &'a self,
        request: &'a AdmissionRequest,
    ) -> BoxFuture<'a, Result<(), AdmissionError>>;
}

/// A controller that may rewrite the request object before persistence.
pub trait MutatingAdmissionController: Send + Sync {
    /// Return the (possibly) mutated object, a ready-made patch, or
    /// `Unchanged`
    fn mutate<'a>(
        &'a self,
        request: &'a AdmissionRequest,
    ) -> BoxFuture<'a, Result<MutatingResponse, AdmissionError>>;
}

/// Listen and TLS configuration for the [`AdmissionServer`].
#[derive(Clone, Debug)]
pub struct AdmissionServerOptions {
    /// Listen address, conventionally `0.0.0.0:8443`
    pub addr: SocketAddr,
    /// PEM certificate path; the server refuses to start without it
    pub tls_cert_path: PathBuf,
    /// PEM private key path; the server refuses to start without it
    pub tls_key_path: PathBuf,
}

/// Errors starting or running the admission server.
#[derive(Debug, Error)]
pub enum AdmissionServerError {
    /// The configured certificate or key file does not exist
    #[error("tls material missing at {0}")]
    MissingTlsMaterial(PathBuf),

    /// TLS configuration failed to load
    #[error("failed to load tls configuration: {0}")]
    Tls(#[source] std::io::Error),

    /// The listener failed
    #[error("admission server failed: {0}")]
    Serve(#[source] std::io::Error),
}

struct ControllerEntry<C: ?Sized> {
    kind: Arc<Kind>,
    controller: Arc<C>,
}

struct RouterState {
    validating: HashMap<(String, String), ControllerEntry<dyn ValidatingAdmissionController>>,
    mutating: HashMap<(String, String), ControllerEntry<dyn MutatingAdmissionController>>,
    default_validating: Option<Arc<dyn ValidatingAdmissionController>>,
    default_mutating: Option<Arc<dyn MutatingAdmissionController>>,
}

/// The admission webhook server.
///
/// Controllers are registered up front; registration must complete before
/// [`run`](Self::run), which serves the request-heavy read path without
/// further synchronisation.
pub struct AdmissionServer {
    options: AdmissionServerOptions,
    state: RouterState,
}

impl AdmissionServer {
    /// A server with no controllers registered
    pub fn new(options: AdmissionServerOptions) -> Self {
        Self {
            options,
            state: RouterState {
                validating: HashMap::new(),
                mutating: HashMap::new(),
                default_validating: None,
                default_mutating: None,
            },
        }
    }

    /// Route validation requests for a kind to a controller
    pub fn register_validating_controller(
        &mut self,
        kind: Arc<Kind>,
        controller: Arc<dyn ValidatingAdmissionController>,
    ) {
        let key = (kind.group().to_string(), kind.kind().to_string());
        self.state.validating.insert(key, ControllerEntry { kind, controller });
    }

    /// Route mutation requests for a kind to a controller
    pub fn register_mutating_controller(
        &mut self,
        kind: Arc<Kind>,
        controller: Arc<dyn MutatingAdmissionController>,
    ) {
        let key = (kind.group().to_string(), kind.kind().to_string());
        self.state.mutating.insert(key, ControllerEntry { kind, controller });
    }

    /// Fall back to this controller for unregistered kinds, with a generic
    /// object factory
    pub fn set_default_validating_controller(
        &mut self,
        controller: Arc<dyn ValidatingAdmissionController>,
    ) {
        self.state.default_validating = Some(controller);
    }

    /// Fall back to this controller for unregistered kinds, with a generic
    /// object factory
    pub fn set_default_mutating_controller(
        &mut self,
        controller: Arc<dyn MutatingAdmissionController>,
    ) {
        self.state.default_mutating = Some(controller);
    }

    /// The `/validate` + `/mutate` router, for serving or for direct testing
    pub fn router(self) -> Router {
        Router::new()
            .route("/validate", post(validate_handler))
            .route("/mutate", post(mutate_handler))
            .with_state(Arc::new(self.state))
    }

    /// Serve over TLS until the token is cancelled, then drain for up to one
    /// second.
    ///
    /// Refuses to start when the certificate or key file is missing.
    pub async fn run(self, stop: CancellationToken) -> Result<(), AdmissionServerError> {
        for path in [&self.options.tls_cert_path, &self.options.tls_key_path] {
            if !path.exists() {
                return Err(AdmissionServerError::MissingTlsMaterial(path.clone()));
            }
        }
        let tls = RustlsConfig::from_pem_file(&self.options.tls_cert_path, &self.options.tls_key_path)
            .await
            .map_err(AdmissionServerError::Tls)?;

        let addr = self.options.addr;
        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            stop.cancelled().await;
            drain.graceful_shutdown(Some(Duration::from_secs(1)));
        });

        tracing::info!(%addr, "admission server listening");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await
            .map_err(AdmissionServerError::Serve)
    }
}

impl std::fmt::Debug for AdmissionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionServer")
            .field("addr", &self.options.addr)
            .field("validating", &self.state.validating.len())
            .field("mutating", &self.state.mutating.len())
            .finish()
    }
}

async fn validate_handler(State(state): State<Arc<RouterState>>, body: Bytes) -> Response {
    let wire = match parse_review(&body) {
        Ok(wire) => wire,
        Err(rejection) => return rejection.into_response(),
    };
    let key = (wire.kind.group.clone(), wire.kind.kind.clone());

    let (kind, controller) = match state.validating.get(&key) {
        Some(entry) => (Some(&entry.kind), Arc::clone(&entry.controller)),
        None => match &state.default_validating {
            Some(controller) => (None, Arc::clone(controller)),
            None => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "no validating admission controller defined for group '{}' and kind '{}'",
                        key.0, key.1
                    ),
                )
                    .into_response()
            }
        },
    };

    let uid = wire.uid.clone();
    let request = match build_request(kind, wire) {
        Ok(request) => request,
        Err(rejection) => return rejection.into_response(),
    };
    let response = match controller.validate(&request).await {
        Ok(()) => AdmissionResponse::allowed(&uid),
        Err(err) => AdmissionResponse::denied(&uid, &err),
    };
    Json(AdmissionReview::from_response(response)).into_response()
}

async fn mutate_handler(State(state): State<Arc<RouterState>>, body: Bytes) -> Response {
    let wire = match parse_review(&body) {
        Ok(wire) => wire,
        Err(rejection) => return rejection.into_response(),
    };
    let key = (wire.kind.group.clone(), wire.kind.kind.clone());

    let (kind, controller) = match state.mutating.get(&key) {
        Some(entry) => (Some(&entry.kind), Arc::clone(&entry.controller)),
        None => match &state.default_mutating {
            Some(controller) => (None, Arc::clone(controller)),
            None => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "no mutating admission controller defined for group '{}' and kind '{}'",
                        key.0, key.1
                    ),
                )
                    .into_response()
            }
        },
    };

    let uid = wire.uid.clone();
    // Kept for the patch base: the patch must apply to the object exactly as
    // the API server sent it.
    let original = wire.object.clone();
    let request = match build_request(kind, wire) {
        Ok(request) => request,
        Err(rejection) => return rejection.into_response(),
    };

    let response = match controller.mutate(&request).await {
        Err(err) => AdmissionResponse::denied(&uid, &err),
        Ok(MutatingResponse::Unchanged) => AdmissionResponse::allowed(&uid),
        Ok(MutatingResponse::Patch(patch)) => {
            match AdmissionResponse::allowed(&uid).with_patch(&patch) {
                Ok(response) => response,
                Err(err) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to serialize patch: {err}"),
                    )
                        .into_response()
                }
            }
        }
        Ok(MutatingResponse::Object(updated)) => {
            match derive_patch(original.as_ref(), updated.as_ref()) {
                Ok(patch) => match AdmissionResponse::allowed(&uid).with_patch(&patch) {
                    Ok(response) => response,
                    Err(err) => {
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            format!("failed to serialize patch: {err}"),
                        )
                            .into_response()
                    }
                },
                Err(err) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to derive mutation patch: {err}"),
                    )
                        .into_response()
                }
            }
        }
    };
    Json(AdmissionReview::from_response(response)).into_response()
}

type Rejection = (StatusCode, String);

fn parse_review(body: &[u8]) -> Result<WireAdmissionRequest, Rejection> {
    let review: AdmissionReview = serde_json::from_slice(body).map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            format!("could not parse admission review: {err}"),
        )
    })?;
    review.request.ok_or((
        StatusCode::BAD_REQUEST,
        "admission review contained no request".to_string(),
    ))
}

// Hydrate the wire request into SDK objects via the kind's codec (or the
// generic object/codec when a default controller is handling it).
fn build_request(
    kind: Option<&Arc<Kind>>,
    wire: WireAdmissionRequest,
) -> Result<AdmissionRequest, Rejection> {
    let decode = |value: &serde_json::Value| -> Result<Box<dyn Object>, Rejection> {
        let data = serde_json::to_vec(value)
            .map_err(|err| (StatusCode::BAD_REQUEST, format!("unreadable object: {err}")))?;
        let mut obj: Box<dyn Object> = match kind {
            Some(kind) => kind.zero_value(),
            None => Box::new(UntypedObject::default()),
        };
        let codec: Arc<dyn Codec> = match kind {
            Some(kind) => kind.json_codec().map_err(|err| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("kind has no JSON codec: {err}"),
                )
            })?,
            None => Arc::new(JsonCodec::default()),
        };
        codec.read_into(&data, obj.as_mut()).map_err(|err| {
            (
                StatusCode::BAD_REQUEST,
                format!("could not decode admission object: {err}"),
            )
        })?;
        Ok(obj)
    };

    let old_object = wire.old_object.as_ref().map(&decode).transpose()?;
    let object = match (&wire.object, wire.operation) {
        (Some(value), _) => decode(value)?,
        // Delete requests carry the target only in oldObject.
        (None, AdmissionAction::Delete) => match &old_object {
            Some(old) => old.clone_object(),
            None => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "admission request contained no object".to_string(),
                ))
            }
        },
        (None, _) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "admission request contained no object".to_string(),
            ))
        }
    };

    Ok(AdmissionRequest {
        action: wire.operation,
        group: wire.kind.group,
        version: wire.kind.version,
        kind: wire.kind.kind,
        user_info: wire.user_info,
        object,
        old_object,
    })
}

// JSON-Patch from the object exactly as received to the controller's
// re-encoded rendition of it.
fn derive_patch(
    original: Option<&serde_json::Value>,
    updated: &dyn Object,
) -> Result<PatchRequest, app_sdk_core::Error> {
    let base = original.cloned().unwrap_or(serde_json::Value::Null);
    let rendered = encode_object_value(updated, true)?;
    let diff = json_patch::diff(&base, &rendered);
    Ok(serde_json::from_value(serde_json::to_value(diff)?)?)
}

/// Apply a JSON-Patch to an object by rewriting its wire form.
///
/// Used by the opinionated mutating layer to fold a controller's pre-built
/// patch into the object before stamping reserved metadata.
pub(crate) fn apply_patch_to_object(
    obj: &dyn Object,
    patch: &PatchRequest,
) -> Result<Box<dyn Object>, AdmissionError> {
    let mut value = encode_object_value(obj, true)
        .map_err(|err| AdmissionError::new(400, "invalid_object", err.to_string()))?;
    let ops: json_patch::Patch = serde_json::from_value(
        serde_json::to_value(patch)
            .map_err(|err| AdmissionError::new(400, "invalid_patch", err.to_string()))?,
    )
    .map_err(|err| AdmissionError::new(400, "invalid_patch", err.to_string()))?;
    json_patch::patch(&mut value, &ops)
        .map_err(|err| AdmissionError::new(400, "invalid_patch", err.to_string()))?;
    let mut rewritten = obj.clone_object();
    decode_value_into(value, rewritten.as_mut())
        .map_err(|err| AdmissionError::new(400, "invalid_patch", err.to_string()))?;
    Ok(rewritten)
}
