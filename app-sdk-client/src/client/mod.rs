//! The low-level REST layer: one bytes-in/bytes-out path per verb against a
//! fixed group/version endpoint, plus the registry that caches one client
//! per group/version and owns the Prometheus collectors.
use std::{collections::HashMap, sync::Arc, time::Instant};

use app_sdk_core::{GroupVersion, Kind, Status};
use bytes::Bytes;
use futures::{future::BoxFuture, Stream, StreamExt, TryStreamExt};
use http::{Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    io::StreamReader,
};
use tower::{buffer::Buffer, util::BoxService, BoxError, Layer, Service, ServiceExt};
use tower_http::map_response_body::MapResponseBodyLayer;
use tracing::Instrument;

use crate::{error::Error, resource::ResourceClient, Result};

mod body;
pub use body::Body;
use body::BodyDataStream;
pub mod builder;
mod metrics;
pub use metrics::ClientMetrics;

type InnerService = Buffer<Request<Body>, BoxFuture<'static, std::result::Result<Response<Body>, BoxError>>>;

/// The verb of a request, as recorded on metrics and spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// Read a single object
    Get,
    /// Read a single object's metadata
    GetMetadata,
    /// Read a page of a collection
    List,
    /// Stream changes to a collection
    Watch,
    /// Create an object
    Create,
    /// Replace an object
    Update,
    /// Apply a JSON-Patch to an object
    Patch,
    /// Delete an object
    Delete,
}

impl Verb {
    /// The metrics label value of the verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::GetMetadata => "get_metadata",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        }
    }
}

/// A client for one group/version endpoint of the API server.
///
/// Stateless besides its service handle: requests are independent and the
/// client clones cheaply. Every request records a latency observation, a
/// counter increment and a client span.
#[derive(Clone)]
pub struct GroupVersionClient {
    inner: InnerService,
    base: Uri,
    gv: GroupVersion,
    metrics: ClientMetrics,
}

impl GroupVersionClient {
    pub(crate) fn new(inner: InnerService, base: Uri, gv: GroupVersion, metrics: ClientMetrics) -> Self {
        Self {
            inner,
            base,
            gv,
            metrics,
        }
    }

    /// The group/version this client is bound to
    pub fn group_version(&self) -> &GroupVersion {
        &self.gv
    }

    fn absolute_uri(&self, uri: Uri) -> Result<Uri> {
        let Some(authority) = self.base.authority() else {
            // No base configured (mock service); dispatch path-relative.
            return Ok(uri);
        };
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        Uri::builder()
            .scheme(self.base.scheme_str().unwrap_or("https"))
            .authority(authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(Error::Http)
    }

    async fn send(&self, req: Request<Body>) -> Result<Response<Body>> {
        let mut svc = self.inner.clone();
        svc.ready()
            .await
            .map_err(Error::Service)?
            .call(req)
            .await
            .map_err(|err| match err.downcast::<Error>() {
                Ok(err) => *err,
                Err(err) => Error::Service(err),
            })
    }

    /// Perform a request and return the raw response, after recording the
    /// span and the time-to-response metrics observation.
    async fn dispatch(
        &self,
        req: Request<Vec<u8>>,
        verb: Verb,
        kind: &str,
        subresource: &str,
    ) -> Result<(Response<Body>, Instant)> {
        let (mut parts, body) = req.into_parts();
        parts.uri = self.absolute_uri(parts.uri)?;
        let span = tracing::debug_span!(
            "HTTP",
            http.request.method = %parts.method,
            url.full = %parts.uri,
            server.address = self.base.host().unwrap_or_default(),
            server.port = self.base.port_u16().unwrap_or(0),
            http.response.status_code = tracing::field::Empty,
            otel.kind = "client",
        );
        let started = Instant::now();
        let res = self
            .send(Request::from_parts(parts, Body::from(body)))
            .instrument(span.clone())
            .await;
        match res {
            Ok(res) => {
                span.record("http.response.status_code", res.status().as_u16());
                Ok((res, started))
            }
            Err(err) => {
                // Transport failures never produced a status line; record
                // them under code 0 so the request still counts.
                self.metrics
                    .observe(0, verb.as_str(), kind, subresource, started.elapsed().as_secs_f64());
                Err(err)
            }
        }
    }

    /// Perform a request and return the decoded body bytes.
    ///
    /// Non-2xx responses are translated: a parseable Kubernetes `Status`
    /// body surfaces as [`Error::Api`] with the Status's own code taking
    /// precedence, anything else as [`Error::ServerResponse`].
    pub async fn request_bytes(
        &self,
        req: Request<Vec<u8>>,
        verb: Verb,
        kind: &str,
        subresource: &str,
    ) -> Result<Bytes> {
        self.request_negotiated(req, verb, kind, subresource)
            .await
            .map(|(bytes, _)| bytes)
    }

    /// Like [`request_bytes`](Self::request_bytes), additionally returning
    /// the response media type for codec negotiation.
    pub async fn request_negotiated(
        &self,
        req: Request<Vec<u8>>,
        verb: Verb,
        kind: &str,
        subresource: &str,
    ) -> Result<(Bytes, Option<String>)> {
        let (res, started) = self.dispatch(req, verb, kind, subresource).await?;
        let status = res.status();
        let content_type = res
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = res.into_body().collect().await?.to_bytes();
        // One observation per request, with the body read included in the
        // round-trip.
        self.metrics.observe(
            status.as_u16(),
            verb.as_str(),
            kind,
            subresource,
            started.elapsed().as_secs_f64(),
        );
        if status.is_client_error() || status.is_server_error() {
            return Err(translate_error(status, &bytes));
        }
        Ok((bytes, content_type))
    }

    /// Open a streaming request and return its newline-delimited frames.
    ///
    /// Transport interruptions (client timeouts, chunked-decoder EOFs,
    /// connection resets) surface as [`Error::Stream`], which upstream
    /// consumers treat as retryable.
    pub async fn request_lines(
        &self,
        req: Request<Vec<u8>>,
        verb: Verb,
        kind: &str,
        subresource: &str,
    ) -> Result<impl Stream<Item = Result<String>> + Send + 'static> {
        let (res, started) = self.dispatch(req, verb, kind, subresource).await?;
        let status = res.status();
        // Streams have no meaningful body-read end; observe at headers.
        self.metrics.observe(
            status.as_u16(),
            verb.as_str(),
            kind,
            subresource,
            started.elapsed().as_secs_f64(),
        );
        if status.is_client_error() || status.is_server_error() {
            let bytes = res.into_body().collect().await?.to_bytes();
            return Err(translate_error(status, &bytes));
        }
        let reader = StreamReader::new(
            BodyDataStream::new(res.into_body())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        let frames = FramedRead::new(reader, LinesCodec::new());
        Ok(frames.map(|frame| match frame {
            Ok(line) => Ok(line),
            Err(LinesCodecError::Io(e)) => Err(Error::Stream(e)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Err(Error::Stream(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "watch frame exceeded maximum line length",
            ))),
        }))
    }
}

impl std::fmt::Debug for GroupVersionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupVersionClient")
            .field("base", &self.base)
            .field("gv", &self.gv)
            .finish()
    }
}

fn translate_error(status: StatusCode, body: &[u8]) -> Error {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if value.get("kind").and_then(Value::as_str) == Some("Status") {
            if let Ok(mut parsed) = serde_json::from_value::<Status>(value) {
                if parsed.code == 0 {
                    parsed.code = status.as_u16();
                }
                return Error::Api(parsed);
            }
        }
    }
    Error::ServerResponse {
        code: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

struct RegistryInner {
    service: InnerService,
    base: Uri,
    metrics: ClientMetrics,
    clients: Mutex<HashMap<GroupVersion, GroupVersionClient>>,
}

/// Caches one [`GroupVersionClient`] per group/version over a shared service
/// stack, and owns the Prometheus collectors they report into.
///
/// Entries are created on first use and read-only afterwards; the cache
/// lock is never held across I/O.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl ClientRegistry {
    /// Create a registry over a custom service stack.
    ///
    /// `base_uri` supplies scheme and authority for path-relative requests;
    /// pass a path-only uri (e.g. `/`) when the service resolves targets
    /// itself, as mock services do.
    pub fn new<S, B>(service: S, base_uri: Uri, registry: &prometheus::Registry) -> Result<Self>
    where
        S: Service<Request<Body>, Response = Response<B>> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let metrics = ClientMetrics::register(registry)?;
        let service = MapResponseBodyLayer::new(|b| Body::wrap_body(b))
            .layer(service)
            .map_err(|e: S::Error| e.into());
        Ok(Self {
            inner: Arc::new(RegistryInner {
                service: Buffer::new(BoxService::new(service), 1024),
                base: base_uri,
                metrics,
                clients: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The client for a group/version, created on first use
    pub fn client_for(&self, gv: GroupVersion) -> GroupVersionClient {
        let mut clients = self.inner.clients.lock();
        clients
            .entry(gv.clone())
            .or_insert_with(|| {
                GroupVersionClient::new(
                    self.inner.service.clone(),
                    self.inner.base.clone(),
                    gv,
                    self.inner.metrics.clone(),
                )
            })
            .clone()
    }

    /// A typed per-kind client; requires the kind to carry a JSON codec
    pub fn resource_client(&self, kind: Arc<Kind>) -> Result<ResourceClient> {
        ResourceClient::new(self.client_for(kind.group_version()), kind)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").field("base", &self.inner.base).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_code_takes_precedence() {
        let body = br#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"no","reason":"Conflict","code":409}"#;
        let err = translate_error(StatusCode::BAD_REQUEST, body);
        match err {
            Error::Api(status) => {
                assert_eq!(status.code, 409);
                assert_eq!(status.reason, "Conflict");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn codeless_status_inherits_http_code() {
        let body = br#"{"kind":"Status","apiVersion":"v1","status":"Failure","reason":"NotFound"}"#;
        let err = translate_error(StatusCode::NOT_FOUND, body);
        match err {
            Error::Api(status) => assert_eq!(status.code, 404),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn non_status_body_becomes_server_response() {
        let err = translate_error(StatusCode::BAD_GATEWAY, b"upstream sad");
        match err {
            Error::ServerResponse { code, body } => {
                assert_eq!(code, 502);
                assert_eq!(body, "upstream sad");
            }
            other => panic!("expected ServerResponse error, got {other:?}"),
        }
    }
}
