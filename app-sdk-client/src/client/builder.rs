//! Default service stack construction from a minimal cluster configuration.
//!
//! Kubeconfig parsing, exec plugins and token refresh are deliberately not
//! handled here; external tooling resolves credentials and hands the result
//! over as a [`ClusterConfig`].
use http::Uri;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::{client::legacy::Client as HyperClient, rt::TokioExecutor};
use tower::ServiceBuilder;
use tower_http::auth::AddAuthorizationLayer;

use super::{Body, ClientRegistry};
use crate::{error::Error, Result};

/// Connection parameters for one API server.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Scheme and authority of the API server
    pub url: Uri,
    /// Bearer token attached to every request, when set
    pub bearer_token: Option<String>,
}

impl ClusterConfig {
    /// Config for an API server url with no client authentication
    pub fn new(url: Uri) -> Self {
        Self {
            url,
            bearer_token: None,
        }
    }

    /// Attach a bearer token
    #[must_use]
    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }
}

impl ClientRegistry {
    /// Build a registry with the default hyper/rustls stack for a cluster.
    ///
    /// TLS verification uses the platform's native root store.
    pub fn try_from_config(
        config: &ClusterConfig,
        registry: &prometheus::Registry,
    ) -> Result<Self> {
        let connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(Error::Tls)?
            .https_or_http()
            .enable_http1()
            .build();
        let client: HyperClient<_, Body> = HyperClient::builder(TokioExecutor::new()).build(connector);

        let auth_layer = match &config.bearer_token {
            Some(token) => Some(
                AddAuthorizationLayer::bearer(token)
                    .as_sensitive(true),
            ),
            None => None,
        };
        let service = ServiceBuilder::new().option_layer(auth_layer).service(client);
        Self::new(service, config.url.clone(), registry)
    }
}
