//! Schemaless JSON-Patch client that tracks the server's preferred version.
//!
//! For patch-only consumers that must survive version bumps of a target
//! kind: the current preferred `(group, version, resource)` for a
//! `(group, kind)` pair is discovered from the API server and cached with a
//! TTL, refreshed lazily on expiry or eagerly on demand.
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use app_sdk_core::{
    codec::{Codec, JsonCodec},
    metadata::FullIdentifier,
    object::UntypedObject,
    options::PatchOptions,
    patch::PatchRequest,
    request::ResourceRequest,
    GroupVersion, GroupVersionResource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList, APIVersions};
use parking_lot::RwLock;

use crate::{
    client::{ClientRegistry, Verb},
    error::Error,
    Result,
};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
struct PreferredMapping {
    gvr: GroupVersionResource,
    namespaced: bool,
    fetched: Instant,
}

/// A patch-only client resolving kinds to the server's preferred version.
pub struct DynamicPatcher {
    registry: ClientRegistry,
    cache: RwLock<HashMap<(String, String), PreferredMapping>>,
    ttl: Duration,
}

impl DynamicPatcher {
    /// A patcher over a client registry, with the default 10 minute
    /// discovery cache TTL
    pub fn new(registry: ClientRegistry) -> Self {
        Self {
            registry,
            cache: RwLock::new(HashMap::new()),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Override the discovery cache TTL
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Apply a JSON-Patch to the object at the server's preferred version
    /// of the identifier's group and kind.
    pub async fn patch(
        &self,
        id: &FullIdentifier,
        mut patch: PatchRequest,
        options: &PatchOptions,
    ) -> Result<UntypedObject> {
        patch.rewrite_metadata_paths()?;
        let mapping = self.preferred(&id.gvk.group, &id.gvk.kind).await?;

        let namespace = match (mapping.namespaced, id.identifier.namespace.as_str()) {
            (true, "") => {
                return Err(Error::Validation(format!(
                    "kind {} is namespaced, an object namespace is required",
                    id.gvk.kind
                )))
            }
            (true, ns) => Some(ns),
            (false, "") => None,
            (false, ns) => {
                return Err(Error::Validation(format!(
                    "kind {} is cluster-scoped, cannot use namespace {ns:?}",
                    id.gvk.kind
                )))
            }
        };
        let path = resource_path(&mapping.gvr, namespace);
        let req = ResourceRequest::new(path).patch(
            &id.identifier.name,
            options,
            serde_json::to_vec(&patch)?,
        )?;

        let gv = GroupVersion::gv(&mapping.gvr.group, &mapping.gvr.version);
        let client = self.registry.client_for(gv);
        let subresource = options.subresource.clone().unwrap_or_default();
        let bytes = client
            .request_bytes(req, Verb::Patch, &id.gvk.kind, &subresource)
            .await?;

        let mut obj = UntypedObject::default();
        JsonCodec::default().read_into(&bytes, &mut obj)?;
        Ok(obj)
    }

    /// Drop the cached mapping for a group/kind and rediscover it now
    pub async fn force_refresh(&self, group: &str, kind: &str) -> Result<()> {
        self.cache
            .write()
            .remove(&(group.to_string(), kind.to_string()));
        self.preferred(group, kind).await?;
        Ok(())
    }

    async fn preferred(&self, group: &str, kind: &str) -> Result<PreferredMapping> {
        let key = (group.to_string(), kind.to_string());
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&key) {
                if entry.fetched.elapsed() < self.ttl {
                    return Ok(entry.clone());
                }
            }
        }
        let mapping = self.discover(group, kind).await?;
        self.cache.write().insert(key, mapping.clone());
        Ok(mapping)
    }

    // Walks the discovery endpoints: the group's preferred version first,
    // then that version's resource list for the kind's plural name.
    async fn discover(&self, group: &str, kind: &str) -> Result<PreferredMapping> {
        let client = self.registry.client_for(GroupVersion::gv("", ""));

        let version = if group.is_empty() {
            let bytes = client
                .request_bytes(get_request("/api")?, Verb::Get, "APIVersions", "")
                .await?;
            let versions: APIVersions = serde_json::from_slice(&bytes)?;
            versions
                .versions
                .first()
                .cloned()
                .ok_or_else(|| Error::Validation("server reported no core api versions".into()))?
        } else {
            let bytes = client
                .request_bytes(get_request("/apis")?, Verb::Get, "APIGroupList", "")
                .await?;
            let groups: APIGroupList = serde_json::from_slice(&bytes)?;
            let entry = groups
                .groups
                .iter()
                .find(|g| g.name == group)
                .ok_or_else(|| Error::Validation(format!("api group {group:?} not served")))?;
            entry
                .preferred_version
                .as_ref()
                .or_else(|| entry.versions.first())
                .map(|v| v.version.clone())
                .ok_or_else(|| Error::Validation(format!("api group {group:?} has no versions")))?
        };

        let list_path = if group.is_empty() {
            format!("/api/{version}")
        } else {
            format!("/apis/{group}/{version}")
        };
        let bytes = client
            .request_bytes(get_request(&list_path)?, Verb::Get, "APIResourceList", "")
            .await?;
        let resources: APIResourceList = serde_json::from_slice(&bytes)?;
        let resource = resources
            .resources
            .iter()
            .filter(|r| !r.name.contains('/'))
            .find(|r| r.kind == kind)
            .ok_or_else(|| {
                Error::Validation(format!("kind {kind:?} not served by {group}/{version}"))
            })?;

        Ok(PreferredMapping {
            gvr: GroupVersionResource::gvr(group, &version, &resource.name),
            namespaced: resource.namespaced,
            fetched: Instant::now(),
        })
    }
}

fn get_request(path: &str) -> Result<http::Request<Vec<u8>>> {
    http::Request::get(path).body(vec![]).map_err(Error::Http)
}

fn resource_path(gvr: &GroupVersionResource, namespace: Option<&str>) -> String {
    let ns = match namespace {
        Some(ns) => format!("namespaces/{ns}/"),
        None => String::new(),
    };
    if gvr.group.is_empty() {
        format!("/api/{}/{}{}", gvr.version, ns, gvr.resource)
    } else {
        format!("/apis/{}/{}/{}{}", gvr.group, gvr.version, ns, gvr.resource)
    }
}

impl std::fmt::Debug for DynamicPatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicPatcher").field("ttl", &self.ttl).finish()
    }
}
