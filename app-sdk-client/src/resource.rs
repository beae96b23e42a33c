//! The per-kind typed client.
//!
//! A thin façade over [`GroupVersionClient`](crate::client::GroupVersionClient)
//! that binds object identity, enforces kind scope before any I/O, stamps
//! the reserved version label on writes, and runs all payloads through the
//! kind's JSON codec.
use std::sync::Arc;

use app_sdk_core::{
    codec::Codec,
    kind::{Kind, Scope},
    metadata::{ObjectIdentifier, PartialObjectMetadata, StaticMetadata, NAMESPACE_ALL, VERSION_LABEL},
    object::{ListMetadata, ListObject, Object},
    options::{CreateOptions, DeleteOptions, GetOptions, ListOptions, PatchOptions, UpdateOptions, WatchOptions},
    patch::PatchRequest,
    request::ResourceRequest,
};
use serde_json::Value;

use crate::{
    client::{GroupVersionClient, Verb},
    error::Error,
    watch::WatchResponse,
    Result,
};

/// A structured client for one kind.
#[derive(Clone)]
pub struct ResourceClient {
    client: GroupVersionClient,
    kind: Arc<Kind>,
    codec: Arc<dyn Codec>,
}

impl ResourceClient {
    /// A typed client over a group/version wire client.
    ///
    /// Fails if the kind has no JSON codec.
    pub fn new(client: GroupVersionClient, kind: Arc<Kind>) -> Result<Self> {
        let codec = kind.json_codec()?;
        Ok(Self { client, kind, codec })
    }

    /// The kind this client serves
    pub fn kind(&self) -> &Arc<Kind> {
        &self.kind
    }

    // Path builder for single-object verbs; validates identifier scope.
    fn object_request(&self, id: &ObjectIdentifier) -> Result<ResourceRequest> {
        if id.name.is_empty() {
            return Err(Error::Validation("object name must not be empty".into()));
        }
        match self.kind.scope() {
            Scope::Cluster if id.namespace != NAMESPACE_ALL => Err(Error::Validation(format!(
                "kind {} is cluster-scoped, cannot use namespace {:?}",
                self.kind.kind(),
                id.namespace
            ))),
            Scope::Cluster => Ok(ResourceRequest::new(self.kind.url_path(None))),
            Scope::Namespaced if id.namespace == NAMESPACE_ALL => Err(Error::Validation(format!(
                "kind {} is namespaced, an object namespace is required",
                self.kind.kind()
            ))),
            Scope::Namespaced => Ok(ResourceRequest::new(self.kind.url_path(Some(&id.namespace)))),
        }
    }

    // Path builder for list/watch; NamespaceAll selects all namespaces.
    fn collection_request(&self, namespace: &str) -> Result<ResourceRequest> {
        match self.kind.scope() {
            Scope::Cluster if namespace != NAMESPACE_ALL => Err(Error::Validation(format!(
                "kind {} is cluster-scoped, list/watch requires NamespaceAll",
                self.kind.kind()
            ))),
            Scope::Cluster => Ok(ResourceRequest::new(self.kind.url_path(None))),
            Scope::Namespaced if namespace == NAMESPACE_ALL => {
                Ok(ResourceRequest::new(self.kind.url_path(None)))
            }
            Scope::Namespaced => Ok(ResourceRequest::new(self.kind.url_path(Some(namespace)))),
        }
    }

    // Overwrite object identity with the kind's gvk and the caller-supplied
    // identifier, and stamp the stored-version label.
    fn bind_identity(&self, id: &ObjectIdentifier, obj: &mut dyn Object) {
        obj.set_static_metadata(StaticMetadata {
            group: self.kind.group().to_string(),
            version: self.kind.version().to_string(),
            kind: self.kind.kind().to_string(),
            namespace: id.namespace.clone(),
            name: id.name.clone(),
        });
        obj.common_metadata_mut()
            .labels
            .insert(VERSION_LABEL.to_string(), self.kind.version().to_string());
    }

    /// Get a named object
    pub async fn get(&self, id: &ObjectIdentifier) -> Result<Box<dyn Object>> {
        let mut into = self.kind.zero_value();
        self.get_into(id, into.as_mut()).await?;
        Ok(into)
    }

    /// Get a named object, decoding into a caller-supplied zero value.
    ///
    /// The response codec is negotiated from the wire media type, falling
    /// back to the kind's JSON codec.
    pub async fn get_into(&self, id: &ObjectIdentifier, into: &mut dyn Object) -> Result<()> {
        let req = self.object_request(id)?.get(&id.name, &GetOptions::default())?;
        let (bytes, content_type) = self
            .client
            .request_negotiated(req, Verb::Get, self.kind.kind(), "")
            .await?;
        let codec = content_type
            .as_deref()
            .and_then(|media_type| self.kind.codec_for_media_type(media_type))
            .unwrap_or_else(|| Arc::clone(&self.codec));
        codec.read_into(&bytes, into)?;
        Ok(())
    }

    /// Get a named object if it exists, `None` on not-found
    pub async fn get_opt(&self, id: &ObjectIdentifier) -> Result<Option<Box<dyn Object>>> {
        match self.get(id).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Get only the metadata of a named object
    pub async fn get_metadata(&self, id: &ObjectIdentifier) -> Result<PartialObjectMetadata> {
        let req = self.object_request(id)?.get_metadata(&id.name)?;
        let bytes = self
            .client
            .request_bytes(req, Verb::GetMetadata, self.kind.kind(), "")
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a named object exists; not-found is `false`, not an error
    pub async fn exists(&self, id: &ObjectIdentifier) -> Result<bool> {
        match self.get_metadata(id).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Create an object and return the server's rendition of it
    pub async fn create(
        &self,
        id: &ObjectIdentifier,
        obj: &mut dyn Object,
        options: &CreateOptions,
    ) -> Result<Box<dyn Object>> {
        let mut into = self.kind.zero_value();
        self.create_into(id, obj, options, into.as_mut()).await?;
        Ok(into)
    }

    /// Create an object, decoding the response into a caller-supplied zero value
    pub async fn create_into(
        &self,
        id: &ObjectIdentifier,
        obj: &mut dyn Object,
        options: &CreateOptions,
        into: &mut dyn Object,
    ) -> Result<()> {
        let requests = self.object_request(id)?;
        self.bind_identity(id, obj);
        let data = self.codec.write(obj)?;
        let req = requests.create(options, data)?;
        let bytes = self
            .client
            .request_bytes(req, Verb::Create, self.kind.kind(), "")
            .await?;
        self.codec.read_into(&bytes, into)?;
        Ok(())
    }

    /// Replace an object and return the server's rendition of it.
    ///
    /// When `options.resource_version` is empty the current version is first
    /// read from the server, making this read-modify-write at the cost of an
    /// extra round-trip; supply the version to avoid it.
    pub async fn update(
        &self,
        id: &ObjectIdentifier,
        obj: &mut dyn Object,
        options: &UpdateOptions,
    ) -> Result<Box<dyn Object>> {
        let mut into = self.kind.zero_value();
        self.update_into(id, obj, options, into.as_mut()).await?;
        Ok(into)
    }

    /// Replace an object, decoding the response into a caller-supplied zero value
    pub async fn update_into(
        &self,
        id: &ObjectIdentifier,
        obj: &mut dyn Object,
        options: &UpdateOptions,
        into: &mut dyn Object,
    ) -> Result<()> {
        let requests = self.object_request(id)?;
        self.bind_identity(id, obj);
        let mut options = options.clone();
        if options.resource_version.is_empty() {
            let current = self.get_metadata(id).await?;
            options.resource_version = current.metadata.resource_version.unwrap_or_default();
        }
        obj.common_metadata_mut().resource_version = options.resource_version.clone();
        let data = self.codec.write(obj)?;
        let subresource = options.subresource.clone().unwrap_or_default();
        let req = requests.update(&id.name, &options, data)?;
        let bytes = self
            .client
            .request_bytes(req, Verb::Update, self.kind.kind(), &subresource)
            .await?;
        self.codec.read_into(&bytes, into)?;
        Ok(())
    }

    /// Replace a named subresource of an object
    pub async fn update_subresource(
        &self,
        id: &ObjectIdentifier,
        subresource: &str,
        obj: &mut dyn Object,
        options: &UpdateOptions,
    ) -> Result<Box<dyn Object>> {
        let options = UpdateOptions {
            subresource: Some(subresource.to_string()),
            ..options.clone()
        };
        self.update(id, obj, &options).await
    }

    /// Apply a JSON-Patch to an object and return the patched rendition.
    ///
    /// Operations addressing SDK metadata are rewritten onto their
    /// annotation storage paths before hitting the wire.
    pub async fn patch(
        &self,
        id: &ObjectIdentifier,
        patch: PatchRequest,
        options: &PatchOptions,
    ) -> Result<Box<dyn Object>> {
        let mut into = self.kind.zero_value();
        self.patch_into(id, patch, options, into.as_mut()).await?;
        Ok(into)
    }

    /// Apply a JSON-Patch, decoding the response into a caller-supplied zero value
    pub async fn patch_into(
        &self,
        id: &ObjectIdentifier,
        mut patch: PatchRequest,
        options: &PatchOptions,
        into: &mut dyn Object,
    ) -> Result<()> {
        let requests = self.object_request(id)?;
        patch.rewrite_metadata_paths()?;
        let data = serde_json::to_vec(&patch)?;
        let subresource = options.subresource.clone().unwrap_or_default();
        let req = requests.patch(&id.name, options, data)?;
        let bytes = self
            .client
            .request_bytes(req, Verb::Patch, self.kind.kind(), &subresource)
            .await?;
        self.codec.read_into(&bytes, into)?;
        Ok(())
    }

    /// Delete a named object
    pub async fn delete(&self, id: &ObjectIdentifier, options: &DeleteOptions) -> Result<()> {
        let req = self.object_request(id)?.delete(&id.name, options)?;
        self.client
            .request_bytes(req, Verb::Delete, self.kind.kind(), "")
            .await?;
        Ok(())
    }

    /// List one page of the kind's objects in a namespace
    /// ([`NAMESPACE_ALL`] for all namespaces)
    pub async fn list(&self, namespace: &str, options: &ListOptions) -> Result<Box<dyn ListObject>> {
        let mut into = self.kind.zero_list_value();
        self.list_into(namespace, options, into.as_mut()).await?;
        Ok(into)
    }

    /// List one page, decoding into a caller-supplied list container.
    ///
    /// The container is only touched after every item decoded successfully;
    /// a mid-list decode failure leaves it unchanged.
    pub async fn list_into(
        &self,
        namespace: &str,
        options: &ListOptions,
        into: &mut dyn ListObject,
    ) -> Result<()> {
        let req = self.collection_request(namespace)?.list(options)?;
        let bytes = self
            .client
            .request_bytes(req, Verb::List, self.kind.kind(), "")
            .await?;
        let envelope: Value = serde_json::from_slice(&bytes)?;

        let mut items: Vec<Box<dyn Object>> = Vec::new();
        if let Some(raw_items) = envelope.get("items").and_then(Value::as_array) {
            items.reserve(raw_items.len());
            for raw in raw_items {
                let mut obj = self.kind.zero_value();
                let data = serde_json::to_vec(raw)?;
                self.codec.read_into(&data, obj.as_mut())?;
                items.push(obj);
            }
        }
        let metadata: ListMetadata = match envelope.get("metadata") {
            Some(meta) => serde_json::from_value(meta.clone())?,
            None => ListMetadata::default(),
        };
        into.set_list_metadata(metadata);
        *into.items_mut() = items;
        Ok(())
    }

    /// List all objects, following continue tokens until exhaustion.
    ///
    /// The returned container carries the final page's resource version and
    /// no continue token.
    pub async fn list_all(&self, namespace: &str, options: &ListOptions) -> Result<Box<dyn ListObject>> {
        let mut accumulated = self.kind.zero_list_value();
        let mut page = self.kind.zero_list_value();
        let mut options = options.clone();
        loop {
            self.list_into(namespace, &options, page.as_mut()).await?;
            accumulated.items_mut().append(page.items_mut());
            let metadata = page.list_metadata().clone();
            let token = metadata.continue_token.clone().filter(|t| !t.is_empty());
            accumulated.set_list_metadata(ListMetadata {
                continue_token: None,
                ..metadata
            });
            match token {
                Some(token) => options.continue_token = Some(token),
                None => return Ok(accumulated),
            }
        }
    }

    /// Open a watch over the kind's objects in a namespace
    /// ([`NAMESPACE_ALL`] for all namespaces)
    pub async fn watch(&self, namespace: &str, options: &WatchOptions) -> Result<WatchResponse> {
        let req = self.collection_request(namespace)?.watch(options)?;
        let lines = self
            .client
            .request_lines(req, Verb::Watch, self.kind.kind(), "")
            .await?;
        Ok(WatchResponse::new(
            Box::pin(lines),
            Arc::clone(&self.kind),
            Arc::clone(&self.codec),
            options.decoder_workers,
            options.event_buffer,
        ))
    }
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient").field("kind", &self.kind).finish()
    }
}
