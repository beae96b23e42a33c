//! Request builder for a kind's collection endpoint.
use crate::{
    error::Error,
    options::{CreateOptions, DeleteOptions, GetOptions, ListOptions, PatchOptions, UpdateOptions, WatchOptions},
};

pub(crate) const JSON_MIME: &str = "application/json";
pub(crate) const JSON_PATCH_MIME: &str = "application/json-patch+json";
/// Extended Accept header requesting a `meta.k8s.io/v1 PartialObjectMetadata`
/// rendering of the object (efficiently retrieves metadata only).
pub(crate) const JSON_METADATA_MIME: &str =
    "application/json;as=PartialObjectMetadata;g=meta.k8s.io;v=v1";

/// A request builder bound to one collection path.
///
/// Takes the kind's collection URL (including the namespace segment where
/// applicable) and supplies one constructor per verb, each returning a
/// path-relative `http::Request` for the REST layer to dispatch.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    /// The path component of the collection url
    pub url_path: String,
}

impl ResourceRequest {
    /// New request builder for a collection url path
    pub fn new<S: Into<String>>(url_path: S) -> Self {
        Self {
            url_path: url_path.into(),
        }
    }

    fn with_query(path: String, query: String) -> String {
        if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        }
    }

    /// Get a single object
    pub fn get(&self, name: &str, options: &GetOptions) -> Result<http::Request<Vec<u8>>, Error> {
        let mut qp = form_urlencoded::Serializer::new(String::new());
        if let Some(rv) = &options.resource_version {
            qp.append_pair("resourceVersion", rv);
        }
        let urlstr = Self::with_query(format!("{}/{}", self.url_path, name), qp.finish());
        http::Request::get(urlstr).body(vec![]).map_err(Error::Http)
    }

    /// Get only the metadata of a single object
    pub fn get_metadata(&self, name: &str) -> Result<http::Request<Vec<u8>>, Error> {
        http::Request::get(format!("{}/{}", self.url_path, name))
            .header(http::header::ACCEPT, JSON_METADATA_MIME)
            .header(http::header::CONTENT_TYPE, JSON_MIME)
            .body(vec![])
            .map_err(Error::Http)
    }

    /// List a page of the collection
    pub fn list(&self, options: &ListOptions) -> Result<http::Request<Vec<u8>>, Error> {
        let mut qp = form_urlencoded::Serializer::new(String::new());
        options.populate_qp(&mut qp);
        let urlstr = Self::with_query(self.url_path.clone(), qp.finish());
        http::Request::get(urlstr).body(vec![]).map_err(Error::Http)
    }

    /// Open a watch stream over the collection
    pub fn watch(&self, options: &WatchOptions) -> Result<http::Request<Vec<u8>>, Error> {
        let mut qp = form_urlencoded::Serializer::new(String::new());
        options.populate_qp(&mut qp);
        let urlstr = Self::with_query(self.url_path.clone(), qp.finish());
        http::Request::get(urlstr).body(vec![]).map_err(Error::Http)
    }

    /// Create a new object from its encoded wire form
    pub fn create(&self, options: &CreateOptions, data: Vec<u8>) -> Result<http::Request<Vec<u8>>, Error> {
        let mut qp = form_urlencoded::Serializer::new(String::new());
        if options.dry_run {
            qp.append_pair("dryRun", "All");
        }
        let urlstr = Self::with_query(self.url_path.clone(), qp.finish());
        http::Request::post(urlstr)
            .header(http::header::CONTENT_TYPE, JSON_MIME)
            .body(data)
            .map_err(Error::Http)
    }

    /// Replace an object (or one of its subresources) with its encoded wire
    /// form. Requires `metadata.resourceVersion` to be set in the data.
    pub fn update(
        &self,
        name: &str,
        options: &UpdateOptions,
        data: Vec<u8>,
    ) -> Result<http::Request<Vec<u8>>, Error> {
        let mut target = format!("{}/{}", self.url_path, name);
        if let Some(subresource) = &options.subresource {
            target = format!("{target}/{subresource}");
        }
        let mut qp = form_urlencoded::Serializer::new(String::new());
        if options.dry_run {
            qp.append_pair("dryRun", "All");
        }
        let urlstr = Self::with_query(target, qp.finish());
        http::Request::put(urlstr)
            .header(http::header::CONTENT_TYPE, JSON_MIME)
            .body(data)
            .map_err(Error::Http)
    }

    /// Apply a JSON-Patch to an object (or one of its subresources)
    pub fn patch(
        &self,
        name: &str,
        options: &PatchOptions,
        data: Vec<u8>,
    ) -> Result<http::Request<Vec<u8>>, Error> {
        let mut target = format!("{}/{}", self.url_path, name);
        if let Some(subresource) = &options.subresource {
            target = format!("{target}/{subresource}");
        }
        let mut qp = form_urlencoded::Serializer::new(String::new());
        if options.dry_run {
            qp.append_pair("dryRun", "All");
        }
        let urlstr = Self::with_query(target, qp.finish());
        http::Request::patch(urlstr)
            .header(http::header::ACCEPT, JSON_MIME)
            .header(http::header::CONTENT_TYPE, JSON_PATCH_MIME)
            .body(data)
            .map_err(Error::Http)
    }

    /// Delete a named object
    pub fn delete(&self, name: &str, options: &DeleteOptions) -> Result<http::Request<Vec<u8>>, Error> {
        let mut qp = form_urlencoded::Serializer::new(String::new());
        options.populate_qp(&mut qp);
        let urlstr = Self::with_query(format!("{}/{}", self.url_path, name), qp.finish());
        http::Request::delete(urlstr)
            .header(http::header::CONTENT_TYPE, JSON_MIME)
            .body(vec![])
            .map_err(Error::Http)
    }
}
