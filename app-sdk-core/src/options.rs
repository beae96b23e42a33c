//! Request option structs, one per verb family.
use serde::Serialize;

/// Options for single-object get calls
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Read at an exact resourceVersion instead of the latest state
    pub resource_version: Option<String>,
}

impl GetOptions {
    /// Read at a specific resourceVersion
    #[must_use]
    pub fn at(resource_version: &str) -> Self {
        Self {
            resource_version: Some(resource_version.into()),
        }
    }
}

/// How a list's `resourceVersion` constraint is matched by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionMatch {
    /// Return data no older than the provided version
    NotOlderThan,
    /// Return data at the exact provided version
    Exact,
}

impl VersionMatch {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            VersionMatch::NotOlderThan => "NotOlderThan",
            VersionMatch::Exact => "Exact",
        }
    }
}

/// Options for list calls on a kind's collection
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Label selector expressions, comma-joined on the wire
    pub label_filters: Vec<String>,
    /// Field selector expressions, comma-joined on the wire
    pub field_selectors: Vec<String>,
    /// Maximum number of items per page; the server returns a continue
    /// token when more are available
    pub limit: Option<u32>,
    /// Resume token from a previous limited list
    pub continue_token: Option<String>,
    /// Version constraint for the list
    pub resource_version: Option<String>,
    /// How [`resource_version`](Self::resource_version) is matched
    pub resource_version_match: Option<VersionMatch>,
}

impl ListOptions {
    /// Restrict results by label selector
    #[must_use]
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_filters.push(selector.to_string());
        self
    }

    /// Restrict results by field selector
    #[must_use]
    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selectors.push(selector.to_string());
        self
    }

    /// Set a page-size limit
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume a paginated list
    #[must_use]
    pub fn continue_token(mut self, token: &str) -> Self {
        self.continue_token = Some(token.to_string());
        self
    }

    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        if !self.label_filters.is_empty() {
            qp.append_pair("labelSelector", &self.label_filters.join(","));
        }
        if !self.field_selectors.is_empty() {
            qp.append_pair("fieldSelector", &self.field_selectors.join(","));
        }
        if let Some(limit) = self.limit {
            qp.append_pair("limit", &limit.to_string());
        }
        if let Some(token) = &self.continue_token {
            qp.append_pair("continue", token);
        }
        if let Some(rv) = &self.resource_version {
            qp.append_pair("resourceVersion", rv);
        }
        if let Some(matching) = &self.resource_version_match {
            qp.append_pair("resourceVersionMatch", matching.as_str());
        }
    }
}

/// Options for watch calls
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Label selector expressions, comma-joined on the wire
    pub label_filters: Vec<String>,
    /// Field selector expressions, comma-joined on the wire
    pub field_selectors: Vec<String>,
    /// The resourceVersion to report events newer than
    pub resource_version: String,
    /// Request server bookmark events to keep the resume point fresh
    pub bookmarks: bool,
    /// Number of decoder tasks the watch response shards events over;
    /// `0` decodes inline in strict FIFO order
    pub decoder_workers: usize,
    /// Buffer size of the translated event channel
    pub event_buffer: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            label_filters: Vec::new(),
            field_selectors: Vec::new(),
            resource_version: String::new(),
            bookmarks: true,
            decoder_workers: 0,
            event_buffer: 16,
        }
    }
}

impl WatchOptions {
    /// Watch from a specific resourceVersion
    #[must_use]
    pub fn since(mut self, resource_version: &str) -> Self {
        self.resource_version = resource_version.to_string();
        self
    }

    /// Restrict events by label selector
    #[must_use]
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_filters.push(selector.to_string());
        self
    }

    /// Restrict events by field selector
    #[must_use]
    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selectors.push(selector.to_string());
        self
    }

    /// Shard decoding over `n` tasks keyed by object identity
    #[must_use]
    pub fn decoder_workers(mut self, n: usize) -> Self {
        self.decoder_workers = n;
        self
    }

    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        qp.append_pair("watch", "1");
        if !self.label_filters.is_empty() {
            qp.append_pair("labelSelector", &self.label_filters.join(","));
        }
        if !self.field_selectors.is_empty() {
            qp.append_pair("fieldSelector", &self.field_selectors.join(","));
        }
        if self.bookmarks {
            qp.append_pair("allowWatchBookmarks", "true");
        }
        if !self.resource_version.is_empty() {
            qp.append_pair("resourceVersion", &self.resource_version);
        }
    }
}

/// Options for create calls
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Run server-side validation and admission without persisting
    pub dry_run: bool,
}

/// Options for update (replace) calls
#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    /// The resourceVersion to require on the write.
    ///
    /// When empty, the client first reads the object's current metadata and
    /// uses the server's version, at the cost of an extra round-trip.
    pub resource_version: String,
    /// Route the write to a subresource endpoint (`status`, `scale`, ...)
    pub subresource: Option<String>,
    /// Run server-side validation and admission without persisting
    pub dry_run: bool,
}

/// Options for patch calls
#[derive(Clone, Debug, Default)]
pub struct PatchOptions {
    /// Route the patch to a subresource endpoint
    pub subresource: Option<String>,
    /// Run server-side validation and admission without persisting
    pub dry_run: bool,
}

/// Conditions the server must verify before carrying out a delete.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    /// Required current resourceVersion of the target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Required uid of the target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Garbage-collection policy for delete calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PropagationPolicy {
    /// Orphan dependents
    Orphan,
    /// Delete dependents in the background
    Background,
    /// Delete all dependents before the object itself
    Foreground,
}

impl PropagationPolicy {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            PropagationPolicy::Orphan => "Orphan",
            PropagationPolicy::Background => "Background",
            PropagationPolicy::Foreground => "Foreground",
        }
    }
}

/// Options for delete calls
#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    /// Garbage-collection policy for dependents
    pub propagation_policy: Option<PropagationPolicy>,
    /// Conditions to verify before deleting
    pub preconditions: Option<Preconditions>,
}

impl DeleteOptions {
    pub(crate) fn populate_qp(&self, qp: &mut form_urlencoded::Serializer<String>) {
        if let Some(policy) = &self.propagation_policy {
            qp.append_pair("propagationPolicy", policy.as_str());
        }
        if let Some(preconditions) = &self.preconditions {
            if let Some(rv) = &preconditions.resource_version {
                qp.append_pair("preconditions.resourceVersion", rv);
            }
            if let Some(uid) = &preconditions.uid {
                qp.append_pair("preconditions.uid", uid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(populate: impl Fn(&mut form_urlencoded::Serializer<String>)) -> String {
        let mut qp = form_urlencoded::Serializer::new(String::new());
        populate(&mut qp);
        qp.finish()
    }

    #[test]
    fn list_selectors_are_comma_joined() {
        let lo = ListOptions::default().labels("a").labels("b").fields("c").fields("d");
        assert_eq!(query(|qp| lo.populate_qp(qp)), "labelSelector=a%2Cb&fieldSelector=c%2Cd");
    }

    #[test]
    fn list_pagination_params() {
        let lo = ListOptions::default().limit(50).continue_token("tok");
        assert_eq!(query(|qp| lo.populate_qp(qp)), "limit=50&continue=tok");
    }

    #[test]
    fn watch_query_shape() {
        let wo = WatchOptions::default().since("12");
        assert_eq!(
            query(|qp| wo.populate_qp(qp)),
            "watch=1&allowWatchBookmarks=true&resourceVersion=12"
        );
    }

    #[test]
    fn delete_preconditions_as_query() {
        let opts = DeleteOptions {
            propagation_policy: Some(PropagationPolicy::Foreground),
            preconditions: Some(Preconditions {
                resource_version: Some("123".into()),
                uid: Some("abc".into()),
            }),
        };
        assert_eq!(
            query(|qp| opts.populate_qp(qp)),
            "propagationPolicy=Foreground&preconditions.resourceVersion=123&preconditions.uid=abc"
        );
    }
}
