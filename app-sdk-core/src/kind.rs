//! Kind descriptors and the process-wide kind registry.
//!
//! Kinds are registered explicitly at startup; there is no discovery-driven
//! kind materialization. A descriptor bundles the identity of a resource
//! family, its URL scope, zero-value factories for objects and lists, and
//! the codecs it can be read and written with.
use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    codec::{Codec, Encoding, JsonCodec},
    error::Error,
    gvk::{GroupVersion, GroupVersionKind},
    object::{ListObject, Object, UntypedList, UntypedObject},
};

/// Whether objects of a kind live in a namespace or cluster-wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Objects are namespaced
    Namespaced,
    /// Objects exist cluster-wide
    Cluster,
}

type ObjectFactory = Arc<dyn Fn() -> Box<dyn Object> + Send + Sync>;
type ListFactory = Arc<dyn Fn() -> Box<dyn ListObject> + Send + Sync>;

/// Descriptor of a resource family: identity, scope, zero-value factories
/// and the encoding → codec table.
#[derive(Clone)]
pub struct Kind {
    gvk: GroupVersionKind,
    plural: String,
    scope: Scope,
    factory: ObjectFactory,
    list_factory: ListFactory,
    codecs: HashMap<Encoding, Arc<dyn Codec>>,
}

impl Kind {
    /// A new kind descriptor with explicit factories and no codecs.
    ///
    /// At least one codec must be attached before the kind is registered;
    /// use [`with_codec`](Self::with_codec), or [`Kind::untyped`] for the
    /// common JSON-only case.
    pub fn new(
        gvk: GroupVersionKind,
        plural: &str,
        scope: Scope,
        factory: impl Fn() -> Box<dyn Object> + Send + Sync + 'static,
        list_factory: impl Fn() -> Box<dyn ListObject> + Send + Sync + 'static,
    ) -> Self {
        Self {
            gvk,
            plural: plural.to_string(),
            scope,
            factory: Arc::new(factory),
            list_factory: Arc::new(list_factory),
            codecs: HashMap::new(),
        }
    }

    /// A kind producing [`UntypedObject`] zero values, with the JSON codec
    /// attached.
    pub fn untyped(gvk: GroupVersionKind, plural: &str, scope: Scope) -> Self {
        Self::new(
            gvk,
            plural,
            scope,
            || Box::new(UntypedObject::default()),
            || Box::new(UntypedList::default()),
        )
        .with_codec(Encoding::Json, Arc::new(JsonCodec::default()))
    }

    /// Attach a codec for an encoding
    #[must_use]
    pub fn with_codec(mut self, encoding: Encoding, codec: Arc<dyn Codec>) -> Self {
        self.codecs.insert(encoding, codec);
        self
    }

    /// API group of the kind
    pub fn group(&self) -> &str {
        &self.gvk.group
    }

    /// Version of the kind within its group
    pub fn version(&self) -> &str {
        &self.gvk.version
    }

    /// Kind name
    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    /// URL-path (plural) form of the kind
    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// Scope of the kind
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Group/version/kind identity
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Group/version pair the kind is served under
    pub fn group_version(&self) -> GroupVersion {
        self.gvk.group_version()
    }

    /// A zero-value object of the kind
    pub fn zero_value(&self) -> Box<dyn Object> {
        (self.factory)()
    }

    /// A zero-value list container of the kind
    pub fn zero_list_value(&self) -> Box<dyn ListObject> {
        (self.list_factory)()
    }

    /// The codec for an encoding, if attached
    pub fn codec(&self, encoding: Encoding) -> Option<Arc<dyn Codec>> {
        self.codecs.get(&encoding).cloned()
    }

    /// The JSON codec; required for any kind used with a typed client
    pub fn json_codec(&self) -> Result<Arc<dyn Codec>, Error> {
        self.codec(Encoding::Json)
            .ok_or(Error::MissingCodec(Encoding::Json.as_str()))
    }

    /// Negotiate a codec from a wire media type
    pub fn codec_for_media_type(&self, media_type: &str) -> Option<Arc<dyn Codec>> {
        Encoding::from_media_type(media_type).and_then(|enc| self.codec(enc))
    }

    /// The request path prefix of the kind's endpoint for a namespace.
    ///
    /// Cluster-scoped kinds (and all-namespace list/watch calls) pass `None`.
    pub fn url_path(&self, namespace: Option<&str>) -> String {
        let ns = match namespace {
            Some(ns) if !ns.is_empty() => format!("namespaces/{ns}/"),
            _ => String::new(),
        };
        if self.gvk.group.is_empty() {
            format!("/api/{}/{}{}", self.gvk.version, ns, self.plural)
        } else {
            format!("/apis/{}/{}/{}{}", self.gvk.group, self.gvk.version, ns, self.plural)
        }
    }

    fn has_codecs(&self) -> bool {
        !self.codecs.is_empty()
    }
}

impl std::fmt::Debug for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kind")
            .field("gvk", &self.gvk)
            .field("plural", &self.plural)
            .field("scope", &self.scope)
            .field("encodings", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Process-wide registry of kinds, keyed by group/version/kind.
///
/// Registration happens at startup; lookups are the hot path afterwards, so
/// the map sits behind a reader-writer lock.
#[derive(Default)]
pub struct KindRegistry {
    kinds: RwLock<HashMap<GroupVersionKind, Arc<Kind>>>,
}

impl KindRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind.
    ///
    /// Fails if the kind carries no codecs or a kind with the same identity
    /// is already registered.
    pub fn register(&self, kind: Kind) -> Result<Arc<Kind>, Error> {
        if !kind.has_codecs() {
            return Err(Error::Validation(format!(
                "kind {} has no codecs",
                kind.gvk().kind
            )));
        }
        let mut kinds = self.kinds.write();
        if kinds.contains_key(kind.gvk()) {
            return Err(Error::Validation(format!(
                "kind {}/{} already registered",
                kind.gvk().api_version(),
                kind.gvk().kind
            )));
        }
        let kind = Arc::new(kind);
        kinds.insert(kind.gvk().clone(), Arc::clone(&kind));
        Ok(kind)
    }

    /// Look up a kind by identity
    pub fn get(&self, gvk: &GroupVersionKind) -> Option<Arc<Kind>> {
        self.kinds.read().get(gvk).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard_kind() -> Kind {
        Kind::untyped(
            GroupVersionKind::gvk("dashboards.grafana.com", "v1", "Dashboard"),
            "dashboards",
            Scope::Namespaced,
        )
    }

    #[test]
    fn url_paths_follow_scope() {
        let kind = dashboard_kind();
        assert_eq!(
            kind.url_path(Some("team-a")),
            "/apis/dashboards.grafana.com/v1/namespaces/team-a/dashboards"
        );
        assert_eq!(kind.url_path(None), "/apis/dashboards.grafana.com/v1/dashboards");

        let core = Kind::untyped(GroupVersionKind::gvk("", "v1", "Namespace"), "namespaces", Scope::Cluster);
        assert_eq!(core.url_path(None), "/api/v1/namespaces");
    }

    #[test]
    fn registry_rejects_codecless_kinds() {
        let registry = KindRegistry::new();
        let bare = Kind::new(
            GroupVersionKind::gvk("g", "v1", "Thing"),
            "things",
            Scope::Cluster,
            || Box::new(UntypedObject::default()),
            || Box::new(UntypedList::default()),
        );
        assert!(registry.register(bare).is_err());
    }

    #[test]
    fn registry_rejects_duplicates() {
        let registry = KindRegistry::new();
        registry.register(dashboard_kind()).unwrap();
        assert!(registry.register(dashboard_kind()).is_err());
    }

    #[test]
    fn registered_kind_is_shared() {
        let registry = KindRegistry::new();
        let kind = registry.register(dashboard_kind()).unwrap();
        let looked_up = registry.get(kind.gvk()).unwrap();
        assert_eq!(looked_up.plural(), "dashboards");
        assert!(looked_up.json_codec().is_ok());
    }
}
