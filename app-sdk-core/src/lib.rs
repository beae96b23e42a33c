//! Client-less core of the app SDK: kind descriptors, the object contract,
//! metadata translation, codecs, request building and admission types.
//!
//! This crate has no I/O. The REST, informer and admission layers in the
//! sibling crates are all built on the types here.

pub mod admission;

pub mod codec;
pub use codec::{Codec, Encoding, JsonCodec, YamlCodec};

pub mod gvk;
pub use gvk::{GroupVersion, GroupVersionKind, GroupVersionResource};

pub mod kind;
pub use kind::{Kind, KindRegistry, Scope};

pub mod metadata;
pub use metadata::{
    CommonMetadata, FullIdentifier, ObjectIdentifier, PartialObjectMetadata, StaticMetadata,
    TypeMeta, NAMESPACE_ALL, RESERVED_ANNOTATION_PREFIX, VERSION_LABEL,
};

pub mod object;
pub use object::{ListMetadata, ListObject, NotUsed, Object, TypedObject, UntypedList, UntypedObject};

pub mod options;

pub mod patch;
pub use patch::{PatchOp, PatchOperation, PatchRequest};

pub mod request;
pub use request::ResourceRequest;

pub mod watch;
pub use watch::{WatchEvent, WatchEventType, WireWatchEvent};

mod error;
pub use error::{Error, Status};

/// Convenience alias over this crate's [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
