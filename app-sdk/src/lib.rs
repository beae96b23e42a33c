//! Kubernetes-native application SDK core.
//!
//! This facade re-exports the three layers of the SDK:
//!
//! - [`core`]: kind descriptors, the object contract, metadata translation,
//!   codecs and admission types (no I/O)
//! - [`client`]: the REST layer, typed per-kind clients, watch translation
//!   and the schemaless patcher
//! - [`runtime`]: the informer engine and the admission webhook server
//!
//! The common entry points are lifted to the crate root: register [`Kind`]s,
//! build a [`ClientRegistry`], then hand [`ResourceClient`]s to
//! [`ResourceInformer`]s and controllers.

pub use app_sdk_client as client;
pub use app_sdk_core as core;
pub use app_sdk_runtime as runtime;

pub use app_sdk_core::{
    CommonMetadata, Encoding, GroupVersion, GroupVersionKind, GroupVersionResource, Kind,
    KindRegistry, ListObject, Object, ObjectIdentifier, Scope, StaticMetadata, TypedObject,
    UntypedList, UntypedObject, NAMESPACE_ALL,
};

pub use app_sdk_client::{ClientRegistry, ClusterConfig, DynamicPatcher, ResourceClient, WatchResponse};

pub use app_sdk_runtime::{
    AdmissionServer, AdmissionServerOptions, EventHandler, InformerOptions, MutatingAdmissionController,
    OpinionatedMutatingController, OpinionatedValidatingController, ResourceInformer,
    ValidatingAdmissionController,
};

#[cfg(test)] mod mock_tests;
