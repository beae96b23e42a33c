//! Operator runtime for the app SDK: the informer engine and the admission
//! pipeline.
//!
//! Built on the typed clients from `app-sdk-client`; see the `informer` and
//! `admission` modules for the two subsystems.

pub mod admission;
pub use admission::{
    opinionated::{OpinionatedMutatingController, OpinionatedValidatingController},
    AdmissionServer, AdmissionServerError, AdmissionServerOptions, MutatingAdmissionController,
    ValidatingAdmissionController,
};

pub mod informer;
pub use informer::{
    ErrorHandler, EventHandler, HandlerError, HandlerHandle, InformerError, InformerMetrics,
    InformerOptions, InformerState, ResourceInformer, Store,
};
