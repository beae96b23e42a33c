//! API clients for the app SDK: a per-group/version REST layer with metrics
//! and tracing, typed per-kind clients, watch stream translation, and a
//! schemaless patcher that follows the server's preferred versions.

pub mod client;
pub use client::{Body, ClientMetrics, ClientRegistry, GroupVersionClient, Verb};
pub use client::builder::ClusterConfig;

pub mod dynamic;
pub use dynamic::DynamicPatcher;

pub mod resource;
pub use resource::ResourceClient;

pub mod watch;
pub use watch::WatchResponse;

mod error;
pub use error::{Error, Result};
