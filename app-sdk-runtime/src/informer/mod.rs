//! A list-then-watch loop that maintains an in-memory cache of a kind's
//! objects and fans out transitions to registered handlers.
//!
//! The loop seeds the cache from a paginated list, watches from the list's
//! resourceVersion, and relists from scratch whenever the watch terminates
//! (stream end, transport interruption, or a 410 Gone from the server),
//! with exponential backoff on errors. An optional resync timer replays the
//! cache as synthetic update events so handlers can recover dropped work
//! without touching the server.
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use app_sdk_client::{Error as ClientError, ResourceClient};
use app_sdk_core::{
    metadata::{ObjectIdentifier, NAMESPACE_ALL},
    object::Object,
    options::{ListOptions, WatchOptions},
    watch::WatchEvent,
};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounterVec, Opts, Registry};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

mod store;
pub use store::Store;

/// Error type surfaced by handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every error the informer swallows to keep running
pub type ErrorHandler = Arc<dyn Fn(InformerError) + Send + Sync>;

/// A consumer of object transitions.
///
/// Handlers are invoked serially per object, in source order; no ordering
/// holds across distinct objects.
pub trait EventHandler: Send + Sync {
    /// An object appeared
    fn on_add(&self, obj: Arc<dyn Object>) -> BoxFuture<'_, Result<(), HandlerError>>;
    /// An object changed
    fn on_update(
        &self,
        old: Arc<dyn Object>,
        new: Arc<dyn Object>,
    ) -> BoxFuture<'_, Result<(), HandlerError>>;
    /// An object went away
    fn on_delete(&self, obj: Arc<dyn Object>) -> BoxFuture<'_, Result<(), HandlerError>>;
}

/// Errors reported through the informer's [`ErrorHandler`] or returned by
/// [`ResourceInformer::run`].
#[derive(Debug, Error)]
pub enum InformerError {
    /// A handler returned an error
    #[error("event handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// A handler exceeded the event timeout and was dropped
    #[error("event handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    /// The client failed; the informer relists with backoff
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The server reported a watch error that is not a resume-window expiry
    #[error("watch error from server: {0}")]
    Watch(app_sdk_core::Status),

    /// `run` was called on an informer that already ran
    #[error("informer has already been started")]
    AlreadyStarted,
}

/// Lifecycle of an informer. Stopped is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InformerState {
    /// Constructed, not yet running
    Created,
    /// Running, initial sync not yet complete
    Syncing,
    /// Running with a seeded cache
    Synced,
    /// Run loop has exited
    Stopped,
}

/// Tuning knobs and filters for a [`ResourceInformer`].
#[derive(Clone)]
pub struct InformerOptions {
    /// Namespace to watch; [`NAMESPACE_ALL`] for all namespaces
    pub namespace: String,
    /// Label selector expressions applied to list and watch
    pub label_filters: Vec<String>,
    /// Field selector expressions applied to list and watch
    pub field_selectors: Vec<String>,
    /// Replay the cache as synthetic updates at this cadence, when set
    pub resync_interval: Option<Duration>,
    /// Deadline per handler invocation; expired handlers are dropped and
    /// reported. Clamped to the resync interval when both are set.
    pub event_timeout: Option<Duration>,
    /// Page size of the seeding list
    pub page_size: u32,
    /// Report healthy before the initial sync completes
    pub health_check_ignore_sync: bool,
}

impl Default for InformerOptions {
    fn default() -> Self {
        Self {
            namespace: NAMESPACE_ALL.to_string(),
            label_filters: Vec::new(),
            field_selectors: Vec::new(),
            resync_interval: None,
            event_timeout: None,
            page_size: 500,
            health_check_ignore_sync: false,
        }
    }
}

/// Counters for watch activity, optional per informer.
#[derive(Clone)]
pub struct InformerMetrics {
    events: IntCounterVec,
    errors: IntCounterVec,
}

impl InformerMetrics {
    /// Create the collectors and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events = IntCounterVec::new(
            Opts::new("watch_events_total", "Watch events observed by informers."),
            &["event_type", "kind"],
        )?;
        registry.register(Box::new(events.clone()))?;
        let errors = IntCounterVec::new(
            Opts::new("watch_errors_total", "Errors observed by informers."),
            &["error_type", "kind"],
        )?;
        registry.register(Box::new(errors.clone()))?;
        Ok(Self { events, errors })
    }

    fn event(&self, event_type: &str, kind: &str) {
        self.events.with_label_values(&[event_type, kind]).inc();
    }

    fn error(&self, error_type: &str, kind: &str) {
        self.errors.with_label_values(&[error_type, kind]).inc();
    }
}

/// Handle returned by handler registration, used for O(1) removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerHandle(u64);

enum WatchOutcome {
    Cancelled,
    Terminated,
}

/// The informer engine for one kind within one filter scope.
pub struct ResourceInformer {
    client: ResourceClient,
    options: InformerOptions,
    store: Store,
    handlers: RwLock<Vec<(u64, Arc<dyn EventHandler>)>>,
    next_handler: AtomicU64,
    state: Mutex<InformerState>,
    has_synced: AtomicBool,
    stopped: AtomicBool,
    error_handler: RwLock<Option<ErrorHandler>>,
    metrics: Option<InformerMetrics>,
}

impl ResourceInformer {
    /// An informer over a typed client
    pub fn new(client: ResourceClient, options: InformerOptions) -> Self {
        Self {
            client,
            options,
            store: Store::new(),
            handlers: RwLock::new(Vec::new()),
            next_handler: AtomicU64::new(0),
            state: Mutex::new(InformerState::Created),
            has_synced: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            error_handler: RwLock::new(None),
            metrics: None,
        }
    }

    /// Attach watch metrics collectors
    #[must_use]
    pub fn with_metrics(mut self, metrics: InformerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register an event handler; must happen before or during `run`
    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) -> HandlerHandle {
        let id = self.next_handler.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, handler));
        HandlerHandle(id)
    }

    /// Remove a previously registered handler
    pub fn remove_event_handler(&self, handle: HandlerHandle) {
        self.handlers.write().retain(|(id, _)| *id != handle.0);
    }

    /// Route swallowed errors (handler failures, relist causes) somewhere
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write() = Some(handler);
    }

    /// The informer's cache
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current lifecycle state
    pub fn state(&self) -> InformerState {
        *self.state.lock()
    }

    /// Whether the initial list has completed and its events were delivered.
    /// Latches true once and stays true across relists.
    pub fn has_synced(&self) -> bool {
        self.has_synced.load(Ordering::SeqCst)
    }

    /// Whether the run loop has exited; terminal
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Health surface: synced (unless ignored) and not stopped
    pub fn healthy(&self) -> bool {
        (self.has_synced() || self.options.health_check_ignore_sync) && !self.is_stopped()
    }

    /// The health check name, encoding the kind and the filter scope
    pub fn health_check_name(&self) -> String {
        let kind = self.client.kind();
        let mut name = format!(
            "informer-{}.{}/{}",
            kind.plural(),
            kind.group(),
            kind.version()
        );
        if !self.options.namespace.is_empty() {
            name.push_str(&format!("/namespaces/{}", self.options.namespace));
        }
        let mut query = Vec::new();
        if !self.options.label_filters.is_empty() {
            query.push(format!("labelSelector={}", self.options.label_filters.join(",")));
        }
        if !self.options.field_selectors.is_empty() {
            query.push(format!("fieldSelector={}", self.options.field_selectors.join(",")));
        }
        if !query.is_empty() {
            name.push('?');
            name.push_str(&query.join("&"));
        }
        name
    }

    /// Run until the token is cancelled. Consumes the informer's one
    /// lifecycle; a second call fails.
    pub async fn run(&self, token: CancellationToken) -> Result<(), InformerError> {
        {
            let mut state = self.state.lock();
            if *state != InformerState::Created {
                return Err(InformerError::AlreadyStarted);
            }
            *state = InformerState::Syncing;
        }

        let mut backoff = Duration::from_millis(500);
        const MAX_BACKOFF: Duration = Duration::from_secs(30);

        while !token.is_cancelled() {
            match self.sync_and_watch(&token).await {
                Ok(WatchOutcome::Cancelled) => break,
                Ok(WatchOutcome::Terminated) => {
                    // Normal stream end or resume-window expiry; relist now.
                    backoff = Duration::from_millis(500);
                }
                Err(err) => {
                    self.observe_error_label("client");
                    tracing::warn!(error = %err, informer = %self.health_check_name(), "informer pass failed, backing off before relist");
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
        *self.state.lock() = InformerState::Stopped;
        Ok(())
    }

    async fn sync_and_watch(&self, token: &CancellationToken) -> Result<WatchOutcome, InformerError> {
        let resource_version = self.seed_cache(token).await?;
        if token.is_cancelled() {
            return Ok(WatchOutcome::Cancelled);
        }
        self.has_synced.store(true, Ordering::SeqCst);
        *self.state.lock() = InformerState::Synced;
        self.watch_from(token, resource_version).await
    }

    // Paginated list: upsert every listed object (diffing against the
    // cache), then delete whatever the cache still holds that the server no
    // longer listed. Returns the list's resourceVersion as the watch start.
    async fn seed_cache(&self, token: &CancellationToken) -> Result<String, InformerError> {
        let kind_label = self.client.kind().kind().to_string();
        let mut options = ListOptions {
            label_filters: self.options.label_filters.clone(),
            field_selectors: self.options.field_selectors.clone(),
            limit: Some(self.options.page_size),
            ..ListOptions::default()
        };
        let mut seen: HashSet<ObjectIdentifier> = HashSet::new();
        let mut resource_version = String::new();

        loop {
            let mut page = self.client.list(&self.options.namespace, &options).await?;
            let metadata = page.list_metadata().clone();
            resource_version = metadata.resource_version.clone();

            for item in page.items_mut().drain(..) {
                if token.is_cancelled() {
                    return Ok(resource_version);
                }
                let obj: Arc<dyn Object> = Arc::from(item);
                let id = obj.static_metadata().identifier();
                seen.insert(id.clone());
                match self.store.get(&id) {
                    None => {
                        self.store.insert(Arc::clone(&obj));
                        self.observe_event("add", &kind_label);
                        self.dispatch(|h| h.on_add(Arc::clone(&obj))).await;
                    }
                    Some(old) => {
                        if old.common_metadata().resource_version
                            != obj.common_metadata().resource_version
                        {
                            self.store.insert(Arc::clone(&obj));
                            self.observe_event("update", &kind_label);
                            self.dispatch(|h| h.on_update(Arc::clone(&old), Arc::clone(&obj)))
                                .await;
                        }
                    }
                }
            }

            match metadata.continue_token.filter(|t| !t.is_empty()) {
                Some(token) => options.continue_token = Some(token),
                None => break,
            }
        }

        for (id, obj) in self.store.entries() {
            if !seen.contains(&id) {
                self.store.remove(&id);
                self.observe_event("delete", &kind_label);
                self.dispatch(|h| h.on_delete(Arc::clone(&obj))).await;
            }
        }
        Ok(resource_version)
    }

    async fn watch_from(
        &self,
        token: &CancellationToken,
        resource_version: String,
    ) -> Result<WatchOutcome, InformerError> {
        let kind_label = self.client.kind().kind().to_string();
        let watch_options = WatchOptions {
            label_filters: self.options.label_filters.clone(),
            field_selectors: self.options.field_selectors.clone(),
            resource_version,
            ..WatchOptions::default()
        };
        let mut watch = self.client.watch(&self.options.namespace, &watch_options).await?;

        // The resync timer replays cached state to handlers without
        // contacting the server.
        let resync_period = self.options.resync_interval.unwrap_or(Duration::from_secs(3600));
        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + resync_period,
            resync_period,
        );

        let outcome = loop {
            tokio::select! {
                () = token.cancelled() => break WatchOutcome::Cancelled,
                _ = resync.tick(), if self.options.resync_interval.is_some() => {
                    tracing::debug!(informer = %self.health_check_name(), "resyncing cache to handlers");
                    for obj in self.store.state() {
                        self.observe_event("resync", &kind_label);
                        self.dispatch(|h| h.on_update(Arc::clone(&obj), Arc::clone(&obj))).await;
                    }
                }
                event = watch.next() => match event {
                    None => break WatchOutcome::Terminated,
                    Some(WatchEvent::Added(obj)) | Some(WatchEvent::Modified(obj)) => {
                        let obj: Arc<dyn Object> = Arc::from(obj);
                        match self.store.insert(Arc::clone(&obj)) {
                            Some(old) => {
                                self.observe_event("update", &kind_label);
                                self.dispatch(|h| h.on_update(Arc::clone(&old), Arc::clone(&obj))).await;
                            }
                            None => {
                                self.observe_event("add", &kind_label);
                                self.dispatch(|h| h.on_add(Arc::clone(&obj))).await;
                            }
                        }
                    }
                    Some(WatchEvent::Deleted(obj)) => {
                        let obj: Arc<dyn Object> = Arc::from(obj);
                        let id = obj.static_metadata().identifier();
                        let cached = self.store.remove(&id).unwrap_or(obj);
                        self.observe_event("delete", &kind_label);
                        self.dispatch(|h| h.on_delete(Arc::clone(&cached))).await;
                    }
                    Some(WatchEvent::Bookmark { resource_version }) => {
                        // Advances the server-side resume point; no handler
                        // dispatch, and relists start over anyway.
                        tracing::trace!(%resource_version, "watch bookmark");
                        self.observe_event("bookmark", &kind_label);
                    }
                    Some(WatchEvent::Error(status)) => {
                        self.observe_event("error", &kind_label);
                        if status.code == 410 {
                            // Resume window expired; relist from scratch.
                            break WatchOutcome::Terminated;
                        }
                        self.report(InformerError::Watch(status));
                    }
                },
            }
        };
        watch.stop().await;
        Ok(outcome)
    }

    // Fan an event out to every handler, serially, each under the effective
    // event deadline.
    async fn dispatch<F>(&self, mut invoke: F)
    where
        F: for<'h> FnMut(&'h dyn EventHandler) -> BoxFuture<'h, Result<(), HandlerError>>,
    {
        let handlers: Vec<_> = self.handlers.read().iter().map(|(_, h)| Arc::clone(h)).collect();
        let deadline = self.effective_timeout();
        for handler in &handlers {
            let fut = invoke(handler.as_ref());
            match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => self.report(InformerError::Handler(err)),
                    Err(_) => self.report(InformerError::HandlerTimeout(deadline)),
                },
                None => {
                    if let Err(err) = fut.await {
                        self.report(InformerError::Handler(err));
                    }
                }
            }
        }
    }

    // min(event_timeout, resync_interval) when both are set.
    fn effective_timeout(&self) -> Option<Duration> {
        match (self.options.event_timeout, self.options.resync_interval) {
            (Some(timeout), Some(resync)) => Some(timeout.min(resync)),
            (Some(timeout), None) => Some(timeout),
            (None, _) => None,
        }
    }

    fn report(&self, err: InformerError) {
        match &err {
            InformerError::Handler(_) => self.observe_error_label("handler"),
            InformerError::HandlerTimeout(_) => self.observe_error_label("handler_timeout"),
            InformerError::Watch(_) => self.observe_error_label("watch"),
            _ => self.observe_error_label("client"),
        }
        if let Some(handler) = self.error_handler.read().clone() {
            handler(err);
        } else {
            tracing::warn!(error = %err, informer = %self.health_check_name(), "informer error");
        }
    }

    fn observe_event(&self, event_type: &str, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.event(event_type, kind);
        }
    }

    fn observe_error_label(&self, error_type: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.error(error_type, self.client.kind().kind());
        }
    }
}

impl std::fmt::Debug for ResourceInformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInformer")
            .field("name", &self.health_check_name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests;
