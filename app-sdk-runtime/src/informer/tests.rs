use std::{sync::Arc, time::Duration};

use app_sdk_client::{Body, ClientRegistry};
use app_sdk_core::{GroupVersionKind, Kind, Scope};
use bytes::Bytes;
use futures::{future::BoxFuture, StreamExt};
use http::{Request, Response, Uri};
use http_body_util::StreamBody;
use http_body::Frame;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;

type MockHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

fn test_informer(options: InformerOptions) -> (Arc<ResourceInformer>, MockHandle) {
    let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let registry =
        ClientRegistry::new(service, Uri::from_static("/"), &prometheus::Registry::new()).unwrap();
    let kind = Arc::new(Kind::untyped(
        GroupVersionKind::gvk("dashboards.grafana.com", "v1", "Dashboard"),
        "dashboards",
        Scope::Namespaced,
    ));
    let client = registry.resource_client(kind).unwrap();
    (Arc::new(ResourceInformer::new(client, options)), handle)
}

fn item(name: &str, rv: &str) -> serde_json::Value {
    json!({
        "apiVersion": "dashboards.grafana.com/v1",
        "kind": "Dashboard",
        "metadata": {"name": name, "namespace": "ns", "resourceVersion": rv},
        "spec": {}
    })
}

fn list_response(items: Vec<serde_json::Value>, rv: &str) -> Response<Body> {
    let body = json!({
        "apiVersion": "dashboards.grafana.com/v1",
        "kind": "DashboardList",
        "metadata": {"resourceVersion": rv},
        "items": items
    });
    Response::builder()
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

// A watch response whose frames are fed through a channel; dropping the
// sender ends the stream like a server-side watch expiry would.
fn watch_response() -> (mpsc::Sender<String>, Response<Body>) {
    let (tx, mut rx) = mpsc::channel::<String>(16);
    let frames = futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
        .map(|line| Ok::<_, std::io::Error>(Frame::data(Bytes::from(line))));
    let response = Response::builder()
        .body(Body::wrap_body(StreamBody::new(frames)))
        .unwrap();
    (tx, response)
}

fn watch_event(event_type: &str, name: &str, rv: &str) -> String {
    let mut line = json!({"type": event_type, "object": item(name, rv)}).to_string();
    line.push('\n');
    line
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl EventHandler for Recorder {
    fn on_add(&self, obj: Arc<dyn Object>) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async move {
            self.events.lock().push(format!("add:{}", obj.static_metadata().name));
            Ok(())
        })
    }

    fn on_update(
        &self,
        old: Arc<dyn Object>,
        new: Arc<dyn Object>,
    ) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async move {
            self.events.lock().push(format!(
                "update:{}:{}->{}",
                new.static_metadata().name,
                old.common_metadata().resource_version,
                new.common_metadata().resource_version
            ));
            Ok(())
        })
    }

    fn on_delete(&self, obj: Arc<dyn Object>) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async move {
            self.events.lock().push(format!("delete:{}", obj.static_metadata().name));
            Ok(())
        })
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_watch_dispatch_and_relist() {
    let (informer, mut handle) = test_informer(InformerOptions::default());
    let recorder = Arc::new(Recorder::default());
    informer.add_event_handler(recorder.clone());

    let server = tokio::spawn(async move {
        // Seed list.
        let (req, send) = handle.next_request().await.expect("list expected");
        let query = req.uri().query().unwrap_or_default();
        assert!(query.contains("limit=500"), "seed list is paginated: {query}");
        send.send_response(list_response(vec![item("a", "1"), item("b", "2")], "10"));

        // Watch picks up from the list's resourceVersion.
        let (req, send) = handle.next_request().await.expect("watch expected");
        let query = req.uri().query().unwrap_or_default();
        assert!(query.contains("watch=1"), "{query}");
        assert!(query.contains("resourceVersion=10"), "{query}");
        let (tx, response) = watch_response();
        send.send_response(response);
        tx.send(watch_event("MODIFIED", "a", "11")).await.unwrap();
        tx.send(watch_event("DELETED", "b", "12")).await.unwrap();
        drop(tx); // stream end forces a relist

        // Relist: "a" unchanged, nothing else.
        let (_req, send) = handle.next_request().await.expect("relist expected");
        send.send_response(list_response(vec![item("a", "11")], "13"));

        // Second watch stays open until the informer is cancelled.
        let (_req, send) = handle.next_request().await.expect("second watch expected");
        let (tx, response) = watch_response();
        send.send_response(response);
        tx.closed().await;
    });

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let informer = informer.clone();
        let token = token.clone();
        async move { informer.run(token).await }
    });

    wait_for("all transitions", || {
        let events = recorder.snapshot();
        events.contains(&"update:a:1->11".to_string()) && events.contains(&"delete:b".to_string())
    })
    .await;

    assert!(informer.has_synced());
    assert!(informer.healthy());
    assert_eq!(informer.store().len(), 1);
    let events = recorder.snapshot();
    assert_eq!(&events[..2], &["add:a".to_string(), "add:b".to_string()]);

    token.cancel();
    run.await.unwrap().unwrap();
    assert!(informer.is_stopped());
    assert!(!informer.healthy());
    assert_eq!(informer.state(), InformerState::Stopped);
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gone_error_triggers_relist() {
    let (informer, mut handle) = test_informer(InformerOptions::default());
    let recorder = Arc::new(Recorder::default());
    informer.add_event_handler(recorder.clone());

    let server = tokio::spawn(async move {
        let (_req, send) = handle.next_request().await.expect("list expected");
        send.send_response(list_response(vec![item("a", "1")], "10"));

        let (_req, send) = handle.next_request().await.expect("watch expected");
        let (tx, response) = watch_response();
        send.send_response(response);
        let mut gone = json!({
            "type": "ERROR",
            "object": {"kind": "Status", "apiVersion": "v1", "status": "Failure", "reason": "Expired", "code": 410}
        })
        .to_string();
        gone.push('\n');
        tx.send(gone).await.unwrap();
        drop(tx);

        // The 410 must produce an immediate relist, not a backoff death.
        let (_req, send) = handle.next_request().await.expect("relist after 410 expected");
        send.send_response(list_response(vec![item("a", "2")], "20"));

        let (_req, send) = handle.next_request().await.expect("watch after relist expected");
        let (tx, response) = watch_response();
        send.send_response(response);
        tx.closed().await;
    });

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let informer = informer.clone();
        let token = token.clone();
        async move { informer.run(token).await }
    });

    wait_for("relist update", || {
        recorder.snapshot().contains(&"update:a:1->2".to_string())
    })
    .await;

    token.cancel();
    run.await.unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resync_replays_cache_without_server_contact() {
    let options = InformerOptions {
        resync_interval: Some(Duration::from_millis(100)),
        ..InformerOptions::default()
    };
    let (informer, mut handle) = test_informer(options);
    let recorder = Arc::new(Recorder::default());
    informer.add_event_handler(recorder.clone());

    let server = tokio::spawn(async move {
        let (_req, send) = handle.next_request().await.expect("list expected");
        send.send_response(list_response(vec![item("a", "7")], "7"));

        let (_req, send) = handle.next_request().await.expect("watch expected");
        let (tx, response) = watch_response();
        send.send_response(response);
        // No further requests: resync must come from the cache alone.
        tokio::select! {
            () = tx.closed() => {}
            _ = handle.next_request() => panic!("resync must not hit the server"),
        }
    });

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let informer = informer.clone();
        let token = token.clone();
        async move { informer.run(token).await }
    });

    wait_for("synthetic resync updates", || {
        recorder
            .snapshot()
            .iter()
            .filter(|e| e.as_str() == "update:a:7->7")
            .count()
            >= 2
    })
    .await;

    token.cancel();
    run.await.unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_handlers_are_dropped_and_reported() {
    struct Sleeper;
    impl EventHandler for Sleeper {
        fn on_add(&self, _obj: Arc<dyn Object>) -> BoxFuture<'_, Result<(), HandlerError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            })
        }
        fn on_update(
            &self,
            _old: Arc<dyn Object>,
            _new: Arc<dyn Object>,
        ) -> BoxFuture<'_, Result<(), HandlerError>> {
            Box::pin(async { Ok(()) })
        }
        fn on_delete(&self, _obj: Arc<dyn Object>) -> BoxFuture<'_, Result<(), HandlerError>> {
            Box::pin(async { Ok(()) })
        }
    }

    let options = InformerOptions {
        event_timeout: Some(Duration::from_millis(50)),
        ..InformerOptions::default()
    };
    let (informer, mut handle) = test_informer(options);
    informer.add_event_handler(Arc::new(Sleeper));

    let timeouts = Arc::new(Mutex::new(0usize));
    informer.set_error_handler({
        let timeouts = timeouts.clone();
        Arc::new(move |err| {
            if matches!(err, InformerError::HandlerTimeout(_)) {
                *timeouts.lock() += 1;
            }
        })
    });

    let server = tokio::spawn(async move {
        let (_req, send) = handle.next_request().await.expect("list expected");
        send.send_response(list_response(vec![item("a", "1")], "10"));
        let (_req, send) = handle.next_request().await.expect("watch expected");
        let (tx, response) = watch_response();
        send.send_response(response);
        tx.closed().await;
    });

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let informer = informer.clone();
        let token = token.clone();
        async move { informer.run(token).await }
    });

    wait_for("handler timeout report", || *timeouts.lock() >= 1).await;

    token.cancel();
    run.await.unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn informer_runs_only_once() {
    let (informer, _handle) = test_informer(InformerOptions::default());
    let token = CancellationToken::new();
    token.cancel();
    informer.run(token.clone()).await.unwrap();
    let err = informer.run(token).await.unwrap_err();
    assert!(matches!(err, InformerError::AlreadyStarted));
}

#[test]
fn health_check_name_encodes_scope_and_filters() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let options = InformerOptions {
        namespace: "team-a".into(),
        label_filters: vec!["app=blog".into(), "tier=web".into()],
        field_selectors: vec!["metadata.name=dash".into()],
        ..InformerOptions::default()
    };
    let (informer, _handle) = test_informer(options);
    assert_eq!(
        informer.health_check_name(),
        "informer-dashboards.dashboards.grafana.com/v1/namespaces/team-a?labelSelector=app=blog,tier=web&fieldSelector=metadata.name=dash"
    );

    let (plain, _handle) = test_informer(InformerOptions::default());
    assert_eq!(
        plain.health_check_name(),
        "informer-dashboards.dashboards.grafana.com/v1"
    );
}
