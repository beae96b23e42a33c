//! Wire-level scenario tests against a mock apiserver.
use std::sync::Arc;

use app_sdk_client::{Body, ClientRegistry};
use app_sdk_core::{
    metadata::ObjectIdentifier,
    options::{DeleteOptions, ListOptions, Preconditions, PropagationPolicy, UpdateOptions},
    GroupVersionKind, Kind, Scope,
};
use http::{Request, Response, Uri};
use serde_json::{json, Value};

use crate::ResourceClient;

// We wrap tower_test::mock::Handle
type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
struct ApiServerVerifier(ApiServerHandle);

fn testcontext() -> (ResourceClient, ApiServerVerifier) {
    let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let registry =
        ClientRegistry::new(service, Uri::from_static("/"), &prometheus::Registry::new()).unwrap();
    let kind = Arc::new(Kind::untyped(
        GroupVersionKind::gvk("dashboards.grafana.com", "v1", "Dashboard"),
        "dashboards",
        Scope::Namespaced,
    ));
    let client = registry.resource_client(kind).unwrap();
    (client, ApiServerVerifier(handle))
}

async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

/// Scenarios the mock apiserver knows how to answer
enum Scenario {
    UpdateWithoutResourceVersion,
    FilteredList,
    DeleteWithPreconditions,
    CreateStampsVersionLabel,
    NotFound,
    PaginatedList,
}

impl ApiServerVerifier {
    fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::UpdateWithoutResourceVersion => self.handle_get_then_put().await,
                Scenario::FilteredList => self.handle_filtered_list().await,
                Scenario::DeleteWithPreconditions => self.handle_delete().await,
                Scenario::CreateStampsVersionLabel => self.handle_create().await,
                Scenario::NotFound => self.handle_not_found().await,
                Scenario::PaginatedList => self.handle_paged_lists().await,
            }
        })
    }

    async fn handle_get_then_put(mut self) {
        // The client omitted a resourceVersion, so the wire traffic must be
        // a metadata GET followed by a PUT carrying the server's version.
        let (request, send) = self.0.next_request().await.expect("metadata get expected");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(
            request.uri().path(),
            "/apis/dashboards.grafana.com/v1/namespaces/ns/dashboards/mydash"
        );
        assert!(request
            .headers()
            .get(http::header::ACCEPT)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("PartialObjectMetadata"));
        send.send_response(response_of(json!({
            "apiVersion": "meta.k8s.io/v1",
            "kind": "PartialObjectMetadata",
            "metadata": {"name": "mydash", "namespace": "ns", "resourceVersion": "345"}
        })));

        let (request, send) = self.0.next_request().await.expect("put expected");
        assert_eq!(request.method(), http::Method::PUT);
        let body = body_json(request.into_body()).await;
        assert_eq!(body["metadata"]["resourceVersion"], "345");
        send.send_response(response_of(dashboard("mydash", "346")));
    }

    async fn handle_filtered_list(mut self) {
        let (request, send) = self.0.next_request().await.expect("list expected");
        assert_eq!(
            request.uri().path(),
            "/apis/dashboards.grafana.com/v1/namespaces/ns/dashboards"
        );
        let query = request.uri().query().unwrap();
        assert_eq!(query, "labelSelector=a%2Cb&fieldSelector=c%2Cd");
        send.send_response(response_of(json!({
            "apiVersion": "dashboards.grafana.com/v1",
            "kind": "DashboardList",
            "metadata": {"resourceVersion": "12"},
            "items": [dashboard("one", "5")]
        })));
    }

    async fn handle_delete(mut self) {
        let (request, send) = self.0.next_request().await.expect("delete expected");
        assert_eq!(request.method(), http::Method::DELETE);
        assert_eq!(
            request.uri().query().unwrap(),
            "propagationPolicy=Foreground&preconditions.resourceVersion=123&preconditions.uid=abc"
        );
        send.send_response(response_of(json!({
            "kind": "Status", "apiVersion": "v1", "status": "Success"
        })));
    }

    async fn handle_not_found(mut self) {
        let (_request, send) = self.0.next_request().await.expect("get expected");
        send.send_response(
            Response::builder()
                .status(http::StatusCode::NOT_FOUND)
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "status": "Failure",
                        "message": "dashboards.dashboards.grafana.com \"missing\" not found",
                        "reason": "NotFound",
                        "code": 404
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        );
    }

    async fn handle_paged_lists(mut self) {
        let (request, send) = self.0.next_request().await.expect("first page expected");
        let query = request.uri().query().unwrap();
        assert!(query.contains("limit=1"), "{query}");
        assert!(!query.contains("continue="), "first list has no continue: {query}");
        send.send_response(response_of(json!({
            "apiVersion": "dashboards.grafana.com/v1",
            "kind": "DashboardList",
            "metadata": {"resourceVersion": "20", "continue": "first"},
            "items": [dashboard("one", "5")]
        })));

        let (request, send) = self.0.next_request().await.expect("second page expected");
        let query = request.uri().query().unwrap();
        assert!(query.contains("continue=first"), "{query}");
        send.send_response(response_of(json!({
            "apiVersion": "dashboards.grafana.com/v1",
            "kind": "DashboardList",
            "metadata": {"resourceVersion": "20"},
            "items": [dashboard("two", "6")]
        })));
    }

    async fn handle_create(mut self) {
        let (request, send) = self.0.next_request().await.expect("create expected");
        assert_eq!(request.method(), http::Method::POST);
        let body = body_json(request.into_body()).await;
        assert_eq!(
            body["metadata"]["labels"]["grafana-app-sdk-resource-version"],
            "v1"
        );
        assert_eq!(body["apiVersion"], "dashboards.grafana.com/v1");
        assert_eq!(body["metadata"]["name"], "mydash");
        send.send_response(response_of(dashboard("mydash", "1")));
    }
}

fn dashboard(name: &str, rv: &str) -> Value {
    json!({
        "apiVersion": "dashboards.grafana.com/v1",
        "kind": "Dashboard",
        "metadata": {"name": name, "namespace": "ns", "resourceVersion": rv},
        "spec": {"title": "latency"}
    })
}

fn response_of(value: Value) -> Response<Body> {
    Response::builder()
        .body(Body::from(serde_json::to_vec(&value).unwrap()))
        .unwrap()
}

async fn body_json(body: Body) -> Value {
    use http_body_util::BodyExt;
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn update_without_resource_version_reads_before_writing() {
    let (client, fakeserver) = testcontext();
    let mocksrv = fakeserver.run(Scenario::UpdateWithoutResourceVersion);

    let id = ObjectIdentifier::namespaced("ns", "mydash");
    let mut obj = client.kind().zero_value();
    obj.set_spec(json!({"title": "latency"})).unwrap();
    let updated = client
        .update(&id, obj.as_mut(), &UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(updated.common_metadata().resource_version, "346");
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn list_joins_label_and_field_filters() {
    let (client, fakeserver) = testcontext();
    let mocksrv = fakeserver.run(Scenario::FilteredList);

    let options = ListOptions::default().labels("a").labels("b").fields("c").fields("d");
    let list = client.list("ns", &options).await.unwrap();
    assert_eq!(list.list_metadata().resource_version, "12");
    assert_eq!(list.items().len(), 1);
    assert_eq!(list.items()[0].static_metadata().name, "one");
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn delete_serializes_propagation_and_preconditions_as_query() {
    let (client, fakeserver) = testcontext();
    let mocksrv = fakeserver.run(Scenario::DeleteWithPreconditions);

    let options = DeleteOptions {
        propagation_policy: Some(PropagationPolicy::Foreground),
        preconditions: Some(Preconditions {
            resource_version: Some("123".into()),
            uid: Some("abc".into()),
        }),
    };
    client
        .delete(&ObjectIdentifier::namespaced("ns", "mydash"), &options)
        .await
        .unwrap();
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn get_opt_maps_not_found_status_to_none() {
    let (client, fakeserver) = testcontext();
    let mocksrv = fakeserver.run(Scenario::NotFound);

    let found = client
        .get_opt(&ObjectIdentifier::namespaced("ns", "missing"))
        .await
        .unwrap();
    assert!(found.is_none());
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn list_all_follows_continue_tokens() {
    let (client, fakeserver) = testcontext();
    let mocksrv = fakeserver.run(Scenario::PaginatedList);

    let options = ListOptions::default().limit(1);
    let all = client.list_all("ns", &options).await.unwrap();
    let names: Vec<_> = all
        .items()
        .iter()
        .map(|obj| obj.static_metadata().name.clone())
        .collect();
    assert_eq!(names, ["one", "two"]);
    assert!(all.list_metadata().continue_token.is_none());
    assert_eq!(all.list_metadata().resource_version, "20");
    timeout_after_1s(mocksrv).await;
}

#[tokio::test]
async fn create_stamps_identity_and_version_label() {
    let (client, fakeserver) = testcontext();
    let mocksrv = fakeserver.run(Scenario::CreateStampsVersionLabel);

    let id = ObjectIdentifier::namespaced("ns", "mydash");
    let mut obj = client.kind().zero_value();
    obj.set_spec(json!({"title": "latency"})).unwrap();
    let created = client
        .create(&id, obj.as_mut(), &Default::default())
        .await
        .unwrap();
    assert_eq!(created.static_metadata().name, "mydash");
    timeout_after_1s(mocksrv).await;
}
