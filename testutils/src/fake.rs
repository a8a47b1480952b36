use httpmock::prelude::*;
use httpmock::{
    Mock,
    Then,
    When,
};
use kube::api::DynamicObject;
use serde_json::json;

use crate::constants::*;

/// A fake apiserver.  Mocks are registered up front and matched in
/// registration order; `build` closes the route table off with a catch-all
/// that logs whatever nothing else claimed, which makes failing tests much
/// easier to read.
pub struct MockServerBuilder {
    server: MockServer,
    mock_ids: Vec<usize>,
}

// println rather than a tracing macro so the output shows up no matter how
// the enclosing test harness configured its subscriber
fn log_request(req: &HttpMockRequest) -> bool {
    println!("    fake apiserver saw: {} {}", req.method(), req.uri_str());
    true
}

impl MockServerBuilder {
    pub fn new() -> MockServerBuilder {
        MockServerBuilder {
            server: MockServer::start(),
            mock_ids: vec![],
        }
    }

    pub fn handle<F: FnOnce(When, Then)>(&mut self, f: F) -> &mut Self {
        let id = self.server.mock(|when, then| f(when.matches(log_request), then)).id;
        self.mock_ids.push(id);
        self
    }

    pub fn handle_not_found(&mut self, path: String) -> &mut Self {
        self.handle(move |when, then| {
            when.path(path);
            then.status(404).json_body(status_not_found());
        })
    }

    /// Serve discovery for apps/v1 so that ApiSet lookups by GVK resolve.
    pub fn handle_apps_discovery(&mut self) -> &mut Self {
        self.handle(|when, then| {
            when.method(GET).path("/apis/apps/v1");
            then.json_body(apps_v1_discovery());
        })
    }

    /// Serve a GET for the given (namespaced, apps/v1) object.
    pub fn handle_obj_get(&mut self, obj: &DynamicObject) -> &mut Self {
        let types = obj.types.clone().unwrap();
        let plural = format!("{}s", types.kind.to_lowercase());
        let path = format!(
            "/apis/{}/namespaces/{}/{plural}/{}",
            types.api_version,
            obj.metadata.namespace.clone().unwrap(),
            obj.metadata.name.clone().unwrap(),
        );
        let body = serde_json::to_value(obj).unwrap();
        self.handle(move |when, then| {
            when.method(GET).path(path);
            then.json_body(body);
        })
    }

    /// Serve a GET for the test namespace, with labels for selector tests.
    pub fn handle_namespace_get(&mut self, annotations: serde_json::Value) -> &mut Self {
        self.handle(move |when, then| {
            when.method(GET).path(format!("/api/v1/namespaces/{TEST_NAMESPACE}"));
            then.json_body(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {
                    "name": TEST_NAMESPACE,
                    "labels": {"env": "prod"},
                    "annotations": annotations,
                },
            }));
        })
    }

    pub fn build(&mut self) {
        self.server.mock(|when, _| {
            when.matches(log_request);
        });
    }

    /// Every registered mock must have been called exactly once.
    pub fn assert(&self) {
        for id in &self.mock_ids {
            Mock::new(*id, &self.server).assert();
        }
    }

    /// Check a single mock's hit count; mocks are indexed in registration
    /// order.
    pub fn assert_hits(&self, index: usize, hits: usize) {
        Mock::new(self.mock_ids[index], &self.server).assert_hits(hits);
    }

    pub fn url(&self) -> http::Uri {
        http::Uri::try_from(self.server.url("/")).unwrap()
    }
}

pub fn make_fake_apiserver() -> (MockServerBuilder, kube::Client) {
    let builder = MockServerBuilder::new();
    let client = kube::Client::try_from(kube::Config::new(builder.url())).unwrap();
    (builder, client)
}

pub fn status_ok() -> serde_json::Value {
    status_body(200, "Success", None)
}

pub fn status_not_found() -> serde_json::Value {
    status_body(404, "Failure", Some("NotFound"))
}

fn status_body(code: u16, status: &str, reason: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": status,
        "code": code,
    });
    if let Some(r) = reason {
        body["reason"] = json!(r);
    }
    body
}

pub fn apps_v1_discovery() -> serde_json::Value {
    json!({
        "kind":"APIResourceList",
        "apiVersion":"v1",
        "groupVersion":"apps/v1",
        "resources":[
            {
                "name":"deployments",
                "singularName":"deployment",
                "namespaced":true,
                "kind":"Deployment",
                "verbs":["create","delete","deletecollection","get","list","patch","update","watch"],
                "shortNames":["deploy"],
                "categories":["all"],
            },
            {
                "name":"deployments/status",
                "singularName":"",
                "namespaced":true,
                "kind":"Deployment",
                "verbs":["get","patch","update"],
            },
            {
                "name":"replicasets",
                "singularName":"replicaset",
                "namespaced":true,
                "kind":"ReplicaSet",
                "verbs":["create","delete","deletecollection","get","list","patch","update","watch"],
                "shortNames":["rs"],
                "categories":["all"],
            },
            {
                "name":"replicasets/status",
                "singularName":"",
                "namespaced":true,
                "kind":"ReplicaSet",
                "verbs":["get","patch","update"],
            },
            {
                "name":"statefulsets",
                "singularName":"statefulset",
                "namespaced":true,
                "kind":"StatefulSet",
                "verbs":["create","delete","deletecollection","get","list","patch","update","watch"],
                "shortNames":["sts"],
                "categories":["all"],
            },
        ],
    })
}
