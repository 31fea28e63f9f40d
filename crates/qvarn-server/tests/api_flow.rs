//! End-to-end tests for the REST surface over the in-memory store.
//!
//! Each test starts its own server on an ephemeral port with a freshly
//! loaded `subject` resource type and drives it over HTTP.

use serde_json::{Value, json};
use tokio::task::JoinHandle;

use qvarn_server::{AppConfig, build_app};

const SUBJECT_YAML: &str = "\
type: subject
path: /subjects
versions:
- version: v0
  prototype:
    id: ''
    type: ''
    revision: ''
    full_name: ''
    names:
    - sort_key: ''
  subpaths:
    sub:
      prototype:
        subfield: ''
    blob:
      prototype:
        content_type: ''
  files:
  - blob
";

const BASEURL: &str = "https://qvarn.example.com";

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        std::fs::write(dir.path().join("subject.yaml"), SUBJECT_YAML).expect("write spec");

        let config = AppConfig {
            baseurl: BASEURL.to_string(),
            resource_type_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        let app = build_app(&config).await.expect("build app");

        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            shutdown: Some(tx),
            handle: Some(handle),
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn post_subject(&self, body: &Value) -> Value {
        let resp = self
            .client
            .post(self.url("/subjects"))
            .json(body)
            .send()
            .await
            .expect("post subject");
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        resp.json().await.expect("created body")
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn str_field(obj: &Value, field: &str) -> String {
    obj[field].as_str().expect(field).to_string()
}

#[tokio::test]
async fn version_is_served_without_a_token() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["implementation"]["name"], "Qvarn");
    assert!(body["api"]["version"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn create_and_fetch_a_resource() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/subjects"))
        .json(&json!({"type": "subject", "full_name": "James Bond"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let location = resp
        .headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    let created: Value = resp.json().await.unwrap();

    let id = str_field(&created, "id");
    assert!(!id.is_empty());
    assert!(!str_field(&created, "revision").is_empty());
    assert_eq!(created["full_name"], "James Bond");
    assert_eq!(location, format!("{BASEURL}/subjects/{id}"));

    let resp = server
        .client
        .get(server.url(&format!("/subjects/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let fetched: Value = resp.json().await.unwrap();
    assert_eq!(fetched, created);

    server.stop().await;
}

#[tokio::test]
async fn post_with_meta_fields_is_rejected() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/subjects"))
        .json(&json!({"type": "subject", "id": "chosen"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn put_with_stale_revision_conflicts() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;
    let id = str_field(&created, "id");

    let mut stale = created.clone();
    stale["revision"] = json!("WRONG");
    let resp = server
        .client
        .put(server.url(&format!("/subjects/{id}")))
        .json(&stale)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

    // And the stored resource is untouched.
    let resp = server
        .client
        .get(server.url(&format!("/subjects/{id}")))
        .send()
        .await
        .unwrap();
    let fetched: Value = resp.json().await.unwrap();
    assert_eq!(fetched, created);

    server.stop().await;
}

#[tokio::test]
async fn put_updates_fields_and_revision() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;
    let id = str_field(&created, "id");

    let mut update = created.clone();
    update["full_name"] = json!("Bruce");
    let resp = server
        .client
        .put(server.url(&format!("/subjects/{id}")))
        .json(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["full_name"], "Bruce");
    assert_eq!(updated["id"], created["id"]);
    assert_ne!(updated["revision"], created["revision"]);

    server.stop().await;
}

#[tokio::test]
async fn put_with_mismatched_id_is_rejected() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;

    let resp = server
        .client
        .put(server.url("/subjects/some-other-id"))
        .json(&created)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn search_exact_is_case_insensitive() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "JAMES"}))
        .await;
    server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;

    let resp = server
        .client
        .get(server.url("/subjects/search/exact/full_name/james"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"resources": [{"id": created["id"]}]}));

    server.stop().await;
}

#[tokio::test]
async fn search_sort_with_offset_and_limit() {
    let server = TestServer::start().await;
    for name in ["3", "1", "2"] {
        server
            .post_subject(&json!({"type": "subject", "full_name": name}))
            .await;
    }

    let resp = server
        .client
        .get(server.url("/subjects/search/sort/full_name/show_all/offset/1/limit/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let resources = body["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["full_name"], "2");
    // show_all returns whole resources.
    assert!(resources[0]["revision"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn search_unknown_field_names_the_field() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/subjects/search/exact/no_such_field/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error_code"], "FieldNotInResource");
    assert_eq!(body["field"], "no_such_field");

    server.stop().await;
}

#[tokio::test]
async fn search_limit_without_sort_is_an_error() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/subjects/search/exact/full_name/x/limit/3"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error_code"], "LimitWithoutSortError");

    server.stop().await;
}

#[tokio::test]
async fn subresource_put_bumps_base_revision() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;
    let id = str_field(&created, "id");
    let revision = str_field(&created, "revision");

    // The sub-resource exists, empty, right after creation.
    let resp = server
        .client
        .get(server.url(&format!("/subjects/{id}/sub")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let sub: Value = resp.json().await.unwrap();
    assert_eq!(sub, json!({"subfield": ""}));

    let resp = server
        .client
        .put(server.url(&format!("/subjects/{id}/sub")))
        .json(&json!({"subfield": "filled", "revision": revision}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let new_sub: Value = resp.json().await.unwrap();
    assert_eq!(new_sub["subfield"], "filled");
    let new_revision = str_field(&new_sub, "revision");
    assert_ne!(new_revision, revision);

    // The base resource now carries the new revision.
    let resp = server
        .client
        .get(server.url(&format!("/subjects/{id}")))
        .send()
        .await
        .unwrap();
    let base: Value = resp.json().await.unwrap();
    assert_eq!(str_field(&base, "revision"), new_revision);

    // A stale revision conflicts.
    let resp = server
        .client
        .put(server.url(&format!("/subjects/{id}/sub")))
        .json(&json!({"subfield": "again", "revision": revision}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

    server.stop().await;
}

#[tokio::test]
async fn file_round_trip_with_revision_header() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;
    let id = str_field(&created, "id");
    let revision = str_field(&created, "revision");

    // Wrong revision is refused before anything is written.
    let resp = server
        .client
        .put(server.url(&format!("/subjects/{id}/blob")))
        .header("Revision", "WRONG")
        .header("Content-Type", "application/pdf")
        .body("pretend pdf")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

    let resp = server
        .client
        .put(server.url(&format!("/subjects/{id}/blob")))
        .header("Revision", revision.clone())
        .header("Content-Type", "application/pdf")
        .body("pretend pdf")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let new_revision = resp
        .headers()
        .get("Revision")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert_ne!(new_revision, revision);

    let resp = server
        .client
        .get(server.url(&format!("/subjects/{id}/blob")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap(),
        "application/pdf"
    );
    assert_eq!(
        resp.headers()
            .get("Revision")
            .and_then(|v| v.to_str().ok())
            .unwrap(),
        new_revision
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"pretend pdf");

    server.stop().await;
}

#[tokio::test]
async fn delete_removes_resource_and_subresources() {
    let server = TestServer::start().await;
    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;
    let id = str_field(&created, "id");

    let resp = server
        .client
        .delete(server.url(&format!("/subjects/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    for path in [format!("/subjects/{id}"), format!("/subjects/{id}/sub")] {
        let resp = server.client.get(server.url(&path)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND, "{path}");
    }

    let resp = server
        .client
        .get(server.url("/subjects"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"resources": []}));

    server.stop().await;
}

#[tokio::test]
async fn unknown_type_path_is_not_found() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/no_such_things"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn listener_gets_notified_of_creation() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/subjects/listeners"))
        .json(&json!({"notify_of_new": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let listener: Value = resp.json().await.unwrap();
    let listener_id = str_field(&listener, "id");
    assert_eq!(listener["listen_on_type"], "subject");

    let created = server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;

    let resp = server
        .client
        .get(server.url(&format!(
            "/subjects/listeners/{listener_id}/notifications"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let resources = body["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);

    let notification_id = resources[0]["id"].as_str().unwrap();
    let resp = server
        .client
        .get(server.url(&format!(
            "/subjects/listeners/{listener_id}/notifications/{notification_id}"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let notification: Value = resp.json().await.unwrap();
    assert_eq!(notification["resource_id"], created["id"]);
    assert_eq!(notification["resource_change"], "created");
    assert_eq!(notification["listener_id"], listener_id.as_str());

    server.stop().await;
}

#[tokio::test]
async fn listener_with_mismatched_watch_type_is_rejected() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/subjects/listeners"))
        .json(&json!({"notify_of_new": true, "listen_on_type": "org"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn deleting_a_listener_removes_its_notifications() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/subjects/listeners"))
        .json(&json!({"notify_of_new": true}))
        .send()
        .await
        .unwrap();
    let listener: Value = resp.json().await.unwrap();
    let listener_id = str_field(&listener, "id");

    server
        .post_subject(&json!({"type": "subject", "full_name": "Alfred"}))
        .await;

    let resp = server
        .client
        .delete(server.url(&format!("/subjects/listeners/{listener_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let resp = server
        .client
        .get(server.url(&format!("/subjects/listeners/{listener_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn notifications_are_listed_oldest_first() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/subjects/listeners"))
        .json(&json!({"notify_of_new": true, "listen_on_all": true}))
        .send()
        .await
        .unwrap();
    let listener: Value = resp.json().await.unwrap();
    let listener_id = str_field(&listener, "id");

    let first = server
        .post_subject(&json!({"type": "subject", "full_name": "1"}))
        .await;
    let second = server
        .post_subject(&json!({"type": "subject", "full_name": "2"}))
        .await;

    let resp = server
        .client
        .get(server.url(&format!(
            "/subjects/listeners/{listener_id}/notifications"
        )))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let ids: Vec<String> = body["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 2);

    let mut seen = Vec::new();
    for notification_id in &ids {
        let resp = server
            .client
            .get(server.url(&format!(
                "/subjects/listeners/{listener_id}/notifications/{notification_id}"
            )))
            .send()
            .await
            .unwrap();
        let notification: Value = resp.json().await.unwrap();
        seen.push(str_field(&notification, "resource_id"));
    }
    assert_eq!(
        seen,
        vec![str_field(&first, "id"), str_field(&second, "id")]
    );

    server.stop().await;
}

#[tokio::test]
async fn allow_rules_can_be_managed() {
    let server = TestServer::start().await;
    let rule = json!({
        "method": "GET",
        "client_id": "*",
        "user_id": "user-1",
        "subpath": "",
        "resource_id": "*",
    });

    let resp = server
        .client
        .get(server.url("/allow"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp = server
        .client
        .post(server.url("/allow"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let resp = server
        .client
        .get(server.url("/allow"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let resp = server
        .client
        .delete(server.url("/allow"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let resp = server
        .client
        .get(server.url("/allow"))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn resource_types_are_themselves_resources() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/resource_types/subject"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "resource_type");
    assert_eq!(body["path"], "/subjects");
    assert_eq!(body["spec"]["type"], "subject");

    server.stop().await;
}
