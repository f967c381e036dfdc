//! Shared setup for the HTTP integration tests.
//!
//! Every test gets its own in-memory database, its own data directory and a
//! running job worker. No container runtime or model endpoint is needed.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use yuga::ai::OfflineProvider;
use yuga::api::auth::ensure_dev_user;
use yuga::api::create_router;
use yuga::config::Config;
use yuga::runtime::NoopRuntime;
use yuga::AppState;

pub const TEST_SECRET: &str = "integration-test-secret-with-enough-length";
pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    // Held so the data directory outlives the test
    _data_dir: TempDir,
}

pub fn test_config(data_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.server.data_dir = data_dir.path().to_path_buf();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.rate_limit.enabled = false;
    config.queue.max_attempts = 1;
    config.queue.backoff_ms = 10;
    config
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Build an app after letting the caller adjust the config
pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let data_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(&data_dir);
    configure(&mut config);

    let db = yuga::db::init_with_url("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    let dev_user = if config.auth.disabled {
        Some(
            ensure_dev_user(&db, &config.auth.dev_user_email)
                .await
                .expect("Failed to create dev user"),
        )
    } else {
        None
    };

    let (mut state, worker) = AppState::new(config, db, Arc::new(NoopRuntime), Arc::new(OfflineProvider));
    if let Some(user) = dev_user {
        state = state.with_dev_user(user);
    }
    tokio::spawn(worker.run());

    let state = Arc::new(state);
    TestApp {
        router: create_router(state.clone()),
        state,
        _data_dir: data_dir,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router returned an error");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body")
            .to_vec();
        TestResponse { status, headers, body }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("Invalid request")).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Register a user and return its access token
    pub async fn register(&self, email: &str) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(serde_json::json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
        response.json()["accessToken"]
            .as_str()
            .expect("missing accessToken")
            .to_string()
    }

    /// Create a project owned by the token's user and return its id
    pub async fn create_project(&self, token: &str, name: &str) -> String {
        let response = self
            .post(
                "/api/v1/projects",
                token,
                serde_json::json!({ "name": name, "engine": "unity" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
        response.json()["id"].as_str().expect("missing id").to_string()
    }

    /// Upload one file as multipart form data
    pub async fn upload(
        &self,
        token: &str,
        project_id: &str,
        file_name: &str,
        content_type: &str,
        content: &[u8],
    ) -> TestResponse {
        let boundary = "yuga-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/assets/{}/upload", project_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .expect("Invalid request");
        self.send(request).await
    }

    /// Poll a status endpoint until the job reaches a terminal state
    pub async fn wait_for_job(&self, uri: &str, token: &str) -> Value {
        for _ in 0..100 {
            let response = self.get(uri, token).await;
            assert_eq!(response.status, StatusCode::OK, "{}", response.text());
            let json = response.json();
            if matches!(json["status"].as_str(), Some("done") | Some("failed")) {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Job at {} did not finish", uri);
    }
}
