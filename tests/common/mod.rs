//! In-process test harness for the WebDAV router.
//!
//! `TestServer` builds the full application over an in-memory SQLite
//! database and a temporary payload directory, and drives it with
//! `tower::ServiceExt::oneshot`, so no socket is ever opened.

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
};
use bucket_dav::{
    config::Credentials,
    models::object::StoredObject,
    routes::routes::routes,
    services::{
        database,
        lock_store::SqliteLockStore,
        object_store::{ListOptions, ObjectStore},
        storage_service::StorageService,
    },
    state::AppState,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const LOCK_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:tester@example.com</D:href></D:owner>
</D:lockinfo>"#;

/// A buffered response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Number of `<response>` entries in a multistatus body.
    pub fn response_count(&self) -> usize {
        self.text().matches("<response>").count()
    }
}

pub struct TestServer {
    app: Router,
    /// Direct handle on the backing store, for checking state behind the API.
    pub store: Arc<dyn ObjectStore>,
    authorization: Option<String>,
    _temp_dir: TempDir,
}

impl TestServer {
    /// A server with authentication disabled.
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// A server requiring `credentials`. Requests made through the helpers
    /// carry them; use `send` with a hand-built request to go without.
    pub async fn with_credentials(credentials: Credentials) -> Self {
        Self::build(Some(credentials)).await
    }

    async fn build(credentials: Option<Credentials>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Arc::new(
            database::connect_in_memory()
                .await
                .expect("Failed to open in-memory database"),
        );
        database::run_migrations(&db)
            .await
            .expect("Failed to run migrations");

        let store: Arc<dyn ObjectStore> = Arc::new(StorageService::new(
            db.clone(),
            temp_dir.path().join("objects"),
        ));
        let locks = Arc::new(SqliteLockStore::new(db));
        let authorization = credentials.as_ref().map(Credentials::basic_header);
        let state = AppState::new(store.clone(), locks, credentials);

        Self {
            app: routes(state),
            store,
            authorization,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request as-is.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send `method path` with extra headers and a body, authenticated when
    /// the server has credentials.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(value) = &self.authorization {
            builder = builder.header("authorization", value);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body.into()).expect("Failed to build request");
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, &[], Body::empty()).await
    }

    pub async fn get_with(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request("GET", path, headers, Body::empty()).await
    }

    pub async fn head(&self, path: &str) -> TestResponse {
        self.request("HEAD", path, &[], Body::empty()).await
    }

    pub async fn put(&self, path: &str, body: impl Into<Body>) -> TestResponse {
        self.request("PUT", path, &[], body).await
    }

    /// PUT that must succeed.
    pub async fn put_ok(&self, path: &str, body: impl Into<Body>) -> TestResponse {
        let response = self.put(path, body).await;
        assert_eq!(response.status, StatusCode::CREATED, "PUT {path} failed");
        response
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, &[], Body::empty()).await
    }

    pub async fn mkcol(&self, path: &str) -> TestResponse {
        self.request("MKCOL", path, &[], Body::empty()).await
    }

    /// MKCOL that must succeed.
    pub async fn mkcol_ok(&self, path: &str) {
        let response = self.mkcol(path).await;
        assert_eq!(response.status, StatusCode::CREATED, "MKCOL {path} failed");
    }

    pub async fn propfind(&self, path: &str, depth: &str) -> TestResponse {
        self.request("PROPFIND", path, &[("depth", depth)], Body::empty())
            .await
    }

    pub async fn proppatch(&self, path: &str, body: &str) -> TestResponse {
        self.request("PROPPATCH", path, &[], body.to_string()).await
    }

    pub async fn copy(&self, from: &str, to: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.transfer("COPY", from, to, headers).await
    }

    pub async fn move_(&self, from: &str, to: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.transfer("MOVE", from, to, headers).await
    }

    async fn transfer(
        &self,
        method: &str,
        from: &str,
        to: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let destination = destination(to);
        let mut all = vec![("destination", destination.as_str())];
        all.extend_from_slice(headers);
        self.request(method, from, &all, Body::empty()).await
    }

    pub async fn lock(&self, path: &str) -> TestResponse {
        self.request("LOCK", path, &[], LOCK_BODY).await
    }

    pub async fn unlock(&self, path: &str, token: &str) -> TestResponse {
        self.request("UNLOCK", path, &[("lock-token", token)], Body::empty())
            .await
    }

    /// Every stored key under `prefix`, in key order.
    pub async fn stored_keys(&self, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .list(ListOptions {
                    prefix: prefix.to_string(),
                    delimiter: None,
                    cursor,
                    limit: 1000,
                })
                .await
                .expect("list failed");
            keys.extend(page.objects.into_iter().map(|o| o.key));
            if !page.truncated {
                return keys;
            }
            cursor = page.cursor;
        }
    }

    pub async fn stored(&self, key: &str) -> Option<StoredObject> {
        self.store.head(key).await.expect("head failed")
    }
}

/// Absolute URL for a `Destination` header.
pub fn destination(path: &str) -> String {
    format!("http://localhost{path}")
}

/// Quoted MD5 ETag of `body`.
pub fn etag_of(body: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(body))
}
