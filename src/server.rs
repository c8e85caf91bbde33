//! Axum router construction and Swift route mapping.
//!
//! The [`app`] function wires the Swift API and the operational endpoints
//! to their handlers and returns a ready-to-serve [`axum::Router`].
//!
//! Swift names may contain any byte sequence a URL can carry, including
//! empty segments that the constraint filter must see to reject.  Routing
//! therefore takes everything under `/v1/` with one catch-all and splits
//! the raw path itself instead of relying on path extractors.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, RawQuery, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::debug;
use utoipa::OpenApi;

use crate::errors::{generate_trans_id, SwiftError};
use crate::handlers::{account, common::parse_query, container, object};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the posixstore Swift API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "posixstore Swift API",
        version = "0.1.0",
        description = "Swift-style object storage served from a POSIX filesystem"
    ),
    paths(
        health_check,
        crate::handlers::account::list_containers,
        crate::handlers::account::head_account,
        crate::handlers::account::post_account,
        crate::handlers::container::put_container,
        crate::handlers::container::list_objects,
        crate::handlers::container::head_container,
        crate::handlers::container::delete_container,
        crate::handlers::container::post_container,
        crate::handlers::object::put_object,
        crate::handlers::object::get_object,
        crate::handlers::object::head_object,
        crate::handlers::object::delete_object,
        crate::handlers::object::post_object,
    ),
    tags(
        (name = "Health", description = "Liveness probe"),
        (name = "Account", description = "Account (volume) operations"),
        (name = "Container", description = "Container operations"),
        (name = "Object", description = "Object operations"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with the Swift routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let observability = state.config.observability.clone();
    let mut router = Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/v1/*path", any(handle_swift));
    if observability.health_check {
        router = router.route("/healthcheck", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state)
        // Inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http());
    let router = if observability.metrics {
        // Outermost so the full request lifecycle is timed.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    };
    // Object bodies are streamed to disk; there is no in-memory limit.
    router.layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `X-Trans-Id` (`tx` + 32 hex) and `Date` to every response.
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let trans_id = generate_trans_id();
    debug!(trans_id = %trans_id, method = %req.method(), path = %req.uri().path(), "request");
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&trans_id) {
        headers.insert("x-trans-id", value);
    }
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    response
}

// -- Operational endpoints ---------------------------------------------------

/// `GET /healthcheck` -- Returns `OK` with 200.
#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Server is up")
    )
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/plain")], "OK")
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Swift path parsing --------------------------------------------------------

/// `/v1/{account}[/{container}[/{object}]]`, percent-decoded.
#[derive(Debug, PartialEq, Eq)]
struct SwiftPath {
    account: String,
    container: Option<String>,
    object: Option<String>,
}

fn decode_segment(raw: &str) -> Result<String, SwiftError> {
    let decoded = percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| SwiftError::bad_request("Invalid UTF8 or contains NULL"))?;
    if decoded.contains('\0') {
        return Err(SwiftError::bad_request("Invalid UTF8 or contains NULL"));
    }
    Ok(decoded.into_owned())
}

/// Split a request path.  A trailing `/` after the account or container is
/// ignored; empty segments inside the object name are kept.
fn parse_swift_path(path: &str) -> Result<SwiftPath, SwiftError> {
    let rest = path.strip_prefix("/v1/").ok_or(SwiftError::NotFound)?;
    let mut parts = rest.splitn(3, '/');
    let account = decode_segment(parts.next().unwrap_or_default())?;
    let container = parts.next().unwrap_or_default();
    let obj = parts.next().unwrap_or_default();

    if account.is_empty() || (container.is_empty() && !obj.is_empty()) {
        return Err(SwiftError::bad_request("Invalid path"));
    }
    let container = (!container.is_empty())
        .then(|| decode_segment(container))
        .transpose()?;
    let object = (!obj.is_empty()).then(|| decode_segment(obj)).transpose()?;
    Ok(SwiftPath {
        account,
        container,
        object,
    })
}

// -- Swift dispatch ----------------------------------------------------------

const CONTAINER_ALLOW: &str = "HEAD, GET, PUT, POST, DELETE";
const OBJECT_ALLOW: &str = "HEAD, GET, PUT, POST, DELETE";

/// `ANY /v1/*path` -- dispatch on resource level and method.
async fn handle_swift(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, SwiftError> {
    let path = parse_swift_path(uri.path())?;
    let account = path.account.as_str();

    match (path.container.as_deref(), path.object.as_deref()) {
        (None, _) => {
            let query = parse_query(raw_query.as_deref());
            match method {
                Method::GET => account::list_containers(state, account, &query, &headers).await,
                Method::HEAD => account::head_account(state, account).await,
                Method::POST => account::post_account(state, account, &headers).await,
                _ => account::account_method_not_allowed(),
            }
        }
        (Some(container), None) => {
            let query = parse_query(raw_query.as_deref());
            match method {
                Method::GET => {
                    container::list_objects(state, account, container, &query, &headers).await
                }
                Method::HEAD => container::head_container(state, account, container).await,
                Method::PUT => container::put_container(state, account, container, &headers).await,
                Method::POST => {
                    container::post_container(state, account, container, &headers).await
                }
                Method::DELETE => container::delete_container(state, account, container).await,
                _ => Err(SwiftError::MethodNotAllowed {
                    allow: CONTAINER_ALLOW,
                }),
            }
        }
        (Some(container), Some(obj)) => match method {
            Method::GET => object::get_object(state, account, container, obj, &headers).await,
            Method::HEAD => object::head_object(state, account, container, obj, &headers).await,
            Method::PUT => {
                object::put_object(state, account, container, obj, &headers, body).await
            }
            Method::POST => object::post_object(state, account, container, obj, &headers).await,
            Method::DELETE => {
                object::delete_object(state, account, container, obj, &headers).await
            }
            _ => Err(SwiftError::MethodNotAllowed {
                allow: OBJECT_ALLOW,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ring::{Ring, RingDevice};
    use crate::storage::posix::PosixBackend;
    use crate::test_support::scratch_dir;
    use crate::timestamp;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        device: PathBuf,
        router: Router,
    }

    impl Harness {
        fn new() -> Self {
            let dir = scratch_dir();
            let mut config = Config::default();
            config.storage.devices = dir.path().join("devices");
            config.storage.run_dir = dir.path().join("run");
            let device = config.storage.devices.join("test");
            std::fs::create_dir_all(&device).unwrap();

            let ring = Ring::new(
                vec![RingDevice {
                    id: 0,
                    ip: "127.0.0.1".into(),
                    port: 6010,
                    device: "test".into(),
                    zone: 1,
                    weight: 100.0,
                    meta: String::new(),
                }],
                "AUTH_",
            );
            let storage = Arc::new(PosixBackend::new(&config.storage, None));
            let state = Arc::new(AppState {
                config,
                ring,
                storage,
            });
            Self {
                _dir: dir,
                device,
                router: app(state),
            }
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            headers: &[(&str, &str)],
            body: &[u8],
        ) -> (StatusCode, HeaderMap, Vec<u8>) {
            let mut builder = Request::builder().method(method).uri(uri);
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            let request = builder.body(Body::from(body.to_vec())).unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, headers, bytes.to_vec())
        }

        async fn put(&self, uri: &str, body: &[u8], extra: &[(&str, &str)]) -> StatusCode {
            let length = body.len().to_string();
            let mut headers = vec![("content-length", length.as_str())];
            headers.extend_from_slice(extra);
            self.send("PUT", uri, &headers, body).await.0
        }

        async fn with_container(self) -> Self {
            assert_eq!(self.put("/v1/AUTH_test/c", b"", &[]).await, StatusCode::CREATED);
            self
        }
    }

    #[test]
    fn test_parse_swift_path() {
        let path = parse_swift_path("/v1/AUTH_t/c/a/b%20c").unwrap();
        assert_eq!(path.account, "AUTH_t");
        assert_eq!(path.container.as_deref(), Some("c"));
        assert_eq!(path.object.as_deref(), Some("a/b c"));

        let path = parse_swift_path("/v1/AUTH_t/c/a//b").unwrap();
        assert_eq!(path.object.as_deref(), Some("a//b"));

        let path = parse_swift_path("/v1/AUTH_t/c/").unwrap();
        assert_eq!(path.container.as_deref(), Some("c"));
        assert_eq!(path.object, None);

        let path = parse_swift_path("/v1/AUTH_t").unwrap();
        assert_eq!(path.container, None);

        assert!(parse_swift_path("/v1/AUTH_t//o").is_err());
        assert!(parse_swift_path("/v1/").is_err());
        assert!(parse_swift_path("/v1/a/c/%00").is_err());
        assert!(parse_swift_path("/v1/a/c/%FF").is_err());
    }

    #[tokio::test]
    async fn test_put_then_get_small_file() {
        let h = Harness::new().with_container().await;
        let status = h
            .put("/v1/AUTH_test/c/o", b"1234", &[("content-type", "text/plain")])
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, headers, body) = h.send("GET", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"1234");
        assert_eq!(headers["etag"], "81dc9bdb52d04dc20036dbd8313ed055");
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(headers["content-length"], "4");
        assert!(headers.contains_key("last-modified"));
        assert!(headers.contains_key("x-timestamp"));
    }

    #[tokio::test]
    async fn test_put_over_directory_conflicts() {
        let h = Harness::new().with_container().await;
        std::fs::create_dir_all(h.device.join("c/d")).unwrap();
        let (status, _, body) = h
            .send("PUT", "/v1/AUTH_test/c/d", &[("content-length", "1")], b"x")
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(String::from_utf8_lossy(&body).contains("already exists as a directory"));
    }

    #[tokio::test]
    async fn test_listing_with_prefix_and_delimiter() {
        let h = Harness::new().with_container().await;
        for name in ["a", "dir1/file2", "dir1/subdir1/file3", "dir2/x"] {
            let uri = format!("/v1/AUTH_test/c/{name}");
            assert_eq!(h.put(&uri, b"data", &[]).await, StatusCode::CREATED);
        }
        let (status, _, body) = h
            .send("GET", "/v1/AUTH_test/c?prefix=dir1/&delimiter=/", &[], b"")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), "dir1/file2\ndir1/subdir1/\n");
    }

    #[tokio::test]
    async fn test_json_listing_and_counts() {
        let h = Harness::new().with_container().await;
        h.put("/v1/AUTH_test/c/one", b"12", &[]).await;
        h.put("/v1/AUTH_test/c/two", b"345", &[]).await;

        let (status, headers, body) = h
            .send("GET", "/v1/AUTH_test/c?format=json", &[], b"")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-container-object-count"], "2");
        let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows[0]["name"], "one");
        assert_eq!(rows[1]["bytes"], 3);

        let (status, _, body) = h
            .send("GET", "/v1/AUTH_test/c?prefix=zzz", &[], b"")
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (status, _, _) = h
            .send("GET", "/v1/AUTH_test/c?limit=10001", &[], b"")
            .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let h = Harness::new().with_container().await;
        let (status, _, body) = h
            .send("PUT", "/v1/AUTH_test/c/a//b", &[("content-length", "1")], b"x")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("cannot begin, end, or have"));
    }

    #[tokio::test]
    async fn test_final_segment_length_limit() {
        let h = Harness::new().with_container().await;
        let long = format!("/v1/AUTH_test/c/{}", "x".repeat(222));
        let (status, _, body) = h
            .send("PUT", &long, &[("content-length", "1")], b"x")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("too long"));

        let fits = format!("/v1/AUTH_test/c/{}", "x".repeat(221));
        assert_eq!(h.put(&fits, b"x", &[]).await, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_expired_object_is_not_found() {
        let h = Harness::new().with_container().await;
        let delete_at = (timestamp::now() as i64 - 1).to_string();
        let status = h
            .put("/v1/AUTH_test/c/o", b"gone", &[("x-delete-at", delete_at.as_str())])
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, _) = h.send("GET", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        // Left for the expirer.
        assert!(h.device.join("c/o").is_file());
    }

    #[tokio::test]
    async fn test_out_of_band_modification_regenerates_etag() {
        let h = Harness::new().with_container().await;
        h.put("/v1/AUTH_test/c/o", b"1234", &[]).await;
        std::fs::write(h.device.join("c/o"), b"hello world").unwrap();

        let (status, headers, body) = h.send("GET", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello world");
        assert_eq!(headers["etag"], "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(headers["content-length"], "11");
    }

    #[tokio::test]
    async fn test_range_and_conditional_get() {
        let h = Harness::new().with_container().await;
        h.put("/v1/AUTH_test/c/o", b"0123456789", &[]).await;

        let (status, headers, body) = h
            .send("GET", "/v1/AUTH_test/c/o", &[("range", "bytes=2-4")], b"")
            .await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body, b"234");
        assert_eq!(headers["content-range"], "bytes 2-4/10");

        let (status, headers, _) = h
            .send("GET", "/v1/AUTH_test/c/o", &[("range", "bytes=20-")], b"")
            .await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(headers["content-range"], "bytes */10");

        let etag = "781e5e245d69b566979b86e28d23f2c7";
        let (status, _, _) = h
            .send("GET", "/v1/AUTH_test/c/o", &[("if-none-match", etag)], b"")
            .await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        let (status, _, _) = h
            .send("HEAD", "/v1/AUTH_test/c/o", &[("if-match", "nope")], b"")
            .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_post_replaces_user_metadata() {
        let h = Harness::new().with_container().await;
        h.put(
            "/v1/AUTH_test/c/o",
            b"abc",
            &[("x-object-meta-color", "red"), ("content-type", "text/plain")],
        )
        .await;
        let (status, _, _) = h
            .send("POST", "/v1/AUTH_test/c/o", &[("x-object-meta-shape", "round")], b"")
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, headers, _) = h.send("HEAD", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-object-meta-shape"], "round");
        assert!(!headers.contains_key("x-object-meta-color"));
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(headers["content-length"], "3");

        let (status, _, _) = h
            .send("POST", "/v1/AUTH_test/c/missing", &[], b"")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let h = Harness::new().with_container().await;
        assert_eq!(h.put("/v1/AUTH_test/c", b"", &[]).await, StatusCode::ACCEPTED);
        h.put("/v1/AUTH_test/c/o", b"abc", &[]).await;

        let (status, _, _) = h.send("DELETE", "/v1/AUTH_test/c", &[], b"").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, _) = h.send("DELETE", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = h.send("DELETE", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, headers, _) = h.send("HEAD", "/v1/AUTH_test/c", &[], b"").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers["x-container-object-count"], "0");

        let (status, _, _) = h.send("DELETE", "/v1/AUTH_test/c", &[], b"").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _, _) = h.send("HEAD", "/v1/AUTH_test/c", &[], b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_account_endpoints() {
        let h = Harness::new().with_container().await;
        let (status, headers, body) = h.send("GET", "/v1/AUTH_test", &[], b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"c\n");
        assert_eq!(headers["x-account-container-count"], "1");

        let (status, headers, _) = h.send("PUT", "/v1/AUTH_test", &[], b"").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers["allow"], "HEAD, GET, POST");
        let (status, _, _) = h.send("DELETE", "/v1/AUTH_test", &[], b"").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _, _) = h
            .send("POST", "/v1/AUTH_test", &[("x-account-meta-owner", "ops")], b"")
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, headers, _) = h.send("HEAD", "/v1/AUTH_test", &[], b"").await;
        assert_eq!(headers["x-account-meta-owner"], "ops");

        let (status, _, _) = h.send("HEAD", "/v1/AUTH_nobody", &[], b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_common_headers_and_health() {
        let h = Harness::new();
        let (status, headers, body) = h.send("GET", "/healthcheck", &[], b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
        let trans_id = headers["x-trans-id"].to_str().unwrap();
        assert!(trans_id.starts_with("tx"));
        assert_eq!(trans_id.len(), 34);
        assert!(headers.contains_key("date"));

        let (status, _, body) = h.send("GET", "/openapi.json", &[], b"").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(doc["paths"]["/v1/{account}/{container}/{object}"].is_object());
    }

    #[tokio::test]
    async fn test_put_requires_length_and_container() {
        let h = Harness::new();
        let (status, _, _) = h.send("PUT", "/v1/AUTH_test/c/o", &[], b"").await;
        assert_eq!(status, StatusCode::LENGTH_REQUIRED);
        assert_eq!(h.put("/v1/AUTH_test/c/o", b"x", &[]).await, StatusCode::NOT_FOUND);
    }
}
