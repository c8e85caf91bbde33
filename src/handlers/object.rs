//! Object-level Swift API handlers.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tracing::debug;

use super::common::{
    evaluate_conditions, header_str, metadata_from_headers, parse_range_header,
    request_timestamp, resolve_device, resolve_range, set_header, set_user_metadata,
};
use crate::constraints::{
    check_container_name, check_metadata, check_object_creation, delete_at_from_headers,
};
use crate::errors::SwiftError;
use crate::metadata::keys::{
    CONTENT_LENGTH, CONTENT_TYPE, DEFAULT_CONTENT_TYPE, ETAG, NAME, OBJECT_META_PREFIX,
    X_DELETE_AT, X_TIMESTAMP,
};
use crate::metadata::Metadata;
use crate::storage::backend::{BodyStream, ObjectLocation, PutRequest};
use crate::timestamp;
use crate::AppState;

/// Stored verbatim and echoed on GET/HEAD.
const PASSTHROUGH_HEADERS: &[&str] = &["Content-Encoding", "Content-Disposition"];

/// Resolve the device and build the engine address of an object.
fn locate(
    state: &AppState,
    account: &str,
    container: &str,
    obj: &str,
) -> Result<ObjectLocation, SwiftError> {
    let device = resolve_device(state, account, Some(container), Some(obj))?;
    Ok(ObjectLocation::new(device, container, obj))
}

fn stored_timestamp(metadata: &Metadata) -> f64 {
    metadata
        .get(X_TIMESTAMP)
        .and_then(|ts| timestamp::parse(ts))
        .unwrap_or_default()
}

/// Metadata and passthrough headers shared by GET and HEAD responses.
fn object_headers(metadata: &Metadata, headers: &mut HeaderMap) {
    let content_type = metadata
        .get(CONTENT_TYPE)
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    set_header(headers, "content-type", content_type);
    if let Some(etag) = metadata.get(ETAG) {
        set_header(headers, "etag", etag);
    }
    if let Some(ts) = metadata.get(X_TIMESTAMP) {
        set_header(headers, "x-timestamp", ts);
        set_header(
            headers,
            "last-modified",
            &timestamp::http_date(stored_timestamp(metadata)),
        );
    }
    if let Some(delete_at) = metadata.get(X_DELETE_AT) {
        set_header(headers, "x-delete-at", delete_at);
    }
    for key in PASSTHROUGH_HEADERS {
        if let Some(value) = metadata.get(*key) {
            set_header(headers, key, value);
        }
    }
    set_user_metadata(headers, metadata, OBJECT_META_PREFIX);
    set_header(headers, "accept-ranges", "bytes");
}

/// Metadata an object PUT or POST stores: timestamp, user keys, expiry,
/// passthrough headers.
fn request_metadata(headers: &HeaderMap, ts: f64) -> Result<Metadata, SwiftError> {
    let mut metadata = metadata_from_headers(headers, OBJECT_META_PREFIX);
    metadata.insert(X_TIMESTAMP.to_string(), timestamp::normalize(ts));
    if let Some(delete_at) = delete_at_from_headers(headers)? {
        metadata.insert(X_DELETE_AT.to_string(), delete_at);
    }
    for key in PASSTHROUGH_HEADERS {
        if let Some(value) = header_str(headers, key) {
            metadata.insert(key.to_string(), value.to_string());
        }
    }
    Ok(metadata)
}

/// `PUT /v1/{account}/{container}/{object}` -- Store an object.
#[utoipa::path(
    put,
    path = "/v1/{account}/{container}/{object}",
    tag = "Object",
    operation_id = "PutObject",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
        ("object" = String, Path, description = "Object name; may contain slashes"),
    ),
    responses(
        (status = 201, description = "Object stored"),
        (status = 400, description = "Invalid name or metadata"),
        (status = 404, description = "Container not found"),
        (status = 409, description = "Object already exists as a directory"),
        (status = 411, description = "Length required"),
        (status = 413, description = "Object too large"),
        (status = 422, description = "ETag mismatch"),
        (status = 507, description = "Insufficient storage")
    )
)]
pub async fn put_object(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    obj: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, SwiftError> {
    let limits = &state.config.constraints;
    check_container_name(container, limits)?;
    let name = check_object_creation(headers, obj, limits)?;
    let loc = locate(&state, account, container, &name)?;

    let ts = request_timestamp(headers)?;
    let mut metadata = request_metadata(headers, ts)?;
    let content_type = header_str(headers, "content-type")
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    metadata.insert(CONTENT_TYPE.to_string(), content_type.to_string());
    metadata.insert(NAME.to_string(), format!("/{account}/{container}/{name}"));

    let request = PutRequest {
        metadata,
        content_length: header_str(headers, "content-length")
            .and_then(|v| v.trim().parse().ok()),
        etag: header_str(headers, "etag").map(str::to_string),
    };
    let stream: BodyStream = Box::pin(
        body.into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    );

    let stored = state.storage.put_object(&loc, request, stream).await?;
    debug!(
        device = %loc.device,
        container = %loc.container,
        object = %loc.object,
        "object stored"
    );

    let mut response = StatusCode::CREATED.into_response();
    let out = response.headers_mut();
    if let Some(etag) = stored.get(ETAG) {
        set_header(out, "etag", etag);
    }
    set_header(out, "last-modified", &timestamp::http_date(ts));
    set_header(out, "content-length", "0");
    Ok(response)
}

/// `GET /v1/{account}/{container}/{object}` -- Download an object, whole or
/// a single byte range.
#[utoipa::path(
    get,
    path = "/v1/{account}/{container}/{object}",
    tag = "Object",
    operation_id = "GetObject",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
        ("object" = String, Path, description = "Object name; may contain slashes"),
    ),
    responses(
        (status = 200, description = "Object body"),
        (status = 206, description = "Partial content"),
        (status = 304, description = "Not modified"),
        (status = 404, description = "Object not found or expired"),
        (status = 412, description = "Precondition failed"),
        (status = 416, description = "Range not satisfiable")
    )
)]
pub async fn get_object(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    obj: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    let loc = locate(&state, account, container, obj)?;
    let opened = state.storage.open_object(&loc).await?;
    let etag = opened.metadata.get(ETAG).cloned().unwrap_or_default();
    evaluate_conditions(headers, &etag, stored_timestamp(&opened.metadata))?;

    let size = opened.size;
    let range = match header_str(headers, "range").and_then(parse_range_header) {
        Some(requested) => Some(
            resolve_range(&requested, size).ok_or(SwiftError::RangeNotSatisfiable { size })?,
        ),
        None => None,
    };

    let metadata = opened.metadata;
    let body = Body::from_stream(opened.body.into_stream(range));
    let mut response = Response::new(body);
    let out = response.headers_mut();
    object_headers(&metadata, out);
    match range {
        Some((start, end)) => {
            set_header(out, "content-length", &(end - start + 1).to_string());
            set_header(out, "content-range", &format!("bytes {start}-{end}/{size}"));
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        }
        None => set_header(out, "content-length", &size.to_string()),
    }
    Ok(response)
}

/// `HEAD /v1/{account}/{container}/{object}` -- Object metadata.
#[utoipa::path(
    head,
    path = "/v1/{account}/{container}/{object}",
    tag = "Object",
    operation_id = "HeadObject",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
        ("object" = String, Path, description = "Object name; may contain slashes"),
    ),
    responses(
        (status = 200, description = "Object metadata"),
        (status = 304, description = "Not modified"),
        (status = 404, description = "Object not found or expired"),
        (status = 412, description = "Precondition failed")
    )
)]
pub async fn head_object(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    obj: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    let loc = locate(&state, account, container, obj)?;
    // Opening applies the expiry check; the body is never read.
    let opened = state.storage.open_object(&loc).await?;
    let etag = opened.metadata.get(ETAG).cloned().unwrap_or_default();
    evaluate_conditions(headers, &etag, stored_timestamp(&opened.metadata))?;

    let mut response = StatusCode::OK.into_response();
    let out = response.headers_mut();
    object_headers(&opened.metadata, out);
    let length = opened
        .metadata
        .get(CONTENT_LENGTH)
        .cloned()
        .unwrap_or_else(|| opened.size.to_string());
    set_header(out, "content-length", &length);
    Ok(response)
}

/// `DELETE /v1/{account}/{container}/{object}` -- Remove an object.
#[utoipa::path(
    delete,
    path = "/v1/{account}/{container}/{object}",
    tag = "Object",
    operation_id = "DeleteObject",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
        ("object" = String, Path, description = "Object name; may contain slashes"),
    ),
    responses(
        (status = 204, description = "Object deleted"),
        (status = 404, description = "Object not found")
    )
)]
pub async fn delete_object(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    obj: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    let loc = locate(&state, account, container, obj)?;
    let ts = request_timestamp(headers)?;
    state.storage.read_object_metadata(&loc).await?;
    state.storage.delete_object(&loc, ts).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /v1/{account}/{container}/{object}` -- Replace user metadata.
/// Content type, etag, and size are kept.
#[utoipa::path(
    post,
    path = "/v1/{account}/{container}/{object}",
    tag = "Object",
    operation_id = "PostObject",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
        ("object" = String, Path, description = "Object name; may contain slashes"),
    ),
    responses(
        (status = 202, description = "Metadata updated"),
        (status = 400, description = "Invalid metadata"),
        (status = 404, description = "Object not found or expired")
    )
)]
pub async fn post_object(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    obj: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    check_metadata(headers, OBJECT_META_PREFIX, &state.config.constraints)?;
    let loc = locate(&state, account, container, obj)?;
    let ts = request_timestamp(headers)?;
    let metadata = request_metadata(headers, ts)?;
    state.storage.write_object_metadata(&loc, metadata).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}
