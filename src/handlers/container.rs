//! Container-level Swift API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::common::{
    json_object_listing, metadata_from_headers, parse_list_params, plain_listing,
    request_timestamp, resolve_device, set_header, set_user_metadata, ListingFormat,
};
use crate::constraints::{check_container_name, check_metadata};
use crate::errors::SwiftError;
use crate::metadata::keys::CONTAINER_META_PREFIX;
use crate::storage::backend::ContainerInfo;
use crate::xml;
use crate::AppState;

fn container_headers(info: &ContainerInfo, headers: &mut HeaderMap) {
    set_header(
        headers,
        "x-container-object-count",
        &info.object_count.to_string(),
    );
    set_header(headers, "x-container-bytes-used", &info.bytes_used.to_string());
    set_header(headers, "x-timestamp", &info.created_at);
    set_header(headers, "x-put-timestamp", &info.put_timestamp);
    set_user_metadata(headers, &info.metadata, CONTAINER_META_PREFIX);
}

/// `PUT /v1/{account}/{container}` -- Create a container, or update the
/// metadata of an existing one.
#[utoipa::path(
    put,
    path = "/v1/{account}/{container}",
    tag = "Container",
    operation_id = "PutContainer",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
    ),
    responses(
        (status = 201, description = "Container created"),
        (status = 202, description = "Container already existed"),
        (status = 400, description = "Invalid name or metadata"),
        (status = 404, description = "Account not found")
    )
)]
pub async fn put_container(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    let limits = &state.config.constraints;
    check_container_name(container, limits)?;
    check_metadata(headers, CONTAINER_META_PREFIX, limits)?;
    let device = resolve_device(&state, account, Some(container), None)?;
    let ts = request_timestamp(headers)?;
    let metadata = metadata_from_headers(headers, CONTAINER_META_PREFIX);

    let created = state
        .storage
        .create_container(&device, container, ts, metadata)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok(status.into_response())
}

/// `GET /v1/{account}/{container}` -- List objects.
#[utoipa::path(
    get,
    path = "/v1/{account}/{container}",
    tag = "Container",
    operation_id = "ListObjects",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
        ("prefix" = Option<String>, Query, description = "Only names starting with this"),
        ("delimiter" = Option<String>, Query, description = "Roll names up at this character"),
        ("marker" = Option<String>, Query, description = "Only names after this"),
        ("end_marker" = Option<String>, Query, description = "Only names before this"),
        ("path" = Option<String>, Query, description = "Only direct children of this path"),
        ("limit" = Option<usize>, Query, description = "Maximum rows, at most 10000"),
        ("format" = Option<String>, Query, description = "plain, json, or xml"),
    ),
    responses(
        (status = 200, description = "Listing"),
        (status = 204, description = "Empty plain listing"),
        (status = 404, description = "Container not found"),
        (status = 412, description = "Bad limit or delimiter")
    )
)]
pub async fn list_objects(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    let device = resolve_device(&state, account, Some(container), None)?;
    let params = parse_list_params(query, state.config.constraints.container_listing_limit)?;
    let format = ListingFormat::select(query, headers);

    let rows = state
        .storage
        .list_objects(&device, container, params)
        .await?;
    let info = state.storage.container_info(&device, container).await?;

    let (status, body) = match format {
        ListingFormat::Plain if rows.is_empty() => (StatusCode::NO_CONTENT, String::new()),
        ListingFormat::Plain => (StatusCode::OK, plain_listing(&rows)),
        ListingFormat::Json => (StatusCode::OK, json_object_listing(&rows)),
        ListingFormat::Xml => (StatusCode::OK, xml::render_container_listing(container, &rows)),
    };
    let mut response = (status, body).into_response();
    let out = response.headers_mut();
    container_headers(&info, out);
    if status == StatusCode::NO_CONTENT {
        out.remove(header::CONTENT_TYPE);
    } else {
        set_header(out, "content-type", format.content_type());
    }
    Ok(response)
}

/// `HEAD /v1/{account}/{container}` -- Container counts and metadata.
#[utoipa::path(
    head,
    path = "/v1/{account}/{container}",
    tag = "Container",
    operation_id = "HeadContainer",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
    ),
    responses(
        (status = 204, description = "Container info in headers"),
        (status = 404, description = "Container not found")
    )
)]
pub async fn head_container(
    state: Arc<AppState>,
    account: &str,
    container: &str,
) -> Result<Response, SwiftError> {
    let device = resolve_device(&state, account, Some(container), None)?;
    let info = state.storage.container_info(&device, container).await?;
    let mut response = StatusCode::NO_CONTENT.into_response();
    container_headers(&info, response.headers_mut());
    Ok(response)
}

/// `DELETE /v1/{account}/{container}` -- Remove an empty container.
#[utoipa::path(
    delete,
    path = "/v1/{account}/{container}",
    tag = "Container",
    operation_id = "DeleteContainer",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
    ),
    responses(
        (status = 204, description = "Container deleted"),
        (status = 404, description = "Container not found"),
        (status = 409, description = "Container not empty")
    )
)]
pub async fn delete_container(
    state: Arc<AppState>,
    account: &str,
    container: &str,
) -> Result<Response, SwiftError> {
    let device = resolve_device(&state, account, Some(container), None)?;
    state.storage.delete_container(&device, container).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /v1/{account}/{container}` -- Merge user metadata; an empty value
/// removes the key.
#[utoipa::path(
    post,
    path = "/v1/{account}/{container}",
    tag = "Container",
    operation_id = "PostContainer",
    params(
        ("account" = String, Path, description = "Account name"),
        ("container" = String, Path, description = "Container name"),
    ),
    responses(
        (status = 204, description = "Metadata updated"),
        (status = 400, description = "Invalid metadata"),
        (status = 404, description = "Container not found")
    )
)]
pub async fn post_container(
    state: Arc<AppState>,
    account: &str,
    container: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    check_metadata(headers, CONTAINER_META_PREFIX, &state.config.constraints)?;
    let device = resolve_device(&state, account, Some(container), None)?;
    let metadata = metadata_from_headers(headers, CONTAINER_META_PREFIX);
    state
        .storage
        .update_container_metadata(&device, container, metadata)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
