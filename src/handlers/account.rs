//! Account-level Swift API handlers.
//!
//! An account is a provisioned volume, so it can be read and annotated
//! but not created or removed over HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::common::{
    json_account_listing, metadata_from_headers, parse_list_params, plain_listing,
    resolve_device, set_header, set_user_metadata, ListingFormat,
};
use crate::constraints::check_metadata;
use crate::errors::SwiftError;
use crate::metadata::keys::ACCOUNT_META_PREFIX;
use crate::storage::backend::AccountInfo;
use crate::xml;
use crate::AppState;

/// Methods an account accepts.
pub const ACCOUNT_ALLOW: &str = "HEAD, GET, POST";

fn account_headers(info: &AccountInfo, headers: &mut HeaderMap) {
    set_header(
        headers,
        "x-account-container-count",
        &info.container_count.to_string(),
    );
    set_header(
        headers,
        "x-account-object-count",
        &info.object_count.to_string(),
    );
    set_header(headers, "x-account-bytes-used", &info.bytes_used.to_string());
    set_header(headers, "x-timestamp", &info.created_at);
    set_header(headers, "x-put-timestamp", &info.put_timestamp);
    set_user_metadata(headers, &info.metadata, ACCOUNT_META_PREFIX);
}

/// `GET /v1/{account}` -- List containers.
#[utoipa::path(
    get,
    path = "/v1/{account}",
    tag = "Account",
    operation_id = "ListContainers",
    params(
        ("account" = String, Path, description = "Account name"),
        ("prefix" = Option<String>, Query, description = "Only names starting with this"),
        ("delimiter" = Option<String>, Query, description = "Roll names up at this character"),
        ("marker" = Option<String>, Query, description = "Only names after this"),
        ("end_marker" = Option<String>, Query, description = "Only names before this"),
        ("limit" = Option<usize>, Query, description = "Maximum rows, at most 10000"),
        ("format" = Option<String>, Query, description = "plain, json, or xml"),
    ),
    responses(
        (status = 200, description = "Listing"),
        (status = 204, description = "Empty plain listing"),
        (status = 404, description = "Account not found"),
        (status = 412, description = "Bad limit or delimiter"),
        (status = 507, description = "Device not mounted")
    )
)]
pub async fn list_containers(
    state: Arc<AppState>,
    account: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    let device = resolve_device(&state, account, None, None)?;
    let mut params = parse_list_params(query, state.config.constraints.container_listing_limit)?;
    // Containers are flat names.
    params.path = None;
    let format = ListingFormat::select(query, headers);

    let rows = state.storage.list_containers(&device, params).await?;
    let info = state.storage.account_info(&device).await?;

    let (status, body) = match format {
        ListingFormat::Plain if rows.is_empty() => (StatusCode::NO_CONTENT, String::new()),
        ListingFormat::Plain => (StatusCode::OK, plain_listing(&rows)),
        ListingFormat::Json => (StatusCode::OK, json_account_listing(&rows)),
        ListingFormat::Xml => (StatusCode::OK, xml::render_account_listing(account, &rows)),
    };
    let mut response = (status, body).into_response();
    let out = response.headers_mut();
    account_headers(&info, out);
    if status == StatusCode::NO_CONTENT {
        out.remove(header::CONTENT_TYPE);
    } else {
        set_header(out, "content-type", format.content_type());
    }
    Ok(response)
}

/// `HEAD /v1/{account}` -- Account counts and metadata.
#[utoipa::path(
    head,
    path = "/v1/{account}",
    tag = "Account",
    operation_id = "HeadAccount",
    params(("account" = String, Path, description = "Account name")),
    responses(
        (status = 204, description = "Account info in headers"),
        (status = 404, description = "Account not found"),
        (status = 507, description = "Device not mounted")
    )
)]
pub async fn head_account(state: Arc<AppState>, account: &str) -> Result<Response, SwiftError> {
    let device = resolve_device(&state, account, None, None)?;
    let info = state.storage.account_info(&device).await?;
    let mut response = StatusCode::NO_CONTENT.into_response();
    account_headers(&info, response.headers_mut());
    Ok(response)
}

/// `POST /v1/{account}` -- Merge user metadata; an empty value removes the
/// key.
#[utoipa::path(
    post,
    path = "/v1/{account}",
    tag = "Account",
    operation_id = "PostAccount",
    params(("account" = String, Path, description = "Account name")),
    responses(
        (status = 204, description = "Metadata updated"),
        (status = 400, description = "Invalid metadata"),
        (status = 404, description = "Account not found")
    )
)]
pub async fn post_account(
    state: Arc<AppState>,
    account: &str,
    headers: &HeaderMap,
) -> Result<Response, SwiftError> {
    check_metadata(headers, ACCOUNT_META_PREFIX, &state.config.constraints)?;
    let device = resolve_device(&state, account, None, None)?;
    let metadata = metadata_from_headers(headers, ACCOUNT_META_PREFIX);
    state.storage.update_account_metadata(&device, metadata).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `PUT` and `DELETE` on an account.
pub fn account_method_not_allowed() -> Result<Response, SwiftError> {
    Err(SwiftError::MethodNotAllowed {
        allow: ACCOUNT_ALLOW,
    })
}
