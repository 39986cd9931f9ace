//! services/api/src/web/files.rs
//!
//! Serves the presigned URLs handed out by `LocalStorage`. Requests carry no
//! session; the `expires` and `signature` query parameters are the credential.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use ride_platform_core::ports::{byte_stream_from, Storage};
use ride_platform_core::services::documents::mime_for_filename;
use ride_platform_core::ServiceError;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::storage::{LocalStorage, UrlSignature};
use crate::error::ApiError;
use crate::web::state::AppState;

#[derive(Deserialize)]
pub struct SignatureParams {
    pub expires: i64,
    pub signature: String,
}

impl From<SignatureParams> for UrlSignature {
    fn from(p: SignatureParams) -> Self {
        UrlSignature {
            expires: p.expires,
            signature: p.signature,
        }
    }
}

fn local_files(state: &AppState) -> Result<&Arc<LocalStorage>, ApiError> {
    state
        .files
        .as_ref()
        .ok_or_else(|| ServiceError::not_found("file serving is not enabled").into())
}

fn denied() -> ApiError {
    ServiceError::forbidden("the link is invalid or has expired").into()
}

/// PUT target of a presigned upload.
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<SignatureParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let files = local_files(&state)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();
    if !files.verify("PUT", &key, &content_type, &params.into(), Utc::now()) {
        warn!(key = %key, "Rejected presigned upload");
        return Err(denied());
    }

    let size = body.len() as i64;
    files
        .upload(&key, byte_stream_from(body), size, &content_type)
        .await
        .map_err(|e| {
            ServiceError::storage(
                "Failed to store presigned upload",
                "the file could not be stored, please try again",
                e,
            )
        })?;
    info!(key = %key, size, "Presigned upload stored");
    Ok(StatusCode::OK.into_response())
}

/// GET target of a presigned download.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<SignatureParams>,
) -> Result<Response, ApiError> {
    let files = local_files(&state)?;
    if !files.verify("GET", &key, "", &params.into(), Utc::now()) {
        return Err(denied());
    }
    let stream = files.download(&key).await.map_err(ServiceError::from)?;
    Ok((
        [(header::CONTENT_TYPE, mime_for_filename(&key))],
        Body::from_stream(stream),
    )
        .into_response())
}
