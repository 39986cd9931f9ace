//! services/api/src/web/response.rs
//!
//! The JSON envelope every endpoint answers with:
//! `{success, data?, error?: {code, message}, meta?: {limit, offset, total}}`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use ride_platform_core::services::Page;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PageMeta {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

/// 200 with `data`.
pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    Json(Envelope {
        success: true,
        data: Some(data),
        meta: None,
    })
}

/// 201 with `data`.
pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, ok(data))
}

/// 200 with the page items as `data` and paging figures as `meta`.
pub fn paged<T, U, F>(page: Page<T>, convert: F) -> impl IntoResponse
where
    U: Serialize,
    F: FnMut(T) -> U,
{
    let meta = PageMeta {
        limit: page.limit,
        offset: page.offset,
        total: page.total,
    };
    Json(Envelope {
        success: true,
        data: Some(page.items.into_iter().map(convert).collect::<Vec<U>>()),
        meta: Some(meta),
    })
}
