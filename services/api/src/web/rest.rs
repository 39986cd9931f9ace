//! services/api/src/web/rest.rs
//!
//! Assembles the REST router under `/api/v1` and holds the master definition
//! for the OpenAPI specification.

use crate::web::{admin, documents, files, middleware, state::AppState, subscriptions};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        documents::list_document_types,
        documents::list_my_documents,
        documents::my_verification_status,
        documents::upload_document,
        documents::presigned_upload,
        documents::upload_complete,
        documents::get_document,
        documents::document_history,
        documents::download_url,
        documents::upload_back,
        admin::pending_documents,
        admin::expiring_documents,
        admin::start_review,
        admin::review_document,
        admin::driver_documents,
        admin::driver_verification_status,
        admin::create_document_type,
        admin::list_all_plans,
        admin::create_plan,
        admin::update_plan,
        admin::deactivate_plan,
        subscriptions::list_plans,
        subscriptions::compare_plans,
        subscriptions::subscribe,
        subscriptions::my_subscription,
        subscriptions::pause,
        subscriptions::resume,
        subscriptions::cancel,
        subscriptions::ride_discount,
    ),
    components(
        schemas(
            crate::web::response::ErrorBody,
            crate::web::response::PageMeta,
        )
    ),
    tags(
        (name = "documents", description = "Driver document upload and verification."),
        (name = "subscriptions", description = "Ride subscriptions and per-ride discounts."),
        (name = "admin", description = "Review queue and catalog management.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Router
//=========================================================================================

/// Multipart framing overhead allowed on top of the largest accepted file.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Builds every route the service exposes. CORS and Swagger UI are layered on
/// by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    let max_upload = usize::try_from(state.documents.policy().max_upload_bytes).unwrap_or(usize::MAX);
    let body_limit = DefaultBodyLimit::max(max_upload.saturating_add(FORM_OVERHEAD_BYTES));

    let public_routes = Router::new()
        .route("/documents/types", get(documents::list_document_types))
        .route("/subscriptions/plans", get(subscriptions::list_plans));

    let admin_routes = Router::new()
        .route("/admin/documents/pending", get(admin::pending_documents))
        .route("/admin/documents/expiring", get(admin::expiring_documents))
        .route("/admin/documents/types", post(admin::create_document_type))
        .route("/admin/documents/{id}/start-review", post(admin::start_review))
        .route("/admin/documents/{id}/review", post(admin::review_document))
        .route("/admin/drivers/{driver_id}/documents", get(admin::driver_documents))
        .route(
            "/admin/drivers/{driver_id}/verification-status",
            get(admin::driver_verification_status),
        )
        .route(
            "/admin/subscriptions/plans",
            get(admin::list_all_plans).post(admin::create_plan),
        )
        .route("/admin/subscriptions/plans/{id}", axum::routing::patch(admin::update_plan))
        .route("/admin/subscriptions/plans/{id}/deactivate", post(admin::deactivate_plan))
        .layer(axum_middleware::from_fn(middleware::require_admin));

    let protected_routes = Router::new()
        .route("/documents", get(documents::list_my_documents))
        .route("/documents/verification-status", get(documents::my_verification_status))
        .route("/documents/upload", post(documents::upload_document))
        .route("/documents/presigned-upload", post(documents::presigned_upload))
        .route("/documents/upload-complete", post(documents::upload_complete))
        .route("/documents/{id}", get(documents::get_document))
        .route("/documents/{id}/history", get(documents::document_history))
        .route("/documents/{id}/download-url", get(documents::download_url))
        .route("/documents/{id}/back", post(documents::upload_back))
        .route("/subscriptions", post(subscriptions::subscribe))
        .route("/subscriptions/compare", get(subscriptions::compare_plans))
        .route(
            "/subscriptions/me",
            get(subscriptions::my_subscription).delete(subscriptions::cancel),
        )
        .route("/subscriptions/me/pause", post(subscriptions::pause))
        .route("/subscriptions/me/resume", post(subscriptions::resume))
        .route("/subscriptions/me/rides/discount", post(subscriptions::ride_discount))
        .merge(admin_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/files/{*key}", get(files::get_file).put(files::put_file))
        .layer(body_limit)
        .with_state(state)
}
