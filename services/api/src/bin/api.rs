//! services/api/src/bin/api.rs

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use ride_api::{
    adapters::{
        AwsCredentials, FieldExtractor, GoogleVisionOcr, HttpPaymentGateway, LocalStorage,
        PgRepository, TextractOcr,
    },
    config::{Config, OcrProvider},
    error::ApiError,
    web::{router, ApiDoc, AppState},
};
use ride_platform_core::memory::{MockOcrProcessor, ScriptedPayments};
use ride_platform_core::ports::{OcrProcessor, PaymentProcessor, RandomIds, SystemClock};
use ride_platform_core::services::{DocumentPorts, DocumentService, SubscriptionPorts, SubscriptionService};
use ride_platform_core::workers::{run_every, OcrWorker, OcrWorkerPorts, RenewalWorker};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn ocr_processor(config: &Config) -> Result<Arc<dyn OcrProcessor>, ApiError> {
    let fields = || FieldExtractor::new().map_err(|e| ApiError::Internal(format!("OCR patterns: {}", e)));
    let timeout = config.ocr_worker.job_timeout;
    Ok(match &config.ocr_provider {
        OcrProvider::Mock => {
            warn!("OCR_PROVIDER=mock: documents get synthetic OCR results");
            Arc::new(MockOcrProcessor::new(0.95))
        }
        OcrProvider::GoogleVision { api_key } => Arc::new(
            GoogleVisionOcr::new(api_key.clone(), fields()?, timeout)
                .map_err(|e| ApiError::Internal(format!("Vision client: {}", e)))?,
        ),
        OcrProvider::AwsTextract {
            region,
            access_key_id,
            secret_access_key,
        } => Arc::new(
            TextractOcr::new(
                AwsCredentials {
                    region: region.clone(),
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                },
                fields()?,
                timeout,
            )
            .map_err(|e| ApiError::Internal(format!("Textract client: {}", e)))?,
        ),
    })
}

fn payment_processor(config: &Config) -> Result<Arc<dyn PaymentProcessor>, ApiError> {
    match (&config.payment.gateway_url, &config.payment.api_key) {
        (Some(url), Some(key)) => Ok(Arc::new(
            HttpPaymentGateway::new(url, key.clone(), config.payment.timeout)
                .map_err(|e| ApiError::Internal(format!("payment client: {}", e)))?,
        )),
        _ => {
            warn!("PAYMENT_GATEWAY_URL is not set: charges are approved in-process");
            Ok(Arc::new(ScriptedPayments::new()))
        }
    }
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_acquire_timeout)
        .connect(&config.database_url)
        .await?;
    let repo = Arc::new(PgRepository::new(db_pool));
    info!("Running database migrations...");
    repo.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Adapters ---
    let storage = Arc::new(
        LocalStorage::new(
            &config.storage.root,
            config.storage.public_url.clone(),
            config.storage.signing_key.as_bytes(),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?,
    );
    let payments = payment_processor(&config)?;
    let processor = ocr_processor(&config)?;
    let clock = Arc::new(SystemClock);
    let ids = Arc::new(RandomIds);

    // --- 4. Build the Services ---
    let documents = Arc::new(DocumentService::new(
        DocumentPorts {
            types: repo.clone(),
            documents: repo.clone(),
            drivers: repo.clone(),
            storage: storage.clone(),
            clock: clock.clone(),
            ids: ids.clone(),
        },
        config.documents.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        SubscriptionPorts {
            plans: repo.clone(),
            subscriptions: repo.clone(),
            spend: repo.clone(),
            payments: payments.clone(),
            clock: clock.clone(),
            ids: ids.clone(),
        },
        config.subscriptions.clone(),
    ));

    // --- 5. Start the Background Workers ---
    let shutdown = CancellationToken::new();
    let ocr_worker = Arc::new(OcrWorker::new(
        OcrWorkerPorts {
            jobs: repo.clone(),
            documents: repo.clone(),
            types: repo.clone(),
            storage: storage.clone(),
            processor,
            clock: clock.clone(),
            ids: ids.clone(),
        },
        config.ocr_worker.clone(),
    ));
    let renewal_worker = Arc::new(RenewalWorker::new(
        repo.clone(),
        repo.clone(),
        payments,
        clock.clone(),
        config.renewal.clone(),
    ));
    let sweeper = documents.clone();
    let workers = vec![
        tokio::spawn(ocr_worker.run(shutdown.clone())),
        tokio::spawn(renewal_worker.run(shutdown.clone())),
        tokio::spawn(run_every(
            "document_expiry",
            config.expiry_sweep_tick,
            shutdown.clone(),
            move |_| {
                let sweeper = sweeper.clone();
                async move {
                    match sweeper.expire_documents().await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "Expired documents swept"),
                        Err(e) => error!(error = %e, "Document expiry sweep failed"),
                    }
                }
            },
        )),
    ];

    // --- 6. Build the Shared AppState and Router ---
    let app_state = Arc::new(AppState {
        documents,
        subscriptions,
        sessions: repo.clone(),
        files: Some(storage),
    });

    let origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("invalid CORS_ORIGIN: {}", e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The server has drained; let the workers finish their current item.
    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker task ended abnormally: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}
