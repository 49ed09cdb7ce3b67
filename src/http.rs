//! HTTP transport

use crate::config::ServerConfig;
use crate::selection::{ProfilePhotoSelector, SelectionOutcome};
use crate::server::{
    select_in_background, ErrorResponse, ExtractPhotoParams, ExtractPhotoResponse, NO_FACE_MESSAGE,
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub selector: ProfilePhotoSelector,
}

/// Build the HTTP routes
pub fn router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/extract-photo", post(extract_photo))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until shutdown
pub async fn serve(config: &ServerConfig, selector: ProfilePhotoSelector) -> anyhow::Result<()> {
    let app = router(AppState { selector }, config.max_request_bytes);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        model = %config.model_path.display(),
        max_request_bytes = config.max_request_bytes,
        staged = config.stage_dir.is_some(),
        "Profile photo server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn extract_photo(
    State(state): State<AppState>,
    payload: Result<Json<ExtractPhotoParams>, JsonRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("extract_photo", %request_id);

    async move {
        let params = match payload {
            Ok(Json(params)) => params,
            Err(rejection) => {
                tracing::warn!(error = %rejection.body_text(), "Rejected request body");
                return if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
                } else {
                    error_response(StatusCode::BAD_REQUEST, "Invalid JSON body")
                };
            }
        };

        match select_in_background(state.selector.clone(), params.pdf_base64).await {
            Ok(SelectionOutcome::Found(image)) => {
                (StatusCode::OK, Json(ExtractPhotoResponse::from(&image))).into_response()
            }
            Ok(SelectionOutcome::NotFound) => error_response(StatusCode::NOT_FOUND, NO_FACE_MESSAGE),
            Err(e) if e.is_client_error() => {
                tracing::warn!(error = %e, "Bad request");
                error_response(StatusCode::BAD_REQUEST, e.client_message())
            }
            Err(e) => {
                tracing::error!(error = %e, "Profile photo extraction failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.client_message())
            }
        }
    }
    .instrument(span)
    .await
}
