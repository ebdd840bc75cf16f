//! HTTP surface.
//!
//! | Route                          | Purpose                               |
//! |--------------------------------|---------------------------------------|
//! | `POST /api/upload`             | multipart `file` + optional `password` |
//! | `POST /functions/process-pdf`  | orchestrator trigger                  |
//! | `GET  /api/reports/:id`        | report status and results             |
//! | `GET  /health`                 | liveness                              |
//!
//! Authentication is an upstream concern: the auth proxy sets `x-user-id`
//! and the handlers trust it.

use crate::error::IngestError;
use crate::gateway::{Gateway, Upload};
use crate::model::{BiomarkerResult, ErrorResponse, ProcessRequest, ProcessResponse, Report};
use crate::orchestrator::Orchestrator;
use crate::store::Stores;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const OWNER_HEADER: &str = "x-user-id";

/// Multipart framing on top of the file ceiling.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub orchestrator: Orchestrator,
    pub stores: Stores,
    pub max_upload_bytes: usize,
}

/// Report plus its results, as returned by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportView {
    pub report: Report,
    pub results: Vec<BiomarkerResult>,
}

pub fn router(state: AppState) -> Router {
    let limit = state.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/functions/process-pdf", post(handle_process))
        .route("/api/reports/:id", get(handle_report))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), IngestError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| IngestError::Internal(format!("bind {addr}: {e}")))?;
    info!(%addr, "labtrack ingestion server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| IngestError::Internal(format!("server error: {e}")))
}

fn error_response(err: &IngestError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
        }),
    )
        .into_response()
}

fn owner(headers: &HeaderMap) -> Result<String, IngestError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(IngestError::Unauthenticated)
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let owner_id = match owner(&headers) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut password: Option<String> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("malformed multipart body: {e}");
                return error_response(&IngestError::Validation(
                    "Requête d'import invalide".into(),
                ));
            }
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or("document.pdf").to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((name, bytes.to_vec())),
                    Err(e) => {
                        warn!("failed to read upload bytes: {e}");
                        return error_response(&IngestError::Validation(
                            "Le fichier ne doit pas dépasser 10 Mo".into(),
                        ));
                    }
                }
            }
            "password" => password = field.text().await.ok(),
            _ => {}
        }
    }

    let Some((file_name, bytes)) = file else {
        return error_response(&IngestError::Validation("Aucun fichier fourni".into()));
    };

    let upload = Upload {
        file_name,
        bytes,
        password,
    };
    match state.gateway.upload(&owner_id, upload).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            warn!(%owner_id, error = %e, "upload rejected");
            error_response(&e)
        }
    }
}

async fn handle_process(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Response {
    let result = state.orchestrator.process(&request).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    };
    (status, Json(ProcessResponse::from_result(&result))).into_response()
}

async fn handle_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
) -> Response {
    let owner_id = match owner(&headers) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };
    let report = match state.stores.reports.get(&report_id).await {
        Ok(r) if r.owner_id == owner_id => r,
        Ok(_) => return error_response(&IngestError::ReportNotFound(report_id)),
        Err(e) => return error_response(&e),
    };
    match state.stores.results.list_for_report(&report.id).await {
        Ok(results) => Json(ReportView { report, results }).into_response(),
        Err(e) => error_response(&e),
    }
}
