//! HTTP surface: `POST /api/compare` and `GET /api/reference_image/<file>`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::config::Config;
use crate::error::CompareError;
use crate::matcher::round2;
use crate::service::FaceService;
use crate::upload::{temp_extension, TempImage};

/// Multipart field carrying the user's photo.
pub const IMAGE_FIELD: &str = "userImage";

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub temp_dir: PathBuf,
    pub temp_image_name: String,
    pub supported_formats: Vec<String>,
    pub max_bytes: usize,
}

impl UploadSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            temp_dir: cfg.temp_dir(),
            temp_image_name: cfg.temp_image_name.clone(),
            supported_formats: cfg.supported_image_formats.clone(),
            max_bytes: cfg.max_upload_bytes,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FaceService>,
    pub uploads: Arc<UploadSettings>,
}

impl AppState {
    pub fn new(service: FaceService, uploads: UploadSettings) -> Self {
        Self {
            service: Arc::new(service),
            uploads: Arc::new(uploads),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareResponse {
    pub similarity: f64,
    pub best_match_filename: String,
}

pub fn router(state: AppState, reference_dir: impl Into<PathBuf>) -> Router {
    let body_limit = state.uploads.max_bytes;
    let api = Router::new()
        .route("/compare", post(compare))
        .nest_service("/reference_image", ServeDir::new(reference_dir.into()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
}

async fn compare(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CompareResponse>, CompareError> {
    state.service.reference_set()?;

    let mut multipart = multipart.map_err(|_| CompareError::MissingImage)?;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CompareError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| CompareError::InvalidUpload(e.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }
    let (file_name, bytes) = upload.ok_or(CompareError::MissingImage)?;

    let service = state.service.clone();
    let uploads = state.uploads.clone();
    let comparison = tokio::task::spawn_blocking(move || {
        let extension = temp_extension(file_name.as_deref(), &uploads.supported_formats);
        let temp = TempImage::write(
            &uploads.temp_dir,
            &uploads.temp_image_name,
            &extension,
            &bytes,
        )
        .map_err(CompareError::Storage)?;
        // `temp` drops at the end of this closure whatever the outcome
        service.compare_path(temp.path())
    })
    .await
    .map_err(|e| CompareError::Analysis(e.to_string()))??;

    info!(
        "similarity {:.2} (distance {:.4}), best match {}",
        comparison.similarity, comparison.distance, comparison.best_match_filename
    );

    Ok(Json(CompareResponse {
        similarity: round2(comparison.similarity),
        best_match_filename: comparison.best_match_filename,
    }))
}

pub async fn serve(cfg: &Config, state: AppState) -> Result<()> {
    let addr: SocketAddr = cfg
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid address {}", cfg.bind_addr()))?;
    let app = router(state, cfg.reference_images_dir.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
