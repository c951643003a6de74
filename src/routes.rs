use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::bail_service;
use crate::error::ServiceResult;
use crate::extractors::ImageUpload;
use crate::service::CaptionService;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<CaptionService>,
    pub(crate) sample_image: Option<Arc<RgbImage>>,
    pub(crate) sample_max_length: usize,
    pub(crate) upload_max_length: usize,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub(crate) struct MessageResponse {
    pub(crate) message: String,
}

pub(crate) fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/register", get(handle_register))
        .route("/photo_test", get(handle_photo_test))
        .route(
            "/img2txt",
            get(handle_img2txt)
                .post(handle_img2txt)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_index() -> &'static str {
    "index page"
}

async fn handle_register() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "test".into(),
    })
}

#[axum_macros::debug_handler]
async fn handle_photo_test(State(state): State<AppState>) -> ServiceResult<Json<MessageResponse>> {
    let Some(image) = state.sample_image.clone() else {
        bail_service!(StatusCode::INTERNAL_SERVER_ERROR, "Sample image is not loaded")
    };
    let output = state
        .service
        .caption_image(image, state.sample_max_length)
        .await?;

    Ok(Json(MessageResponse {
        message: output.translation,
    }))
}

#[axum_macros::debug_handler]
async fn handle_img2txt(
    State(state): State<AppState>,
    ImageUpload(upload): ImageUpload,
) -> ServiceResult<Json<MessageResponse>> {
    let Some(file) = upload else {
        bail_service!(StatusCode::BAD_REQUEST, "No file")
    };
    // Historically answered with the invalid status 40
    if file.file_name.is_empty() {
        bail_service!(StatusCode::BAD_REQUEST, "No Selected file")
    }

    let output = state
        .service
        .caption_upload(file.bytes, state.upload_max_length)
        .await?;

    Ok(Json(MessageResponse {
        message: output.translation,
    }))
}
