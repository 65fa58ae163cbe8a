use crate::http::error::ApiError;
use crate::http::router::AppState;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use docrag_core::{looks_like_pdf, IngestionReceipt, QueryRequest, RagAnswer};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use tracing::info;

const UPLOAD_FIELD: &str = "file";
const PDF_CONTENT_TYPE: &str = "application/pdf";

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "RAG API is running" }))
}

fn upload_error(state: &AppState, error: MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge {
            limit_mb: state.max_upload_bytes / (1024 * 1024),
        };
    }
    ApiError::bad_request(error.body_text())
}

pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestionReceipt>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| upload_error(&state, error))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        if field.content_type() != Some(PDF_CONTENT_TYPE) {
            return Err(ApiError::bad_request("Only PDF files are accepted"));
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "document.pdf".to_string());

        let bytes = field
            .bytes()
            .await
            .map_err(|error| upload_error(&state, error))?;
        if bytes.len() > state.max_upload_bytes {
            return Err(ApiError::PayloadTooLarge {
                limit_mb: state.max_upload_bytes / (1024 * 1024),
            });
        }
        if !looks_like_pdf(&bytes) {
            return Err(ApiError::bad_request("Uploaded file is not a PDF"));
        }

        info!(file_name = %file_name, bytes = bytes.len(), "document upload received");
        let receipt = state.engine.ingest(bytes.to_vec(), &file_name).await?;
        return Ok(Json(receipt));
    }

    Err(ApiError::bad_request("No file was uploaded"))
}

fn query_body(payload: Result<Json<QueryRequest>, JsonRejection>) -> Result<QueryRequest, ApiError> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<RagAnswer>, ApiError> {
    let request = query_body(payload)?;
    let answer = state.engine.answer(&request).await?;
    Ok(Json(answer))
}

pub async fn query_stream(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = query_body(payload)?;
    let answer = state.engine.answer_stream(&request).await?;

    let events = answer.map(|event| Ok::<Event, Infallible>(Event::default().data(event.data())));
    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(response)
}
