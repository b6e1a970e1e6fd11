use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use prometheus::{Encoder, TextEncoder};
use tracing::{info, instrument};
use transcription_queue::{QueueSnapshot, ResultRecord, StatusReport, SubmitOutcome};

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{DeleteRequest, DeleteResponse, HealthResponse, ModelsResponse, StatusQuery, TranscribeRequest};

#[instrument(name = "transcribe", skip_all)]
pub async fn transcribe(State(state): State<AppState>, payload: Result<Json<TranscribeRequest>, JsonRejection>) -> Result<Json<SubmitOutcome>, ApiError> {
	let Json(req) = payload?;
	req.validate()?;

	info!(filename = %req.filename, client_id = ?req.client_id, "📥 Transcription requested");
	let outcome = state.coordinator.submit(req.into_submit(state.engine.config())).await?;
	Ok(Json(outcome))
}

#[instrument(name = "delete_transcription", skip_all)]
pub async fn delete_transcription(State(state): State<AppState>, payload: Result<Json<DeleteRequest>, JsonRejection>) -> Result<Json<DeleteResponse>, ApiError> {
	let Json(req) = payload?;
	req.validate()?;

	info!(filename = %req.filename, force = req.force, "🗑️ Deletion requested");
	let report = state.coordinator.delete(&req.filename, req.force).await?;
	Ok(Json(report.into()))
}

#[instrument(name = "status", skip(state, query))]
pub async fn status(State(state): State<AppState>, Path(filename): Path<String>, query: Result<Query<StatusQuery>, QueryRejection>) -> Result<Json<StatusReport>, ApiError> {
	let Query(query) = query?;
	Ok(Json(state.coordinator.status(&filename, query.debug)?))
}

#[instrument(name = "result", skip(state))]
pub async fn result(State(state): State<AppState>, Path(filename): Path<String>) -> Result<Json<ResultRecord>, ApiError> {
	state.coordinator.result(&filename)?.map(Json).ok_or(ApiError::ResultNotFound(filename))
}

pub async fn queue(State(state): State<AppState>) -> Json<QueueSnapshot> {
	Json(state.coordinator.queue_snapshot())
}

pub async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
	Json(ModelsResponse {
		models: state.engine.available_models(),
		default_model: state.engine.config().default_model,
	})
}

#[instrument(name = "health", skip_all)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
	let engine_available = state.engine.is_available().await;
	let stats = state.coordinator.queue_snapshot().stats;

	Json(HealthResponse {
		status: if engine_available { "healthy" } else { "degraded" },
		service: env!("CARGO_PKG_NAME"),
		version: env!("CARGO_PKG_VERSION"),
		uptime: state.started_at.elapsed().as_secs_f64(),
		engine: state.coordinator.engine().name().to_string(),
		engine_available,
		models_loaded: state.engine.available_models(),
		pending: stats.pending,
		active: stats.active,
	})
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
	let encoder = TextEncoder::new();
	let mut buffer = Vec::new();
	encoder.encode(&state.registry.gather(), &mut buffer)?;
	Ok((StatusCode::OK, [(CONTENT_TYPE, encoder.format_type().to_string())], buffer))
}
