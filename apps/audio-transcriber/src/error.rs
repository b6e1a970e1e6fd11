use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use transcription_queue::{ErrorCode, QueueError};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
	#[error("Request validation failed")]
	Validation(#[from] garde::Report),

	#[error("Malformed request body: {0}")]
	MalformedBody(#[from] JsonRejection),

	#[error("Malformed query string: {0}")]
	MalformedQuery(#[from] QueryRejection),

	#[error("No transcription result for '{0}'")]
	ResultNotFound(String),

	#[error(transparent)]
	Queue(#[from] QueueError),

	#[error("Metrics encoding failed: {0}")]
	Metrics(#[from] prometheus::Error),
}

#[derive(Serialize)]
struct ErrorBody {
	status: &'static str,
	error_code: ErrorCode,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	details: Option<String>,
}

impl ApiError {
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::Validation(_) | Self::MalformedBody(_) | Self::MalformedQuery(_) => ErrorCode::InvalidRequest,
			Self::ResultNotFound(_) => ErrorCode::NotFound,
			Self::Queue(e) => e.code(),
			Self::Metrics(_) => ErrorCode::InternalError,
		}
	}

	const fn status_code(&self) -> StatusCode {
		match self.code() {
			ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
			ErrorCode::FileNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
			ErrorCode::Conflict | ErrorCode::ProcessingActive => StatusCode::CONFLICT,
			ErrorCode::EngineTimeout => StatusCode::GATEWAY_TIMEOUT,
			ErrorCode::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
			ErrorCode::EngineFailed | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn details(&self) -> Option<String> {
		match self {
			Self::Validation(report) => Some(report.to_string()),
			Self::MalformedBody(rejection) => Some(rejection.body_text()),
			Self::MalformedQuery(rejection) => Some(rejection.body_text()),
			_ => None,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response<Body> {
		let status = self.status_code();
		if status.is_server_error() {
			tracing::error!(error = %self, "Request failed");
		} else {
			tracing::debug!(error = %self, code = self.code().as_str(), "Request rejected");
		}

		let body = ErrorBody {
			status: "error",
			error_code: self.code(),
			message: self.to_string(),
			details: self.details(),
		};

		(status, Json(body)).into_response()
	}
}
