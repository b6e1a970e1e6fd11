use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Stable, client-facing error codes. Persisted in error markers and returned by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
	InvalidRequest,
	FileNotFound,
	NotFound,
	Conflict,
	ProcessingActive,
	EngineTimeout,
	EngineFailed,
	EngineUnavailable,
	InternalError,
}

impl ErrorCode {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::InvalidRequest => "invalid_request",
			Self::FileNotFound => "file_not_found",
			Self::NotFound => "not_found",
			Self::Conflict => "conflict",
			Self::ProcessingActive => "processing_active",
			Self::EngineTimeout => "engine_timeout",
			Self::EngineFailed => "engine_failed",
			Self::EngineUnavailable => "engine_unavailable",
			Self::InternalError => "internal_error",
		}
	}
}

#[derive(Error, Debug)]
pub enum QueueError {
	#[error("Invalid filename '{0}'")]
	InvalidFilename(String),
	#[error("Deletion requests bypass the queue")]
	DeletionNotQueueable,
	#[error("'{filename}' is being processed by an engine that cannot be interrupted")]
	ProcessingActive { filename: String },
	#[error("Invalid exclude pattern: {0}")]
	Pattern(#[from] regex::Error),
	#[error("Watcher error: {0}")]
	Watcher(#[from] notify::Error),
	#[error("Prometheus error: {0}")]
	Prometheus(#[from] prometheus::Error),
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("IO error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl QueueError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io { path: path.into(), source }
	}

	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::InvalidFilename(_) | Self::DeletionNotQueueable => ErrorCode::InvalidRequest,
			Self::ProcessingActive { .. } => ErrorCode::ProcessingActive,
			_ => ErrorCode::InternalError,
		}
	}
}

/// Failures reported by a transcription engine for a single attempt.
#[derive(Error, Debug)]
pub enum EngineError {
	#[error("Engine timed out after {0:?}")]
	Timeout(Duration),
	#[error("Engine was cancelled")]
	Cancelled,
	#[error("Engine failed: {0}")]
	Failed(String),
	#[error("Engine unavailable: {0}")]
	Unavailable(String),
	#[error("Engine produced unreadable output: {0}")]
	InvalidOutput(String),
	#[error("Engine IO error: {0}")]
	Io(#[from] std::io::Error),
}

impl EngineError {
	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::Timeout(_) => ErrorCode::EngineTimeout,
			Self::Unavailable(_) => ErrorCode::EngineUnavailable,
			Self::Cancelled => ErrorCode::Conflict,
			Self::Failed(_) | Self::InvalidOutput(_) | Self::Io(_) => ErrorCode::EngineFailed,
		}
	}
}
