use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::records::{InProgressRecord, MarkerStatus, ResultRecord, Stage};
use crate::status_store::FileMetadata;
use crate::task::{Priority, TaskStatus, TranscriptionSettings};

/// A request to transcribe one file.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
	pub filename: String,
	pub settings: TranscriptionSettings,
	pub priority: Priority,
	pub client_id: Option<String>,
}

impl SubmitRequest {
	#[must_use]
	pub fn api(filename: impl Into<String>, settings: TranscriptionSettings) -> Self {
		Self {
			filename: filename.into(),
			settings,
			priority: Priority::Api,
			client_id: None,
		}
	}

	#[must_use]
	pub fn discovered(filename: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			settings: TranscriptionSettings::default(),
			priority: Priority::AutoScan,
			client_id: None,
		}
	}

	#[must_use]
	pub fn with_client(mut self, client_id: Option<String>) -> Self {
		self.client_id = client_id;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
	Pending,
	Processing,
	Completed,
	FileNotFound,
	Conflict,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
	pub status: SubmitStatus,
	pub filename: String,
	pub task_id: Option<Uuid>,
	pub message: String,
	pub queue_position: Option<usize>,
	pub estimated_wait_time: Option<f64>,
	pub attempt: Option<u32>,
	pub waiters: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<ResultRecord>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub debug_info: Option<DebugInfo>,
}

impl SubmitOutcome {
	pub(crate) fn new(status: SubmitStatus, filename: &str, message: impl Into<String>) -> Self {
		Self {
			status,
			filename: filename.to_string(),
			task_id: None,
			message: message.into(),
			queue_position: None,
			estimated_wait_time: None,
			attempt: None,
			waiters: None,
			result: None,
			debug_info: None,
		}
	}

	pub(crate) fn completed(result: ResultRecord) -> Self {
		let mut outcome = Self::new(SubmitStatus::Completed, &result.filename, "Transcription already completed");
		outcome.task_id = Some(result.task_id);
		outcome.attempt = Some(result.attempt);
		outcome.result = Some(result);
		outcome
	}

	pub(crate) const fn with_task(mut self, task_id: Uuid, attempt: u32) -> Self {
		self.task_id = Some(task_id);
		self.attempt = Some(attempt);
		self
	}

	pub(crate) const fn with_position(mut self, position: usize, estimated_wait_time: f64) -> Self {
		self.queue_position = Some(position);
		self.estimated_wait_time = Some(estimated_wait_time);
		self
	}

	pub(crate) const fn with_waiters(mut self, waiters: usize) -> Self {
		self.waiters = Some(waiters);
		self
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
	pub code: ErrorCode,
	pub message: String,
}

/// Diagnostics attached to responses when the caller asks for debug output.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
	pub file_exists: bool,
	pub file_metadata: Option<FileMetadata>,
	pub in_progress_marker: Option<serde_json::Value>,
	pub has_result: bool,
	pub queued: bool,
	pub active: bool,
	pub waiters: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
	pub status: TaskStatus,
	pub filename: String,
	pub message: String,
	pub task_id: Option<Uuid>,
	pub progress: f32,
	pub priority: Option<Priority>,
	pub queue_position: Option<usize>,
	pub attempt: Option<u32>,
	pub stage: Option<Stage>,
	pub started_at: Option<DateTime<Utc>>,
	pub estimated_completion: Option<DateTime<Utc>>,
	pub processing_time: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorDetail>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub debug_info: Option<DebugInfo>,
}

impl StatusReport {
	pub(crate) fn new(status: TaskStatus, filename: &str, message: impl Into<String>) -> Self {
		Self {
			status,
			filename: filename.to_string(),
			message: message.into(),
			task_id: None,
			progress: 0.0,
			priority: None,
			queue_position: None,
			attempt: None,
			stage: None,
			started_at: None,
			estimated_completion: None,
			processing_time: None,
			error: None,
			debug_info: None,
		}
	}

	pub(crate) fn completed(result: &ResultRecord) -> Self {
		let mut report = Self::new(TaskStatus::Completed, &result.filename, "Transcription completed");
		report.task_id = Some(result.task_id);
		report.progress = 100.0;
		report.attempt = Some(result.attempt);
		report.processing_time = Some(result.processing_time);
		report
	}

	pub(crate) fn from_record(record: &InProgressRecord) -> Self {
		let (status, message) = match record.status {
			MarkerStatus::Processing => (TaskStatus::Processing, "Transcription in progress"),
			MarkerStatus::Error => (TaskStatus::Error, "Transcription failed"),
		};
		let mut report = Self::new(status, &record.filename, message);
		report.task_id = Some(record.task_id);
		report.progress = record.progress;
		report.priority = Some(record.priority);
		report.attempt = Some(record.attempt);
		report.stage = Some(record.stage);
		report.started_at = Some(record.started_at);
		if record.status == MarkerStatus::Error {
			report.error = Some(ErrorDetail {
				code: record.error_code.unwrap_or(ErrorCode::InternalError),
				message: record.last_error.clone().unwrap_or_else(|| "unknown error".to_string()),
			});
		}
		report
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionReport {
	pub filename: String,
	pub deleted_files: Vec<String>,
	pub was_processing: bool,
	pub was_queued: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingEntry {
	pub position: usize,
	pub task_id: Uuid,
	pub filename: String,
	pub priority: Priority,
	pub submitted_at: DateTime<Utc>,
	pub attempt: u32,
	pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveEntry {
	pub task_id: Uuid,
	pub filename: String,
	pub priority: Priority,
	pub attempt: u32,
	pub stage: Stage,
	pub started_at: DateTime<Utc>,
	pub waiters: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
	pub pending: usize,
	pub active: usize,
	pub completed: u64,
	pub failed: u64,
	pub retried: u64,
	pub restarted: u64,
	pub average_processing_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
	pub pending: Vec<PendingEntry>,
	pub active: Vec<ActiveEntry>,
	pub stats: QueueStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
	pub requeued: usize,
	pub cleared: usize,
	pub kept_errors: usize,
}

/// Published on every state transition of a filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
	pub filename: String,
	pub task_id: Option<Uuid>,
	pub status: TaskStatus,
	pub attempt: Option<u32>,
}
