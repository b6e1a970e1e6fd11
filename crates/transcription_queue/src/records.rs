use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineOutput;
use crate::error::ErrorCode;
use crate::task::{Priority, TranscriptionSettings, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
	Processing,
	Error,
}

/// Where an attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	Queued,
	Transcribing,
	RetryScheduled,
	Restarting,
	Failed,
}

/// Contents of `<stem>.in_progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProgressRecord {
	pub filename: String,
	pub status: MarkerStatus,
	pub task_id: Uuid,
	pub started_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub priority: Priority,
	pub progress: f32,
	pub settings: TranscriptionSettings,
	pub stage: Stage,
	pub attempt: u32,
	#[serde(default)]
	pub last_error: Option<String>,
	#[serde(default)]
	pub error_code: Option<ErrorCode>,
}

impl InProgressRecord {
	#[must_use]
	pub fn for_item(item: &WorkItem, stage: Stage) -> Self {
		let now = Utc::now();
		Self {
			filename: item.filename.clone(),
			status: MarkerStatus::Processing,
			task_id: item.task_id,
			started_at: now,
			updated_at: now,
			priority: item.priority,
			progress: 0.0,
			settings: item.settings.clone(),
			stage,
			attempt: item.attempt,
			last_error: None,
			error_code: None,
		}
	}

	#[must_use]
	pub fn with_failure(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.last_error = Some(message.into());
		self.error_code = Some(code);
		self.updated_at = Utc::now();
		self
	}

	#[must_use]
	pub fn into_terminal(mut self) -> Self {
		self.status = MarkerStatus::Error;
		self.stage = Stage::Failed;
		self.updated_at = Utc::now();
		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
	pub word: String,
	#[serde(default)]
	pub start: Option<f64>,
	#[serde(default)]
	pub end: Option<f64>,
	#[serde(default)]
	pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
	pub start: f64,
	pub end: f64,
	pub text: String,
	#[serde(default)]
	pub confidence: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub words: Option<Vec<Word>>,
}

/// Contents of `<stem>.result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
	pub filename: String,
	pub language: Option<String>,
	pub text: String,
	pub segments: Vec<Segment>,
	pub duration: f64,
	pub word_count: usize,
	pub confidence_avg: Option<f32>,
	pub model_used: String,
	pub settings: TranscriptionSettings,
	pub processing_time: f64,
	pub completed_at: DateTime<Utc>,
	pub task_id: Uuid,
	pub attempt: u32,
}

impl ResultRecord {
	#[must_use]
	pub fn from_output(item: &WorkItem, output: EngineOutput, processing_time: f64) -> Self {
		let word_count = output.text.split_whitespace().count();
		let confidences: Vec<f32> = output.segments.iter().filter_map(|s| s.confidence).collect();
		#[allow(clippy::cast_precision_loss)]
		let confidence_avg = (!confidences.is_empty()).then(|| confidences.iter().sum::<f32>() / confidences.len() as f32);
		let duration = if output.duration > 0.0 {
			output.duration
		} else {
			output.segments.iter().map(|s| s.end).fold(0.0, f64::max)
		};

		Self {
			filename: item.filename.clone(),
			language: output.language.or_else(|| item.settings.language.clone()),
			text: output.text,
			segments: output.segments,
			duration,
			word_count,
			confidence_avg,
			model_used: output.model,
			settings: item.settings.clone(),
			processing_time,
			completed_at: Utc::now(),
			task_id: item.task_id,
			attempt: item.attempt,
		}
	}
}
