use garde::Validate;
use serde::{Deserialize, Serialize};
use transcription_queue::task::validate_filename;
use transcription_queue::{ComputeType, DeletionReport, Device, Priority, SubmitRequest, TranscriptionSettings, WhisperModel};

use crate::config::WhisperXConfig;

fn plain_filename(value: &str, _: &()) -> garde::Result {
	validate_filename(value).map_err(|e| garde::Error::new(e.to_string()))
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TranscribeRequest {
	#[garde(length(min = 1, max = 255), custom(plain_filename))]
	pub filename: String,

	#[garde(length(min = 2, max = 16))]
	#[serde(default)]
	pub language: Option<String>,

	#[garde(skip)]
	#[serde(default)]
	pub model: Option<WhisperModel>,

	#[garde(skip)]
	#[serde(default)]
	pub compute_type: Option<ComputeType>,

	#[garde(skip)]
	#[serde(default)]
	pub device: Option<Device>,

	#[garde(range(min = 0.0, max = 1.0))]
	#[serde(default)]
	pub temperature: f32,

	#[garde(range(min = 1))]
	#[serde(default = "default_beam")]
	pub beam_size: u32,

	#[garde(range(min = 1))]
	#[serde(default = "default_beam")]
	pub best_of: u32,

	#[garde(range(min = 0.0))]
	#[serde(default = "default_patience")]
	pub patience: f32,

	#[garde(skip)]
	#[serde(default = "default_true")]
	pub word_timestamps: bool,

	#[garde(skip)]
	#[serde(default)]
	pub debug: bool,

	#[garde(length(max = 100))]
	#[serde(default)]
	pub client_id: Option<String>,
}

const fn default_beam() -> u32 {
	5
}

const fn default_patience() -> f32 {
	1.0
}

const fn default_true() -> bool {
	true
}

impl TranscribeRequest {
	/// Builds the scheduler request, filling unset model options from the server defaults.
	#[must_use]
	pub fn into_submit(self, defaults: &WhisperXConfig) -> SubmitRequest {
		let settings = TranscriptionSettings {
			model: self.model.unwrap_or(defaults.default_model),
			language: self.language,
			compute_type: self.compute_type.unwrap_or(defaults.default_compute_type),
			device: self.device.unwrap_or_default(),
			temperature: self.temperature,
			beam_size: self.beam_size,
			best_of: self.best_of,
			patience: self.patience,
			word_timestamps: self.word_timestamps,
			debug: self.debug,
		};

		SubmitRequest {
			filename: self.filename,
			settings,
			priority: Priority::Api,
			client_id: self.client_id,
		}
	}
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeleteRequest {
	#[garde(length(min = 1, max = 255), custom(plain_filename))]
	pub filename: String,

	#[garde(skip)]
	#[serde(default)]
	pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
	pub status: &'static str,
	pub filename: String,
	pub message: String,
	pub files_deleted: Vec<String>,
	pub was_processing: bool,
	pub was_queued: bool,
}

impl From<DeletionReport> for DeleteResponse {
	fn from(report: DeletionReport) -> Self {
		let nothing_found = report.deleted_files.is_empty() && !report.was_processing && !report.was_queued;
		let (status, message) = if nothing_found {
			("not_found", format!("Nothing to delete for '{}'", report.filename))
		} else {
			("deleted", format!("Deleted '{}' and its transcription state", report.filename))
		};

		Self {
			status,
			filename: report.filename,
			message,
			files_deleted: report.deleted_files,
			was_processing: report.was_processing,
			was_queued: report.was_queued,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
	#[serde(default)]
	pub debug: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
	pub models: Vec<String>,
	pub default_model: WhisperModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
	pub status: &'static str,
	pub service: &'static str,
	pub version: &'static str,
	pub uptime: f64,
	pub engine: String,
	pub engine_available: bool,
	pub models_loaded: Vec<String>,
	pub pending: usize,
	pub active: usize,
}
