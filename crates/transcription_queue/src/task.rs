use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::error::QueueError;

/// Priority classes. Lower rank is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
	Delete = 0,
	Api = 1,
	AutoScan = 2,
}

impl Priority {
	#[must_use]
	pub const fn rank(self) -> u8 {
		self as u8
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Delete => "DELETE",
			Self::Api => "API",
			Self::AutoScan => "AUTO_SCAN",
		}
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Status a client observes for a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
	NotFound,
	Pending,
	Processing,
	Error,
	Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
	Tiny,
	Base,
	#[default]
	Small,
	Medium,
	Large,
}

impl WhisperModel {
	pub const ALL: [Self; 5] = [Self::Tiny, Self::Base, Self::Small, Self::Medium, Self::Large];

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Tiny => "tiny",
			Self::Base => "base",
			Self::Small => "small",
			Self::Medium => "medium",
			Self::Large => "large",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComputeType {
	Float16,
	#[default]
	Float32,
	Int8,
}

impl ComputeType {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Float16 => "float16",
			Self::Float32 => "float32",
			Self::Int8 => "int8",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
	#[default]
	Cpu,
	Cuda,
}

impl Device {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Cpu => "cpu",
			Self::Cuda => "cuda",
		}
	}
}

/// Engine parameters attached to a piece of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
	pub model: WhisperModel,
	pub language: Option<String>,
	pub compute_type: ComputeType,
	pub device: Device,
	pub temperature: f32,
	pub beam_size: u32,
	pub best_of: u32,
	pub patience: f32,
	pub word_timestamps: bool,
	pub debug: bool,
}

impl Default for TranscriptionSettings {
	fn default() -> Self {
		Self {
			model: WhisperModel::default(),
			language: None,
			compute_type: ComputeType::default(),
			device: Device::default(),
			temperature: 0.0,
			beam_size: 5,
			best_of: 5,
			patience: 1.0,
			word_timestamps: true,
			debug: false,
		}
	}
}

impl TranscriptionSettings {
	/// Two settings produce the same transcript when everything but the debug flag matches.
	#[must_use]
	pub fn same_run(&self, other: &Self) -> bool {
		Self { debug: false, ..self.clone() } == Self { debug: false, ..other.clone() }
	}
}

/// A unit of work waiting in, or pulled from, the priority queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
	pub task_id: Uuid,
	pub filename: String,
	pub priority: Priority,
	pub settings: TranscriptionSettings,
	pub submitted_at: DateTime<Utc>,
	pub client_id: Option<String>,
	/// Attempt number this item runs as, counted across retries and restarts.
	pub attempt: u32,
	/// Failures recorded in the current retry cycle.
	pub failures: u32,
	pub(crate) generation: u64,
	pub(crate) seq: u64,
}

impl WorkItem {
	#[must_use]
	pub fn new(filename: impl Into<String>, priority: Priority, settings: TranscriptionSettings) -> Self {
		Self {
			task_id: Uuid::new_v4(),
			filename: filename.into(),
			priority,
			settings,
			submitted_at: Utc::now(),
			client_id: None,
			attempt: 1,
			failures: 0,
			generation: 0,
			seq: 0,
		}
	}

	#[must_use]
	pub fn with_client(mut self, client_id: Option<String>) -> Self {
		self.client_id = client_id;
		self
	}

	#[must_use]
	pub const fn with_attempt(mut self, attempt: u32) -> Self {
		self.attempt = attempt;
		self
	}

	#[must_use]
	pub(crate) const fn in_generation(mut self, generation: u64) -> Self {
		self.generation = generation;
		self
	}

	/// Next attempt of the same work after a failure. Keeps priority and submission time.
	#[must_use]
	pub(crate) fn retry(&self) -> Self {
		Self {
			task_id: Uuid::new_v4(),
			attempt: self.attempt + 1,
			failures: self.failures + 1,
			..self.clone()
		}
	}

	/// Replacement attempt that runs with new settings. Starts a fresh retry cycle.
	#[must_use]
	pub(crate) fn superseded_by(&self, settings: TranscriptionSettings, priority: Priority, client_id: Option<String>) -> Self {
		Self {
			task_id: Uuid::new_v4(),
			priority: self.priority.min(priority),
			settings,
			client_id: client_id.or_else(|| self.client_id.clone()),
			attempt: self.attempt + 1,
			failures: 0,
			..self.clone()
		}
	}

	#[must_use]
	pub(crate) const fn is_terminal_failure(&self, max_retries: u32) -> bool {
		self.failures + 1 >= max_retries
	}
}

/// Accepts plain file names that live directly in the shared directory.
pub fn validate_filename(filename: &str) -> Result<(), QueueError> {
	const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

	let trimmed = filename.trim();
	let plain = Path::new(trimmed).file_name().is_some_and(|name| name == trimmed);
	if trimmed.is_empty() || trimmed != filename || !plain || filename.contains(FORBIDDEN) || filename.starts_with('.') {
		return Err(QueueError::InvalidFilename(filename.to_string()));
	}
	Ok(())
}
