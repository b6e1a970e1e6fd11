use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::records::Segment;
use crate::task::TranscriptionSettings;

/// What a successful engine invocation hands back.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
	pub text: String,
	pub segments: Vec<Segment>,
	pub language: Option<String>,
	/// Audio duration in seconds, `0.0` when the engine does not report it.
	pub duration: f64,
	pub model: String,
}

/// Speech-recognition backend driven by the workers.
///
/// Implementations should return promptly once `cancel` fires. The coordinator also enforces
/// the hard timeout by dropping the returned future, so any child process must die on drop.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
	async fn transcribe(&self, source: &Path, settings: &TranscriptionSettings, cancel: CancellationToken) -> Result<EngineOutput, EngineError>;

	/// Whether an in-flight invocation can be interrupted without side effects.
	fn supports_cancellation(&self) -> bool {
		true
	}

	fn name(&self) -> &str;
}
