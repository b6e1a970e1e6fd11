use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;
use transcription_queue::TaskCoordinator;

use crate::whisperx::WhisperXEngine;

/// Shared handles for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
	pub coordinator: Arc<TaskCoordinator>,
	pub engine: Arc<WhisperXEngine>,
	pub registry: Registry,
	pub started_at: Instant,
}

impl AppState {
	#[must_use]
	pub fn new(coordinator: Arc<TaskCoordinator>, engine: Arc<WhisperXEngine>, registry: Registry) -> Self {
		Self {
			coordinator,
			engine,
			registry,
			started_at: Instant::now(),
		}
	}
}
