#![allow(dead_code)]

use async_trait::async_trait;
use prometheus::Registry;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use transcription_queue::{
	EngineError, EngineOutput, SchedulerConfig, Segment, StatusReport, TaskCoordinator, TaskStatus, TranscriptionEngine, TranscriptionSettings, WorkerPool,
};

/// What the mock engine does on its next invocation.
#[derive(Debug, Clone)]
pub enum Step {
	Succeed,
	Fail(&'static str),
	/// Sleeps, then succeeds. Used to trip the hard timeout.
	Sleep(Duration),
	/// Waits for [`MockEngine::release`] or cancellation.
	Block,
}

#[derive(Debug, Clone)]
pub struct Call {
	pub filename: String,
	pub settings: TranscriptionSettings,
}

pub struct MockEngine {
	steps: Mutex<VecDeque<Step>>,
	fallback: Step,
	cancellable: bool,
	calls: Mutex<Vec<Call>>,
	gate: Semaphore,
}

impl MockEngine {
	pub fn new() -> Self {
		Self::with_steps([])
	}

	pub fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
		Self {
			steps: Mutex::new(steps.into_iter().collect()),
			fallback: Step::Succeed,
			cancellable: true,
			calls: Mutex::new(Vec::new()),
			gate: Semaphore::new(0),
		}
	}

	pub fn always(step: Step) -> Self {
		Self {
			fallback: step,
			..Self::new()
		}
	}

	pub fn uncancellable(mut self) -> Self {
		self.cancellable = false;
		self
	}

	/// Lets one blocked invocation finish.
	pub fn release(&self) {
		self.gate.add_permits(1);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	fn output(filename: &str, settings: &TranscriptionSettings) -> EngineOutput {
		let text = format!("{filename} transcribed with {}", settings.model.as_str());
		EngineOutput {
			segments: vec![Segment {
				start: 0.0,
				end: 2.5,
				text: text.clone(),
				confidence: Some(0.9),
				words: None,
			}],
			text,
			language: Some("en".to_string()),
			duration: 2.5,
			model: settings.model.as_str().to_string(),
		}
	}
}

#[async_trait]
impl TranscriptionEngine for MockEngine {
	async fn transcribe(&self, source: &Path, settings: &TranscriptionSettings, cancel: CancellationToken) -> Result<EngineOutput, EngineError> {
		let filename = source.file_name().unwrap().to_string_lossy().into_owned();
		self.calls.lock().unwrap().push(Call {
			filename: filename.clone(),
			settings: settings.clone(),
		});
		let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());

		match step {
			Step::Succeed => Ok(Self::output(&filename, settings)),
			Step::Fail(message) => Err(EngineError::Failed(message.to_string())),
			Step::Sleep(duration) => {
				tokio::time::sleep(duration).await;
				Ok(Self::output(&filename, settings))
			}
			Step::Block if self.cancellable => {
				tokio::select! {
					() = cancel.cancelled() => Err(EngineError::Cancelled),
					permit = self.gate.acquire() => {
						permit.unwrap().forget();
						Ok(Self::output(&filename, settings))
					}
				}
			}
			Step::Block => {
				self.gate.acquire().await.unwrap().forget();
				Ok(Self::output(&filename, settings))
			}
		}
	}

	fn supports_cancellation(&self) -> bool {
		self.cancellable
	}

	fn name(&self) -> &str {
		"mock"
	}
}

pub struct Harness {
	pub dir: TempDir,
	pub engine: Arc<MockEngine>,
	pub coordinator: Arc<TaskCoordinator>,
	pub shutdown: CancellationToken,
}

impl Harness {
	pub fn new(engine: MockEngine) -> Self {
		Self::with_config(engine, |_| {})
	}

	pub fn with_config(engine: MockEngine, configure: impl FnOnce(&mut SchedulerConfig)) -> Self {
		let dir = TempDir::new().unwrap();
		let mut config = test_config(dir.path());
		configure(&mut config);
		let engine = Arc::new(engine);
		let coordinator = Arc::new(TaskCoordinator::new(config, engine.clone(), &Registry::new()).unwrap());
		Self {
			dir,
			engine,
			coordinator,
			shutdown: CancellationToken::new(),
		}
	}

	/// Second coordinator over the same shared directory, as after a restart.
	pub fn restart(&self, engine: MockEngine) -> (Arc<MockEngine>, Arc<TaskCoordinator>) {
		let engine = Arc::new(engine);
		let coordinator = TaskCoordinator::new(self.coordinator.config().clone(), engine.clone(), &Registry::new()).unwrap();
		(engine, Arc::new(coordinator))
	}

	pub fn add_file(&self, filename: &str) {
		std::fs::write(self.dir.path().join(filename), b"RIFF....WAVEfmt ").unwrap();
	}

	pub fn exists(&self, filename: &str) -> bool {
		self.dir.path().join(filename).exists()
	}

	pub fn start_workers(&self) -> WorkerPool {
		WorkerPool::start(&self.coordinator, &self.shutdown)
	}

	pub async fn wait_for_status(&self, filename: &str, status: TaskStatus) -> StatusReport {
		wait_for_status(&self.coordinator, filename, status).await
	}

	pub async fn wait_for_calls(&self, count: usize) {
		let deadline = Instant::now() + Duration::from_secs(5);
		while self.engine.calls().len() < count {
			assert!(Instant::now() < deadline, "engine saw {} calls, expected {count}", self.engine.calls().len());
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}
}

pub fn test_config(dir: &Path) -> SchedulerConfig {
	SchedulerConfig {
		max_retries: 3,
		task_timeout: Duration::from_secs(5),
		retry_delay: Duration::ZERO,
		file_check_attempts: 2,
		file_check_delay: Duration::from_millis(10),
		..SchedulerConfig::new(dir)
	}
}

pub async fn wait_for_status(coordinator: &TaskCoordinator, filename: &str, status: TaskStatus) -> StatusReport {
	let deadline = Instant::now() + Duration::from_secs(5);
	loop {
		let report = coordinator.status(filename, false).unwrap();
		if report.status == status {
			return report;
		}
		assert!(Instant::now() < deadline, "{filename} never became {status:?}, last saw {report:?}");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

pub fn settings(model: transcription_queue::WhisperModel) -> TranscriptionSettings {
	TranscriptionSettings {
		model,
		..TranscriptionSettings::default()
	}
}
