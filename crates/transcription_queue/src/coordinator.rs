mod deletion;
mod queries;
mod recovery;
pub mod reports;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::engine::TranscriptionEngine;
use crate::error::QueueError;
use crate::locks::FileLocks;
use crate::metrics::SchedulerMetrics;
use crate::priority_queue::WorkQueue;
use crate::records::{InProgressRecord, MarkerStatus, Stage};
use crate::status_store::{InProgressState, StatusStore};
use crate::task::{validate_filename, Priority, TaskStatus, WorkItem};

pub use reports::{
	ActiveEntry, DebugInfo, DeletionReport, ErrorDetail, PendingEntry, QueueSnapshot, QueueStats, RecoveryReport, StatusReport, SubmitOutcome, SubmitRequest, SubmitStatus, TaskEvent,
};

const EVENT_CAPACITY: usize = 256;

/// Why a worker's current attempt must not publish its outcome.
#[derive(Debug)]
pub(crate) enum Interrupt {
	/// Run this item next instead.
	Superseded(Box<WorkItem>),
	Deleted,
}

/// An attempt owned by a worker, either transcribing or waiting out its retry delay.
#[derive(Debug)]
pub(crate) struct InFlight {
	pub(crate) item: WorkItem,
	pub(crate) started_at: DateTime<Utc>,
	pub(crate) stage: Stage,
	pub(crate) cancel: CancellationToken,
	pub(crate) interrupt: Option<Interrupt>,
	pub(crate) waiters: usize,
}

impl InFlight {
	pub(crate) fn new(item: WorkItem, stage: Stage, cancel: CancellationToken) -> Self {
		Self {
			item,
			started_at: Utc::now(),
			stage,
			cancel,
			interrupt: None,
			waiters: 0,
		}
	}

	/// The item whose outcome callers will eventually observe.
	fn effective_item(&self) -> &WorkItem {
		match &self.interrupt {
			Some(Interrupt::Superseded(next)) => next,
			_ => &self.item,
		}
	}

	pub(crate) fn is_deleted(&self) -> bool {
		matches!(self.interrupt, Some(Interrupt::Deleted))
	}

	fn is_running(&self) -> bool {
		self.stage == Stage::Transcribing && self.interrupt.is_none()
	}
}

/// Owns the per-filename state machine: accepts submissions, feeds the queue and
/// arbitrates between workers, deletions and resubmissions.
pub struct TaskCoordinator {
	pub(crate) config: SchedulerConfig,
	pub(crate) store: StatusStore,
	pub(crate) queue: WorkQueue,
	pub(crate) engine: Arc<dyn TranscriptionEngine>,
	pub(crate) locks: FileLocks,
	pub(crate) in_flight: DashMap<String, InFlight>,
	generations: DashMap<String, u64>,
	events: broadcast::Sender<TaskEvent>,
	pub(crate) metrics: SchedulerMetrics,
}

impl TaskCoordinator {
	pub fn new(config: SchedulerConfig, engine: Arc<dyn TranscriptionEngine>, registry: &Registry) -> Result<Self, QueueError> {
		let store = StatusStore::open(&config.shared_directory)?;
		let metrics = SchedulerMetrics::register(registry)?;
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		info!(
			shared_directory = %config.shared_directory.display(),
			engine = engine.name(),
			max_retries = config.max_retries,
			"🎯 Task coordinator ready"
		);

		Ok(Self {
			config,
			store,
			queue: WorkQueue::new(),
			engine,
			locks: FileLocks::new(),
			in_flight: DashMap::new(),
			generations: DashMap::new(),
			events,
			metrics,
		})
	}

	#[must_use]
	pub const fn config(&self) -> &SchedulerConfig {
		&self.config
	}

	#[must_use]
	pub const fn store(&self) -> &StatusStore {
		&self.store
	}

	#[must_use]
	pub const fn queue(&self) -> &WorkQueue {
		&self.queue
	}

	#[must_use]
	pub const fn metrics(&self) -> &SchedulerMetrics {
		&self.metrics
	}

	#[must_use]
	pub fn engine(&self) -> &dyn TranscriptionEngine {
		self.engine.as_ref()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
		self.events.subscribe()
	}

	/// Queued or owned by a worker.
	#[must_use]
	pub fn is_tracked(&self, filename: &str) -> bool {
		self.queue.contains(filename) || self.in_flight.get(filename).is_some_and(|entry| !entry.is_deleted())
	}

	/// Accepts, merges, restarts or rejects work for a file.
	pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, QueueError> {
		validate_filename(&request.filename)?;
		if request.priority == Priority::Delete {
			return Err(QueueError::DeletionNotQueueable);
		}

		let debug = request.settings.debug;
		let filename = request.filename.clone();
		let outcome = {
			let _guard = self.locks.acquire(&filename).await;
			self.accept(request).await?
		};

		if debug && outcome.status != SubmitStatus::Completed {
			return Ok(SubmitOutcome {
				debug_info: Some(self.debug_info(&filename)),
				..outcome
			});
		}
		Ok(outcome)
	}

	async fn accept(&self, request: SubmitRequest) -> Result<SubmitOutcome, QueueError> {
		let filename = request.filename.clone();

		if let Some(result) = self.store.read_result(&filename) {
			debug!(filename = %filename, "✅ Already transcribed, returning cached result");
			return Ok(SubmitOutcome::completed(result));
		}

		let previous_attempt = match self.store.read_in_progress(&filename) {
			InProgressState::Absent => None,
			InProgressState::Present(record) if record.status == MarkerStatus::Error => Some(record.attempt),
			state => return self.accept_while_processing(request, &state),
		};

		if !self.wait_for_source(&filename).await {
			info!(filename = %filename, "❓ Source file not found");
			return Ok(SubmitOutcome::new(SubmitStatus::FileNotFound, &filename, "File not found in shared directory"));
		}

		if let Some(queued) = self.queue.find(&filename) {
			return self.merge_queued(queued, request, SubmitStatus::Pending);
		}

		let item = WorkItem::new(&filename, request.priority, request.settings)
			.with_client(request.client_id)
			.with_attempt(previous_attempt.map_or(1, |attempt| attempt + 1))
			.in_generation(self.generation(&filename));
		if previous_attempt.is_some() {
			self.store.clear_in_progress(&filename)?;
		}

		let position = self.enqueue(item.clone())?;
		info!(filename = %filename, task_id = %item.task_id, priority = %item.priority, attempt = item.attempt, position, "📥 Queued for transcription");
		self.emit(&filename, Some(item.task_id), TaskStatus::Pending, Some(item.attempt));

		Ok(SubmitOutcome::new(SubmitStatus::Pending, &filename, "Queued for transcription")
			.with_task(item.task_id, item.attempt)
			.with_position(position, self.estimated_wait(position)))
	}

	/// A processing marker exists: attach, restart with new settings, or reject.
	fn accept_while_processing(&self, request: SubmitRequest, state: &InProgressState) -> Result<SubmitOutcome, QueueError> {
		let filename = request.filename.clone();

		if let Some(mut entry) = self.in_flight.get_mut(&filename).filter(|entry| !entry.is_deleted()) {
			let current = entry.effective_item().clone();

			if current.settings.same_run(&request.settings) {
				entry.waiters += 1;
				debug!(filename = %filename, task_id = %current.task_id, waiters = entry.waiters, "🔗 Attached to in-flight transcription");
				return Ok(SubmitOutcome::new(SubmitStatus::Processing, &filename, "Transcription already in progress")
					.with_task(current.task_id, current.attempt)
					.with_waiters(entry.waiters));
			}

			if entry.is_running() && !self.engine.supports_cancellation() {
				self.metrics.conflicts.inc();
				warn!(filename = %filename, task_id = %current.task_id, "⚔️ Settings conflict with an uninterruptible transcription");
				return Ok(SubmitOutcome::new(
					SubmitStatus::Conflict,
					&filename,
					"File is being transcribed with different settings and the engine cannot be interrupted",
				)
				.with_task(current.task_id, current.attempt));
			}

			let next = current.superseded_by(request.settings, request.priority, request.client_id);
			self.store.write_in_progress(&InProgressRecord::for_item(&next, Stage::Restarting))?;
			entry.interrupt = Some(Interrupt::Superseded(Box::new(next.clone())));
			entry.cancel.cancel();
			drop(entry);

			self.metrics.restarted.inc();
			info!(filename = %filename, task_id = %next.task_id, attempt = next.attempt, "🔁 Restarting transcription with new settings");
			self.emit(&filename, Some(next.task_id), TaskStatus::Processing, Some(next.attempt));
			return Ok(SubmitOutcome::new(SubmitStatus::Processing, &filename, "Transcription restarted with new settings").with_task(next.task_id, next.attempt));
		}

		if let Some(queued) = self.queue.find(&filename) {
			return self.merge_queued(queued, request, SubmitStatus::Processing);
		}

		// Marker left behind by a previous process or an interrupted shutdown.
		if !self.store.source_exists(&filename) {
			self.store.clear_in_progress(&filename)?;
			return Ok(SubmitOutcome::new(SubmitStatus::FileNotFound, &filename, "File not found in shared directory"));
		}
		let attempt = match state {
			InProgressState::Present(record) => record.attempt + 1,
			_ => 1,
		};
		let item = WorkItem::new(&filename, request.priority, request.settings)
			.with_client(request.client_id)
			.with_attempt(attempt)
			.in_generation(self.generation(&filename));
		self.store.write_in_progress(&InProgressRecord::for_item(&item, Stage::Queued))?;
		let position = self.enqueue(item.clone())?;
		warn!(filename = %filename, task_id = %item.task_id, attempt, "♻️ Resuming orphaned transcription");
		self.emit(&filename, Some(item.task_id), TaskStatus::Processing, Some(item.attempt));

		Ok(SubmitOutcome::new(SubmitStatus::Processing, &filename, "Resumed interrupted transcription")
			.with_task(item.task_id, item.attempt)
			.with_position(position, self.estimated_wait(position)))
	}

	/// An item for the file is already queued: promote it, or replace it when settings differ.
	fn merge_queued(&self, queued: WorkItem, request: SubmitRequest, status: SubmitStatus) -> Result<SubmitOutcome, QueueError> {
		let filename = queued.filename.clone();

		if queued.settings.same_run(&request.settings) {
			let item = if request.priority < queued.priority {
				let mut promoted = self.queue.take(&filename).unwrap_or(queued);
				debug!(filename = %filename, from = %promoted.priority, to = %request.priority, "⏫ Promoting queued item");
				promoted.priority = request.priority;
				self.enqueue(promoted.clone())?;
				promoted
			} else {
				queued
			};
			let position = self.queue.position(&filename).unwrap_or(1);
			return Ok(SubmitOutcome::new(status, &filename, "Already queued for transcription")
				.with_task(item.task_id, item.attempt)
				.with_position(position, self.estimated_wait(position)));
		}

		self.queue.remove_all_for_filename(&filename);
		let replacement = queued.superseded_by(request.settings, request.priority, request.client_id);
		// A processing marker counts the replacement as a restart, a plain queue entry does not.
		let replacement = if status == SubmitStatus::Processing {
			self.store.write_in_progress(&InProgressRecord::for_item(&replacement, Stage::Queued))?;
			replacement
		} else {
			replacement.with_attempt(queued.attempt)
		};
		let position = self.enqueue(replacement.clone())?;
		info!(filename = %filename, task_id = %replacement.task_id, "🔀 Replaced queued item with new settings");
		self.emit(&filename, Some(replacement.task_id), status_of(status), Some(replacement.attempt));

		Ok(SubmitOutcome::new(status, &filename, "Queued item replaced with new settings")
			.with_task(replacement.task_id, replacement.attempt)
			.with_position(position, self.estimated_wait(position)))
	}

	/// Bounded wait for a file that may still be landing in the shared directory.
	async fn wait_for_source(&self, filename: &str) -> bool {
		let attempts = self.config.file_check_attempts.max(1);
		for check in 1..=attempts {
			if self.store.source_exists(filename) {
				return true;
			}
			if check < attempts {
				debug!(filename, check, "⏳ Source not visible yet");
				tokio::time::sleep(self.config.file_check_delay).await;
			}
		}
		false
	}

	pub(crate) fn enqueue(&self, item: WorkItem) -> Result<usize, QueueError> {
		let priority = item.priority;
		let position = self.queue.enqueue(item)?;
		self.metrics.submitted.with_label_values(&[priority.as_str()]).inc();
		self.refresh_queue_depth();
		Ok(position)
	}

	pub(crate) fn refresh_queue_depth(&self) {
		self.metrics.queue_depth.set(i64::try_from(self.queue.len()).unwrap_or(i64::MAX));
	}

	/// Seconds until an item at `position` is expected to start.
	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub fn estimated_wait(&self, position: usize) -> f64 {
		position.saturating_sub(1) as f64 * self.metrics.processing_estimate()
	}

	pub(crate) fn generation(&self, filename: &str) -> u64 {
		self.generations.get(filename).map_or(0, |generation| *generation)
	}

	pub(crate) fn bump_generation(&self, filename: &str) -> u64 {
		let mut generation = self.generations.entry(filename.to_string()).or_insert(0);
		*generation += 1;
		*generation
	}

	pub(crate) fn emit(&self, filename: &str, task_id: Option<Uuid>, status: TaskStatus, attempt: Option<u32>) {
		let _ = self.events.send(TaskEvent {
			filename: filename.to_string(),
			task_id,
			status,
			attempt,
		});
	}
}

const fn status_of(status: SubmitStatus) -> TaskStatus {
	match status {
		SubmitStatus::Pending => TaskStatus::Pending,
		SubmitStatus::Completed => TaskStatus::Completed,
		SubmitStatus::FileNotFound => TaskStatus::NotFound,
		SubmitStatus::Processing | SubmitStatus::Conflict => TaskStatus::Processing,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::EngineOutput;
	use crate::error::EngineError;
	use crate::pool::WorkerPool;
	use crate::task::{TranscriptionSettings, WhisperModel};
	use async_trait::async_trait;
	use std::path::Path;
	use std::sync::Mutex;
	use std::time::{Duration, Instant};
	use tempfile::TempDir;

	/// Records each invocation and holds it until cancelled.
	#[derive(Default)]
	struct HoldingEngine {
		calls: Mutex<Vec<WhisperModel>>,
	}

	impl HoldingEngine {
		fn calls(&self) -> Vec<WhisperModel> {
			self.calls.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl TranscriptionEngine for HoldingEngine {
		async fn transcribe(&self, _source: &Path, settings: &TranscriptionSettings, cancel: CancellationToken) -> Result<EngineOutput, EngineError> {
			self.calls.lock().unwrap().push(settings.model);
			cancel.cancelled().await;
			Err(EngineError::Cancelled)
		}

		fn name(&self) -> &str {
			"holding"
		}
	}

	fn coordinator(dir: &TempDir, engine: Arc<HoldingEngine>) -> Arc<TaskCoordinator> {
		let config = SchedulerConfig {
			worker_count: 2,
			file_check_attempts: 1,
			..SchedulerConfig::new(dir.path())
		};
		let coordinator = TaskCoordinator::new(config, engine, &Registry::new()).unwrap();
		std::fs::write(dir.path().join("a.wav"), b"RIFF....WAVEfmt ").unwrap();
		Arc::new(coordinator)
	}

	fn with_model(model: WhisperModel) -> TranscriptionSettings {
		TranscriptionSettings {
			model,
			..TranscriptionSettings::default()
		}
	}

	async fn wait_until(mut reached: impl FnMut() -> bool) {
		let deadline = Instant::now() + Duration::from_secs(5);
		while !reached() {
			assert!(Instant::now() < deadline, "condition not reached in time");
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn resubmission_between_dequeue_and_start_runs_once() {
		let dir = TempDir::new().unwrap();
		let engine = Arc::new(HoldingEngine::default());
		let coordinator = coordinator(&dir, engine.clone());
		let shutdown = CancellationToken::new();

		let first = coordinator.submit(SubmitRequest::api("a.wav", with_model(WhisperModel::Small))).await.unwrap();
		let guard = coordinator.locks.acquire("a.wav").await;
		let pool = WorkerPool::start(&coordinator, &shutdown);
		wait_until(|| coordinator.queue.is_empty()).await;

		// The worker holds the item but has not taken the file lock yet.
		let second = coordinator.accept(SubmitRequest::api("a.wav", with_model(WhisperModel::Small))).await.unwrap();
		assert_eq!(second.status, SubmitStatus::Pending);
		assert_eq!(second.task_id, first.task_id);
		drop(guard);

		wait_until(|| engine.calls().len() == 1).await;
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(engine.calls().len(), 1);
		assert_eq!(coordinator.in_flight.len(), 1);
		assert!(!coordinator.queue.contains("a.wav"));
		assert_eq!(coordinator.metrics.active.get(), 1);

		shutdown.cancel();
		pool.join().await;
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn replacement_between_dequeue_and_start_runs_only_new_settings() {
		let dir = TempDir::new().unwrap();
		let engine = Arc::new(HoldingEngine::default());
		let coordinator = coordinator(&dir, engine.clone());
		let shutdown = CancellationToken::new();

		let first = coordinator.submit(SubmitRequest::api("a.wav", with_model(WhisperModel::Small))).await.unwrap();
		let guard = coordinator.locks.acquire("a.wav").await;
		let pool = WorkerPool::start(&coordinator, &shutdown);
		wait_until(|| coordinator.queue.is_empty()).await;

		let second = coordinator.accept(SubmitRequest::api("a.wav", with_model(WhisperModel::Medium))).await.unwrap();
		assert_eq!(second.status, SubmitStatus::Pending);
		assert_ne!(second.task_id, first.task_id);
		drop(guard);

		wait_until(|| engine.calls().len() == 1).await;
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(engine.calls(), vec![WhisperModel::Medium]);
		assert_eq!(coordinator.in_flight.get("a.wav").unwrap().item.task_id, second.task_id.unwrap());

		shutdown.cancel();
		pool.join().await;
	}

	#[tokio::test]
	async fn deletion_between_dequeue_and_start_drops_the_item() {
		let dir = TempDir::new().unwrap();
		let engine = Arc::new(HoldingEngine::default());
		let coordinator = coordinator(&dir, engine.clone());

		coordinator.submit(SubmitRequest::api("a.wav", with_model(WhisperModel::Small))).await.unwrap();
		let claimed = coordinator.queue.claim().unwrap();

		let report = coordinator.delete("a.wav", false).await.unwrap();
		assert!(report.was_queued);
		assert!(!coordinator.queue.settle(&claimed));
		assert!(!coordinator.is_tracked("a.wav"));
		assert!(engine.calls().is_empty());
	}
}
