use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{InFlight, Interrupt, TaskCoordinator};
use crate::engine::EngineOutput;
use crate::error::{EngineError, QueueError};
use crate::records::{InProgressRecord, ResultRecord, Stage};
use crate::task::{TaskStatus, WorkItem};

/// What a worker does after settling an attempt.
enum Next {
	Done,
	Run(WorkItem),
	Retry { item: WorkItem, cancel: CancellationToken },
}

/// Pulls items from the queue and drives them through the engine.
pub struct Worker {
	id: usize,
	coordinator: Arc<TaskCoordinator>,
}

impl Worker {
	#[must_use]
	pub const fn new(id: usize, coordinator: Arc<TaskCoordinator>) -> Self {
		Self { id, coordinator }
	}

	pub async fn run(self, shutdown: CancellationToken) {
		info!(worker_id = self.id, "👷 Worker started");
		loop {
			let item = tokio::select! {
				() = shutdown.cancelled() => break,
				item = self.coordinator.queue.next_claimed() => item,
			};
			self.coordinator.refresh_queue_depth();

			let mut current = item;
			let mut claimed = true;
			loop {
				let filename = current.filename.clone();
				match self.attempt(current, claimed, &shutdown).await {
					Ok(Some(next)) => {
						current = next;
						claimed = false;
					}
					Ok(None) => break,
					Err(e) => {
						error!(worker_id = self.id, filename = %filename, error = %e, "💥 Attempt could not be recorded");
						break;
					}
				}
			}
		}
		info!(worker_id = self.id, "👷 Worker stopped");
	}

	/// Runs one attempt. Returns the item to run immediately when the attempt was superseded.
	///
	/// `claimed` is set for items taken from the queue, which must still hold their claim.
	async fn attempt(&self, item: WorkItem, claimed: bool, shutdown: &CancellationToken) -> Result<Option<WorkItem>, QueueError> {
		let Some(cancel) = self.begin(&item, claimed, shutdown).await? else {
			return Ok(None);
		};

		let c = &self.coordinator;
		let source = c.store.source_path(&item.filename);
		let started = Instant::now();
		let outcome = tokio::select! {
			() = cancel.cancelled() => Err(EngineError::Cancelled),
			() = sleep(c.config.task_timeout) => Err(EngineError::Timeout(c.config.task_timeout)),
			result = c.engine.transcribe(&source, &item.settings, cancel.clone()) => result,
		};
		let elapsed = started.elapsed();

		let next = {
			let _guard = c.locks.acquire(&item.filename).await;
			let Some(entry) = self.release(&item) else {
				return Ok(None);
			};
			match entry.interrupt {
				Some(Interrupt::Superseded(next)) => {
					info!(worker_id = self.id, filename = %item.filename, task_id = %next.task_id, attempt = next.attempt, "🔁 Switching to new settings");
					Next::Run(*next)
				}
				Some(Interrupt::Deleted) => Next::Done,
				None if matches!(outcome, Err(EngineError::Cancelled)) && shutdown.is_cancelled() => {
					info!(worker_id = self.id, filename = %item.filename, "⏸️ Interrupted by shutdown, left for recovery");
					Next::Done
				}
				None => match outcome {
					Ok(output) => self.complete(&item, output, elapsed)?,
					Err(err) => self.fail(&item, entry.started_at, &err, shutdown)?,
				},
			}
		};

		match next {
			Next::Done => Ok(None),
			Next::Run(item) => Ok(Some(item)),
			Next::Retry { item, cancel } => self.backoff(item, cancel, shutdown).await,
		}
	}

	/// Marks the attempt as running. `None` when the item is stale, owned elsewhere or its file is gone.
	async fn begin(&self, item: &WorkItem, claimed: bool, shutdown: &CancellationToken) -> Result<Option<CancellationToken>, QueueError> {
		let c = &self.coordinator;
		let _guard = c.locks.acquire(&item.filename).await;

		if claimed && !c.queue.settle(item) {
			debug!(worker_id = self.id, filename = %item.filename, task_id = %item.task_id, "🔀 Item was replaced or removed after dequeue");
			return Ok(None);
		}
		if let Some(owner) = c.in_flight.get(&item.filename).filter(|entry| !entry.is_deleted() && entry.item.task_id != item.task_id) {
			warn!(worker_id = self.id, filename = %item.filename, task_id = %item.task_id, owner = %owner.item.task_id, "⚠️ File already owned by another attempt, dropping item");
			return Ok(None);
		}
		if c.generation(&item.filename) != item.generation {
			debug!(filename = %item.filename, task_id = %item.task_id, "🗑️ Dropping item for a deleted file");
			return Ok(None);
		}
		if c.store.read_result(&item.filename).is_some() {
			debug!(filename = %item.filename, "✅ Result already present, skipping");
			return Ok(None);
		}
		if !c.store.source_exists(&item.filename) {
			warn!(filename = %item.filename, task_id = %item.task_id, "⚠️ Source vanished before transcription");
			c.store.clear_in_progress(&item.filename)?;
			c.emit(&item.filename, Some(item.task_id), TaskStatus::NotFound, Some(item.attempt));
			return Ok(None);
		}

		let record = InProgressRecord::for_item(item, Stage::Transcribing);
		c.store.write_in_progress(&record)?;

		let cancel = shutdown.child_token();
		let mut entry = InFlight::new(item.clone(), Stage::Transcribing, cancel.clone());
		entry.started_at = record.started_at;
		if c.in_flight.insert(item.filename.clone(), entry).is_none() {
			c.metrics.active.inc();
		}

		info!(
			worker_id = self.id,
			filename = %item.filename,
			task_id = %item.task_id,
			attempt = item.attempt,
			priority = %item.priority,
			model = item.settings.model.as_str(),
			"🎙️ Starting transcription"
		);
		c.emit(&item.filename, Some(item.task_id), TaskStatus::Processing, Some(item.attempt));
		Ok(Some(cancel))
	}

	/// Takes back ownership of the filename. `None` when the file was deleted meanwhile.
	fn release(&self, item: &WorkItem) -> Option<InFlight> {
		let c = &self.coordinator;
		let entry = c.in_flight.remove_if(&item.filename, |_, entry| entry.item.task_id == item.task_id).map(|(_, entry)| entry);
		if entry.is_some() {
			c.metrics.active.dec();
		}
		if c.generation(&item.filename) != item.generation {
			debug!(worker_id = self.id, filename = %item.filename, task_id = %item.task_id, "🗑️ File deleted during attempt, discarding outcome");
			return None;
		}
		entry
	}

	fn complete(&self, item: &WorkItem, output: EngineOutput, elapsed: Duration) -> Result<Next, QueueError> {
		let c = &self.coordinator;
		let record = ResultRecord::from_output(item, output, elapsed.as_secs_f64());
		c.store.write_result(&record)?;

		c.metrics.completed.inc();
		c.metrics.processing_seconds.observe(elapsed.as_secs_f64());
		info!(
			worker_id = self.id,
			filename = %item.filename,
			task_id = %item.task_id,
			attempt = item.attempt,
			words = record.word_count,
			seconds = elapsed.as_secs_f64(),
			"✅ Transcription completed"
		);
		c.emit(&item.filename, Some(item.task_id), TaskStatus::Completed, Some(item.attempt));
		Ok(Next::Done)
	}

	fn fail(&self, item: &WorkItem, started_at: DateTime<Utc>, err: &EngineError, shutdown: &CancellationToken) -> Result<Next, QueueError> {
		let c = &self.coordinator;
		let mut record = InProgressRecord::for_item(item, Stage::RetryScheduled).with_failure(err.code(), err.to_string());
		record.started_at = started_at;

		if item.is_terminal_failure(c.config.max_retries) {
			c.store.write_in_progress(&record.into_terminal())?;
			c.metrics.failed.inc();
			error!(worker_id = self.id, filename = %item.filename, task_id = %item.task_id, attempt = item.attempt, error = %err, "❌ Transcription failed, retries exhausted");
			c.emit(&item.filename, Some(item.task_id), TaskStatus::Error, Some(item.attempt));
			return Ok(Next::Done);
		}

		c.store.write_in_progress(&record)?;
		c.metrics.retried.inc();
		let retry = item.retry();
		warn!(
			worker_id = self.id,
			filename = %item.filename,
			attempt = item.attempt,
			next_attempt = retry.attempt,
			delay_ms = u64::try_from(c.config.retry_delay.as_millis()).unwrap_or(u64::MAX),
			error = %err,
			"🔄 Attempt failed, scheduling retry"
		);

		let cancel = shutdown.child_token();
		c.in_flight.insert(item.filename.clone(), InFlight::new(retry.clone(), Stage::RetryScheduled, cancel.clone()));
		c.metrics.active.inc();
		Ok(Next::Retry { item: retry, cancel })
	}

	/// Waits out the retry delay, then re-enqueues at the same priority unless the file
	/// was deleted or resubmitted with other settings in the meantime.
	async fn backoff(&self, item: WorkItem, cancel: CancellationToken, shutdown: &CancellationToken) -> Result<Option<WorkItem>, QueueError> {
		let c = &self.coordinator;
		if !c.config.retry_delay.is_zero() {
			tokio::select! {
				() = cancel.cancelled() => {}
				() = sleep(c.config.retry_delay) => {}
			}
		}

		let _guard = c.locks.acquire(&item.filename).await;
		let Some(entry) = self.release(&item) else {
			return Ok(None);
		};
		match entry.interrupt {
			Some(Interrupt::Superseded(next)) => Ok(Some(*next)),
			Some(Interrupt::Deleted) => Ok(None),
			None if shutdown.is_cancelled() => Ok(None),
			None => {
				c.enqueue(item)?;
				Ok(None)
			}
		}
	}
}
