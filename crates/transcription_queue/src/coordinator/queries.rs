use chrono::{Duration as ChronoDuration, Utc};

use super::reports::{ActiveEntry, DebugInfo, PendingEntry, QueueSnapshot, QueueStats, StatusReport};
use super::TaskCoordinator;
use crate::error::QueueError;
use crate::records::{ResultRecord, Stage};
use crate::status_store::{InProgressState, MarkerKind};
use crate::task::{validate_filename, TaskStatus};

impl TaskCoordinator {
	/// Current status of a file. Reads markers only, never blocks on the file lock.
	pub fn status(&self, filename: &str, debug: bool) -> Result<StatusReport, QueueError> {
		validate_filename(filename)?;

		let mut report = if let Some(result) = self.store.read_result(filename) {
			StatusReport::completed(&result)
		} else {
			match self.store.read_in_progress(filename) {
				InProgressState::Present(record) => StatusReport::from_record(&record),
				InProgressState::Corrupt => StatusReport::new(TaskStatus::Processing, filename, "Transcription in progress"),
				InProgressState::Absent if self.store.source_exists(filename) => self.pending_report(filename),
				InProgressState::Absent => StatusReport::new(TaskStatus::NotFound, filename, "File not found"),
			}
		};

		if report.status == TaskStatus::Processing {
			if let Some(position) = self.queue.position(filename) {
				report.queue_position = Some(position);
			}
			if let Some(started_at) = report.started_at {
				let elapsed = Utc::now() - started_at;
				#[allow(clippy::cast_precision_loss)]
				let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
				report.processing_time = Some(seconds.max(0.0));
				report.estimated_completion = Some(started_at + seconds_to_duration(self.metrics.processing_estimate()));
			}
		}

		if debug {
			report.debug_info = Some(self.debug_info(filename));
		}
		Ok(report)
	}

	fn pending_report(&self, filename: &str) -> StatusReport {
		let Some(item) = self.queue.find(filename) else {
			return StatusReport::new(TaskStatus::Pending, filename, "Waiting to be discovered");
		};
		let position = self.queue.position(filename).unwrap_or(1);
		let mut report = StatusReport::new(TaskStatus::Pending, filename, "Queued for transcription");
		report.task_id = Some(item.task_id);
		report.priority = Some(item.priority);
		report.attempt = Some(item.attempt);
		report.stage = Some(Stage::Queued);
		report.queue_position = Some(position);
		let wait = self.estimated_wait(position) + self.metrics.processing_estimate();
		report.estimated_completion = Some(Utc::now() + seconds_to_duration(wait));
		report
	}

	pub fn result(&self, filename: &str) -> Result<Option<ResultRecord>, QueueError> {
		validate_filename(filename)?;
		Ok(self.store.read_result(filename))
	}

	pub(crate) fn debug_info(&self, filename: &str) -> DebugInfo {
		let in_progress_marker = self
			.store
			.read_raw(filename, MarkerKind::InProgress)
			.map(|raw| match serde_json::from_str(&raw) {
				Ok(value) => value,
				Err(_) => serde_json::Value::String(raw),
			});
		let entry = self.in_flight.get(filename);

		DebugInfo {
			file_exists: self.store.source_exists(filename),
			file_metadata: self.store.file_metadata(filename),
			in_progress_marker,
			has_result: self.store.marker_path(filename, MarkerKind::Result).is_file(),
			queued: self.queue.contains(filename),
			active: entry.as_ref().is_some_and(|entry| !entry.is_deleted()),
			waiters: entry.as_ref().map_or(0, |entry| entry.waiters),
		}
	}

	/// Pending items in dequeue order, active attempts and lifetime counters.
	#[must_use]
	pub fn queue_snapshot(&self) -> QueueSnapshot {
		let pending: Vec<PendingEntry> = self
			.queue
			.snapshot()
			.into_iter()
			.enumerate()
			.map(|(index, item)| PendingEntry {
				position: index + 1,
				task_id: item.task_id,
				filename: item.filename,
				priority: item.priority,
				submitted_at: item.submitted_at,
				attempt: item.attempt,
				client_id: item.client_id,
			})
			.collect();

		let mut active: Vec<ActiveEntry> = self
			.in_flight
			.iter()
			.filter(|entry| !entry.is_deleted())
			.map(|entry| {
				let item = entry.effective_item();
				ActiveEntry {
					task_id: item.task_id,
					filename: item.filename.clone(),
					priority: item.priority,
					attempt: item.attempt,
					stage: if entry.interrupt.is_some() { Stage::Restarting } else { entry.stage },
					started_at: entry.started_at,
					waiters: entry.waiters,
				}
			})
			.collect();
		active.sort_by_key(|entry| entry.started_at);

		let stats = QueueStats {
			pending: pending.len(),
			active: active.len(),
			completed: self.metrics.completed.get(),
			failed: self.metrics.failed.get(),
			retried: self.metrics.retried.get(),
			restarted: self.metrics.restarted.get(),
			average_processing_time: self.metrics.average_processing_time(),
		};

		QueueSnapshot { pending, active, stats }
	}
}

#[allow(clippy::cast_possible_truncation)]
fn seconds_to_duration(seconds: f64) -> ChronoDuration {
	ChronoDuration::milliseconds((seconds * 1000.0) as i64)
}
