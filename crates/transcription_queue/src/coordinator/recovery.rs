use std::ffi::OsStr;
use std::path::Path;
use tracing::{info, warn};

use super::reports::RecoveryReport;
use super::TaskCoordinator;
use crate::discovery::is_audio_file;
use crate::error::QueueError;
use crate::records::{InProgressRecord, MarkerStatus, Stage};
use crate::status_store::{remove_if_exists, InProgressState, MarkerKind, StatusStore};
use crate::task::{validate_filename, Priority, TranscriptionSettings, WorkItem};

impl TaskCoordinator {
	/// Re-enqueues work a previous process left `processing` and drops markers that no longer
	/// describe anything. Call once before the workers start.
	pub async fn recover(&self) -> Result<RecoveryReport, QueueError> {
		let mut report = RecoveryReport::default();

		for marker in self.store.in_progress_markers()? {
			let outcome = match StatusStore::read_in_progress_at(&marker) {
				InProgressState::Present(record) => self.recover_record(&marker, record, &mut report).await,
				InProgressState::Corrupt => self.recover_corrupt(&marker, &mut report).await,
				InProgressState::Absent => Ok(()),
			};
			if let Err(e) = outcome {
				warn!(marker = %marker.display(), error = %e, "⚠️ Could not recover marker");
			}
		}

		info!(requeued = report.requeued, cleared = report.cleared, kept_errors = report.kept_errors, "🩺 Recovery finished");
		Ok(report)
	}

	async fn recover_record(&self, marker: &Path, record: InProgressRecord, report: &mut RecoveryReport) -> Result<(), QueueError> {
		let filename = record.filename.clone();
		if validate_filename(&filename).is_err() || self.store.marker_path(&filename, MarkerKind::InProgress) != marker {
			warn!(marker = %marker.display(), filename = %filename, "⚠️ Marker does not match its file, removing");
			remove_if_exists(marker)?;
			report.cleared += 1;
			return Ok(());
		}

		let _guard = self.locks.acquire(&filename).await;
		if self.store.read_result(&filename).is_some() {
			self.store.clear_in_progress(&filename)?;
			report.cleared += 1;
			return Ok(());
		}
		if record.status == MarkerStatus::Error {
			report.kept_errors += 1;
			return Ok(());
		}
		if !self.store.source_exists(&filename) {
			self.store.clear_in_progress(&filename)?;
			report.cleared += 1;
			return Ok(());
		}
		if self.is_tracked(&filename) {
			return Ok(());
		}

		let priority = if record.priority == Priority::Delete { Priority::Api } else { record.priority };
		let item = WorkItem::new(&filename, priority, record.settings)
			.with_attempt(record.attempt + 1)
			.in_generation(self.generation(&filename));
		self.store.write_in_progress(&InProgressRecord::for_item(&item, Stage::Queued))?;
		self.enqueue(item.clone())?;
		info!(filename = %filename, task_id = %item.task_id, attempt = item.attempt, priority = %item.priority, "♻️ Re-enqueued interrupted transcription");
		report.requeued += 1;
		Ok(())
	}

	/// The filename of a corrupt marker is recovered from its stem when exactly one audio file matches.
	async fn recover_corrupt(&self, marker: &Path, report: &mut RecoveryReport) -> Result<(), QueueError> {
		let stem = marker.file_stem().and_then(OsStr::to_str).unwrap_or_default();
		let candidates: Vec<String> = self
			.store
			.list_files()?
			.into_iter()
			.filter(|name| is_audio_file(name) && StatusStore::stem(name) == stem && validate_filename(name).is_ok())
			.collect();

		let [filename] = candidates.as_slice() else {
			warn!(marker = %marker.display(), candidates = candidates.len(), "⚠️ Corrupt marker without a unique source, removing");
			remove_if_exists(marker)?;
			report.cleared += 1;
			return Ok(());
		};

		let _guard = self.locks.acquire(filename).await;
		if self.store.read_result(filename).is_some() {
			remove_if_exists(marker)?;
			report.cleared += 1;
			return Ok(());
		}
		if self.is_tracked(filename) {
			return Ok(());
		}
		let item = WorkItem::new(filename, Priority::AutoScan, TranscriptionSettings::default()).in_generation(self.generation(filename));
		self.store.write_in_progress(&InProgressRecord::for_item(&item, Stage::Queued))?;
		self.enqueue(item)?;
		warn!(filename = %filename, "♻️ Re-enqueued file behind a corrupt marker with default settings");
		report.requeued += 1;
		Ok(())
	}
}
