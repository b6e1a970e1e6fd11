use tracing::{info, warn};

use super::reports::DeletionReport;
use super::{Interrupt, TaskCoordinator};
use crate::error::QueueError;
use crate::records::MarkerStatus;
use crate::status_store::InProgressState;
use crate::task::{validate_filename, TaskStatus};

impl TaskCoordinator {
	/// Cancels and purges everything known about a file, then removes the file itself.
	///
	/// Runs in the caller. When an attempt is running on an engine that cannot be interrupted,
	/// `force = false` declines before anything is touched.
	pub async fn delete(&self, filename: &str, force: bool) -> Result<DeletionReport, QueueError> {
		validate_filename(filename)?;
		let _guard = self.locks.acquire(filename).await;

		let running = self.in_flight.get(filename).is_some_and(|entry| entry.is_running());
		if running && !force && !self.engine.supports_cancellation() {
			warn!(filename, "🛑 Deletion declined, transcription cannot be interrupted");
			return Err(QueueError::ProcessingActive { filename: filename.to_string() });
		}

		let removed = self.queue.remove_all_for_filename(filename);
		self.refresh_queue_depth();
		let generation = self.bump_generation(filename);

		let mut was_processing = matches!(self.store.read_in_progress(filename), InProgressState::Present(ref record) if record.status == MarkerStatus::Processing);
		if let Some(mut entry) = self.in_flight.get_mut(filename) {
			if !entry.is_deleted() {
				was_processing = true;
				entry.interrupt = Some(Interrupt::Deleted);
				entry.cancel.cancel();
			}
		}

		let mut deleted = self.store.delete_all(filename)?;
		if let Some(source) = self.store.remove_source(filename)? {
			deleted.insert(0, source);
		}
		let deleted_files: Vec<String> = deleted.iter().filter_map(|path| path.file_name()).map(|name| name.to_string_lossy().into_owned()).collect();

		self.metrics.deleted.inc();
		info!(filename, generation, was_processing, was_queued = removed > 0, files = deleted_files.len(), "🗑️ Deleted transcription state");
		self.emit(filename, None, TaskStatus::NotFound, None);

		Ok(DeletionReport {
			filename: filename.to_string(),
			deleted_files,
			was_processing,
			was_queued: removed > 0,
		})
	}
}
