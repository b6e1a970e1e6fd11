use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{SubmitRequest, SubmitStatus, TaskCoordinator};
use crate::error::QueueError;
use crate::task::{validate_filename, TaskStatus};

pub const AUDIO_EXTENSIONS: [&str; 12] = ["mp3", "wav", "flac", "m4a", "ogg", "wma", "aac", "opus", "mp4", "avi", "mov", "mkv"];
const TEMP_SUFFIXES: [&str; 5] = [".tmp", ".part", ".partial", ".crdownload", "~"];

#[must_use]
pub fn is_audio_file(filename: &str) -> bool {
	Path::new(filename)
		.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|audio| audio.eq_ignore_ascii_case(ext)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
	pub examined: usize,
	pub submitted: usize,
	pub skipped: usize,
}

/// Finds audio in the shared directory that has never been processed and submits it at
/// auto-scan priority.
pub struct FileDiscovery {
	coordinator: Arc<TaskCoordinator>,
	exclude: Regex,
}

impl FileDiscovery {
	pub fn new(coordinator: Arc<TaskCoordinator>) -> Result<Self, QueueError> {
		let exclude = Regex::new(&coordinator.config().exclude_pattern)?;
		Ok(Self { coordinator, exclude })
	}

	/// Name-based filter: visible, finished, audio, not excluded.
	#[must_use]
	pub fn is_candidate(&self, filename: &str) -> bool {
		!filename.starts_with('.') && !TEMP_SUFFIXES.iter().any(|suffix| filename.ends_with(suffix)) && is_audio_file(filename) && !self.exclude.is_match(filename)
	}

	/// Submits `filename` if it has no marker and nothing is queued or running for it.
	pub async fn consider(&self, filename: &str) -> Result<bool, QueueError> {
		if !self.is_candidate(filename) || validate_filename(filename).is_err() {
			return Ok(false);
		}
		if self.coordinator.store().read_status(filename) != TaskStatus::Pending || self.coordinator.is_tracked(filename) {
			return Ok(false);
		}

		let outcome = self.coordinator.submit(SubmitRequest::discovered(filename)).await?;
		let submitted = outcome.status == SubmitStatus::Pending;
		if submitted {
			debug!(filename, task_id = ?outcome.task_id, "🔍 Discovered new audio file");
		}
		Ok(submitted)
	}

	pub async fn scan_once(&self) -> Result<ScanReport, QueueError> {
		let mut report = ScanReport::default();
		for filename in self.coordinator.store().list_files()? {
			if !self.is_candidate(&filename) {
				continue;
			}
			report.examined += 1;
			match self.consider(&filename).await {
				Ok(true) => report.submitted += 1,
				Ok(false) => report.skipped += 1,
				Err(e) => {
					report.skipped += 1;
					warn!(filename = %filename, error = %e, "⚠️ Could not submit discovered file");
				}
			}
		}
		Ok(report)
	}

	/// Scans every `scan_interval` until `shutdown` fires.
	pub async fn run(&self, shutdown: CancellationToken) {
		let period = self.coordinator.config().scan_interval;
		let mut ticker = interval(period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		info!(interval_secs = period.as_secs(), "🔍 Directory scanner started");

		loop {
			tokio::select! {
				() = shutdown.cancelled() => break,
				_ = ticker.tick() => match self.scan_once().await {
					Ok(report) if report.submitted > 0 => info!(examined = report.examined, submitted = report.submitted, "🔍 Scan queued new files"),
					Ok(report) => debug!(examined = report.examined, "🔍 Scan found nothing new"),
					Err(e) => warn!(error = %e, "⚠️ Directory scan failed"),
				},
			}
		}
		info!("🔍 Directory scanner stopped");
	}

	/// Starts a filesystem watcher on the shared directory. The watcher must be kept alive
	/// for paths to keep arriving.
	pub fn watch(&self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<PathBuf>), QueueError> {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
			Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))) => {
				for path in event.paths {
					let _ = tx.send(path);
				}
			}
			Ok(_) => {}
			Err(e) => warn!(error = %e, "⚠️ Watch error"),
		})?;
		watcher.watch(self.coordinator.store().root(), RecursiveMode::NonRecursive)?;
		Ok((watcher, rx))
	}

	/// Feeds watcher events through [`Self::consider`] until `shutdown` fires.
	pub async fn run_watcher(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
		let (_watcher, mut paths) = self.watch()?;
		info!(root = %self.coordinator.store().root().display(), "👀 Watching shared directory");

		loop {
			let path = tokio::select! {
				() = shutdown.cancelled() => break,
				path = paths.recv() => match path {
					Some(path) => path,
					None => break,
				},
			};
			let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
				continue;
			};
			if let Err(e) = self.consider(filename).await {
				warn!(filename, error = %e, "⚠️ Could not submit watched file");
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn audio_extensions_are_case_insensitive() {
		assert!(is_audio_file("talk.MP3"));
		assert!(is_audio_file("clip.opus"));
		assert!(!is_audio_file("notes.txt"));
		assert!(!is_audio_file("talk.in_progress"));
		assert!(!is_audio_file("README"));
	}
}
