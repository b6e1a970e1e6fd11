use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::records::{InProgressRecord, MarkerStatus, ResultRecord};
use crate::task::TaskStatus;

pub const IN_PROGRESS_EXTENSION: &str = "in_progress";
pub const RESULT_EXTENSION: &str = "result";
const SIDECAR_EXTENSIONS: [&str; 4] = ["txt", "json", "srt", "vtt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
	InProgress,
	Result,
}

impl MarkerKind {
	const fn extension(self) -> &'static str {
		match self {
			Self::InProgress => IN_PROGRESS_EXTENSION,
			Self::Result => RESULT_EXTENSION,
		}
	}
}

#[derive(Debug, Clone)]
pub enum InProgressState {
	Absent,
	Present(InProgressRecord),
	/// Marker exists but cannot be parsed.
	Corrupt,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
	pub size: u64,
	pub modified: Option<DateTime<Utc>>,
}

/// Durable per-file state kept as JSON markers beside the audio in the shared directory.
///
/// Writes go through a temp file in the same directory followed by a rename, so readers only
/// ever see a complete marker.
#[derive(Debug, Clone)]
pub struct StatusStore {
	root: PathBuf,
}

impl StatusStore {
	pub fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
		let root = root.into();
		fs::create_dir_all(&root).map_err(|e| QueueError::io(&root, e))?;
		Ok(Self { root })
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	#[must_use]
	pub fn stem(filename: &str) -> &str {
		Path::new(filename).file_stem().and_then(OsStr::to_str).unwrap_or(filename)
	}

	#[must_use]
	pub fn source_path(&self, filename: &str) -> PathBuf {
		self.root.join(filename)
	}

	#[must_use]
	pub fn marker_path(&self, filename: &str, kind: MarkerKind) -> PathBuf {
		self.root.join(format!("{}.{}", Self::stem(filename), kind.extension()))
	}

	#[must_use]
	pub fn source_exists(&self, filename: &str) -> bool {
		self.source_path(filename).is_file()
	}

	#[must_use]
	pub fn file_metadata(&self, filename: &str) -> Option<FileMetadata> {
		let metadata = fs::metadata(self.source_path(filename)).ok()?;
		Some(FileMetadata {
			size: metadata.len(),
			modified: metadata.modified().ok().map(DateTime::<Utc>::from),
		})
	}

	/// Status derived from the markers and the source file alone.
	#[must_use]
	pub fn read_status(&self, filename: &str) -> TaskStatus {
		if self.read_result(filename).is_some() {
			return TaskStatus::Completed;
		}
		match self.read_in_progress(filename) {
			InProgressState::Present(record) if record.status == MarkerStatus::Error => TaskStatus::Error,
			InProgressState::Present(_) | InProgressState::Corrupt => TaskStatus::Processing,
			InProgressState::Absent if self.source_exists(filename) => TaskStatus::Pending,
			InProgressState::Absent => TaskStatus::NotFound,
		}
	}

	#[must_use]
	pub fn read_in_progress(&self, filename: &str) -> InProgressState {
		Self::read_in_progress_at(&self.marker_path(filename, MarkerKind::InProgress))
	}

	pub(crate) fn read_in_progress_at(path: &Path) -> InProgressState {
		let raw = match fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return InProgressState::Absent,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "⚠️ Unreadable in-progress marker");
				return InProgressState::Corrupt;
			}
		};
		match serde_json::from_str(&raw) {
			Ok(record) => InProgressState::Present(record),
			Err(e) => {
				warn!(path = %path.display(), error = %e, "⚠️ Corrupt in-progress marker, reporting as processing");
				InProgressState::Corrupt
			}
		}
	}

	#[must_use]
	pub fn read_result(&self, filename: &str) -> Option<ResultRecord> {
		let path = self.marker_path(filename, MarkerKind::Result);
		let raw = fs::read_to_string(&path).ok()?;
		match serde_json::from_str(&raw) {
			Ok(record) => Some(record),
			Err(e) => {
				warn!(path = %path.display(), error = %e, "⚠️ Corrupt result marker ignored");
				None
			}
		}
	}

	/// Marker content as stored, for debug responses.
	#[must_use]
	pub fn read_raw(&self, filename: &str, kind: MarkerKind) -> Option<String> {
		fs::read_to_string(self.marker_path(filename, kind)).ok()
	}

	pub fn write_in_progress(&self, record: &InProgressRecord) -> Result<(), QueueError> {
		self.write_atomic(&self.marker_path(&record.filename, MarkerKind::InProgress), record)
	}

	/// Publishes the result, then drops the in-progress marker it supersedes.
	pub fn write_result(&self, record: &ResultRecord) -> Result<(), QueueError> {
		self.write_atomic(&self.marker_path(&record.filename, MarkerKind::Result), record)?;
		self.clear_in_progress(&record.filename)?;
		Ok(())
	}

	pub fn clear_in_progress(&self, filename: &str) -> Result<bool, QueueError> {
		remove_if_exists(&self.marker_path(filename, MarkerKind::InProgress))
	}

	/// Removes both markers and any exported transcripts. The source file is left alone.
	pub fn delete_all(&self, filename: &str) -> Result<Vec<PathBuf>, QueueError> {
		let stem = Self::stem(filename);
		let mut removed = Vec::new();
		let extensions = [IN_PROGRESS_EXTENSION, RESULT_EXTENSION].into_iter().chain(SIDECAR_EXTENSIONS);
		for extension in extensions {
			let path = self.root.join(format!("{stem}.{extension}"));
			if path == self.source_path(filename) {
				continue;
			}
			if remove_if_exists(&path)? {
				debug!(path = %path.display(), "🗑️ Removed");
				removed.push(path);
			}
		}
		Ok(removed)
	}

	pub fn remove_source(&self, filename: &str) -> Result<Option<PathBuf>, QueueError> {
		let path = self.source_path(filename);
		Ok(remove_if_exists(&path)?.then_some(path))
	}

	/// Every `*.in_progress` marker in the shared directory.
	pub fn in_progress_markers(&self) -> Result<Vec<PathBuf>, QueueError> {
		let mut markers: Vec<PathBuf> = self
			.entries()?
			.into_iter()
			.filter(|path| path.extension().and_then(OsStr::to_str) == Some(IN_PROGRESS_EXTENSION))
			.collect();
		markers.sort();
		Ok(markers)
	}

	/// Names of the regular files in the shared directory.
	pub fn list_files(&self) -> Result<Vec<String>, QueueError> {
		let mut names: Vec<String> = self
			.entries()?
			.into_iter()
			.filter(|path| path.is_file())
			.filter_map(|path| path.file_name().and_then(OsStr::to_str).map(str::to_string))
			.collect();
		names.sort();
		Ok(names)
	}

	fn entries(&self) -> Result<Vec<PathBuf>, QueueError> {
		let dir = fs::read_dir(&self.root).map_err(|e| QueueError::io(&self.root, e))?;
		let mut paths = Vec::new();
		for entry in dir {
			let entry = entry.map_err(|e| QueueError::io(&self.root, e))?;
			paths.push(entry.path());
		}
		Ok(paths)
	}

	fn write_atomic(&self, path: &Path, value: &impl Serialize) -> Result<(), QueueError> {
		let mut file = tempfile::Builder::new()
			.prefix(".marker-")
			.suffix(".tmp")
			.tempfile_in(&self.root)
			.map_err(|e| QueueError::io(&self.root, e))?;
		serde_json::to_writer_pretty(file.as_file_mut(), value)?;
		file.as_file().sync_all().map_err(|e| QueueError::io(file.path(), e))?;
		file.persist(path).map_err(|e| QueueError::io(path, e.error))?;
		Ok(())
	}
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, QueueError> {
	match fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
		Err(e) => Err(QueueError::io(path, e)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::EngineOutput;
	use crate::records::Stage;
	use crate::task::{Priority, TranscriptionSettings, WorkItem};
	use tempfile::TempDir;

	fn store() -> (TempDir, StatusStore) {
		let dir = TempDir::new().unwrap();
		let store = StatusStore::open(dir.path()).unwrap();
		(dir, store)
	}

	fn item(filename: &str) -> WorkItem {
		WorkItem::new(filename, Priority::Api, TranscriptionSettings::default())
	}

	fn result_for(item: &WorkItem) -> ResultRecord {
		let output = EngineOutput {
			text: "hello".to_string(),
			model: "small".to_string(),
			..EngineOutput::default()
		};
		ResultRecord::from_output(item, output, 1.0)
	}

	#[test]
	fn markers_are_named_after_the_stem() {
		let (dir, store) = store();
		assert_eq!(store.marker_path("talk.mp3", MarkerKind::InProgress), dir.path().join("talk.in_progress"));
		assert_eq!(store.marker_path("talk.v2.wav", MarkerKind::Result), dir.path().join("talk.v2.result"));
	}

	#[test]
	fn status_follows_markers_and_source() {
		let (dir, store) = store();
		assert_eq!(store.read_status("talk.wav"), TaskStatus::NotFound);

		fs::write(dir.path().join("talk.wav"), b"RIFF").unwrap();
		assert_eq!(store.read_status("talk.wav"), TaskStatus::Pending);

		let work = item("talk.wav");
		store.write_in_progress(&InProgressRecord::for_item(&work, Stage::Transcribing)).unwrap();
		assert_eq!(store.read_status("talk.wav"), TaskStatus::Processing);

		store.write_result(&result_for(&work)).unwrap();
		assert_eq!(store.read_status("talk.wav"), TaskStatus::Completed);
		assert!(matches!(store.read_in_progress("talk.wav"), InProgressState::Absent));
	}

	#[test]
	fn result_wins_over_stale_in_progress_marker() {
		let (dir, store) = store();
		fs::write(dir.path().join("talk.wav"), b"RIFF").unwrap();
		let work = item("talk.wav");
		store.write_result(&result_for(&work)).unwrap();
		store.write_in_progress(&InProgressRecord::for_item(&work, Stage::Transcribing)).unwrap();

		assert_eq!(store.read_status("talk.wav"), TaskStatus::Completed);
	}

	#[test]
	fn corrupt_marker_reads_as_processing() {
		let (dir, store) = store();
		fs::write(dir.path().join("talk.wav"), b"RIFF").unwrap();
		fs::write(dir.path().join("talk.in_progress"), b"{not json").unwrap();

		assert!(matches!(store.read_in_progress("talk.wav"), InProgressState::Corrupt));
		assert_eq!(store.read_status("talk.wav"), TaskStatus::Processing);
	}

	#[test]
	fn error_marker_reads_as_error() {
		let (dir, store) = store();
		fs::write(dir.path().join("talk.wav"), b"RIFF").unwrap();
		let record = InProgressRecord::for_item(&item("talk.wav"), Stage::Transcribing)
			.with_failure(crate::error::ErrorCode::EngineFailed, "exit status 1")
			.into_terminal();
		store.write_in_progress(&record).unwrap();

		assert_eq!(store.read_status("talk.wav"), TaskStatus::Error);
	}

	#[test]
	fn writes_leave_no_temp_files_behind() {
		let (_dir, store) = store();
		store.write_in_progress(&InProgressRecord::for_item(&item("talk.wav"), Stage::Queued)).unwrap();

		let files = store.list_files().unwrap();
		assert_eq!(files, vec!["talk.in_progress".to_string()]);
	}

	#[test]
	fn delete_all_removes_markers_and_sidecars_but_not_source() {
		let (dir, store) = store();
		for name in ["talk.wav", "talk.txt", "talk.srt", "other.txt"] {
			fs::write(dir.path().join(name), b"x").unwrap();
		}
		let work = item("talk.wav");
		store.write_result(&result_for(&work)).unwrap();
		store.write_in_progress(&InProgressRecord::for_item(&work, Stage::Queued)).unwrap();

		let removed = store.delete_all("talk.wav").unwrap();
		assert_eq!(removed.len(), 4);
		assert!(store.source_exists("talk.wav"));
		assert!(dir.path().join("other.txt").exists());

		assert_eq!(store.remove_source("talk.wav").unwrap(), Some(dir.path().join("talk.wav")));
		assert_eq!(store.remove_source("talk.wav").unwrap(), None);
		assert_eq!(store.read_status("talk.wav"), TaskStatus::NotFound);
	}

	#[test]
	fn lists_in_progress_markers() {
		let (dir, store) = store();
		store.write_in_progress(&InProgressRecord::for_item(&item("b.wav"), Stage::Queued)).unwrap();
		store.write_in_progress(&InProgressRecord::for_item(&item("a.wav"), Stage::Queued)).unwrap();
		fs::write(dir.path().join("c.wav"), b"x").unwrap();

		let markers = store.in_progress_markers().unwrap();
		assert_eq!(markers, vec![dir.path().join("a.in_progress"), dir.path().join("b.in_progress")]);
	}
}
