use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created async mutex per filename.
#[derive(Debug, Default)]
pub struct FileLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileLocks {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn acquire(&self, filename: &str) -> FileGuard<'_> {
		let lock = Arc::clone(self.locks.entry(filename.to_string()).or_default().value());
		let guard = lock.lock_owned().await;
		FileGuard {
			locks: self,
			filename: filename.to_string(),
			guard: Some(guard),
		}
	}

	/// Number of filenames with a live lock entry.
	#[must_use]
	pub fn len(&self) -> usize {
		self.locks.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}

/// Held while a filename's state is inspected or changed. The entry is reclaimed on drop
/// once no other task holds or waits for it.
#[derive(Debug)]
pub struct FileGuard<'a> {
	locks: &'a FileLocks,
	filename: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FileGuard<'_> {
	fn drop(&mut self) {
		drop(self.guard.take());
		self.locks.locks.remove_if(&self.filename, |_, lock| Arc::strong_count(lock) == 1);
	}
}
