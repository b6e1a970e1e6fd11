use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::coordinator::TaskCoordinator;
use crate::worker::Worker;

/// Fixed set of workers sharing one coordinator.
pub struct WorkerPool {
	handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
	/// Spawns `worker_count` workers. They stop taking work once `shutdown` fires.
	#[must_use]
	pub fn start(coordinator: &Arc<TaskCoordinator>, shutdown: &CancellationToken) -> Self {
		let worker_count = coordinator.config().worker_count.max(1);
		let handles = (0..worker_count)
			.map(|id| {
				let worker = Worker::new(id, Arc::clone(coordinator));
				tokio::spawn(worker.run(shutdown.child_token()))
			})
			.collect();

		info!(worker_count, engine = coordinator.engine().name(), "🚀 Worker pool started");
		Self { handles }
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.handles.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.handles.is_empty()
	}

	/// Waits for every worker to exit.
	pub async fn join(self) {
		for handle in self.handles {
			if let Err(e) = handle.await {
				error!(error = %e, "💥 Worker task panicked");
			}
		}
		info!("🛑 Worker pool stopped");
	}
}
