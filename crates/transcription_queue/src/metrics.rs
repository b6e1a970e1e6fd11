use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Seconds assumed per task until the first completion is observed.
pub const DEFAULT_PROCESSING_ESTIMATE_SECS: f64 = 60.0;

/// Scheduler counters and gauges, registered once against the app's registry.
#[derive(Clone, Debug)]
pub struct SchedulerMetrics {
	pub submitted: IntCounterVec,
	pub completed: IntCounter,
	pub failed: IntCounter,
	pub retried: IntCounter,
	pub restarted: IntCounter,
	pub conflicts: IntCounter,
	pub deleted: IntCounter,
	pub queue_depth: IntGauge,
	pub active: IntGauge,
	pub processing_seconds: Histogram,
}

impl SchedulerMetrics {
	pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
		let submitted = IntCounterVec::new(Opts::new("transcription_tasks_submitted_total", "Work items enqueued"), &["priority"])?;
		let completed = IntCounter::new("transcription_tasks_completed_total", "Attempts that produced a result")?;
		let failed = IntCounter::new("transcription_tasks_failed_total", "Files that exhausted their retries")?;
		let retried = IntCounter::new("transcription_tasks_retried_total", "Failed attempts scheduled for retry")?;
		let restarted = IntCounter::new("transcription_tasks_restarted_total", "Attempts interrupted by a settings change")?;
		let conflicts = IntCounter::new("transcription_conflicts_total", "Submissions rejected with a settings conflict")?;
		let deleted = IntCounter::new("transcription_deletions_total", "Completed deletion requests")?;
		let queue_depth = IntGauge::new("transcription_queue_depth", "Items waiting in the priority queue")?;
		let active = IntGauge::new("transcription_active_tasks", "Attempts currently owned by a worker")?;
		let processing_seconds = Histogram::with_opts(
			HistogramOpts::new("transcription_processing_seconds", "Engine time of successful attempts").buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
		)?;

		registry.register(Box::new(submitted.clone()))?;
		registry.register(Box::new(completed.clone()))?;
		registry.register(Box::new(failed.clone()))?;
		registry.register(Box::new(retried.clone()))?;
		registry.register(Box::new(restarted.clone()))?;
		registry.register(Box::new(conflicts.clone()))?;
		registry.register(Box::new(deleted.clone()))?;
		registry.register(Box::new(queue_depth.clone()))?;
		registry.register(Box::new(active.clone()))?;
		registry.register(Box::new(processing_seconds.clone()))?;

		Ok(Self {
			submitted,
			completed,
			failed,
			retried,
			restarted,
			conflicts,
			deleted,
			queue_depth,
			active,
			processing_seconds,
		})
	}

	/// Mean engine time of successful attempts, if any finished yet.
	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub fn average_processing_time(&self) -> Option<f64> {
		let count = self.processing_seconds.get_sample_count();
		(count > 0).then(|| self.processing_seconds.get_sample_sum() / count as f64)
	}

	#[must_use]
	pub fn processing_estimate(&self) -> f64 {
		self.average_processing_time().unwrap_or(DEFAULT_PROCESSING_ESTIMATE_SECS)
	}
}
