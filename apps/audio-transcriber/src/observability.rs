use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transcription_queue::TaskCoordinator;

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,audio_transcriber=debug,transcription_queue=debug,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
	let registry = tracing_subscriber::registry().with(env_filter);

	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json().with_target(true)).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer().with_target(true)).init(),
	}
}

/// Heartbeat logger - call this periodically to track service health
pub struct Heartbeat {
	last_heartbeat: Instant,
	interval: Duration,
}

impl Heartbeat {
	#[must_use]
	pub fn new(interval_secs: u64) -> Self {
		Self {
			last_heartbeat: Instant::now(),
			interval: Duration::from_secs(interval_secs),
		}
	}

	/// Logs queue stats if the interval has elapsed.
	pub fn maybe_log(&mut self, coordinator: &TaskCoordinator) -> bool {
		if self.last_heartbeat.elapsed() < self.interval {
			return false;
		}

		let stats = coordinator.queue_snapshot().stats;
		info!(
			pending = stats.pending,
			active = stats.active,
			completed = stats.completed,
			failed = stats.failed,
			retried = stats.retried,
			average_processing_time = ?stats.average_processing_time,
			"💓 Heartbeat"
		);
		self.last_heartbeat = Instant::now();
		true
	}

	/// Ticks until `shutdown` fires.
	pub async fn run(mut self, coordinator: Arc<TaskCoordinator>, shutdown: CancellationToken) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				() = shutdown.cancelled() => break,
				_ = ticker.tick() => {
					self.maybe_log(&coordinator);
				}
			}
		}
	}
}
