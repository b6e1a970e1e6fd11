use anyhow::Result;
use audio_transcriber::observability::{init_tracing, Heartbeat};
use audio_transcriber::{app, AppState, Config, WhisperXEngine};
use clap::Parser;
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use transcription_queue::{FileDiscovery, TaskCoordinator, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
	// Load environment variables
	dotenvy::dotenv().ok();

	let config = Config::parse();
	config.validate().map_err(anyhow::Error::msg)?;
	init_tracing(config.log_format);

	let addr = config.bind_address().map_err(anyhow::Error::msg)?;
	info!(
		shared_directory = %config.scheduler.shared_directory.display(),
		workers = config.scheduler.worker_count,
		%addr,
		"🎯 Starting audio transcriber"
	);

	let registry = Registry::new();
	let engine = Arc::new(WhisperXEngine::new(config.whisperx.clone()));
	if !engine.is_available().await {
		warn!(python = %config.whisperx.python, "⚠️ WhisperX is not available, tasks will fail until it is installed");
	}

	let coordinator = Arc::new(TaskCoordinator::new(config.scheduler.clone(), engine.clone(), &registry)?);
	let recovered = coordinator.recover().await?;
	info!(requeued = recovered.requeued, cleared = recovered.cleared, kept_errors = recovered.kept_errors, "♻️ Recovery finished");

	let shutdown = CancellationToken::new();
	let pool = WorkerPool::start(&coordinator, &shutdown);
	let mut background = Vec::new();

	if config.scheduler.monitoring_enabled {
		let discovery = Arc::new(FileDiscovery::new(coordinator.clone())?);

		let scanner = discovery.clone();
		let token = shutdown.child_token();
		background.push(tokio::spawn(async move { scanner.run(token).await }));

		if config.scheduler.watch_enabled {
			let token = shutdown.child_token();
			background.push(tokio::spawn(async move {
				if let Err(e) = discovery.run_watcher(token).await {
					error!(error = %e, "Filesystem watcher stopped");
				}
			}));
		}
	}

	background.push(tokio::spawn(Heartbeat::new(config.heartbeat_interval_secs).run(coordinator.clone(), shutdown.child_token())));

	let listener = TcpListener::bind(addr).await?;
	info!(addr = %listener.local_addr()?, "🚀 API listening");

	let router = app(AppState::new(coordinator, engine, registry));
	let server_shutdown = shutdown.clone();
	axum::serve(listener, router)
		.with_graceful_shutdown(async move {
			wait_for_shutdown_signal().await;
			info!("🛑 Shutdown signal received (SIGTERM/SIGINT)");
			server_shutdown.cancel();
		})
		.await?;

	shutdown.cancel();
	pool.join().await;
	for handle in background {
		if let Err(e) = handle.await {
			warn!(error = %e, "Background task ended abnormally");
		}
	}

	info!("✅ Shutdown complete");
	Ok(())
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(error = %e, "Failed to install Ctrl+C handler");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				error!(error = %e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
			() = ctrl_c => {},
			() = terminate => {},
	}
}
