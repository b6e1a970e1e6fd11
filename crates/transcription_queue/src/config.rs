use clap::{ArgAction, Args};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Scheduler settings. Flattened into the binary's `Config`.
#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
	#[arg(long, env = "SHARED_DIRECTORY", default_value = "./shared", help = "Directory holding audio files and their status markers")]
	pub shared_directory: PathBuf,

	#[arg(long, env = "MAX_RETRIES", default_value = "3", help = "Failed attempts allowed before a file is marked as errored")]
	pub max_retries: u32,

	#[arg(
        long = "processing-timeout-secs",
        env = "PROCESSING_TIMEOUT_SECS",
        default_value = "600",
        value_parser = parse_secs,
        help = "Hard timeout for a single engine invocation in seconds"
    )]
	pub task_timeout: Duration,

	#[arg(
        long = "retry-delay-secs",
        env = "RETRY_DELAY_SECS",
        default_value = "2",
        value_parser = parse_secs,
        help = "Delay before a failed attempt is re-enqueued in seconds"
    )]
	pub retry_delay: Duration,

	#[arg(long, env = "WORKER_COUNT", default_value = "1", help = "Number of concurrent transcription workers")]
	pub worker_count: usize,

	#[arg(
        long = "scan-interval-secs",
        env = "SCAN_INTERVAL_SECS",
        default_value = "60",
        value_parser = parse_secs,
        help = "Interval between shared directory scans in seconds"
    )]
	pub scan_interval: Duration,

	#[arg(long, env = "FILE_CHECK_ATTEMPTS", default_value = "3", help = "Existence checks performed before reporting file_not_found")]
	pub file_check_attempts: u32,

	#[arg(
        long = "file-check-delay-ms",
        env = "FILE_CHECK_DELAY_MS",
        default_value = "1000",
        value_parser = parse_millis,
        help = "Delay between existence checks in milliseconds"
    )]
	pub file_check_delay: Duration,

	#[arg(long, env = "EXCLUDE_PATTERN", default_value = "(?i)sample", help = "Regex of file names discovery ignores")]
	pub exclude_pattern: String,

	#[arg(long, env = "MONITORING_ENABLED", default_value_t = true, action = ArgAction::Set, help = "Periodically scan the shared directory")]
	pub monitoring_enabled: bool,

	#[arg(long, env = "WATCH_ENABLED", default_value_t = true, action = ArgAction::Set, help = "React to filesystem events between scans")]
	pub watch_enabled: bool,
}

impl SchedulerConfig {
	#[must_use]
	pub fn new(shared_directory: impl Into<PathBuf>) -> Self {
		Self {
			shared_directory: shared_directory.into(),
			..Self::default()
		}
	}

	/// Rejects settings the scheduler cannot run with.
	pub fn validate(&self) -> Result<(), String> {
		if self.worker_count == 0 {
			return Err("WORKER_COUNT must be at least 1".to_string());
		}
		if self.max_retries == 0 {
			return Err("MAX_RETRIES must be at least 1".to_string());
		}
		if self.file_check_attempts == 0 {
			return Err("FILE_CHECK_ATTEMPTS must be at least 1".to_string());
		}
		if self.task_timeout.is_zero() {
			return Err("PROCESSING_TIMEOUT_SECS must be greater than 0".to_string());
		}
		if self.scan_interval.is_zero() {
			return Err("SCAN_INTERVAL_SECS must be greater than 0".to_string());
		}
		Regex::new(&self.exclude_pattern).map_err(|e| format!("EXCLUDE_PATTERN is not a valid regex: {e}"))?;
		Ok(())
	}
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			shared_directory: PathBuf::from("./shared"),
			max_retries: 3,
			task_timeout: Duration::from_secs(600),
			retry_delay: Duration::from_secs(2),
			worker_count: 1,
			scan_interval: Duration::from_secs(60),
			file_check_attempts: 3,
			file_check_delay: Duration::from_millis(1000),
			exclude_pattern: "(?i)sample".to_string(),
			monitoring_enabled: true,
			watch_enabled: true,
		}
	}
}

fn parse_secs(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

fn parse_millis(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[derive(Parser)]
	struct Cli {
		#[command(flatten)]
		scheduler: SchedulerConfig,
	}

	#[test]
	fn test_default_config() {
		let config = SchedulerConfig::default();
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.task_timeout, Duration::from_secs(600));
		assert_eq!(config.retry_delay, Duration::from_secs(2));
		assert_eq!(config.worker_count, 1);
		assert_eq!(config.file_check_attempts, 3);
		assert_eq!(config.file_check_delay, Duration::from_secs(1));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_parse_durations() {
		assert_eq!(parse_secs("60").unwrap(), Duration::from_secs(60));
		assert_eq!(parse_millis("250").unwrap(), Duration::from_millis(250));
		assert!(parse_secs("soon").is_err());
	}

	#[test]
	fn test_config_parser() {
		let args = vec![
			"program",
			"--shared-directory",
			"/data/audio",
			"--max-retries",
			"5",
			"--processing-timeout-secs",
			"30",
			"--retry-delay-secs",
			"10",
			"--worker-count",
			"2",
			"--file-check-delay-ms",
			"50",
			"--watch-enabled",
			"false",
		];

		let config = Cli::try_parse_from(args).unwrap().scheduler;
		assert_eq!(config.shared_directory, PathBuf::from("/data/audio"));
		assert_eq!(config.max_retries, 5);
		assert_eq!(config.task_timeout, Duration::from_secs(30));
		assert_eq!(config.retry_delay, Duration::from_secs(10));
		assert_eq!(config.worker_count, 2);
		assert_eq!(config.file_check_delay, Duration::from_millis(50));
		assert!(config.monitoring_enabled);
		assert!(!config.watch_enabled);
	}

	#[test]
	fn test_validate_rejects_unusable_settings() {
		let mut config = SchedulerConfig::new("/tmp");
		config.worker_count = 0;
		assert!(config.validate().is_err());

		let mut config = SchedulerConfig::new("/tmp");
		config.exclude_pattern = "(unclosed".to_string();
		assert!(config.validate().unwrap_err().contains("EXCLUDE_PATTERN"));
	}
}
