use clap::{Args, Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use transcription_queue::{ComputeType, SchedulerConfig, WhisperModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	Text,
	Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "audio-transcriber")]
#[command(about = "Queue-backed WhisperX transcription service", long_about = None)]
pub struct Config {
	/// Address the HTTP API binds to
	#[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
	pub api_host: String,

	/// Port the HTTP API listens on
	#[arg(long, env = "API_PORT", default_value = "8000")]
	pub api_port: u16,

	/// Log output format
	#[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
	pub log_format: LogFormat,

	/// Seconds between queue heartbeat log lines
	#[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "30")]
	pub heartbeat_interval_secs: u64,

	#[command(flatten)]
	pub scheduler: SchedulerConfig,

	#[command(flatten)]
	pub whisperx: WhisperXConfig,
}

/// How the WhisperX child process is launched.
#[derive(Args, Debug, Clone)]
pub struct WhisperXConfig {
	/// Python interpreter with whisperx installed
	#[arg(long, env = "WHISPERX_PYTHON", default_value = "python")]
	pub python: String,

	/// Directory holding `faster-whisper-<model>` checkouts
	#[arg(long, env = "MODEL_DIRECTORY", default_value = "./models")]
	pub model_directory: PathBuf,

	/// Scratch space for per-run output directories
	#[arg(long, env = "TEMP_DIRECTORY", default_value = "./temp")]
	pub temp_directory: PathBuf,

	/// Overrides the device requested per task (cpu or cuda)
	#[arg(long = "whisperx-device", env = "WHISPERX_DEVICE")]
	pub device: Option<String>,

	#[arg(long = "whisperx-batch-size", env = "WHISPERX_BATCH_SIZE", default_value = "16")]
	pub batch_size: u32,

	/// Model used when a request does not name one
	#[arg(long, env = "DEFAULT_MODEL", value_parser = parse_model, default_value = "small")]
	pub default_model: WhisperModel,

	#[arg(long, env = "DEFAULT_COMPUTE_TYPE", value_parser = parse_compute_type, default_value = "float32")]
	pub default_compute_type: ComputeType,
}

impl Config {
	/// Validate configuration values
	pub fn validate(&self) -> Result<(), String> {
		self.scheduler.validate()?;

		if self.api_host.trim().is_empty() {
			return Err("api_host must not be empty".to_string());
		}

		if self.heartbeat_interval_secs == 0 {
			return Err("heartbeat_interval_secs must be greater than 0".to_string());
		}

		if self.whisperx.batch_size == 0 {
			return Err("whisperx batch_size must be greater than 0".to_string());
		}

		if self.whisperx.python.trim().is_empty() {
			return Err("whisperx python interpreter must not be empty".to_string());
		}

		if let Some(device) = &self.whisperx.device {
			if !matches!(device.as_str(), "cpu" | "cuda") {
				return Err(format!("unsupported whisperx device '{device}'"));
			}
		}

		Ok(())
	}

	pub fn bind_address(&self) -> Result<SocketAddr, String> {
		format!("{}:{}", self.api_host, self.api_port).parse().map_err(|e| format!("invalid bind address: {e}"))
	}
}

fn parse_model(s: &str) -> Result<WhisperModel, String> {
	WhisperModel::ALL
		.into_iter()
		.find(|m| m.as_str().eq_ignore_ascii_case(s))
		.ok_or_else(|| format!("unknown model '{s}'"))
}

fn parse_compute_type(s: &str) -> Result<ComputeType, String> {
	serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase())).map_err(|_| format!("unknown compute type '{s}'"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_parse_and_validate() {
		let config = Config::parse_from(["audio-transcriber"]);
		assert!(config.validate().is_ok());
		assert_eq!(config.api_port, 8000);
		assert_eq!(config.log_format, LogFormat::Text);
		assert_eq!(config.whisperx.batch_size, 16);
		assert_eq!(config.whisperx.default_model, WhisperModel::Small);
		assert_eq!(config.whisperx.default_compute_type, ComputeType::Float32);
		assert_eq!(config.bind_address().unwrap().port(), 8000);
	}

	#[test]
	fn scheduler_flags_are_flattened() {
		let config = Config::parse_from(["audio-transcriber", "--worker-count", "4", "--shared-directory", "/data", "--log-format", "json"]);
		assert_eq!(config.scheduler.worker_count, 4);
		assert_eq!(config.scheduler.shared_directory, PathBuf::from("/data"));
		assert_eq!(config.log_format, LogFormat::Json);
	}

	#[test]
	fn rejects_unknown_device_and_zero_batch() {
		let mut config = Config::parse_from(["audio-transcriber", "--whisperx-device", "tpu"]);
		assert!(config.validate().is_err());

		config.whisperx.device = Some("cuda".to_string());
		assert!(config.validate().is_ok());

		config.whisperx.batch_size = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn model_names_are_case_insensitive() {
		assert_eq!(parse_model("MEDIUM"), Ok(WhisperModel::Medium));
		assert!(parse_model("huge").is_err());
		assert_eq!(parse_compute_type("Int8"), Ok(ComputeType::Int8));
	}
}
