use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use transcription_queue::{EngineError, EngineOutput, Segment, TranscriptionEngine, TranscriptionSettings, WhisperModel, Word};

use crate::config::WhisperXConfig;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(10);
const MODEL_DIR_PREFIX: &str = "faster-whisper-";
const FALLBACK_EXTENSIONS: [&str; 3] = ["txt", "srt", "vtt"];
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Deserialize)]
struct WhisperXDocument {
	#[serde(default)]
	segments: Vec<WhisperXSegment>,
	language: Option<String>,
	duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhisperXSegment {
	#[serde(default)]
	start: f64,
	#[serde(default)]
	end: f64,
	#[serde(default)]
	text: String,
	#[serde(default)]
	confidence: Option<f32>,
	#[serde(default)]
	words: Option<Vec<Word>>,
}

/// Runs `python -m whisperx` as a child process per attempt.
///
/// The child is spawned with `kill_on_drop`, so both cancellation and the coordinator's hard
/// timeout (which drops the future) terminate it.
pub struct WhisperXEngine {
	config: WhisperXConfig,
}

impl WhisperXEngine {
	#[must_use]
	pub const fn new(config: WhisperXConfig) -> Self {
		Self { config }
	}

	#[must_use]
	pub const fn config(&self) -> &WhisperXConfig {
		&self.config
	}

	fn model_path(&self, model: WhisperModel) -> PathBuf {
		self.config.model_directory.join(format!("{MODEL_DIR_PREFIX}{}", model.as_str()))
	}

	/// Arguments passed to the interpreter, `-m whisperx` included.
	#[must_use]
	pub fn arguments(&self, source: &Path, output_dir: &Path, settings: &TranscriptionSettings) -> Vec<OsString> {
		let device = self.config.device.as_deref().unwrap_or_else(|| settings.device.as_str());
		let mut args: Vec<OsString> = vec!["-m".into(), "whisperx".into(), source.into()];

		let mut push = |flag: &str, value: String| {
			args.push(flag.into());
			args.push(value.into());
		};
		push("--output_dir", output_dir.display().to_string());
		push("--output_format", "json".to_string());
		push("--model", settings.model.as_str().to_string());
		push("--compute_type", settings.compute_type.as_str().to_string());
		push("--device", device.to_string());
		push("--batch_size", self.config.batch_size.to_string());

		if let Some(language) = &settings.language {
			push("--language", language.clone());
		}

		let model_path = self.model_path(settings.model);
		if model_path.is_dir() {
			push("--model_dir", model_path.display().to_string());
		}

		if settings.temperature > 0.0 {
			push("--temperature", settings.temperature.to_string());
		}
		push("--beam_size", settings.beam_size.to_string());
		push("--best_of", settings.best_of.to_string());
		push("--patience", settings.patience.to_string());

		if settings.word_timestamps {
			args.push("--word_timestamps".into());
			args.push("True".into());
		}

		args
	}

	/// Whether `python -m whisperx --help` runs successfully.
	pub async fn is_available(&self) -> bool {
		let probe = Command::new(&self.config.python)
			.args(["-m", "whisperx", "--help"])
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.status();

		match tokio::time::timeout(AVAILABILITY_TIMEOUT, probe).await {
			Ok(Ok(status)) => status.success(),
			Ok(Err(e)) => {
				debug!(python = %self.config.python, error = %e, "WhisperX probe could not start");
				false
			}
			Err(_) => {
				warn!(python = %self.config.python, "⏱️ WhisperX probe timed out");
				false
			}
		}
	}

	/// Installed `faster-whisper-*` models plus the stock model names, sorted.
	#[must_use]
	pub fn available_models(&self) -> Vec<String> {
		let mut models: Vec<String> = WhisperModel::ALL.iter().map(|m| m.as_str().to_string()).collect();

		match std::fs::read_dir(&self.config.model_directory) {
			Ok(entries) => {
				for entry in entries.flatten() {
					if !entry.path().is_dir() {
						continue;
					}
					if let Some(name) = entry.file_name().to_str().and_then(|n| n.strip_prefix(MODEL_DIR_PREFIX)) {
						if !name.is_empty() {
							models.push(name.to_string());
						}
					}
				}
			}
			Err(e) if e.kind() == ErrorKind::NotFound => {}
			Err(e) => warn!(directory = %self.config.model_directory.display(), error = %e, "Could not list model directory"),
		}

		models.sort();
		models.dedup();
		models
	}
}

#[async_trait]
impl TranscriptionEngine for WhisperXEngine {
	#[instrument(skip(self, settings, cancel), fields(source = %source.display(), model = settings.model.as_str()))]
	async fn transcribe(&self, source: &Path, settings: &TranscriptionSettings, cancel: CancellationToken) -> Result<EngineOutput, EngineError> {
		tokio::fs::create_dir_all(&self.config.temp_directory).await?;
		let scratch = tempfile::Builder::new().prefix("whisperx-").tempdir_in(&self.config.temp_directory)?;

		let mut command = Command::new(&self.config.python);
		command
			.args(self.arguments(source, scratch.path(), settings))
			.env("PYTHONIOENCODING", "utf-8")
			.env("PYTHONUTF8", "1")
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let child = command.spawn().map_err(|e| match e.kind() {
			ErrorKind::NotFound => EngineError::Unavailable(format!("'{}' not found", self.config.python)),
			_ => EngineError::Io(e),
		})?;

		info!(pid = ?child.id(), "🎤 WhisperX started");
		let started = Instant::now();

		let output = tokio::select! {
			() = cancel.cancelled() => {
				info!("🛑 WhisperX run cancelled");
				return Err(EngineError::Cancelled);
			}
			output = child.wait_with_output() => output?,
		};

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			let tail = tail_chars(stderr.trim(), STDERR_TAIL);
			warn!(status = %output.status, stderr = %tail, "❌ WhisperX exited with failure");
			return Err(EngineError::Failed(format!("whisperx exited with {}: {tail}", output.status)));
		}

		debug!(elapsed_ms = started.elapsed().as_millis(), "WhisperX finished");
		parse_output(scratch.path(), source, settings)
	}

	fn name(&self) -> &str {
		"whisperx"
	}
}

fn tail_chars(s: &str, max: usize) -> &str {
	let count = s.chars().count();
	if count <= max {
		return s;
	}
	s.char_indices().nth(count - max).map_or(s, |(i, _)| &s[i..])
}

/// Reads `<stem>.json` from `output_dir`, falling back to plain-text sidecars.
pub fn parse_output(output_dir: &Path, source: &Path, settings: &TranscriptionSettings) -> Result<EngineOutput, EngineError> {
	let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
	let json_path = output_dir.join(format!("{stem}.json"));

	match std::fs::read_to_string(&json_path) {
		Ok(raw) => match serde_json::from_str::<WhisperXDocument>(&raw) {
			Ok(document) => return Ok(from_document(document, settings)),
			Err(e) => warn!(path = %json_path.display(), error = %e, "WhisperX JSON unreadable, trying text output"),
		},
		Err(e) if e.kind() == ErrorKind::NotFound => debug!(path = %json_path.display(), "No WhisperX JSON output"),
		Err(e) => return Err(e.into()),
	}

	fallback_output(output_dir, stem, settings)
}

fn from_document(document: WhisperXDocument, settings: &TranscriptionSettings) -> EngineOutput {
	let segments: Vec<Segment> = document
		.segments
		.into_iter()
		.map(|s| Segment {
			start: s.start,
			end: s.end,
			text: s.text.trim().to_string(),
			confidence: s.confidence,
			words: s.words,
		})
		.collect();

	let text = segments.iter().map(|s| s.text.as_str()).filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" ");
	let duration = segments.iter().map(|s| s.end).fold(document.duration.unwrap_or(0.0), f64::max);

	EngineOutput {
		text,
		segments,
		language: document.language.or_else(|| settings.language.clone()),
		duration,
		model: settings.model.as_str().to_string(),
	}
}

fn fallback_output(output_dir: &Path, stem: &str, settings: &TranscriptionSettings) -> Result<EngineOutput, EngineError> {
	for ext in FALLBACK_EXTENSIONS {
		let path = output_dir.join(format!("{stem}.{ext}"));
		match std::fs::read_to_string(&path) {
			Ok(text) => {
				let text = text.trim().to_string();
				let segments = if text.is_empty() {
					Vec::new()
				} else {
					vec![Segment {
						start: 0.0,
						end: 0.0,
						text: text.clone(),
						confidence: None,
						words: None,
					}]
				};
				return Ok(EngineOutput {
					text,
					segments,
					language: settings.language.clone(),
					duration: 0.0,
					model: settings.model.as_str().to_string(),
				});
			}
			Err(e) if e.kind() == ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
	}

	Err(EngineError::InvalidOutput(format!("no output found for '{stem}' in {}", output_dir.display())))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::whisperx_config;

	fn args_as_strings(args: &[OsString]) -> Vec<String> {
		args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
	}

	#[test]
	fn arguments_follow_settings() {
		let dir = tempfile::tempdir().unwrap();
		let engine = WhisperXEngine::new(whisperx_config(dir.path()));
		let settings = TranscriptionSettings {
			language: Some("en".to_string()),
			temperature: 0.5,
			..TranscriptionSettings::default()
		};

		let args = args_as_strings(&engine.arguments(Path::new("/shared/talk.wav"), Path::new("/tmp/out"), &settings));
		assert_eq!(&args[..3], ["-m", "whisperx", "/shared/talk.wav"]);
		let joined = args.join(" ");
		assert!(joined.contains("--output_format json"));
		assert!(joined.contains("--model small"));
		assert!(joined.contains("--language en"));
		assert!(joined.contains("--temperature 0.5"));
		assert!(joined.contains("--batch_size 16"));
		assert!(joined.contains("--word_timestamps True"));
		assert!(!joined.contains("--model_dir"));
	}

	#[test]
	fn zero_temperature_is_omitted_and_local_model_dir_is_used() {
		let dir = tempfile::tempdir().unwrap();
		let config = whisperx_config(dir.path());
		std::fs::create_dir_all(config.model_directory.join("faster-whisper-small")).unwrap();
		let engine = WhisperXEngine::new(config);

		let args = args_as_strings(&engine.arguments(Path::new("a.wav"), Path::new("out"), &TranscriptionSettings::default()));
		assert!(!args.contains(&"--temperature".to_string()));
		assert!(args.contains(&"--model_dir".to_string()));
	}

	#[test]
	fn device_override_wins() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = whisperx_config(dir.path());
		config.device = Some("cuda".to_string());
		let engine = WhisperXEngine::new(config);

		let args = args_as_strings(&engine.arguments(Path::new("a.wav"), Path::new("out"), &TranscriptionSettings::default()));
		let device = args.iter().position(|a| a == "--device").unwrap();
		assert_eq!(args[device + 1], "cuda");
	}

	#[test]
	fn parses_segments_from_json() {
		let dir = tempfile::tempdir().unwrap();
		let json = r#"{
			"language": "en",
			"segments": [
				{"start": 0.0, "end": 1.5, "text": " hello there ", "words": [{"word": "hello", "start": 0.0, "end": 0.6, "score": 0.9}]},
				{"start": 1.5, "end": 3.25, "text": "general kenobi"}
			]
		}"#;
		std::fs::write(dir.path().join("talk.json"), json).unwrap();

		let output = parse_output(dir.path(), Path::new("/shared/talk.mp3"), &TranscriptionSettings::default()).unwrap();
		assert_eq!(output.text, "hello there general kenobi");
		assert_eq!(output.segments.len(), 2);
		assert_eq!(output.language.as_deref(), Some("en"));
		assert!((output.duration - 3.25).abs() < f64::EPSILON);
		assert_eq!(output.segments[0].words.as_ref().unwrap()[0].word, "hello");
		assert_eq!(output.model, "small");
	}

	#[test]
	fn falls_back_to_text_output() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("talk.json"), "not json").unwrap();
		std::fs::write(dir.path().join("talk.txt"), "plain words\n").unwrap();

		let output = parse_output(dir.path(), Path::new("talk.wav"), &TranscriptionSettings::default()).unwrap();
		assert_eq!(output.text, "plain words");
		assert_eq!(output.segments.len(), 1);
	}

	#[test]
	fn missing_output_is_invalid() {
		let dir = tempfile::tempdir().unwrap();
		let err = parse_output(dir.path(), Path::new("talk.wav"), &TranscriptionSettings::default()).unwrap_err();
		assert!(matches!(err, EngineError::InvalidOutput(_)));
	}

	#[test]
	fn lists_installed_and_stock_models() {
		let dir = tempfile::tempdir().unwrap();
		let config = whisperx_config(dir.path());
		std::fs::create_dir_all(config.model_directory.join("faster-whisper-large-v3")).unwrap();
		std::fs::create_dir_all(config.model_directory.join("faster-whisper-small")).unwrap();
		std::fs::create_dir_all(config.model_directory.join("unrelated")).unwrap();
		let engine = WhisperXEngine::new(config);

		assert_eq!(engine.available_models(), ["base", "large", "large-v3", "medium", "small", "tiny"]);
	}

	#[test]
	fn tail_keeps_the_end() {
		assert_eq!(tail_chars("abcdef", 3), "def");
		assert_eq!(tail_chars("abc", 10), "abc");
	}

	#[tokio::test]
	async fn missing_interpreter_is_unavailable() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = whisperx_config(dir.path());
		config.python = "definitely-not-an-interpreter-7f3a".to_string();
		let engine = WhisperXEngine::new(config);

		assert!(!engine.is_available().await);
		let err = engine.transcribe(Path::new("a.wav"), &TranscriptionSettings::default(), CancellationToken::new()).await.unwrap_err();
		assert!(matches!(err, EngineError::Unavailable(_)));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn non_zero_exit_is_a_failure() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = whisperx_config(dir.path());
		config.python = "false".to_string();
		let engine = WhisperXEngine::new(config);

		let err = engine.transcribe(Path::new("a.wav"), &TranscriptionSettings::default(), CancellationToken::new()).await.unwrap_err();
		assert!(matches!(err, EngineError::Failed(_)));
	}
}
