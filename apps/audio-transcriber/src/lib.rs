//! HTTP service around the `transcription_queue` scheduler, running WhisperX as the engine.

pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod routes;
pub mod state;
pub mod types;
pub mod whisperx;

pub use config::{Config, LogFormat, WhisperXConfig};
pub use error::ApiError;
pub use routes::app;
pub use state::AppState;
pub use whisperx::WhisperXEngine;
