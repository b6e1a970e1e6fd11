//! Scheduling and durable-state core of the audio transcriber.
//!
//! Work for a file enters through [`TaskCoordinator::submit`] (API or discovery), waits in the
//! [`WorkQueue`], and is executed by the [`WorkerPool`] against a [`TranscriptionEngine`]. All
//! state that must survive a restart lives as JSON markers beside the audio in the shared directory.

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod pool;
pub mod priority_queue;
pub mod records;
pub mod status_store;
pub mod task;
pub mod worker;

pub use config::SchedulerConfig;
pub use coordinator::{DeletionReport, QueueSnapshot, RecoveryReport, StatusReport, SubmitOutcome, SubmitRequest, SubmitStatus, TaskCoordinator, TaskEvent};
pub use discovery::FileDiscovery;
pub use engine::{EngineOutput, TranscriptionEngine};
pub use error::{EngineError, ErrorCode, QueueError};
pub use pool::WorkerPool;
pub use priority_queue::WorkQueue;
pub use records::{InProgressRecord, ResultRecord, Segment, Word};
pub use status_store::StatusStore;
pub use task::{ComputeType, Device, Priority, TaskStatus, TranscriptionSettings, WhisperModel, WorkItem};
