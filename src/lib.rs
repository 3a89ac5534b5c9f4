//! CrystalMedia - a terminal media downloader
//!
//! This library wraps the `yt-dlp` and `spotdl` command-line engines behind a retry/backoff
//! orchestrator and a progress reporter, so that flaky, throttled downloads are retried with
//! rotated request identities and surfaced to the user as a single progress view.

pub mod cli;
pub mod config;
pub mod engines;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod ui;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use engines::{DownloadMetadata, DownloadRequest, Engine, EngineFailure, MediaKind, Mode};
pub use orchestrator::{Orchestrator, Outcome, RetryPolicy, RetryState};
pub use progress::{EventSink, ProgressReporter, ProgressSnapshot, StatusEvent};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to CrystalMedia
#[derive(thiserror::Error, Debug)]
pub enum CrystalError {
    #[error("Unsupported URL format: {0}")]
    UnsupportedUrl(String),

    #[error("Download cancelled during attempt {attempts}")]
    Cancelled { attempts: u32 },

    #[error("Engine not available: {0}")]
    EngineUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File operation failed: {0}")]
    FileError(String),

    #[error("Input stream closed")]
    InputClosed,
}
