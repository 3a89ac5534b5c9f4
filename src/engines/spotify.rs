use async_trait::async_trait;
use tokio::process::Command;

use super::process::stream_lines;
use super::{DownloadMetadata, DownloadRequest, Engine, EngineFailure, Mode};
use crate::config::SpotifyConfig;
use crate::orchestrator::{RetryPolicy, Vocabulary};
use crate::progress::{EventSink, LogLevel, StatusEvent};

/// Track and playlist rips through spotdl.
///
/// spotdl reports nothing structured, so its combined output is both the progress feed and
/// the only failure signal.
pub struct SpotifyEngine {
    config: SpotifyConfig,
}

impl SpotifyEngine {
    pub fn new(config: SpotifyConfig) -> Self {
        Self { config }
    }

    /// spotdl output template for the request
    pub fn output_template(&self, request: &DownloadRequest) -> String {
        let file = match request.mode {
            Mode::Single => "{artist} - {title}.{output-ext}",
            Mode::Playlist => "{list-name}/{artist} - {title}.{output-ext}",
        };
        request.destination.join(file).to_string_lossy().into_owned()
    }

    pub fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        vec![
            request.url.clone(),
            "--output".into(),
            self.output_template(request),
            "--threads".into(),
            self.config.threads.to_string(),
            "--max-retries".into(),
            self.config.engine_retries.to_string(),
            "--no-cache".into(),
            "--simple-tui".into(),
        ]
    }

    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::new(&self.config.throttle_markers, Vec::<String>::new())
    }
}

/// Throttle lines kept for the failure message even after they leave the output tail
const THROTTLE_LINES: usize = 5;

/// Interpret one spotdl output line as a status event
pub fn parse_line(line: &str) -> StatusEvent {
    let trimmed = line.trim_start();
    if trimmed.starts_with("Downloaded \"") {
        return StatusEvent::Finished;
    }

    let lower = trimmed.to_lowercase();
    let level = if lower.contains("error") || lower.contains("traceback") {
        LogLevel::Error
    } else if lower.contains("warning") {
        LogLevel::Warning
    } else {
        LogLevel::Info
    };

    StatusEvent::Log {
        level,
        line: line.to_string(),
    }
}

fn is_skipped(line: &str) -> bool {
    line.trim_start().starts_with("Skipping ") && line.to_lowercase().contains("already exists")
}

#[async_trait]
impl Engine for SpotifyEngine {
    fn name(&self) -> &'static str {
        "spotdl"
    }

    fn retry_policy(&self, request: &DownloadRequest) -> RetryPolicy {
        RetryPolicy::new(
            self.config.max_attempts,
            self.config.backoff(request.mode).clone(),
            self.vocabulary(),
        )
        .abort_on_permanent(true)
    }

    async fn attempt(
        &self,
        request: &DownloadRequest,
        _identity: Option<&str>,
        sink: &dyn EventSink,
    ) -> Result<DownloadMetadata, EngineFailure> {
        let mut command = Command::new(&self.config.binary);
        command.args(self.build_args(request));

        let vocabulary = self.vocabulary();
        let mut completed = 0usize;
        let mut throttled: Vec<String> = Vec::new();
        let transcript = stream_lines(command, &self.config.binary, |line| {
            if throttled.len() < THROTTLE_LINES
                && vocabulary.classify(line).is_transient()
                && !throttled.iter().any(|seen| seen == line)
            {
                throttled.push(line.to_string());
            }

            let event = parse_line(line);
            if event == StatusEvent::Finished || is_skipped(line) {
                completed += 1;
            }
            sink.emit(event);
        })
        .await?;

        if !transcript.success() {
            // Lines that scrolled out of the tail still carry the classification signal
            let output = throttled
                .iter()
                .filter(|line| !transcript.tail.contains(*line))
                .chain(transcript.tail.iter())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n");
            let message = if output.trim().is_empty() {
                format!("{} exited with {}", self.config.binary, transcript.status)
            } else {
                output
            };
            return Err(EngineFailure::new(message));
        }

        let mut metadata = DownloadMetadata::new(self.name(), Vec::new());
        metadata.completed_items = completed;
        Ok(metadata)
    }
}
