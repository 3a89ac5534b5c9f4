use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::EngineFailure;

/// Lines of combined output kept for diagnostics
const TAIL_LINES: usize = 40;

/// Exit status and trailing output of a finished engine process
#[derive(Debug)]
pub struct ProcessTranscript {
    pub status: ExitStatus,

    /// Last lines of combined stdout/stderr, oldest first
    pub tail: Vec<String>,
}

impl ProcessTranscript {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The last `count` output lines joined with newlines
    pub fn tail_text(&self, count: usize) -> String {
        let start = self.tail.len().saturating_sub(count);
        self.tail[start..].join("\n")
    }
}

/// Run `command`, feeding every stdout/stderr line to `on_line` as it arrives.
///
/// Carriage-return redraws are split into separate lines and invalid UTF-8 is replaced.
/// The child is killed if the returned future is dropped.
pub async fn stream_lines<F>(
    mut command: Command,
    program: &str,
    mut on_line: F,
) -> Result<ProcessTranscript, EngineFailure>
where
    F: FnMut(&str) + Send,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| EngineFailure::launch(format!("Failed to launch {}: {}", program, e)))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    while let Some(line) = rx.recv().await {
        on_line(&line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| EngineFailure::new(format!("Failed to wait for {}: {}", program, e)))?;

    tracing::debug!(program, %status, "engine process exited");

    Ok(ProcessTranscript {
        status,
        tail: tail.into(),
    })
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                for segment in text.split(['\r', '\n']).filter(|s| !s.trim().is_empty()) {
                    if tx.send(segment.to_string()).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
