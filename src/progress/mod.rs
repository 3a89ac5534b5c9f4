use console::strip_ansi_codes;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ui::Theme;

/// Severity attached to a log line emitted by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Raw status event produced by an engine during a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Byte transfer in progress; `percent` is the engine's unparsed percentage text
    Downloading { percent: String },

    /// The engine finished transferring the current file
    Finished,

    /// Free-form output line
    Log { level: LogLevel, line: String },
}

/// Human-readable stage of a download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Waiting,
    Downloading,
    Downloaded,
    Merging,
    Processing,
    AlreadyDownloaded,
    Complete,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Downloading => "Downloading",
            Phase::Downloaded => "Downloaded",
            Phase::Merging => "Merging",
            Phase::Processing => "Processing",
            Phase::AlreadyDownloaded => "Already downloaded",
            Phase::Complete => "Complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time view of an attempt's progress
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressSnapshot {
    /// Percent complete, always within 0..=100
    pub percent: f64,

    pub phase: Phase,
}

/// Capability handed to engines for reporting what they are doing.
///
/// Engines never see the concrete reporter; anything that can record a log line and a
/// progress event can stand in for it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StatusEvent);

    fn record(&self, level: LogLevel, message: &str) {
        self.emit(StatusEvent::Log {
            level,
            line: message.to_string(),
        });
    }
}

const MERGE_MARKERS: &[&str] = &["[merger]", "merging formats"];
const PROCESS_MARKERS: &[&str] = &[
    "[extractaudio]",
    "[videoconvertor]",
    "[videoremuxer]",
    "[fixupm3u8]",
    "[fixupm4a]",
    "post-process",
];
const ALREADY_DOWNLOADED_MARKERS: &[&str] = &["has already been downloaded", "file already exists"];

/// Map a log line onto the terminal phase it announces, if any
pub fn terminal_phase(line: &str) -> Option<Phase> {
    let lower = line.to_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if matches(ALREADY_DOWNLOADED_MARKERS) {
        Some(Phase::AlreadyDownloaded)
    } else if matches(MERGE_MARKERS) {
        Some(Phase::Merging)
    } else if matches(PROCESS_MARKERS) {
        Some(Phase::Processing)
    } else {
        None
    }
}

/// Parse an engine percentage such as `" \x1b[0;94m 42.5%\x1b[0m"`.
///
/// Returns `None` for anything that does not survive cleanup, so callers can keep their
/// last good value.
pub fn parse_percent(raw: &str) -> Option<f64> {
    let cleaned: String = strip_ansi_codes(raw).chars().filter(|c| !c.is_control()).collect();
    let value = cleaned
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()?;

    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

/// Progress state machine for a single attempt.
///
/// Once a completion signal forces the percentage to 100 it stays there until [`reset`]
/// is called for the next attempt.
///
/// [`reset`]: ProgressState::reset
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    percent: f64,
    phase: Phase,
    settled: bool,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event, returning whether the visible snapshot changed
    pub fn apply(&mut self, event: &StatusEvent) -> bool {
        let before = self.snapshot();

        match event {
            StatusEvent::Downloading { percent } => {
                if !self.settled {
                    if let Some(value) = parse_percent(percent) {
                        self.percent = value;
                    }
                    self.phase = Phase::Downloading;
                }
            }
            StatusEvent::Finished => self.settle(Phase::Downloaded),
            StatusEvent::Log { line, .. } => {
                if let Some(phase) = terminal_phase(line) {
                    self.settle(phase);
                }
            }
        }

        self.snapshot() != before
    }

    /// Mark the attempt as successfully completed
    pub fn complete(&mut self) {
        self.settle(Phase::Complete);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.percent,
            phase: self.phase,
        }
    }

    fn settle(&mut self, phase: Phase) {
        self.percent = 100.0;
        self.settled = true;
        if self.phase != Phase::Complete {
            self.phase = phase;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Terminal progress view driven by engine events.
///
/// One bar is created per attempt; engine output lines are printed above it.
pub struct ProgressReporter {
    state: Mutex<ProgressState>,
    bar: Mutex<Option<ProgressBar>>,
    theme: Theme,
    visible: bool,
}

impl ProgressReporter {
    pub fn new(theme: Theme) -> Self {
        Self {
            state: Mutex::new(ProgressState::new()),
            bar: Mutex::new(None),
            theme,
            visible: true,
        }
    }

    /// Reporter that tracks state but draws nothing
    pub fn hidden() -> Self {
        Self {
            visible: false,
            ..Self::new(Theme::default())
        }
    }

    /// Reset the view for a fresh attempt
    pub fn begin_attempt(&self, attempt: u32, ceiling: u32) {
        lock(&self.state).reset();

        let bar = if self.visible {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template(
                    "{prefix:.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_prefix(format!("attempt {}/{}", attempt, ceiling));
        bar.set_message(Phase::Waiting.label());

        if let Some(previous) = lock(&self.bar).replace(bar) {
            previous.finish_and_clear();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        lock(&self.state).snapshot()
    }

    /// Close the current attempt's bar as complete
    pub fn finish(&self) {
        let snapshot = {
            let mut state = lock(&self.state);
            state.complete();
            state.snapshot()
        };

        if let Some(bar) = lock(&self.bar).take() {
            bar.set_position(snapshot.percent as u64);
            bar.finish_with_message(snapshot.phase.label());
        }
    }

    /// Stop the current attempt's bar, leaving it on screen with a message
    pub fn abandon(&self, message: impl Into<String>) {
        if let Some(bar) = lock(&self.bar).take() {
            bar.abandon_with_message(message.into());
        }
    }

    fn print_line(&self, level: LogLevel, line: &str) {
        if !self.visible || line.trim().is_empty() {
            return;
        }

        let styled = match level {
            LogLevel::Debug => return,
            LogLevel::Info => self.theme.muted.apply_to(line),
            LogLevel::Warning => self.theme.warning.apply_to(line),
            LogLevel::Error => self.theme.error.apply_to(line),
        };

        match lock(&self.bar).as_ref() {
            Some(bar) => bar.println(styled.to_string()),
            None => println!("{}", styled),
        }
    }
}

impl EventSink for ProgressReporter {
    fn emit(&self, event: StatusEvent) {
        if let StatusEvent::Log { level, line } = &event {
            tracing::debug!(?level, "engine: {}", line);
            self.print_line(*level, line);
        }

        let (changed, snapshot) = {
            let mut state = lock(&self.state);
            let changed = state.apply(&event);
            (changed, state.snapshot())
        };

        if changed {
            if let Some(bar) = lock(&self.bar).as_ref() {
                bar.set_position(snapshot.percent as u64);
                bar.set_message(snapshot.phase.label());
            }
        }
    }
}
