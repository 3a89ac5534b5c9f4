use anyhow::Result;
use std::time::Duration;

use crate::config::Config;
use crate::engines::spotify::SpotifyEngine;
use crate::engines::youtube::{AudioBitrate, VideoQuality, YoutubeEngine};
use crate::engines::{Category, Engine, Mode};
use crate::orchestrator::{FailureReason, Orchestrator, Outcome};
use crate::progress::ProgressReporter;
use crate::ui::menu::MenuChoice;
use crate::ui::{Screen, TerminalObserver};
use crate::utils::{truncate_diagnostic, validate_and_normalize_url};
use crate::CrystalError;

pub mod interrupt;

pub use interrupt::Interrupts;

/// Everything needed to start one download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub category: Category,
    pub url: String,
    pub mode: Mode,
    pub video_quality: VideoQuality,
    pub audio_bitrate: AudioBitrate,
}

impl Job {
    pub fn new(category: Category, url: impl Into<String>, mode: Mode) -> Self {
        Self {
            category,
            url: url.into(),
            mode,
            video_quality: VideoQuality::default(),
            audio_bitrate: AudioBitrate::default(),
        }
    }
}

/// How a job ended, from the user's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Wires menus, engines, the orchestrator and the terminal together
pub struct Session {
    config: Config,
    screen: Screen,
    interrupts: Interrupts,
    progress_bars: bool,
}

impl Session {
    pub fn new(config: Config, screen: Screen, interrupts: Interrupts, quiet: bool) -> Self {
        let progress_bars = config.app.progress_bars && !quiet;
        Self {
            config,
            screen,
            interrupts,
            progress_bars,
        }
    }

    fn engine(&self, job: &Job) -> Box<dyn Engine> {
        match job.category {
            Category::Spotify => Box::new(SpotifyEngine::new(self.config.spotify.clone())),
            Category::YoutubeVideo | Category::YoutubeMusic => Box::new(
                YoutubeEngine::new(self.config.youtube.clone())
                    .with_video_quality(job.video_quality)
                    .with_audio_bitrate(job.audio_bitrate),
            ),
        }
    }

    /// Run one job through its engine with retries
    pub async fn download(&self, job: &Job) -> Result<JobStatus> {
        let url = validate_and_normalize_url(&job.url)
            .map_err(|_| CrystalError::UnsupportedUrl(job.url.clone()))?;

        let request = job
            .category
            .request(url, job.mode, &self.config.app.downloads_dir);
        let target = request.destination.display().to_string();
        let engine = self.engine(job);

        match job.category {
            Category::Spotify => {
                self.screen.say(format!(
                    "Ripping {} → {}",
                    if job.mode.is_playlist() { "playlist" } else { "track" },
                    target
                ));
                self.screen.warn("WARNING: spotdl's shared Spotify key is heavily rate-limited (86400s bans).");
                self.screen.warn("Trying anyway. Update spotdl if this keeps failing: pip install --upgrade spotdl");
            }
            Category::YoutubeVideo | Category::YoutubeMusic => {
                let kind = match job.category {
                    Category::YoutubeVideo => "VIDEO",
                    _ => "AUDIO",
                };
                self.screen
                    .say(format!("Initiating {} {} Acquisition → {}", job.mode, kind, target));
            }
        }

        let armed = self.interrupts.arm();
        let reporter = if self.progress_bars {
            ProgressReporter::new(self.screen.theme().clone())
        } else {
            ProgressReporter::hidden()
        };
        let observer = TerminalObserver::new(self.screen.clone(), self.config.app.diagnostic_chars);

        let mut orchestrator = Orchestrator::new(engine.retry_policy(&request))
            .with_identities(engine.identity_pool())
            .with_cancellation(armed.token());

        let result = orchestrator
            .run(engine.as_ref(), &request, &reporter, &observer)
            .await;
        self.screen.restore_cursor();

        match result {
            Ok(Outcome::Completed { metadata, state }) => {
                tracing::info!(attempts = state.attempt, files = metadata.files.len(), "download finished");
                self.screen.say(format!("Download complete → {}", target));
                for file in &metadata.files {
                    self.screen.say(format!("  • {}", file.display()));
                }
                if metadata.files.is_empty() && metadata.completed_items > 0 {
                    self.screen.say(format!("  {} item(s) done", metadata.completed_items));
                }
                Ok(JobStatus::Completed)
            }
            Ok(Outcome::Failed { reason, state }) => {
                let diagnostic = state
                    .last_message
                    .as_deref()
                    .map(|m| truncate_diagnostic(m, self.config.app.diagnostic_chars))
                    .unwrap_or_default();

                match (reason, job.category) {
                    (FailureReason::Exhausted, Category::Spotify) => {
                        self.screen.error("Max retries reached. Wait 24h or update spotdl.");
                    }
                    (FailureReason::Exhausted, _) => {
                        self.screen.error("Max retries reached. Check connection or try again later.");
                    }
                    (FailureReason::Abandoned, _) => {
                        self.screen.error(format!(
                            "{} hit an error that retrying will not fix. Giving up after attempt {}.",
                            engine.name(),
                            state.attempt
                        ));
                    }
                }
                if !diagnostic.is_empty() {
                    self.screen.error(format!("Last error: {}", diagnostic));
                }
                Ok(JobStatus::Failed)
            }
            Err(CrystalError::Cancelled { attempts }) => {
                self.screen
                    .warn(format!("Download cancelled during attempt {}. Partial files were kept.", attempts));
                Ok(JobStatus::Cancelled)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Menu loop; returns when the user exits or input closes
    pub async fn interactive(&self) -> Result<()> {
        loop {
            self.screen.refresh();

            match self.menu_round().await {
                Ok(true) => {}
                Ok(false) => {
                    self.screen.refresh();
                    self.screen.say("Thank you for using CrystalMedia. Exiting.");
                    return Ok(());
                }
                Err(e) if matches!(e.downcast_ref::<CrystalError>(), Some(CrystalError::InputClosed)) => {
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!("menu round failed: {:#}", e);
                    self.screen.error(format!("Unexpected error: {:#}", e));
                    self.screen.say("Recovery in progress, returning to main menu.");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    /// One pass through the menus; `false` means the user chose to exit
    async fn menu_round(&self) -> Result<bool> {
        let category = match self.screen.main_menu().await? {
            Some(MenuChoice::Exit) => return Ok(false),
            Some(MenuChoice::Download(category)) => category,
            None => {
                self.screen.warn("Invalid category.");
                tokio::time::sleep(Duration::from_secs(2)).await;
                return Ok(true);
            }
        };

        self.screen.refresh();
        let mode = self.screen.mode_menu().await?;

        let mut job = Job::new(category, String::new(), mode);
        match category {
            Category::YoutubeVideo => {
                self.screen.refresh();
                job.video_quality = self.screen.video_quality_menu().await?;
            }
            Category::YoutubeMusic => {
                self.screen.refresh();
                job.audio_bitrate = self.screen.audio_bitrate_menu().await?;
            }
            Category::Spotify => {}
        }

        self.screen.refresh();
        job.url = self.screen.ask("Resource URL → ").await?;

        self.screen.refresh();
        if let Err(e) = self.download(&job).await {
            self.screen.error(format!("{:#}", e));
        }

        self.screen.ask("\nPress Enter to continue...").await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::Theme;

    fn session(config: Config) -> Session {
        Session::new(config, Screen::new(Theme::default(), false), Interrupts::default(), true)
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_any_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.app.downloads_dir = dir.path().to_path_buf();

        let err = session(config)
            .download(&Job::new(Category::YoutubeVideo, "not a url", Mode::Single))
            .await
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<CrystalError>(), Some(CrystalError::UnsupportedUrl(_))));
        assert!(!dir.path().join("YT VIDEO").exists());
    }

    #[tokio::test]
    async fn test_missing_engine_fails_without_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.app.downloads_dir = dir.path().to_path_buf();
        config.spotify.binary = "crystalmedia-missing-spotdl".to_string();

        let status = session(config)
            .download(&Job::new(
                Category::Spotify,
                "https://open.spotify.com/track/abc",
                Mode::Playlist,
            ))
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Failed);
        assert!(dir.path().join("SPOTIFY").join("Playlist").is_dir());
    }
}
