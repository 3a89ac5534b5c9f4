use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engines::Mode;
use crate::orchestrator::Backoff;
use crate::CrystalError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,

    /// yt-dlp engine settings
    pub youtube: YoutubeConfig,

    /// spotdl engine settings
    pub spotify: SpotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the category/mode folder tree
    pub downloads_dir: PathBuf,

    /// Show the banner above every menu screen
    pub show_splash: bool,

    /// Draw progress bars while downloading
    pub progress_bars: bool,

    /// Longest engine diagnostic shown after a failed attempt
    pub diagnostic_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    /// yt-dlp executable
    pub binary: String,

    /// Attempts before giving up on a request
    pub max_attempts: u32,

    /// yt-dlp's own `--retries`
    pub engine_retries: u32,

    /// yt-dlp's own `--fragment-retries`
    pub fragment_retries: u32,

    /// User-Agent pool rotated on throttling
    pub user_agents: Vec<String>,

    /// Failure markers that indicate rate limiting
    pub throttle_markers: Vec<String>,

    /// Failure markers that indicate connection trouble
    pub network_markers: Vec<String>,

    /// Pacing for single items
    pub single: PacingConfig,

    /// Pacing for playlists
    pub playlist: PacingConfig,
}

/// Request pacing handed to yt-dlp plus the backoff between our own attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    pub sleep_requests: f64,
    pub sleep_interval: f64,
    pub max_sleep_interval: f64,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    /// spotdl executable
    pub binary: String,

    /// Attempts before giving up on a request
    pub max_attempts: u32,

    /// spotdl's `--threads`
    pub threads: u32,

    /// spotdl's own `--max-retries`
    pub engine_retries: u32,

    /// Failure markers that indicate a rate limit or ban; anything else aborts
    pub throttle_markers: Vec<String>,

    pub single_backoff: Backoff,

    pub playlist_backoff: Backoff,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            show_splash: true,
            progress_bars: true,
            diagnostic_chars: 300,
        }
    }
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            max_attempts: 30,
            engine_retries: 20,
            fragment_retries: 10,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0".to_string(),
            ],
            throttle_markers: vec![
                "rate limit".to_string(),
                "throttl".to_string(),
                "429".to_string(),
                "too many requests".to_string(),
            ],
            network_markers: vec![
                "443".to_string(),
                "connect".to_string(),
                "timed out".to_string(),
                "reset by peer".to_string(),
            ],
            single: PacingConfig {
                sleep_requests: 1.0,
                sleep_interval: 3.0,
                max_sleep_interval: 10.0,
                backoff: Backoff::Jitter {
                    min_secs: 4.0,
                    max_secs: 10.0,
                },
            },
            playlist: PacingConfig {
                sleep_requests: 2.0,
                sleep_interval: 5.0,
                max_sleep_interval: 15.0,
                backoff: Backoff::Jitter {
                    min_secs: 5.0,
                    max_secs: 15.0,
                },
            },
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            binary: "spotdl".to_string(),
            max_attempts: 5,
            threads: 1,
            engine_retries: 10,
            throttle_markers: vec![
                "86400".to_string(),
                "rate".to_string(),
                "limit".to_string(),
                "403".to_string(),
            ],
            single_backoff: Backoff::Doubling {
                base_secs: 5.0,
                max_secs: 600.0,
            },
            playlist_backoff: Backoff::Doubling {
                base_secs: 10.0,
                max_secs: 900.0,
            },
        }
    }
}

impl YoutubeConfig {
    pub fn pacing(&self, mode: Mode) -> &PacingConfig {
        match mode {
            Mode::Single => &self.single,
            Mode::Playlist => &self.playlist,
        }
    }
}

impl SpotifyConfig {
    pub fn backoff(&self, mode: Mode) -> &Backoff {
        match mode {
            Mode::Single => &self.single_backoff,
            Mode::Playlist => &self.playlist_backoff,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(explicit)?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config = Self::from_yaml(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?;

            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        // A config next to the binary's working directory wins
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("crystalmedia").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.youtube.max_attempts == 0 || self.spotify.max_attempts == 0 {
            return Err(CrystalError::ConfigError("max_attempts must be at least 1".into()).into());
        }

        if self.youtube.user_agents.is_empty()
            || self.youtube.user_agents.iter().any(|ua| ua.trim().is_empty())
        {
            return Err(CrystalError::ConfigError(
                "youtube.user_agents must be non-empty User-Agent strings".into(),
            )
            .into());
        }

        if self.youtube.binary.trim().is_empty() || self.spotify.binary.trim().is_empty() {
            return Err(CrystalError::ConfigError("engine binary names must not be empty".into()).into());
        }

        let backoffs = [
            ("youtube.single.backoff", &self.youtube.single.backoff),
            ("youtube.playlist.backoff", &self.youtube.playlist.backoff),
            ("spotify.single_backoff", &self.spotify.single_backoff),
            ("spotify.playlist_backoff", &self.spotify.playlist_backoff),
        ];
        for (name, backoff) in backoffs {
            backoff
                .validate()
                .map_err(|e| CrystalError::ConfigError(format!("{}: {}", name, e)))?;
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Downloads Folder: {}", self.app.downloads_dir.display());
        println!("  Progress Bars: {}", self.app.progress_bars);
        println!("  yt-dlp Binary: {}", self.youtube.binary);
        println!("  yt-dlp Attempts: {}", self.youtube.max_attempts);
        println!("  User-Agent Pool: {} entries", self.youtube.user_agents.len());
        println!("  spotdl Binary: {}", self.spotify.binary);
        println!("  spotdl Attempts: {}", self.spotify.max_attempts);
    }
}
