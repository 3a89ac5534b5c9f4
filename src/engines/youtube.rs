use async_trait::async_trait;
use clap::ValueEnum;
use std::path::PathBuf;
use tokio::process::Command;

use super::process::stream_lines;
use super::{DownloadMetadata, DownloadRequest, Engine, EngineFailure, MediaKind, Mode};
use crate::config::YoutubeConfig;
use crate::orchestrator::{IdentityPool, RetryPolicy, Vocabulary};
use crate::progress::{EventSink, LogLevel, StatusEvent};

/// Prefix of the machine-readable progress lines requested from yt-dlp
const PROGRESS_MARKER: &str = "crystal-progress|";
const PROGRESS_TEMPLATE: &str =
    "download:crystal-progress|%(progress.status)s|%(progress._percent_str)s";

/// MP4 quality presets
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoQuality {
    /// Around 360p
    Low,
    /// Up to 720p
    Medium,
    /// Up to 1080p
    High,
    /// Highest available
    #[default]
    Best,
}

impl VideoQuality {
    pub fn format_selector(&self) -> &'static str {
        match self {
            VideoQuality::Low => "bestvideo[height<=?360][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]",
            VideoQuality::Medium => "bestvideo[height<=?720][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]",
            VideoQuality::High => "bestvideo[height<=?1080][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]",
            VideoQuality::Best => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
        }
    }
}

/// MP3 bitrate presets
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioBitrate {
    /// 96 kbps
    Low,
    /// 128 kbps
    Medium,
    /// 192 kbps
    #[default]
    Standard,
    /// 256 kbps
    High,
    /// 320 kbps
    Insane,
}

impl AudioBitrate {
    pub fn kbps(&self) -> u32 {
        match self {
            AudioBitrate::Low => 96,
            AudioBitrate::Medium => 128,
            AudioBitrate::Standard => 192,
            AudioBitrate::High => 256,
            AudioBitrate::Insane => 320,
        }
    }
}

/// Video and music downloads through yt-dlp
pub struct YoutubeEngine {
    config: YoutubeConfig,
    video_quality: VideoQuality,
    audio_bitrate: AudioBitrate,
}

impl YoutubeEngine {
    pub fn new(config: YoutubeConfig) -> Self {
        Self {
            config,
            video_quality: VideoQuality::default(),
            audio_bitrate: AudioBitrate::default(),
        }
    }

    pub fn with_video_quality(mut self, quality: VideoQuality) -> Self {
        self.video_quality = quality;
        self
    }

    pub fn with_audio_bitrate(mut self, bitrate: AudioBitrate) -> Self {
        self.audio_bitrate = bitrate;
        self
    }

    /// yt-dlp output template for the request
    pub fn output_template(&self, request: &DownloadRequest) -> String {
        let file = match request.mode {
            Mode::Single => PathBuf::from("%(title)s.%(ext)s"),
            Mode::Playlist => PathBuf::from("%(playlist_title)s").join("%(title)s.%(ext)s"),
        };
        request.destination.join(file).to_string_lossy().into_owned()
    }

    /// Full yt-dlp argument list for one attempt
    pub fn build_args(&self, request: &DownloadRequest, identity: Option<&str>) -> Vec<String> {
        let pacing = self.config.pacing(request.mode);

        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "--output".into(),
            self.output_template(request),
            "--retries".into(),
            self.config.engine_retries.to_string(),
            "--fragment-retries".into(),
            self.config.fragment_retries.to_string(),
            "--keep-fragments".into(),
            "--concurrent-fragments".into(),
            "1".into(),
            "--sleep-requests".into(),
            pacing.sleep_requests.to_string(),
            "--sleep-interval".into(),
            pacing.sleep_interval.to_string(),
            "--max-sleep-interval".into(),
            pacing.max_sleep_interval.to_string(),
            "--format-sort".into(),
            "ext:mp4:m4a".into(),
        ];

        if let Some(identity) = identity {
            args.extend(["--user-agent".into(), identity.to_string()]);
        }

        args.push(match request.mode {
            Mode::Single => "--no-playlist".into(),
            Mode::Playlist => "--yes-playlist".into(),
        });

        match request.kind {
            MediaKind::Video => args.extend([
                "--format".into(),
                self.video_quality.format_selector().into(),
                "--remux-video".into(),
                "mp4".into(),
                "--recode-video".into(),
                "mp4".into(),
            ]),
            MediaKind::Audio => args.extend([
                "--format".into(),
                "bestaudio/best".into(),
                "--extract-audio".into(),
                "--audio-format".into(),
                "mp3".into(),
                "--audio-quality".into(),
                format!("{}K", self.audio_bitrate.kbps()),
            ]),
        }

        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

/// Interpret one yt-dlp output line as a status event
pub fn parse_line(line: &str) -> StatusEvent {
    if let Some(progress) = line.trim_start().strip_prefix(PROGRESS_MARKER) {
        let (status, percent) = progress.split_once('|').unwrap_or((progress, ""));
        match status.trim() {
            "downloading" => {
                return StatusEvent::Downloading {
                    percent: percent.to_string(),
                }
            }
            "finished" => return StatusEvent::Finished,
            _ => {}
        }
    }

    let level = if line.starts_with("ERROR:") {
        LogLevel::Error
    } else if line.starts_with("WARNING:") {
        LogLevel::Warning
    } else if line.starts_with("[debug]") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    StatusEvent::Log {
        level,
        line: line.to_string(),
    }
}

/// Output path announced by a yt-dlp log line, if any
pub fn output_path(line: &str) -> Option<PathBuf> {
    if let Some((_, rest)) = line.split_once("Merging formats into \"") {
        return rest.strip_suffix('"').map(PathBuf::from);
    }
    if let Some(rest) = line.strip_prefix("[download] ") {
        if let Some(path) = rest.strip_suffix(" has already been downloaded") {
            return Some(PathBuf::from(path));
        }
    }
    if line.starts_with('[') {
        if let Some((_, path)) = line.split_once("Destination: ") {
            return Some(PathBuf::from(path.trim()));
        }
    }
    None
}

#[async_trait]
impl Engine for YoutubeEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn retry_policy(&self, request: &DownloadRequest) -> RetryPolicy {
        RetryPolicy::new(
            self.config.max_attempts,
            self.config.pacing(request.mode).backoff.clone(),
            Vocabulary::new(&self.config.throttle_markers, &self.config.network_markers),
        )
    }

    fn identity_pool(&self) -> Option<IdentityPool> {
        IdentityPool::new(self.config.user_agents.clone())
    }

    async fn attempt(
        &self,
        request: &DownloadRequest,
        identity: Option<&str>,
        sink: &dyn EventSink,
    ) -> Result<DownloadMetadata, EngineFailure> {
        let mut command = Command::new(&self.config.binary);
        command.args(self.build_args(request, identity));

        let mut errors = Vec::new();
        let mut files: Vec<PathBuf> = Vec::new();

        let transcript = stream_lines(command, &self.config.binary, |line| {
            let event = parse_line(line);
            if let StatusEvent::Log { level: LogLevel::Error, line } = &event {
                errors.push(line.clone());
            }
            if let Some(path) = output_path(line) {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
            sink.emit(event);
        })
        .await?;

        if !transcript.success() {
            let message = if errors.is_empty() {
                let tail = transcript.tail_text(5);
                if tail.is_empty() {
                    format!("{} exited with {}", self.config.binary, transcript.status)
                } else {
                    tail
                }
            } else {
                errors.join("\n")
            };
            return Err(EngineFailure::new(message));
        }

        files.retain(|path| path.exists());
        Ok(DownloadMetadata::new(self.name(), files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YoutubeConfig;

    fn engine() -> YoutubeEngine {
        YoutubeEngine::new(YoutubeConfig::default())
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_video_args() {
        let request = DownloadRequest::new(
            "https://www.youtube.com/watch?v=abc",
            MediaKind::Video,
            Mode::Single,
            "downloads/YT VIDEO/Single",
        );
        let args = engine()
            .with_video_quality(VideoQuality::Medium)
            .build_args(&request, Some("agent-x"));

        assert_eq!(value_after(&args, "--user-agent"), Some("agent-x"));
        assert_eq!(value_after(&args, "--format"), Some(VideoQuality::Medium.format_selector()));
        assert_eq!(value_after(&args, "--recode-video"), Some("mp4"));
        assert_eq!(value_after(&args, "--retries"), Some("20"));
        assert_eq!(value_after(&args, "--fragment-retries"), Some("10"));
        assert_eq!(value_after(&args, "--sleep-interval"), Some("3"));
        assert_eq!(value_after(&args, "--max-sleep-interval"), Some("10"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(!args.contains(&"--extract-audio".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://www.youtube.com/watch?v=abc"));

        let template = PathBuf::from("downloads/YT VIDEO/Single")
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned();
        assert_eq!(value_after(&args, "--output"), Some(template.as_str()));
    }

    #[test]
    fn test_playlist_audio_args() {
        let request = DownloadRequest::new(
            "https://www.youtube.com/playlist?list=PL1",
            MediaKind::Audio,
            Mode::Playlist,
            "downloads/YT MUSIC/Playlist",
        );
        let args = engine()
            .with_audio_bitrate(AudioBitrate::Insane)
            .build_args(&request, None);

        assert!(!args.contains(&"--user-agent".to_string()));
        assert!(args.contains(&"--extract-audio".to_string()));
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert_eq!(value_after(&args, "--audio-quality"), Some("320K"));
        assert_eq!(value_after(&args, "--sleep-requests"), Some("2"));
        assert_eq!(value_after(&args, "--max-sleep-interval"), Some("15"));
        assert!(value_after(&args, "--output").unwrap().contains("%(playlist_title)s"));
    }

    #[test]
    fn test_playlist_backoff_is_wider() {
        let engine = engine();
        let single = engine.retry_policy(&DownloadRequest::new("u", MediaKind::Video, Mode::Single, "d"));
        let playlist = engine.retry_policy(&DownloadRequest::new("u", MediaKind::Video, Mode::Playlist, "d"));

        let (single_low, single_high) = single.backoff.bounds();
        let (playlist_low, playlist_high) = playlist.backoff.bounds();
        assert!(playlist_high - playlist_low > single_high - single_low);
        assert_eq!(single.max_attempts, 30);
        assert!(!single.abort_on_permanent);
    }

    #[test]
    fn test_parse_progress_lines() {
        assert_eq!(
            parse_line("crystal-progress|downloading|\x1b[0;94m 12.5%\x1b[0m"),
            StatusEvent::Downloading {
                percent: "\x1b[0;94m 12.5%\x1b[0m".to_string()
            }
        );
        assert_eq!(parse_line("crystal-progress|finished|100.0%"), StatusEvent::Finished);
        assert!(matches!(
            parse_line("ERROR: [youtube] abc: HTTP Error 429: Too Many Requests"),
            StatusEvent::Log { level: LogLevel::Error, .. }
        ));
        assert!(matches!(
            parse_line("[youtube] abc: Downloading webpage"),
            StatusEvent::Log { level: LogLevel::Info, .. }
        ));
    }

    #[test]
    fn test_output_paths() {
        assert_eq!(
            output_path("[download] Destination: downloads/YT VIDEO/Single/clip.f137.mp4"),
            Some(PathBuf::from("downloads/YT VIDEO/Single/clip.f137.mp4"))
        );
        assert_eq!(
            output_path("[Merger] Merging formats into \"downloads/YT VIDEO/Single/clip.mp4\""),
            Some(PathBuf::from("downloads/YT VIDEO/Single/clip.mp4"))
        );
        assert_eq!(
            output_path("[download] downloads/song.mp3 has already been downloaded"),
            Some(PathBuf::from("downloads/song.mp3"))
        );
        assert_eq!(output_path("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn test_identity_pool_comes_from_config() {
        let pool = engine().identity_pool().unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.current().starts_with("Mozilla/5.0"));
    }

    #[cfg(unix)]
    mod binary {
        use super::*;
        use crate::engines::test_helpers::fake_binary;
        use crate::orchestrator::ErrorClass;
        use crate::progress::ProgressReporter;
        use std::path::Path;

        fn engine_at(binary: &Path) -> YoutubeEngine {
            let mut config = YoutubeConfig::default();
            config.binary = binary.to_string_lossy().into_owned();
            YoutubeEngine::new(config)
        }

        fn request(dir: &Path) -> DownloadRequest {
            DownloadRequest::new(
                "https://www.youtube.com/watch?v=abc",
                MediaKind::Video,
                Mode::Single,
                dir.join("YT VIDEO").join("Single"),
            )
        }

        #[tokio::test]
        async fn test_failure_message_prefers_error_lines() {
            let dir = tempfile::tempdir().unwrap();
            let binary = fake_binary(
                dir.path(),
                "yt-dlp",
                "echo '[youtube] abc: Downloading webpage'\n\
                 echo 'ERROR: [youtube] abc: Video unavailable' >&2\n\
                 exit 1",
            );
            let engine = engine_at(&binary);
            let request = request(dir.path());

            let failure = engine
                .attempt(&request, Some("agent"), &ProgressReporter::hidden())
                .await
                .unwrap_err();

            assert!(!failure.launch_failed);
            assert_eq!(failure.message, "ERROR: [youtube] abc: Video unavailable");
            assert_eq!(
                engine.retry_policy(&request).vocabulary.classify(&failure.message),
                ErrorClass::Permanent
            );
        }

        #[tokio::test]
        async fn test_failure_message_falls_back_to_output_tail() {
            let dir = tempfile::tempdir().unwrap();
            let binary = fake_binary(
                dir.path(),
                "yt-dlp",
                "echo 'Traceback (most recent call last):'\n\
                 echo 'ConnectionResetError: [Errno 104] Connection reset by peer'\n\
                 exit 2",
            );
            let engine = engine_at(&binary);
            let request = request(dir.path());

            let failure = engine
                .attempt(&request, None, &ProgressReporter::hidden())
                .await
                .unwrap_err();

            assert_eq!(
                failure.message,
                "Traceback (most recent call last):\nConnectionResetError: [Errno 104] Connection reset by peer"
            );
            assert_eq!(
                engine.retry_policy(&request).vocabulary.classify(&failure.message),
                ErrorClass::TransientNetwork
            );
        }

        #[tokio::test]
        async fn test_silent_failure_reports_exit_status() {
            let dir = tempfile::tempdir().unwrap();
            let binary = fake_binary(dir.path(), "yt-dlp", "exit 7");

            let failure = engine_at(&binary)
                .attempt(&request(dir.path()), None, &ProgressReporter::hidden())
                .await
                .unwrap_err();

            assert!(failure.message.contains("exited with"));
            assert!(failure.message.contains('7'));
        }

        #[tokio::test]
        async fn test_success_reports_only_files_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let real = dir.path().join("clip.mp4");
            let ghost = dir.path().join("clip.f137.mp4");
            let script = format!(
                "echo '[download] Destination: {ghost}'\n\
                 echo 'crystal-progress|downloading| 50.0%'\n\
                 echo 'crystal-progress|finished|100.0%'\n\
                 echo '[Merger] Merging formats into \"{real}\"'\n\
                 : > '{real}'",
                ghost = ghost.display(),
                real = real.display(),
            );
            let binary = fake_binary(dir.path(), "yt-dlp", &script);
            let reporter = ProgressReporter::hidden();

            let metadata = engine_at(&binary)
                .attempt(&request(dir.path()), None, &reporter)
                .await
                .unwrap();

            assert_eq!(metadata.engine, "yt-dlp");
            assert_eq!(metadata.files, vec![real]);
            assert_eq!(reporter.snapshot().percent, 100.0);
        }
    }
}
