use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

pub mod process;
pub mod spotify;
pub mod youtube;

#[cfg(all(test, unix))]
pub(crate) mod test_helpers;

use crate::orchestrator::{IdentityPool, RetryPolicy};
use crate::progress::EventSink;

/// What the user wants out of the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Whether the URL names a single item or a whole playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Single,
    Playlist,
}

impl Mode {
    pub fn from_playlist_flag(playlist: bool) -> Self {
        if playlist {
            Mode::Playlist
        } else {
            Mode::Single
        }
    }

    pub fn is_playlist(&self) -> bool {
        matches!(self, Mode::Playlist)
    }

    /// Sub-folder name used under each category directory
    pub fn folder_name(&self) -> &'static str {
        match self {
            Mode::Single => "Single",
            Mode::Playlist => "Playlist",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Single => write!(f, "Single Item"),
            Mode::Playlist => write!(f, "Playlist"),
        }
    }
}

/// One logical download, fixed for the whole attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: MediaKind,
    pub mode: Mode,

    /// Directory the engine writes into; created before the first attempt
    pub destination: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, kind: MediaKind, mode: Mode, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            kind,
            mode,
            destination: destination.into(),
        }
    }
}

/// What a successful attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadMetadata {
    pub engine: String,

    /// Output files reported by the engine that exist on disk
    pub files: Vec<PathBuf>,

    /// Items the engine reported as done, including ones already present
    pub completed_items: usize,
}

impl DownloadMetadata {
    pub fn new(engine: impl Into<String>, files: Vec<PathBuf>) -> Self {
        let completed_items = files.len();
        Self {
            engine: engine.into(),
            files,
            completed_items,
        }
    }
}

/// Failure of a single engine invocation
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineFailure {
    /// Engine diagnostic text; the only input to error classification
    pub message: String,

    /// The engine process could not be started at all
    pub launch_failed: bool,
}

impl EngineFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            launch_failed: false,
        }
    }

    pub fn launch(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            launch_failed: true,
        }
    }
}

/// An external acquisition engine driven one attempt at a time
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short name used in logs and messages
    fn name(&self) -> &'static str;

    /// Retry parameters for this engine and request mode
    fn retry_policy(&self, request: &DownloadRequest) -> RetryPolicy;

    /// Identities to rotate through when throttled, if the engine supports them
    fn identity_pool(&self) -> Option<IdentityPool> {
        None
    }

    /// Perform exactly one download attempt
    async fn attempt(
        &self,
        request: &DownloadRequest,
        identity: Option<&str>,
        sink: &dyn EventSink,
    ) -> Result<DownloadMetadata, EngineFailure>;
}

/// Top-level download category, mapped onto its own folder and engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    YoutubeVideo,
    YoutubeMusic,
    Spotify,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::YoutubeVideo, Category::YoutubeMusic, Category::Spotify];

    pub fn folder_name(&self) -> &'static str {
        match self {
            Category::YoutubeVideo => "YT VIDEO",
            Category::YoutubeMusic => "YT MUSIC",
            Category::Spotify => "SPOTIFY",
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            Category::YoutubeVideo => MediaKind::Video,
            Category::YoutubeMusic | Category::Spotify => MediaKind::Audio,
        }
    }

    /// `<downloads>/<category>/<mode>`
    pub fn target_dir(&self, downloads_dir: &Path, mode: Mode) -> PathBuf {
        downloads_dir.join(self.folder_name()).join(mode.folder_name())
    }

    pub fn request(&self, url: impl Into<String>, mode: Mode, downloads_dir: &Path) -> DownloadRequest {
        DownloadRequest::new(url, self.media_kind(), mode, self.target_dir(downloads_dir, mode))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::YoutubeVideo => write!(f, "YouTube Video (MP4)"),
            Category::YoutubeMusic => write!(f, "YouTube Music (MP3)"),
            Category::Spotify => write!(f, "Spotify Track/Playlist"),
        }
    }
}

/// Create every category/mode folder under `downloads_dir`
pub fn create_folders(downloads_dir: &Path) -> anyhow::Result<()> {
    for category in Category::ALL {
        for mode in [Mode::Single, Mode::Playlist] {
            fs_err::create_dir_all(category.target_dir(downloads_dir, mode))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_layout() {
        let base = Path::new("downloads");
        assert_eq!(
            Category::YoutubeVideo.target_dir(base, Mode::Single),
            PathBuf::from("downloads/YT VIDEO/Single")
        );
        assert_eq!(
            Category::Spotify.target_dir(base, Mode::Playlist),
            PathBuf::from("downloads/SPOTIFY/Playlist")
        );

        let request = Category::YoutubeMusic.request("https://youtu.be/x", Mode::Playlist, base);
        assert_eq!(request.kind, MediaKind::Audio);
        assert_eq!(request.destination, PathBuf::from("downloads/YT MUSIC/Playlist"));
    }

    #[test]
    fn test_create_folders_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        create_folders(dir.path()).unwrap();
        create_folders(dir.path()).unwrap();

        for name in ["YT VIDEO", "YT MUSIC", "SPOTIFY"] {
            assert!(dir.path().join(name).join("Single").is_dir());
            assert!(dir.path().join(name).join("Playlist").is_dir());
        }
    }
}
