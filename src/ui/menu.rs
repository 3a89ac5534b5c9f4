use anyhow::Result;

use super::Screen;
use crate::engines::youtube::{AudioBitrate, VideoQuality};
use crate::engines::{Category, Mode};

/// Main menu selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Download(Category),
    Exit,
}

pub fn parse_category(input: &str) -> Option<MenuChoice> {
    match input.trim() {
        "1" => Some(MenuChoice::Download(Category::YoutubeVideo)),
        "2" => Some(MenuChoice::Download(Category::YoutubeMusic)),
        "3" => Some(MenuChoice::Download(Category::Spotify)),
        "0" => Some(MenuChoice::Exit),
        _ => None,
    }
}

/// Anything but "2" is a single item
pub fn parse_mode(input: &str) -> Mode {
    Mode::from_playlist_flag(input.trim() == "2")
}

pub fn parse_video_quality(input: &str) -> VideoQuality {
    match input.trim() {
        "1" => VideoQuality::Low,
        "2" => VideoQuality::Medium,
        "3" => VideoQuality::High,
        _ => VideoQuality::Best,
    }
}

pub fn parse_audio_bitrate(input: &str) -> AudioBitrate {
    match input.trim() {
        "1" => AudioBitrate::Low,
        "2" => AudioBitrate::Medium,
        "4" => AudioBitrate::High,
        "5" => AudioBitrate::Insane,
        _ => AudioBitrate::Standard,
    }
}

impl Screen {
    /// `None` for an unrecognised entry
    pub async fn main_menu(&self) -> Result<Option<MenuChoice>> {
        self.say("Main Category Selection");
        for (index, category) in Category::ALL.iter().enumerate() {
            self.say(format!("  {}. {}", index + 1, category));
        }
        self.say("  0. Exit Application");

        Ok(parse_category(&self.ask("→ ").await?))
    }

    pub async fn mode_menu(&self) -> Result<Mode> {
        self.say("Mode Selection");
        self.say("  1. Single Item");
        self.say("  2. Playlist");

        Ok(parse_mode(&self.ask("→ ").await?))
    }

    pub async fn video_quality_menu(&self) -> Result<VideoQuality> {
        self.say("MP4 Quality Selection");
        self.say("  1. Low (~360p)");
        self.say("  2. Medium (~480p–720p)");
        self.say("  3. High (~720p–1080p)");
        self.say("  4. Best (highest available) [default]");

        Ok(parse_video_quality(&self.ask("→ ").await?))
    }

    pub async fn audio_bitrate_menu(&self) -> Result<AudioBitrate> {
        self.say("MP3 Bitrate Selection");
        self.say("  1. Low (96 kbps)");
        self.say("  2. Medium (128 kbps)");
        self.say("  3. Standard (192 kbps) [default]");
        self.say("  4. High (256 kbps)");
        self.say("  5. Insane (320 kbps)");

        Ok(parse_audio_bitrate(&self.ask("→ ").await?))
    }
}
