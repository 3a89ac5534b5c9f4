use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engines::youtube::{AudioBitrate, VideoQuality};

#[derive(Parser)]
#[command(
    name = "crystalmedia",
    about = "CrystalMedia - Download YouTube videos, YouTube music and Spotify tracks from the terminal",
    version,
    long_about = "A terminal media downloader built on yt-dlp and spotdl. Run without a subcommand for the interactive menu. Failed downloads are retried with backoff, and throttled requests rotate their User-Agent."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file to use instead of the default location
    #[arg(short, long, global = true, value_name = "FILE", env = "CRYSTALMEDIA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the downloads folder from the configuration
    #[arg(long, global = true, value_name = "DIR")]
    pub downloads_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a YouTube video (or playlist) as MP4
    Video {
        /// Video or playlist URL
        #[arg(value_name = "URL")]
        url: String,

        /// Treat the URL as a playlist
        #[arg(short, long)]
        playlist: bool,

        /// MP4 quality preset
        #[arg(long, value_enum, default_value = "best")]
        quality: VideoQuality,
    },

    /// Download YouTube audio (or a playlist) as MP3
    Music {
        /// Video or playlist URL
        #[arg(value_name = "URL")]
        url: String,

        /// Treat the URL as a playlist
        #[arg(short, long)]
        playlist: bool,

        /// MP3 bitrate preset
        #[arg(long, value_enum, default_value = "standard")]
        bitrate: AudioBitrate,
    },

    /// Rip a Spotify track or playlist through spotdl
    Spotify {
        /// Track, album or playlist URL
        #[arg(value_name = "URL")]
        url: String,

        /// Treat the URL as a playlist
        #[arg(short, long)]
        playlist: bool,
    },

    /// Show or locate the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that the external engines are installed
    Deps,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_interactive() {
        let cli = Cli::try_parse_from(["crystalmedia", "--quiet"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.quiet);
    }

    #[test]
    fn test_video_subcommand() {
        let cli = Cli::try_parse_from([
            "crystalmedia",
            "video",
            "https://youtu.be/abc",
            "--playlist",
            "--quality",
            "high",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Video { url, playlist, quality }) => {
                assert_eq!(url, "https://youtu.be/abc");
                assert!(playlist);
                assert_eq!(quality, VideoQuality::High);
            }
            _ => panic!("expected video subcommand"),
        }
    }

    #[test]
    fn test_music_bitrate_defaults_to_standard() {
        let cli = Cli::try_parse_from(["crystalmedia", "music", "https://youtu.be/abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Music { bitrate: AudioBitrate::Standard, playlist: false, .. })
        ));
    }
}
