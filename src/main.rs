use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crystalmedia::cli::{Cli, Commands};
use crystalmedia::config::Config;
use crystalmedia::engines::{self, Category, Mode};
use crystalmedia::session::{Interrupts, Job, JobStatus, Session};
use crystalmedia::ui::{Screen, Theme};
use crystalmedia::{utils, CrystalError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "crystalmedia=debug" } else { "crystalmedia=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::load(cli.config.as_deref()).await?;
    if let Some(dir) = cli.downloads_dir.clone() {
        config.app.downloads_dir = dir;
    }

    match cli.command {
        None => {
            engines::create_folders(&config.app.downloads_dir)?;
            warn_missing_dependencies().await;

            let screen = Screen::new(Theme::default(), config.app.show_splash);
            screen.say("Output folders initialized.");
            let session = Session::new(config, screen, Interrupts::install(), cli.quiet);
            session.interactive().await?;
        }
        Some(Commands::Video { url, playlist, quality }) => {
            let mut job = Job::new(Category::YoutubeVideo, url, Mode::from_playlist_flag(playlist));
            job.video_quality = quality;
            run_once(config, job, cli.quiet).await?;
        }
        Some(Commands::Music { url, playlist, bitrate }) => {
            let mut job = Job::new(Category::YoutubeMusic, url, Mode::from_playlist_flag(playlist));
            job.audio_bitrate = bitrate;
            run_once(config, job, cli.quiet).await?;
        }
        Some(Commands::Spotify { url, playlist }) => {
            let job = Job::new(Category::Spotify, url, Mode::from_playlist_flag(playlist));
            run_once(config, job, cli.quiet).await?;
        }
        Some(Commands::Config { show }) => {
            if show {
                config.display();
            } else {
                println!("Configuration file:");
                println!("  {}", Config::config_path(cli.config.as_deref())?.display());
            }
        }
        Some(Commands::Deps) => {
            let missing = utils::check_dependencies().await;
            if missing.is_empty() {
                println!("All external tools found: yt-dlp, ffmpeg, spotdl");
            } else {
                return Err(CrystalError::EngineUnavailable(missing.join(", ")).into());
            }
        }
    }

    Ok(())
}

/// Download a single job outside the menu, failing the process if it does not complete
async fn run_once(config: Config, job: Job, quiet: bool) -> Result<()> {
    engines::create_folders(&config.app.downloads_dir)?;
    warn_missing_dependencies().await;

    let screen = Screen::new(Theme::default(), false);
    let session = Session::new(config, screen, Interrupts::install(), quiet);

    match session.download(&job).await? {
        JobStatus::Completed => Ok(()),
        JobStatus::Failed => anyhow::bail!("Download failed: {}", job.url),
        JobStatus::Cancelled => anyhow::bail!("Download cancelled: {}", job.url),
    }
}

/// Check for required external dependencies (non-fatal)
async fn warn_missing_dependencies() {
    let missing_deps = utils::check_dependencies().await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}
