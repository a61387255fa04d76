use anyhow::Context;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use ytmdl::commands::{Command, HELP};
use ytmdl::logging::init_tracing;
use ytmdl::render::Renderer;
use ytmdl::settings::Settings;
use ytmdl::queue::AudioFormat;
use ytmdl::ytdlp::YtDlpConfig;
use ytmdl::{Flow, Overrides, Session};

const REFRESH_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "ytmdl")]
#[command(about = "Download YouTube playlists and tracks as tagged audio files")]
struct Cli {
    /// Playlist or track URLs to download
    urls: Vec<String>,

    /// Output directory (default: ~/Music)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Audio format: mp3, m4a, flac, wav or opus
    #[arg(short = 'f', long = "format")]
    audio_format: Option<AudioFormat>,

    /// Audio quality, 0 (best) to 9
    #[arg(short = 'q', long = "quality", value_parser = clap::value_parser!(u8).range(0..=9))]
    audio_quality: Option<u8>,

    /// Number of parallel downloads
    #[arg(short = 'j', long, value_parser = parse_concurrency)]
    concurrency: Option<usize>,

    /// Do not embed the thumbnail as cover art
    #[arg(long)]
    no_thumbnail: bool,

    /// Do not embed title/artist metadata
    #[arg(long)]
    no_metadata: bool,

    /// Save the effective settings as the new defaults
    #[arg(long)]
    save: bool,

    /// Debug logging (RUST_LOG overrides this)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            output_dir: self.output_dir.clone(),
            audio_format: self.audio_format,
            audio_quality: self.audio_quality,
            concurrency: self.concurrency,
            no_thumbnail: self.no_thumbnail,
            no_metadata: self.no_metadata,
        }
    }
}

/// Parse a positive worker count
fn parse_concurrency(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("concurrency must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid concurrency `{s}`: {e}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load_or_default();
    let mut session = Session::start(settings, &cli.overrides(), YtDlpConfig::from_env())
        .context("failed to start the download queue")?;

    if cli.save {
        let path = session.save_settings()?;
        println!("Settings saved to {}", path.display());
    }

    let interactive = std::io::stdin().is_terminal();
    for url in &cli.urls {
        session.submit(url.as_str());
    }
    if cli.urls.is_empty() && !interactive {
        return Ok(());
    }
    if interactive {
        println!("{}", HELP);
    }

    let renderer = Renderer::new();
    let mut events = session.controller().subscribe();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    let mut announced_done = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => renderer.event(&event),
                Err(RecvError::Lagged(missed)) => debug!("Renderer skipped {} events", missed),
                Err(RecvError::Closed) => break,
            },
            line = input.next_line(), if input_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<Command>() {
                    Ok(command) => match session.execute(command).await {
                        Flow::Quit => break,
                        Flow::Continue(Some(message)) => renderer.line(message),
                        Flow::Continue(None) => {}
                    },
                    Err(e) => renderer.line(e.to_string()),
                },
                Ok(None) => input_open = false,
                Err(e) => {
                    warn!("Could not read commands from stdin: {}", e);
                    input_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                renderer.line("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                for submitted in session.take_finished_submissions().await {
                    if let Err(e) = submitted.result {
                        renderer.line(format!("Could not add {}: {}", submitted.url, e));
                    }
                }
                renderer.update(&session.controller().snapshot());

                if session.is_done() {
                    if !interactive || !input_open {
                        break;
                    }
                    if !announced_done {
                        renderer.line("All downloads finished. Add more with `a URL` or press q to quit");
                        announced_done = true;
                    }
                } else {
                    announced_done = false;
                }
            }
        }
    }

    renderer.finish();
    session.shutdown().await;

    for line in session.report() {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_concurrency() {
        assert_eq!(parse_concurrency("4"), Ok(4));
        assert!(parse_concurrency("0").is_err());
        assert!(parse_concurrency("many").is_err());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "ytmdl",
            "-o",
            "/srv/music",
            "-f",
            "flac",
            "-q",
            "3",
            "-j",
            "2",
            "--no-thumbnail",
            "https://youtu.be/dQw4w9WgXcQ",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.output_dir, Some(PathBuf::from("/srv/music")));
        assert_eq!(overrides.audio_format, Some(AudioFormat::Flac));
        assert_eq!(overrides.audio_quality, Some(3));
        assert_eq!(overrides.concurrency, Some(2));
        assert!(overrides.no_thumbnail);
        assert!(!overrides.no_metadata);
        assert_eq!(cli.urls, vec!["https://youtu.be/dQw4w9WgXcQ"]);
    }

    #[test]
    fn test_cli_rejects_bad_quality() {
        assert!(Cli::try_parse_from(["ytmdl", "-q", "12"]).is_err());
        assert!(Cli::try_parse_from(["ytmdl", "-f", "ogg"]).is_err());
    }
}
