// Front-end session driven with in-memory adapters
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

use ytmdl::queue::{
    FetchError, FetchOutcome, FetchRequest, Fetcher, FetcherCapabilities, GroupKey, ItemSpec,
    ProgressCallback, QueueConfig, Resolution, ResolveError, Resolver,
};
use ytmdl::settings::Settings;
use ytmdl::{Command, Flow, Overrides, Session};

struct PlaylistResolver {
    playlists: HashMap<String, Resolution>,
}

impl PlaylistResolver {
    fn new() -> Self {
        Self {
            playlists: HashMap::new(),
        }
    }

    fn with_playlist(mut self, url: &str, title: &str, tracks: &[&str]) -> Self {
        let items = tracks
            .iter()
            .enumerate()
            .map(|(i, track)| {
                ItemSpec::new(
                    format!("https://www.youtube.com/watch?v={}", track),
                    format!("Song {}", track),
                    i as u32 + 1,
                    GroupKey::new("Artist", title),
                )
            })
            .collect();
        self.playlists
            .insert(url.to_string(), Resolution::new(title, items));
        self
    }
}

#[async_trait]
impl Resolver for PlaylistResolver {
    async fn resolve(&self, url: &str) -> Result<Resolution, ResolveError> {
        self.playlists
            .get(url)
            .cloned()
            .ok_or_else(|| ResolveError::not_found(format!("no playlist at {}", url)))
    }

    fn name(&self) -> &str {
        "playlist"
    }
}

/// Succeeds for every source except those containing "gone"
struct ScriptedFetcher {
    capabilities: FetcherCapabilities,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            capabilities: FetcherCapabilities::all_disabled(),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest, progress: ProgressCallback) -> FetchOutcome {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if request.source_ref.contains("gone") {
            return FetchOutcome::Failed(FetchError::unavailable("Video unavailable"));
        }
        progress(1.0);
        FetchOutcome::Succeeded(PathBuf::from(format!("/music/{}.mp3", request.display_name)))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &FetcherCapabilities {
        &self.capabilities
    }
}

fn session(resolver: PlaylistResolver) -> Session {
    let config = QueueConfig::default()
        .with_concurrency(2)
        .with_backoff_ms(1);
    Session::with_adapters(
        Settings::default(),
        config,
        Arc::new(resolver),
        Arc::new(ScriptedFetcher::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_playlist_report_counts_unavailable_items() {
    let resolver = PlaylistResolver::new().with_playlist(
        "https://youtube.com/playlist?list=PL1",
        "Mix",
        &["aaa", "gone", "ccc"],
    );
    let mut session = session(resolver);

    session.submit("https://youtube.com/playlist?list=PL1");
    let submitted = session.wait_for_submissions().await;
    assert_eq!(submitted.len(), 1);
    assert_ok!(&submitted[0].result);

    session.controller().wait_until_idle().await;
    assert!(session.is_done());

    let report = session.report();
    assert_eq!(report[0], "Mix: Completed 2/3, 1 unavailable");
    assert_eq!(report[1], "  Song gone (skipped): Video unavailable");
    assert_eq!(report.len(), 2);

    session.shutdown().await;
}

#[tokio::test]
async fn test_failed_submission_is_reported() {
    let mut session = session(PlaylistResolver::new());

    session.submit("https://youtube.com/playlist?list=missing");
    let submitted = session.wait_for_submissions().await;

    let err = submitted[0].result.as_ref().unwrap_err();
    assert!(err.contains("no playlist at"));
    assert!(!session.has_pending_submissions());
    assert!(session.report().is_empty());
}

#[tokio::test]
async fn test_commands() {
    let resolver = PlaylistResolver::new().with_playlist("u1", "One", &["x"]);
    let mut session = session(resolver);

    assert_eq!(
        session.execute(Command::Add("u1".to_string())).await,
        Flow::Continue(Some("Resolving u1".to_string()))
    );
    session.wait_for_submissions().await;
    session.controller().wait_until_idle().await;

    assert_eq!(
        session.execute(Command::Retry).await,
        Flow::Continue(Some("No failed items to retry".to_string()))
    );
    assert_eq!(
        session.execute(Command::Cancel).await,
        Flow::Continue(Some("Nothing to cancel".to_string()))
    );

    assert_eq!(session.execute(Command::TogglePause).await, Flow::Continue(None));
    assert!(session.controller().is_paused());
    session.execute(Command::TogglePause).await;
    assert!(!session.controller().is_paused());

    assert_eq!(session.execute(Command::Quit).await, Flow::Quit);
}

#[tokio::test]
async fn test_save_command_writes_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ytdl-tui").join("config.json");
    let mut session = session(PlaylistResolver::new()).with_settings_path(&path);

    match session.execute(Command::Save).await {
        Flow::Continue(Some(message)) => assert!(message.starts_with("Settings saved to")),
        other => panic!("unexpected flow: {:?}", other),
    }

    let saved = assert_ok!(Settings::load_from(&path));
    assert_eq!(&saved, session.settings());
}

#[test]
fn test_overrides_take_precedence() {
    let overrides = Overrides {
        output_dir: Some(PathBuf::from("/srv/music")),
        audio_format: Some(ytmdl::queue::AudioFormat::Opus),
        audio_quality: Some(4),
        concurrency: Some(5),
        no_thumbnail: true,
        no_metadata: false,
    };

    let config = assert_ok!(overrides.queue_config(&Settings::default()));
    assert_eq!(config.concurrency, 5);
    assert_eq!(config.output.root_dir, PathBuf::from("/srv/music"));
    assert_eq!(config.output.audio_format, ytmdl::queue::AudioFormat::Opus);
    assert_eq!(config.output.audio_quality, 4);
    assert!(!config.output.embed_thumbnail);
    assert!(config.output.embed_metadata);

    let mut settings = Settings::default();
    overrides.apply(&mut settings);
    assert_eq!(settings.audio_format, "opus");
    assert_eq!(settings.audio_quality, "4");
}
