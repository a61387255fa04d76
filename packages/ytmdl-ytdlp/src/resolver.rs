//! Playlist and single-track resolution through `yt-dlp --flat-playlist`

use crate::config::YtDlpConfig;
use crate::parse::classify_resolve_failure;
use crate::paths::UNKNOWN_COMPONENT;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use ytmdl_core::{GroupKey, ItemSpec, Resolution, ResolveError, Resolver};

/// Top-level object printed by `--dump-single-json`
#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Option<Vec<Option<RawEntry>>>,
}

/// Flat playlist entry; unavailable entries come back as `null`
#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn entry_source(entry: &RawEntry) -> Option<String> {
    match (non_empty(&entry.url), non_empty(&entry.id)) {
        (Some(url), _) if url.starts_with("http") => Some(url.to_string()),
        (_, Some(id)) => Some(format!("https://www.youtube.com/watch?v={}", id)),
        (Some(url), None) => Some(url.to_string()),
        (None, None) => None,
    }
}

/// Build a resolution from yt-dlp's JSON dump of `url`
pub fn resolution_from_json(json: &str, url: &str) -> Result<Resolution, ResolveError> {
    let info: RawInfo = serde_json::from_str(json)
        .map_err(|e| ResolveError::tool(format!("unreadable yt-dlp output: {}", e)))?;

    let playlist_artist = non_empty(&info.uploader)
        .or_else(|| non_empty(&info.channel))
        .unwrap_or(UNKNOWN_COMPONENT)
        .to_string();

    let is_playlist = info.kind.as_deref() == Some("playlist") || info.entries.is_some();
    if !is_playlist {
        let title = non_empty(&info.title).unwrap_or(url).to_string();
        let source = non_empty(&info.webpage_url)
            .map(str::to_string)
            .unwrap_or_else(|| url.to_string());
        let item = ItemSpec::new(
            source,
            title.clone(),
            1,
            GroupKey::new(playlist_artist, UNKNOWN_COMPONENT),
        );
        return Ok(Resolution::new(title, vec![item]));
    }

    let playlist_title = non_empty(&info.title)
        .or_else(|| non_empty(&info.id))
        .unwrap_or(UNKNOWN_COMPONENT)
        .to_string();

    let items = info
        .entries
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let entry = entry?;
            let source = entry_source(&entry)?;
            let artist = non_empty(&entry.uploader)
                .or_else(|| non_empty(&entry.channel))
                .unwrap_or(&playlist_artist)
                .to_string();
            let title = non_empty(&entry.title)
                .or_else(|| non_empty(&entry.id))
                .unwrap_or(UNKNOWN_COMPONENT)
                .to_string();
            Some(ItemSpec::new(
                source,
                title,
                position as u32 + 1,
                GroupKey::new(artist, playlist_title.clone()),
            ))
        })
        .collect();

    Ok(Resolution::new(playlist_title, items))
}

/// Resolver backed by the yt-dlp executable
pub struct YtDlpResolver {
    config: YtDlpConfig,
}

impl YtDlpResolver {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn command(&self, url: &str) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .args(["--flat-playlist", "--dump-single-json", "--no-warnings"])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(YtDlpConfig::default())
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<Resolution, ResolveError> {
        debug!("Running {} to resolve {}", self.config.binary.display(), url);

        let output = self.command(url).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResolveError::tool(format!(
                    "{} not found. Install it with `pip install yt-dlp`",
                    self.config.binary.display()
                ))
            } else {
                ResolveError::tool(format!("failed to run yt-dlp: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_resolve_failure(&stderr, &output.status.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let resolution = resolution_from_json(&stdout, url)?;
        debug!(
            "Resolved {} into \"{}\" ({} items)",
            url,
            resolution.title,
            resolution.items.len()
        );
        Ok(resolution)
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}
