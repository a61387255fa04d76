//! Audio retrieval through a yt-dlp child process per item

use crate::config::YtDlpConfig;
use crate::parse::{classify_failure, parse_line, OutputLine};
use crate::paths;
use crate::process;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tracing::{debug, warn};
use ytmdl_core::{
    FetchError, FetchOutcome, FetchRequest, Fetcher, FetcherCapabilities, ItemId,
    ProgressCallback,
};

/// stderr lines kept for failure classification
const STDERR_TAIL: usize = 20;

#[derive(Debug)]
struct RunningFetch {
    pgid: u32,
    /// Suspension state; the output loop watches it to hold the stall timer
    paused: watch::Sender<bool>,
}

type Registry = Arc<Mutex<HashMap<ItemId, RunningFetch>>>;

/// Removes an item from the registry when its fetch ends, however it ends
struct Registration {
    registry: Registry,
    item_id: ItemId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.item_id);
    }
}

/// Command-line arguments for fetching one item
pub fn build_args(config: &YtDlpConfig, request: &FetchRequest) -> Vec<String> {
    let output = &request.output;
    let mut args = vec![
        "-x".to_string(),
        "--audio-format".to_string(),
        output.audio_format.extension().to_string(),
        "--audio-quality".to_string(),
        output.audio_quality.to_string(),
    ];
    if output.embed_thumbnail {
        args.push("--embed-thumbnail".to_string());
    }
    if output.embed_metadata {
        args.push("--embed-metadata".to_string());
    }
    args.extend([
        "--newline".to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        paths::output_template(request),
    ]);
    args.extend(config.extra_args.iter().cloned());
    args.push(request.source_ref.clone());
    args
}

async fn collect_tail(stderr: ChildStderr, limit: usize) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(limit);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("yt-dlp stderr: {}", line);
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

/// Fetcher backed by the yt-dlp executable
///
/// Every item runs in its own process group. On unix, pausing sends
/// SIGSTOP/SIGCONT to that group; cancelling kills it and removes the
/// partial files yt-dlp left next to the target.
pub struct YtDlpFetcher {
    config: YtDlpConfig,
    running: Registry,
    capabilities: FetcherCapabilities,
}

impl YtDlpFetcher {
    pub fn new(config: YtDlpConfig) -> Self {
        Self {
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
            capabilities: FetcherCapabilities {
                supports_pause: cfg!(unix),
                supports_cancellation: true,
            },
        }
    }

    /// Number of yt-dlp processes currently running
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    fn register(&self, item_id: &ItemId, pgid: u32) -> (Registration, watch::Receiver<bool>) {
        let (paused, watcher) = watch::channel(false);
        self.running
            .lock()
            .insert(item_id.clone(), RunningFetch { pgid, paused });
        let registration = Registration {
            registry: self.running.clone(),
            item_id: item_id.clone(),
        };
        (registration, watcher)
    }

    fn pgid(&self, item_id: &ItemId) -> Result<u32, FetchError> {
        self.running
            .lock()
            .get(item_id)
            .map(|running| running.pgid)
            .ok_or_else(|| FetchError::process(format!("no running download for {}", item_id)))
    }

    fn set_paused(&self, item_id: &ItemId, paused: bool) {
        if let Some(running) = self.running.lock().get(item_id) {
            running.paused.send_replace(paused);
        }
    }

    fn command(&self, request: &FetchRequest) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .args(build_args(&self.config, request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    async fn abort(&self, child: &mut Child, pgid: Option<u32>) {
        if let Some(pgid) = pgid {
            if let Err(e) = process::kill(pgid) {
                debug!("Could not kill process group {}: {}", pgid, e);
            }
        }
        if let Err(e) = child.kill().await {
            debug!("Could not kill yt-dlp: {}", e);
        }
    }

    async fn discard_partial(&self, request: &FetchRequest) {
        let dir = paths::item_dir(&request.output, &request.group_key);
        let stem = paths::item_stem(request);
        match paths::remove_partial_files(&dir, &stem).await {
            Ok(0) => {}
            Ok(removed) => debug!("Discarded {} partial files of {}", removed, request.item_id),
            Err(e) => warn!("Could not clean up partial files of {}: {}", request.item_id, e),
        }
    }

    fn handle_line(
        &self,
        request: &FetchRequest,
        line: &str,
        final_path: &mut Option<PathBuf>,
        progress: &ProgressCallback,
    ) {
        debug!("yt-dlp [{}]: {}", request.item_id, line);

        let Some(parsed) = parse_line(line) else {
            return;
        };
        if let Some(fraction) = parsed.progress() {
            progress(fraction);
        }
        match parsed {
            OutputLine::Extracted(path) => *final_path = Some(path),
            OutputLine::AlreadyDownloaded(path) if final_path.is_none() => {
                *final_path = Some(path)
            }
            OutputLine::Warning(message) => {
                warn!("yt-dlp warning for {}: {}", request.display_name, message)
            }
            _ => {}
        }
    }

    async fn run(
        &self,
        request: &FetchRequest,
        progress: &ProgressCallback,
    ) -> Result<PathBuf, FetchError> {
        if request.cancel.is_cancelled() {
            return Err(FetchError::cancelled("cancelled before start"));
        }

        tokio::fs::create_dir_all(paths::item_dir(&request.output, &request.group_key)).await?;

        let mut child = self.command(request).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::process(format!(
                    "{} not found. Install it with `pip install yt-dlp`",
                    self.config.binary.display()
                ))
            } else {
                FetchError::process(format!("failed to start yt-dlp: {}", e))
            }
        })?;

        let pgid = child.id();
        let (_registration, mut pause_watch) = match pgid {
            Some(pgid) => {
                let (registration, watcher) = self.register(&request.item_id, pgid);
                (Some(registration), Some(watcher))
            }
            None => (None, None),
        };
        debug!(
            "Started yt-dlp for {} (pid {:?}, attempt {})",
            request.item_id, pgid, request.attempt
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::process("yt-dlp stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::process("yt-dlp stderr was not captured"))?;
        let stderr_tail = tokio::spawn(collect_tail(stderr, STDERR_TAIL));

        let mut lines = BufReader::new(stdout).lines();
        let mut final_path = None;
        let stall = self.config.stall_timeout();

        // The stall timer restarts on every line and on every pause change,
        // and does not run while the process is suspended
        loop {
            let paused = pause_watch
                .as_mut()
                .map_or(false, |watcher| *watcher.borrow_and_update());
            tokio::select! {
                _ = request.cancel.cancelled() => {
                    self.abort(&mut child, pgid).await;
                    return Err(FetchError::cancelled("download cancelled"));
                }
                changed = async { pause_watch.as_mut()?.changed().await.ok() },
                    if pause_watch.is_some() =>
                {
                    if changed.is_none() {
                        pause_watch = None;
                    }
                }
                _ = tokio::time::sleep(stall), if !paused => {
                    self.abort(&mut child, pgid).await;
                    return Err(FetchError::timeout(format!(
                        "no output from yt-dlp for {}s",
                        stall.as_secs()
                    )));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(request, &line, &mut final_path, progress),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Could not read yt-dlp output: {}", e);
                        break;
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::process(format!("failed to wait for yt-dlp: {}", e)))?;
        let stderr = stderr_tail.await.unwrap_or_default();

        if request.cancel.is_cancelled() {
            return Err(FetchError::cancelled("download cancelled"));
        }
        if !status.success() {
            return Err(classify_failure(&stderr, &status.to_string()));
        }

        progress(1.0);
        Ok(final_path.unwrap_or_else(|| paths::expected_output_path(request)))
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new(YtDlpConfig::default())
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(&self, request: FetchRequest, progress: ProgressCallback) -> FetchOutcome {
        match self.run(&request, &progress).await {
            Ok(path) => FetchOutcome::Succeeded(path),
            Err(err) => {
                if request.cancel.is_cancelled() {
                    self.discard_partial(&request).await;
                }
                FetchOutcome::Failed(err)
            }
        }
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn capabilities(&self) -> &FetcherCapabilities {
        &self.capabilities
    }

    async fn pause(&self, item_id: &ItemId) -> Result<(), FetchError> {
        let pgid = self.pgid(item_id)?;
        // Hold the stall timer before the process goes quiet
        self.set_paused(item_id, true);
        if let Err(e) = process::suspend(pgid) {
            self.set_paused(item_id, false);
            return Err(e);
        }
        debug!("Suspended yt-dlp for {}", item_id);
        Ok(())
    }

    async fn resume(&self, item_id: &ItemId) -> Result<(), FetchError> {
        let pgid = self.pgid(item_id)?;
        process::resume(pgid)?;
        self.set_paused(item_id, false);
        debug!("Resumed yt-dlp for {}", item_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use ytmdl_core::{AudioFormat, GroupKey, OutputSpec};

    fn request(output: OutputSpec) -> FetchRequest {
        FetchRequest {
            item_id: ItemId::new("dQw4w9WgXcQ"),
            source_ref: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            display_name: "Song".to_string(),
            ordinal: 4,
            batch_len: 12,
            group_key: GroupKey::new("Artist", "Album"),
            output,
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_build_args() {
        let output = OutputSpec::new("/music")
            .with_format(AudioFormat::Flac)
            .with_quality(5);
        let args = build_args(&YtDlpConfig::default(), &request(output));

        assert_eq!(
            args,
            vec![
                "-x",
                "--audio-format",
                "flac",
                "--audio-quality",
                "5",
                "--embed-thumbnail",
                "--embed-metadata",
                "--newline",
                "--no-playlist",
                "-o",
                "/music/Artist/Album/04 - Song.%(ext)s",
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            ]
        );
    }

    #[test]
    fn test_build_args_without_embedding() {
        let mut output = OutputSpec::new("/music");
        output.embed_thumbnail = false;
        output.embed_metadata = false;
        let config = YtDlpConfig::new().with_extra_args(["--cookies", "c.txt"]);
        let args = build_args(&config, &request(output));

        assert!(!args.iter().any(|arg| arg.starts_with("--embed")));
        let n = args.len();
        assert_eq!(&args[n - 3..n - 1], &["--cookies", "c.txt"]);
    }

    #[test]
    fn test_capabilities() {
        let fetcher = YtDlpFetcher::default();
        assert!(fetcher.capabilities().supports_cancellation);
        assert_eq!(fetcher.capabilities().supports_pause, cfg!(unix));
        assert_eq!(fetcher.running_count(), 0);
    }

    #[tokio::test]
    async fn test_pause_unknown_item_fails() {
        let fetcher = YtDlpFetcher::default();
        assert!(fetcher.pause(&ItemId::new("nope")).await.is_err());
        assert!(fetcher.resume(&ItemId::new("nope")).await.is_err());
    }
}
