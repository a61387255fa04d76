//! Parsing of yt-dlp output lines and classification of its failures

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use ytmdl_core::{FetchError, ResolveError};

/// Share of an item's progress covered by the download phase; post-processing
/// stages fill the rest
pub const DOWNLOAD_SHARE: f64 = 0.9;

static DOWNLOAD_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid percent pattern"));

static DOWNLOAD_DESTINATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[download\] Destination: (.+)$").expect("valid destination pattern")
});

static ALREADY_DOWNLOADED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[download\] (.+) has already been downloaded").expect("valid pattern")
});

static EXTRACT_DESTINATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[ExtractAudio\] Destination: (.+)$").expect("valid extract pattern")
});

static STAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(ExtractAudio|EmbedThumbnail|Metadata|ThumbnailsConvertor|FixupM4a|MoveFiles)\]")
        .expect("valid stage pattern")
});

/// Post-processing step reported by yt-dlp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ExtractAudio,
    EmbedThumbnail,
    Metadata,
    Other,
}

impl Stage {
    /// Overall item progress once this stage has started
    pub fn progress(&self) -> f64 {
        match self {
            Stage::ExtractAudio => 0.93,
            Stage::EmbedThumbnail => 0.96,
            Stage::Metadata => 0.98,
            Stage::Other => DOWNLOAD_SHARE,
        }
    }
}

/// One meaningful line of yt-dlp output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// Download percentage, 0 to 100
    Downloading(f64),
    /// Intermediate file the download is written to
    Destination(PathBuf),
    /// The final file is already present
    AlreadyDownloaded(PathBuf),
    /// Final audio file written by the extractor
    Extracted(PathBuf),
    PostProcessing(Stage),
    Warning(String),
    Error(String),
}

impl OutputLine {
    /// Overall item progress implied by this line, if any
    pub fn progress(&self) -> Option<f64> {
        match self {
            OutputLine::Downloading(percent) => {
                Some((percent / 100.0).clamp(0.0, 1.0) * DOWNLOAD_SHARE)
            }
            OutputLine::Extracted(_) => Some(Stage::ExtractAudio.progress()),
            OutputLine::PostProcessing(stage) => Some(stage.progress()),
            OutputLine::AlreadyDownloaded(_) => Some(DOWNLOAD_SHARE),
            _ => None,
        }
    }
}

/// Parse a single line printed by yt-dlp running with `--newline`
pub fn parse_line(line: &str) -> Option<OutputLine> {
    let line = line.trim_end();

    if let Some(caps) = DOWNLOAD_PERCENT.captures(line) {
        return caps[1].parse().ok().map(OutputLine::Downloading);
    }
    if let Some(caps) = DOWNLOAD_DESTINATION.captures(line) {
        return Some(OutputLine::Destination(PathBuf::from(caps[1].trim())));
    }
    if let Some(caps) = ALREADY_DOWNLOADED.captures(line) {
        return Some(OutputLine::AlreadyDownloaded(PathBuf::from(caps[1].trim())));
    }
    if let Some(caps) = EXTRACT_DESTINATION.captures(line) {
        return Some(OutputLine::Extracted(PathBuf::from(caps[1].trim())));
    }
    if let Some(caps) = STAGE.captures(line) {
        let stage = match &caps[1] {
            "ExtractAudio" => Stage::ExtractAudio,
            "EmbedThumbnail" => Stage::EmbedThumbnail,
            "Metadata" => Stage::Metadata,
            _ => Stage::Other,
        };
        return Some(OutputLine::PostProcessing(stage));
    }
    if let Some((_, message)) = line.split_once("WARNING:") {
        return Some(OutputLine::Warning(message.trim().to_string()));
    }
    if let Some((_, message)) = line.split_once("ERROR:") {
        return Some(OutputLine::Error(message.trim().to_string()));
    }
    None
}

const UNAVAILABLE_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "has been removed",
    "members-only",
    "members only",
    "this video is not available",
    "account associated with this video has been terminated",
    "copyright claim",
    "sign in to confirm your age",
];

const REGION_MARKERS: &[&str] = &[
    "available in your country",
    "blocked it in your country",
    "geo restrict",
    "geo-restrict",
];

const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "temporary failure in name resolution",
    "network is unreachable",
    "http error 5",
    "http error 429",
    "too many requests",
    "incompleteread",
    "unable to download webpage",
];

const FILE_SYSTEM_MARKERS: &[&str] = &[
    "no space left",
    "permission denied",
    "read-only file system",
    "unable to open for writing",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Most useful line of yt-dlp's stderr: the last `ERROR:` line, else the last non-empty one
pub fn error_summary(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.split_once("ERROR:").map(|(_, msg)| msg.trim().to_string()))
        .or_else(|| {
            stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
}

/// Map a failed download's stderr to a fetch error kind
pub fn classify_failure(stderr: &str, exit: &str) -> FetchError {
    let message = error_summary(stderr).unwrap_or_else(|| format!("yt-dlp exited with {}", exit));
    let lower = stderr.to_lowercase();

    if contains_any(&lower, REGION_MARKERS) {
        FetchError::region_blocked(message)
    } else if contains_any(&lower, UNAVAILABLE_MARKERS) {
        FetchError::unavailable(message)
    } else if contains_any(&lower, FILE_SYSTEM_MARKERS) {
        FetchError::file_system(message)
    } else if contains_any(&lower, NETWORK_MARKERS) {
        FetchError::network(message)
    } else {
        FetchError::unknown(message)
    }
}

/// Map a failed resolution's stderr to a resolve error kind
pub fn classify_resolve_failure(stderr: &str, exit: &str) -> ResolveError {
    let message = error_summary(stderr).unwrap_or_else(|| format!("yt-dlp exited with {}", exit));
    let lower = stderr.to_lowercase();

    if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        ResolveError::unsupported(message)
    } else if contains_any(&lower, UNAVAILABLE_MARKERS)
        || lower.contains("404")
        || lower.contains("does not exist")
        || lower.contains("not found")
    {
        ResolveError::not_found(message)
    } else {
        ResolveError::network(message)
    }
}
