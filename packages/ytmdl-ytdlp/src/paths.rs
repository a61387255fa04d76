//! Output layout: `<root>/<artist>/<playlist>/<ordinal> - <title>.<ext>`

use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use ytmdl_core::{FetchRequest, GroupKey, OutputSpec};

/// Placeholder for missing or fully stripped path components
pub const UNKNOWN_COMPONENT: &str = "NA";

/// Extensions yt-dlp leaves behind for unfinished downloads
const PARTIAL_MARKERS: &[&str] = &[".part", ".ytdl", ".temp", ".part-Frag"];

/// Make `raw` safe as a single path component
pub fn sanitize_component(raw: &str) -> String {
    let cleaned = sanitize(raw.trim());
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        UNKNOWN_COMPONENT.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Ordinal zero-padded to the width of the batch size
///
/// `batch_len` is the length of the playlist as numbered, so hidden entries
/// still count; the ordinal itself is never truncated.
pub fn ordinal_prefix(ordinal: u32, batch_len: usize) -> String {
    let width = batch_len.max(ordinal as usize).max(1).to_string().len();
    format!("{:0width$}", ordinal, width = width)
}

/// `<root>/<artist>/<playlist>`
pub fn item_dir(output: &OutputSpec, group_key: &GroupKey) -> PathBuf {
    output
        .root_dir
        .join(sanitize_component(&group_key.artist))
        .join(sanitize_component(&group_key.playlist))
}

/// `<ordinal> - <title>` without extension
pub fn item_stem(request: &FetchRequest) -> String {
    format!(
        "{} - {}",
        ordinal_prefix(request.ordinal, request.batch_len),
        sanitize_component(&request.display_name)
    )
}

/// Where the finished audio file is expected to land
pub fn expected_output_path(request: &FetchRequest) -> PathBuf {
    item_dir(&request.output, &request.group_key).join(format!(
        "{}.{}",
        item_stem(request),
        request.output.audio_format.extension()
    ))
}

/// yt-dlp `-o` template for one item; literal `%` is escaped
pub fn output_template(request: &FetchRequest) -> String {
    let base = item_dir(&request.output, &request.group_key).join(item_stem(request));
    format!("{}.%(ext)s", base.to_string_lossy().replace('%', "%%"))
}

/// Leftovers of an interrupted download of the item whose stem is `stem`
///
/// The stem must be followed by an extension, so `01 - Song (Remix).webm.part`
/// never matches `01 - Song`.
pub fn is_partial_file(file_name: &str, stem: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(stem) else {
        return false;
    };
    rest.starts_with('.') && PARTIAL_MARKERS.iter().any(|marker| rest.contains(marker))
}

/// Remove partial files for `stem` inside `dir`; returns how many were deleted
pub async fn remove_partial_files(dir: &Path, stem: &str) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_partial_file(name, stem) {
            tokio::fs::remove_file(entry.path()).await?;
            tracing::debug!("Removed partial file {}", entry.path().display());
            removed += 1;
        }
    }
    Ok(removed)
}
