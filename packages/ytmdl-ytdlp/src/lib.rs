//! yt-dlp adapters for the ytmdl queue engine
//!
//! [`YtDlpResolver`] expands playlist and track URLs with
//! `yt-dlp --flat-playlist`, and [`YtDlpFetcher`] downloads and converts a
//! single item, reporting progress parsed from yt-dlp's `--newline` output.

pub mod config;
pub mod fetcher;
pub mod parse;
pub mod paths;
pub mod process;
pub mod resolver;

pub use config::YtDlpConfig;
pub use fetcher::{build_args, YtDlpFetcher};
pub use parse::{classify_failure, classify_resolve_failure, parse_line, OutputLine, Stage};
pub use paths::{expected_output_path, output_template, sanitize_component};
pub use resolver::{resolution_from_json, YtDlpResolver};
