use std::time::SystemTime;
use ytmdl::commands::HELP;
use ytmdl::logging::default_filter;
use ytmdl::queue::{Counters, ProgressSnapshot};
use ytmdl::render::status_line;
use ytmdl::Command;

fn snapshot(counters: Counters, paused: bool) -> ProgressSnapshot {
    ProgressSnapshot {
        batches: Vec::new(),
        counters,
        fraction: 0.5,
        items_per_sec: Some(0.4),
        paused,
        quiescent: false,
        captured_at: SystemTime::now(),
    }
}

#[test]
fn test_status_line() {
    let counters = Counters {
        total: 20,
        pending: 10,
        active: 3,
        paused: 0,
        succeeded: 5,
        skipped: 1,
        failed: 1,
    };
    assert_eq!(
        status_line(&snapshot(counters, false)),
        "7/20 done, 3 active, 1 failed, 0.4/s"
    );
    assert!(status_line(&snapshot(counters, true)).ends_with("[paused]"));
}

#[test]
fn test_every_help_command_parses() {
    for word in ["p", "c", "r", "a https://youtu.be/dQw4w9WgXcQ", "s", "q"] {
        assert!(word.parse::<Command>().is_ok(), "{} should parse", word);
    }
    assert!(HELP.contains("a URL"));
}

#[test]
fn test_log_filters_cover_every_crate() {
    for verbose in [false, true] {
        let filter = default_filter(verbose);
        for target in ["ytmdl=", "ytmdl_core=", "ytmdl_ytdlp=", "ytmdl_config="] {
            assert!(filter.contains(target));
        }
    }
}
