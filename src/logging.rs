use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "ytmdl=info,ytmdl_core=info,ytmdl_ytdlp=info,ytmdl_config=info";
const VERBOSE_FILTER: &str = "ytmdl=debug,ytmdl_core=debug,ytmdl_ytdlp=debug,ytmdl_config=debug";

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Install the global subscriber, writing to stderr
///
/// `RUST_LOG` takes precedence over `verbose`. Calling this twice is harmless.
pub fn init_tracing(verbose: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
