//! Signals for yt-dlp process groups
//!
//! Each fetch runs in its own process group so ffmpeg post-processing
//! children are suspended and killed together with yt-dlp.

use ytmdl_core::FetchError;

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) -> Result<(), FetchError> {
    let pgid = i32::try_from(pgid)
        .map_err(|_| FetchError::process(format!("invalid process group id {}", pgid)))?;
    nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), signal)
        .map_err(|e| FetchError::process(format!("failed to send {}: {}", signal, e)))
}

/// Suspend the whole process group
pub fn suspend(pgid: u32) -> Result<(), FetchError> {
    #[cfg(unix)]
    {
        signal_group(pgid, nix::sys::signal::Signal::SIGSTOP)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        Err(FetchError::unsupported("Pause is only supported on unix"))
    }
}

/// Continue a suspended process group
pub fn resume(pgid: u32) -> Result<(), FetchError> {
    #[cfg(unix)]
    {
        signal_group(pgid, nix::sys::signal::Signal::SIGCONT)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        Err(FetchError::unsupported("Resume is only supported on unix"))
    }
}

/// Kill the whole process group, suspended members included
pub fn kill(pgid: u32) -> Result<(), FetchError> {
    #[cfg(unix)]
    {
        signal_group(pgid, nix::sys::signal::Signal::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        Err(FetchError::unsupported("Group kill is only supported on unix"))
    }
}
