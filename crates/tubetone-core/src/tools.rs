//! Locating and launching the external command line tools.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{DownloadError, Error};

/// Binary name of the downloader.
pub const YT_DLP: &str = "yt-dlp";
/// Binary name of the transcoder.
pub const FFMPEG: &str = "ffmpeg";

/// Find `tool`, preferring an explicitly configured path over `PATH`.
pub fn locate_tool(tool: &str, configured: Option<&Path>) -> crate::Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            debug!("Using configured {}: {}", tool, path.display());
            return Ok(path.to_path_buf());
        }
        return Err(missing(
            tool,
            format!("configured path {} does not exist", path.display()),
        ));
    }

    let found = which::which(tool).map_err(|e| missing(tool, e.to_string()))?;
    debug!("Found {} on PATH: {}", tool, found.display());
    Ok(found)
}

/// A command that does not pop up a console window on Windows.
pub(crate) fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
const fn configure_for_background(_cmd: &mut Command) {}

/// Map a failure to start `tool` onto the crate error.
pub(crate) fn spawn_error(tool: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => missing(tool, e.to_string()),
        _ => Error::Io(e),
    }
}

fn missing(tool: &str, reason: String) -> Error {
    Error::Download(DownloadError::ToolMissing {
        tool: tool.to_string(),
        reason,
    })
}
