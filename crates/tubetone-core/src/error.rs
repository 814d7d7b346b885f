//! Error types for Tubetone core operations.
//!
//! Errors are grouped by domain. Every error that originates in an external
//! collaborator (yt-dlp, ffmpeg, the file system) keeps the collaborator's
//! diagnostic text verbatim so it can be shown to the user as-is.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving, fetching, or finalizing a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL is empty, malformed, or not a supported host.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Probing the URL failed (network error, geo-block, private content).
    #[error("Could not resolve '{url}': {reason}")]
    Resolution {
        /// The probed URL.
        url: String,
        /// Raw cause reported by the resolver.
        reason: String,
    },

    /// The fetch collaborator reported a failure.
    #[error("Download failed for '{url}': {reason}")]
    Fetch {
        /// The URL being fetched.
        url: String,
        /// Raw cause reported by the fetcher.
        reason: String,
    },

    /// The transcode collaborator exited unsuccessfully.
    #[error("Conversion of {} failed (exit code {code:?}): {stderr}", input.display())]
    Transcode {
        /// Input file handed to the transcoder.
        input: PathBuf,
        /// Process exit code, if the process ran at all.
        code: Option<i32>,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// Every collision suffix up to the cap is already taken.
    #[error("No free file name for {} after {attempts} attempts", path.display())]
    NamingCollisionExhausted {
        /// The originally requested path.
        path: PathBuf,
        /// Number of suffixes tried.
        attempts: u32,
    },

    /// The fetch reported success but its output could not be located.
    #[error("Downloaded .{extension} file not found in {}", directory.display())]
    Finalize {
        /// Directory that was searched.
        directory: PathBuf,
        /// Extension that was expected.
        extension: String,
    },

    /// A required external tool is not installed.
    #[error("{tool} not found: {reason}")]
    ToolMissing {
        /// Tool name (e.g. "yt-dlp").
        tool: String,
        /// Lookup failure detail.
        reason: String,
    },

    /// The background worker running the job panicked or was aborted.
    #[error("Download worker stopped unexpectedly: {0}")]
    WorkerFailed(String),
}

/// File system errors with the path that caused them.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// A directory could not be created.
    #[error("Failed to create directory {}: {reason}", path.display())]
    CreateDirFailed {
        /// Directory path.
        path: PathBuf,
        /// Underlying error text.
        reason: String,
    },

    /// A file or directory could not be read.
    #[error("Failed to read {}: {reason}", path.display())]
    ReadFailed {
        /// Path being read.
        path: PathBuf,
        /// Underlying error text.
        reason: String,
    },

    /// A file could not be written.
    #[error("Failed to write {}: {reason}", path.display())]
    WriteFailed {
        /// Path being written.
        path: PathBuf,
        /// Underlying error text.
        reason: String,
    },

    /// Moving a downloaded file to its final name failed.
    #[error("Failed to rename {} to {}: {reason}", from.display(), to.display())]
    RenameFailed {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying error text.
        reason: String,
    },
}

/// Errors that can occur in Tubetone core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Download pipeline error.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// File system error.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error category, used by front ends to pick exit codes and wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input URL or failed probe.
    Resolution,
    /// Download collaborator failure.
    Fetch,
    /// Transcoder failure.
    Transcode,
    /// No collision-free name available.
    NamingCollision,
    /// Output file missing after a successful fetch.
    Finalize,
    /// External tool missing.
    ToolMissing,
    /// Disk or IO failure.
    FileSystem,
    /// Invalid configuration.
    Configuration,
    /// Worker crash or serialization bug.
    Internal,
}

impl Error {
    /// Category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Download(e) => match e {
                DownloadError::InvalidUrl { .. } | DownloadError::Resolution { .. } => {
                    ErrorKind::Resolution
                }
                DownloadError::Fetch { .. } => ErrorKind::Fetch,
                DownloadError::Transcode { .. } => ErrorKind::Transcode,
                DownloadError::NamingCollisionExhausted { .. } => ErrorKind::NamingCollision,
                DownloadError::Finalize { .. } => ErrorKind::Finalize,
                DownloadError::ToolMissing { .. } => ErrorKind::ToolMissing,
                DownloadError::WorkerFailed(_) => ErrorKind::Internal,
            },
            Self::FileSystem(_) | Self::Io(_) => ErrorKind::FileSystem,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}
