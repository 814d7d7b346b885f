//! The download collaborator boundary.
//!
//! A [`Fetcher`] downloads and extracts audio for one URL into files named by
//! an output template it understands. It owns the network and the on-disk
//! layout inside the template; the engine only decides where the template
//! points and what happens to the files afterwards.

use crate::config::AudioFormat;
use crate::error::Result;
use crate::progress::RawProgress;

/// One download handed to a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// URL to download.
    pub url: String,
    /// Output path template, e.g. `/music/temp_1a2b.%(ext)s`.
    pub output_template: String,
    /// Audio format to extract.
    pub format: AudioFormat,
    /// Target bitrate; `None` for lossless formats.
    pub quality_kbps: Option<u32>,
    /// Download every entry of a collection instead of a single item.
    pub is_collection: bool,
}

/// Downloads audio and reports progress through a callback.
///
/// The callback may be invoked any number of times from the calling thread
/// before `fetch` returns. Failures carry the downloader's message verbatim
/// as [`DownloadError::Fetch`](crate::error::DownloadError::Fetch).
pub trait Fetcher: Send + Sync {
    /// Run the download to completion.
    fn fetch(&self, request: &FetchRequest, on_progress: &dyn Fn(RawProgress)) -> Result<()>;
}
