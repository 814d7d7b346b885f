//! Media sources: what a URL points at, before anything is downloaded.
//!
//! The engine never talks to the platform itself. A [`SourceResolver`]
//! performs a metadata-only probe and reports a [`MediaRef`]; the rest of the
//! pipeline treats that as a read-only fact.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DownloadError, Error, Result};

/// Whether a URL resolves to one item or to a collection of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// A single video.
    Video,
    /// A playlist or other ordered group of videos.
    Collection,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Collection => write!(f, "collection"),
        }
    }
}

/// Probed metadata for a URL. Immutable once produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// URL that was probed.
    pub url: String,
    /// Item or collection.
    pub kind: MediaKind,
    /// Title of the video or collection.
    pub title: String,
    /// Uploader or channel name.
    pub author: String,
    /// Number of entries (collections only).
    pub entry_count: Option<usize>,
}

impl MediaRef {
    /// Metadata for a single video.
    pub fn video(
        url: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
            title: title.into(),
            author: author.into(),
            entry_count: None,
        }
    }

    /// Metadata for a collection with `entry_count` entries.
    pub fn collection(
        url: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        entry_count: usize,
    ) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Collection,
            title: title.into(),
            author: author.into(),
            entry_count: Some(entry_count),
        }
    }

    /// `true` for collections.
    pub const fn is_collection(&self) -> bool {
        matches!(self.kind, MediaKind::Collection)
    }
}

/// Metadata-only probe of a URL.
///
/// Implementations must not download media. Failures are reported as
/// [`DownloadError::Resolution`] with the raw cause; callers do not retry.
#[cfg_attr(test, mockall::automock)]
pub trait SourceResolver: Send + Sync {
    /// Probe `url` and report what it points at.
    fn probe(&self, url: &str) -> Result<MediaRef>;
}

/// Decide item vs. collection from what a resolver reported.
///
/// A URL is a collection if the reported type says so (`"playlist"` or
/// `"collection"`, case-insensitive) or if it exposes more than one entry.
pub fn classify_probe(reported_type: Option<&str>, entry_count: Option<usize>) -> MediaKind {
    let typed_collection = reported_type.is_some_and(|t| {
        t.eq_ignore_ascii_case("playlist") || t.eq_ignore_ascii_case("collection")
    });
    if typed_collection || entry_count.is_some_and(|n| n > 1) {
        MediaKind::Collection
    } else {
        MediaKind::Video
    }
}

/// Shape of a URL, detected from its text alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UrlKind {
    /// Standard playlist URL (youtube.com/playlist?list=...)
    Playlist,
    /// Watch URL with playlist parameter (youtube.com/watch?v=...&list=...)
    WatchWithPlaylist,
    /// Single video URL without playlist
    SingleVideo,
    /// Short URL (youtu.be/...)
    ShortUrl,
    /// Some other http(s) URL; only a probe can tell what it is.
    Other,
    /// Not a usable URL
    #[default]
    Invalid,
}

impl UrlKind {
    /// `true` if the URL text names a playlist.
    pub const fn has_playlist(self) -> bool {
        matches!(self, Self::Playlist | Self::WatchWithPlaylist)
    }
}

/// Parse and check that `url` is an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(invalid_url(url, "URL cannot be empty"));
    }

    let parsed = Url::parse(trimmed).map_err(|e| invalid_url(url, &e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid_url(url, "URL must start with http:// or https://"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid_url(url, "URL has no host"));
    }

    Ok(parsed)
}

fn invalid_url(url: &str, reason: &str) -> Error {
    Error::Download(DownloadError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    })
}

fn is_youtube_host(host: &str) -> bool {
    let host = host.to_lowercase();
    host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtu.be"
}

fn has_list_param(url: &Url) -> bool {
    url.query_pairs()
        .any(|(key, value)| key == "list" && !value.trim().is_empty())
}

/// Detect the URL shape without any network access.
pub fn classify_url(url: &str) -> UrlKind {
    let Ok(parsed) = validate_url(url) else {
        return UrlKind::Invalid;
    };
    let Some(host) = parsed.host_str() else {
        return UrlKind::Invalid;
    };
    if !is_youtube_host(host) {
        return UrlKind::Other;
    }

    let path = parsed.path().to_lowercase();
    let with_list = has_list_param(&parsed);

    if host.eq_ignore_ascii_case("youtu.be") {
        if with_list {
            UrlKind::WatchWithPlaylist
        } else {
            UrlKind::ShortUrl
        }
    } else if path.starts_with("/playlist") {
        if with_list {
            UrlKind::Playlist
        } else {
            UrlKind::Invalid
        }
    } else if path.starts_with("/watch") || path.starts_with("/shorts/") {
        if with_list {
            UrlKind::WatchWithPlaylist
        } else {
            UrlKind::SingleVideo
        }
    } else {
        UrlKind::Other
    }
}

/// Query parameters that make a watch URL expand into its playlist.
const PLAYLIST_PARAMS: [&str; 3] = ["list", "index", "start_radio"];

/// Trim a pasted URL and, for single-item downloads, drop playlist parameters.
///
/// With `keep_collection == false`, a watch URL such as
/// `watch?v=ID&list=PL...` becomes `watch?v=ID` so the probe reports the one
/// video instead of the playlist it was opened from. Pure playlist URLs and
/// non-YouTube URLs are only trimmed.
pub fn clean_video_url(url: &str, keep_collection: bool) -> Result<String> {
    let mut parsed = validate_url(url)?;
    if keep_collection || classify_url(url) != UrlKind::WatchWithPlaylist {
        return Ok(parsed.to_string());
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !PLAYLIST_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok(parsed.to_string())
}
