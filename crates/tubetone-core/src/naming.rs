//! File name policy for downloaded tracks.
//!
//! Turns an (artist, song) pair into a file name that is safe on common file
//! systems, bounded in length, and never collides with an existing file.
//!
//! Collision resolution is a check-then-pick over the directory contents, not
//! an atomic file system transaction. Two engine instances writing into the
//! same directory at the same moment can race for the same suffix; within one
//! process every job is the single writer of its own final path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::{DownloadError, Error, Result};
use crate::title::{ArtistSong, collapse_whitespace, parse_title};

/// Maximum length of a file name, in Unicode code points.
pub const MAX_FILE_NAME_CHARS: usize = 200;

/// Highest collision suffix tried before giving up.
pub const MAX_COLLISION_ATTEMPTS: u32 = 10_000;

/// Stem used when sanitization leaves nothing behind.
pub const FALLBACK_STEM: &str = "untitled";

/// Characters rejected by at least one common file system.
const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Per-item naming input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingRequest {
    /// Title exactly as reported by the source.
    pub raw_title: String,
    /// Target extension without the leading dot (e.g. "mp3").
    pub target_ext: String,
}

/// Naming output for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingResult {
    /// Extracted artist, if any.
    pub artist: Option<String>,
    /// Extracted song (or the cleaned title).
    pub song: String,
    /// Sanitized `<stem>.<ext>`, at most [`MAX_FILE_NAME_CHARS`] long.
    pub final_file_name: String,
}

impl NamingRequest {
    /// Create a naming request.
    pub fn new(raw_title: impl Into<String>, target_ext: impl Into<String>) -> Self {
        Self {
            raw_title: raw_title.into(),
            target_ext: target_ext.into(),
        }
    }

    /// Run the title through normalization, extraction, and sanitization.
    pub fn resolve(&self) -> NamingResult {
        let ArtistSong { artist, song } = parse_title(&self.raw_title);
        let final_file_name = to_file_name(artist.as_deref(), &song, &self.target_ext);
        NamingResult {
            artist,
            song,
            final_file_name,
        }
    }
}

/// Compute the file name a title would get, without touching the disk.
pub fn preview_name(raw_title: &str, target_ext: &str) -> NamingResult {
    NamingRequest::new(raw_title, target_ext).resolve()
}

/// Sanitize a candidate name for use on the file system.
///
/// Applies NFKD normalization, drops `< > : " / \ | ? *`, turns control
/// characters into spaces, collapses whitespace, trims, and truncates to
/// [`MAX_FILE_NAME_CHARS`] code points. The result may be empty.
pub fn sanitize_filename(name: &str) -> String {
    let filtered: String = name
        .nfkd()
        .filter(|c| !INVALID_CHARS.contains(c))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    truncate_chars(&collapse_whitespace(&filtered), MAX_FILE_NAME_CHARS)
}

/// Truncate to at most `max` code points and drop trailing whitespace.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Lower-case the extension and strip dots, whitespace, and invalid characters.
fn sanitize_extension(ext: &str) -> String {
    ext.trim()
        .trim_start_matches('.')
        .chars()
        .filter(|c| !INVALID_CHARS.contains(c) && !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_lowercase()
}

/// Join a stem and extension, shortening the stem so the whole name fits.
fn fit_name(stem: &str, ext: &str) -> String {
    if ext.is_empty() {
        let stem = truncate_chars(stem, MAX_FILE_NAME_CHARS);
        return if stem.is_empty() {
            FALLBACK_STEM.to_string()
        } else {
            stem
        };
    }

    let budget = MAX_FILE_NAME_CHARS.saturating_sub(ext.chars().count() + 1);
    let mut stem = truncate_chars(stem, budget);
    if stem.is_empty() {
        stem = truncate_chars(FALLBACK_STEM, budget);
    }
    format!("{stem}.{ext}")
}

/// `"{stem} ({n}).{ext}"`, shortening the stem so the suffix always survives.
fn suffixed_name(stem: &str, n: u32, ext: &str) -> String {
    let suffix = format!(" ({n})");
    let ext_len = if ext.is_empty() { 0 } else { ext.chars().count() + 1 };
    let budget = MAX_FILE_NAME_CHARS.saturating_sub(suffix.chars().count() + ext_len);
    let stem = truncate_chars(stem, budget);
    if ext.is_empty() {
        format!("{stem}{suffix}")
    } else {
        format!("{stem}{suffix}.{ext}")
    }
}

/// Build the final file name for an artist/song pair.
///
/// The stem is `"{artist} - {song}"` when an artist is present, otherwise the
/// song alone. An empty stem after sanitization becomes [`FALLBACK_STEM`].
pub fn to_file_name(artist: Option<&str>, song: &str, ext: &str) -> String {
    let stem = match artist.map(str::trim) {
        Some(artist) if !artist.is_empty() => format!("{artist} - {song}"),
        _ => song.to_string(),
    };
    fit_name(&sanitize_filename(&stem), &sanitize_extension(ext))
}

/// Directory name for a collection, derived from its title.
///
/// Trailing dots and spaces are dropped so the name is never `.` or `..`
/// and always stays one level below the output root.
pub fn collection_dir_name(title: &str) -> String {
    let sanitized = sanitize_filename(title);
    let name = sanitized.trim_end_matches(['.', ' ']);
    if name.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        name.to_string()
    }
}

/// Pick a free path for `candidate`, appending ` (N)` before the extension.
///
/// Returns `candidate` unchanged if nothing exists there.
pub fn resolve_collision(candidate: &Path) -> Result<PathBuf> {
    resolve_collision_within(candidate, MAX_COLLISION_ATTEMPTS)
}

/// [`resolve_collision`] with an explicit cap on the suffix counter.
pub fn resolve_collision_within(candidate: &Path, max_attempts: u32) -> Result<PathBuf> {
    if !candidate.exists() {
        return Ok(candidate.to_path_buf());
    }

    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    for n in 1..=max_attempts {
        let next = parent.join(suffixed_name(&stem, n, &ext));
        if !next.exists() {
            debug!(
                "Name taken, using suffix {}: {}",
                n,
                next.file_name().map_or_else(String::new, |f| f.to_string_lossy().into_owned())
            );
            return Ok(next);
        }
    }

    Err(Error::Download(DownloadError::NamingCollisionExhausted {
        path: candidate.to_path_buf(),
        attempts: max_attempts,
    }))
}
