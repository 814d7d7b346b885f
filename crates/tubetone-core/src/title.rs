//! Title cleanup and artist/song extraction.
//!
//! Video titles are free-form and frequently decorated with tags such as
//! "(Official Video)", "[HD]", release years, or featured-artist credits.
//! [`normalize_title`] strips that decoration and [`extract_artist_song`]
//! splits the cleaned title into an artist and a song using a fixed, ordered
//! list of separator conventions.
//!
//! Neither function ever fails: unrecognized input degrades to
//! `(None, cleaned_title)`.
//!
//! ```rust
//! use tubetone_core::title::{extract_artist_song, normalize_title};
//!
//! let cleaned = normalize_title("Artist - Song (Official Video) [HD]");
//! assert_eq!(cleaned, "Artist - Song");
//!
//! let track = extract_artist_song(&cleaned);
//! assert_eq!(track.artist.as_deref(), Some("Artist"));
//! assert_eq!(track.song, "Song");
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Markers that identify a bracketed segment as decoration.
const DECORATION_MARKERS: &str = "official|video|audio|lyric|hd|4k|remaster|version";

/// Removal patterns, applied in order. Each entry is `(pattern, replacement)`.
#[allow(clippy::expect_used)]
static DECORATION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // (Official Video), (4K Remaster), (Lyric Version)
        (
            format!(r"(?i)\s*\([^)]*(?:{DECORATION_MARKERS})\s*[^)]*\)"),
            "",
        ),
        // [HD], [Official Audio]
        (
            format!(r"(?i)\s*\[[^\]]*(?:{DECORATION_MARKERS})\s*[^\]]*\]"),
            "",
        ),
        // (1987), [Live 2019]
        (r"\s*\([^)]*\d{4}[^)]*\)".to_string(), ""),
        (r"\s*\[[^\]]*\d{4}[^\]]*\]".to_string(), ""),
        // (feat. Someone), [feat Someone]
        (r"(?i)\s*\(feat\.?[^)]*\)".to_string(), ""),
        (r"(?i)\s*\[feat\.?[^\]]*\]".to_string(), ""),
        // "Artist ft. Guest - Song" keeps the dash
        (r"(?i)\s*\bft\.?\s+[^-–—]*([-–—])".to_string(), " ${1}"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(&pattern).expect("decoration pattern is a valid regex"),
            replacement,
        )
    })
    .collect()
});

#[allow(clippy::expect_used)]
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is a valid regex"));

/// One artist/song separator convention.
struct SeparatorPattern {
    regex: Regex,
    /// `true` for "Song by Artist", where the capture order is reversed.
    inverted: bool,
}

/// Separator conventions in priority order. The first structural match wins.
#[allow(clippy::expect_used)]
static SEPARATOR_PATTERNS: LazyLock<Vec<SeparatorPattern>> = LazyLock::new(|| {
    [
        // Artist - Song (hyphen, en dash, em dash)
        (r"(?i)^(.+?)\s*[-–—]\s*(.+)$", false),
        // Artist : Song, Artist | Song
        (r"(?i)^(.+?)\s*[:|]\s*(.+)$", false),
        // Artist "Song"
        (r#"(?i)^(.+?)\s*["“”]\s*(.+?)\s*["“”]\s*$"#, false),
        // Artist 'Song'
        (r"(?i)^(.+?)\s*['‘’]\s*(.+?)\s*['‘’]\s*$", false),
        // Artist (Song)
        (r"(?i)^(.+?)\s*\(\s*(.+?)\s*\)$", false),
        // Song by Artist
        (r"(?i)^(.+?)\s+by\s+(.+)$", true),
    ]
    .into_iter()
    .map(|(pattern, inverted)| SeparatorPattern {
        regex: Regex::new(pattern).expect("separator pattern is a valid regex"),
        inverted,
    })
    .collect()
});

/// Artist and song split out of a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistSong {
    /// Artist, when a separator convention matched.
    pub artist: Option<String>,
    /// Song title, or the whole cleaned title when no convention matched.
    pub song: String,
}

impl ArtistSong {
    /// File stem for this track: `"{artist} - {song}"` or just the song.
    pub fn stem(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{artist} - {}", self.song),
            None => self.song.clone(),
        }
    }
}

/// Collapse whitespace runs to a single space and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").trim().to_string()
}

/// One pass of every removal pattern followed by whitespace cleanup.
fn strip_decorations(title: &str) -> String {
    let stripped = DECORATION_PATTERNS
        .iter()
        .fold(title.to_string(), |text, (regex, replacement)| {
            regex.replace_all(&text, *replacement).into_owned()
        });
    collapse_whitespace(&stripped)
}

/// Strip decorative metadata from a raw video title.
///
/// Removes bracketed or parenthesized segments mentioning
/// `official|video|audio|lyric|hd|4k|remaster|version`, bracketed years,
/// `feat.` credits, and an `ft. …` run right before a dash separator, then
/// collapses whitespace. The removal pass is repeated until nothing changes,
/// which makes the function idempotent.
///
/// If the title consists only of decoration, the whitespace-collapsed
/// original is returned instead of an empty string.
pub fn normalize_title(raw_title: &str) -> String {
    let mut current = collapse_whitespace(raw_title);
    if current.is_empty() {
        return current;
    }

    let original = current.clone();
    loop {
        let next = strip_decorations(&current);
        if next == current {
            break;
        }
        current = next;
    }

    if current.is_empty() { original } else { current }
}

/// Split a cleaned title into artist and song.
///
/// Tries the separator conventions in priority order (dash, colon/pipe,
/// double quotes, single quotes, parentheses, "by") and returns the first
/// match. A match that would produce an empty part is skipped. Without a
/// match, the artist is `None` and the song is the trimmed input.
///
/// The rules are purely textual and split some plain titles: an unspaced
/// hyphen counts as a dash (`"Spider-Man Theme"` gives `Spider` /
/// `Man Theme`) and a standalone "by" is read as a credit (`"Stand By Me"`
/// gives `Me` / `Stand`).
pub fn extract_artist_song(clean_title: &str) -> ArtistSong {
    let title = clean_title.trim();

    for pattern in SEPARATOR_PATTERNS.iter() {
        let Some(caps) = pattern.regex.captures(title) else {
            continue;
        };
        let (Some(first), Some(second)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let first = first.as_str().trim();
        let second = second.as_str().trim();
        if first.is_empty() || second.is_empty() {
            continue;
        }

        let (artist, song) = if pattern.inverted {
            (second, first)
        } else {
            (first, second)
        };
        return ArtistSong {
            artist: Some(artist.to_string()),
            song: song.to_string(),
        };
    }

    ArtistSong {
        artist: None,
        song: title.to_string(),
    }
}

/// Normalize a raw title and split it into artist and song.
pub fn parse_title(raw_title: &str) -> ArtistSong {
    extract_artist_song(&normalize_title(raw_title))
}
