//! Tubetone Core Library
//!
//! This crate provides the download orchestration and file-naming engine
//! behind Tubetone:
//! - Title cleanup and artist/song extraction
//! - Collision-safe, sanitized file names
//! - Single-item and playlist downloads through yt-dlp
//! - Progress aggregation into a monotonic percentage stream
//! - Audio conversion through ffmpeg
//!
//! ```
//! use tubetone_core::preview_name;
//!
//! let named = preview_name("Artist - Song (Official Video) [HD]", "mp3");
//! assert_eq!(named.final_file_name, "Artist - Song.mp3");
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod naming;
pub mod progress;
pub mod report;
pub mod source;
pub mod title;
pub mod tools;
pub mod transcode;
pub mod ytdlp;

pub use config::{AppConfig, AudioFormat, AudioQuality};
pub use coordinator::{FetchCoordinator, FetchOutcome, JobHandle, JobState};
pub use error::{Error, ErrorKind, Result};
pub use fetch::{FetchRequest, Fetcher};
pub use naming::{NamingRequest, NamingResult, preview_name, resolve_collision, sanitize_filename};
pub use progress::{ChannelSink, NoopSink, ProgressAggregator, ProgressEvent, ProgressSink, RawProgress};
pub use report::JobReport;
pub use source::{MediaKind, MediaRef, SourceResolver, UrlKind, classify_url, clean_video_url};
pub use title::{ArtistSong, extract_artist_song, normalize_title};
pub use transcode::{FfmpegTranscoder, Transcoder, convert_file};
pub use ytdlp::{YtDlpFetcher, YtDlpResolver};
