//! yt-dlp backed collaborators.
//!
//! [`YtDlpResolver`] probes metadata with `--dump-single-json --flat-playlist`
//! and never downloads media. [`YtDlpFetcher`] runs the actual download with
//! audio extraction, reading progress from a machine-readable
//! `--progress-template` line on stdout.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{DownloadError, Error, Result};
use crate::fetch::{FetchRequest, Fetcher};
use crate::progress::{ProgressPhase, RawProgress};
use crate::source::{MediaKind, MediaRef, SourceResolver, classify_probe};
use crate::tools::{self, YT_DLP};

/// Marker prefixed to every progress line we ask yt-dlp to print.
const PROGRESS_MARKER: &str = "[tubetone]";

/// `--progress-template` value; fields are whitespace separated.
const PROGRESS_TEMPLATE: &str = "download:[tubetone] %(progress.status)s %(progress._percent_str)s %(progress.downloaded_bytes)s %(progress.total_bytes)s";

/// Standard yt-dlp progress output, used when the template line is absent.
#[allow(clippy::expect_used)]
static FALLBACK_PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid progress regex")
});

/// Title used when the source reports none.
const UNKNOWN_TITLE: &str = "Unknown title";
/// Author used when the source reports none.
const UNKNOWN_AUTHOR: &str = "Unknown";

/// Program path plus options shared by both collaborators.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// yt-dlp binary.
    pub program: PathBuf,
    /// Passed as `--ffmpeg-location` when set.
    pub ffmpeg_location: Option<PathBuf>,
}

impl YtDlpConfig {
    /// Locate yt-dlp (configured path first, then `PATH`).
    pub fn locate(yt_dlp_path: Option<&Path>, ffmpeg_location: Option<&Path>) -> Result<Self> {
        Ok(Self {
            program: tools::locate_tool(YT_DLP, yt_dlp_path)?,
            ffmpeg_location: ffmpeg_location.map(Path::to_path_buf),
        })
    }
}

/// [`SourceResolver`] backed by `yt-dlp --dump-single-json`.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    config: YtDlpConfig,
}

impl YtDlpResolver {
    /// Create a resolver.
    pub const fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }
}

impl SourceResolver for YtDlpResolver {
    fn probe(&self, url: &str) -> Result<MediaRef> {
        debug!("Probing {}", url);
        let output = tools::command(&self.config.program)
            .args(probe_args(url))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| tools::spawn_error(YT_DLP, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(resolution_error(
                url,
                exit_reason(&stderr, output.status.code()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe(&stdout, url)
    }
}

/// Arguments for a metadata-only probe.
pub fn probe_args(url: &str) -> Vec<String> {
    vec![
        "--dump-single-json".to_string(),
        "--flat-playlist".to_string(),
        "--no-warnings".to_string(),
        url.to_string(),
    ]
}

/// Turn the JSON printed by `--dump-single-json` into a [`MediaRef`].
pub fn parse_probe(json: &str, url: &str) -> Result<MediaRef> {
    let v: Value = serde_json::from_str(json.trim())
        .map_err(|e| resolution_error(url, format!("invalid yt-dlp JSON: {e}")))?;

    let entries = v.get("entries").and_then(Value::as_array).map(Vec::len);
    let count_hint = v
        .get("playlist_count")
        .and_then(Value::as_u64)
        .map(|n| n as usize);
    let entry_count = entries.or(count_hint);
    let kind = classify_probe(v.get("_type").and_then(Value::as_str), entry_count);

    let text = |key: &str| {
        v.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = text("title").unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let author = text("uploader")
        .or_else(|| text("channel"))
        .or_else(|| text("playlist_uploader"))
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
    let webpage_url = text("webpage_url").unwrap_or_else(|| url.to_string());

    Ok(match kind {
        MediaKind::Video => MediaRef::video(webpage_url, title, author),
        MediaKind::Collection => {
            MediaRef::collection(webpage_url, title, author, entry_count.unwrap_or(0))
        }
    })
}

/// [`Fetcher`] running `yt-dlp -x`.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: YtDlpConfig,
}

impl YtDlpFetcher {
    /// Create a fetcher.
    pub const fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }
}

impl Fetcher for YtDlpFetcher {
    fn fetch(&self, request: &FetchRequest, on_progress: &dyn Fn(RawProgress)) -> Result<()> {
        let args = fetch_args(request, self.config.ffmpeg_location.as_deref());
        debug!("Running {} {:?}", self.config.program.display(), args);

        let mut child = tools::command(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| tools::spawn_error(YT_DLP, e))?;

        // Drain stderr on its own thread so a full pipe cannot stall yt-dlp.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut bytes = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut bytes) {
                    warn!("Failed to read yt-dlp diagnostics: {}", e);
                }
                String::from_utf8_lossy(&bytes).into_owned()
            })
        });

        if let Some(stdout) = child.stdout.take() {
            drain_progress(BufReader::new(stdout), on_progress);
        }

        let status = child.wait()?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(Error::Download(DownloadError::Fetch {
                url: request.url.clone(),
                reason: exit_reason(stderr.trim(), status.code()),
            }))
        }
    }
}

/// Feed every progress line of `reader` to `on_progress` until EOF.
///
/// Lines are decoded lossily: titles and file names arrive in the locale
/// encoding on some systems, and stopping early would leave yt-dlp writing
/// into a closed pipe.
fn drain_progress(mut reader: impl BufRead, on_progress: &dyn Fn(RawProgress)) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                trace!("yt-dlp: {}", line.trim_end());
                if let Some(event) = parse_progress_line(&line) {
                    on_progress(event);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Failed to read yt-dlp output: {}", e);
                break;
            }
        }
    }
}

/// Arguments for an audio download.
pub fn fetch_args(request: &FetchRequest, ffmpeg_location: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "bestaudio/best".to_string(),
        "-x".to_string(),
        "--audio-format".to_string(),
        request.format.extension().to_string(),
    ];
    if let Some(kbps) = request.quality_kbps {
        args.push("--audio-quality".to_string());
        args.push(format!("{kbps}K"));
    }
    args.push(if request.is_collection {
        "--yes-playlist".to_string()
    } else {
        "--no-playlist".to_string()
    });
    args.extend([
        "--newline".to_string(),
        "--encoding".to_string(),
        "utf-8".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "-o".to_string(),
        request.output_template.clone(),
    ]);
    if let Some(ffmpeg) = ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(ffmpeg.to_string_lossy().into_owned());
    }
    args.push(request.url.clone());
    args
}

/// Parse one stdout line into a progress event, if it is one.
///
/// Understands the `[tubetone] <status> <percent> <downloaded> <total>` lines
/// requested via `--progress-template`, and plain `[download] 42.0%` lines.
pub fn parse_progress_line(line: &str) -> Option<RawProgress> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        let mut fields = rest.split_whitespace();
        let status = match fields.next()? {
            "downloading" => ProgressPhase::Downloading,
            "finished" => ProgressPhase::Finished,
            "error" => ProgressPhase::Error,
            _ => return None,
        };
        let percent_str = fields.next().map(str::to_string);
        let downloaded_bytes = fields.next().and_then(|f| f.parse().ok());
        let total_bytes = fields.next().and_then(|f| f.parse().ok());
        return Some(RawProgress {
            status: Some(status),
            percent_str,
            total_bytes,
            downloaded_bytes,
        });
    }

    FALLBACK_PROGRESS_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| RawProgress::percent(format!("{}%", m.as_str())))
}

fn resolution_error(url: &str, reason: String) -> Error {
    Error::Download(DownloadError::Resolution {
        url: url.to_string(),
        reason,
    })
}

fn exit_reason(stderr: &str, code: Option<i32>) -> String {
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match code {
        Some(code) => format!("yt-dlp exited with status {code}"),
        None => "yt-dlp was terminated by a signal".to_string(),
    }
}
