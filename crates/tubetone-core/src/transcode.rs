//! Audio transcoding.
//!
//! The transcoder is an external collaborator: [`Transcoder`] is the seam,
//! [`FfmpegTranscoder`] the production implementation, and [`convert_file`]
//! the one operation front ends call.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{AudioFormat, AudioQuality};
use crate::error::{DownloadError, Error, FileSystemError, Result};
use crate::naming;
use crate::tools::{self, FFMPEG};

/// One conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    /// File to read.
    pub input: PathBuf,
    /// File to write (overwritten if present).
    pub output: PathBuf,
    /// Target format.
    pub format: AudioFormat,
    /// Target bitrate; `None` for lossless formats.
    pub bitrate_kbps: Option<u32>,
}

impl TranscodeRequest {
    /// Build a request, dropping the bitrate for lossless formats.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        format: AudioFormat,
        quality: AudioQuality,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            format,
            bitrate_kbps: (!format.is_lossless()).then(|| quality.kbps()),
        }
    }

    /// Command line arguments for ffmpeg.
    pub fn ffmpeg_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-nostdin".into(),
            "-hide_banner".into(),
            "-i".into(),
            self.input.clone().into_os_string(),
            "-vn".into(),
        ];
        if let Some(kbps) = self.bitrate_kbps {
            args.push("-b:a".into());
            args.push(format!("{kbps}k").into());
        }
        args.push("-y".into());
        args.push(self.output.clone().into_os_string());
        args
    }
}

/// Converts an audio file to another format.
#[cfg_attr(test, mockall::automock)]
pub trait Transcoder: Send + Sync {
    /// Run the conversion; returns the written path.
    fn transcode(&self, request: &TranscodeRequest) -> Result<PathBuf>;
}

/// [`Transcoder`] backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    /// Locate ffmpeg (configured path first, then `PATH`).
    pub fn new(configured: Option<&Path>) -> Result<Self> {
        Ok(Self {
            program: tools::locate_tool(FFMPEG, configured)?,
        })
    }

    /// Use `program` without checking that it exists.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, request: &TranscodeRequest) -> Result<PathBuf> {
        debug!(
            "Running {} {:?}",
            self.program.display(),
            request.ffmpeg_args()
        );
        let output = tools::command(&self.program)
            .args(request.ffmpeg_args())
            .output()
            .map_err(|e| tools::spawn_error(FFMPEG, e))?;

        if !output.status.success() {
            return Err(Error::Download(DownloadError::Transcode {
                input: request.input.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }

        Ok(request.output.clone())
    }
}

/// Convert `input` to `format`, writing next to it or into `output_dir`.
///
/// The output keeps the input's stem; an existing file is never overwritten,
/// a ` (N)` suffix is chosen instead.
pub fn convert_file(
    transcoder: &dyn Transcoder,
    input: &Path,
    output_dir: Option<&Path>,
    format: AudioFormat,
    quality: AudioQuality,
) -> Result<PathBuf> {
    if !input.is_file() {
        return Err(Error::FileSystem(FileSystemError::ReadFailed {
            path: input.to_path_buf(),
            reason: "input file does not exist".to_string(),
        }));
    }

    let directory = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    };
    fs::create_dir_all(&directory).map_err(|e| {
        Error::FileSystem(FileSystemError::CreateDirFailed {
            path: directory.clone(),
            reason: e.to_string(),
        })
    })?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = naming::to_file_name(None, &stem, format.extension());
    let target = naming::resolve_collision(&directory.join(file_name))?;

    let request = TranscodeRequest::new(input, &target, format, quality);
    let written = transcoder.transcode(&request)?;
    info!("Converted {} -> {}", input.display(), written.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mockall::predicate::function;
    use tempfile::TempDir;

    #[test]
    fn test_args_for_lossy_format() {
        let request = TranscodeRequest::new(
            "/in/song.m4a",
            "/out/song.mp3",
            AudioFormat::Mp3,
            AudioQuality::Kbps320,
        );
        let args: Vec<String> = request
            .ffmpeg_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-nostdin",
                "-hide_banner",
                "-i",
                "/in/song.m4a",
                "-vn",
                "-b:a",
                "320k",
                "-y",
                "/out/song.mp3"
            ]
        );
    }

    #[test]
    fn test_args_for_lossless_format_omit_bitrate() {
        let request = TranscodeRequest::new(
            "/in/song.mp3",
            "/out/song.wav",
            AudioFormat::Wav,
            AudioQuality::Kbps320,
        );
        assert_eq!(request.bitrate_kbps, None);
        assert!(!request.ffmpeg_args().iter().any(|a| a == "-b:a"));
    }

    #[test]
    fn test_missing_binary_is_tool_missing() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let transcoder = FfmpegTranscoder::with_program(temp_dir.path().join("no-ffmpeg"));
        let request = TranscodeRequest::new(
            temp_dir.path().join("a.mp3"),
            temp_dir.path().join("a.wav"),
            AudioFormat::Wav,
            AudioQuality::default(),
        );

        let err = transcoder.transcode(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolMissing);
    }

    mod convert_tests {
        use super::*;

        #[test]
        fn test_convert_writes_next_to_input() {
            let temp_dir = TempDir::new().expect("Should create temp dir");
            let input = temp_dir.path().join("Artist - Song.m4a");
            fs::write(&input, b"audio").expect("Should write file");
            let expected = temp_dir.path().join("Artist - Song.mp3");

            let mut transcoder = MockTranscoder::new();
            let wanted = expected.clone();
            transcoder
                .expect_transcode()
                .with(function(move |r: &TranscodeRequest| {
                    r.output == wanted && r.bitrate_kbps == Some(192)
                }))
                .times(1)
                .returning(|r| Ok(r.output.clone()));

            let written = convert_file(
                &transcoder,
                &input,
                None,
                AudioFormat::Mp3,
                AudioQuality::Kbps192,
            )
            .expect("Should convert");
            assert_eq!(written, expected);
        }

        #[test]
        fn test_convert_never_overwrites() {
            let temp_dir = TempDir::new().expect("Should create temp dir");
            let input = temp_dir.path().join("track.flac");
            fs::write(&input, b"audio").expect("Should write file");
            fs::write(temp_dir.path().join("track.mp3"), b"old").expect("Should write file");

            let mut transcoder = MockTranscoder::new();
            transcoder
                .expect_transcode()
                .times(1)
                .returning(|r| Ok(r.output.clone()));

            let written = convert_file(
                &transcoder,
                &input,
                None,
                AudioFormat::Mp3,
                AudioQuality::Kbps128,
            )
            .expect("Should convert");
            assert_eq!(written, temp_dir.path().join("track (1).mp3"));
        }

        #[test]
        fn test_convert_into_output_dir() {
            let temp_dir = TempDir::new().expect("Should create temp dir");
            let input = temp_dir.path().join("track.mp3");
            fs::write(&input, b"audio").expect("Should write file");
            let out_dir = temp_dir.path().join("converted");

            let mut transcoder = MockTranscoder::new();
            transcoder
                .expect_transcode()
                .returning(|r| Ok(r.output.clone()));

            let written = convert_file(
                &transcoder,
                &input,
                Some(&out_dir),
                AudioFormat::Flac,
                AudioQuality::Kbps128,
            )
            .expect("Should convert");
            assert_eq!(written, out_dir.join("track.flac"));
            assert!(out_dir.is_dir());
        }

        #[test]
        fn test_convert_missing_input() {
            let temp_dir = TempDir::new().expect("Should create temp dir");
            let transcoder = MockTranscoder::new();

            let err = convert_file(
                &transcoder,
                &temp_dir.path().join("missing.mp3"),
                None,
                AudioFormat::Wav,
                AudioQuality::default(),
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FileSystem);
        }

        #[test]
        fn test_convert_passes_failure_through() {
            let temp_dir = TempDir::new().expect("Should create temp dir");
            let input = temp_dir.path().join("track.mp3");
            fs::write(&input, b"audio").expect("Should write file");

            let mut transcoder = MockTranscoder::new();
            transcoder.expect_transcode().returning(|r| {
                Err(Error::Download(DownloadError::Transcode {
                    input: r.input.clone(),
                    code: Some(1),
                    stderr: "Invalid data found when processing input".to_string(),
                }))
            });

            let err = convert_file(
                &transcoder,
                &input,
                None,
                AudioFormat::Aac,
                AudioQuality::default(),
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transcode);
            assert!(err.to_string().contains("Invalid data found"));
        }
    }
}
