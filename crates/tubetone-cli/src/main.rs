//! Tubetone command line front end.
//!
//! Progress and log output go to stderr; the JSON result of every command is
//! printed on stdout.

mod logging;
mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, debug, info, warn};
use tubetone_core::config::validate_storage_directory;
use tubetone_core::coordinator::worker_failure;
use tubetone_core::{
    AppConfig, AudioFormat, AudioQuality, Error, ErrorKind, FetchCoordinator, FetchOutcome,
    FfmpegTranscoder, JobReport, Result, UrlKind, classify_url, clean_video_url, convert_file,
    preview_name,
};

use crate::logging::{LoggingConfig, LoggingGuard};
use crate::render::ProgressRenderer;

/// Download YouTube audio with clean, collision-safe file names.
#[derive(Debug, Parser)]
#[command(name = "tubetone", version, about)]
struct Cli {
    /// Console log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Hide the progress bar and status lines.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a video's audio, or a whole playlist into its own folder.
    Get {
        /// Video or playlist URL.
        url: String,

        /// Keep the playlist of a watch URL that also carries `list=`.
        #[arg(long)]
        playlist: bool,

        #[command(flatten)]
        audio: AudioArgs,

        /// Output directory (defaults to the configured one).
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Rename playlist entries with the artist/song policy.
        #[arg(long)]
        rename_entries: bool,
    },

    /// Convert a local audio or video file with ffmpeg.
    Convert {
        /// File to convert.
        input: PathBuf,

        #[command(flatten)]
        audio: AudioArgs,

        /// Output directory (defaults to the input's directory).
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Show the file name a title would be saved under.
    Name {
        /// Raw video title.
        title: String,

        /// Audio format.
        #[arg(short, long, default_value = "mp3")]
        format: AudioFormat,
    },
}

#[derive(Debug, clap::Args)]
struct AudioArgs {
    /// Audio format: mp3, aac, wav, flac or m4a.
    #[arg(short, long)]
    format: Option<AudioFormat>,

    /// Bitrate for lossy formats: 64, 128, 192 or 320.
    #[arg(short = 'b', long, value_name = "KBPS")]
    quality: Option<AudioQuality>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResult {
    success: bool,
    input: PathBuf,
    output_path: PathBuf,
    format: AudioFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);
    debug!(?cli, "Parsed command line");

    match cli.command {
        Command::Get {
            url,
            playlist,
            audio,
            output,
            rename_entries,
        } => {
            let result = get(
                cli.config.as_deref(),
                &url,
                playlist,
                &audio,
                output,
                rename_entries,
                cli.quiet,
            )
            .await;
            let code = exit_code(result.as_ref().err());
            emit(&JobReport::from_result(&result), code)
        }
        Command::Convert {
            input,
            audio,
            output,
        } => match convert(cli.config.as_deref(), input, &audio, output).await {
            Ok(converted) => emit(&converted, ExitCode::SUCCESS),
            Err(e) => emit(&JobReport::failure(&e), exit_code(Some(&e))),
        },
        Command::Name { title, format } => {
            emit(&preview_name(&title, format.extension()), ExitCode::SUCCESS)
        }
    }
}

async fn get(
    config_path: Option<&Path>,
    url: &str,
    playlist: bool,
    audio: &AudioArgs,
    output: Option<PathBuf>,
    rename_entries: bool,
    quiet: bool,
) -> Result<FetchOutcome> {
    let mut config = load_config(config_path)?;
    apply_audio_args(&mut config, audio);
    match output {
        Some(output) => config.set_output_directory(std::path::absolute(output)?)?,
        None => validate_storage_directory(&config.output_directory)?,
    }
    config.rename_collection_entries |= rename_entries;

    let mut renderer = ProgressRenderer::new(quiet);
    if let Some(notice) = playlist_notice(url, playlist) {
        renderer.message(notice);
    }
    let url = clean_video_url(url, playlist)?;
    info!("Starting download of {url}");

    let coordinator = Arc::new(FetchCoordinator::with_yt_dlp(config)?);
    let mut handle = coordinator.spawn(url, None);

    // Both channels close once the worker drops its sink.
    loop {
        tokio::select! {
            Some(percent) = handle.progress.recv() => renderer.percent(percent),
            Some(message) = handle.messages.recv() => renderer.message(&message),
            else => break,
        }
    }
    renderer.finish();

    handle.wait().await
}

async fn convert(
    config_path: Option<&Path>,
    input: PathBuf,
    audio: &AudioArgs,
    output: Option<PathBuf>,
) -> Result<ConvertResult> {
    let mut config = load_config(config_path)?;
    apply_audio_args(&mut config, audio);
    let output = output.map(std::path::absolute).transpose()?;
    let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.as_deref())?;
    let format = config.audio_format;
    let quality = config.audio_quality;

    let output_path = tokio::task::spawn_blocking({
        let input = input.clone();
        move || convert_file(&transcoder, &input, output.as_deref(), format, quality)
    })
    .await
    .map_err(|e| worker_failure(Some(e)))??;

    Ok(ConvertResult {
        success: true,
        input,
        output_path,
        format,
    })
}

/// Tell the user when `--playlist` does not match what the URL names.
fn playlist_notice(url: &str, playlist: bool) -> Option<&'static str> {
    let kind = classify_url(url);
    if playlist && !kind.has_playlist() {
        Some("URL names no playlist; --playlist has no effect")
    } else if !playlist && kind == UrlKind::WatchWithPlaylist {
        Some("Downloading only this video; pass --playlist for the whole list")
    } else {
        None
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    path.map_or_else(AppConfig::load, AppConfig::load_from)
}

fn apply_audio_args(config: &mut AppConfig, audio: &AudioArgs) {
    if let Some(format) = audio.format {
        config.audio_format = format;
    }
    if let Some(quality) = audio.quality {
        config.audio_quality = quality;
    }
}

fn init_logging(cli: &Cli) -> Option<LoggingGuard> {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };

    match logging::init(&LoggingConfig::auto().with_console_level(level)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_max_level(level)
                .try_init();
            warn!("File logging disabled: {e}");
            None
        }
    }
}

fn exit_code(error: Option<&Error>) -> ExitCode {
    match error.map(Error::kind) {
        None => ExitCode::SUCCESS,
        Some(ErrorKind::ToolMissing) => ExitCode::from(127),
        Some(ErrorKind::Configuration) => ExitCode::from(2),
        Some(_) => ExitCode::FAILURE,
    }
}

fn emit<T: Serialize>(value: &T, code: ExitCode) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            code
        }
        Err(e) => {
            eprintln!("Failed to serialize result: {e}");
            ExitCode::FAILURE
        }
    }
}
