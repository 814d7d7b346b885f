//! Application configuration management.
//!
//! Handles loading, saving, and validating the settings every download uses:
//! where files go, which audio format and bitrate to produce, and where the
//! external tools live.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};

/// Target audio container/codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MPEG layer 3 (default).
    #[default]
    Mp3,
    /// Raw AAC.
    Aac,
    /// Uncompressed PCM.
    Wav,
    /// Free lossless codec.
    Flac,
    /// AAC in an MP4 container.
    M4a,
}

impl AudioFormat {
    /// All supported formats.
    pub const ALL: [Self; 5] = [Self::Mp3, Self::Aac, Self::Wav, Self::Flac, Self::M4a];

    /// File extension, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::M4a => "m4a",
        }
    }

    /// Lossless formats ignore the bitrate setting.
    pub const fn is_lossless(self) -> bool {
        matches!(self, Self::Wav | Self::Flac)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches('.').to_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == wanted)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Unsupported audio format '{s}' (expected one of mp3, aac, wav, flac, m4a)"
                ))
            })
    }
}

/// Target bitrate for lossy formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum AudioQuality {
    /// 64 kbps.
    Kbps64,
    /// 128 kbps.
    Kbps128,
    /// 192 kbps (default).
    #[default]
    Kbps192,
    /// 320 kbps.
    Kbps320,
}

impl AudioQuality {
    /// All supported bitrates, lowest first.
    pub const ALL: [Self; 4] = [Self::Kbps64, Self::Kbps128, Self::Kbps192, Self::Kbps320];

    /// Bitrate in kilobits per second.
    pub const fn kbps(self) -> u32 {
        match self {
            Self::Kbps64 => 64,
            Self::Kbps128 => 128,
            Self::Kbps192 => 192,
            Self::Kbps320 => 320,
        }
    }
}

impl std::fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} kbps", self.kbps())
    }
}

impl TryFrom<u32> for AudioQuality {
    type Error = Error;

    fn try_from(kbps: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|quality| quality.kbps() == kbps)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Unsupported audio quality {kbps} kbps (expected 64, 128, 192 or 320)"
                ))
            })
    }
}

impl From<AudioQuality> for u32 {
    fn from(quality: AudioQuality) -> Self {
        quality.kbps()
    }
}

impl FromStr for AudioQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim().trim_end_matches("kbps").trim_end_matches('k').trim();
        let kbps: u32 = digits
            .parse()
            .map_err(|_| Error::Configuration(format!("Invalid audio quality '{s}'")))?;
        Self::try_from(kbps)
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Directory downloads are written to.
    pub output_directory: PathBuf,
    /// Audio format to produce.
    #[serde(default)]
    pub audio_format: AudioFormat,
    /// Bitrate for lossy formats.
    #[serde(default)]
    pub audio_quality: AudioQuality,
    /// Explicit yt-dlp binary; looked up on `PATH` when unset.
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,
    /// Explicit ffmpeg binary; looked up on `PATH` when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    /// Rename every file of a collection download through the naming pipeline.
    #[serde(default)]
    pub rename_collection_entries: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            audio_format: AudioFormat::default(),
            audio_quality: AudioQuality::default(),
            yt_dlp_path: None,
            ffmpeg_path: None,
            rename_collection_entries: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the per-user config file, writing defaults on
    /// first use.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `config_path`, writing defaults if it is missing.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(config_path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: config_path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;

        info!("Loaded config from {}", config_path.display());
        debug!("Output directory: {}", config.output_directory.display());

        Ok(config)
    }

    /// Save configuration to the per-user config file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `config_path`, creating parent directories.
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: config_path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", config_path.display());
        Ok(())
    }

    /// Change the output directory after validating it.
    pub fn set_output_directory(&mut self, path: PathBuf) -> Result<()> {
        validate_storage_directory(&path)?;

        self.output_directory = path;
        info!(
            "Updated output directory to: {}",
            self.output_directory.display()
        );
        Ok(())
    }

    /// Bitrate handed to collaborators; `None` for lossless formats.
    pub const fn effective_bitrate_kbps(&self) -> Option<u32> {
        if self.audio_format.is_lossless() {
            None
        } else {
            Some(self.audio_quality.kbps())
        }
    }

    /// Get the path to the config file.
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Default download directory: `~/Audios`.
pub fn default_output_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Audios")
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("tubetone")
        .join("config.json")
}

/// Check that `path` can hold downloads: absolute, a directory, writable.
/// Missing directories are created.
pub fn validate_storage_directory(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::Configuration(
            "Output directory must be an absolute path".to_string(),
        ));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "Path exists but is not a directory: {}",
                path.display()
            )));
        }

        let probe = path.join(".tubetone_write_test");
        match fs::write(&probe, "test") {
            Ok(()) => {
                let _ = fs::remove_file(&probe);
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "Directory is not writable: {} ({})",
                    path.display(),
                    e
                )));
            }
        }
    } else {
        fs::create_dir_all(path).map_err(|e| {
            Error::Configuration(format!("Cannot create directory {}: {}", path.display(), e))
        })?;
    }

    Ok(())
}
