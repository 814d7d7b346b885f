//! Consumer-facing job results.
//!
//! These are the flat JSON shapes front ends print or hand to a UI:
//! `{"success": true, ...}` on success, `{"success": false, "error": ...}`
//! otherwise.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::AudioFormat;
use crate::coordinator::FetchOutcome;
use crate::error::{Error, Result};

/// Result of a single-item download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleItemResult {
    /// Always `true`.
    pub success: bool,
    /// Title reported by the source.
    pub title: String,
    /// Uploader reported by the source.
    pub author: String,
    /// Extracted artist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Extracted song.
    pub song: String,
    /// Final file name.
    pub file_name: String,
    /// Final absolute path.
    pub full_path: PathBuf,
    /// Audio format produced.
    pub format: AudioFormat,
    /// Bitrate requested; `null` for lossless formats.
    pub quality_kbps: Option<u32>,
}

/// Result of a collection download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResult {
    /// Always `true`.
    pub success: bool,
    /// Collection title.
    pub title: String,
    /// Directory the entries were written to.
    pub output_path: PathBuf,
}

/// A failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResult {
    /// Always `false`.
    pub success: bool,
    /// Error text, including the collaborator's diagnostics.
    pub error: String,
}

/// Any job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobReport {
    /// Single item finished.
    Item(SingleItemResult),
    /// Collection finished.
    Collection(CollectionResult),
    /// Job failed.
    Failed(FailureResult),
}

impl JobReport {
    /// Build the report for a finished job.
    pub fn from_result(result: &Result<FetchOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::from_outcome(outcome),
            Err(e) => Self::failure(e),
        }
    }

    /// Report for a successful job.
    pub fn from_outcome(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Item(item) => Self::Item(SingleItemResult {
                success: true,
                title: item.media.title.clone(),
                author: item.media.author.clone(),
                artist: item.artist.clone(),
                song: item.song.clone(),
                file_name: item.file_name.clone(),
                full_path: item.final_path.clone(),
                format: item.format,
                quality_kbps: item.quality_kbps,
            }),
            FetchOutcome::Collection(collection) => Self::Collection(CollectionResult {
                success: true,
                title: collection.media.title.clone(),
                output_path: collection.output_path.clone(),
            }),
        }
    }

    /// Report for a failed job.
    pub fn failure(error: &Error) -> Self {
        Self::Failed(FailureResult {
            success: false,
            error: error.to_string(),
        })
    }

    /// `false` only for failures.
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}
