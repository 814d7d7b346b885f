//! Download orchestration.
//!
//! [`FetchCoordinator`] is the single entry point for turning a URL into
//! finished audio files. Every job walks the same state machine:
//!
//! ```text
//! Probed -> Fetching -> Converting -> Finalizing -> Done
//!    \__________\____________\____________\______-> Failed
//! ```
//!
//! Single items are fetched under a staging name (`temp_...`) and only
//! renamed to their human-readable name once the downloader is done, so a
//! half-written file never carries a final name. Collections are fetched into
//! their own sub-directory and the downloader names the entries.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, AudioFormat};
use crate::error::{DownloadError, Error, FileSystemError, Result};
use crate::fetch::{FetchRequest, Fetcher};
use crate::naming::{self, NamingRequest, NamingResult};
use crate::progress::{ChannelSink, ProgressAggregator, ProgressPhase, ProgressSink, RawProgress};
use crate::source::{MediaRef, SourceResolver};
use crate::ytdlp::{YtDlpConfig, YtDlpFetcher, YtDlpResolver};

/// File name prefix of staged single-item downloads.
pub const STAGING_PREFIX: &str = "temp_";

static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(0);

/// Lifecycle of a [`FetchJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Metadata known, output root chosen.
    Probed,
    /// Downloader running.
    Fetching,
    /// Downloader finished transferring and is post-processing.
    Converting,
    /// Locating and renaming the output.
    Finalizing,
    /// Terminal: success.
    Done,
    /// Terminal: failure.
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Probed => "probed",
            Self::Fetching => "fetching",
            Self::Converting => "converting",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One in-flight request, owned by the coordinator until it terminates.
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Probed metadata.
    pub media: MediaRef,
    /// Directory the job writes into.
    pub output_root: PathBuf,
    /// Staging stem (single items) or collection directory name.
    pub temp_locator: String,
    /// Final file or directory, once known.
    pub final_path: Option<PathBuf>,
    /// Current state.
    pub state: JobState,
}

impl FetchJob {
    fn new(media: MediaRef, output_root: PathBuf, temp_locator: String) -> Self {
        Self {
            media,
            output_root,
            temp_locator,
            final_path: None,
            state: JobState::Probed,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug!("Job '{}': {} -> {}", self.media.title, self.state, next);
        self.state = next;
    }
}

/// A finished single-item download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Probed metadata.
    pub media: MediaRef,
    /// Where the file ended up.
    pub final_path: PathBuf,
    /// Extracted artist.
    pub artist: Option<String>,
    /// Extracted song.
    pub song: String,
    /// File name component of `final_path`.
    pub file_name: String,
    /// Format produced.
    pub format: AudioFormat,
    /// Bitrate requested (`None` for lossless).
    pub quality_kbps: Option<u32>,
}

/// A finished collection download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Probed metadata.
    pub media: MediaRef,
    /// Collection directory.
    pub output_path: PathBuf,
    /// Files written by this job, after any renaming.
    pub files: Vec<PathBuf>,
}

/// Terminal result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Single item.
    Item(ItemOutcome),
    /// Collection.
    Collection(CollectionOutcome),
}

/// Progress tracking shared with the downloader's callback.
struct Tracker {
    aggregator: ProgressAggregator,
    job: FetchJob,
}

/// Runs download jobs against a resolver and a fetcher.
pub struct FetchCoordinator {
    resolver: Arc<dyn SourceResolver>,
    fetcher: Arc<dyn Fetcher>,
    config: AppConfig,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Create a coordinator from explicit collaborators.
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        fetcher: Arc<dyn Fetcher>,
        config: AppConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            config,
        }
    }

    /// Create a coordinator backed by yt-dlp, located via `config`.
    pub fn with_yt_dlp(config: AppConfig) -> Result<Self> {
        let yt_dlp = YtDlpConfig::locate(config.yt_dlp_path.as_deref(), config.ffmpeg_path.as_deref())?;
        Ok(Self::new(
            Arc::new(YtDlpResolver::new(yt_dlp.clone())),
            Arc::new(YtDlpFetcher::new(yt_dlp)),
            config,
        ))
    }

    /// Configuration jobs run with.
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one job to completion on the current thread.
    ///
    /// `output_root` overrides the configured output directory.
    pub fn run(
        &self,
        url: &str,
        output_root: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome> {
        let result = self.run_inner(url, output_root, sink);
        if let Err(e) = &result {
            error!("Download of {} failed: {}", url, e);
            sink.on_message(&format!("Error: {e}"));
        }
        result
    }

    fn run_inner(
        &self,
        url: &str,
        output_root: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome> {
        sink.on_message(&format!("Resolving {url}"));
        let media = self.resolver.probe(url)?;
        info!("Resolved {} as {} '{}'", url, media.kind, media.title);

        let root = output_root.map_or_else(|| self.config.output_directory.clone(), Path::to_path_buf);
        create_dir(&root)?;

        if media.is_collection() {
            self.run_collection(media, root, sink).map(FetchOutcome::Collection)
        } else {
            self.run_item(media, root, sink).map(FetchOutcome::Item)
        }
    }

    fn run_item(
        &self,
        media: MediaRef,
        root: PathBuf,
        sink: &dyn ProgressSink,
    ) -> Result<ItemOutcome> {
        let format = self.config.audio_format;
        let extension = format.extension();
        let staging = staging_stem();
        let request = FetchRequest {
            url: media.url.clone(),
            output_template: template_in(&root, &format!("{staging}.%(ext)s")),
            format,
            quality_kbps: self.config.effective_bitrate_kbps(),
            is_collection: false,
        };

        sink.on_message(&format!("Downloading '{}' as {}", media.title, format));
        let job = FetchJob::new(media, root, staging);
        let mut job = self.fetch_tracked(job, ProgressAggregator::new(), &request, sink)?;

        job.advance(JobState::Finalizing);
        let (naming, target) =
            match finalize_item(&job.output_root, &job.temp_locator, &job.media.title, extension) {
                Ok(finalized) => finalized,
                Err(e) => {
                    job.advance(JobState::Failed);
                    return Err(e);
                }
            };

        let file_name = target
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        job.final_path = Some(target.clone());
        job.advance(JobState::Done);
        info!("Saved {}", target.display());
        sink.on_message(&format!("Saved as {file_name}"));

        Ok(ItemOutcome {
            media: job.media,
            final_path: target,
            artist: naming.artist,
            song: naming.song,
            file_name,
            format,
            quality_kbps: request.quality_kbps,
        })
    }

    fn run_collection(
        &self,
        media: MediaRef,
        root: PathBuf,
        sink: &dyn ProgressSink,
    ) -> Result<CollectionOutcome> {
        let format = self.config.audio_format;
        let extension = format.extension();
        let dir_name = naming::collection_dir_name(&media.title);
        let directory = root.join(&dir_name);
        if directory.is_dir() {
            debug!("Reusing collection directory {}", directory.display());
        }
        create_dir(&directory)?;

        let before: HashSet<PathBuf> = files_with_extension(&directory, extension)?
            .into_iter()
            .collect();
        let request = FetchRequest {
            url: media.url.clone(),
            output_template: template_in(&directory, "%(title)s.%(ext)s"),
            format,
            quality_kbps: self.config.effective_bitrate_kbps(),
            is_collection: true,
        };

        let entries = media.entry_count.unwrap_or(1);
        sink.on_message(&format!(
            "Downloading collection '{}' ({} entries) as {}",
            media.title, entries, format
        ));
        let job = FetchJob::new(media, root, dir_name);
        let mut job = self.fetch_tracked(
            job,
            ProgressAggregator::for_collection(entries),
            &request,
            sink,
        )?;

        job.advance(JobState::Finalizing);
        let files = match self.finalize_collection(&directory, &before, extension) {
            Ok(files) => files,
            Err(e) => {
                job.advance(JobState::Failed);
                return Err(e);
            }
        };

        job.final_path = Some(directory.clone());
        job.advance(JobState::Done);
        info!(
            "Saved {} file(s) to {}",
            files.len(),
            directory.display()
        );
        sink.on_message(&format!("Saved collection to {}", directory.display()));

        Ok(CollectionOutcome {
            media: job.media,
            output_path: directory,
            files,
        })
    }

    /// Files this job added to the collection directory, renamed if enabled.
    fn finalize_collection(
        &self,
        directory: &Path,
        before: &HashSet<PathBuf>,
        extension: &str,
    ) -> Result<Vec<PathBuf>> {
        let produced: Vec<PathBuf> = files_with_extension(directory, extension)?
            .into_iter()
            .filter(|path| !before.contains(path))
            .collect();
        if self.config.rename_collection_entries {
            rename_entries(produced, extension)
        } else {
            Ok(produced)
        }
    }

    /// Run the fetcher, folding its progress into `sink`.
    fn fetch_tracked(
        &self,
        mut job: FetchJob,
        aggregator: ProgressAggregator,
        request: &FetchRequest,
        sink: &dyn ProgressSink,
    ) -> Result<FetchJob> {
        job.advance(JobState::Fetching);
        let tracker = Mutex::new(Tracker { aggregator, job });

        let on_progress = |raw: RawProgress| {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            let event = tracker.aggregator.ingest(&raw);
            if event.phase == ProgressPhase::Finished
                && event.percent == 100
                && tracker.job.state == JobState::Fetching
            {
                tracker.job.advance(JobState::Converting);
            }
            sink.on_progress(event.percent);
            if let Some(milestone) = event.milestone {
                sink.on_message(&format!("Download progress: {milestone}%"));
            }
        };
        let fetched = self.fetcher.fetch(request, &on_progress);

        let Tracker {
            mut aggregator,
            mut job,
        } = tracker.into_inner().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = fetched {
            job.advance(JobState::Failed);
            return Err(e);
        }

        // Some downloaders never send a "finished" marker.
        if aggregator.current_percent() < 100 {
            let mut last = aggregator.ingest(&RawProgress::finished());
            while last.percent < 100 {
                last = aggregator.ingest(&RawProgress::finished());
            }
            sink.on_progress(last.percent);
            if let Some(milestone) = last.milestone {
                sink.on_message(&format!("Download progress: {milestone}%"));
            }
        }
        if job.state == JobState::Fetching {
            job.advance(JobState::Converting);
        }
        Ok(job)
    }

    /// Run a job on a blocking worker and return channels to observe it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self: &Arc<Self>, url: impl Into<String>, output_root: Option<PathBuf>) -> JobHandle {
        let url = url.into();
        let (sink, progress, messages) = ChannelSink::new();
        let (outcome_tx, outcome) = oneshot::channel();
        let coordinator = Arc::clone(self);

        let task = tokio::task::spawn_blocking(move || {
            let result = coordinator.run(&url, output_root.as_deref(), &sink);
            if outcome_tx.send(result).is_err() {
                debug!("Job handle dropped before {} finished", url);
            }
        });

        JobHandle {
            progress,
            messages,
            outcome,
            task,
        }
    }
}

/// Observer side of a spawned job.
///
/// Drain `progress` and `messages` while awaiting [`JobHandle::wait`], or
/// select over all three.
#[derive(Debug)]
pub struct JobHandle {
    /// Overall percentage updates (monotonic).
    pub progress: mpsc::UnboundedReceiver<u8>,
    /// Human-readable status lines.
    pub messages: mpsc::UnboundedReceiver<String>,
    /// Terminal result.
    pub outcome: oneshot::Receiver<Result<FetchOutcome>>,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait for the terminal result, ignoring progress.
    pub async fn wait(self) -> Result<FetchOutcome> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(worker_failure(self.task.await.err())),
        }
    }
}

/// Error for a worker that ended without reporting.
pub fn worker_failure(join_error: Option<tokio::task::JoinError>) -> Error {
    let reason = join_error.map_or_else(
        || "worker exited without a result".to_string(),
        |e| e.to_string(),
    );
    Error::Download(DownloadError::WorkerFailed(reason))
}

fn staging_stem() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let seq = NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed);
    format!("{STAGING_PREFIX}{:x}_{nanos:x}_{seq}", std::process::id())
}

fn template_in(directory: &Path, file_template: &str) -> String {
    directory.join(file_template).to_string_lossy().into_owned()
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        Error::FileSystem(FileSystemError::CreateDirFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        Error::FileSystem(FileSystemError::RenameFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Regular files in `directory` with `extension`, sorted by path.
pub fn files_with_extension(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory).map_err(|e| {
        Error::FileSystem(FileSystemError::ReadFailed {
            path: directory.to_path_buf(),
            reason: e.to_string(),
        })
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, extension))
        .collect();
    files.sort();
    Ok(files)
}

/// Find the file a single-item fetch produced.
///
/// The exact staging name wins. Otherwise the newest `temp_*` file with the
/// extension is taken, since a post-processor may have changed the name.
pub fn locate_output(directory: &Path, staging_stem: &str, extension: &str) -> Result<PathBuf> {
    let expected = directory.join(format!("{staging_stem}.{extension}"));
    if expected.is_file() {
        return Ok(expected);
    }

    let newest = files_with_extension(directory, extension)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(STAGING_PREFIX))
        })
        .filter_map(|path| {
            fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(|modified| (modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path);

    if let Some(path) = &newest {
        warn!(
            "Staged file {}.{} not found, using newest candidate {}",
            staging_stem,
            extension,
            path.display()
        );
    }

    newest.ok_or_else(|| {
        Error::Download(DownloadError::Finalize {
            directory: directory.to_path_buf(),
            extension: extension.to_string(),
        })
    })
}

/// Locate the staged download, name it from `title`, and move it into place.
fn finalize_item(
    root: &Path,
    staging_stem: &str,
    title: &str,
    extension: &str,
) -> Result<(NamingResult, PathBuf)> {
    let staged = locate_output(root, staging_stem, extension)?;
    debug!("Located downloaded file {}", staged.display());

    let naming = NamingRequest::new(title, extension).resolve();
    let target = naming::resolve_collision(&root.join(&naming.final_file_name))?;
    rename(&staged, &target)?;
    Ok((naming, target))
}

/// Rename collection entries through the naming pipeline, using each file's
/// stem as its title.
fn rename_entries(files: Vec<PathBuf>, extension: &str) -> Result<Vec<PathBuf>> {
    let mut renamed = Vec::with_capacity(files.len());
    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let naming = NamingRequest::new(stem, extension).resolve();

        let current = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if current.as_deref() == Some(naming.final_file_name.as_str()) {
            renamed.push(path);
            continue;
        }

        let parent = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
        let target = naming::resolve_collision(&parent.join(&naming.final_file_name))?;
        rename(&path, &target)?;
        debug!("Renamed {} -> {}", path.display(), target.display());
        renamed.push(target);
    }
    Ok(renamed)
}
