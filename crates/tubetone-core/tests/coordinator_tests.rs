//! Integration tests for the download pipeline.
//!
//! The resolver and fetcher are replaced by in-process fakes that write files
//! into temporary directories the way yt-dlp would, so the whole
//! probe -> fetch -> finalize flow runs without network access.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use filetime::{FileTime, set_file_mtime};
use tempfile::TempDir;
use tubetone_core::{
    AppConfig, AudioFormat, AudioQuality, Error, ErrorKind, FetchCoordinator, FetchOutcome,
    FetchRequest, Fetcher, JobReport, MediaRef, NoopSink, RawProgress, Result, SourceResolver,
    error::DownloadError,
};

// =============================================================================
// Fakes
// =============================================================================

/// Resolver that always reports the same media and records the URLs it saw.
struct StaticResolver {
    media: MediaRef,
    seen: Mutex<Vec<String>>,
}

impl StaticResolver {
    fn new(media: MediaRef) -> Arc<Self> {
        Arc::new(Self {
            media,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl SourceResolver for StaticResolver {
    fn probe(&self, url: &str) -> Result<MediaRef> {
        self.seen.lock().expect("lock").push(url.to_string());
        Ok(self.media.clone())
    }
}

/// How the fake downloader names its output.
enum Output {
    /// Exactly the requested template.
    Template,
    /// A different `temp_` name, as when a post-processor renames the file.
    Renamed(&'static str),
    /// One file per title inside the collection template.
    Entries(Vec<&'static str>),
}

/// Fetcher that writes files like yt-dlp and records every request.
struct FakeFetcher {
    output: Output,
    events: Vec<RawProgress>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeFetcher {
    fn new(output: Output, events: Vec<RawProgress>) -> Arc<Self> {
        Arc::new(Self {
            output,
            events,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> FetchRequest {
        self.requests
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("fetch was called")
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, request: &FetchRequest, on_progress: &dyn Fn(RawProgress)) -> Result<()> {
        self.requests.lock().expect("lock").push(request.clone());
        for event in &self.events {
            on_progress(event.clone());
        }

        let ext = request.format.extension();
        match &self.output {
            Output::Template => {
                fs::write(request.output_template.replace("%(ext)s", ext), b"audio")?;
            }
            Output::Renamed(name) => {
                let dir = Path::new(&request.output_template)
                    .parent()
                    .expect("template has a directory");
                fs::write(dir.join(format!("{name}.{ext}")), b"audio")?;
            }
            Output::Entries(titles) => {
                for title in titles {
                    let path = request
                        .output_template
                        .replace("%(title)s", title)
                        .replace("%(ext)s", ext);
                    fs::write(path, b"audio")?;
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Test Fixtures and Utilities
// =============================================================================

/// Output directory plus a config pointing at it.
struct TestFixture {
    music_dir: TempDir,
    config: AppConfig,
}

impl TestFixture {
    fn new() -> Self {
        let music_dir = TempDir::new().expect("Should create temp dir");
        let config = AppConfig {
            output_directory: music_dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        Self { music_dir, config }
    }

    fn path(&self) -> &Path {
        self.music_dir.path()
    }

    fn coordinator(
        &self,
        resolver: Arc<StaticResolver>,
        fetcher: Arc<FakeFetcher>,
    ) -> FetchCoordinator {
        FetchCoordinator::new(resolver, fetcher, self.config.clone())
    }

    fn entries(&self) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(self.path())
            .expect("read dir")
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .collect();
        entries.sort();
        entries
    }
}

fn expect_item(outcome: FetchOutcome) -> tubetone_core::coordinator::ItemOutcome {
    match outcome {
        FetchOutcome::Item(item) => item,
        FetchOutcome::Collection(_) => panic!("expected a single item"),
    }
}

fn expect_collection(outcome: FetchOutcome) -> tubetone_core::coordinator::CollectionOutcome {
    match outcome {
        FetchOutcome::Collection(collection) => collection,
        FetchOutcome::Item(_) => panic!("expected a collection"),
    }
}

// =============================================================================
// Single item workflow
// =============================================================================

#[test]
fn test_single_item_end_to_end() {
    let fixture = TestFixture::new();
    let resolver = StaticResolver::new(MediaRef::video(
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "Rick Astley - Never Gonna Give You Up (Official Video) (4K Remaster)",
        "Rick Astley",
    ));
    let fetcher = FakeFetcher::new(
        Output::Template,
        vec![RawProgress::percent("50%"), RawProgress::finished()],
    );
    let coordinator = fixture.coordinator(Arc::clone(&resolver), Arc::clone(&fetcher));

    let item = expect_item(
        coordinator
            .run("https://www.youtube.com/watch?v=dQw4w9WgXcQ", None, &NoopSink)
            .expect("Should download"),
    );

    let expected = fixture.path().join("Rick Astley - Never Gonna Give You Up.mp3");
    assert_eq!(item.final_path, expected);
    assert_eq!(fixture.entries(), vec![expected]);

    let request = fetcher.last_request();
    assert!(!request.is_collection);
    assert_eq!(request.format, AudioFormat::Mp3);
    assert_eq!(request.quality_kbps, Some(192));
    let template_name = Path::new(&request.output_template)
        .file_name()
        .and_then(|n| n.to_str())
        .expect("template file name")
        .to_string();
    assert!(template_name.starts_with("temp_"));
    assert!(template_name.ends_with(".%(ext)s"));
}

#[test]
fn test_renamed_staging_file_newest_wins() {
    let fixture = TestFixture::new();
    let stale = fixture.path().join("temp_leftover.mp3");
    fs::write(&stale, b"old").expect("Should write file");
    set_file_mtime(&stale, FileTime::from_unix_time(1_000_000, 0)).expect("Should set mtime");

    let coordinator = fixture.coordinator(
        StaticResolver::new(MediaRef::video("u", "Daft Punk - One More Time", "Daft Punk")),
        FakeFetcher::new(Output::Renamed("temp_postprocessed"), Vec::new()),
    );

    let item = expect_item(coordinator.run("u", None, &NoopSink).expect("Should download"));
    assert_eq!(item.file_name, "Daft Punk - One More Time.mp3");
    assert!(stale.exists(), "stale staging files are left alone");
    assert!(!fixture.path().join("temp_postprocessed.mp3").exists());
}

#[test]
fn test_repeated_downloads_get_suffixes() {
    let fixture = TestFixture::new();
    let media = MediaRef::video("u", "Artist - Song", "a");

    let names: Vec<String> = (0..3)
        .map(|_| {
            let coordinator = fixture.coordinator(
                StaticResolver::new(media.clone()),
                FakeFetcher::new(Output::Template, Vec::new()),
            );
            expect_item(coordinator.run("u", None, &NoopSink).expect("ok")).file_name
        })
        .collect();

    assert_eq!(
        names,
        vec!["Artist - Song.mp3", "Artist - Song (1).mp3", "Artist - Song (2).mp3"]
    );
}

#[test]
fn test_configured_format_and_quality_reach_fetcher() {
    let mut fixture = TestFixture::new();
    fixture.config.audio_format = AudioFormat::M4a;
    fixture.config.audio_quality = AudioQuality::Kbps320;
    let fetcher = FakeFetcher::new(Output::Template, Vec::new());
    let coordinator = fixture.coordinator(
        StaticResolver::new(MediaRef::video("u", "Song by Singer", "a")),
        Arc::clone(&fetcher),
    );

    let item = expect_item(coordinator.run("u", None, &NoopSink).expect("ok"));
    assert_eq!(item.file_name, "Singer - Song.m4a");
    assert_eq!(fetcher.last_request().quality_kbps, Some(320));
}

#[test]
fn test_fetch_without_output_is_finalize_error() {
    let fixture = TestFixture::new();
    let coordinator = fixture.coordinator(
        StaticResolver::new(MediaRef::video("u", "Song", "a")),
        FakeFetcher::new(Output::Entries(Vec::new()), Vec::new()),
    );

    let result = coordinator.run("u", None, &NoopSink);
    let err = result.as_ref().expect_err("nothing was written");
    assert_eq!(err.kind(), ErrorKind::Finalize);

    let report = serde_json::to_value(JobReport::from_result(&result)).expect("serialize");
    assert_eq!(report["success"], false);
    assert!(report["error"].as_str().is_some_and(|e| e.contains(".mp3")));
}

// =============================================================================
// Collection workflow
// =============================================================================

#[test]
fn test_collection_of_five_creates_one_directory() {
    let fixture = TestFixture::new();
    let fetcher = FakeFetcher::new(
        Output::Entries(vec!["One", "Two", "Three", "Four", "Five"]),
        Vec::new(),
    );
    let coordinator = fixture.coordinator(
        StaticResolver::new(MediaRef::collection(
            "https://www.youtube.com/playlist?list=PL1",
            "Best of <2023> | Mix",
            "Someone",
            5,
        )),
        Arc::clone(&fetcher),
    );

    let collection =
        expect_collection(coordinator.run("https://www.youtube.com/playlist?list=PL1", None, &NoopSink).expect("ok"));

    let dir = fixture.path().join("Best of 2023 Mix");
    assert_eq!(fixture.entries(), vec![dir.clone()]);
    assert_eq!(collection.output_path, dir);
    assert_eq!(collection.files.len(), 5);

    let request = fetcher.last_request();
    assert!(request.is_collection);
    assert!(request.output_template.ends_with("%(title)s.%(ext)s"));

    let report = serde_json::to_value(JobReport::from_outcome(&FetchOutcome::Collection(collection)))
        .expect("serialize");
    assert_eq!(report["title"], "Best of <2023> | Mix");
}

// =============================================================================
// Spawned jobs
// =============================================================================

#[tokio::test]
async fn test_spawned_job_streams_progress() {
    let fixture = TestFixture::new();
    let coordinator = Arc::new(fixture.coordinator(
        StaticResolver::new(MediaRef::video("u", "Artist - Song", "a")),
        FakeFetcher::new(
            Output::Template,
            vec![
                RawProgress::percent("10%"),
                RawProgress::percent("N/A"),
                RawProgress::percent("40%"),
                RawProgress::finished(),
            ],
        ),
    ));

    let mut handle = coordinator.spawn("u", None);
    let mut percents = Vec::new();
    let outcome = loop {
        tokio::select! {
            Some(p) = handle.progress.recv() => percents.push(p),
            Some(_) = handle.messages.recv() => {}
            result = &mut handle.outcome => break result.expect("worker reported"),
        }
    };
    while let Ok(p) = handle.progress.try_recv() {
        percents.push(p);
    }

    let item = expect_item(outcome.expect("Should download"));
    assert_eq!(item.file_name, "Artist - Song.mp3");
    assert_eq!(percents, vec![10, 10, 40, 100]);
}

#[tokio::test]
async fn test_spawned_job_failure() {
    struct Unreachable;
    impl SourceResolver for Unreachable {
        fn probe(&self, url: &str) -> Result<MediaRef> {
            Err(Error::Download(DownloadError::Resolution {
                url: url.to_string(),
                reason: "ERROR: Unable to download webpage: timed out".to_string(),
            }))
        }
    }

    let fixture = TestFixture::new();
    let coordinator = Arc::new(FetchCoordinator::new(
        Arc::new(Unreachable),
        FakeFetcher::new(Output::Template, Vec::new()),
        fixture.config.clone(),
    ));

    let err = coordinator.spawn("u", None).wait().await.expect_err("probe fails");
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.to_string().contains("timed out"));
    assert!(fixture.entries().is_empty());
}

// =============================================================================
// Live tests
// =============================================================================

#[test]
#[ignore = "downloads from YouTube - run with: cargo test --ignored -- --nocapture"]
fn test_live_single_download() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let fixture = TestFixture::new();
    let coordinator =
        FetchCoordinator::with_yt_dlp(fixture.config.clone()).expect("yt-dlp is installed");

    let item = expect_item(
        coordinator
            .run("https://www.youtube.com/watch?v=jNQXAC9IVRw", None, &NoopSink)
            .expect("Should download"),
    );
    println!("Saved {}", item.final_path.display());
    assert!(item.final_path.is_file());
}
