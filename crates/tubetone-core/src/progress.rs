//! Progress aggregation.
//!
//! Downloaders report progress in whatever shape they like: a percent string,
//! a byte counter pair, or just "finished". [`ProgressAggregator`] folds those
//! into one monotonic integer stream (0 to 100) and flags the milestones that
//! deserve a log line. A [`ProgressSink`] is where the stream goes.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Percentages that get a log line, each at most once per job.
pub const MILESTONES: [u8; 5] = [0, 25, 50, 75, 100];

/// Phase reported by a downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    /// Bytes are still arriving.
    Downloading,
    /// One download finished.
    Finished,
    /// The downloader hit an error.
    Error,
}

/// A progress notification exactly as the downloader delivered it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawProgress {
    /// Reported phase; `None` is treated as downloading.
    pub status: Option<ProgressPhase>,
    /// Percentage text such as `" 42.3%"` or `"N/A"`.
    pub percent_str: Option<String>,
    /// Expected total size in bytes.
    pub total_bytes: Option<u64>,
    /// Bytes received so far.
    pub downloaded_bytes: Option<u64>,
}

impl RawProgress {
    /// A downloading event carrying percentage text.
    pub fn percent(text: impl Into<String>) -> Self {
        Self {
            status: Some(ProgressPhase::Downloading),
            percent_str: Some(text.into()),
            ..Self::default()
        }
    }

    /// A downloading event carrying a byte counter pair.
    pub const fn bytes(downloaded: u64, total: u64) -> Self {
        Self {
            status: Some(ProgressPhase::Downloading),
            percent_str: None,
            total_bytes: Some(total),
            downloaded_bytes: Some(downloaded),
        }
    }

    /// A "finished" marker.
    pub const fn finished() -> Self {
        Self {
            status: Some(ProgressPhase::Finished),
            percent_str: None,
            total_bytes: None,
            downloaded_bytes: None,
        }
    }

    fn describe(&self) -> String {
        match (&self.percent_str, self.downloaded_bytes, self.total_bytes) {
            (Some(text), _, _) => text.trim().to_string(),
            (None, Some(done), Some(total)) => format!("{done}/{total} bytes"),
            _ => String::new(),
        }
    }
}

/// A normalized progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Phase of the raw event.
    pub phase: ProgressPhase,
    /// Overall percentage after this event (never lower than the last one).
    pub percent: u8,
    /// The raw percent text or byte counters, for diagnostics.
    pub raw: String,
    /// Milestone newly reached by this event, if any.
    pub milestone: Option<u8>,
}

/// Parse downloader percentage text (`"42.3%"`, `" 7%"`) into 0..=100.
///
/// Fractions are truncated. Returns `None` for `"N/A"`, garbage, or values
/// outside the range.
pub fn parse_percent(text: &str) -> Option<u8> {
    let value: f64 = text.trim().trim_end_matches('%').trim().parse().ok()?;
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

fn percent_from_bytes(downloaded: u64, total: u64) -> Option<u8> {
    if total == 0 || downloaded > total {
        return None;
    }
    Some((u128::from(downloaded) * 100 / u128::from(total)) as u8)
}

/// Folds raw downloader events into a monotonic percentage.
///
/// For a collection of `n` entries each entry contributes `1/n` of the
/// overall stream; 100 is only reported once the last entry finishes.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    entry_count: usize,
    completed_entries: usize,
    entry_percent: u8,
    current: u8,
    milestones_logged: usize,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    /// Aggregator for a single item.
    pub const fn new() -> Self {
        Self::for_collection(1)
    }

    /// Aggregator for a collection of `entry_count` items (at least one).
    pub const fn for_collection(entry_count: usize) -> Self {
        Self {
            entry_count: if entry_count == 0 { 1 } else { entry_count },
            completed_entries: 0,
            entry_percent: 0,
            current: 0,
            milestones_logged: 0,
        }
    }

    /// Current overall percentage.
    pub const fn current_percent(&self) -> u8 {
        self.current
    }

    /// Fold one raw event into the stream.
    pub fn ingest(&mut self, raw: &RawProgress) -> ProgressEvent {
        let phase = raw.status.unwrap_or(ProgressPhase::Downloading);

        match phase {
            ProgressPhase::Downloading => {
                let parsed = raw.percent_str.as_deref().map_or_else(
                    || match (raw.downloaded_bytes, raw.total_bytes) {
                        (Some(done), Some(total)) => percent_from_bytes(done, total),
                        _ => None,
                    },
                    parse_percent,
                );
                if let Some(percent) = parsed {
                    self.entry_percent = percent;
                }
            }
            ProgressPhase::Finished => {
                if self.completed_entries < self.entry_count {
                    self.completed_entries += 1;
                }
                self.entry_percent = 0;
            }
            ProgressPhase::Error => {}
        }

        self.current = self.current.max(self.overall());
        let milestone = self.take_milestone();
        if let Some(reached) = milestone {
            info!("Download progress: {}%", reached);
        }

        ProgressEvent {
            phase,
            percent: self.current,
            raw: raw.describe(),
            milestone,
        }
    }

    fn overall(&self) -> u8 {
        if self.completed_entries >= self.entry_count {
            return 100;
        }
        let total = self.completed_entries * 100 + usize::from(self.entry_percent);
        (total / self.entry_count).min(99) as u8
    }

    /// Highest milestone passed since the last call, marking every lower one.
    fn take_milestone(&mut self) -> Option<u8> {
        let passed = MILESTONES
            .iter()
            .take_while(|&&m| m <= self.current)
            .count();
        if passed > self.milestones_logged {
            self.milestones_logged = passed;
            Some(MILESTONES[passed - 1])
        } else {
            None
        }
    }
}

/// Where a job's progress goes.
pub trait ProgressSink: Send + Sync {
    /// Overall percentage changed (or was re-reported).
    fn on_progress(&self, percent: u8);

    /// A human-readable status line.
    fn on_message(&self, message: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _percent: u8) {}

    fn on_message(&self, _message: &str) {}
}

/// Forwards progress into unbounded channels drained by the caller.
///
/// Sends to a dropped receiver are ignored; the job keeps running.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    percent_tx: mpsc::UnboundedSender<u8>,
    message_tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    /// Create a sink and the two receivers it feeds.
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<u8>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (percent_tx, percent_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        (
            Self {
                percent_tx,
                message_tx,
            },
            percent_rx,
            message_rx,
        )
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, percent: u8) {
        let _ = self.percent_tx.send(percent);
    }

    fn on_message(&self, message: &str) {
        let _ = self.message_tx.send(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percents(agg: &mut ProgressAggregator, events: &[RawProgress]) -> Vec<u8> {
        events.iter().map(|e| agg.ingest(e).percent).collect()
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("42.3%"), Some(42));
        assert_eq!(parse_percent("  7.9% "), Some(7));
        assert_eq!(parse_percent("100%"), Some(100));
        assert_eq!(parse_percent("N/A"), None);
        assert_eq!(parse_percent("150%"), None);
        assert_eq!(parse_percent("-3%"), None);
        assert_eq!(parse_percent("NaN%"), None);
    }

    #[test]
    fn test_unparsable_keeps_previous() {
        let mut agg = ProgressAggregator::new();
        let seen = percents(
            &mut agg,
            &[
                RawProgress::percent("10%"),
                RawProgress::percent("N/A"),
                RawProgress::percent("40%"),
            ],
        );
        assert_eq!(seen, vec![10, 10, 40]);
    }

    #[test]
    fn test_never_regresses() {
        let mut agg = ProgressAggregator::new();
        let seen = percents(
            &mut agg,
            &[
                RawProgress::percent("60%"),
                RawProgress::percent("20%"),
                RawProgress::percent("500%"),
            ],
        );
        assert_eq!(seen, vec![60, 60, 60]);
    }

    #[test]
    fn test_byte_counters() {
        let mut agg = ProgressAggregator::new();
        assert_eq!(agg.ingest(&RawProgress::bytes(250, 1000)).percent, 25);
        assert_eq!(agg.ingest(&RawProgress::bytes(10, 0)).percent, 25);
        assert_eq!(agg.ingest(&RawProgress::bytes(2000, 1000)).percent, 25);
        assert_eq!(agg.ingest(&RawProgress::bytes(999, 1000)).percent, 99);
    }

    #[test]
    fn test_finished_forces_100_once() {
        let mut agg = ProgressAggregator::new();
        agg.ingest(&RawProgress::percent("30%"));
        let first = agg.ingest(&RawProgress::finished());
        assert_eq!(first.percent, 100);
        assert_eq!(first.milestone, Some(100));

        let again = agg.ingest(&RawProgress::finished());
        assert_eq!(again.percent, 100);
        assert_eq!(again.milestone, None);
    }

    #[test]
    fn test_error_phase_keeps_percent() {
        let mut agg = ProgressAggregator::new();
        agg.ingest(&RawProgress::percent("55%"));
        let event = agg.ingest(&RawProgress {
            status: Some(ProgressPhase::Error),
            ..RawProgress::default()
        });
        assert_eq!(event.phase, ProgressPhase::Error);
        assert_eq!(event.percent, 55);
    }

    mod milestone_tests {
        use super::*;

        #[test]
        fn test_milestones_logged_once_each() {
            let mut agg = ProgressAggregator::new();
            let milestones: Vec<Option<u8>> = ["0%", "0%", "25%", "26%", "50.0%", "74%", "75%"]
                .iter()
                .map(|p| agg.ingest(&RawProgress::percent(*p)).milestone)
                .collect();
            assert_eq!(
                milestones,
                vec![Some(0), None, Some(25), None, Some(50), None, Some(75)]
            );
        }

        #[test]
        fn test_jump_reports_highest_passed() {
            let mut agg = ProgressAggregator::new();
            assert_eq!(agg.ingest(&RawProgress::percent("60%")).milestone, Some(50));
            assert_eq!(agg.ingest(&RawProgress::percent("70%")).milestone, None);
            assert_eq!(agg.ingest(&RawProgress::percent("80%")).milestone, Some(75));
        }
    }

    mod collection_tests {
        use super::*;

        #[test]
        fn test_scaled_across_entries() {
            let mut agg = ProgressAggregator::for_collection(4);
            let seen = percents(
                &mut agg,
                &[
                    RawProgress::percent("100%"),
                    RawProgress::finished(),
                    RawProgress::percent("50%"),
                    RawProgress::finished(),
                    RawProgress::finished(),
                ],
            );
            assert_eq!(seen, vec![25, 25, 37, 50, 75]);
            assert_eq!(agg.ingest(&RawProgress::finished()).percent, 100);
        }

        #[test]
        fn test_100_only_after_last_entry() {
            let mut agg = ProgressAggregator::for_collection(2);
            agg.ingest(&RawProgress::finished());
            let event = agg.ingest(&RawProgress::percent("100%"));
            assert_eq!(event.percent, 99);
            assert_eq!(agg.ingest(&RawProgress::finished()).percent, 100);
        }

        #[test]
        fn test_zero_entries_treated_as_one() {
            let mut agg = ProgressAggregator::for_collection(0);
            assert_eq!(agg.ingest(&RawProgress::finished()).percent, 100);
        }
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut percent_rx, mut message_rx) = ChannelSink::new();
        sink.on_progress(42);
        sink.on_message("hello");
        assert_eq!(percent_rx.try_recv().ok(), Some(42));
        assert_eq!(message_rx.try_recv().ok(), Some("hello".to_string()));

        drop(percent_rx);
        sink.on_progress(43);
    }
}
