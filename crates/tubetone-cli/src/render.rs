//! Terminal rendering for job progress.

use std::io::Write;

const BAR_WIDTH: usize = 30;

/// Text bar such as `[#######-----------------------]  25%`.
pub fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = BAR_WIDTH * usize::from(percent) / 100;
    format!(
        "[{}{}] {percent:>3}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled)
    )
}

/// Draws progress and status lines on stderr.
#[derive(Debug, Default)]
pub struct ProgressRenderer {
    quiet: bool,
    bar_visible: bool,
    last_percent: Option<u8>,
}

impl ProgressRenderer {
    pub const fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar_visible: false,
            last_percent: None,
        }
    }

    /// Redraw the bar in place. Repeated values are skipped.
    pub fn percent(&mut self, percent: u8) {
        if self.quiet || self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        self.bar_visible = true;
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", progress_bar(percent));
        let _ = stderr.flush();
    }

    /// Print a status line above the bar.
    pub fn message(&mut self, message: &str) {
        if self.quiet {
            return;
        }
        self.clear();
        eprintln!("{message}");
        if let Some(percent) = self.last_percent.take() {
            self.percent(percent);
        }
    }

    /// Move past the bar so later output starts on a fresh line.
    pub fn finish(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        if self.bar_visible {
            eprintln!();
            self.bar_visible = false;
        }
    }
}
