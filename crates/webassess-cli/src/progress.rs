use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use webassess_ai::PullObserver;
use webassess_core::PullStatus;

/// Shows model pull progress on stderr.
///
/// Records without byte counts show as a spinner message; records with counts
/// switch the bar to a byte progress display.
pub struct PullProgress {
    bar: ProgressBar,
}

impl PullProgress {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new_spinner())
    }

    /// Progress over a caller-supplied bar; hidden bars are used in tests.
    pub fn with_bar(bar: ProgressBar) -> Self {
        bar.set_style(spinner_style());
        Self { bar }
    }

    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }
}

impl Default for PullProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-")
}

impl PullObserver for PullProgress {
    fn on_status(&self, status: &PullStatus) {
        match (status.completed, status.total) {
            (completed, Some(total)) if total > 0 => {
                if self.bar.length() != Some(total) {
                    self.bar.set_style(bytes_style());
                    self.bar.set_length(total);
                }
                self.bar.set_position(completed.unwrap_or(0));
            }
            _ => {
                self.bar.set_style(spinner_style());
                self.bar.enable_steady_tick(Duration::from_millis(100));
            }
        }
        self.bar.set_message(status.status.clone());
    }
}
