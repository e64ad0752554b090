//! Progress indicators for pipeline stages
//!
//! One spinner per stage, finished with a success or failure marker. When
//! progress is disabled (tests, `--log-format json`) every bar is hidden and
//! only the tracing output remains.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Style presets for stage indicators
pub struct ProgressStyles;

impl ProgressStyles {
    /// Style for a running stage
    pub fn spinner() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }

    /// Style for a finished stage
    pub fn success() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Style for a failed stage
    pub fn error() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:.red} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

/// Progress tracker for a pipeline run
pub struct BuildProgress {
    multi: MultiProgress,
}

impl BuildProgress {
    /// Draw to stderr
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    /// Draw nothing
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// Spinner for a running stage
    pub fn stage(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyles::spinner());
        pb.set_message(msg.to_string());
        if !self.multi.is_hidden() {
            pb.enable_steady_tick(Duration::from_millis(80));
        }
        pb
    }

    /// Print a warning line above the bars
    pub fn warn(&self, msg: &str) {
        if !self.multi.is_hidden() {
            self.multi.println(format!("  ⚠ {}", msg)).ok();
        }
    }
}

impl Default for BuildProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for progress bar operations
pub trait ProgressExt {
    /// Finish with a success message
    fn finish_success(&self, msg: &str);

    /// Finish with an error message
    fn finish_error(&self, msg: &str);
}

impl ProgressExt for ProgressBar {
    fn finish_success(&self, msg: &str) {
        self.set_style(ProgressStyles::success());
        self.set_prefix("✓");
        self.finish_with_message(msg.to_string());
    }

    fn finish_error(&self, msg: &str) {
        self.set_style(ProgressStyles::error());
        self.set_prefix("✗");
        self.finish_with_message(msg.to_string());
    }
}
