//! Build timing
//!
//! Records how long each pipeline stage took and renders a report that is
//! logged at the end of every run.

use std::time::{Duration, Instant};

/// Per-stage durations for one pipeline run
#[derive(Debug, Clone)]
pub struct BuildMetrics {
    /// When measurement started
    start: Instant,
    /// Total run time, set when the run finishes
    pub total: Option<Duration>,
    /// Stage timings in execution order
    phases: Vec<(String, Duration)>,
}

impl Default for BuildMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildMetrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            total: None,
            phases: Vec::new(),
        }
    }

    /// Record a stage timing
    pub fn add_phase(&mut self, name: impl Into<String>, duration: Duration) {
        self.phases.push((name.into(), duration));
    }

    /// Time a closure and record it as a stage
    pub fn time_phase<F, R>(&mut self, name: impl Into<String>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let phase_start = Instant::now();
        let result = f();
        self.phases.push((name.into(), phase_start.elapsed()));
        result
    }

    /// Mark the run as finished
    pub fn mark_total(&mut self) {
        self.total = Some(self.start.elapsed());
    }

    /// Recorded stages
    pub fn phases(&self) -> &[(String, Duration)] {
        &self.phases
    }

    /// Duration of a stage, if it ran
    pub fn phase(&self, name: &str) -> Option<Duration> {
        self.phases
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn format_duration(d: Duration) -> String {
        let ms = d.as_secs_f64() * 1000.0;
        if ms < 1.0 {
            format!("{}µs", d.as_micros())
        } else if ms < 1000.0 {
            format!("{:.2}ms", ms)
        } else {
            format!("{:.2}s", d.as_secs_f64())
        }
    }

    /// Render the timing report
    pub fn report(&self) -> String {
        let total = self.total.unwrap_or_else(|| self.elapsed());

        let mut lines = Vec::new();
        lines.push("=== Build Timing ===".to_string());
        lines.push(format!("Total: {}", Self::format_duration(total)));

        if !self.phases.is_empty() {
            lines.push(String::new());
            for (name, duration) in &self.phases {
                let share = if total.is_zero() {
                    0.0
                } else {
                    duration.as_secs_f64() / total.as_secs_f64() * 100.0
                };
                lines.push(format!(
                    "  {:<12} {:>10} {:>5.1}%",
                    name,
                    Self::format_duration(*duration),
                    share
                ));
            }
        }

        lines.push("=".repeat(32));
        lines.join("\n")
    }

    /// Log the report using tracing
    pub fn log_report(&self) {
        for line in self.report().lines() {
            if line.is_empty() {
                continue;
            }
            tracing::info!("{}", line);
        }
    }
}
