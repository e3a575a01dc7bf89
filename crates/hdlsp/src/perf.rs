// perf.rs - Timing instrumentation for recompile passes
//
// Controlled via the HDLSP_PERF environment variable.
//
// Usage:
//   HDLSP_PERF=1 hdlsp --stdio        # Log pass timings
//   HDLSP_PERF=verbose hdlsp --stdio  # Also warn on slow passes


use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

static PERF_ENABLED: OnceLock<bool> = OnceLock::new();
static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

/// Check if performance timing is enabled
pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("HDLSP_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("HDLSP_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// ```
/// use hdlsp::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("recompile");
/// // Duration logged when _guard goes out of scope
/// ```
pub struct TimingGuard {
    start: Instant,
    name: &'static str,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: None,
            enabled: is_enabled(),
        }
    }

    /// Timing guard that also warns (in verbose mode) above `threshold_ms`
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            threshold_warn_ms: Some(threshold_ms),
            ..Self::new(name)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consume the guard without logging and return the duration
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        std::mem::forget(self);
        elapsed
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Running totals over all recompile passes of the process
#[derive(Debug, Default, Clone)]
pub struct PassMetrics {
    pub passes: usize,
    pub units_compiled: usize,
    pub files_published: usize,
    pub total_duration: Duration,
    pub slowest_pass: Option<Duration>,
    /// Duration of the most recent project scan
    pub last_scan_duration: Option<Duration>,
    pub files_scanned: usize,
}

impl PassMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_summary(&self) {
        if !is_enabled() {
            return;
        }
        log::info!(
            "[PERF] {} passes, {} units compiled, {} publications, {:?} total",
            self.passes,
            self.units_compiled,
            self.files_published,
            self.total_duration
        );
        if let Some(d) = self.slowest_pass {
            log::info!("[PERF] Slowest pass: {:?}", d);
        }
        if let Some(d) = self.last_scan_duration {
            log::info!("[PERF] Last project scan: {:?} ({} files)", d, self.files_scanned);
        }
    }
}

static PASS_METRICS: OnceLock<Mutex<PassMetrics>> = OnceLock::new();

pub fn pass_metrics() -> &'static Mutex<PassMetrics> {
    PASS_METRICS.get_or_init(|| Mutex::new(PassMetrics::new()))
}

pub fn record_pass(duration: Duration, units_compiled: usize, files_published: usize) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = pass_metrics().lock() {
        metrics.passes += 1;
        metrics.units_compiled += units_compiled;
        metrics.files_published += files_published;
        metrics.total_duration += duration;
        if metrics.slowest_pass.map_or(true, |slowest| duration > slowest) {
            metrics.slowest_pass = Some(duration);
        }
    }
}

pub fn record_scan(duration: Duration, files_scanned: usize) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut metrics) = pass_metrics().lock() {
        metrics.last_scan_duration = Some(duration);
        metrics.files_scanned = files_scanned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_guard_elapsed() {
        let guard = TimingGuard::new("test");
        std::thread::sleep(Duration::from_millis(10));
        assert!(guard.elapsed().as_millis() >= 10);
    }

    #[test]
    fn test_timing_guard_finish() {
        let guard = TimingGuard::with_threshold("test", 1);
        std::thread::sleep(Duration::from_millis(10));
        assert!(guard.finish().as_millis() >= 10);
    }

    #[test]
    fn test_pass_metrics_default() {
        let metrics = PassMetrics::new();
        assert_eq!(metrics.passes, 0);
        assert!(metrics.slowest_pass.is_none());
        assert!(metrics.last_scan_duration.is_none());
    }
}
