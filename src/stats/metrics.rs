//! Statistics and latency classification
//!
//! Render and first-output latencies are classified into three bands that
//! decide the log level only; they never affect control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Latency classification for render jobs and first stream output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyBand {
    /// Under the fast threshold; logged at debug
    Fast,
    /// Between the fast and slow thresholds; logged at warn
    Slow,
    /// Over the slow threshold; logged at error
    Stalled,
}

/// Band thresholds
#[derive(Debug, Clone, Copy)]
pub struct LatencyBands {
    /// Upper bound of the fast band
    pub fast: Duration,
    /// Upper bound of the slow band
    pub slow: Duration,
}

impl Default for LatencyBands {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(5),
            slow: Duration::from_secs(22),
        }
    }
}

impl LatencyBands {
    /// Classify an elapsed duration
    pub fn classify(&self, elapsed: Duration) -> LatencyBand {
        if elapsed < self.fast {
            LatencyBand::Fast
        } else if elapsed < self.slow {
            LatencyBand::Slow
        } else {
            LatencyBand::Stalled
        }
    }

    /// Log an observed latency under the banding policy
    pub fn observe(&self, label: &str, what: &str, elapsed: Duration) -> LatencyBand {
        let band = self.classify(elapsed);
        let secs = elapsed.as_secs_f64();
        match band {
            LatencyBand::Fast => {
                tracing::debug!(label = %label, elapsed_secs = secs, "{} completed", what)
            }
            LatencyBand::Slow => {
                tracing::warn!(label = %label, elapsed_secs = secs, "{} was slow", what)
            }
            LatencyBand::Stalled => {
                tracing::error!(label = %label, elapsed_secs = secs, "{} stalled", what)
            }
        }
        band
    }
}

/// Engine-wide counters
///
/// Cheap relaxed atomics; read for observability only.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Sessions that completed a successful prepare
    pub sessions_prepared: AtomicU64,
    /// Sessions that reached the active state
    pub sessions_started: AtomicU64,
    /// Sessions removed from the live table (any path)
    pub sessions_ended: AtomicU64,
    /// Cache render jobs that produced an artifact
    pub renders_completed: AtomicU64,
    /// Cache render jobs that failed
    pub renders_failed: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_prepared(&self) {
        self.sessions_prepared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render(&self, ok: bool) {
        if ok {
            self.renders_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.renders_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Live sessions = prepared minus ended (saturating; counters are racy)
    pub fn live_sessions(&self) -> u64 {
        let prepared = self.sessions_prepared.load(Ordering::Relaxed);
        let ended = self.sessions_ended.load(Ordering::Relaxed);
        prepared.saturating_sub(ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_classification() {
        let bands = LatencyBands::default();

        assert_eq!(bands.classify(Duration::from_secs(1)), LatencyBand::Fast);
        assert_eq!(bands.classify(Duration::from_secs(5)), LatencyBand::Slow);
        assert_eq!(bands.classify(Duration::from_secs(21)), LatencyBand::Slow);
        assert_eq!(
            bands.classify(Duration::from_secs(22)),
            LatencyBand::Stalled
        );
        assert_eq!(
            bands.classify(Duration::from_secs(120)),
            LatencyBand::Stalled
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let bands = LatencyBands {
            fast: Duration::from_millis(100),
            slow: Duration::from_millis(500),
        };

        assert_eq!(bands.classify(Duration::from_millis(50)), LatencyBand::Fast);
        assert_eq!(bands.classify(Duration::from_millis(200)), LatencyBand::Slow);
        assert_eq!(
            bands.classify(Duration::from_millis(900)),
            LatencyBand::Stalled
        );
    }

    #[test]
    fn test_engine_stats_counters() {
        let stats = EngineStats::new();

        stats.record_prepared();
        stats.record_prepared();
        stats.record_started();
        stats.record_ended();
        stats.record_render(true);
        stats.record_render(false);

        assert_eq!(stats.sessions_prepared.load(Ordering::Relaxed), 2);
        assert_eq!(stats.sessions_started.load(Ordering::Relaxed), 1);
        assert_eq!(stats.sessions_ended.load(Ordering::Relaxed), 1);
        assert_eq!(stats.renders_completed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.renders_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.live_sessions(), 1);
    }
}
