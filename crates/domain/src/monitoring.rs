//! Monitoring sink used around every unit of work.
//!
//! Every method is infallible: telemetry problems are swallowed by the
//! implementation and can never fail the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Handle returned by [`Monitoring::start_timer`].
pub trait TimerHandle: Send {
    /// Stops the timer and records the elapsed time.
    fn end(self: Box<Self>);
}

/// Sink for timers, error records and counters.
pub trait Monitoring: Send + Sync {
    /// Starts a named timer.
    fn start_timer(&self, name: &str) -> Box<dyn TimerHandle>;

    /// Records an error against a name.
    fn record_error(&self, name: &str, error: &dyn std::fmt::Display);

    /// Increments a named counter by one.
    fn increment_counter(&self, name: &str);

    /// Records a duration measured elsewhere, such as across process restarts.
    fn record_duration(&self, name: &str, elapsed: Duration);
}

/// Monitoring backed by the `metrics` facade.
///
/// Timers feed `{name}_duration_seconds` histograms and errors feed
/// `{name}_errors_total` counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMonitoring;

struct MetricsTimer {
    name: String,
    started: Instant,
}

impl TimerHandle for MetricsTimer {
    fn end(self: Box<Self>) {
        MetricsMonitoring.record_duration(&self.name, self.started.elapsed());
    }
}

impl Monitoring for MetricsMonitoring {
    fn start_timer(&self, name: &str) -> Box<dyn TimerHandle> {
        Box::new(MetricsTimer {
            name: name.to_string(),
            started: Instant::now(),
        })
    }

    fn record_error(&self, name: &str, error: &dyn std::fmt::Display) {
        tracing::warn!(metric = name, error = %error, "error recorded");
        metrics::counter!(format!("{name}_errors_total")).increment(1);
    }

    fn increment_counter(&self, name: &str) {
        metrics::counter!(name.to_string()).increment(1);
    }

    fn record_duration(&self, name: &str, elapsed: Duration) {
        metrics::histogram!(format!("{name}_duration_seconds")).record(elapsed.as_secs_f64());
    }
}

/// Monitoring that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitoring;

struct NoopTimer;

impl TimerHandle for NoopTimer {
    fn end(self: Box<Self>) {}
}

impl Monitoring for NoopMonitoring {
    fn start_timer(&self, _name: &str) -> Box<dyn TimerHandle> {
        Box::new(NoopTimer)
    }

    fn record_error(&self, _name: &str, _error: &dyn std::fmt::Display) {}

    fn increment_counter(&self, _name: &str) {}

    fn record_duration(&self, _name: &str, _elapsed: Duration) {}
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<String, u64>,
    errors: Vec<(String, String)>,
    timings: Vec<(String, Duration)>,
}

/// Monitoring that keeps everything in memory, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingMonitoring {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingMonitoring {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut guard = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Returns the current value of a counter.
    pub fn counter(&self, name: &str) -> u64 {
        self.with(|r| r.counters.get(name).copied().unwrap_or(0))
    }

    /// Returns the recorded `(name, message)` error pairs.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.with(|r| r.errors.clone())
    }

    /// Returns how many durations were recorded under this name.
    ///
    /// Ended timers and [`Monitoring::record_duration`] calls both count.
    pub fn timer_count(&self, name: &str) -> usize {
        self.with(|r| r.timings.iter().filter(|(n, _)| n == name).count())
    }
}

struct RecordingTimer {
    name: String,
    started: Instant,
    recorded: Arc<Mutex<Recorded>>,
}

impl TimerHandle for RecordingTimer {
    fn end(self: Box<Self>) {
        let mut guard = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        guard.timings.push((self.name, self.started.elapsed()));
    }
}

impl Monitoring for RecordingMonitoring {
    fn start_timer(&self, name: &str) -> Box<dyn TimerHandle> {
        Box::new(RecordingTimer {
            name: name.to_string(),
            started: Instant::now(),
            recorded: Arc::clone(&self.recorded),
        })
    }

    fn record_error(&self, name: &str, error: &dyn std::fmt::Display) {
        let entry = (name.to_string(), error.to_string());
        self.with(|r| r.errors.push(entry));
    }

    fn increment_counter(&self, name: &str) {
        self.with(|r| *r.counters.entry(name.to_string()).or_default() += 1);
    }

    fn record_duration(&self, name: &str, elapsed: Duration) {
        let entry = (name.to_string(), elapsed);
        self.with(|r| r.timings.push(entry));
    }
}
