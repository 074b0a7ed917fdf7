// Wall-clock stopwatch for search timing and timeout polling.

use std::time::{Duration, Instant};

/// A resettable stopwatch. Starts stopped; accumulates elapsed time across
/// start/stop cycles.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    started_at: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    pub fn new() -> Stopwatch {
        Stopwatch {
            started_at: None,
            accumulated: Duration::ZERO,
        }
    }

    /// A stopwatch already running.
    pub fn started() -> Stopwatch {
        let mut watch = Stopwatch::new();
        watch.start();
        watch
    }

    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += started.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.accumulated = Duration::ZERO;
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started) => self.accumulated + started.elapsed(),
            None => self.accumulated,
        }
    }

    /// Elapsed time in fractional seconds.
    pub fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl Default for Stopwatch {
    fn default() -> Stopwatch {
        Stopwatch::new()
    }
}
