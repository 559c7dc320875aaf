//! Progress reporting.
//!
//! Callers pass a [`Monitor`] that receives a human-readable phase label and
//! a percentage. Inside a run it is wrapped in a [`ProgressTracker`], which
//! keeps the percentages non-decreasing and within 0..=100.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tracing::info;

/// Receiver of progress updates.
pub trait Monitor: Send + Sync {
    fn report(&self, message: &str, percent: u8);
}

impl<F> Monitor for F
where
    F: Fn(&str, u8) + Send + Sync,
{
    fn report(&self, message: &str, percent: u8) {
        self(message, percent)
    }
}

/// Monitor that discards updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn report(&self, _message: &str, _percent: u8) {}
}

/// Monitor that keeps every update (tests, status endpoints).
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    updates: Mutex<Vec<(String, u8)>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, u8)> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.updates().into_iter().map(|(_, p)| p).collect()
    }
}

impl Monitor for RecordingMonitor {
    fn report(&self, message: &str, percent: u8) {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.to_string(), percent));
    }
}

/// Forwards to a caller monitor, clamping percentages so they never go
/// backwards or exceed 100.
pub struct ProgressTracker<'a> {
    inner: &'a dyn Monitor,
    last: AtomicU8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(inner: &'a dyn Monitor) -> Self {
        Self {
            inner,
            last: AtomicU8::new(0),
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Monitor for ProgressTracker<'_> {
    fn report(&self, message: &str, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::Relaxed);
        let percent = percent.max(previous);
        info!(progress = percent, "{message}");
        self.inner.report(message, percent);
    }
}
