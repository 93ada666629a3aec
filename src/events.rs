//! Collaborator interfaces for progress reporting, localization, and
//! cooperative cancellation, plus the bytes-copied accumulator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Receives user-facing progress. Implementations must not block materially;
/// callbacks run synchronously on the pipeline thread.
pub trait EventSink {
    fn notify_log_update(&self, text: &str);
    fn notify_detailed_progress(&self, current: u64, total: u64, label: &str);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify_log_update(&self, _text: &str) {}
    fn notify_detailed_progress(&self, _current: u64, _total: u64, _label: &str) {}
}

/// Prints events to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn notify_log_update(&self, text: &str) {
        println!("{}", text.trim_end());
    }

    fn notify_detailed_progress(&self, current: u64, total: u64, label: &str) {
        if total == 0 || label.is_empty() {
            return;
        }
        println!("  [{:>3}%] {}", current * 100 / total, label);
    }
}

/// Looks up user-facing text for a message key.
pub trait Localizer {
    fn text(&self, key: &str, fallback: &str) -> String;
}

/// Returns the fallback text for every key.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackLocalizer;

impl Localizer for FallbackLocalizer {
    fn text(&self, _key: &str, fallback: &str) -> String {
        fallback.to_string()
    }
}

/// Cooperative cancellation flag, checked between discrete steps.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running total of bytes copied during a run.
///
/// Owned by the orchestrator and lent out by shared reference; only one
/// stage adds to it at a time.
#[derive(Debug, Default)]
pub struct ByteCounter(AtomicU64);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: u64) -> u64 {
        self.0.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scales sub-step percentages into a window of the overall progress bar.
#[derive(Debug, Clone, Copy)]
pub struct ProgressWindow {
    pub start: u64,
    pub span: u64,
}

impl ProgressWindow {
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            span: end.saturating_sub(start),
        }
    }

    /// Map a 0..=100 percentage into this window.
    pub fn map(&self, percent: u64) -> u64 {
        self.start + percent.min(100) * self.span / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_counter_accumulates() {
        let counter = ByteCounter::new();
        assert_eq!(counter.add(10), 10);
        assert_eq!(counter.add(5), 15);
        assert_eq!(counter.get(), 15);
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
        flag.clear();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_progress_window_maps_into_range() {
        let window = ProgressWindow::new(60, 100);
        assert_eq!(window.map(0), 60);
        assert_eq!(window.map(50), 80);
        assert_eq!(window.map(100), 100);
        assert_eq!(window.map(250), 100);
    }

    #[test]
    fn test_fallback_localizer() {
        assert_eq!(FallbackLocalizer.text("log.any", "Hello"), "Hello");
    }
}
