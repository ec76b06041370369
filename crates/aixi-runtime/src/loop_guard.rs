//! [`LoopGuard`] – repeated-action detector.
//!
//! Keeps a rolling window of the last `threshold` action fingerprints and
//! reports when every entry in a full window is identical.  The orchestrator
//! only logs a warning when this trips; the Judge is the one that tells the
//! Ideator to change course.
//!
//! # Example
//!
//! ```rust
//! use aixi_runtime::loop_guard::LoopGuard;
//!
//! let mut guard = LoopGuard::new(3);
//! assert!(!guard.record("file_system\u{1f}{}"));
//! assert!(!guard.record("file_system\u{1f}{}"));
//! assert!(guard.record("file_system\u{1f}{}"));
//!
//! guard.reset();
//! assert!(!guard.record("file_system\u{1f}{}"));
//! ```

use std::collections::VecDeque;

/// Detects an Ideator that keeps proposing the same action.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    threshold: usize,
    window: VecDeque<String>,
}

impl LoopGuard {
    /// `threshold` consecutive identical fingerprints count as a repeat.
    /// A threshold of 0 disables detection.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            window: VecDeque::with_capacity(threshold),
        }
    }

    /// Record the fingerprint of the action just proposed and report whether
    /// the window is now a run of repeats.
    pub fn record(&mut self, fingerprint: &str) -> bool {
        if self.threshold == 0 {
            return false;
        }
        self.window.push_back(fingerprint.to_string());
        while self.window.len() > self.threshold {
            self.window.pop_front();
        }
        self.is_stuck()
    }

    pub fn is_stuck(&self) -> bool {
        if self.threshold == 0 || self.window.len() < self.threshold {
            return false;
        }
        let first = &self.window[0];
        self.window.iter().all(|f| f == first)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varied_actions_never_trip() {
        let mut guard = LoopGuard::new(3);
        assert!(!guard.record("a"));
        assert!(!guard.record("b"));
        assert!(!guard.record("a"));
    }

    #[test]
    fn trips_at_threshold_and_stays_tripped() {
        let mut guard = LoopGuard::new(3);
        assert!(!guard.record("x"));
        assert!(!guard.record("x"));
        assert!(guard.record("x"));
        assert!(guard.record("x"));
    }

    #[test]
    fn different_action_breaks_streak() {
        let mut guard = LoopGuard::new(3);
        guard.record("a");
        guard.record("a");
        assert!(!guard.record("b"));
        assert!(!guard.is_stuck());
    }

    #[test]
    fn window_slides() {
        let mut guard = LoopGuard::new(3);
        guard.record("a");
        guard.record("b");
        guard.record("c");
        guard.record("c");
        assert!(guard.record("c"));
    }

    #[test]
    fn zero_threshold_disables_detection() {
        let mut guard = LoopGuard::new(0);
        for _ in 0..5 {
            assert!(!guard.record("same"));
        }
    }

    #[test]
    fn reset_clears_window() {
        let mut guard = LoopGuard::new(2);
        guard.record("a");
        assert!(guard.record("a"));
        guard.reset();
        assert!(!guard.record("a"));
    }
}
