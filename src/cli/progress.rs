//! Phase progress bars for the command-line interface

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use terracost::{Phase, ProgressCallback};

/// Creates a progress bar for one phase; units differ per phase (rows, tiles, points)
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {msg:>12} [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) ETA: {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// One bar reused across the phases of a run
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(total: u64, message: &str) -> Self {
        let pb = create_progress_bar(total);
        eprintln!("{message}");
        Self { pb }
    }

    /// Reset the bar for the next phase
    pub fn start_phase(&self, phase: Phase) {
        self.pb.reset();
        self.pb.set_length(0);
        self.pb.set_message(phase.name());
    }

    pub fn finish_phase(&self, phase: Phase) {
        self.pb.finish_with_message(format!("{phase} done"));
    }

    /// Engine callback that drives this bar
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |done, total| {
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(done);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar_template() {
        let pb = create_progress_bar(1000);
        assert_eq!(pb.length().unwrap(), 1000);
        pb.set_position(100);
        pb.finish();
    }

    #[test]
    fn test_callback_updates_bar() {
        let manager = ProgressManager::new(0, "test run");
        manager.start_phase(Phase::Substitute);
        let cb = manager.callback();
        cb(3, 12);
        assert_eq!(manager.pb.length(), Some(12));
        assert_eq!(manager.pb.position(), 3);
        manager.start_phase(Phase::InterTile);
        assert_eq!(manager.pb.position(), 0);
    }
}
