//! Progress reporting and cooperative cancellation for batch runs.

use crossbeam_channel::Sender;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// Receives progress from a worker thread.
pub trait ProgressSink: Send + Sync {
    fn update(&self, percent: u8, message: &str);
}

/// Ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _percent: u8, _message: &str) {}
}

impl ProgressSink for Sender<ProgressUpdate> {
    fn update(&self, percent: u8, message: &str) {
        // The receiver may have been dropped by a caller that stopped listening.
        let _ = self.send(ProgressUpdate::new(percent, message));
    }
}

impl ProgressSink for ProgressBar {
    fn update(&self, percent: u8, message: &str) {
        self.set_position(u64::from(percent.min(100)));
        self.set_message(message.to_string());
    }
}

/// Last update, readable from another thread.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    inner: Arc<Mutex<ProgressUpdate>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for SharedProgress {
    fn update(&self, percent: u8, message: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = ProgressUpdate::new(percent, message);
        }
    }
}

/// A percentage bar in the style used by the CLI.
pub fn percent_bar() -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(100).with_style(style)
}

/// Completion percentage of `done` out of `total`, where an empty batch is
/// complete.
pub fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Shared flag checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
