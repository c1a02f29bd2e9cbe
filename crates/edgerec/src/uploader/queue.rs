//! The FIFO queue of pending transfers.
//!
//! Entries reference resident media files by path. Consistency with the
//! filesystem is kept by construction: every deletion path (eviction or
//! delete-after-upload) removes the matching entry in the same logical
//! step, and the queue is only rescanned from storage at startup or
//! after a connectivity gap.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// A single pending transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Path of the media file to transfer.
    pub path: PathBuf,
    /// Number of failed transfer attempts so far.
    pub attempts: u32,
}

impl QueueEntry {
    /// Create a fresh entry with no attempts.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            attempts: 0,
        }
    }
}

/// A FIFO queue of pending transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadQueue {
    entries: VecDeque<QueueEntry>,
}

impl UploadQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether a path is already queued.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// Add a path to the back of the queue.
    ///
    /// Idempotent: returns `false` without modifying the queue if the
    /// path is already present.
    pub fn push(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.contains(&path) {
            return false;
        }
        self.entries.push_back(QueueEntry::new(path));
        true
    }

    /// Remove the entry for a path, wherever it sits in the queue.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        self.entries.len() != before
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Peek at the head entry.
    #[must_use]
    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Pop the head entry.
    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Record a failed attempt against the head entry.
    ///
    /// Returns the new attempt count, or `None` if the queue is empty.
    pub fn record_failure_front(&mut self) -> Option<u32> {
        let entry = self.entries.front_mut()?;
        entry.attempts += 1;
        Some(entry.attempts)
    }

    /// Iterate over the queued paths in FIFO order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.path.as_path())
    }
}
