//! Media storage layer for edgerec.
//!
//! This module owns the canonical inventory of resident media files in a
//! single flat directory and enforces the storage budget via oldest-first
//! eviction. Eviction runs only between recordings, never while a file is
//! open for writing; that ordering is the scheduler's responsibility.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::media::MediaFile;
use crate::uploader::queue::UploadQueue;

/// The storage budget eviction enforces.
///
/// Immutable configuration, supplied at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBudget {
    /// Maximum aggregate size of resident media files in bytes.
    pub max_total_bytes: u64,
    /// Minimum free space to keep on the filesystem in bytes.
    pub min_free_bytes: u64,
    /// Whether eviction is enabled at all.
    pub enabled: bool,
}

impl From<&StorageConfig> for StorageBudget {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_total_bytes: config.max_total_bytes,
            min_free_bytes: config.min_free_bytes,
            enabled: config.circular_buffer_enabled,
        }
    }
}

/// A snapshot of current storage usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    /// Free bytes on the filesystem holding the media directory.
    pub free_bytes: u64,
    /// Aggregate size of resident media files in bytes.
    pub used_media_bytes: u64,
    /// Number of resident media files.
    pub file_count: usize,
}

/// A probe for filesystem free space.
///
/// Behind a trait so tests can inject fixed values instead of the real
/// disk state.
pub trait FreeSpaceProbe: Send + Sync + std::fmt::Debug {
    /// Get the free bytes available on the filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if free space cannot be determined.
    fn free_bytes(&self, path: &Path) -> Result<u64>;
}

/// The default probe, backed by the operating system's disk list.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskProbe;

impl FreeSpaceProbe for DiskProbe {
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = sysinfo::Disks::new_with_refreshed_list();

        // Pick the disk whose mount point is the longest prefix of the path.
        let best = disks
            .list()
            .iter()
            .filter(|disk| resolved.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len());

        match best {
            Some(disk) => Ok(disk.available_space()),
            None => Err(Error::internal(format!(
                "no filesystem found for {}",
                resolved.display()
            ))),
        }
    }
}

/// Storage engine for recorded media files.
///
/// Owns the flat media directory and provides:
/// - Usage accounting over all files carrying the recognized suffix
/// - Oldest-first eviction bounded by the storage budget
/// - Name generation for new recordings
#[derive(Debug)]
pub struct MediaStore {
    /// The flat directory holding media files.
    dir: PathBuf,
    /// Recognized file suffix (without the dot).
    extension: String,
    /// The budget eviction enforces.
    budget: StorageBudget,
    /// Free-space probe.
    probe: Box<dyn FreeSpaceProbe>,
}

impl MediaStore {
    /// Open a media store over the given directory.
    ///
    /// Creates the directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        budget: StorageBudget,
    ) -> Result<Self> {
        Self::open_with_probe(dir, extension, budget, Box::new(DiskProbe))
    }

    /// Open a media store with a custom free-space probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_with_probe(
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        budget: StorageBudget,
        probe: Box<dyn FreeSpaceProbe>,
    ) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreate {
                path: dir.clone(),
                source,
            })?;
        }
        debug!("media store opened at {}", dir.display());

        Ok(Self {
            dir,
            extension: extension.into(),
            budget,
            probe,
        })
    }

    /// Get the media directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the storage budget.
    #[must_use]
    pub fn budget(&self) -> StorageBudget {
        self.budget
    }

    /// List resident media files, oldest first.
    ///
    /// Ordering is by last-write time with a lexical file-name tie-break,
    /// which is deterministic because names are time-ordered strings.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn files(&self) -> Result<Vec<MediaFile>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| Error::StorageScan {
            path: self.dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::StorageScan {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() || !MediaFile::has_extension(&path, &self.extension) {
                continue;
            }
            match MediaFile::from_path(&path) {
                Ok(file) => files.push(file),
                // A file deleted between listing and stat is not an error
                Err(err) => debug!(path = %path.display(), %err, "skipping unreadable file"),
            }
        }

        files.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.file_name().cmp(&b.file_name()))
        });
        Ok(files)
    }

    /// Get the oldest resident media file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn oldest_file(&self) -> Result<Option<MediaFile>> {
        Ok(self.files()?.into_iter().next())
    }

    /// Count resident media files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn count_files(&self) -> Result<usize> {
        Ok(self.files()?.len())
    }

    /// Aggregate size of resident media files in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn media_bytes_used(&self) -> Result<u64> {
        Ok(self.files()?.iter().map(|f| f.size_bytes).sum())
    }

    /// Take a usage snapshot.
    ///
    /// Pure read, no side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or free space
    /// cannot be determined.
    pub fn usage(&self) -> Result<StorageUsage> {
        let files = self.files()?;
        let free_bytes = self.probe.free_bytes(&self.dir)?;

        Ok(StorageUsage {
            free_bytes,
            used_media_bytes: files.iter().map(|f| f.size_bytes).sum(),
            file_count: files.len(),
        })
    }

    /// Log a human-readable storage summary.
    pub fn log_storage_info(&self) {
        match self.usage() {
            Ok(usage) => info!(
                free_bytes = usage.free_bytes,
                used_media_bytes = usage.used_media_bytes,
                file_count = usage.file_count,
                max_total_bytes = self.budget.max_total_bytes,
                min_free_bytes = self.budget.min_free_bytes,
                "storage usage"
            ),
            Err(err) => warn!(%err, "failed to read storage usage"),
        }
    }

    /// Generate the path for the next recording.
    ///
    /// Names are timestamp-derived when the clock is sane, otherwise a
    /// monotonic numeric fallback. If a timestamp name collides (two
    /// recordings within the same second), the fallback scheme is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read while picking a
    /// fallback index.
    pub fn next_file_path(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        if MediaFile::clock_is_sane(now) {
            let candidate = self.dir.join(MediaFile::timestamp_name(now, &self.extension));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }

        let next = self.next_fallback_index()?;
        Ok(self.dir.join(MediaFile::fallback_name(next, &self.extension)))
    }

    /// Find the next unused fallback index.
    fn next_fallback_index(&self) -> Result<u64> {
        let max = self
            .files()?
            .iter()
            .filter_map(|f| MediaFile::fallback_index(&f.file_name()))
            .max();
        Ok(max.map_or(0, |m| m + 1))
    }

    /// Evict oldest files until storage is within budget.
    ///
    /// Iterates while free space is below the minimum or media usage is
    /// above the maximum, deleting the oldest file each round but never
    /// deleting the last remaining file. Any queue entry referencing a
    /// deleted file is removed before the deletion, so the uploader can
    /// never touch a deleted file. A deletion failure stops the loop
    /// immediately; deletion failures are a hard stop, not retried.
    ///
    /// Returns whether free space is at or above the configured minimum.
    ///
    /// # Errors
    ///
    /// Returns an error if storage usage cannot be determined.
    pub fn evict_until_within_budget(&self, queue: &mut UploadQueue) -> Result<bool> {
        if !self.budget.enabled {
            return Ok(true);
        }

        let mut usage = self.usage()?;
        debug!(
            free_bytes = usage.free_bytes,
            used_media_bytes = usage.used_media_bytes,
            file_count = usage.file_count,
            "checking storage budget"
        );

        while (usage.free_bytes < self.budget.min_free_bytes
            || usage.used_media_bytes > self.budget.max_total_bytes)
            && usage.file_count > 1
        {
            let Some(oldest) = self.oldest_file()? else {
                warn!("no media files found to evict despite non-zero count");
                break;
            };

            // The queue entry goes first so a dangling reference can
            // never be observed.
            if queue.remove(&oldest.path) {
                info!(path = %oldest.path.display(), "removed evicted file from upload queue");
            }

            if let Err(source) = std::fs::remove_file(&oldest.path) {
                let err = Error::deletion(&oldest.path, source);
                warn!(%err, "eviction stopped");
                break;
            }
            info!(
                path = %oldest.path.display(),
                size_bytes = oldest.size_bytes,
                "evicted oldest media file"
            );

            usage = self.usage()?;
        }

        Ok(usage.free_bytes >= self.budget.min_free_bytes)
    }
}
