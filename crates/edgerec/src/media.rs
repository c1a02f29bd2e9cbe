//! Core media types for edgerec.
//!
//! This module defines the representation of resident media files, the
//! naming scheme for new recordings, and the traits through which the
//! external collaborators (frame source, connectivity monitor) are wired
//! into the scheduler.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Prefix used by the numeric fallback naming scheme.
pub const FALLBACK_PREFIX: &str = "rec_";

/// Earliest year considered a sane wall clock. Timestamps before this
/// indicate an unsynchronized clock, in which case the numeric fallback
/// naming scheme is used instead.
pub const CLOCK_SANITY_YEAR: i32 = 2020;

/// A resident media file.
///
/// Represents a single recorded file with the metadata eviction and
/// upload ordering decisions are based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub size_bytes: u64,
    /// Last-write time of the file.
    pub modified: DateTime<Utc>,
}

impl MediaFile {
    /// Build a `MediaFile` from an existing path by reading its metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata =
            std::fs::metadata(&path).map_err(|source| Error::file_open(path.clone(), source))?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            path,
            size_bytes: metadata.len(),
            modified,
        })
    }

    /// Get the file name portion of the path.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Check whether a path carries the recognized media suffix.
    #[must_use]
    pub fn has_extension(path: &Path, extension: &str) -> bool {
        path.extension()
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false)
    }

    /// Build a timestamp-derived file name.
    ///
    /// The format sorts lexically in chronological order, so eviction's
    /// lexical tie-break agrees with timestamp ordering.
    #[must_use]
    pub fn timestamp_name(now: DateTime<Utc>, extension: &str) -> String {
        format!("{}.{extension}", now.format("%Y%m%d_%H%M%S"))
    }

    /// Build a numeric fallback file name, used when no sane clock is
    /// available.
    #[must_use]
    pub fn fallback_name(index: u64, extension: &str) -> String {
        format!("{FALLBACK_PREFIX}{index:06}.{extension}")
    }

    /// Parse the index out of a fallback file name, if it is one.
    #[must_use]
    pub fn fallback_index(name: &str) -> Option<u64> {
        let stem = name.strip_prefix(FALLBACK_PREFIX)?;
        let stem = stem.split('.').next()?;
        stem.parse().ok()
    }

    /// Check whether the given timestamp comes from a sane wall clock.
    #[must_use]
    pub fn clock_is_sane(now: DateTime<Utc>) -> bool {
        now.year() >= CLOCK_SANITY_YEAR
    }
}

impl std::fmt::Display for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.path.display(), self.size_bytes)
    }
}

/// A source of opaque recorded bytes.
///
/// Implementors supply the bytes written into a recording file. This
/// subsystem never interprets the bytes; encoding is entirely the
/// collaborator's concern.
#[async_trait::async_trait]
pub trait FrameSource: Send + std::fmt::Debug {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Get the next chunk of recorded bytes.
    ///
    /// Returns `Ok(None)` when the source has ended. Every call is
    /// bounded; a stalled source yields a timeout error rather than
    /// blocking the control loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or stalls.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// A monitor reporting whether the upload transport is usable.
///
/// The coordinator never touches the network while this reports `false`,
/// and treats a drop during an active transfer as a transfer failure.
pub trait ConnectivityMonitor: Send + Sync + std::fmt::Debug {
    /// Check whether the transport is currently available.
    fn is_available(&self) -> bool;
}

/// A connectivity monitor that always reports an available transport.
///
/// Stand-in wiring for deployments where connectivity bring-up is
/// handled outside this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConnected;

impl ConnectivityMonitor for AlwaysConnected {
    fn is_available(&self) -> bool {
        true
    }
}

/// Bound on a single chunk read from a [`FileFrameSource`].
const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A frame source reading opaque bytes from a device node or FIFO.
#[derive(Debug)]
pub struct FileFrameSource {
    path: PathBuf,
    file: tokio::fs::File,
    chunk_size: usize,
}

impl FileFrameSource {
    /// Open the byte source at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened.
    pub async fn open(path: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        let path = path.into();
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|source| Error::file_open(path.clone(), source))?;

        Ok(Self {
            path,
            file,
            chunk_size,
        })
    }

    /// Get the path of the underlying source.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl FrameSource for FileFrameSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.chunk_size];
        let read = tokio::time::timeout(FRAME_READ_TIMEOUT, self.file.read(&mut buf))
            .await
            .map_err(|_| Error::timeout(format!("frame read from {}", self.path.display())))??;

        if read == 0 {
            return Ok(None);
        }
        buf.truncate(read);
        Ok(Some(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_timestamp_name_format() {
        let now = DateTime::parse_from_rfc3339("2026-08-25T13:05:01Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            MediaFile::timestamp_name(now, "avi"),
            "20260825_130501.avi"
        );
    }

    #[test]
    fn test_timestamp_names_sort_chronologically() {
        let earlier = DateTime::parse_from_rfc3339("2026-08-25T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2026-08-25T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let a = MediaFile::timestamp_name(earlier, "avi");
        let b = MediaFile::timestamp_name(later, "avi");
        assert!(a < b);
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(MediaFile::fallback_name(42, "avi"), "rec_000042.avi");
        assert_eq!(MediaFile::fallback_name(0, "avi"), "rec_000000.avi");
    }

    #[test]
    fn test_fallback_index_roundtrip() {
        let name = MediaFile::fallback_name(123, "avi");
        assert_eq!(MediaFile::fallback_index(&name), Some(123));
    }

    #[test]
    fn test_fallback_index_rejects_other_names() {
        assert_eq!(MediaFile::fallback_index("20260825_130501.avi"), None);
        assert_eq!(MediaFile::fallback_index("rec_xyz.avi"), None);
    }

    #[test]
    fn test_clock_is_sane() {
        let sane = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let unsynced = DateTime::parse_from_rfc3339("1970-01-01T00:01:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert!(MediaFile::clock_is_sane(sane));
        assert!(!MediaFile::clock_is_sane(unsynced));
    }

    #[test]
    fn test_has_extension() {
        assert!(MediaFile::has_extension(Path::new("/m/a.avi"), "avi"));
        assert!(MediaFile::has_extension(Path::new("/m/a.AVI"), "avi"));
        assert!(!MediaFile::has_extension(Path::new("/m/a.tmp"), "avi"));
        assert!(!MediaFile::has_extension(Path::new("/m/noext"), "avi"));
    }

    #[test]
    fn test_from_path_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        let media = MediaFile::from_path(&path).unwrap();
        assert_eq!(media.path, path);
        assert_eq!(media.size_bytes, 10);
        assert_eq!(media.file_name(), "clip.avi");
    }

    #[test]
    fn test_from_path_missing_file() {
        let result = MediaFile::from_path("/nonexistent/clip.avi");
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        let media = MediaFile {
            path: PathBuf::from("/media/clip.avi"),
            size_bytes: 1024,
            modified: Utc::now(),
        };
        let s = media.to_string();
        assert!(s.contains("/media/clip.avi"));
        assert!(s.contains("1024"));
    }

    #[test]
    fn test_always_connected() {
        assert!(AlwaysConnected.is_available());
    }

    #[tokio::test]
    async fn test_file_frame_source_reads_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let mut source = FileFrameSource::open(&path, 4).await.unwrap();
        assert_eq!(source.name(), "file");
        assert_eq!(source.path(), path.as_path());

        let first = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(&first[..], b"abcd");
        let second = source.next_chunk().await.unwrap().unwrap();
        assert_eq!(&second[..], b"efgh");
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_frame_source_missing_path() {
        let result = FileFrameSource::open("/nonexistent/source.bin", 4).await;
        assert!(result.is_err());
    }
}
