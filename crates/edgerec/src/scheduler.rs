//! The control loop for edgerec.
//!
//! A single cooperative scheduler owns every subsystem and drives them
//! from one tick loop: there is no concurrent access to storage or the
//! queue, and recording always takes priority over transfers. The
//! ordering inside a recording cycle is fixed: pause transfers, evict,
//! record, enqueue, resume.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::{ConnectivityMonitor, FrameSource};
use crate::store::MediaStore;
use crate::uploader::UploadCoordinator;

/// Period of the control loop tick.
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Timing settings for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Interval between recording starts.
    pub recording_interval: Duration,
    /// Duration of each recording.
    pub recording_duration: Duration,
    /// Whether queue processing runs at all.
    pub upload_enabled: bool,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            recording_interval: config.recording_interval(),
            recording_duration: config.recording_duration(),
            upload_enabled: config.upload.enabled,
        }
    }
}

/// The cooperative scheduler.
///
/// Owns the store, the upload coordinator, and the collaborator seams,
/// and multiplexes them on one task.
#[derive(Debug)]
pub struct Scheduler {
    store: MediaStore,
    coordinator: UploadCoordinator,
    frames: Box<dyn FrameSource>,
    connectivity: Box<dyn ConnectivityMonitor>,
    settings: SchedulerSettings,
    last_recording: Option<Instant>,
    connected: bool,
}

impl Scheduler {
    /// Assemble a scheduler from its parts.
    #[must_use]
    pub fn new(
        store: MediaStore,
        coordinator: UploadCoordinator,
        frames: Box<dyn FrameSource>,
        connectivity: Box<dyn ConnectivityMonitor>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            coordinator,
            frames,
            connectivity,
            settings,
            last_recording: None,
            connected: false,
        }
    }

    /// Access the media store.
    #[must_use]
    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Access the upload coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.coordinator
    }

    /// Run the control loop until the task is cancelled.
    ///
    /// The first recording starts on the first tick; subsequent ones
    /// follow the configured interval.
    ///
    /// # Errors
    ///
    /// Individual step failures are logged and absorbed; this only
    /// returns if the loop itself cannot continue.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            source = self.frames.name(),
            media_dir = %self.store.dir().display(),
            "scheduler started"
        );
        self.store.log_storage_info();

        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = self.tick(Instant::now()).await {
                warn!(%err, "control loop step failed");
            }
        }
    }

    /// Run one step of the control loop.
    ///
    /// Priority order per tick: watchdog check, then recording when due,
    /// then queue processing when outside the guard window.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that should surface in the
    /// loop's log; recording and transfer failures are absorbed into
    /// their own retry paths.
    pub async fn tick(&mut self, now: Instant) -> Result<()> {
        self.connected = self.connectivity.is_available();
        self.coordinator.check_stuck(now);

        let until_next = self.time_until_next_recording(now);
        let imminent = self.coordinator.should_pause(until_next);

        if until_next.is_zero() {
            self.run_recording_cycle(now).await?;
        } else if imminent {
            // Inside the guard window: suspend transfers so the upcoming
            // recording starts on time. The processing step still runs
            // so an interrupted attempt gets reaped; paused, it never
            // starts a new one.
            self.coordinator.pause();
            self.coordinator.process_queue(now, self.connected).await?;
        } else {
            self.coordinator.force_resume(false);
            if self.settings.upload_enabled {
                self.coordinator.process_queue(now, self.connected).await?;
            }
        }
        Ok(())
    }

    /// Time remaining until the next recording is due.
    ///
    /// Zero means due now; the first recording is always due.
    #[must_use]
    pub fn time_until_next_recording(&self, now: Instant) -> Duration {
        match self.last_recording {
            None => Duration::ZERO,
            Some(last) => self
                .settings
                .recording_interval
                .saturating_sub(now.duration_since(last)),
        }
    }

    /// Run one full recording cycle.
    ///
    /// Transfers are paused for the whole cycle. Eviction runs before
    /// the file is created, never while it is open for writing. If
    /// storage cannot be brought within budget the cycle is skipped and
    /// rescheduled a full interval later, without touching existing
    /// files beyond what eviction already did.
    async fn run_recording_cycle(&mut self, now: Instant) -> Result<()> {
        self.coordinator.pause();
        // Whatever happens below, the next recording is a full interval
        // away and uploads must come back.
        self.last_recording = Some(now);

        let within = match self
            .store
            .evict_until_within_budget(self.coordinator.queue_mut())
        {
            Ok(within) => within,
            Err(err) => {
                warn!(%err, "eviction failed");
                false
            }
        };
        if !within {
            let free_bytes = self.store.usage().map_or(0, |u| u.free_bytes);
            let err = Error::StorageExhausted {
                free_bytes,
                min_free_bytes: self.store.budget().min_free_bytes,
            };
            warn!(%err, "skipping recording cycle until storage recovers");
            self.coordinator.resume();
            return Ok(());
        }

        let path = self.store.next_file_path(Utc::now())?;
        match self.record(&path).await {
            Ok(bytes) => {
                info!(
                    path = %path.display(),
                    size_bytes = bytes,
                    "recording completed"
                );
                self.coordinator.add_to_queue(path);
            }
            Err(err) => {
                warn!(%err, path = %path.display(), "recording failed");
                // A partial file is worthless; drop it rather than let
                // it reach the upload queue.
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    debug!(%remove_err, "could not remove partial recording");
                }
            }
        }

        self.coordinator.resume();
        Ok(())
    }

    /// Record one file from the frame source.
    ///
    /// Reads chunks until the configured duration elapses or the source
    /// ends, then flushes. Returns the number of bytes written.
    async fn record(&mut self, path: &Path) -> Result<u64> {
        debug!(path = %path.display(), source = self.frames.name(), "recording started");

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|source| Error::file_open(path.to_path_buf(), source))?;

        let deadline = Instant::now() + self.settings.recording_duration;
        let mut bytes: u64 = 0;
        while Instant::now() < deadline {
            match self.frames.next_chunk().await? {
                Some(chunk) => {
                    file.write_all(&chunk).await?;
                    bytes += chunk.len() as u64;
                }
                None => break,
            }
        }
        file.flush().await?;
        Ok(bytes)
    }
}
