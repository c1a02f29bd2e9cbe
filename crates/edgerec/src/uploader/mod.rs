//! Upload coordination for edgerec.
//!
//! The [`UploadCoordinator`] owns the FIFO queue of pending transfers and
//! the small state machine governing when a transfer may run, pause,
//! retry, or be abandoned. It is the only component that talks to the
//! transport, and it defers entirely to the scheduler for when it is
//! driven: the pause/guard-window contract is the sole mutual-exclusion
//! mechanism between file-writing and file-transferring.
//!
//! A transfer attempt runs on its own task so the control loop keeps
//! ticking while bytes are on the wire. Each [`process_queue`] call
//! performs at most one queue action: reap the finished attempt, or
//! start the next one. Flipping the shared [`PauseFlag`] mid-flight
//! makes the transport abort its connection; the next reap observes
//! [`TransferOutcome::Interrupted`] and leaves the entry at the head.
//!
//! [`process_queue`]: UploadCoordinator::process_queue

pub mod queue;
pub mod transport;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::store::MediaStore;
use self::queue::UploadQueue;
use self::transport::{TransferOutcome, Transport};

/// The coordinator's externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    /// No transfer running.
    Idle,
    /// A transfer is in flight.
    Uploading,
    /// Transfers are suspended for recording priority.
    Paused,
    /// The watchdog just forced the coordinator out of a wedged transfer.
    StuckRecovering,
}

impl std::fmt::Display for UploaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Uploading => write!(f, "uploading"),
            Self::Paused => write!(f, "paused"),
            Self::StuckRecovering => write!(f, "stuck_recovering"),
        }
    }
}

/// A cloneable pause signal shared with in-flight transfers.
///
/// The transport checks this flag between chunks; flipping it is the
/// only way to abort a transfer, since no true cancellation primitive
/// is assumed.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    /// Create a new, unpaused flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag.
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag.
    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check whether the flag is set.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Timing and retry settings for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Maximum transfer attempts before an entry is dropped.
    pub max_retries: u32,
    /// Base delay for the increasing retry backoff.
    pub backoff_base: Duration,
    /// Minimum spacing between successive transfer attempts.
    pub throttle: Duration,
    /// Window before a scheduled recording during which transfers must
    /// not run.
    pub guard_window: Duration,
    /// Interval between watchdog self-checks.
    pub watchdog_interval: Duration,
    /// Continuous transfer time after which the uploader is considered
    /// stuck.
    pub stuck_threshold: Duration,
    /// Delete the local file after a successful upload.
    pub delete_after_upload: bool,
}

impl From<&UploadConfig> for CoordinatorSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            throttle: Duration::from_secs(config.throttle_secs),
            guard_window: Duration::from_secs(config.guard_window_secs),
            watchdog_interval: Duration::from_secs(config.watchdog_interval_secs),
            stuck_threshold: Duration::from_secs(config.stuck_threshold_secs),
            delete_after_upload: config.delete_after_upload,
        }
    }
}

/// A snapshot of the coordinator's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderStatus {
    /// Number of queued transfers.
    pub queue_len: usize,
    /// Name of the file currently in transfer, if any.
    pub current_file: Option<String>,
    /// Whether transfers are paused.
    pub paused: bool,
    /// Whether a transfer is in flight.
    pub uploading: bool,
    /// Derived state.
    pub state: UploaderState,
}

/// The upload coordinator.
///
/// Exactly one instance exists per device; it is owned by the scheduler
/// and driven cooperatively from the control loop. The in-flight
/// attempt is the only work that leaves the control task.
#[derive(Debug)]
pub struct UploadCoordinator {
    settings: CoordinatorSettings,
    transport: Arc<dyn Transport>,
    queue: UploadQueue,
    pause: PauseFlag,
    inflight: Option<JoinHandle<TransferOutcome>>,
    uploading: bool,
    recovering: bool,
    current_file: Option<PathBuf>,
    last_attempt: Option<Instant>,
    retry_after: Option<Instant>,
    uploading_since: Option<Instant>,
    last_watchdog: Option<Instant>,
}

impl UploadCoordinator {
    /// Create a coordinator with the given settings and transport.
    #[must_use]
    pub fn new(settings: CoordinatorSettings, transport: Box<dyn Transport>) -> Self {
        Self {
            settings,
            transport: Arc::from(transport),
            queue: UploadQueue::new(),
            pause: PauseFlag::new(),
            inflight: None,
            uploading: false,
            recovering: false,
            current_file: None,
            last_attempt: None,
            retry_after: None,
            uploading_since: None,
            last_watchdog: None,
        }
    }

    // === Queue management ===

    /// Add a path to the upload queue.
    ///
    /// Idempotent: returns `false` if the path is already queued.
    pub fn add_to_queue(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.queue.push(path.clone()) {
            info!(
                path = %path.display(),
                queue_len = self.queue.len(),
                "added to upload queue"
            );
            true
        } else {
            debug!(path = %path.display(), "path already queued");
            false
        }
    }

    /// Reconcile the queue against resident storage.
    ///
    /// Used at startup or after a connectivity gap to recover files that
    /// predate the coordinator or were left behind by a crash. Existing
    /// entries are never duplicated.
    ///
    /// # Errors
    ///
    /// Returns an error if the media directory cannot be scanned.
    pub fn populate_from_storage(&mut self, store: &MediaStore) -> Result<usize> {
        let mut added = 0;
        for file in store.files()? {
            if self.queue.push(file.path) {
                added += 1;
            }
        }
        if added > 0 {
            info!(
                added,
                queue_len = self.queue.len(),
                "reconciled upload queue from storage"
            );
        }
        Ok(added)
    }

    /// Remove every queued entry. Used when storage is wiped externally.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        info!("upload queue cleared");
    }

    /// Mutable access to the queue, used by eviction to drop entries for
    /// deleted files in the same step as the deletion.
    pub fn queue_mut(&mut self) -> &mut UploadQueue {
        &mut self.queue
    }

    /// Number of queued transfers.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // === Priority preemption ===

    /// Check whether transfers must be paused for an upcoming recording.
    #[must_use]
    pub fn should_pause(&self, time_until_next_recording: Duration) -> bool {
        time_until_next_recording <= self.settings.guard_window
    }

    /// Suspend transfers for recording priority.
    ///
    /// Any in-flight transfer aborts its connection and leaves the file
    /// at the queue head, untouched, for a later attempt.
    pub fn pause(&mut self) {
        if self.pause.is_paused() {
            return;
        }
        self.pause.pause();
        if self.uploading {
            info!("upload paused for recording priority");
        } else {
            debug!("uploads paused");
        }
    }

    /// Resume transfers. No-op if not paused.
    pub fn resume(&mut self) {
        if self.pause.is_paused() {
            self.pause.resume();
            info!("uploads resumed");
        }
    }

    /// Resume transfers if paused and recording is neither active nor
    /// imminent.
    pub fn force_resume(&mut self, recording_imminent: bool) {
        if self.pause.is_paused() && !recording_imminent {
            self.resume();
            debug!("automatically resumed uploads after recording completed");
        }
    }

    /// Check whether transfers are currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    // === Watchdog ===

    /// Periodic self-check for a wedged transfer.
    ///
    /// Runs at most once per watchdog interval. If a transfer has been
    /// continuously in flight for longer than the stuck threshold, the
    /// attempt task is aborted and all in-progress markers are forcibly
    /// cleared, regardless of the underlying transport's own state.
    ///
    /// Returns whether a reset was performed.
    pub fn check_stuck(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_watchdog {
            if now.duration_since(last) < self.settings.watchdog_interval {
                return false;
            }
        }
        self.last_watchdog = Some(now);

        let Some(since) = self.uploading_since else {
            return false;
        };
        let elapsed = now.duration_since(since);
        if self.uploading && elapsed > self.settings.stuck_threshold {
            let err = Error::StuckState {
                elapsed_secs: elapsed.as_secs(),
            };
            warn!(%err, "watchdog forcing uploader back to idle");
            if let Some(handle) = self.inflight.take() {
                handle.abort();
            }
            self.uploading = false;
            self.current_file = None;
            self.uploading_since = None;
            self.retry_after = None;
            self.recovering = true;
            return true;
        }
        false
    }

    // === Queue processing ===

    /// Drive one step of queue processing.
    ///
    /// At most one queue action per call: reap the finished in-flight
    /// attempt, or start the next one. While an attempt is running the
    /// call returns immediately; the attempt is only ever stopped
    /// through the pause flag or the watchdog. New attempts are skipped
    /// while disconnected, paused, backing off after a failure, or
    /// within the throttle interval — a connectivity drop therefore
    /// stops the retry sequence between attempts, leaving the entry at
    /// the head. A failing head is retried with strictly increasing
    /// backoff up to the retry limit, then dropped so it cannot block
    /// the rest of the queue. On success the local file is deleted
    /// (when configured) and the entry popped in the same step.
    ///
    /// # Errors
    ///
    /// Currently infallible at this level; failures are absorbed into
    /// retry accounting and logging. The `Result` keeps the call shape
    /// uniform with the rest of the control loop.
    pub async fn process_queue(&mut self, now: Instant, connected: bool) -> Result<()> {
        self.recovering = false;

        if self.inflight.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = self.inflight.take() {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => TransferOutcome::Failed(format!("transfer task failed: {err}")),
                };
                self.finish_attempt(outcome);
            }
            return Ok(());
        }
        if self.inflight.is_some() {
            return Ok(());
        }

        if !connected || self.queue.is_empty() {
            return Ok(());
        }
        if self.pause.is_paused() {
            debug!("queue processing skipped while paused");
            return Ok(());
        }
        if let Some(retry_after) = self.retry_after {
            if now < retry_after {
                return Ok(());
            }
        }
        if let Some(last) = self.last_attempt {
            let since = now.duration_since(last);
            if since < self.settings.throttle {
                debug!(elapsed_ms = since.as_millis() as u64, "throttling transfers");
                return Ok(());
            }
        }

        self.start_attempt(now);
        Ok(())
    }

    /// Spawn a transfer attempt for the queue head.
    fn start_attempt(&mut self, now: Instant) {
        let Some(entry) = self.queue.front() else {
            return;
        };
        let path = entry.path.clone();
        let attempt = entry.attempts + 1;
        debug!(path = %path.display(), attempt, "transfer attempt");

        self.uploading = true;
        self.current_file = Some(path.clone());
        self.last_attempt = Some(now);
        self.uploading_since = Some(now);
        self.retry_after = None;

        let transport = Arc::clone(&self.transport);
        let pause = self.pause.clone();
        self.inflight = Some(tokio::spawn(async move {
            transport.send_file(&path, &pause).await
        }));
    }

    /// Fold a finished attempt's outcome back into the queue.
    fn finish_attempt(&mut self, outcome: TransferOutcome) {
        self.uploading = false;
        self.uploading_since = None;
        let Some(path) = self.current_file.take() else {
            return;
        };

        match outcome {
            TransferOutcome::Accepted => {
                info!(path = %path.display(), "upload accepted");
                if self.settings.delete_after_upload {
                    match std::fs::remove_file(&path) {
                        Ok(()) => info!(path = %path.display(), "deleted uploaded file"),
                        Err(err) => warn!(
                            path = %path.display(),
                            %err,
                            "failed to delete uploaded file"
                        ),
                    }
                }
                self.queue.remove(&path);
                self.retry_after = None;
            }
            TransferOutcome::Interrupted => {
                // The entry stays at the head with its attempt counter
                // untouched; a pause is not a failure.
                info!(
                    path = %path.display(),
                    "transfer interrupted by pause, entry left at queue head"
                );
            }
            TransferOutcome::Rejected(status) => {
                self.record_failure(&path, format!("HTTP {status}"));
            }
            TransferOutcome::Failed(reason) => {
                self.record_failure(&path, reason);
            }
        }
    }

    /// Record a failed attempt against the head entry.
    fn record_failure(&mut self, path: &Path, reason: String) {
        // Eviction may have removed the entry while the attempt ran.
        match self.queue.front() {
            Some(entry) if entry.path == path => {}
            _ => return,
        }

        let attempts = self.queue.record_failure_front().unwrap_or(0);
        let err = Error::transfer(path, attempts, reason);
        warn!(%err, "transfer attempt failed");

        if attempts >= self.settings.max_retries {
            warn!(
                path = %path.display(),
                attempts,
                "retries exhausted, dropping queue entry"
            );
            self.queue.pop_front();
            self.retry_after = None;
        } else {
            let delay = self.settings.backoff_base * attempts;
            debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
            self.retry_after = self.last_attempt.map(|last| last + delay);
        }
    }

    // === Observability ===

    /// Derive the externally visible state.
    ///
    /// A paused coordinator reads as `Paused` even while an interrupted
    /// attempt is still winding down.
    #[must_use]
    pub fn state(&self) -> UploaderState {
        if self.recovering {
            UploaderState::StuckRecovering
        } else if self.pause.is_paused() {
            UploaderState::Paused
        } else if self.uploading {
            UploaderState::Uploading
        } else {
            UploaderState::Idle
        }
    }

    /// Take a status snapshot.
    #[must_use]
    pub fn status(&self) -> UploaderStatus {
        UploaderStatus {
            queue_len: self.queue.len(),
            current_file: self
                .current_file
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            paused: self.pause.is_paused(),
            uploading: self.uploading,
            state: self.state(),
        }
    }

    /// Log a human-readable status summary.
    pub fn log_status(&self) {
        if self.queue.is_empty() {
            debug!("upload queue empty");
        } else {
            info!(
                queue_len = self.queue.len(),
                current_file = ?self.current_file,
                paused = self.pause.is_paused(),
                uploading = self.uploading,
                "upload status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A transport that replays a scripted sequence of outcomes.
    #[derive(Debug, Clone, Default)]
    struct FakeTransport {
        script: Arc<Mutex<VecDeque<TransferOutcome>>>,
        calls: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl FakeTransport {
        fn scripted(outcomes: Vec<TransferOutcome>) -> Self {
            Self {
                script: Arc::new(Mutex::new(outcomes.into())),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn send_file(&self, path: &Path, _pause: &PauseFlag) -> TransferOutcome {
            self.calls.lock().unwrap().push(path.to_path_buf());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TransferOutcome::Accepted)
        }
    }

    /// A transport that holds the connection open until paused.
    #[derive(Debug, Clone, Default)]
    struct BlockingTransport {
        calls: Arc<Mutex<Vec<PathBuf>>>,
    }

    #[async_trait::async_trait]
    impl Transport for BlockingTransport {
        async fn send_file(&self, path: &Path, pause: &PauseFlag) -> TransferOutcome {
            self.calls.lock().unwrap().push(path.to_path_buf());
            loop {
                if pause.is_paused() {
                    return TransferOutcome::Interrupted;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            throttle: Duration::from_millis(100),
            guard_window: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(30),
            stuck_threshold: Duration::from_secs(300),
            delete_after_upload: true,
        }
    }

    fn coordinator(transport: FakeTransport) -> UploadCoordinator {
        UploadCoordinator::new(settings(), Box::new(transport))
    }

    fn write_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"payload").unwrap();
        path
    }

    /// Step the coordinator through spawn/reap cycles with a virtual
    /// clock that clears throttle and backoff between steps.
    async fn drive(c: &mut UploadCoordinator, start: Instant, steps: u32) -> Instant {
        let mut now = start;
        for _ in 0..steps {
            c.process_queue(now, true).await.unwrap();
            // Let the spawned attempt run to completion.
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
            now += Duration::from_secs(10);
        }
        now
    }

    /// Wait for the in-flight attempt task to finish.
    async fn wait_inflight_finished(c: &UploadCoordinator) {
        for _ in 0..500 {
            match &c.inflight {
                Some(handle) if !handle.is_finished() => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                _ => return,
            }
        }
        panic!("in-flight attempt never finished");
    }

    #[test]
    fn test_add_to_queue_idempotent() {
        let mut c = coordinator(FakeTransport::default());
        assert!(c.add_to_queue("/media/a.avi"));
        assert!(!c.add_to_queue("/media/a.avi"));
        assert_eq!(c.queue_len(), 1);
    }

    #[test]
    fn test_clear_queue() {
        let mut c = coordinator(FakeTransport::default());
        c.add_to_queue("/media/a.avi");
        c.add_to_queue("/media/b.avi");
        c.clear_queue();
        assert_eq!(c.queue_len(), 0);
    }

    #[test]
    fn test_should_pause_guard_window_boundary() {
        let c = coordinator(FakeTransport::default());
        assert!(c.should_pause(Duration::from_secs(5)));
        assert!(c.should_pause(Duration::from_secs(0)));
        assert!(!c.should_pause(Duration::from_secs(6)));
    }

    #[test]
    fn test_pause_resume_noops() {
        let mut c = coordinator(FakeTransport::default());
        assert!(!c.is_paused());

        c.resume(); // no-op when not paused
        assert!(!c.is_paused());

        c.pause();
        c.pause(); // idempotent
        assert!(c.is_paused());

        c.resume();
        assert!(!c.is_paused());
    }

    #[test]
    fn test_force_resume_only_when_recording_over() {
        let mut c = coordinator(FakeTransport::default());
        c.uploading = true;
        c.pause();
        assert!(c.is_paused());

        c.force_resume(true); // recording still imminent
        assert!(c.is_paused());

        c.force_resume(false);
        assert!(!c.is_paused());
    }

    #[test]
    fn test_state_derivation() {
        let mut c = coordinator(FakeTransport::default());
        assert_eq!(c.state(), UploaderState::Idle);

        c.uploading = true;
        assert_eq!(c.state(), UploaderState::Uploading);

        // Paused wins over an attempt that is still winding down.
        c.pause();
        assert_eq!(c.state(), UploaderState::Paused);
        c.resume();

        c.recovering = true;
        assert_eq!(c.state(), UploaderState::StuckRecovering);
    }

    #[test]
    fn test_uploader_state_display() {
        assert_eq!(UploaderState::Idle.to_string(), "idle");
        assert_eq!(UploaderState::Uploading.to_string(), "uploading");
        assert_eq!(UploaderState::Paused.to_string(), "paused");
        assert_eq!(UploaderState::StuckRecovering.to_string(), "stuck_recovering");
    }

    #[test]
    fn test_settings_from_upload_config() {
        let config = UploadConfig::default();
        let settings = CoordinatorSettings::from(&config);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.backoff_base, Duration::from_secs(2));
        assert_eq!(settings.throttle, Duration::from_secs(5));
        assert_eq!(settings.guard_window, Duration::from_secs(5));
        assert_eq!(settings.watchdog_interval, Duration::from_secs(30));
        assert_eq!(settings.stuck_threshold, Duration::from_secs(300));
        assert!(settings.delete_after_upload);
    }

    #[tokio::test]
    async fn test_success_deletes_file_and_pops_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.avi");

        let fake = FakeTransport::scripted(vec![TransferOutcome::Accepted]);
        let mut c = coordinator(fake.clone());
        c.add_to_queue(path.clone());

        drive(&mut c, Instant::now(), 3).await;

        assert_eq!(c.queue_len(), 0);
        assert!(!path.exists());
        assert_eq!(fake.calls(), vec![path]);
        assert_eq!(c.state(), UploaderState::Idle);
    }

    #[tokio::test]
    async fn test_success_keeps_file_when_delete_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.avi");

        let mut settings = settings();
        settings.delete_after_upload = false;
        let fake = FakeTransport::scripted(vec![TransferOutcome::Accepted]);
        let mut c = UploadCoordinator::new(settings, Box::new(fake));
        c.add_to_queue(path.clone());

        drive(&mut c, Instant::now(), 3).await;

        assert_eq!(c.queue_len(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_failing_head_is_dropped_then_next_proceeds() {
        // Queue [a, b], uploads of a always rejected with HTTP 500,
        // max_retries = 3 -> a is attempted three times and dropped,
        // then b is attempted and accepted.
        let tmp = tempfile::tempdir().unwrap();
        let a = write_file(tmp.path(), "a.avi");
        let b = write_file(tmp.path(), "b.avi");

        let fake = FakeTransport::scripted(vec![
            TransferOutcome::Rejected(500),
            TransferOutcome::Rejected(500),
            TransferOutcome::Rejected(500),
            TransferOutcome::Accepted,
        ]);
        let mut c = coordinator(fake.clone());
        c.add_to_queue(a.clone());
        c.add_to_queue(b.clone());

        drive(&mut c, Instant::now(), 12).await;

        // a was dropped after exhausting retries; its file is untouched.
        assert_eq!(c.queue_len(), 0);
        assert!(a.exists());
        assert!(!b.exists());
        assert_eq!(fake.calls(), vec![a.clone(), a.clone(), a, b]);
    }

    #[tokio::test]
    async fn test_interrupted_transfer_leaves_entry_at_head() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.avi");

        let fake = FakeTransport::scripted(vec![TransferOutcome::Interrupted]);
        let mut c = coordinator(fake);
        c.add_to_queue(path.clone());

        let t0 = Instant::now();
        c.process_queue(t0, true).await.unwrap();
        wait_inflight_finished(&c).await;
        // Reaping is its own step; no new attempt starts in the same call.
        c.process_queue(t0 + Duration::from_secs(10), true).await.unwrap();

        // Untouched: still at the head, attempt counter not advanced.
        assert_eq!(c.queue_len(), 1);
        assert_eq!(c.queue.front().unwrap().path, path);
        assert_eq!(c.queue.front().unwrap().attempts, 0);
        assert!(c.inflight.is_none());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_pause_mid_transfer_interrupts_and_preserves_entry() {
        // The attempt is in flight on its own task when the pause flag
        // flips; the transport aborts, and the reap leaves the entry at
        // the head with its attempt counter untouched.
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.avi");

        let blocking = BlockingTransport::default();
        let mut c = UploadCoordinator::new(settings(), Box::new(blocking.clone()));
        c.add_to_queue(path.clone());

        let t0 = Instant::now();
        c.process_queue(t0, true).await.unwrap();
        tokio::task::yield_now().await;
        assert!(c.uploading);
        assert_eq!(c.state(), UploaderState::Uploading);

        c.pause();
        wait_inflight_finished(&c).await;
        c.process_queue(t0 + Duration::from_secs(1), true).await.unwrap();

        assert_eq!(c.state(), UploaderState::Paused);
        assert_eq!(c.queue_len(), 1);
        assert_eq!(c.queue.front().unwrap().path, path);
        assert_eq!(c.queue.front().unwrap().attempts, 0);
        assert!(path.exists());
        assert_eq!(blocking.calls.lock().unwrap().len(), 1);

        // Resuming lets the same entry go out again.
        c.resume();
        c.process_queue(t0 + Duration::from_secs(10), true).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(blocking.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_paused_coordinator_does_not_transfer() {
        let fake = FakeTransport::default();
        let mut c = coordinator(fake.clone());
        c.add_to_queue("/media/a.avi");
        c.pause();

        c.process_queue(Instant::now(), true).await.unwrap();

        assert!(fake.calls().is_empty());
        assert!(c.inflight.is_none());
        assert_eq!(c.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_skips_processing() {
        let fake = FakeTransport::default();
        let mut c = coordinator(fake.clone());
        c.add_to_queue("/media/a.avi");

        c.process_queue(Instant::now(), false).await.unwrap();

        assert!(fake.calls().is_empty());
        assert_eq!(c.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_between_attempts_stops_retrying() {
        // One failed attempt, then the connection drops: no further
        // network use until it comes back, entry left at the head with
        // its failure recorded.
        let tmp = tempfile::tempdir().unwrap();
        let a = write_file(tmp.path(), "a.avi");

        let fake = FakeTransport::scripted(vec![TransferOutcome::Rejected(500)]);
        let mut c = coordinator(fake.clone());
        c.add_to_queue(a.clone());

        let t0 = Instant::now();
        c.process_queue(t0, true).await.unwrap();
        wait_inflight_finished(&c).await;
        c.process_queue(t0 + Duration::from_secs(10), true).await.unwrap();
        assert_eq!(c.queue.front().unwrap().attempts, 1);

        for i in 2..6 {
            c.process_queue(t0 + Duration::from_secs(10 * i), false)
                .await
                .unwrap();
        }

        assert_eq!(fake.calls().len(), 1);
        assert_eq!(c.queue_len(), 1);
        assert_eq!(c.queue.front().unwrap().attempts, 1);

        // Back online: the retry sequence picks up where it left off.
        c.process_queue(t0 + Duration::from_secs(100), true).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_process_respects_throttle() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write_file(tmp.path(), "a.avi");
        let b = write_file(tmp.path(), "b.avi");

        let fake = FakeTransport::default(); // always accepts
        let mut c = coordinator(fake.clone());
        c.add_to_queue(a);
        c.add_to_queue(b);

        let t0 = Instant::now();
        c.process_queue(t0, true).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(fake.calls().len(), 1);
        c.process_queue(t0 + Duration::from_millis(10), true).await.unwrap();

        // Within the throttle interval: no new attempt.
        c.process_queue(t0 + Duration::from_millis(20), true).await.unwrap();
        assert_eq!(fake.calls().len(), 1);

        // Past the throttle interval: next entry goes out.
        c.process_queue(t0 + Duration::from_millis(200), true).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(fake.calls().len(), 2);
        c.process_queue(t0 + Duration::from_millis(400), true).await.unwrap();
        assert_eq!(c.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_watchdog_forces_idle_after_stuck_threshold() {
        // stuck_threshold = 300s, watchdog_interval = 30s; a transfer
        // starts at t0 and never completes -> at the first watchdog
        // tick past t0+300 the attempt is aborted and the state forced
        // back to idle.
        let mut c = coordinator(FakeTransport::default());
        let t0 = Instant::now();
        c.inflight = Some(tokio::spawn(std::future::pending::<TransferOutcome>()));
        c.uploading = true;
        c.current_file = Some(PathBuf::from("/media/a.avi"));
        c.uploading_since = Some(t0);
        c.last_attempt = Some(t0);

        // First check: runs, but the transfer is not yet stuck.
        assert!(!c.check_stuck(t0 + Duration::from_secs(30)));
        assert!(c.uploading);

        // Checks within the watchdog interval are skipped.
        assert!(!c.check_stuck(t0 + Duration::from_secs(31)));

        // First check past the threshold forces the reset.
        assert!(c.check_stuck(t0 + Duration::from_secs(301)));
        assert!(!c.uploading);
        assert!(c.inflight.is_none());
        assert!(c.current_file.is_none());
        assert_eq!(c.state(), UploaderState::StuckRecovering);
    }

    #[test]
    fn test_watchdog_noop_when_not_transferring() {
        let mut c = coordinator(FakeTransport::default());
        let t0 = Instant::now();
        assert!(!c.check_stuck(t0));
        assert!(!c.check_stuck(t0 + Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_processing_clears_recovering_state() {
        let mut c = coordinator(FakeTransport::default());
        c.recovering = true;
        assert_eq!(c.state(), UploaderState::StuckRecovering);

        c.process_queue(Instant::now(), true).await.unwrap();
        assert_eq!(c.state(), UploaderState::Idle);
    }

    #[test]
    fn test_populate_from_storage_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "20260825_080000.avi");
        write_file(tmp.path(), "20260825_090000.avi");

        let store = MediaStore::open(
            tmp.path(),
            "avi",
            crate::store::StorageBudget {
                max_total_bytes: 1024,
                min_free_bytes: 0,
                enabled: true,
            },
        )
        .unwrap();

        let mut c = coordinator(FakeTransport::default());
        assert_eq!(c.populate_from_storage(&store).unwrap(), 2);
        assert_eq!(c.populate_from_storage(&store).unwrap(), 0);
        assert_eq!(c.queue_len(), 2);

        // Oldest first (lexical tie-break on equal mtimes).
        let first = c.queue.front().unwrap().path.clone();
        assert!(first.ends_with("20260825_080000.avi"));
    }

    #[test]
    fn test_status_snapshot() {
        let mut c = coordinator(FakeTransport::default());
        c.add_to_queue("/media/a.avi");
        c.uploading = true;
        c.current_file = Some(PathBuf::from("/media/a.avi"));

        let status = c.status();
        assert_eq!(status.queue_len, 1);
        assert_eq!(status.current_file.as_deref(), Some("a.avi"));
        assert!(status.uploading);
        assert!(!status.paused);
        assert_eq!(status.state, UploaderState::Uploading);
    }

    #[test]
    fn test_log_status_does_not_panic() {
        let mut c = coordinator(FakeTransport::default());
        c.log_status();
        c.add_to_queue("/media/a.avi");
        c.log_status();
    }

    #[test]
    fn test_pause_flag_shared_between_clones() {
        let flag = PauseFlag::new();
        let clone = flag.clone();

        flag.pause();
        assert!(clone.is_paused());

        clone.resume();
        assert!(!flag.is_paused());
    }
}
