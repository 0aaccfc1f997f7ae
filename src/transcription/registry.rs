//! # Job Registry
//!
//! Owns the mapping from job identifier to in-flight transcription state.
//! This is the only shared mutable state in the transcription path, guarded
//! by a single mutex that is held only for insert/lookup/remove, never
//! while waiting on the child process.
//!
//! ## Lifecycle:
//! `Idle → Running → {Completed, TimedOut, Cancelled}`. Registration is the
//! `Idle → Running` transition; every terminal transition removes the entry.
//! At most one job may be active per identifier: a second registration for
//! an active id is rejected instead of racing two engine processes over the
//! same output files.
//!
//! ## Cancellation:
//! `cancel` marks the entry's `cancelled` flag (set exactly once) and fires
//! its token. The controller waiting on the process observes the token,
//! terminates the child, and re-checks the flag before publishing any
//! result, closing the race where the process finishes legitimately at
//! nearly the same instant the cancellation arrives. Cancelling an unknown
//! id is an idempotent no-op.

use crate::error::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed deadline for preview-mode runs.
const PREVIEW_TIMEOUT: Duration = Duration::from_secs(300);

/// Full-file deadline floor (minutes).
const MIN_FULL_TIMEOUT_MINUTES: f64 = 30.0;

/// Full-file deadline ceiling.
const MAX_FULL_TIMEOUT: Duration = Duration::from_secs(14_400);

/// Estimated engine minutes per megabyte of input audio.
const MINUTES_PER_MB: f64 = 1.5;

/// Registry entry for one running job.
struct JobEntry {
    cancel_token: CancellationToken,
    cancelled: Arc<AtomicBool>,
    pid: Option<u32>,
    started_at: Instant,
}

/// Handle given to the process controller for one registered job.
///
/// Carries the pieces of registry state the controller needs while waiting
/// on the child, so the registry lock never outlives a lookup.
#[derive(Clone, Debug)]
pub struct JobTicket {
    pub job_id: String,
    pub cancel_token: CancellationToken,
    cancelled: Arc<AtomicBool>,
}

impl JobTicket {
    /// Whether a cancellation request was observed for this job. Checked by
    /// the controller before publishing a success result.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Mutex-guarded map of active transcription jobs.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically insert a job and hand back its controller ticket.
    ///
    /// Rejects registration while another job is active under the same id.
    pub fn register(&self, job_id: &str) -> AppResult<JobTicket> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(job_id) {
            return Err(AppError::Conflict(format!(
                "transcription already running for job {}",
                job_id
            )));
        }

        let cancel_token = CancellationToken::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        jobs.insert(
            job_id.to_string(),
            JobEntry {
                cancel_token: cancel_token.clone(),
                cancelled: cancelled.clone(),
                pid: None,
                started_at: Instant::now(),
            },
        );
        debug!(job_id, "job registered");

        Ok(JobTicket {
            job_id: job_id.to_string(),
            cancel_token,
            cancelled,
        })
    }

    /// Record the spawned child's pid for the graceful-terminate path.
    pub fn set_pid(&self, job_id: &str, pid: u32) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.pid = Some(pid);
        }
    }

    /// Request cancellation of a job.
    ///
    /// Sets the `cancelled` flag before firing the token so a concurrently
    /// finishing completion path sees the flag and discards its result.
    /// Returns whether a matching active job was found; an absent id is a
    /// successful no-op.
    pub fn cancel(&self, job_id: &str) -> bool {
        let entry_state = {
            let jobs = self.jobs.lock().unwrap();
            jobs.get(job_id)
                .map(|entry| (entry.cancelled.clone(), entry.cancel_token.clone()))
        };

        match entry_state {
            Some((cancelled, token)) => {
                cancelled.store(true, Ordering::SeqCst);
                token.cancel();
                info!(job_id, "cancellation requested");
                true
            }
            None => {
                debug!(job_id, "cancel for unknown job ignored");
                false
            }
        }
    }

    /// Remove a job on any terminal transition. Returns whether it was
    /// still present.
    pub fn remove(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        let removed = jobs.remove(job_id);
        if let Some(entry) = &removed {
            debug!(
                job_id,
                elapsed_secs = entry.started_at.elapsed().as_secs(),
                "job removed from registry"
            );
        }
        removed.is_some()
    }

    /// Whether a job is currently active.
    pub fn is_active(&self, job_id: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(job_id)
    }

    /// Number of currently active jobs (for health reporting).
    pub fn active_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Pid of a job's child process, if it has spawned.
    pub fn pid_of(&self, job_id: &str) -> Option<u32> {
        self.jobs.lock().unwrap().get(job_id).and_then(|e| e.pid)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock deadline for an engine run.
///
/// Preview mode gets a fixed 5 minutes. Full files scale with input size at
/// 1.5 minutes per MB, floored at 30 minutes and capped at 4 hours.
pub fn timeout_for(preview: bool, file_size_bytes: u64) -> Duration {
    if preview {
        return PREVIEW_TIMEOUT;
    }

    let file_size_mb = file_size_bytes as f64 / (1024.0 * 1024.0);
    let estimated_minutes = (file_size_mb * MINUTES_PER_MB).max(MIN_FULL_TIMEOUT_MINUTES);
    let timeout = Duration::from_secs((estimated_minutes * 60.0) as u64);
    timeout.min(MAX_FULL_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_register_and_remove() {
        let registry = JobRegistry::new();
        let ticket = registry.register("job-1").unwrap();
        assert!(registry.is_active("job-1"));
        assert_eq!(registry.active_count(), 1);
        assert!(!ticket.was_cancelled());

        assert!(registry.remove("job-1"));
        assert!(!registry.is_active("job-1"));
        assert!(!registry.remove("job-1"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = JobRegistry::new();
        let _ticket = registry.register("job-1").unwrap();
        let err = registry.register("job-1").unwrap_err();
        assert_eq!(err.kind(), "conflict");

        // A different id is unaffected.
        assert!(registry.register("job-2").is_ok());
    }

    #[test]
    fn test_reregistration_after_removal() {
        let registry = JobRegistry::new();
        let _ticket = registry.register("job-1").unwrap();
        registry.remove("job-1");
        assert!(registry.register("job-1").is_ok());
    }

    #[test]
    fn test_cancel_sets_flag_and_fires_token() {
        let registry = JobRegistry::new();
        let ticket = registry.register("job-1").unwrap();

        assert!(registry.cancel("job-1"));
        assert!(ticket.was_cancelled());
        assert!(ticket.cancel_token.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_job_is_noop() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn test_cancel_flag_survives_removal() {
        // The completion path may remove the entry after a cancel arrived;
        // the ticket it already holds must still report the cancellation.
        let registry = JobRegistry::new();
        let ticket = registry.register("job-1").unwrap();
        registry.cancel("job-1");
        registry.remove("job-1");
        assert!(ticket.was_cancelled());
    }

    #[test]
    fn test_pid_tracking() {
        let registry = JobRegistry::new();
        let _ticket = registry.register("job-1").unwrap();
        assert_eq!(registry.pid_of("job-1"), None);
        registry.set_pid("job-1", 4242);
        assert_eq!(registry.pid_of("job-1"), Some(4242));
    }

    #[test]
    fn test_preview_timeout_is_fixed() {
        assert_eq!(timeout_for(true, 0), Duration::from_secs(300));
        assert_eq!(timeout_for(true, 500 * MB), Duration::from_secs(300));
    }

    #[test]
    fn test_full_timeout_scales_with_size() {
        // 100 MB -> max(30, 150) minutes = 9000 seconds.
        assert_eq!(timeout_for(false, 100 * MB), Duration::from_secs(9000));
    }

    #[test]
    fn test_full_timeout_floor() {
        // 1 MB -> 1.5 estimated minutes, floored to 30 minutes.
        assert_eq!(timeout_for(false, MB), Duration::from_secs(1800));
        assert_eq!(timeout_for(false, 0), Duration::from_secs(1800));
    }

    #[test]
    fn test_full_timeout_ceiling() {
        // 1000 MB -> 1500 minutes, capped at 4 hours.
        assert_eq!(timeout_for(false, 1000 * MB), Duration::from_secs(14_400));
    }
}
