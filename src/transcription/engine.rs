//! # Engine Process Control
//!
//! Spawns the external speech-to-text engine as a child process and owns its
//! lifecycle: stdout/stderr draining, wall-clock timeout, and cooperative
//! cancellation with a graceful-terminate-then-kill escalation.
//!
//! The engine executable is located by probing a short ordered list of
//! install paths beneath the working directory, falling back to a bare
//! command name resolved via `PATH`. Preview mode first trims the upload
//! with the configured audio trimmer so only the leading seconds are
//! processed.

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::transcription::registry::{JobRegistry, JobTicket};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long a cancelled child gets to exit after the terminate signal
/// before it is force-killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Deadline for the trimmer's fast stream-copy attempt.
const TRIM_COPY_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the trimmer's slower re-encode fallback.
const TRIM_REENCODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured output of a completed engine run.
#[derive(Debug)]
pub struct EngineRun {
    pub stdout: String,
    pub stderr: String,
}

/// External engine invoker bound to one working directory.
pub struct WhisperEngine {
    config: EngineConfig,
    work_dir: PathBuf,
}

impl WhisperEngine {
    pub fn new(config: EngineConfig, work_dir: PathBuf) -> Self {
        Self { config, work_dir }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Resolve the engine executable.
    ///
    /// An explicit `engine.binary` config wins. Otherwise each candidate
    /// path is probed beneath the working directory and the first existing
    /// file is used; when none exists the bare fallback command is returned
    /// for `PATH` resolution at spawn time.
    pub fn locate_binary(&self) -> String {
        if let Some(binary) = &self.config.binary {
            return binary.clone();
        }

        for candidate in &self.config.binary_candidates {
            let path = self.work_dir.join(candidate);
            if path.is_file() {
                return path.to_string_lossy().into_owned();
            }
        }

        self.config.fallback_command.clone()
    }

    /// Run the engine over `audio_path` and wait for a terminal outcome.
    ///
    /// ## Terminal transitions:
    /// - clean exit → `Ok(EngineRun)`
    /// - nonzero, non-signal exit → `EngineExecutionFailed` with stderr
    /// - exit by the terminate signal → `ProcessCancelled` (defensive
    ///   double-check, independent of the registry flag)
    /// - deadline elapsed → child killed, `ProcessTimeout`
    /// - cancellation token fired → terminate signal, up to 5 s grace, then
    ///   kill → `ProcessCancelled`
    pub async fn run(
        &self,
        registry: &JobRegistry,
        ticket: &JobTicket,
        audio_path: &Path,
        model: &str,
        language: &str,
        timeout: Duration,
    ) -> AppResult<EngineRun> {
        let binary = self.locate_binary();
        info!(
            job_id = %ticket.job_id,
            binary = %binary,
            audio = %audio_path.display(),
            model,
            language,
            timeout_secs = timeout.as_secs(),
            "starting engine"
        );

        let mut child = Command::new(&binary)
            .arg(audio_path)
            .arg("--model")
            .arg(model)
            .arg("--output_format")
            .arg("txt")
            .arg("--output_format")
            .arg("srt")
            .arg("--language")
            .arg(language)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    AppError::EngineNotFound(binary.clone())
                } else {
                    AppError::Internal(format!("failed to spawn engine: {}", err))
                }
            })?;

        if let Some(pid) = child.id() {
            registry.set_pid(&ticket.job_id, pid);
        }

        // Take the pipes before selecting so the child can be killed on
        // timeout/cancel without a wait_with_output() holding it.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_handle = tokio::spawn(drain(stdout_pipe));
        let stderr_handle = tokio::spawn(drain(stderr_pipe));

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|err| AppError::Internal(format!("engine wait failed: {}", err)))?;
                let stdout = String::from_utf8_lossy(&stdout_handle.await.unwrap_or_default())
                    .into_owned();
                let stderr = String::from_utf8_lossy(&stderr_handle.await.unwrap_or_default())
                    .into_owned();

                if exited_by_terminate_signal(&status) {
                    info!(job_id = %ticket.job_id, "engine exited by terminate signal");
                    return Err(AppError::ProcessCancelled);
                }
                if !status.success() {
                    warn!(
                        job_id = %ticket.job_id,
                        code = ?status.code(),
                        "engine exited with failure"
                    );
                    return Err(AppError::EngineExecutionFailed(stderr.trim().to_string()));
                }

                debug!(job_id = %ticket.job_id, "engine completed");
                Ok(EngineRun { stdout, stderr })
            }
            () = tokio::time::sleep(timeout) => {
                warn!(
                    job_id = %ticket.job_id,
                    timeout_secs = timeout.as_secs(),
                    "engine deadline elapsed, killing process"
                );
                let _ = child.kill().await;
                stdout_handle.abort();
                stderr_handle.abort();
                Err(AppError::ProcessTimeout { seconds: timeout.as_secs() })
            }
            () = ticket.cancel_token.cancelled() => {
                info!(job_id = %ticket.job_id, "cancellation observed, terminating engine");
                terminate_gracefully(&mut child).await;
                stdout_handle.abort();
                stderr_handle.abort();
                Err(AppError::ProcessCancelled)
            }
        }
    }

    /// Produce a trimmed copy of `audio_path` covering only the leading
    /// `duration_secs`, for preview mode.
    ///
    /// Tries a fast stream copy first; when the container refuses that, one
    /// re-encode attempt follows. Returns `None` when trimming fails;
    /// callers then fall back to processing the full file.
    pub async fn trim_audio(&self, audio_path: &Path, duration_secs: u32) -> Option<PathBuf> {
        let extension = audio_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wav")
            .to_lowercase();
        let stem = audio_path.file_stem()?.to_str()?;
        let trimmed = self.work_dir.join(format!("{}_preview.{}", stem, extension));

        let copy_args = vec![
            "-i".to_string(),
            audio_path.to_string_lossy().into_owned(),
            "-t".to_string(),
            duration_secs.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            trimmed.to_string_lossy().into_owned(),
        ];

        if self.run_trimmer(&copy_args, TRIM_COPY_TIMEOUT).await && file_has_content(&trimmed) {
            debug!(trimmed = %trimmed.display(), duration_secs, "audio trimmed (stream copy)");
            return Some(trimmed);
        }

        // Stream copy can fail on some containers; re-encode as a fallback.
        let codec_args: Vec<String> = if extension == "mp3" {
            ["-acodec", "mp3", "-ab", "128k", "-ar", "16000", "-ac", "1"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            ["-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        };

        let mut reencode_args = vec![
            "-i".to_string(),
            audio_path.to_string_lossy().into_owned(),
            "-t".to_string(),
            duration_secs.to_string(),
        ];
        reencode_args.extend(codec_args);
        reencode_args.push("-y".to_string());
        reencode_args.push(trimmed.to_string_lossy().into_owned());

        if self.run_trimmer(&reencode_args, TRIM_REENCODE_TIMEOUT).await
            && file_has_content(&trimmed)
        {
            debug!(trimmed = %trimmed.display(), duration_secs, "audio trimmed (re-encoded)");
            return Some(trimmed);
        }

        warn!(audio = %audio_path.display(), "audio trimming failed, will process full file");
        let _ = std::fs::remove_file(&trimmed);
        None
    }

    /// Run the trimmer once with a deadline; true on clean exit.
    async fn run_trimmer(&self, args: &[String], timeout: Duration) -> bool {
        let result = tokio::time::timeout(
            timeout,
            Command::new(&self.config.trimmer)
                .args(args)
                .current_dir(&self.work_dir)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(err)) => {
                warn!(trimmer = %self.config.trimmer, error = %err, "trimmer failed to run");
                false
            }
            Err(_) => {
                warn!(trimmer = %self.config.trimmer, "trimmer timed out");
                false
            }
        }
    }
}

/// Send the terminate signal, allow the grace period, then force-kill.
async fn terminate_gracefully(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Graceful terminate first so the engine can flush partial output.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!(pid, "child ignored terminate signal, force-killing");
        }
    }

    let _ = child.kill().await;
}

/// Whether the child exited because of the graceful-terminate signal.
fn exited_by_terminate_signal(status: &std::process::ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(libc::SIGTERM) {
            return true;
        }
    }
    // Shell-style encoding of death-by-SIGTERM.
    status.code() == Some(143)
}

async fn drain(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

fn file_has_content(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
