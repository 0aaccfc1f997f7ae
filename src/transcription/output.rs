//! # Transcript Output Discovery
//!
//! Locates the transcript the engine produced after a successful run. The
//! engine derives its output name from the input audio's base name, but the
//! working directory can also hold stale artifacts, and preview runs feed
//! the engine a trimmed copy whose base name differs from the original
//! upload. Discovery therefore walks an ordered candidate list instead of
//! assuming one fixed path:
//!
//! 1. `{processed stem}.txt`
//! 2. `{original stem}.txt`
//! 3. any other recently-modified `.txt` that is not a known documentation
//!    file
//! 4. the same ladder over `.srt`, stripping subtitle framing back to plain
//!    text
//!
//! The first candidate with non-empty content wins and is deleted after
//! being read so stale outputs never accumulate.

use crate::error::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Documentation files that legitimately live in the working directory and
/// must never be mistaken for engine output.
const EXCLUDED_FILENAMES: &[&str] = &[
    "readme.txt",
    "requirements.txt",
    "license.txt",
    "notice.txt",
    "changelog.txt",
    "todo.txt",
];

/// Only unclaimed files modified within this window count as engine output.
const RECENT_WINDOW: Duration = Duration::from_secs(60);

/// Search the working directory for the transcript of a finished run.
///
/// `processed_audio` is the file actually fed to the engine (possibly a
/// trimmed preview copy); `original_audio` is the uploaded file. Returns the
/// transcript text, or `NoTranscriptProduced` when no candidate has content.
pub fn discover_transcript(
    work_dir: &Path,
    processed_audio: &Path,
    original_audio: &Path,
) -> AppResult<String> {
    if let Some(text) = find_candidate(work_dir, processed_audio, original_audio, "txt")? {
        return Ok(text);
    }

    if let Some(raw) = find_candidate(work_dir, processed_audio, original_audio, "srt")? {
        let text = strip_subtitles(&raw);
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }

    Err(AppError::NoTranscriptProduced)
}

/// Walk the candidate ladder for one extension. Returns the content of the
/// first non-empty candidate, consuming (deleting) the file.
fn find_candidate(
    work_dir: &Path,
    processed_audio: &Path,
    original_audio: &Path,
    extension: &str,
) -> AppResult<Option<String>> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(stem) = file_stem(processed_audio) {
        candidates.push(work_dir.join(format!("{}.{}", stem, extension)));
    }
    if let Some(stem) = file_stem(original_audio) {
        let path = work_dir.join(format!("{}.{}", stem, extension));
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }
    candidates.extend(recent_outputs(work_dir, extension, &candidates));

    for candidate in candidates {
        match consume_if_nonempty(&candidate) {
            Ok(Some(content)) => {
                debug!(path = %candidate.display(), "found engine output");
                return Ok(Some(content));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(path = %candidate.display(), error = %err, "could not read candidate output");
            }
        }
    }

    Ok(None)
}

/// List other files with the given extension modified within the recency
/// window, newest first, skipping documentation files and already-listed
/// candidates.
fn recent_outputs(work_dir: &Path, extension: &str, already: &[PathBuf]) -> Vec<PathBuf> {
    let entries = match fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let now = SystemTime::now();
    let mut found: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                return None;
            }
            let name = path.file_name()?.to_str()?.to_lowercase();
            if EXCLUDED_FILENAMES.contains(&name.as_str()) || already.contains(&path) {
                return None;
            }
            let modified = entry.metadata().ok()?.modified().ok()?;
            match now.duration_since(modified) {
                Ok(age) if age <= RECENT_WINDOW => Some((path, modified)),
                // A file timestamped slightly in the future is still recent.
                Err(_) => Some((path, modified)),
                Ok(_) => None,
            }
        })
        .collect();

    found.sort_by(|a, b| b.1.cmp(&a.1));
    found.into_iter().map(|(path, _)| path).collect()
}

/// Read and delete a candidate if it has non-empty content.
fn consume_if_nonempty(path: &Path) -> std::io::Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "could not delete consumed output");
    }
    Ok(Some(content))
}

/// Reduce subtitle text to plain prose: drop sequence numbers, timing lines
/// and blanks, then join the remaining lines with single spaces.
fn strip_subtitles(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.contains("-->")
                && !line.chars().all(|c| c.is_ascii_digit())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_primary_candidate_wins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "trimmed.txt", "from the trimmed copy");
        write(&dir, "upload.txt", "from the original upload");

        let text = discover_transcript(
            dir.path(),
            &dir.path().join("trimmed.mp3"),
            &dir.path().join("upload.mp3"),
        )
        .unwrap();

        assert_eq!(text, "from the trimmed copy");
        // Consumed artifact is deleted, the other is left alone.
        assert!(!dir.path().join("trimmed.txt").exists());
        assert!(dir.path().join("upload.txt").exists());
    }

    #[test]
    fn test_falls_back_to_original_name() {
        let dir = TempDir::new().unwrap();
        write(&dir, "upload.txt", "engine used the original name");

        let text = discover_transcript(
            dir.path(),
            &dir.path().join("trimmed.mp3"),
            &dir.path().join("upload.mp3"),
        )
        .unwrap();

        assert_eq!(text, "engine used the original name");
        assert!(!dir.path().join("upload.txt").exists());
    }

    #[test]
    fn test_empty_primary_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "trimmed.txt", "   \n  ");
        write(&dir, "upload.txt", "real content");

        let text = discover_transcript(
            dir.path(),
            &dir.path().join("trimmed.mp3"),
            &dir.path().join("upload.mp3"),
        )
        .unwrap();

        assert_eq!(text, "real content");
    }

    #[test]
    fn test_recent_unnamed_output_is_found() {
        let dir = TempDir::new().unwrap();
        write(&dir, "tmpa81xk2.txt", "engine invented its own name");

        let text = discover_transcript(
            dir.path(),
            &dir.path().join("trimmed.mp3"),
            &dir.path().join("upload.mp3"),
        )
        .unwrap();

        assert_eq!(text, "engine invented its own name");
    }

    #[test]
    fn test_documentation_files_are_never_output() {
        let dir = TempDir::new().unwrap();
        write(&dir, "README.txt", "project documentation");
        write(&dir, "requirements.txt", "whisper==1.0");

        let err = discover_transcript(
            dir.path(),
            &dir.path().join("audio.mp3"),
            &dir.path().join("audio.mp3"),
        )
        .unwrap_err();

        assert_eq!(err.kind(), "no_transcript_produced");
        assert!(dir.path().join("README.txt").exists());
    }

    #[test]
    fn test_srt_fallback_strips_framing() {
        let dir = TempDir::new().unwrap();
        let srt = "1\n00:00:00,000 --> 00:00:05,000\nThe talk begins now.\n\n\
                   2\n00:00:05,000 --> 00:00:09,500\nPlease sit comfortably.\n";
        write(&dir, "audio.srt", srt);

        let text = discover_transcript(
            dir.path(),
            &dir.path().join("audio.mp3"),
            &dir.path().join("audio.mp3"),
        )
        .unwrap();

        assert_eq!(text, "The talk begins now. Please sit comfortably.");
        assert!(!dir.path().join("audio.srt").exists());
    }

    #[test]
    fn test_nothing_found() {
        let dir = TempDir::new().unwrap();
        let err = discover_transcript(
            dir.path(),
            &dir.path().join("a.mp3"),
            &dir.path().join("a.mp3"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "no_transcript_produced");
    }

    #[test]
    fn test_strip_subtitles_unit() {
        let raw = "12\n00:01:00,000 --> 00:01:04,000\nfirst line\nsecond line\n\n13\ninvalid block";
        assert_eq!(
            strip_subtitles(raw),
            "first line second line invalid block"
        );
    }
}
