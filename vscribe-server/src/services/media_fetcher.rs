//! Media fetcher: wraps the external `yt-dlp` downloader
//!
//! Two subprocess phases per task: a metadata probe (`--dump-json`) and the
//! audio download itself. The submitted URL must have passed the SSRF guard
//! before either subprocess is spawned, all output is confined to the task's
//! temp directory, and cookie files are removed on every exit path.

use crate::models::VideoInfo;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vscribe_common::urlguard::{is_safe_base_url, UrlPolicy};
use vscribe_common::{Error, Result};

/// Name of the downloader executable
const YTDLP_BIN: &str = "yt-dlp";

/// Cookie file staged in the task directory; removed on drop so every exit
/// path (success, failure, cancellation) cleans it up.
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    /// Write `contents` to `<task_dir>/cookies.txt` with owner-only
    /// permissions.
    pub fn write(task_dir: &Path, contents: &str) -> Result<Self> {
        let path = task_dir.join("cookies.txt");
        std::fs::write(&path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CookieFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove cookie file");
            }
        }
    }
}

/// Wrapper over yt-dlp, parameterized by the URL policy and size cap.
pub struct MediaFetcher {
    policy: UrlPolicy,
    max_file_size_mb: u64,
}

impl MediaFetcher {
    pub fn new(policy: UrlPolicy, max_file_size_mb: u64) -> Self {
        Self {
            policy,
            max_file_size_mb,
        }
    }

    /// Probe metadata without downloading.
    pub async fn probe(
        &self,
        url: &str,
        cookies: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<VideoInfo> {
        let vetted = is_safe_base_url(url, &self.policy).await?;

        let mut args: Vec<String> = vec![
            "--dump-json".into(),
            "--no-download".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
        ];
        if let Some(cookie_path) = cookies {
            args.push("--cookies".into());
            args.push(cookie_path.display().to_string());
        }
        args.push(vetted.to_string());

        let output = run_ytdlp(&args, None, cancel).await?;
        parse_probe_output(&output.stdout, url)
    }

    /// Download and consolidate the audio track into the task directory.
    /// Returns the path of the resulting audio file.
    pub async fn download(
        &self,
        url: &str,
        task_dir: &Path,
        cookies: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let vetted = is_safe_base_url(url, &self.policy).await?;

        let template = task_dir.join("audio.%(ext)s");
        let mut args: Vec<String> = vec![
            "-x".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            "0".into(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "--no-warnings".into(),
            "--max-filesize".into(),
            format!("{}M", self.max_file_size_mb),
            "--output".into(),
            template.display().to_string(),
        ];
        if let Some(cookie_path) = cookies {
            args.push("--cookies".into());
            args.push(cookie_path.display().to_string());
        }
        args.push(vetted.to_string());

        run_ytdlp(&args, Some(task_dir), cancel).await?;

        find_audio_file(task_dir)
    }
}

struct ProcessOutput {
    stdout: String,
}

/// Spawn yt-dlp, stream stdout/stderr into buffers, and wait — killing the
/// child if the task is cancelled first.
async fn run_ytdlp(
    args: &[String],
    working_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<ProcessOutput> {
    let mut cmd = Command::new(YTDLP_BIN);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!(args = ?args, "Spawning yt-dlp");
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolMissing(format!("{} is not installed", YTDLP_BIN))
        } else {
            Error::Internal(format!("spawn {}: {}", YTDLP_BIN, e))
        }
    })?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| Error::Internal(format!("wait for {}: {}", YTDLP_BIN, e)))?
        }
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(Error::Cancelled);
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

    if status.success() {
        Ok(ProcessOutput { stdout })
    } else {
        Err(classify_failure(&stderr))
    }
}

/// Map yt-dlp stderr onto the service error kinds.
fn classify_failure(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let tail: String = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("downloader failed")
        .chars()
        .take(300)
        .collect();

    if lower.contains("video unavailable")
        || lower.contains("404")
        || lower.contains("does not exist")
    {
        Error::NotFound(format!("media not found: {}", tail))
    } else if lower.contains("not available in your country")
        || lower.contains("geo restriction")
        || lower.contains("blocked in your")
    {
        Error::Vendor(format!("media is geo-blocked: {}", tail))
    } else if lower.contains("sign in")
        || lower.contains("login required")
        || lower.contains("private video")
        || lower.contains("members-only")
    {
        Error::Unauthorized(format!("media requires authentication: {}", tail))
    } else if lower.contains("no space left") {
        Error::DiskFull(tail)
    } else if lower.contains("unable to download")
        || lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("network")
        || lower.contains("temporary failure")
    {
        Error::Network(format!("download failed: {}", tail))
    } else if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        Error::UrlRejected(format!("downloader rejected URL: {}", tail))
    } else {
        Error::Vendor(format!("downloader failed: {}", tail))
    }
}

fn parse_probe_output(stdout: &str, url: &str) -> Result<VideoInfo> {
    // --dump-json emits one JSON object per line; single video → one line.
    let line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with('{'))
        .ok_or_else(|| Error::Vendor("probe produced no metadata".to_string()))?;

    let value: Value = serde_json::from_str(line)
        .map_err(|e| Error::Vendor(format!("unparseable probe metadata: {}", e)))?;

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("untitled")
        .to_string();
    let uploader = value
        .get("uploader")
        .or_else(|| value.get("channel"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let duration_seconds = value
        .get("duration")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    Ok(VideoInfo {
        title,
        uploader,
        duration_seconds,
        source_url: Some(url.to_string()),
    })
}

/// Locate the consolidated audio file produced by the download phase.
fn find_audio_file(task_dir: &Path) -> Result<PathBuf> {
    let expected = task_dir.join("audio.mp3");
    if expected.exists() {
        return Ok(expected);
    }

    // Extraction may keep a different container when re-encoding is skipped.
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(task_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_stem().map(|s| s == "audio").unwrap_or(false) && p.is_file()
        })
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::Internal("downloader produced no audio file".to_string()))
}
