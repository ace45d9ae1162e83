//! Audio processor: duration probing and fixed-length segmentation
//!
//! Long audio is split into contiguous segments so each STT request stays
//! within vendor limits. The emitted plan is exact: segment boundaries abut
//! (`end[i] == start[i+1]`) and the final boundary equals the probed
//! duration, so absolute timestamps can be derived by offsetting.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vscribe_common::{Error, Result};

/// One contiguous slice of task audio, processed as one STT request
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub index: u32,
    pub path: PathBuf,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl SegmentPlan {
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Probe the duration of an audio file with ffprobe.
pub async fn probe_duration(audio_path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(audio_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolMissing("ffprobe is not installed".to_string())
            } else {
                Error::Internal(format!("spawn ffprobe: {}", e))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "ffprobe failed for {}: {}",
            audio_path.display(),
            stderr.trim()
        )));
    }

    let value: Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::Internal(format!("unparseable ffprobe output: {}", e)))?;

    value
        .pointer("/format/duration")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| {
            Error::Internal(format!(
                "ffprobe reported no duration for {}",
                audio_path.display()
            ))
        })
}

/// Compute segment boundaries. Pure so the arithmetic is testable: the spans
/// are contiguous, cover exactly `[0, duration]`, and the last span may be
/// shorter than `segment_len`.
pub fn plan_boundaries(duration: f64, threshold: f64, segment_len: f64) -> Vec<(f64, f64)> {
    if duration <= threshold || segment_len <= 0.0 {
        return vec![(0.0, duration)];
    }

    let mut spans = Vec::new();
    let mut start = 0.0;
    while start < duration {
        let end = (start + segment_len).min(duration);
        spans.push((start, end));
        start = end;
    }
    spans
}

/// Split `audio_path` into the planned segments inside `task_dir`.
///
/// The single-segment case reuses the input file untouched. The multi-segment
/// case invokes ffmpeg's segment muxer with stream copy, then pairs the
/// produced files with the computed boundaries.
pub async fn split_segments(
    audio_path: &Path,
    task_dir: &Path,
    duration: f64,
    threshold: f64,
    segment_len: f64,
    cancel: &CancellationToken,
) -> Result<Vec<SegmentPlan>> {
    let boundaries = plan_boundaries(duration, threshold, segment_len);

    if boundaries.len() == 1 {
        debug!(path = %audio_path.display(), duration, "Audio short enough for a single segment");
        return Ok(vec![SegmentPlan {
            index: 0,
            path: audio_path.to_path_buf(),
            start_seconds: 0.0,
            end_seconds: duration,
        }]);
    }

    let ext = audio_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    let pattern = task_dir.join(format!("segment_%04d.{}", ext));

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(audio_path)
        .args(["-f", "segment", "-segment_time"])
        .arg(format!("{}", segment_len))
        .args(["-c", "copy"])
        .arg(&pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolMissing("ffmpeg is not installed".to_string())
        } else {
            Error::Internal(format!("spawn ffmpeg: {}", e))
        }
    })?;

    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stderr_task = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| Error::Internal(format!("wait for ffmpeg: {}", e)))?
        }
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(Error::Cancelled);
        }
    };

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();
        return Err(Error::Internal(format!(
            "ffmpeg segmentation failed: {}",
            stderr.trim()
        )));
    }

    let mut plans = Vec::with_capacity(boundaries.len());
    for (index, (start, end)) in boundaries.iter().enumerate() {
        let path = task_dir.join(format!("segment_{:04}.{}", index, ext));
        if !path.exists() {
            return Err(Error::Internal(format!(
                "ffmpeg did not produce expected segment {}",
                path.display()
            )));
        }
        plans.push(SegmentPlan {
            index: index as u32,
            path,
            start_seconds: *start,
            end_seconds: *end,
        });
    }

    info!(
        segments = plans.len(),
        duration, segment_len, "Audio split into segments"
    );
    Ok(plans)
}
