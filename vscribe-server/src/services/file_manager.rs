//! File manager: artifact enumeration, token-based download, deletion
//!
//! The manager owns every filesystem operation the HTTP file surface can
//! trigger. Clients only ever hold opaque path tokens; every token resolves
//! through containment checks against the two configured roots.

use crate::models::ArtifactKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vscribe_common::filename::sanitize_filename;
use vscribe_common::fsguard::{is_within, safe_join, PathToken, RootKind};
use vscribe_common::{Error, Result};
use walkdir::WalkDir;

/// One listed file
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    /// File name (sanitized for display)
    pub name: String,
    /// Task directory the file belongs to, when nested under one
    pub task_id: Option<String>,
    pub size: u64,
    /// `artifact` for output files, `working` for temp files
    pub kind: &'static str,
    pub created_at: DateTime<Utc>,
    /// Opaque token for download/delete calls
    pub path_token: String,
}

/// Per-token result of a bulk delete
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub token: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// File manager bound to the configured roots
#[derive(Debug, Clone)]
pub struct FileManager {
    temp_dir: PathBuf,
    output_dir: PathBuf,
}

impl FileManager {
    pub fn new(temp_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            output_dir,
        }
    }

    fn root_dir(&self, kind: RootKind) -> &Path {
        match kind {
            RootKind::Temp => &self.temp_dir,
            RootKind::Output => &self.output_dir,
        }
    }

    /// Enumerate both roots. Internal dotfiles (the registry snapshot) are
    /// not listed.
    pub fn list_all(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for root_kind in [RootKind::Output, RootKind::Temp] {
            let root = self.root_dir(root_kind);
            if !root.exists() {
                continue;
            }
            for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }

                let Ok(relative) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let task_id = relative
                    .components()
                    .next()
                    .and_then(|c| match c {
                        std::path::Component::Normal(n) if relative.components().count() > 1 => {
                            Some(n.to_string_lossy().to_string())
                        }
                        _ => None,
                    });

                let metadata = entry.metadata().ok();
                let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
                let created_at = metadata
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(Utc::now);

                entries.push(FileEntry {
                    name: sanitize_filename(&name),
                    task_id,
                    size,
                    kind: match root_kind {
                        RootKind::Output => "artifact",
                        RootKind::Temp => "working",
                    },
                    created_at,
                    path_token: PathToken::new(root_kind, relative).encode(),
                });
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Resolve a token to a readable file, enforcing containment. Returns the
    /// absolute path and a sanitized download name.
    pub fn resolve_download(&self, token: &str) -> Result<(PathBuf, String)> {
        let token = PathToken::decode(token)?;
        let root = self.root_dir(token.root);
        let path = token.resolve(root)?;

        if !path.is_file() {
            return Err(Error::NotFound("file no longer exists".to_string()));
        }

        let name = path
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .unwrap_or_else(|| "download".to_string());
        Ok((path, name))
    }

    /// Delete many files by token; containment violations are reported per
    /// token, never executed.
    pub fn delete_many(&self, tokens: &[String]) -> Vec<DeleteOutcome> {
        tokens
            .iter()
            .map(|raw| match self.delete_one(raw) {
                Ok(()) => DeleteOutcome {
                    token: raw.clone(),
                    deleted: true,
                    error: None,
                },
                Err(e) => {
                    warn!(error = %e, "File delete rejected");
                    DeleteOutcome {
                        token: raw.clone(),
                        deleted: false,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    fn delete_one(&self, raw: &str) -> Result<()> {
        let token = PathToken::decode(raw)?;
        let root = self.root_dir(token.root);
        let path = token.resolve(root)?;
        if !path.exists() {
            return Err(Error::NotFound("file no longer exists".to_string()));
        }
        std::fs::remove_file(&path)?;
        Ok(())
    }

    /// Remove the task's working and output directories.
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        validate_task_dir_name(task_id)?;

        for root in [&self.output_dir, &self.temp_dir] {
            let dir = safe_join(root, [task_id])?;
            if dir.exists() {
                if !is_within(root, &dir) {
                    return Err(Error::PathEscape(format!(
                        "task directory {} escapes {}",
                        dir.display(),
                        root.display()
                    )));
                }
                std::fs::remove_dir_all(&dir)?;
                info!(task_id, dir = %dir.display(), "Removed task directory");
            }
        }
        Ok(())
    }

    /// Artifact path + sanitized download filename for a completed task.
    pub fn artifact_download(
        &self,
        task_id: &str,
        relative: &str,
        title: Option<&str>,
        kind: ArtifactKind,
    ) -> Result<(PathBuf, String)> {
        validate_task_dir_name(task_id)?;
        let path = safe_join(&self.output_dir, [task_id, relative])?;
        if !path.is_file() {
            return Err(Error::NotFound("artifact not found on disk".to_string()));
        }

        let stem = sanitize_filename(title.unwrap_or(task_id));
        let download_name = format!("{}{}", stem, kind.download_suffix());
        Ok((path, download_name))
    }
}

/// Task directories are single plain path components.
fn validate_task_dir_name(task_id: &str) -> Result<()> {
    let valid = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::PathEscape(format!(
            "invalid task identifier: {}",
            task_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        let output = dir.path().join("output");
        std::fs::create_dir_all(&temp).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        (dir, FileManager::new(temp, output))
    }

    #[test]
    fn lists_files_with_tokens_and_task_ids() {
        let (_guard, fm) = manager();
        std::fs::create_dir_all(fm.output_dir.join("task1")).unwrap();
        std::fs::write(fm.output_dir.join("task1/transcript.md"), b"text").unwrap();
        std::fs::write(fm.temp_dir.join("loose.mp3"), b"audio").unwrap();
        std::fs::write(fm.temp_dir.join(".task_history.json"), b"[]").unwrap();

        let entries = fm.list_all().unwrap();
        assert_eq!(entries.len(), 2);

        let artifact = entries.iter().find(|e| e.kind == "artifact").unwrap();
        assert_eq!(artifact.task_id.as_deref(), Some("task1"));
        assert_eq!(artifact.name, "transcript.md");
        assert_eq!(artifact.size, 4);

        let working = entries.iter().find(|e| e.kind == "working").unwrap();
        assert!(working.task_id.is_none());

        // The registry snapshot is internal, never listed.
        assert!(!entries.iter().any(|e| e.name.contains("task_history")));
    }

    #[test]
    fn download_resolves_listed_token() {
        let (_guard, fm) = manager();
        std::fs::create_dir_all(fm.output_dir.join("t")).unwrap();
        std::fs::write(fm.output_dir.join("t/summary.md"), b"# s").unwrap();

        let entries = fm.list_all().unwrap();
        let (path, name) = fm.resolve_download(&entries[0].path_token).unwrap();
        assert!(path.ends_with("t/summary.md"));
        assert_eq!(name, "summary.md");
    }

    #[test]
    fn crafted_tokens_are_rejected() {
        let (_guard, fm) = manager();
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let escape = URL_SAFE_NO_PAD.encode(b"output/../../etc/passwd");
        assert!(fm.resolve_download(&escape).is_err());

        let bad_root = URL_SAFE_NO_PAD.encode(b"somewhere/file");
        assert!(fm.resolve_download(&bad_root).is_err());

        assert!(fm.resolve_download("!!!").is_err());
    }

    #[test]
    fn delete_many_reports_per_token() {
        let (_guard, fm) = manager();
        std::fs::write(fm.temp_dir.join("a.bin"), b"a").unwrap();

        let good = PathToken::new(RootKind::Temp, "a.bin").encode();
        let missing = PathToken::new(RootKind::Temp, "gone.bin").encode();

        let outcomes = fm.delete_many(&[good, missing]);
        assert!(outcomes[0].deleted);
        assert!(!outcomes[1].deleted);
        assert!(outcomes[1].error.is_some());
        assert!(!fm.temp_dir.join("a.bin").exists());
    }

    #[test]
    fn delete_task_removes_both_directories() {
        let (_guard, fm) = manager();
        std::fs::create_dir_all(fm.output_dir.join("task9")).unwrap();
        std::fs::create_dir_all(fm.temp_dir.join("task9")).unwrap();
        std::fs::write(fm.output_dir.join("task9/data.json"), b"{}").unwrap();

        fm.delete_task("task9").unwrap();
        assert!(!fm.output_dir.join("task9").exists());
        assert!(!fm.temp_dir.join("task9").exists());
    }

    #[test]
    fn delete_task_rejects_traversal_names() {
        let (_guard, fm) = manager();
        for bad in ["../sibling", "a/b", "", "dot.dot", "x y"] {
            let err = fm.delete_task(bad).unwrap_err();
            assert_eq!(err.kind(), vscribe_common::ErrorKind::PathEscape, "{}", bad);
        }
    }

    #[test]
    fn artifact_download_builds_sanitized_name() {
        let (_guard, fm) = manager();
        std::fs::create_dir_all(fm.output_dir.join("t1")).unwrap();
        std::fs::write(fm.output_dir.join("t1/transcript.md"), b"x").unwrap();

        let (path, name) = fm
            .artifact_download("t1", "transcript.md", Some("My/Video: Talk"), ArtifactKind::Transcript)
            .unwrap();
        assert!(path.ends_with("t1/transcript.md"));
        assert_eq!(name, "My_Video_ Talk_transcript.md");
    }

    #[test]
    fn artifact_download_rejects_escaping_relative() {
        let (_guard, fm) = manager();
        std::fs::create_dir_all(fm.output_dir.join("t1")).unwrap();
        let err = fm
            .artifact_download("t1", "../../etc/passwd", None, ArtifactKind::Data)
            .unwrap_err();
        assert_eq!(err.kind(), vscribe_common::ErrorKind::PathEscape);
    }
}
