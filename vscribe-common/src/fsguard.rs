//! Path containment and path tokens
//!
//! Every filesystem boundary in the service consumes either a path produced
//! by `safe_join` or a `PathToken` resolved against a configured root. Raw
//! client-supplied paths never reach the filesystem.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::{Component, Path, PathBuf};

/// Returns true only if `candidate`, fully resolved, has `root` as an
/// ancestor.
///
/// Both paths are canonicalized so symlinks cannot smuggle a path out of the
/// root. For candidates that do not exist yet, the deepest existing ancestor
/// is canonicalized and the remaining components are re-appended after
/// rejecting any `..` among them.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let Ok(root) = std::fs::canonicalize(root) else {
        return false;
    };
    let Some(resolved) = resolve_lexical(candidate) else {
        return false;
    };
    resolved.starts_with(&root)
}

/// Join `parts` onto `root` and verify containment.
///
/// Fails with a `path_escape` error when the joined path resolves outside
/// `root`. Absolute components and `..` traversal are both rejected by the
/// containment check.
pub fn safe_join<I, S>(root: &Path, parts: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<Path>,
{
    let mut joined = root.to_path_buf();
    for part in parts {
        joined.push(part.as_ref());
    }
    if is_within(root, &joined) {
        Ok(joined)
    } else {
        Err(Error::PathEscape(format!(
            "{} escapes {}",
            joined.display(),
            root.display()
        )))
    }
}

/// Resolve `path` against the filesystem as far as it exists, then append the
/// remaining components lexically.
///
/// A path that does not fully exist and still contains `..` is rejected
/// (returns None): parent traversal cannot be resolved safely once symlinks
/// may be involved.
fn resolve_lexical(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Some(resolved);
    }

    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }

    // Walk up to the deepest existing ancestor, then re-append the plain-name
    // tail onto its canonical form.
    let mut existing = path.parent()?;
    let mut tail = vec![path.file_name()?];
    loop {
        let anchor = if existing.as_os_str().is_empty() {
            Path::new(".")
        } else {
            existing
        };
        if let Ok(resolved) = std::fs::canonicalize(anchor) {
            let mut out = resolved;
            for name in tail.iter().rev() {
                out.push(name);
            }
            return Some(out);
        }
        tail.push(existing.file_name()?);
        existing = existing.parent()?;
    }
}

/// Which configured root a token resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Temp,
    Output,
}

impl RootKind {
    pub fn label(&self) -> &'static str {
        match self {
            RootKind::Temp => "temp",
            RootKind::Output => "output",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "temp" => Some(RootKind::Temp),
            "output" => Some(RootKind::Output),
            _ => None,
        }
    }
}

/// Opaque, server-issued file identifier: URL-safe base64 of
/// `<root-label>/<root-relative path>`. Clients never see raw paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathToken {
    pub root: RootKind,
    pub relative: PathBuf,
}

impl PathToken {
    pub fn new(root: RootKind, relative: impl Into<PathBuf>) -> Self {
        Self {
            root,
            relative: relative.into(),
        }
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> String {
        let raw = format!("{}/{}", self.root.label(), self.relative.display());
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Decode from the wire form. Rejects tokens that are not valid base64,
    /// name an unknown root, or carry traversal components.
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| Error::BadRequest("malformed file token".to_string()))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| Error::BadRequest("malformed file token".to_string()))?;

        let (label, rest) = raw
            .split_once('/')
            .ok_or_else(|| Error::BadRequest("malformed file token".to_string()))?;
        let root = RootKind::from_label(label)
            .ok_or_else(|| Error::BadRequest("unknown file root".to_string()))?;

        let relative = Path::new(rest);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if rest.is_empty() || !clean {
            return Err(Error::PathEscape(format!(
                "token path escapes root: {}",
                rest
            )));
        }

        Ok(Self {
            root,
            relative: relative.to_path_buf(),
        })
    }

    /// Resolve against the actual root directory, re-checking containment.
    pub fn resolve(&self, root_dir: &Path) -> Result<PathBuf> {
        safe_join(root_dir, [&self.relative])
    }
}
