//! Workspace-scoped filesystem access for agent actions.
//!
//! Every path the model supplies is resolved lexically against the workspace
//! root. Absolute paths, `..` components and anything under `.git` are refused
//! before the filesystem is touched.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::text::head_chars;

/// A model-supplied path that would leave the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEscapeError {
    pub path: String,
    pub reason: &'static str,
}

impl fmt::Display for PathEscapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path '{}' rejected: {}", self.path, self.reason)
    }
}

impl std::error::Error for PathEscapeError {}

/// Ceilings applied when preloading files requested by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadLimits {
    pub per_file_chars: usize,
    pub total_chars: usize,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the workspace.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let escape = |reason| PathEscapeError {
            path: rel.to_string(),
            reason,
        };
        let trimmed = rel.trim();
        if trimmed.is_empty() {
            return Err(escape("empty path").into());
        }
        let path = Path::new(trimmed);
        let mut clean = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    if clean.as_os_str().is_empty() && part == ".git" {
                        return Err(escape("git metadata is off limits").into());
                    }
                    clean.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(escape("parent directory traversal").into());
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(escape("absolute paths are not allowed").into());
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(escape("path names the workspace root").into());
        }
        Ok(self.root.join(clean))
    }

    /// Read a file; `Ok(None)` when it does not exist.
    pub fn read(&self, rel: &str) -> Result<Option<String>> {
        let path = self.resolve(rel)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Overwrite a file, creating parent directories as needed.
    #[instrument(skip_all, fields(path = rel))]
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        debug!(bytes = contents.len(), "wrote file");
        Ok(())
    }

    /// Relative paths of regular files, sorted, skipping `.git` and `node_modules`.
    pub fn list(&self, limit: usize) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries =
                fs::read_dir(&dir).with_context(|| format!("list {}", dir.display()))?;
            for entry in entries {
                let entry = entry.with_context(|| format!("list {}", dir.display()))?;
                let name = entry.file_name();
                if name == ".git" || name == "node_modules" || name == "target" {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .with_context(|| format!("stat {}", entry.path().display()))?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file()
                    && let Ok(rel) = entry.path().strip_prefix(&self.root)
                {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        out.sort();
        out.truncate(limit);
        Ok(out)
    }

    /// Read the files a plan asked for, bounded per file and in total.
    pub fn preload(&self, paths: &[String], limits: PreloadLimits) -> String {
        let mut sections = Vec::new();
        let mut total = 0usize;
        for rel in paths {
            if total >= limits.total_chars {
                sections.push("(remaining files truncated)".to_string());
                break;
            }
            let body = match self.read(rel) {
                Ok(Some(content)) => {
                    let chars = content.chars().count();
                    let (head, cut) = head_chars(&content, limits.per_file_chars);
                    if cut {
                        format!("{head}\n... (truncated, total: {chars} chars)")
                    } else {
                        content
                    }
                }
                Ok(None) => "File not found".to_string(),
                Err(err) => format!("Cannot read file: {err}"),
            };
            total += body.chars().count();
            sections.push(format!("=== {rel} ===\n{body}"));
        }
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escape_reason(ws: &Workspace, rel: &str) -> Option<&'static str> {
        ws.resolve(rel)
            .err()
            .and_then(|e| e.downcast_ref::<PathEscapeError>().map(|p| p.reason))
    }

    #[test]
    fn rejects_paths_outside_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        assert!(escape_reason(&ws, "../etc/passwd").is_some());
        assert!(escape_reason(&ws, "src/../../x").is_some());
        assert!(escape_reason(&ws, "/etc/passwd").is_some());
        assert!(escape_reason(&ws, ".git/config").is_some());
        assert!(escape_reason(&ws, "").is_some());
        assert!(escape_reason(&ws, "./src/lib.rs").is_none());
    }

    #[test]
    fn write_creates_parents_and_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("deep/nested/file.txt", "hello").expect("write");
        assert_eq!(
            ws.read("deep/nested/file.txt").expect("read").as_deref(),
            Some("hello")
        );
        assert_eq!(ws.read("missing.txt").expect("read"), None);
    }

    #[test]
    fn list_skips_git_metadata() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(".git")).expect("mkdir");
        fs::write(temp.path().join(".git/HEAD"), "ref").expect("write");
        let ws = Workspace::new(temp.path());
        ws.write("b.txt", "").expect("write");
        ws.write("a/c.txt", "").expect("write");
        assert_eq!(ws.list(10).expect("list"), vec!["a/c.txt", "b.txt"]);
    }

    #[test]
    fn preload_truncates_per_file_and_in_total() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        ws.write("big.txt", &"x".repeat(50)).expect("write");
        ws.write("small.txt", "ok").expect("write");
        let limits = PreloadLimits {
            per_file_chars: 10,
            total_chars: 58,
        };
        let out = ws.preload(
            &[
                "big.txt".to_string(),
                "missing.txt".to_string(),
                "small.txt".to_string(),
                "small.txt".to_string(),
            ],
            limits,
        );
        assert!(out.contains("=== big.txt ===\nxxxxxxxxxx\n... (truncated, total: 50 chars)"));
        assert!(out.contains("=== missing.txt ===\nFile not found"));
        assert!(out.ends_with("(remaining files truncated)"));
    }
}
