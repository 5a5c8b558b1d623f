//! File operations for `read_file`, `write_file` and `list_files`.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tokio::fs;

use crate::error::SandboxError;

/// Directories never descended into by recursive listings.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", ".git", "__pycache__", "venv", ".venv"];

/// Recursion limit for `**` patterns.
const MAX_DEPTH: usize = 16;

/// Normalize a path by resolving `.` and `..` components lexically (no filesystem access).
pub(crate) fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Canonicalize the nearest existing ancestor and re-append the rest, so
/// symlinks inside the root cannot point outside it.
fn canonical_for_check(resolved: &Path) -> PathBuf {
    let mut ancestor = resolved;
    let mut tail_parts = Vec::new();
    loop {
        if ancestor.exists() {
            let mut result = ancestor
                .canonicalize()
                .unwrap_or_else(|_| ancestor.to_path_buf());
            for part in tail_parts.into_iter().rev() {
                result = result.join(part);
            }
            return result;
        }
        if let Some(name) = ancestor.file_name() {
            tail_parts.push(name);
        }
        match ancestor.parent() {
            Some(parent) if parent != ancestor => ancestor = parent,
            _ => return resolved.to_path_buf(),
        }
    }
}

/// Resolve a backend-supplied path, confining it to `root` when one is set.
pub(crate) fn resolve_path(raw: &str, root: Option<&Path>) -> Result<PathBuf, SandboxError> {
    let path = Path::new(raw);
    let Some(root) = root else {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(path)
        };
        return Ok(normalize_lexical(&absolute));
    };

    let resolved = if path.is_absolute() {
        normalize_lexical(path)
    } else {
        normalize_lexical(&root.join(path))
    };

    if !resolved.starts_with(root) || !canonical_for_check(&resolved).starts_with(root) {
        return Err(SandboxError::PathNotAllowed {
            path: raw.to_string(),
        });
    }
    Ok(resolved)
}

pub(crate) async fn read(path: &Path, limit: u64) -> Result<String, SandboxError> {
    let not_found = || SandboxError::FileNotFound {
        path: path.to_path_buf(),
    };

    let metadata = fs::metadata(path).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    if metadata.len() > limit {
        return Err(SandboxError::FileSizeLimit {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit,
        });
    }

    let bytes = fs::read(path).await.map_err(|_| not_found())?;
    // The file may have grown since the metadata call.
    if bytes.len() as u64 > limit {
        return Err(SandboxError::FileSizeLimit {
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            limit,
        });
    }

    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

pub(crate) async fn write(path: &Path, content: &str, max_bytes: usize) -> Result<(), SandboxError> {
    if content.len() > max_bytes {
        return Err(SandboxError::FileWrite {
            path: path.to_path_buf(),
            reason: format!(
                "content is {} bytes, limit is {max_bytes}",
                content.len()
            ),
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let is_dir = fs::metadata(parent)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SandboxError::DirectoryNotFound {
                path: parent.to_path_buf(),
            });
        }
    }

    if fs::metadata(path).await.is_ok_and(|m| m.is_dir()) {
        return Err(SandboxError::FileWrite {
            path: path.to_path_buf(),
            reason: "path is a directory".to_string(),
        });
    }

    fs::write(path, content)
        .await
        .map_err(|e| SandboxError::FileWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Translate a glob (`*`, `?`, `**`) into an anchored regex over `/`-separated
/// relative paths.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let chars: Vec<char> = pattern.trim().chars().collect();
    let mut re = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }
    re.push('$');
    Regex::new(&re)
}

pub(crate) async fn list(
    dir: &Path,
    matcher: &Regex,
    recursive: bool,
    max_entries: usize,
) -> Result<(Vec<String>, bool), SandboxError> {
    let is_dir = fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false);
    if !is_dir {
        return Err(SandboxError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut entries = Vec::new();
    let mut pending = vec![(dir.to_path_buf(), 0usize)];

    while let Some((current, depth)) = pending.pop() {
        let mut reader = match fs::read_dir(&current).await {
            Ok(reader) => reader,
            Err(e) if current == dir => {
                tracing::debug!(path = %dir.display(), error = %e, "Cannot read directory");
                return Err(SandboxError::DirectoryNotFound {
                    path: dir.to_path_buf(),
                });
            }
            Err(e) => {
                tracing::debug!(path = %current.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        while let Ok(Some(entry)) = reader.next_entry().await {
            let entry_path = entry.path();
            let relative = entry_path
                .strip_prefix(dir)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .replace('\\', "/");
            // file_type() does not follow symlinks.
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());

            if matcher.is_match(&relative) {
                entries.push(if is_dir {
                    format!("{relative}/")
                } else {
                    relative.clone()
                });
            }

            if recursive && is_dir && depth < MAX_DEPTH {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !SKIPPED_DIRS.iter().any(|skipped| name == *skipped) {
                    pending.push((entry_path, depth + 1));
                }
            }
        }
    }

    entries.sort();
    let truncated = entries.len() > max_entries;
    entries.truncate(max_entries);
    Ok((entries, truncated))
}
