//! Filesystem transcript locator for Claude Code sessions.

use std::path::{Path, PathBuf};

use crate::discovery::{LocateError, TranscriptLocator};

const DEFAULT_MAX_DEPTH: u32 = 4;

/// Walks `~/.claude` for `<session>.jsonl` or a `.jsonl` inside a directory
/// named after the session.
#[derive(Debug, Clone)]
pub struct FsTranscriptLocator {
    root: PathBuf,
    allowed_roots: Vec<PathBuf>,
    max_depth: u32,
}

impl FsTranscriptLocator {
    pub fn new(root: PathBuf, allowed_roots: Vec<PathBuf>) -> Self {
        Self {
            root,
            allowed_roots,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Locator rooted at `~/.claude`, restricted to the agent directories.
    pub fn from_env() -> Result<Self, LocateError> {
        let home = home_dir()?;
        Ok(Self::new(home.join(".claude"), allowed_roots()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TranscriptLocator for FsTranscriptLocator {
    fn discover(&self, session_id: &str) -> Result<Option<PathBuf>, LocateError> {
        if session_id.is_empty() || !self.root.is_dir() {
            return Ok(None);
        }
        let Some(found) = find_transcript(&self.root, session_id, 0, self.max_depth)? else {
            return Ok(None);
        };
        if !is_within(&found, &self.allowed_roots) {
            return Err(LocateError::OutsideRoots(found));
        }
        Ok(Some(found))
    }
}

fn find_transcript(dir: &Path, session_id: &str, depth: u32, max_depth: u32) -> Result<Option<PathBuf>, LocateError> {
    if depth > max_depth {
        return Ok(None);
    }
    let entries = std::fs::read_dir(dir).map_err(|source| LocateError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".jsonl") {
            continue;
        }
        let parent_matches = path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|p| p.to_string_lossy().contains(session_id));
        if parent_matches || name.contains(session_id) {
            return Ok(Some(path));
        }
    }

    subdirs.sort();
    for subdir in subdirs {
        // Unreadable subdirectories are skipped, not fatal.
        match find_transcript(&subdir, session_id, depth + 1, max_depth) {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) | Err(LocateError::Io { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn home_dir() -> Result<PathBuf, LocateError> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or(LocateError::NoHome)
}

/// `~/.claude`, `~/.codex`, and `$CODEX_HOME` when set.
pub fn allowed_roots() -> Result<Vec<PathBuf>, LocateError> {
    let home = home_dir()?;
    let mut roots = vec![home.join(".claude"), home.join(".codex")];
    if let Some(codex_home) = std::env::var_os("CODEX_HOME").filter(|h| !h.is_empty()) {
        roots.push(PathBuf::from(codex_home));
    }
    Ok(roots)
}

/// Whether `path` resolves under one of `roots`.
///
/// Paths that do not exist yet are resolved through their parent.
pub fn is_within(path: &Path, roots: &[PathBuf]) -> bool {
    let resolved = canonical_or_parent(path).unwrap_or_else(|| path.to_path_buf());
    roots.iter().any(|root| {
        root.canonicalize()
            .is_ok_and(|r| resolved.starts_with(&r))
            || resolved.starts_with(root)
    })
}

fn canonical_or_parent(path: &Path) -> Option<PathBuf> {
    if let Ok(p) = path.canonicalize() {
        return Some(p);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "{}\n").unwrap();
    }

    fn locator(root: &Path) -> FsTranscriptLocator {
        FsTranscriptLocator::new(root.to_path_buf(), vec![root.to_path_buf()])
    }

    #[test]
    fn finds_file_named_after_session() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".claude");
        let target = root.join("projects/-home-me-repo/5f0c1e2a-aaaa.jsonl");
        touch(&target);
        touch(&root.join("projects/-home-me-repo/other.jsonl"));

        let found = locator(&root).discover("5f0c1e2a-aaaa").unwrap();
        assert_eq!(found.as_deref(), Some(target.as_path()));
    }

    #[test]
    fn finds_file_inside_session_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".claude");
        let target = root.join("projects/sess-77/transcript.jsonl");
        touch(&target);

        let found = locator(&root).discover("sess-77").unwrap();
        assert_eq!(found.as_deref(), Some(target.as_path()));
    }

    #[test]
    fn respects_max_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".claude");
        touch(&root.join("a/b/c/d/e/f/deep-session.jsonl"));
        assert_eq!(locator(&root).discover("deep-session").unwrap(), None);
    }

    #[test]
    fn missing_root_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let found = locator(&tmp.path().join("absent")).discover("x").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn found_path_must_be_in_allowed_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".claude");
        touch(&root.join("projects/s1.jsonl"));
        let locator = FsTranscriptLocator::new(root, vec![tmp.path().join(".codex")]);
        assert!(matches!(locator.discover("s1"), Err(LocateError::OutsideRoots(_))));
    }

    #[test]
    fn is_within_handles_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(".codex");
        std::fs::create_dir_all(&root).unwrap();
        assert!(is_within(&root.join("not-yet.jsonl"), &[root.clone()]));
        assert!(!is_within(&tmp.path().join("x.jsonl"), &[root]));
    }
}
