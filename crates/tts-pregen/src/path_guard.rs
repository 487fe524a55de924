//! Path-traversal defense for job/session output directories, generalizing
//! the component-wise check in `tts-kb::path` to whole directory paths that
//! are already stored (rather than assembled from caller-supplied
//! components).

use std::path::{Path, PathBuf};

/// Reject a caller-supplied subdirectory name before it is ever joined onto
/// a base directory: empty strings, `..`, path separators, or absolute
/// paths. Mirrors the component guard `tts-kb` applies to module/question
/// identifiers, since a job's output directory is just as caller-influenced.
#[must_use]
pub fn is_safe_subdir(component: &str) -> bool {
    if component.is_empty() {
        return false;
    }
    if component.contains("..") || component.contains('/') || component.contains('\\') {
        return false;
    }
    !Path::new(component).is_absolute()
}

/// Canonicalize `output_dir` and verify it is still contained within `base`.
/// Returns `None` if either path fails to canonicalize (e.g. does not
/// exist) or the resolved directory escapes `base`.
#[must_use]
pub fn resolve_within_base(base: &Path, output_dir: &str) -> Option<PathBuf> {
    let resolved = Path::new(output_dir).canonicalize().ok()?;
    let base_resolved = base.canonicalize().ok()?;
    if resolved.starts_with(&base_resolved) {
        Some(resolved)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdir_guard_rejects_traversal_and_separators() {
        assert!(!is_safe_subdir(".."));
        assert!(!is_safe_subdir("a/../b"));
        assert!(!is_safe_subdir("a/b"));
        assert!(!is_safe_subdir(""));
        assert!(!is_safe_subdir("/etc/passwd"));
    }

    #[test]
    fn subdir_guard_accepts_plain_identifier() {
        assert!(is_safe_subdir("batch-1"));
    }

    #[test]
    fn accepts_nested_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("job-1");
        std::fs::create_dir_all(&nested).unwrap();
        let resolved = resolve_within_base(dir.path(), nested.to_str().unwrap());
        assert!(resolved.is_some());
    }

    #[test]
    fn rejects_directory_outside_base() {
        let base = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let resolved = resolve_within_base(base.path(), outside.path().to_str().unwrap());
        assert!(resolved.is_none());
    }

    #[test]
    fn rejects_nonexistent_directory() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("does-not-exist");
        assert!(resolve_within_base(base.path(), missing.to_str().unwrap()).is_none());
    }
}
