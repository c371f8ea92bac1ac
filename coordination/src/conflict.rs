//! Conflict classification
//!
//! When a PR fails to merge, the only case the scheduler resolves on its
//! own is a PR that touches nothing but the metadata directory. Anything
//! else goes back to the caller as an escalation.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictClass {
    /// Every changed path lives under the metadata directory.
    MetadataOnly,
    /// Needs a human or a dedicated resolver.
    Escalate,
}

/// Normalise `dir` to a `prefix/` form so `.team` cannot match `.teamwork/x`.
fn dir_prefix(dir: &str) -> String {
    let trimmed = dir.trim_start_matches("./").trim_end_matches('/');
    format!("{trimmed}/")
}

/// An empty file list is never metadata-only: with nothing to inspect
/// there is nothing to vouch for.
pub fn is_metadata_only<S: AsRef<str>>(paths: &[S], metadata_dir: &str) -> bool {
    let prefix = dir_prefix(metadata_dir);
    !paths.is_empty()
        && paths
            .iter()
            .all(|p| p.as_ref().trim_start_matches("./").starts_with(&prefix))
}

pub fn classify_conflict<S: AsRef<str>>(paths: &[S], metadata_dir: &str) -> ConflictClass {
    if is_metadata_only(paths, metadata_dir) {
        ConflictClass::MetadataOnly
    } else {
        ConflictClass::Escalate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_only() {
        let paths = [".team/state/sprint.json", ".team/personas/qa/notes.md"];
        assert_eq!(classify_conflict(&paths, ".team/"), ConflictClass::MetadataOnly);
    }

    #[test]
    fn test_any_outside_path_escalates() {
        let paths = [".team/state/sprint.json", "src/lib.rs"];
        assert_eq!(classify_conflict(&paths, ".team/"), ConflictClass::Escalate);
    }

    #[test]
    fn test_empty_file_list_escalates() {
        let paths: [&str; 0] = [];
        assert_eq!(classify_conflict(&paths, ".team/"), ConflictClass::Escalate);
    }

    #[test]
    fn test_prefix_is_directory_bounded() {
        assert!(!is_metadata_only(&[".teamwork/plan.md"], ".team"));
        assert!(is_metadata_only(&["./.team/plan.md"], ".team"));
    }
}
