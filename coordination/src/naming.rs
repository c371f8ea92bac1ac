//! Branch names and PR texts the scheduler creates.
//!
//! Names are deterministic so a re-run of the same tick lands on the same
//! refs instead of piling up near-duplicates.

use chrono::{DateTime, Utc};

/// Backup of a drifted integration branch for sprint `sprint`.
pub fn sprint_backup_branch(branch: &str, sprint: u32) -> String {
    format!("{branch}-sprint-{sprint}")
}

/// Backup taken right before a conflicting trunk merge recreates the branch.
pub fn timestamped_backup_branch(branch: &str, now: DateTime<Utc>) -> String {
    format!("{branch}-backup-{}", now.format("%Y%m%d%H%M%S"))
}

pub fn drift_pr_title(sprint: u32, branch: &str) -> String {
    format!("Sprint {sprint} - Drifted work from {branch}")
}

pub fn drift_pr_body(sprint: u32, branch: &str, backup: &str, trunk: &str) -> String {
    format!(
        "Work carried over from Sprint {sprint}.\n\n\
         **Sprint:** {sprint}\n\
         **Branch:** {backup}\n\n\
         `{branch}` could no longer be merged into `{trunk}`. \
         A reconciliation session will be created to bring these changes back."
    )
}

pub fn conflict_backup_title(backup: &str) -> String {
    format!("Conflict Backup: {backup}")
}

pub fn conflict_backup_body(branch: &str, backup: &str, trunk: &str) -> String {
    format!(
        "Automatic backup of `{branch}` after a conflicting merge into `{trunk}`.\n\n\
         **Backup Branch:** `{backup}`\n\
         **Reason:** direct merge hit conflicts.\n\
         **Action Required:** resolve and merge by hand."
    )
}

pub fn integration_pr_title(branch: &str, trunk: &str) -> String {
    format!("🤖 Integration: {branch} → {trunk}")
}

pub fn integration_pr_body(branch: &str, trunk: &str, ahead: u64, unit: &str) -> String {
    format!(
        "## Automated Integration PR\n\n\
         Accumulated work from the persona rotation.\n\n\
         **Stats**:\n\
         - {unit}: {ahead}\n\
         - Source: `{branch}`\n\
         - Target: `{trunk}`\n\n\
         **Review Instructions**:\n\
         1. Review the accumulated persona changes\n\
         2. Check that CI passes\n\
         3. Merge when ready\n\n\
         This PR is maintained by the scheduler; new commits land here as personas finish."
    )
}

pub fn reconciliation_title(sprint: u32) -> String {
    format!("[Reconciliation] Sprint {sprint} drift")
}

/// Trailing number of a PR URL such as `https://host/o/r/pull/17`.
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    url.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_names() {
        assert_eq!(sprint_backup_branch("jules", 4), "jules-sprint-4");
        let at = Utc.with_ymd_and_hms(2025, 6, 7, 8, 9, 10).unwrap();
        assert_eq!(
            timestamped_backup_branch("jules", at),
            "jules-backup-20250607080910"
        );
    }

    #[test]
    fn test_pr_number_from_url() {
        assert_eq!(
            pr_number_from_url("https://github.com/acme/site/pull/17\n"),
            Some(17)
        );
        assert_eq!(pr_number_from_url("https://github.com/acme/site/pull/17/"), Some(17));
        assert_eq!(pr_number_from_url("created"), None);
    }

    #[test]
    fn test_titles() {
        assert_eq!(drift_pr_title(3, "jules"), "Sprint 3 - Drifted work from jules");
        assert_eq!(integration_pr_title("jules", "main"), "🤖 Integration: jules → main");
        assert_eq!(reconciliation_title(3), "[Reconciliation] Sprint 3 drift");
        assert!(drift_pr_body(3, "jules", "jules-sprint-3", "main").contains("**Sprint:** 3"));
    }
}
